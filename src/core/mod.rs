// Cross-cutting types shared by the bus, store, and gateway layers.
pub mod error;
