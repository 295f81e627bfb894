//! Purpose: Library crate behind the `wikibus` binary and its integration tests.
//! Exports: `bus` (event bus), `store` (pooled SQLite), `page` (page service and proxy),
//! `markdown`, `bridge` (websocket bus bridge), `http` (REST gateway), `app` (composition).
//! Role: Every component talks to the others through the bus, never by direct reference.
//! Invariants: Failures cross the bus as numeric codes that round-trip through `core::error`.
#![allow(clippy::result_large_err)]
pub mod app;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod core;
pub mod http;
pub mod markdown;
pub mod page;
pub mod store;
