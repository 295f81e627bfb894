//! Purpose: Composition-time configuration for the wiki service.
//! Exports: `WikiConfig`, defaults for every setting.
//! Role: Loaded once from an optional JSON file, then overridden by CLI flags.
//! Invariants: Nothing here is renegotiated after startup.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::bridge::{BridgeOptions, PermittedOptions};
use crate::core::error::{Error, ErrorKind};
use crate::store::{DEFAULT_MAX_POOL_SIZE, SqlQueries, StoreConfig};
use crate::{markdown, page};

pub const DEFAULT_HTTP_INSTANCES: usize = 2;
pub const DEFAULT_DB_URL: &str = "wiki.db";
pub const PAGE_SAVED_ADDRESS: &str = "page.saved";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WikiConfig {
    pub db_url: String,
    pub max_pool_size: usize,
    pub acquire_timeout_ms: u64,
    pub bind: SocketAddr,
    pub http_instances: usize,
    pub wikidb_queue: String,
    pub markdown_address: String,
    pub page_saved_address: String,
    pub bridge: BridgeOptions,
    pub sql_queries: SqlQueries,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_string(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            acquire_timeout_ms: 5_000,
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            http_instances: DEFAULT_HTTP_INSTANCES,
            wikidb_queue: page::DEFAULT_ADDRESS.to_string(),
            markdown_address: markdown::DEFAULT_ADDRESS.to_string(),
            page_saved_address: PAGE_SAVED_ADDRESS.to_string(),
            bridge: BridgeOptions::new()
                .add_inbound_permitted(PermittedOptions::new(markdown::DEFAULT_ADDRESS))
                .add_outbound_permitted(PermittedOptions::new(PAGE_SAVED_ADDRESS)),
            sql_queries: SqlQueries::default(),
        }
    }
}

impl WikiConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read config {}", path.display()))
                .with_source(err)
        })?;
        serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid config {}", path.display()))
                .with_source(err)
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_pool_size == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("max_pool_size must be greater than zero")
                .with_hint("Use a positive value like 30."));
        }
        if self.http_instances == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("http_instances must be greater than zero")
                .with_hint("Use a positive value like 2."));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("acquire_timeout_ms must be greater than zero")
                .with_hint("Use a positive value like 5000."));
        }
        if self.wikidb_queue.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("wikidb_queue must not be empty"));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.db_url.clone())
            .with_max_pool_size(self.max_pool_size)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .with_queries(self.sql_queries.clone())
    }
}
