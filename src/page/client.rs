// Typed proxy: one method per page operation, each a bus request to `address`.
use serde_json::Value;
use std::time::Duration;

use super::{
    ACTION_HEADER, Action, CreateParams, IdParams, NameParams, Page, PageByName, PageSummary,
    SaveParams, decode_reply, from_found_json, to_json,
};
use crate::bus::{DeliveryOptions, EventBus};
use crate::core::error::Error;

#[derive(Clone)]
pub struct PageServiceClient {
    bus: EventBus,
    address: String,
    timeout: Option<Duration>,
}

impl PageServiceClient {
    pub fn new(bus: EventBus, address: impl Into<String>) -> Self {
        Self {
            bus,
            address: address.into(),
            timeout: None,
        }
    }

    /// Caller-side reply timeout. The request itself is not revoked.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn fetch_all_pages(&self) -> Result<Vec<String>, Error> {
        decode_reply(self.call(Action::FetchAllPages, Value::Null).await?)
    }

    pub async fn fetch_all_pages_data(&self) -> Result<Vec<PageSummary>, Error> {
        decode_reply(self.call(Action::FetchAllPagesData, Value::Null).await?)
    }

    pub async fn fetch_page(&self, name: &str) -> Result<Option<PageByName>, Error> {
        let params = to_json(NameParams {
            name: name.to_string(),
        })?;
        from_found_json(self.call(Action::FetchPage, params).await?)
    }

    pub async fn fetch_page_by_id(&self, id: i64) -> Result<Option<Page>, Error> {
        let params = to_json(IdParams { id })?;
        from_found_json(self.call(Action::FetchPageById, params).await?)
    }

    pub async fn create_page(&self, name: &str, content: &str) -> Result<(), Error> {
        let params = to_json(CreateParams {
            name: name.to_string(),
            content: content.to_string(),
        })?;
        self.call(Action::CreatePage, params).await?;
        Ok(())
    }

    pub async fn save_page(&self, id: i64, content: &str) -> Result<(), Error> {
        let params = to_json(SaveParams {
            id,
            content: content.to_string(),
        })?;
        self.call(Action::SavePage, params).await?;
        Ok(())
    }

    pub async fn delete_page(&self, id: i64) -> Result<(), Error> {
        let params = to_json(IdParams { id })?;
        self.call(Action::DeletePage, params).await?;
        Ok(())
    }

    async fn call(&self, action: Action, body: Value) -> Result<Value, Error> {
        let mut options = DeliveryOptions::new().with_header(ACTION_HEADER, action.as_str());
        if let Some(timeout) = self.timeout {
            options = options.with_timeout(timeout);
        }
        self.bus
            .request(&self.address, body, options)
            .await
            .map_err(|failure| failure.into_error(&self.address))
    }
}
