//! Purpose: Wiki page CRUD service, its bus handler, and the typed client proxy.
//! Exports: `PageService`, `PageServiceClient`, `register`, page record types, `Action`.
//! Role: Domain layer between the gateway/bridge and the store engine.
//! Invariants: Every operation crosses the bus as one request with an `action` header.
//! Invariants: Absence is a typed `None`, never a failure.
//! Invariants: Wire shapes (`found`, `rawContent`) are shared by handler and client.

mod client;
mod handler;
mod service;

pub use client::PageServiceClient;
pub use handler::register;
pub use service::PageService;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_ADDRESS: &str = "wikidb.queue";
pub const ACTION_HEADER: &str = "action";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    FetchAllPages,
    FetchAllPagesData,
    FetchPage,
    FetchPageById,
    CreatePage,
    SavePage,
    DeletePage,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::FetchAllPages => "fetchAllPages",
            Action::FetchAllPagesData => "fetchAllPagesData",
            Action::FetchPage => "fetchPage",
            Action::FetchPageById => "fetchPageById",
            Action::CreatePage => "createPage",
            Action::SavePage => "savePage",
            Action::DeletePage => "deletePage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fetchAllPages" => Some(Action::FetchAllPages),
            "fetchAllPagesData" => Some(Action::FetchAllPagesData),
            "fetchPage" => Some(Action::FetchPage),
            "fetchPageById" => Some(Action::FetchPageById),
            "createPage" => Some(Action::CreatePage),
            "savePage" => Some(Action::SavePage),
            "deletePage" => Some(Action::DeletePage),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageByName {
    pub id: i64,
    #[serde(rename = "rawContent")]
    pub raw_content: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdParams {
    id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateParams {
    name: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SaveParams {
    id: i64,
    content: String,
}

fn found_json<T: Serialize>(value: Option<T>) -> Result<Value, Error> {
    let Some(value) = value else {
        return Ok(json!({ "found": false }));
    };
    let mut encoded = to_json(value)?;
    if let Value::Object(map) = &mut encoded {
        map.insert("found".to_string(), Value::Bool(true));
    }
    Ok(encoded)
}

fn from_found_json<T: DeserializeOwned>(value: Value) -> Result<Option<T>, Error> {
    if value.get("found").and_then(Value::as_bool) == Some(true) {
        decode_reply(value).map(Some)
    } else {
        Ok(None)
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode page payload")
            .with_source(err)
    })
}

fn decode_params<T: DeserializeOwned>(action: Action, value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid parameters for {}", action.as_str()))
            .with_source(err)
    })
}

fn decode_reply<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("malformed page service reply")
            .with_source(err)
    })
}
