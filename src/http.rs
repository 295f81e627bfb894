//! Purpose: REST gateway translating `/api/pages` requests into page service calls.
//! Exports: `router`, `ApiConfig`.
//! Role: One instance per HTTP worker; reaches the page service only through the bus.
//! Invariants: Envelopes are `{"success": bool, ...}`; failures carry `error`.
//! Invariants: Malformed bodies and ids are rejected here and never reach the bus.
//! Invariants: A successful update publishes `{id, client}` on the page-saved address.

use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::bridge::{self, Bridge};
use crate::bus::{DeliveryOptions, EventBus};
use crate::core::error::{Error, ErrorKind};
use crate::markdown;
use crate::page::PageServiceClient;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const BAD_REQUEST_MESSAGE: &str = "Bad request payload";

#[derive(Clone)]
pub struct ApiConfig {
    pub pages: PageServiceClient,
    pub bus: EventBus,
    pub page_saved_address: String,
    pub bridge: Bridge,
}

struct ApiState {
    pages: PageServiceClient,
    bus: EventBus,
    page_saved_address: String,
}

pub fn router(config: ApiConfig) -> Router {
    let state = Arc::new(ApiState {
        pages: config.pages,
        bus: config.bus,
        page_saved_address: config.page_saved_address,
    });

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/pages", get(list_pages).post(create_page))
        .route(
            "/api/pages/:id",
            get(get_page).put(update_page).delete(delete_page),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
        .merge(bridge::router(config.bridge))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Response {
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

async fn list_pages(State(state): State<Arc<ApiState>>) -> Response {
    match state.pages.fetch_all_pages_data().await {
        Ok(pages) => success(StatusCode::OK, Some(("pages", json!(pages)))),
        Err(err) => error_response(err),
    }
}

async fn get_page(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.pages.fetch_page_by_id(id).await {
        Ok(Some(page)) => {
            let html = markdown::render(&page.content);
            let payload = json!({
                "name": page.name,
                "id": page.id,
                "markdown": page.content,
                "html": html,
            });
            success(StatusCode::OK, Some(("page", payload)))
        }
        Ok(None) => error_response(
            Error::new(ErrorKind::NotFound).with_message(format!("There is no page with ID {id}")),
        ),
        Err(err) => error_response(err),
    }
}

async fn create_page(State(state): State<Arc<ApiState>>, body: Bytes) -> Response {
    let page = match parse_page_document(&body, &["name", "markdown"]) {
        Ok(page) => page,
        Err(err) => return error_response(err),
    };
    let name = string_field(&page, "name");
    let markdown = string_field(&page, "markdown");
    match state.pages.create_page(name, markdown).await {
        Ok(()) => success(StatusCode::CREATED, None),
        Err(err) => error_response(err),
    }
}

async fn update_page(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
    body: Bytes,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    let page = match parse_page_document(&body, &["markdown"]) {
        Ok(page) => page,
        Err(err) => return error_response(err),
    };
    let markdown = string_field(&page, "markdown");
    match state.pages.save_page(id, markdown).await {
        Ok(()) => {
            let client = page.get("client").cloned().unwrap_or(Value::Null);
            state.bus.publish(
                &state.page_saved_address,
                json!({ "id": id, "client": client }),
                DeliveryOptions::new(),
            );
            success(StatusCode::OK, None)
        }
        Err(err) => error_response(err),
    }
}

async fn delete_page(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(err) => return error_response(err),
    };
    match state.pages.delete_page(id).await {
        Ok(()) => success(StatusCode::OK, None),
        Err(err) => error_response(err),
    }
}

fn parse_id(raw: &str) -> Result<i64, Error> {
    raw.parse::<i64>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid page id {raw}"))
            .with_source(err)
    })
}

/// Requires a JSON object whose `expected` keys all hold strings.
fn parse_page_document(body: &[u8], expected: &[&str]) -> Result<Map<String, Value>, Error> {
    let document = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            let payload = String::from_utf8_lossy(body);
            tracing::warn!(payload = %payload, "bad page JSON payload");
            return Err(Error::new(ErrorKind::Usage).with_message(BAD_REQUEST_MESSAGE));
        }
    };
    let complete = expected
        .iter()
        .all(|key| document.get(*key).is_some_and(Value::is_string));
    if !complete {
        let payload = Value::Object(document.clone());
        tracing::warn!(payload = %payload, "bad page JSON payload");
        return Err(Error::new(ErrorKind::Usage).with_message(BAD_REQUEST_MESSAGE));
    }
    Ok(document)
}

fn string_field<'a>(document: &'a Map<String, Value>, key: &str) -> &'a str {
    document.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn success(status: StatusCode, field: Option<(&str, Value)>) -> Response {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    if let Some((key, value)) = field {
        body.insert(key.to_string(), value);
    }
    (status, Json(Value::Object(body))).into_response()
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Denied => StatusCode::FORBIDDEN,
        ErrorKind::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Store | ErrorKind::Io | ErrorKind::Internal => {
            tracing::error!(error = %err, "page request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = json!({ "success": false, "error": err.describe() });
    (status, Json(body)).into_response()
}
