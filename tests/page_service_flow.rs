//! Purpose: Library-level flows across the composed app: page proxy, bus, and bridge together.
//! Exports: None (integration test module).
//! Role: Exercise page semantics through the bus exactly as HTTP workers and bridge clients do.
//! Invariants: Each test owns an isolated bus and in-memory database.

use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use wikibus::app::{self, AppHandle};
use wikibus::bridge::{Bridge, FrameOutcome, OutboundFrame};
use wikibus::config::WikiConfig;
use wikibus::page::PageServiceClient;

async fn start_app() -> AppHandle {
    let config = WikiConfig {
        db_url: ":memory:".to_string(),
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..WikiConfig::default()
    };
    app::start(config).await.expect("start app")
}

fn pages(app: &AppHandle) -> PageServiceClient {
    PageServiceClient::new(app.bus().clone(), "wikidb.queue")
}

async fn next_frame(rx: &mut Receiver<OutboundFrame>) -> OutboundFrame {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame in time")
        .expect("channel open")
}

async fn assert_quiet(rx: &mut Receiver<OutboundFrame>) {
    let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(waited.is_err(), "unexpected frame: {waited:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn created_names_are_listed_sorted_case_sensitively() {
    let app = start_app().await;
    let pages = pages(&app);
    for name in ["beta", "Alpha", "alpha", "Beta"] {
        pages.create_page(name, "x").await.expect("create");
    }
    assert_eq!(
        pages.fetch_all_pages().await.expect("names"),
        vec!["Alpha", "Beta", "alpha", "beta"]
    );
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn absent_ids_are_not_found_rather_than_failures() {
    let app = start_app().await;
    let pages = pages(&app);
    for id in [-1, 0, 1, 7, i64::MAX] {
        assert_eq!(pages.fetch_page_by_id(id).await.expect("lookup"), None);
    }
    assert_eq!(pages.fetch_page("nobody").await.expect("lookup"), None);
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn saving_and_deleting_missing_ids_report_success_without_rows() {
    let app = start_app().await;
    let pages = pages(&app);

    pages.save_page(99, "ghost").await.expect("save missing");
    assert_eq!(pages.fetch_page_by_id(99).await.expect("lookup"), None);
    assert!(pages.fetch_all_pages_data().await.expect("list").is_empty());

    pages.create_page("Real", "one").await.expect("create");
    let id = pages.fetch_all_pages_data().await.expect("list")[0].id;
    pages.delete_page(id).await.expect("first delete");
    pages.delete_page(id).await.expect("second delete");
    assert!(pages.fetch_all_pages_data().await.expect("list").is_empty());
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn sample_page_round_trip() {
    let app = start_app().await;
    let pages = pages(&app);

    pages.create_page("Sample", "# A page").await.expect("create");
    let listed = pages.fetch_all_pages_data().await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Sample");
    let listed_json = serde_json::to_value(&listed[0]).expect("json");
    assert!(listed_json.get("markdown").is_none());
    assert!(listed_json.get("content").is_none());

    let id = listed[0].id;
    let page = pages.fetch_page_by_id(id).await.expect("fetch").expect("found");
    assert_eq!(page.content, "# A page");

    let by_name = pages.fetch_page("Sample").await.expect("fetch").expect("found");
    assert_eq!(by_name.id, id);
    assert_eq!(by_name.raw_content, "# A page");

    pages.save_page(id, "Oh Yeah!").await.expect("save");
    let page = pages.fetch_page_by_id(id).await.expect("fetch").expect("found");
    assert_eq!(page.content, "Oh Yeah!");

    pages.delete_page(id).await.expect("delete");
    assert!(pages.fetch_all_pages().await.expect("names").is_empty());
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn bridge_only_reaches_listed_addresses() {
    let app = start_app().await;
    let bridge = Bridge::new(app.bus().clone(), WikiConfig::default().bridge);
    let (mut session, mut frames) = bridge.connect();
    session.open();

    let injection = json!({
        "type": "send",
        "address": "wikidb.queue",
        "headers": { "action": "createPage" },
        "body": { "name": "Injected", "content": "x" },
    });
    assert_eq!(session.handle_text(&injection.to_string()), FrameOutcome::Continue);

    let render = json!({
        "type": "send",
        "address": "app.markdown",
        "replyAddress": "r-1",
        "body": "# Hi",
    });
    assert_eq!(session.handle_text(&render.to_string()), FrameOutcome::Continue);
    match next_frame(&mut frames).await {
        OutboundFrame::Rec { address, body, .. } => {
            assert_eq!(address, "r-1");
            assert_eq!(body, Value::String("<h1>Hi</h1>\n".to_string()));
        }
        other => panic!("unexpected frame {other:?}"),
    }

    let register = json!({ "type": "register", "address": "app.markdown" });
    session.handle_text(&register.to_string());
    app.bus().publish("app.markdown", json!("leak"), Default::default());
    assert_quiet(&mut frames).await;

    assert!(pages(&app).fetch_all_pages().await.expect("names").is_empty());
    drop(session);
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn http_saves_reach_registered_bridge_clients() {
    let app = start_app().await;
    let pages = pages(&app);
    pages.create_page("Live", "v1").await.expect("create");
    let id = pages.fetch_all_pages_data().await.expect("list")[0].id;

    let bridge = Bridge::new(app.bus().clone(), WikiConfig::default().bridge);
    let (mut session, mut frames) = bridge.connect();
    session.open();
    session.handle_text(&json!({ "type": "register", "address": "page.saved" }).to_string());
    assert!(session.is_registered("page.saved"));

    let url = format!("http://{}/api/pages/{id}", app.local_addr());
    let status = tokio::task::spawn_blocking(move || {
        ureq::put(&url)
            .set("Content-Type", "application/json")
            .send_string(&json!({ "markdown": "v2", "client": "tab-7" }).to_string())
            .map(|response| response.status())
    })
    .await
    .expect("join")
    .expect("put");
    assert_eq!(status, 200);

    match next_frame(&mut frames).await {
        OutboundFrame::Rec { address, body, .. } => {
            assert_eq!(address, "page.saved");
            assert_eq!(body, json!({ "id": id, "client": "tab-7" }));
        }
        other => panic!("unexpected frame {other:?}"),
    }
    let page = pages.fetch_page_by_id(id).await.expect("fetch").expect("found");
    assert_eq!(page.content, "v2");

    drop(session);
    app.shutdown().await.expect("shutdown");
}
