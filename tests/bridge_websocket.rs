//! Purpose: End-to-end tests for the event-bus bridge over a real WebSocket.
//! Exports: None (integration test module).
//! Role: Validate wire framing, replies, forwarding, and teardown on `/eventbus/websocket`.
//! Invariants: Each test runs its own app on an ephemeral loopback port.
//! Invariants: Bounded waits avoid test flakiness.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use wikibus::app::{self, AppHandle};
use wikibus::bridge::{BridgeOptions, PermittedOptions};
use wikibus::bus::{EventBus, ServiceRegistration};
use wikibus::config::WikiConfig;
use wikibus::page::PageServiceClient;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_app(bridge: BridgeOptions) -> AppHandle {
    let config = WikiConfig {
        db_url: ":memory:".to_string(),
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        bridge,
        ..WikiConfig::default()
    };
    app::start(config).await.expect("start app")
}

async fn connect(app: &AppHandle) -> Socket {
    let url = format!("ws://{}/eventbus/websocket", app.local_addr());
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect");
    socket
}

async fn send_frame(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .expect("send frame");
}

/// Next JSON frame, or `None` once the server closes the socket.
async fn next_frame(socket: &mut Socket) -> Option<Value> {
    loop {
        let incoming = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("frame in time");
        match incoming {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(&text).expect("json frame"));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(other)) => panic!("unexpected message {other:?}"),
        }
    }
}

async fn wait_for_handlers(bus: &EventBus, address: &str, expected: usize) {
    for _ in 0..200 {
        if bus.handler_count(address) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(bus.handler_count(address), expected, "{address}");
}

#[tokio::test(flavor = "multi_thread")]
async fn markdown_request_gets_rendered_reply() {
    let app = start_app(WikiConfig::default().bridge).await;
    let mut socket = connect(&app).await;

    send_frame(
        &mut socket,
        json!({ "type": "send", "address": "app.markdown", "replyAddress": "r-1", "body": "# Hi" }),
    )
    .await;
    let frame = next_frame(&mut socket).await.expect("reply");
    assert_eq!(
        frame,
        json!({ "type": "rec", "address": "r-1", "body": "<h1>Hi</h1>\n" })
    );

    send_frame(
        &mut socket,
        json!({ "type": "send", "address": "wikidb.queue", "replyAddress": "r-2", "body": {} }),
    )
    .await;
    let frame = next_frame(&mut socket).await.expect("denial");
    assert_eq!(frame["type"], "err");
    assert_eq!(frame["address"], "r-2");
    assert_eq!(frame["body"], "access_denied");

    let _ = socket.close(None).await;
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn page_saves_reach_socket_and_disconnect_unregisters() {
    let app = start_app(WikiConfig::default().bridge).await;
    let pages = PageServiceClient::new(app.bus().clone(), "wikidb.queue");
    pages.create_page("Live", "v1").await.expect("create");
    let id = pages.fetch_all_pages_data().await.expect("list")[0].id;

    let mut socket = connect(&app).await;
    send_frame(&mut socket, json!({ "type": "register", "address": "page.saved" })).await;
    wait_for_handlers(app.bus(), "page.saved", 1).await;

    let url = format!("http://{}/api/pages/{id}", app.local_addr());
    let status = tokio::task::spawn_blocking(move || {
        ureq::put(&url)
            .set("Content-Type", "application/json")
            .send_string(&json!({ "markdown": "v2", "client": "tab-3" }).to_string())
            .map(|response| response.status())
    })
    .await
    .expect("join")
    .expect("put");
    assert_eq!(status, 200);

    let frame = next_frame(&mut socket).await.expect("publish");
    assert_eq!(
        frame,
        json!({ "type": "rec", "address": "page.saved", "body": { "id": id, "client": "tab-3" } })
    );

    socket.close(None).await.expect("close");
    wait_for_handlers(app.bus(), "page.saved", 0).await;
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_frame_closes_connection() {
    let app = start_app(WikiConfig::default().bridge).await;
    let mut socket = connect(&app).await;
    send_frame(&mut socket, json!({ "type": "register", "address": "page.saved" })).await;
    wait_for_handlers(app.bus(), "page.saved", 1).await;

    socket
        .send(Message::Text("{not json".to_string()))
        .await
        .expect("send");
    assert!(next_frame(&mut socket).await.is_none());
    wait_for_handlers(app.bus(), "page.saved", 0).await;
    app.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_reply_is_flushed_before_close() {
    let bridge = WikiConfig::default()
        .bridge
        .add_inbound_permitted(PermittedOptions::new("slow.echo"));
    let app = start_app(bridge).await;
    let _echo = ServiceRegistration::spawn(app.bus().consumer("slow.echo"), |mut message| {
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let body = message.take_body();
            message.reply(body);
        }
    });

    let mut socket = connect(&app).await;
    send_frame(
        &mut socket,
        json!({ "type": "send", "address": "slow.echo", "replyAddress": "r-7", "body": "late" }),
    )
    .await;
    socket
        .send(Message::Text("{not json".to_string()))
        .await
        .expect("send");

    let frame = next_frame(&mut socket).await.expect("reply survives close");
    assert_eq!(frame, json!({ "type": "rec", "address": "r-7", "body": "late" }));
    assert!(next_frame(&mut socket).await.is_none());
    app.shutdown().await.expect("shutdown");
}
