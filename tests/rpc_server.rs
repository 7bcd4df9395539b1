//! Accept-side RPC tests: credential gate and inbound dispatch.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use ocpp_station::messages::MessageDispatcher;
use ocpp_station::rpc::server::RpcServer;
use ocpp_station::ShutdownSignal;

async fn spawn_server() -> (std::net::SocketAddr, ShutdownSignal) {
    ocpp_station::support::logging::try_init("warn");

    let dispatcher = Arc::new(MessageDispatcher::new());
    dispatcher
        .register_typed("Heartbeat", |_request: serde_json::Value| async move {
            Ok(json!({ "currentTime": chrono::Utc::now().to_rfc3339() }))
        })
        .unwrap();

    let shutdown = ShutdownSignal::new();
    let check: ocpp_station::rpc::server::CredentialsCheck =
        Arc::new(|chargepoint_id, user, password| {
            chargepoint_id == "CP001" && user == "CP001" && password == "s3cret"
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RpcServer::new(addr.to_string(), dispatcher, check, shutdown.clone());
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    (addr, shutdown)
}

fn request_for(addr: std::net::SocketAddr, path: &str, password: Option<&str>) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = format!("ws://{}{}", addr, path).into_client_request().unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("ocpp1.6"),
    );
    if let Some(password) = password {
        let token = BASE64.encode(format!("CP001:{}", password));
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
        );
    }
    request
}

#[tokio::test]
async fn valid_credentials_upgrade_and_dispatch() {
    let (addr, shutdown) = spawn_server().await;

    let request = request_for(addr, "/ocpp/CP001", Some("s3cret"));
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    ws.send(Message::Text(r#"[2,"77","Heartbeat",{}]"#.into()))
        .await
        .unwrap();

    // Skip any non-text frames; the CALLRESULT must echo our message id.
    loop {
        let message = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = message {
            let frame: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
            assert_eq!(frame[0], 3);
            assert_eq!(frame[1], "77");
            assert!(frame[2]["currentTime"].is_string());
            break;
        }
    }

    shutdown.trigger();
}

#[tokio::test]
async fn wrong_password_is_rejected_with_401() {
    let (addr, shutdown) = spawn_server().await;

    let request = request_for(addr, "/ocpp/CP001", Some("wrong"));
    let error = tokio_tungstenite::connect_async(request).await.unwrap_err();
    assert!(error.to_string().contains("401"), "got: {}", error);

    shutdown.trigger();
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let (addr, shutdown) = spawn_server().await;

    let request = request_for(addr, "/ocpp/CP001", None);
    let error = tokio_tungstenite::connect_async(request).await.unwrap_err();
    assert!(error.to_string().contains("401"), "got: {}", error);

    shutdown.trigger();
}

#[tokio::test]
async fn unknown_action_yields_not_implemented() {
    let (addr, shutdown) = spawn_server().await;

    let request = request_for(addr, "/ocpp/CP001", Some("s3cret"));
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    ws.send(Message::Text(r#"[2,"1","NoSuchAction",{}]"#.into()))
        .await
        .unwrap();

    loop {
        let message = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = message {
            let frame: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
            assert_eq!(frame[0], 4);
            assert_eq!(frame[1], "1");
            assert_eq!(frame[2], "NotImplemented");
            break;
        }
    }

    shutdown.trigger();
}
