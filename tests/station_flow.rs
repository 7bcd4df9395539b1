//! End-to-end flows against a mock Central System.
//!
//! The mock accepts one WebSocket connection, answers every inbound CALL by
//! action, records what it saw, and can fire its own CALLs at the station.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_ocpp::v1_6::types::{AuthorizationStatus, ChargePointStatus, Measurand, MeterValue};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use ocpp_station::chargepoint::events::ChargePointEventsHandler;
use ocpp_station::{ChargePoint, StackConfig};

// ── Test events handler ────────────────────────────────────────

struct StubEvents;

#[async_trait]
impl ChargePointEventsHandler for StubEvents {
    async fn get_meter_value(
        &self,
        _connector_id: u32,
        _measurand: &Measurand,
    ) -> Option<MeterValue> {
        None
    }

    async fn get_tx_start_stop_meter_value(&self, _connector_id: u32) -> i32 {
        1234
    }
}

// ── Mock Central System ────────────────────────────────────────

#[derive(Default)]
struct MockLog {
    /// Actions received as CALLs, in order.
    calls: Vec<(String, Value)>,
    /// Responses to CALLs the mock itself sent.
    replies: Vec<Value>,
}

struct MockCentralSystem;

impl MockCentralSystem {
    /// Serve one station connection on `listener`.
    fn spawn(listener: TcpListener, outbound_calls: Vec<(String, Value)>) -> Arc<Mutex<MockLog>> {
        let log = Arc::new(Mutex::new(MockLog::default()));
        let shared = log.clone();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut sink, mut source) = ws.split();

            let mut pending_outbound = outbound_calls.into_iter();
            let mut started = false;

            while let Some(Ok(message)) = source.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let frame: Vec<Value> = serde_json::from_str(&text).unwrap();
                match frame[0].as_u64() {
                    Some(2) => {
                        let message_id = frame[1].as_str().unwrap().to_string();
                        let action = frame[2].as_str().unwrap().to_string();
                        let payload = frame.get(3).cloned().unwrap_or(Value::Null);
                        let reply = respond_to(&action, &payload);
                        shared.lock().await.calls.push((action.clone(), payload));
                        let response = json!([3, message_id, reply]);
                        if sink.send(Message::Text(response.to_string())).await.is_err() {
                            break;
                        }

                        // After the boot handshake, fire our own calls.
                        if action == "BootNotification" && !started {
                            started = true;
                            for (i, (action, payload)) in pending_outbound.by_ref().enumerate() {
                                let call = json!([2, format!("cs-{}", i), action, payload]);
                                let _ = sink.send(Message::Text(call.to_string())).await;
                            }
                        }
                    }
                    Some(3) | Some(4) => {
                        shared
                            .lock()
                            .await
                            .replies
                            .push(serde_json::from_str(&text).unwrap());
                    }
                    _ => {}
                }
            }
        });

        log
    }
}

fn respond_to(action: &str, _payload: &Value) -> Value {
    match action {
        "BootNotification" => json!({
            "status": "Accepted",
            "currentTime": chrono::Utc::now().to_rfc3339(),
            "interval": 300,
        }),
        "Heartbeat" => json!({ "currentTime": chrono::Utc::now().to_rfc3339() }),
        "Authorize" => json!({ "idTagInfo": { "status": "Accepted" } }),
        "StartTransaction" => json!({
            "transactionId": 42,
            "idTagInfo": { "status": "Accepted" },
        }),
        "StopTransaction" => json!({ "idTagInfo": { "status": "Accepted" } }),
        _ => json!({}),
    }
}

// ── Helpers ────────────────────────────────────────────────────

async fn reserve_addr() -> SocketAddr {
    ocpp_station::support::logging::try_init("warn");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn station_config(addr: SocketAddr) -> StackConfig {
    let mut config = StackConfig::default();
    config.station.chargepoint_id = "CP-IT".into();
    config.station.connector_count = 2;
    config.central_system.url = format!("ws://{}/ocpp", addr);
    config.central_system.reconnect_backoff_min_secs = 1;
    config.central_system.reconnect_backoff_max_secs = 1;
    config.central_system.call_timeout_secs = 5;
    config.database.path = ":memory:".into();
    config
}

async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ── Scenarios ──────────────────────────────────────────────────

/// Offline swipe: the transaction starts locally, the StartTransaction is
/// queued, and settles with the Central System's transaction id once the
/// connection comes up.
#[tokio::test]
async fn offline_start_settles_on_connect() {
    let addr = reserve_addr().await;
    let station = ChargePoint::new(station_config(addr), Arc::new(StubEvents))
        .await
        .unwrap();

    // Offline policy: accept unknown tags while disconnected.
    station
        .ocpp_config()
        .set_from_central("AllowOfflineTxForUnknownId", "true")
        .await;

    station.start();

    // Swipe while disconnected.
    let verdict = station.start_transaction(1, "ABC").await.unwrap();
    assert_eq!(verdict, AuthorizationStatus::Accepted);
    assert_eq!(
        station.connector_status(1).await,
        Some(ChargePointStatus::Charging)
    );
    assert_eq!(station.pending_transaction_messages().await, 1);
    assert_eq!(station.current_transaction_id(1).await, None);

    // Central System comes up; the station reconnects, boots and drains.
    let listener = TcpListener::bind(addr).await.unwrap();
    let log = MockCentralSystem::spawn(listener, Vec::new());

    wait_until("FIFO drained", || async {
        station.pending_transaction_messages().await == 0
    })
    .await;
    wait_until("transaction id assigned", || async {
        station.current_transaction_id(1).await == Some(42)
    })
    .await;

    let calls = log.lock().await;
    let actions: Vec<&str> = calls.calls.iter().map(|(a, _)| a.as_str()).collect();
    assert!(actions.contains(&"BootNotification"));
    assert!(actions.contains(&"StartTransaction"));
    let start = calls
        .calls
        .iter()
        .find(|(a, _)| a == "StartTransaction")
        .unwrap();
    assert_eq!(start.1["connectorId"], 1);
    assert_eq!(start.1["idTag"], "ABC");
    assert_eq!(start.1["meterStart"], 1234);

    station.stop();
}

/// A TriggerMessage for a connector the station does not have must be
/// answered with a PropertyConstraintViolation CALLERROR.
#[tokio::test]
async fn trigger_on_invalid_connector_is_a_call_error() {
    let addr = reserve_addr().await;
    let listener = TcpListener::bind(addr).await.unwrap();
    let log = MockCentralSystem::spawn(
        listener,
        vec![(
            "TriggerMessage".to_string(),
            json!({ "requestedMessage": "MeterValues", "connectorId": 99 }),
        )],
    );

    let station = ChargePoint::new(station_config(addr), Arc::new(StubEvents))
        .await
        .unwrap();
    station.start();

    wait_until("trigger answered", || async {
        !log.lock().await.replies.is_empty()
    })
    .await;

    let replies = log.lock().await;
    let reply = &replies.replies[0];
    assert_eq!(reply[0], 4, "expected a CALLERROR frame");
    assert_eq!(reply[1], "cs-0", "message id echoed verbatim");
    assert_eq!(reply[2], "PropertyConstraintViolation");

    station.stop();
}

/// Full online lifecycle: authorize through the Central System, charge,
/// stop; the station emits Start and Stop through the queue in order.
#[tokio::test]
async fn online_lifecycle_start_then_stop() {
    let addr = reserve_addr().await;
    let listener = TcpListener::bind(addr).await.unwrap();
    let log = MockCentralSystem::spawn(listener, Vec::new());

    let station = ChargePoint::new(station_config(addr), Arc::new(StubEvents))
        .await
        .unwrap();
    station.start();

    wait_until("registered", || async { station.is_registered() }).await;

    let verdict = station.start_transaction(1, "TAG-1").await.unwrap();
    assert_eq!(verdict, AuthorizationStatus::Accepted);

    wait_until("transaction id assigned", || async {
        station.current_transaction_id(1).await == Some(42)
    })
    .await;

    assert!(station.stop_transaction(1, None).await.unwrap());
    wait_until("FIFO drained", || async {
        station.pending_transaction_messages().await == 0
    })
    .await;

    let calls = log.lock().await;
    let actions: Vec<&str> = calls.calls.iter().map(|(a, _)| a.as_str()).collect();
    let start_pos = actions.iter().position(|a| *a == "StartTransaction").unwrap();
    let stop_pos = actions.iter().position(|a| *a == "StopTransaction").unwrap();
    assert!(start_pos < stop_pos, "Start must precede Stop");

    let stop = &calls.calls[stop_pos].1;
    assert_eq!(stop["transactionId"], 42);
    assert_eq!(stop["meterStop"], 1234);

    // A second swipe on the same connector while charging was refused
    // earlier; after the stop the connector can charge again.
    assert_eq!(
        station.connector_status(1).await,
        Some(ChargePointStatus::Finishing)
    );

    station.stop();
}

/// Concurrent swipes on one connector: the second is refused.
#[tokio::test]
async fn second_swipe_is_concurrent_tx() {
    let addr = reserve_addr().await;
    let station = ChargePoint::new(station_config(addr), Arc::new(StubEvents))
        .await
        .unwrap();
    station
        .ocpp_config()
        .set_from_central("AllowOfflineTxForUnknownId", "true")
        .await;
    station.start();

    assert_eq!(
        station.start_transaction(1, "A").await.unwrap(),
        AuthorizationStatus::Accepted
    );
    assert_eq!(
        station.start_transaction(1, "B").await.unwrap(),
        AuthorizationStatus::ConcurrentTx
    );

    station.stop();
}
