//! Station-side WebSocket peer.
//!
//! Maintains one connection to the Central System, reconnecting with
//! exponential back-off. Outbound CALLs are correlated to their responses by
//! message id; inbound CALLs are dispatched concurrently on spawned tasks.
//! The connection state is observable through a `watch` channel so the
//! transaction FIFO driver can pause while offline and resume at the head on
//! reconnect.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::messages::MessageDispatcher;
use crate::rpc::frame::{Frame, RpcErrorCode};
use crate::support::errors::RpcError;
use crate::support::shutdown::ShutdownSignal;

/// OCPP 1.6 WebSocket subprotocol.
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Transport configuration for the connection to the Central System.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Central System base URL, e.g. `ws://cs.example.com:9000/ocpp`.
    /// The charge point identity is appended as the last path segment.
    pub central_system_url: String,

    /// Charge point identity used in the connection URL.
    pub chargepoint_id: String,

    /// HTTP Basic credentials, if the Central System requires them.
    pub basic_auth: Option<(String, String)>,

    /// WebSocket PING interval while idle.
    pub ping_interval: Duration,

    /// Default timeout for outbound CALLs.
    pub call_timeout: Duration,

    /// First reconnect delay; doubled on every failed attempt.
    pub reconnect_backoff_min: Duration,

    /// Reconnect delay cap.
    pub reconnect_backoff_max: Duration,
}

impl RpcClientConfig {
    fn connection_url(&self) -> String {
        format!(
            "{}/{}",
            self.central_system_url.trim_end_matches('/'),
            self.chargepoint_id
        )
    }
}

struct PendingCall {
    action: String,
    respond: oneshot::Sender<Result<Value, RpcError>>,
}

/// WebSocket RPC peer (client role).
pub struct RpcClient {
    config: RpcClientConfig,
    dispatcher: Arc<MessageDispatcher>,
    pending: DashMap<String, PendingCall>,
    outbound: std::sync::RwLock<Option<mpsc::UnboundedSender<Message>>>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    call_seq: AtomicU32,
    shutdown: ShutdownSignal,
}

impl RpcClient {
    pub fn new(
        config: RpcClientConfig,
        dispatcher: Arc<MessageDispatcher>,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        let (connected_tx, connected_rx) = watch::channel(false);
        Arc::new(Self {
            config,
            dispatcher,
            pending: DashMap::new(),
            outbound: std::sync::RwLock::new(None),
            connected_tx,
            connected_rx,
            call_seq: AtomicU32::new(1),
            shutdown,
        })
    }

    /// Spawn the connection supervisor: connect, run the session until the
    /// transport fails, back off, reconnect. Runs until shutdown.
    pub fn start(self: &Arc<Self>) {
        let client = self.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if client.shutdown.is_triggered() {
                    break;
                }

                match client.connect_once().await {
                    Ok(()) => {
                        // A session ran and ended; start over promptly.
                        attempt = 0;
                    }
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        warn!(error = %e, attempt, "Connection attempt failed");
                    }
                }

                let delay = client.backoff_delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = client.shutdown.wait() => break,
                }
            }
            info!("RPC client stopped");
        });
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_backoff_min.as_millis() as u64;
        let max = self.config.reconnect_backoff_max.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16)).min(max);
        let jitter = rand::thread_rng().gen_range(0..=base.min(1000));
        Duration::from_millis(exp + jitter)
    }

    async fn connect_once(self: &Arc<Self>) -> Result<(), RpcError> {
        let url = self.config.connection_url();
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(OCPP_SUBPROTOCOL),
        );
        if let Some((user, password)) = &self.config.basic_auth {
            let token = BASE64.encode(format!("{}:{}", user, password));
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Basic {}", token))
                    .map_err(|e| RpcError::Transport(e.to_string()))?,
            );
        }

        info!(url = url.as_str(), "Connecting to central system");
        let (ws_stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if negotiated != Some(OCPP_SUBPROTOCOL) {
            warn!(?negotiated, "Central system did not confirm ocpp1.6 subprotocol");
        }

        self.run_session(ws_stream).await;
        Ok(())
    }

    /// Run one connected session until the socket dies or shutdown fires.
    async fn run_session<S>(self: &Arc<Self>, ws_stream: tokio_tungstenite::WebSocketStream<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        *self.outbound.write().unwrap() = Some(tx.clone());
        let _ = self.connected_tx.send(true);
        info!("Connected to central system");

        // Writer task: drains the outbound queue and keeps the link alive
        // with PINGs while idle.
        let ping_interval = self.config.ping_interval;
        let writer = tokio::spawn(async move {
            let mut ping = tokio::time::interval(ping_interval);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ping.tick().await;
            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(msg) => {
                                if let Err(e) = ws_sink.send(msg).await {
                                    error!(error = %e, "WebSocket send failed");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = ping.tick() => {
                        if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader loop on this task.
        loop {
            tokio::select! {
                msg = ws_source.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text, &tx),
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "Central system closed the connection");
                            break;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            warn!(len = data.len(), "Ignoring binary frame");
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }
                        None => break,
                    }
                }
                _ = self.shutdown.wait() => {
                    let _ = tx.send(Message::Close(None));
                    break;
                }
            }
        }

        writer.abort();
        *self.outbound.write().unwrap() = None;
        let _ = self.connected_tx.send(false);
        self.fail_pending();
        info!("Disconnected from central system");
    }

    fn handle_text(self: &Arc<Self>, text: &str, tx: &mpsc::UnboundedSender<Message>) {
        debug!(frame = text, "<-");
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                return;
            }
        };

        match frame {
            Frame::Call {
                message_id,
                action,
                payload,
            } => {
                // Handlers run concurrently with any outstanding outbound
                // call; responses go back through the same writer queue.
                let client = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = match client.dispatcher.dispatch(&action, payload).await {
                        Ok(payload) => Frame::result(message_id, payload),
                        Err(fault) => Frame::error(message_id, fault.code, fault.description),
                    };
                    let text = reply.to_text();
                    debug!(frame = text.as_str(), "->");
                    let _ = tx.send(Message::Text(text));
                });
            }
            Frame::CallResult {
                message_id,
                payload,
            } => match self.pending.remove(&message_id) {
                Some((_, pending)) => {
                    let _ = pending.respond.send(Ok(payload));
                }
                None => warn!(message_id, "CALLRESULT for unknown message id"),
            },
            Frame::CallError {
                message_id,
                code,
                description,
                ..
            } => match self.pending.remove(&message_id) {
                Some((_, pending)) => {
                    warn!(
                        message_id,
                        action = pending.action.as_str(),
                        code = code.as_str(),
                        description = description.as_str(),
                        "Call failed"
                    );
                    let _ = pending.respond.send(Err(RpcError::Call {
                        code: RpcErrorCode::parse(&code),
                        description,
                    }));
                }
                None => warn!(message_id, "CALLERROR for unknown message id"),
            },
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.respond.send(Err(RpcError::Aborted));
            }
        }
    }

    fn next_message_id(&self) -> String {
        // Unique per outgoing CALL: a process-local sequence plus a random
        // component so ids never collide across restarts.
        let seq = self.call_seq.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", seq, Uuid::new_v4().simple())
    }

    /// Issue an outbound CALL with the default timeout.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, RpcError> {
        self.call_with_timeout(action, payload, self.config.call_timeout)
            .await
    }

    /// Issue an outbound CALL, waiting up to `timeout` for the response.
    pub async fn call_with_timeout(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let sender = self
            .outbound
            .read()
            .unwrap()
            .clone()
            .ok_or(RpcError::NotConnected)?;

        let message_id = self.next_message_id();
        let frame = Frame::call(message_id.clone(), action, payload);

        let (respond, rx) = oneshot::channel();
        self.pending.insert(
            message_id.clone(),
            PendingCall {
                action: action.to_string(),
                respond,
            },
        );

        let text = frame.to_text();
        debug!(frame = text.as_str(), "->");
        if sender.send(Message::Text(text)).is_err() {
            self.pending.remove(&message_id);
            return Err(RpcError::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.remove(&message_id);
                Err(RpcError::Aborted)
            }
            Err(_) => {
                self.pending.remove(&message_id);
                warn!(action, message_id, "Call timed out");
                Err(RpcError::Timeout)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Observe connection state changes.
    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    pub fn chargepoint_id(&self) -> &str {
        &self.config.chargepoint_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RpcClientConfig {
        RpcClientConfig {
            central_system_url: "ws://127.0.0.1:19997/ocpp".into(),
            chargepoint_id: "CP-TEST".into(),
            basic_auth: None,
            ping_interval: Duration::from_secs(30),
            call_timeout: Duration::from_millis(100),
            reconnect_backoff_min: Duration::from_millis(10),
            reconnect_backoff_max: Duration::from_millis(100),
        }
    }

    #[test]
    fn connection_url_appends_identity() {
        let config = test_config();
        assert_eq!(config.connection_url(), "ws://127.0.0.1:19997/ocpp/CP-TEST");

        let config = RpcClientConfig {
            central_system_url: "ws://host/base/".into(),
            ..test_config()
        };
        assert_eq!(config.connection_url(), "ws://host/base/CP-TEST");
    }

    #[tokio::test]
    async fn call_while_disconnected_fails_fast() {
        let client = RpcClient::new(
            test_config(),
            Arc::new(MessageDispatcher::new()),
            ShutdownSignal::new(),
        );
        let err = client
            .call("Heartbeat", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotConnected));
    }

    #[test]
    fn message_ids_are_unique() {
        let client = RpcClient::new(
            test_config(),
            Arc::new(MessageDispatcher::new()),
            ShutdownSignal::new(),
        );
        let a = client.next_message_id();
        let b = client.next_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let client = RpcClient::new(
            test_config(),
            Arc::new(MessageDispatcher::new()),
            ShutdownSignal::new(),
        );
        let early = client.backoff_delay(1);
        let late = client.backoff_delay(20);
        assert!(late >= early);
        assert!(late <= Duration::from_millis(100 + 1000));
    }
}
