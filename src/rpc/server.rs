//! Accept side of the RPC layer.
//!
//! Most stations dial out to the Central System, but the same framing can be
//! served from a listening socket (local controller setups, test harnesses).
//! The handshake extracts the charge point identity from the URL path and
//! validates HTTP Basic credentials through a caller-supplied check before
//! the upgrade completes; a failed check rejects with HTTP 401.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::messages::MessageDispatcher;
use crate::rpc::client::OCPP_SUBPROTOCOL;
use crate::rpc::frame::Frame;
use crate::support::shutdown::ShutdownSignal;

/// Credential check invoked during the WebSocket upgrade.
///
/// Receives `(chargepoint_id, user, password)`; returning `false` rejects
/// the connection with HTTP 401. Connections without an `Authorization`
/// header are checked with empty credentials.
pub type CredentialsCheck = Arc<dyn Fn(&str, &str, &str) -> bool + Send + Sync>;

/// RPC server: accepts OCPP-J WebSocket connections.
pub struct RpcServer {
    bind_addr: String,
    dispatcher: Arc<MessageDispatcher>,
    check_credentials: CredentialsCheck,
    shutdown: ShutdownSignal,
}

impl RpcServer {
    pub fn new(
        bind_addr: impl Into<String>,
        dispatcher: Arc<MessageDispatcher>,
        check_credentials: CredentialsCheck,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            dispatcher,
            check_credentials,
            shutdown,
        }
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(addr = self.bind_addr.as_str(), "RPC server listening");
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let dispatcher = self.dispatcher.clone();
                            let check = self.check_credentials.clone();
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    serve_connection(stream, addr, dispatcher, check, shutdown).await
                                {
                                    warn!(%addr, error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "Accept failed"),
                    }
                }
                _ = self.shutdown.wait() => {
                    info!("RPC server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Last path segment of the request URI is the charge point identity.
fn chargepoint_id_from_path(path: &str) -> Option<String> {
    let id = path.trim_end_matches('/').rsplit('/').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Decode `Authorization: Basic <base64(user:password)>`.
fn decode_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<MessageDispatcher>,
    check_credentials: CredentialsCheck,
    shutdown: ShutdownSignal,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut chargepoint_id: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, mut response: Response| {
            let path = request.uri().path();

            let id = match chargepoint_id_from_path(path) {
                Some(id) => id,
                None => {
                    warn!(%addr, path, "Upgrade without charge point identity");
                    return Err(reject(StatusCode::NOT_FOUND));
                }
            };

            let offered = request
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let supports_ocpp16 = offered
                .split(',')
                .map(str::trim)
                .any(|p| p == OCPP_SUBPROTOCOL);
            if !supports_ocpp16 {
                warn!(%addr, offered, "Peer does not offer ocpp1.6");
                return Err(reject(StatusCode::BAD_REQUEST));
            }

            let (user, password) = request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(decode_basic_auth)
                .unwrap_or_default();
            if !check_credentials(&id, &user, &password) {
                warn!(%addr, chargepoint_id = id.as_str(), "Credential check failed");
                return Err(reject(StatusCode::UNAUTHORIZED));
            }

            response.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                OCPP_SUBPROTOCOL.parse().expect("static header value"),
            );
            chargepoint_id = Some(id);
            Ok(response)
        },
    )
    .await?;

    let chargepoint_id = chargepoint_id.expect("set during accepted handshake");
    info!(%addr, chargepoint_id = chargepoint_id.as_str(), "Peer connected");

    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(frame = text.as_str(), "<-");
                        if let Ok(Frame::Call { message_id, action, payload }) = Frame::parse(&text) {
                            let dispatcher = dispatcher.clone();
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                let reply = match dispatcher.dispatch(&action, payload).await {
                                    Ok(payload) => Frame::result(message_id, payload),
                                    Err(fault) => {
                                        Frame::error(message_id, fault.code, fault.description)
                                    }
                                };
                                let _ = tx.send(Message::Text(reply.to_text()));
                            });
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(%addr, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            _ = shutdown.wait() => {
                let _ = tx.send(Message::Close(None));
                break;
            }
        }
    }

    writer.abort();
    info!(%addr, chargepoint_id = chargepoint_id.as_str(), "Peer disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_identity_from_path() {
        assert_eq!(
            chargepoint_id_from_path("/ocpp/CP001"),
            Some("CP001".to_string())
        );
        assert_eq!(chargepoint_id_from_path("/CP001"), Some("CP001".to_string()));
        assert_eq!(
            chargepoint_id_from_path("/ocpp/CP001/"),
            Some("CP001".to_string())
        );
        assert_eq!(chargepoint_id_from_path("/"), None);
    }

    #[test]
    fn decodes_basic_auth() {
        let header = format!("Basic {}", BASE64.encode("CP001:s3cret"));
        assert_eq!(
            decode_basic_auth(&header),
            Some(("CP001".to_string(), "s3cret".to_string()))
        );
        assert_eq!(decode_basic_auth("Bearer abc"), None);
        assert_eq!(decode_basic_auth("Basic !!!"), None);
    }
}
