//! OCPP-J wire framing.
//!
//! Every message on the socket is a JSON array:
//!
//! - CALL       `[2, "<messageId>", "<action>", {<payload>}]`
//! - CALLRESULT `[3, "<messageId>", {<payload>}]`
//! - CALLERROR  `[4, "<messageId>", "<code>", "<description>", {<details>}]`
//!
//! The message id is an opaque string chosen by the sender of a CALL and
//! echoed verbatim by the responder.

use std::fmt;

use serde_json::Value;

const CALL: u64 = 2;
const CALL_RESULT: u64 = 3;
const CALL_ERROR: u64 = 4;

/// RPC error codes defined by OCPP-J 1.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl RpcErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }

    /// Parse a code received from the peer. Unknown codes map to
    /// `GenericError` so a creative Central System cannot wedge the station.
    pub fn parse(code: &str) -> Self {
        match code {
            "NotImplemented" => Self::NotImplemented,
            "NotSupported" => Self::NotSupported,
            "InternalError" => Self::InternalError,
            "ProtocolError" => Self::ProtocolError,
            "SecurityError" => Self::SecurityError,
            "FormationViolation" => Self::FormationViolation,
            "PropertyConstraintViolation" => Self::PropertyConstraintViolation,
            "OccurenceConstraintViolation" => Self::OccurenceConstraintViolation,
            "TypeConstraintViolation" => Self::TypeConstraintViolation,
            _ => Self::GenericError,
        }
    }

    /// Whether a CALLERROR with this code is worth retrying.
    ///
    /// Schema and constraint violations will fail identically on resend;
    /// only server-side transient failures are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InternalError | Self::GenericError)
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call {
        message_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        message_id: String,
        payload: Value,
    },
    CallError {
        message_id: String,
        code: String,
        description: String,
        details: Value,
    },
}

impl Frame {
    /// Build a CALL frame.
    pub fn call(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Build a CALLRESULT answering `message_id`.
    pub fn result(message_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Build a CALLERROR answering `message_id`.
    pub fn error(
        message_id: impl Into<String>,
        code: RpcErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            message_id: message_id.into(),
            code: code.as_str().to_string(),
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Call { message_id, .. }
            | Self::CallResult { message_id, .. }
            | Self::CallError { message_id, .. } => message_id,
        }
    }

    /// Parse a raw text message into a frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let array: Vec<Value> =
            serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;

        let message_type = array
            .first()
            .and_then(Value::as_u64)
            .ok_or(FrameError::MissingMessageType)?;

        let message_id = array
            .get(1)
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingMessageId)?
            .to_string();

        match message_type {
            CALL => {
                let action = array
                    .get(2)
                    .and_then(Value::as_str)
                    .ok_or(FrameError::MissingAction)?
                    .to_string();
                let payload = array.get(3).cloned().unwrap_or(Value::Null);
                Ok(Self::Call {
                    message_id,
                    action,
                    payload,
                })
            }
            CALL_RESULT => {
                let payload = array
                    .get(2)
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                Ok(Self::CallResult {
                    message_id,
                    payload,
                })
            }
            CALL_ERROR => {
                let code = array
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or("GenericError")
                    .to_string();
                let description = array
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let details = array
                    .get(4)
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                Ok(Self::CallError {
                    message_id,
                    code,
                    description,
                    details,
                })
            }
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Serialize to the wire representation.
    pub fn to_text(&self) -> String {
        let array = match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => serde_json::json!([CALL, message_id, action, payload]),
            Self::CallResult {
                message_id,
                payload,
            } => serde_json::json!([CALL_RESULT, message_id, payload]),
            Self::CallError {
                message_id,
                code,
                description,
                details,
            } => serde_json::json!([CALL_ERROR, message_id, code, description, details]),
        };
        array.to_string()
    }
}

/// Frame parse failures.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("missing or non-numeric message type")]
    MissingMessageType,

    #[error("missing or non-string message id")]
    MissingMessageId,

    #[error("missing or non-string action")]
    MissingAction,

    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"19223201","Authorize",{"idTag":"ABC1234"}]"#;
        match Frame::parse(text).unwrap() {
            Frame::Call {
                message_id,
                action,
                payload,
            } => {
                assert_eq!(message_id, "19223201");
                assert_eq!(action, "Authorize");
                assert_eq!(payload["idTag"], "ABC1234");
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"19223201",{"idTagInfo":{"status":"Accepted"}}]"#;
        match Frame::parse(text).unwrap() {
            Frame::CallResult {
                message_id,
                payload,
            } => {
                assert_eq!(message_id, "19223201");
                assert_eq!(payload["idTagInfo"]["status"], "Accepted");
            }
            other => panic!("expected CallResult, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"x7","NotImplemented","no such action",{}]"#;
        match Frame::parse(text).unwrap() {
            Frame::CallError {
                message_id,
                code,
                description,
                ..
            } => {
                assert_eq!(message_id, "x7");
                assert_eq!(code, "NotImplemented");
                assert_eq!(description, "no such action");
            }
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_preserves_message_id() {
        let frame = Frame::call("m-42", "Heartbeat", serde_json::json!({}));
        let parsed = Frame::parse(&frame.to_text()).unwrap();
        assert_eq!(parsed.message_id(), "m-42");
    }

    #[test]
    fn error_frame_serializes_code() {
        let frame = Frame::error("1", RpcErrorCode::PropertyConstraintViolation, "bad id");
        let text = frame.to_text();
        assert!(text.contains("PropertyConstraintViolation"));
        assert!(text.starts_with("[4,"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Frame::parse("not json"),
            Err(FrameError::Json(_))
        ));
        assert_eq!(
            Frame::parse(r#"[9,"id"]"#),
            Err(FrameError::UnknownMessageType(9))
        );
        assert_eq!(Frame::parse(r#"[2,42]"#), Err(FrameError::MissingMessageId));
        assert_eq!(
            Frame::parse(r#"[2,"id"]"#),
            Err(FrameError::MissingAction)
        );
    }

    #[test]
    fn unknown_error_code_maps_to_generic() {
        assert_eq!(RpcErrorCode::parse("Whatever"), RpcErrorCode::GenericError);
        assert_eq!(
            RpcErrorCode::parse("FormationViolation"),
            RpcErrorCode::FormationViolation
        );
    }

    #[test]
    fn retryable_codes() {
        assert!(RpcErrorCode::InternalError.is_retryable());
        assert!(RpcErrorCode::GenericError.is_retryable());
        assert!(!RpcErrorCode::TypeConstraintViolation.is_retryable());
        assert!(!RpcErrorCode::NotImplemented.is_retryable());
    }
}
