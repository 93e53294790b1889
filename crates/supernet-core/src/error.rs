// ── Core error types ──
//
// User-facing errors from supernet-core. Transport details (HTTP bodies,
// frame codec failures) are folded into domain variants by the
// `From<supernet_api::Error>` impl below.

use thiserror::Error;

use crate::model::ErrorData;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Credentials ──────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Connection ───────────────────────────────────────────────────
    #[error("Not connected to the job-dispatch server")]
    NotConnected,

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Disconnected from server ({reason})")]
    Disconnected { code: Option<u16>, reason: String },

    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    // ── Projects ─────────────────────────────────────────────────────
    #[error("Project failed: {0}")]
    ProjectFailed(ErrorData),

    #[error("Project {id} was canceled")]
    ProjectCanceled { id: String },

    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── API errors (wrapped) ─────────────────────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Server `errorCode`, when the error envelope carried one.
        code: Option<i64>,
        status: Option<u16>,
    },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<supernet_api::Error> for CoreError {
    fn from(err: supernet_api::Error) -> Self {
        use supernet_api::Error as E;

        match err {
            E::NotAuthenticated => CoreError::NotAuthenticated,
            E::Renewal(e) => CoreError::AuthenticationFailed {
                message: e.to_string(),
            },
            E::InvalidToken(message) => CoreError::AuthenticationFailed { message },
            E::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout {
                        what: "HTTP response".into(),
                    }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            E::InvalidUrl(e) => CoreError::validation(format!("Invalid URL: {e}")),
            E::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            E::Api {
                status,
                code,
                message,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            E::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            E::WebSocketClosed { code, reason } => CoreError::Disconnected {
                code: Some(code),
                reason,
            },
            E::ConnectionTimeout => CoreError::Timeout {
                what: "socket connection".into(),
            },
            E::ConnectionFailed => CoreError::ConnectionFailed {
                reason: "socket closed before opening".into(),
            },
            E::NotConnected => CoreError::NotConnected,
            E::ReplyTimeout(kind) => CoreError::Timeout {
                what: format!("{kind} reply"),
            },
            E::Frame(message) => CoreError::Internal(format!("Frame error: {message}")),
            E::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
