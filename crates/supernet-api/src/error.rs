use thiserror::Error;

/// Why a token renewal failed.
///
/// Cloneable so that every caller awaiting the same in-flight renewal
/// receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    /// The refresh token itself is past its expiry. Never retried.
    #[error("Refresh token expired")]
    RefreshTokenExpired,

    /// No refresh token is installed.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The refresh endpoint answered with an error envelope.
    #[error("Token refresh rejected (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// The refresh endpoint returned a body that could not be parsed.
    #[error("Failed to parse token refresh response: {0}")]
    MalformedResponse(String),

    /// The refresh request never completed.
    #[error("Token refresh transport error: {0}")]
    Transport(String),

    /// The server issued a token we could not decode.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Top-level error type for the `supernet-api` crate.
///
/// Covers credentials, REST, the push socket, and frame decoding.
/// `supernet-core` maps these into user-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Credentials ─────────────────────────────────────────────────
    /// No credential is installed.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Token renewal failed.
    #[error(transparent)]
    Renewal(#[from] RenewalError),

    /// A supplied token could not be decoded.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST ────────────────────────────────────────────────────────
    /// Error envelope returned by the REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    // ── Socket ──────────────────────────────────────────────────────
    /// Socket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Socket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The socket did not reach the open state in time.
    #[error("WebSocket connection timeout")]
    ConnectionTimeout,

    /// The socket left the connecting state without opening.
    #[error("WebSocket connection failed")]
    ConnectionFailed,

    /// No socket exists.
    #[error("WebSocket not connected")]
    NotConnected,

    /// A reply the caller was waiting for did not arrive.
    #[error("Timed out waiting for {0}")]
    ReplyTimeout(&'static str),

    // ── Data ────────────────────────────────────────────────────────
    /// A socket frame could not be encoded or decoded.
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the credential is gone or cannot be renewed.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::NotAuthenticated
            | Self::Renewal(RenewalError::RefreshTokenExpired | RenewalError::MissingRefreshToken) => {
                true
            }
            Self::Api { status, .. } => *status == 401,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_)
            | Self::ConnectionTimeout
            | Self::ConnectionFailed
            | Self::ReplyTimeout(_)
            | Self::Renewal(RenewalError::Transport(_)) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Extract the server error code, if available.
    pub fn api_error_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } | Self::Renewal(RenewalError::Rejected { code, .. }) => *code,
            _ => None,
        }
    }

    /// HTTP status of a REST failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Renewal(RenewalError::Rejected { status, .. }) => {
                Some(*status)
            }
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_refresh_token_counts_as_auth_expired() {
        let err = Error::from(RenewalError::RefreshTokenExpired);
        assert!(err.is_auth_expired());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Refresh token expired");
    }

    #[test]
    fn api_error_exposes_status_and_code() {
        let err = Error::Api {
            status: 404,
            code: Some(102),
            message: "Project not found".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.api_error_code(), Some(102));
    }

    #[test]
    fn server_side_failures_are_transient() {
        let err = Error::Api {
            status: 503,
            code: None,
            message: "Service Unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(Error::ConnectionTimeout.is_transient());
        assert!(!Error::NotConnected.is_transient());
    }
}
