use std::fmt;

use serde::{Deserialize, Serialize};

use supernet_api::wire::RawErrorCode;

/// Failure attached to a project or job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub code: i64,
    /// Symbolic code as sent by the server, when it was not numeric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_code: Option<String>,
    pub message: String,
}

impl ErrorData {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            original_code: None,
            message: message.into(),
        }
    }

    /// Error from a `jobError` push event.
    pub fn from_server(raw: &RawErrorCode, message: impl Into<String>) -> Self {
        let (code, original_code) = map_error_code(raw);
        Self {
            code,
            original_code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Translate a server error code into its numeric form.
///
/// Numbers (and numeric strings) pass through. Known symbolic codes map to
/// the 5001..=5005 range, anything else to 5000. The symbolic form is
/// returned alongside for diagnostics.
pub fn map_error_code(raw: &RawErrorCode) -> (i64, Option<String>) {
    match raw {
        RawErrorCode::Numeric(code) => (*code, None),
        RawErrorCode::Named(name) => {
            if let Ok(code) = name.trim().parse::<i64>() {
                return (code, None);
            }
            let code = match name.as_str() {
                "serverRestarting" => 5001,
                "workerDisconnected" => 5002,
                "jobTimedOut" => 5003,
                "artistCanceled" => 5004,
                "workerCancelled" => 5005,
                _ => 5000,
            };
            (code, Some(name.clone()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_codes_map_to_reserved_range() {
        assert_eq!(
            map_error_code(&RawErrorCode::Named("workerDisconnected".into())),
            (5002, Some("workerDisconnected".into()))
        );
        assert_eq!(
            map_error_code(&RawErrorCode::Named("somethingElse".into())),
            (5000, Some("somethingElse".into()))
        );
    }

    #[test]
    fn numeric_codes_pass_through() {
        assert_eq!(map_error_code(&RawErrorCode::Numeric(4007)), (4007, None));
        assert_eq!(map_error_code(&RawErrorCode::Named("4012".into())), (4012, None));
    }

    #[test]
    fn display_includes_code() {
        let err = ErrorData::new(0, "Server disconnected");
        assert_eq!(err.to_string(), "Server disconnected (code 0)");
    }
}
