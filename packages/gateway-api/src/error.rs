//! The `{ success, message }` envelope used for every gateway rejection.

use serde::{Deserialize, Serialize};

/// The JSON body returned for rejections and relayed upstream failures.
///
/// ```json
/// { "success": false, "message": "Too many requests, please try again later.", "code": "rate_limited" }
/// ```
///
/// When an upstream HTTP error is relayed, `data` carries the upstream body
/// untouched. `error` carries an internal detail string and is only ever
/// populated outside production mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub success: bool,

    /// Human-readable description of the problem.
    pub message: String,

    /// Machine-readable error code. See [`codes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Upstream response body, present only on relayed upstream errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Internal error detail. Never set in production.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// A failure envelope with a code and message.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: Some(code.into()),
            data: None,
            error: None,
        }
    }

    /// Attach the upstream body.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach an internal detail string.
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(detail.into());
        self
    }
}

/// Error codes carried in [`Envelope::code`].
///
/// | `code` | HTTP status |
/// |--------|------------|
/// | `credential_invalid` | 401 |
/// | `client_blocked` | 403 |
/// | `origin_rejected` | 403 |
/// | `not_found` | 404 |
/// | `invalid_parameter` | 400 |
/// | `payload_too_large` | 413 |
/// | `rate_limited` | 429 |
/// | `upstream_error` | relayed upstream status |
/// | `upstream_unreachable` | 500 |
/// | `internal_error` | 500 |
pub mod codes {
    pub const CREDENTIAL_INVALID: &str = "credential_invalid";
    pub const CLIENT_BLOCKED: &str = "client_blocked";
    pub const ORIGIN_REJECTED: &str = "origin_rejected";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_PARAMETER: &str = "invalid_parameter";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const UPSTREAM_UNREACHABLE: &str = "upstream_unreachable";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_omits_absent_fields() {
        let e = Envelope::failure(codes::CLIENT_BLOCKED, "Access denied");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Access denied");
        assert!(json.get("data").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn upstream_body_nests_under_data() {
        let body = serde_json::json!({ "detail": "no such product" });
        let e = Envelope::failure(codes::UPSTREAM_ERROR, "Upstream request failed")
            .with_data(body.clone());
        let back: Envelope = serde_json::from_str(&serde_json::to_string(&e).unwrap()).unwrap();
        assert_eq!(back.data, Some(body));
        assert!(!back.success);
    }
}
