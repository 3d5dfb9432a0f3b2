//! Typed errors for gateway operations
//!
//! Lets the stores distinguish "the thing is already gone" from real
//! failures without string matching.

use thiserror::Error;

/// Gateway failure taxonomy
///
/// - `NotFound` (404) - the referenced session or model no longer exists
/// - `BadRequest` (400/422) - the gateway rejected the payload
/// - `Unauthorized` (401/403) - catalog credential missing or rejected
/// - `ServiceError` (5xx) - server-side failure, detail comes from the body
/// - `Network` - connection refused, reset, timeout
/// - `InvalidResponse` - 2xx with a body we could not decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },
}

impl GatewayError {
    /// The referenced resource does not exist server-side
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    /// Transport-level failure (no usable HTTP answer)
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }

    /// Human-readable detail without the category prefix
    pub fn detail(&self) -> &str {
        match self {
            GatewayError::NotFound(d)
            | GatewayError::BadRequest(d)
            | GatewayError::Unauthorized(d)
            | GatewayError::ServiceError(d)
            | GatewayError::Network(d)
            | GatewayError::InvalidResponse(d) => d,
            GatewayError::Http { detail, .. } => detail,
        }
    }

    /// Convert HTTP status code and response body into a typed error
    ///
    /// The body is expected to be `{"detail": ...}`; anything else is used
    /// verbatim.
    pub fn from_http_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = extract_detail(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        });

        match status.as_u16() {
            404 => GatewayError::NotFound(detail),
            400 | 422 => GatewayError::BadRequest(detail),
            401 | 403 => GatewayError::Unauthorized(detail),
            500..=599 => GatewayError::ServiceError(detail),
            code => GatewayError::Http {
                status: code,
                detail,
            },
        }
    }

    /// Convert network/connection errors into a typed error
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            GatewayError::Network(format!("Connection failed: {}", e))
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_http_status(status, &e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        // Validation errors carry a list of objects
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_http_status_reads_detail() {
        let err = GatewayError::from_http_status(
            StatusCode::NOT_FOUND,
            r#"{"detail":"Chat not found"}"#,
        );
        assert_eq!(err, GatewayError::NotFound("Chat not found".to_string()));
        assert!(err.is_not_found());
        assert_eq!(err.detail(), "Chat not found");
    }

    #[test]
    fn test_from_http_status_categories() {
        let err = GatewayError::from_http_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, GatewayError::ServiceError(ref d) if d == "boom"));

        let err = GatewayError::from_http_status(StatusCode::UNPROCESSABLE_ENTITY, "{}");
        assert!(matches!(err, GatewayError::BadRequest(_)));

        let err = GatewayError::from_http_status(StatusCode::FORBIDDEN, "");
        assert_eq!(err, GatewayError::Unauthorized("Forbidden".to_string()));

        let err = GatewayError::from_http_status(StatusCode::IM_A_TEAPOT, "");
        assert!(matches!(err, GatewayError::Http { status: 418, .. }));
    }

    #[test]
    fn test_validation_detail_list_is_stringified() {
        let err = GatewayError::from_http_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":[{"loc":["body","text"],"msg":"field required"}]}"#,
        );
        assert!(err.detail().contains("field required"));
    }

    #[test]
    fn test_not_found_is_not_transport() {
        let err = GatewayError::NotFound("gone".into());
        assert!(!err.is_transport());
        assert!(GatewayError::Network("refused".into()).is_transport());
    }
}
