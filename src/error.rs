//! Crate-wide error type and its HTTP/error-envelope mapping.

use serde_json::{Value, json};
use thiserror::Error;

/// Structured detail carried by a quota-exceeded rejection (spec error envelope).
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuotaExceededDetail {
    pub quota_type: &'static str,
    pub limit: i64,
    pub used: i64,
    pub available: i64,
    pub reset_date: Option<String>,
    pub upgrade_url: &'static str,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication failed")]
    Authn,

    #[error("not authorized")]
    Authz,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("quota exceeded")]
    QuotaExceeded(QuotaExceededDetail),

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::Authn => 401,
            GatewayError::Authz => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::QuotaExceeded(_) => 429,
            GatewayError::Provider(_) => 502,
            GatewayError::Conflict(_) => 409,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Renders the `{detail: ...}` error envelope spec.md §6/§7 expects.
    pub fn to_envelope(&self) -> Value {
        match self {
            GatewayError::QuotaExceeded(detail) => json!({
                "detail": {
                    "error": "quota_exceeded",
                    "quota_type": detail.quota_type,
                    "limit": detail.limit,
                    "used": detail.used,
                    "available": detail.available,
                    "reset_date": detail.reset_date,
                    "upgrade_url": detail.upgrade_url,
                }
            }),
            other => json!({ "detail": other.to_string() }),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_envelope_is_structured_object() {
        let err = GatewayError::QuotaExceeded(QuotaExceededDetail {
            quota_type: "sms_monthly",
            limit: 50,
            used: 48,
            available: 2,
            reset_date: Some("2026-08-01".to_string()),
            upgrade_url: "/api/v1/plans/list",
        });
        let envelope = err.to_envelope();
        assert_eq!(envelope["detail"]["error"], "quota_exceeded");
        assert_eq!(envelope["detail"]["limit"], 50);
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn plain_errors_envelope_as_string_detail() {
        let err = GatewayError::Validation("body too long".to_string());
        assert_eq!(err.to_envelope()["detail"], "body too long");
        assert_eq!(err.status_code(), 400);
    }
}
