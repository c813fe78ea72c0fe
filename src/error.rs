// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error types shared across the gateway.
//!
//! Each layer owns a `thiserror` enum; [`GatewayError`] is the umbrella type
//! returned by service entry points. [`ErrorCode`] is the wire taxonomy sent
//! back to clients inside error responses.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::lnclient::LnClientError;
use crate::nip47::bolt11::InvoiceError;
use crate::nip47::envelope::EnvelopeError;
use crate::relay::RelayError;
use crate::storage::StoreError;

/// Error codes carried in the `error.code` field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No permission exists for the requested method.
    Restricted,
    /// The application has expired.
    Expired,
    /// Per-call maximum or window budget exceeded.
    QuotaExceeded,
    /// Decoding, backend or persistence failure.
    Internal,
    /// The requested object does not exist.
    NotFound,
    /// Unknown method.
    NotImplemented,
    /// The sender key is not paired with any application.
    Unauthorized,
    /// Timed out waiting for settlement; the payment may still complete.
    PaymentInDoubt,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Restricted => "RESTRICTED",
            ErrorCode::Expired => "EXPIRED",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::PaymentInDoubt => "PAYMENT_IN_DOUBT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Umbrella error for the gateway service.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("invoice error: {0}")]
    Invoice(#[from] InvoiceError),

    #[error("lightning backend error: {0}")]
    LnClient(#[from] LnClientError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_as_wire_strings() {
        let json = serde_json::to_string(&ErrorCode::QuotaExceeded).unwrap();
        assert_eq!(json, r#""QUOTA_EXCEEDED""#);

        let parsed: ErrorCode = serde_json::from_str(r#""PAYMENT_IN_DOUBT""#).unwrap();
        assert_eq!(parsed, ErrorCode::PaymentInDoubt);
    }

    #[test]
    fn display_matches_serialized_form() {
        for code in [
            ErrorCode::Restricted,
            ErrorCode::Expired,
            ErrorCode::QuotaExceeded,
            ErrorCode::Internal,
            ErrorCode::NotFound,
            ErrorCode::NotImplemented,
            ErrorCode::Unauthorized,
            ErrorCode::PaymentInDoubt,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }

    #[test]
    fn gateway_error_wraps_layer_errors() {
        let err: GatewayError = StoreError::NotFound("app 1".to_string()).into();
        assert!(err.to_string().contains("app 1"));
    }
}
