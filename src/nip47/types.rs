// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON payloads carried inside encrypted event content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::storage::BudgetRenewal;

/// Decrypted request content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
}

/// Response content, encrypted before publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success<T: Serialize>(result_type: impl Into<String>, result: &T) -> Self {
        let result_type = result_type.into();
        match serde_json::to_value(result) {
            Ok(value) => Self {
                result_type,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::error(result_type, ErrorCode::Internal, e.to_string()),
        }
    }

    pub fn error(
        result_type: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            result_type: result_type.into(),
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Invoice or payment as reported to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// `incoming` or `outgoing`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub invoice: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub description_hash: String,
    #[serde(default)]
    pub preimage: String,
    pub payment_hash: String,
    /// Millisatoshis
    pub amount: u64,
    #[serde(default)]
    pub fees_paid: u64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Custom TLV record attached to a keysend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlvRecord {
    #[serde(rename = "type")]
    pub record_type: u64,
    /// Hex encoded value
    pub value: String,
}

// =============================================================================
// Params
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MakeInvoiceParams {
    pub amount: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub description_hash: String,
    #[serde(default)]
    pub expiry: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupInvoiceParams {
    #[serde(default)]
    pub payment_hash: Option<String>,
    #[serde(default)]
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTransactionsParams {
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub until: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub unpaid: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayInvoiceParams {
    pub invoice: String,
    /// Only used for invoices that do not carry an amount.
    #[serde(default)]
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysendParams {
    pub amount: u64,
    pub pubkey: String,
    #[serde(default)]
    pub preimage: Option<String>,
    #[serde(default)]
    pub tlv_records: Vec<TlvRecord>,
}

/// Batch items stay raw so that one malformed item cannot fail the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayInvoiceParams {
    pub invoices: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayInvoiceElement {
    #[serde(default)]
    pub id: Option<String>,
    pub invoice: String,
    #[serde(default)]
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayKeysendParams {
    pub keysends: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiPayKeysendElement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub keysend: KeysendParams,
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResult {
    /// Millisatoshis
    pub balance: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_renewal: Option<BudgetRenewal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetInfoResult {
    pub alias: String,
    pub color: String,
    pub pubkey: String,
    pub network: String,
    pub block_height: u32,
    pub block_hash: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayResult {
    pub preimage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees_paid: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListTransactionsResult {
    pub transactions: Vec<Transaction>,
}

/// Notification content, encrypted per recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_type: String,
    pub notification: Transaction,
}
