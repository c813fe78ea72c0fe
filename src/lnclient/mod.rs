// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lightning backend capability.
//!
//! Concrete backends (embedded node, remote node, custodial service) live
//! outside this crate and implement [`LnClient`]. Backends that learn about
//! payment outcomes asynchronously publish [`events::LnEvent`]s to an
//! [`events::EventBroadcaster`] and wait on it.

pub mod events;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::nip47::{ListTransactionsParams, TlvRecord, Transaction};

pub use events::{
    EventBroadcaster, LnEvent, PaymentFailureReason, PaymentOutcome, Subscription,
};

#[derive(Debug, thiserror::Error)]
pub enum LnClientError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payment failed: {0}")]
    PaymentFailed(PaymentFailureReason),

    /// No outcome was observed before the deadline. The payment may still settle.
    #[error("timed out waiting for payment {payment_hash}")]
    PaymentTimeout { payment_hash: String },
}

/// Node details reported by `get_info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub alias: String,
    pub color: String,
    pub pubkey: String,
    pub network: String,
    pub block_height: u32,
    pub block_hash: String,
}

/// Result of a settled outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSent {
    /// Hex preimage
    pub preimage: String,
    pub fee_msat: Option<u64>,
}

/// Wallet operations the gateway needs from a Lightning backend.
///
/// Amounts are millisatoshis.
#[async_trait]
pub trait LnClient: Send + Sync {
    async fn get_balance(&self) -> Result<u64, LnClientError>;

    async fn get_info(&self) -> Result<NodeInfo, LnClientError>;

    async fn make_invoice(
        &self,
        amount_msat: u64,
        description: &str,
        description_hash: &str,
        expiry_secs: u64,
    ) -> Result<Transaction, LnClientError>;

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<Transaction, LnClientError>;

    async fn list_transactions(
        &self,
        params: &ListTransactionsParams,
    ) -> Result<Vec<Transaction>, LnClientError>;

    /// Pay a BOLT11 invoice. `amount_msat` is set only for amount-less invoices.
    async fn send_payment(
        &self,
        invoice: &str,
        amount_msat: Option<u64>,
    ) -> Result<PaymentSent, LnClientError>;

    async fn send_keysend(
        &self,
        amount_msat: u64,
        destination: &str,
        preimage: Option<&str>,
        tlv_records: &[TlvRecord],
    ) -> Result<PaymentSent, LnClientError>;
}
