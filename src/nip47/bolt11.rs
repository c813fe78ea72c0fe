// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! BOLT11 invoice decoding.

use std::str::FromStr;

use lightning_invoice::Bolt11Invoice;

#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
    #[error("failed to decode bolt11 invoice: {0}")]
    Decode(String),
}

/// The invoice fields the gateway acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
    /// Lowercased invoice string as submitted to the backend.
    pub bolt11: String,
    /// Hex payment hash.
    pub payment_hash: String,
    pub amount_msat: Option<u64>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Decode a BOLT11 invoice. Input is lowercased first.
pub fn decode_invoice(raw: &str) -> Result<DecodedInvoice, InvoiceError> {
    let bolt11 = raw.trim().to_lowercase();
    let invoice =
        Bolt11Invoice::from_str(&bolt11).map_err(|e| InvoiceError::Decode(e.to_string()))?;

    let created_at = invoice.duration_since_epoch().as_secs() as i64;
    let expires_at = created_at + invoice.expiry_time().as_secs() as i64;

    Ok(DecodedInvoice {
        payment_hash: invoice.payment_hash().to_string(),
        amount_msat: invoice.amount_milli_satoshis(),
        created_at,
        expires_at,
        bolt11,
    })
}
