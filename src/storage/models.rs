// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted entities.
//!
//! Entities reference each other by id only (`Payment.app_id`,
//! `Payment.request_event_id`, `AppPermission.app_id`); nothing holds an
//! embedded back-reference.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::nip47::PermissionScope;

/// Budget renewal period of a permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetRenewal {
    #[default]
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BudgetRenewal {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetRenewal::Never => "never",
            BudgetRenewal::Daily => "daily",
            BudgetRenewal::Weekly => "weekly",
            BudgetRenewal::Monthly => "monthly",
            BudgetRenewal::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BudgetRenewal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetRenewal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "never" => Ok(BudgetRenewal::Never),
            "daily" => Ok(BudgetRenewal::Daily),
            "weekly" => Ok(BudgetRenewal::Weekly),
            "monthly" => Ok(BudgetRenewal::Monthly),
            "yearly" => Ok(BudgetRenewal::Yearly),
            other => Err(format!("unknown budget renewal `{other}`")),
        }
    }
}

/// A paired client application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Unique identifier (UUID)
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Hex x-only public key the client signs with.
    pub pubkey: String,
    pub created_at: DateTime<Utc>,
    /// After this instant every request is rejected with `EXPIRED`.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
}

impl App {
    pub fn new(name: impl Into<String>, pubkey: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            pubkey: pubkey.into().to_lowercase(),
            created_at: Utc::now(),
            expires_at: None,
            last_event_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// What an application may call, and how much it may spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppPermission {
    pub app_id: String,
    pub scope: PermissionScope,
    /// Per-call maximum and window budget in millisatoshis. `0` = unbounded.
    #[serde(default)]
    pub max_amount_msat: u64,
    #[serde(default)]
    pub budget_renewal: BudgetRenewal,
    pub created_at: DateTime<Utc>,
}

impl AppPermission {
    pub fn new(app_id: impl Into<String>, scope: PermissionScope) -> Self {
        Self {
            app_id: app_id.into(),
            scope,
            max_amount_msat: 0,
            budget_renewal: BudgetRenewal::Never,
            created_at: Utc::now(),
        }
    }

    pub fn with_budget(mut self, max_amount_msat: u64, renewal: BudgetRenewal) -> Self {
        self.max_amount_msat = max_amount_msat;
        self.budget_renewal = renewal;
        self
    }
}

/// An accepted inbound request. Never modified after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    /// Transport event id.
    pub id: String,
    /// `None` when the sender key is not paired.
    pub app_id: Option<String>,
    /// Decrypted request content; empty when it never decrypted.
    #[serde(default)]
    pub content: String,
    pub received_at: DateTime<Utc>,
}

/// An outgoing payment attempt.
///
/// Created pending (`preimage == None`) before the backend is called and
/// updated with the preimage on success. Failed or in-doubt attempts stay
/// pending as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub app_id: String,
    pub request_event_id: String,
    /// BOLT11 invoice for invoice payments.
    #[serde(default)]
    pub payment_request: Option<String>,
    /// Destination node key for keysends.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub payment_hash: Option<String>,
    pub amount_msat: u64,
    #[serde(default)]
    pub preimage: Option<String>,
    #[serde(default)]
    pub fee_msat: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_settled(&self) -> bool {
        self.preimage.is_some()
    }
}

/// Fields supplied when recording a new pending payment.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub app_id: String,
    pub request_event_id: String,
    pub payment_request: Option<String>,
    pub destination: Option<String>,
    pub payment_hash: Option<String>,
    pub amount_msat: u64,
}
