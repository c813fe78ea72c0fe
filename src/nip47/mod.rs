// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet-connect wire protocol.
//!
//! - `envelope` - signed relay events and payload encryption
//! - `bolt11` - invoice decoding
//! - `types` - request, response and notification payloads

pub mod bolt11;
pub mod envelope;
pub mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use types::*;

/// Replaceable event advertising the supported methods.
pub const INFO_EVENT_KIND: u16 = 13194;
/// Encrypted client request.
pub const REQUEST_KIND: u16 = 23194;
/// Encrypted service response.
pub const RESPONSE_KIND: u16 = 23195;
/// Encrypted unsolicited notification.
pub const NOTIFICATION_KIND: u16 = 23196;

/// Notification type for incoming payments.
pub const PAYMENT_RECEIVED_NOTIFICATION: &str = "payment_received";

/// Request methods understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetBalance,
    GetInfo,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
    PayInvoice,
    PayKeysend,
    MultiPayInvoice,
    MultiPayKeysend,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::GetBalance,
        Method::GetInfo,
        Method::MakeInvoice,
        Method::LookupInvoice,
        Method::ListTransactions,
        Method::PayInvoice,
        Method::PayKeysend,
        Method::MultiPayInvoice,
        Method::MultiPayKeysend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetBalance => "get_balance",
            Method::GetInfo => "get_info",
            Method::MakeInvoice => "make_invoice",
            Method::LookupInvoice => "lookup_invoice",
            Method::ListTransactions => "list_transactions",
            Method::PayInvoice => "pay_invoice",
            Method::PayKeysend => "pay_keysend",
            Method::MultiPayInvoice => "multi_pay_invoice",
            Method::MultiPayKeysend => "multi_pay_keysend",
        }
    }

    /// The permission a caller needs to invoke this method.
    ///
    /// Every spending method shares the `pay_invoice` permission, so they all
    /// draw on one budget.
    pub fn permission_scope(&self) -> PermissionScope {
        match self {
            Method::GetBalance => PermissionScope::GetBalance,
            Method::GetInfo => PermissionScope::GetInfo,
            Method::MakeInvoice => PermissionScope::MakeInvoice,
            Method::LookupInvoice => PermissionScope::LookupInvoice,
            Method::ListTransactions => PermissionScope::ListTransactions,
            Method::PayInvoice
            | Method::PayKeysend
            | Method::MultiPayInvoice
            | Method::MultiPayKeysend => PermissionScope::PayInvoice,
        }
    }

    /// Space separated method list used as the info event content.
    pub fn capabilities() -> String {
        Method::ALL
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown method `{s}`"))
    }
}

/// What a permission row grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    GetBalance,
    GetInfo,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
    PayInvoice,
    /// Receive push notifications; not a request method.
    Notifications,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::GetBalance => "get_balance",
            PermissionScope::GetInfo => "get_info",
            PermissionScope::MakeInvoice => "make_invoice",
            PermissionScope::LookupInvoice => "lookup_invoice",
            PermissionScope::ListTransactions => "list_transactions",
            PermissionScope::PayInvoice => "pay_invoice",
            PermissionScope::Notifications => "notifications",
        }
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
