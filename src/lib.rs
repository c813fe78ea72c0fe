// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! NWC Gateway - Wallet Connect Protocol Engine
//!
//! Lets paired client applications request Lightning wallet operations over
//! encrypted, signed relay messages while enforcing per-application
//! permissions and spending budgets.
//!
//! ## Modules
//!
//! - `nip47` - wire protocol, crypto envelope and invoice decoding
//! - `permissions` - permission and budget engine
//! - `service` - request dispatcher and batch payment orchestrator
//! - `lnclient` - Lightning backend capability and event broadcast bridge
//! - `notifier` - push notifications for incoming payments
//! - `event_pump` - background task draining backend events
//! - `storage` - embedded database (redb)
//! - `relay` - outbound relay seam

pub mod analytics;
pub mod config;
pub mod error;
pub mod event_pump;
pub mod lnclient;
pub mod nip47;
pub mod notifier;
pub mod permissions;
pub mod relay;
pub mod service;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError, GatewayResult};
pub use service::Service;
