// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay transport seam.
//!
//! The connection and reconnect loop live in the embedding binary. It feeds
//! inbound events to [`crate::service::Service::run`] and publishes what the
//! service hands to [`Relay::publish`].

use async_trait::async_trait;

use crate::nip47::envelope::Event;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay rejected event {event_id}: {reason}")]
    Rejected { event_id: String, reason: String },

    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

/// Outbound side of the relay connection.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), RelayError>;
}
