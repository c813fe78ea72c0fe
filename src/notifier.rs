// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Push notifications for backend-originated events.
//!
//! An incoming payment event only carries a payment hash, so the full
//! transaction is resolved through the backend first. The result is then
//! encrypted separately for every app holding the `notifications` permission.
//! A failure for one recipient is logged and the rest are still notified.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::GatewayResult;
use crate::lnclient::LnClient;
use crate::nip47::envelope::Envelope;
use crate::nip47::{
    Notification, PermissionScope, NOTIFICATION_KIND, PAYMENT_RECEIVED_NOTIFICATION,
};
use crate::permissions::PermissionEngine;
use crate::relay::Relay;
use crate::storage::{App, Repository};

#[derive(Clone)]
pub struct Notifier {
    permissions: Arc<PermissionEngine>,
    repo: Arc<Repository>,
    envelope: Arc<Envelope>,
    ln_client: Arc<dyn LnClient>,
    relay: Arc<dyn Relay>,
}

impl Notifier {
    pub fn new(
        permissions: Arc<PermissionEngine>,
        repo: Arc<Repository>,
        envelope: Arc<Envelope>,
        ln_client: Arc<dyn LnClient>,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            permissions,
            repo,
            envelope,
            ln_client,
            relay,
        }
    }

    /// Notify subscribed apps of an incoming payment.
    ///
    /// Returns the number of apps notified.
    pub async fn payment_received(&self, payment_hash: &str) -> usize {
        let transaction = match self.ln_client.lookup_invoice(payment_hash).await {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!(payment_hash, error = %e, "Failed to look up received payment");
                return 0;
            }
        };

        let notification = Notification {
            notification_type: PAYMENT_RECEIVED_NOTIFICATION.to_string(),
            notification: transaction,
        };
        self.broadcast(&notification).await
    }

    async fn broadcast(&self, notification: &Notification) -> usize {
        let apps = match self.repo.list_apps() {
            Ok(apps) => apps,
            Err(e) => {
                error!(error = %e, "Failed to list apps for notification");
                return 0;
            }
        };

        let mut delivered = 0;
        for app in apps {
            if !self.subscribed(&app) {
                continue;
            }
            match self.notify(&app, notification).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    app_id = %app.id,
                    notification_type = %notification.notification_type,
                    error = %e,
                    "Failed to notify app"
                ),
            }
        }

        info!(
            notification_type = %notification.notification_type,
            payment_hash = %notification.notification.payment_hash,
            delivered,
            "Notifications published"
        );
        delivered
    }

    fn subscribed(&self, app: &App) -> bool {
        match self
            .permissions
            .authorize(app, PermissionScope::Notifications, 0)
        {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                warn!(app_id = %app.id, error = %e, "Failed to check notification permission");
                false
            }
        }
    }

    async fn notify(&self, app: &App, notification: &Notification) -> GatewayResult<()> {
        let payload = serde_json::to_string(notification)?;
        let event = self
            .envelope
            .seal(NOTIFICATION_KIND, &app.pubkey, &payload, Vec::new())?;
        self.relay.publish(&event).await?;
        debug!(app_id = %app.id, event_id = %event.id, "Notification published");
        Ok(())
    }
}
