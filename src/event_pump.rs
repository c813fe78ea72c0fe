// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Backend Event Pump
//!
//! Background task that drains the Lightning backend's event stream.
//!
//! ## Strategy
//!
//! For every event the pump:
//! 1. Emits the matching analytics event (channel and incoming payment events).
//! 2. Publishes it to the [`EventBroadcaster`] so waiting payment calls can
//!    resolve.
//! 3. For incoming payments, spawns a notification fan-out task.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; the pump exits as soon as the
//! token fires or the backend closes its stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::analytics::{AnalyticsEvent, AnalyticsEventType, EventSink};
use crate::lnclient::{EventBroadcaster, LnEvent};
use crate::notifier::Notifier;

pub struct EventPump {
    events: mpsc::Receiver<LnEvent>,
    broadcaster: EventBroadcaster,
    notifier: Notifier,
    sink: Arc<dyn EventSink>,
}

impl EventPump {
    pub fn new(
        events: mpsc::Receiver<LnEvent>,
        broadcaster: EventBroadcaster,
        notifier: Notifier,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            events,
            broadcaster,
            notifier,
            sink,
        }
    }

    /// Run until the cancellation token is triggered or the stream ends.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(pump.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Backend event pump starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Backend event pump shutting down");
                    return;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        info!("Backend event stream closed");
                        return;
                    }
                }
            }
        }
    }

    fn handle(&self, event: LnEvent) {
        if let Some(analytics) = analytics_for(&event) {
            self.sink.publish(analytics);
        }

        let received = match &event {
            LnEvent::PaymentReceived { payment_hash, .. } => Some(payment_hash.clone()),
            _ => None,
        };

        let name = event.name();
        let delivered = self.broadcaster.publish(event);
        debug!(event = name, subscribers = delivered, "Backend event published");

        if let Some(payment_hash) = received {
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                notifier.payment_received(&payment_hash).await;
            });
        }
    }
}

fn analytics_for(event: &LnEvent) -> Option<AnalyticsEvent> {
    match event {
        LnEvent::PaymentReceived {
            payment_hash,
            amount_msat,
        } => Some(
            AnalyticsEvent::new(AnalyticsEventType::PaymentReceived)
                .with("payment_hash", payment_hash.clone())
                .with("amount_msat", *amount_msat),
        ),
        LnEvent::ChannelReady {
            channel_id,
            counterparty_node_id,
        } => Some(
            AnalyticsEvent::new(AnalyticsEventType::ChannelReady)
                .with("channel_id", channel_id.clone())
                .with("counterparty_node_id", counterparty_node_id.clone()),
        ),
        LnEvent::ChannelClosed {
            channel_id,
            counterparty_node_id,
            reason,
        } => Some(
            AnalyticsEvent::new(AnalyticsEventType::ChannelClosed)
                .with("channel_id", channel_id.clone())
                .with("counterparty_node_id", counterparty_node_id.clone())
                .with("reason", reason.clone()),
        ),
        // Outgoing payment analytics are emitted by the payment pipeline.
        LnEvent::PaymentSuccessful { .. } | LnEvent::PaymentFailed { .. } => None,
    }
}
