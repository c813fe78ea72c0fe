// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Backend event broadcast bridge.
//!
//! Fans a single stream of backend lifecycle events out to any number of
//! independent subscriptions. Each subscription owns a bounded buffer and
//! delivery never blocks: a subscriber whose buffer is full misses the event
//! (logged) while every other subscriber still receives it.
//!
//! A payment-initiating call subscribes to its payment hash *before*
//! submitting the payment and then waits for the matching event, see
//! [`EventBroadcaster::await_payment`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{LnClientError, PaymentSent};
use crate::config::DEFAULT_PAYMENT_TIMEOUT;

/// Why an outgoing payment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFailureReason {
    RecipientRejected,
    UserAbandoned,
    RetriesExhausted,
    PaymentExpired,
    RouteNotFound,
    UnexpectedError,
}

impl PaymentFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentFailureReason::RecipientRejected => "recipient rejected",
            PaymentFailureReason::UserAbandoned => "user abandoned",
            PaymentFailureReason::RetriesExhausted => "retries exhausted",
            PaymentFailureReason::PaymentExpired => "payment expired",
            PaymentFailureReason::RouteNotFound => "route not found",
            PaymentFailureReason::UnexpectedError => "unexpected error",
        }
    }
}

impl fmt::Display for PaymentFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event emitted by a Lightning backend.
#[derive(Debug, Clone, PartialEq)]
pub enum LnEvent {
    PaymentSuccessful {
        payment_hash: String,
        preimage: String,
        fee_paid_msat: Option<u64>,
    },
    PaymentFailed {
        payment_hash: String,
        /// Backends that do not report a reason map to `UnexpectedError`.
        reason: Option<PaymentFailureReason>,
    },
    PaymentReceived {
        payment_hash: String,
        amount_msat: u64,
    },
    ChannelReady {
        channel_id: String,
        counterparty_node_id: String,
    },
    ChannelClosed {
        channel_id: String,
        counterparty_node_id: String,
        reason: String,
    },
}

impl LnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LnEvent::PaymentSuccessful { .. } => "payment_successful",
            LnEvent::PaymentFailed { .. } => "payment_failed",
            LnEvent::PaymentReceived { .. } => "payment_received",
            LnEvent::ChannelReady { .. } => "channel_ready",
            LnEvent::ChannelClosed { .. } => "channel_closed",
        }
    }

    /// Correlation key for payment events.
    pub fn payment_hash(&self) -> Option<&str> {
        match self {
            LnEvent::PaymentSuccessful { payment_hash, .. }
            | LnEvent::PaymentFailed { payment_hash, .. }
            | LnEvent::PaymentReceived { payment_hash, .. } => Some(payment_hash),
            LnEvent::ChannelReady { .. } | LnEvent::ChannelClosed { .. } => None,
        }
    }
}

/// How a wait for a payment ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded {
        preimage: String,
        fee_msat: Option<u64>,
    },
    Failed(PaymentFailureReason),
    /// The deadline passed without a matching event. Not a failure.
    TimedOut,
}

impl PaymentOutcome {
    pub fn into_result(self, payment_hash: &str) -> Result<PaymentSent, LnClientError> {
        match self {
            PaymentOutcome::Succeeded { preimage, fee_msat } => Ok(PaymentSent { preimage, fee_msat }),
            PaymentOutcome::Failed(reason) => Err(LnClientError::PaymentFailed(reason)),
            PaymentOutcome::TimedOut => Err(LnClientError::PaymentTimeout {
                payment_hash: payment_hash.to_string(),
            }),
        }
    }
}

pub type SubscriptionId = u64;

/// Delivery side of one subscription.
struct Subscriber {
    tx: mpsc::Sender<Arc<LnEvent>>,
    /// When set, only events carrying this payment hash are queued.
    payment_hash: Option<String>,
}

impl Subscriber {
    fn wants(&self, event: &LnEvent) -> bool {
        match &self.payment_hash {
            None => true,
            Some(hash) => event.payment_hash() == Some(hash.as_str()),
        }
    }
}

type Subscribers = HashMap<SubscriptionId, Subscriber>;

struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // The map stays consistent even if a holder panicked.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }
}

/// Registry of live subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct EventBroadcaster {
    registry: Arc<Registry>,
    buffer: usize,
    payment_timeout: Duration,
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
            buffer: buffer.max(1),
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
        }
    }

    /// Deadline used by backends when waiting for a payment outcome.
    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn payment_timeout(&self) -> Duration {
        self.payment_timeout
    }

    /// Register a receiver for every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Register a receiver for events carrying `payment_hash` only.
    ///
    /// Unrelated traffic never occupies its buffer.
    pub fn subscribe_for(&self, payment_hash: &str) -> Subscription {
        self.register(Some(payment_hash.to_string()))
    }

    fn register(&self, payment_hash: Option<String>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        debug!(subscription_id = id, payment_hash = ?payment_hash, "Subscription registered");
        self.registry
            .lock()
            .insert(id, Subscriber { tx, payment_hash });

        Subscription {
            id,
            receiver: rx,
            registry: self.registry.clone(),
        }
    }

    /// Deliver `event` to every registered subscription that wants it.
    ///
    /// Returns the number of subscriptions that accepted the event.
    pub fn publish(&self, event: LnEvent) -> usize {
        let event = Arc::new(event);
        let mut subscribers = self.registry.lock();
        let mut delivered = 0;

        subscribers.retain(|id, subscriber| {
            if !subscriber.wants(&event) {
                return !subscriber.tx.is_closed();
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscription_id = *id,
                        event = event.name(),
                        "Subscriber lagging, event dropped for it"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        delivered
    }

    /// Deregister a subscription. Calling this more than once is a no-op.
    pub fn cancel_subscription(&self, id: SubscriptionId) {
        if self.registry.remove(id) {
            debug!(subscription_id = id, "Subscription cancelled");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Subscribe to `payment_hash`, run `submit`, then wait for its outcome.
    ///
    /// Subscribing first guarantees the outcome event cannot be missed even
    /// when the backend reports it before `submit` returns.
    pub async fn await_payment<F>(
        &self,
        payment_hash: &str,
        timeout: Duration,
        submit: F,
    ) -> Result<PaymentSent, LnClientError>
    where
        F: Future<Output = Result<(), LnClientError>>,
    {
        let mut subscription = self.subscribe_for(payment_hash);
        submit.await?;
        let outcome = subscription.wait_for_payment(payment_hash, timeout).await;
        subscription.cancel();
        outcome.into_result(payment_hash)
    }
}

/// A receiving handle registered with an [`EventBroadcaster`].
///
/// Dropping the handle deregisters it.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<LnEvent>>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once cancelled and drained.
    pub async fn recv(&mut self) -> Option<Arc<LnEvent>> {
        self.receiver.recv().await
    }

    /// Wait until an event for `payment_hash` arrives or `timeout` elapses.
    ///
    /// Events for other payments are skipped.
    pub async fn wait_for_payment(&mut self, payment_hash: &str, timeout: Duration) -> PaymentOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            let event = match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    warn!(payment_hash, "Event stream closed while waiting for payment");
                    return PaymentOutcome::TimedOut;
                }
                Err(_) => {
                    warn!(
                        payment_hash,
                        timeout_secs = timeout.as_secs(),
                        "Timed out waiting for payment outcome"
                    );
                    return PaymentOutcome::TimedOut;
                }
            };

            match event.as_ref() {
                LnEvent::PaymentSuccessful {
                    payment_hash: hash,
                    preimage,
                    fee_paid_msat,
                } if hash == payment_hash => {
                    return PaymentOutcome::Succeeded {
                        preimage: preimage.clone(),
                        fee_msat: *fee_paid_msat,
                    };
                }
                LnEvent::PaymentFailed {
                    payment_hash: hash,
                    reason,
                } if hash == payment_hash => {
                    let reason = reason.unwrap_or(PaymentFailureReason::UnexpectedError);
                    debug!(payment_hash, %reason, "Payment failed");
                    return PaymentOutcome::Failed(reason);
                }
                _ => continue,
            }
        }
    }

    /// Deregister and release the buffer.
    pub fn cancel(mut self) {
        self.registry.remove(self.id);
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
