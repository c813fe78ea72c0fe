// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Analytics events for payment and channel activity.
//!
//! Events are fire-and-forget: sinks must not block and must not fail the
//! operation that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Types of analytics events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    // Outgoing payments
    PaymentSucceeded,
    PaymentFailed,
    PaymentInDoubt,

    // Incoming payments
    PaymentReceived,

    // Channel lifecycle
    ChannelReady,
    ChannelClosed,
}

impl AnalyticsEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEventType::PaymentSucceeded => "payment_succeeded",
            AnalyticsEventType::PaymentFailed => "payment_failed",
            AnalyticsEventType::PaymentInDoubt => "payment_in_doubt",
            AnalyticsEventType::PaymentReceived => "payment_received",
            AnalyticsEventType::ChannelReady => "channel_ready",
            AnalyticsEventType::ChannelClosed => "channel_closed",
        }
    }
}

/// A single analytics event with a free-form property bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event: AnalyticsEventType,
    /// Additional properties.
    pub properties: Map<String, Value>,
}

impl AnalyticsEvent {
    /// Create a new analytics event.
    pub fn new(event: AnalyticsEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
            properties: Map::new(),
        }
    }

    /// Add a property.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for analytics events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: AnalyticsEvent);
}

/// Sink that emits each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: AnalyticsEvent) {
        let properties = Value::Object(event.properties);
        tracing::info!(
            target: "analytics",
            event_id = %event.event_id,
            event = event.event.as_str(),
            properties = %properties,
            "Analytics event"
        );
    }
}
