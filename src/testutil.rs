// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles: a scripted Lightning backend, a recording relay and a
//! recording analytics sink, plus a harness wiring them into a [`Service`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use crate::analytics::{AnalyticsEvent, AnalyticsEventType, EventSink};
use crate::lnclient::{
    EventBroadcaster, LnClient, LnClientError, LnEvent, NodeInfo, PaymentFailureReason,
    PaymentSent,
};
use crate::nip47::bolt11::decode_invoice;
use crate::nip47::envelope::{decrypt, Envelope, Event, Keys};
use crate::nip47::{
    ListTransactionsParams, PermissionScope, Response, TlvRecord, Transaction, REQUEST_KIND,
    RESPONSE_KIND,
};
use crate::relay::{Relay, RelayError};
use crate::service::Service;
use crate::storage::{App, AppPermission, BudgetRenewal, Repository, WalletDb};

// =============================================================================
// Lightning backend
// =============================================================================

/// How the scripted backend resolves a payment.
#[derive(Debug, Clone)]
pub enum PaymentBehavior {
    Succeed,
    Fail(PaymentFailureReason),
    /// Never report an outcome.
    Hang,
    /// Reject synchronously before anything is submitted.
    Error(String),
}

/// Backend that reports payment outcomes through an [`EventBroadcaster`].
pub struct MockLnClient {
    pub broadcaster: EventBroadcaster,
    pub timeout: Duration,
    pub balance: u64,
    invoices: Mutex<HashMap<String, Transaction>>,
    behaviors: Mutex<HashMap<String, PaymentBehavior>>,
    sent: Mutex<Vec<String>>,
}

impl MockLnClient {
    pub fn new(broadcaster: EventBroadcaster) -> Self {
        Self {
            timeout: broadcaster.payment_timeout(),
            broadcaster,
            balance: 21_000_000,
            invoices: Mutex::new(HashMap::new()),
            behaviors: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Script the outcome for a payment hash or keysend destination.
    pub fn script(&self, key: &str, behavior: PaymentBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(key.to_string(), behavior);
    }

    pub fn add_invoice(&self, transaction: Transaction) {
        self.invoices
            .lock()
            .unwrap()
            .insert(transaction.payment_hash.clone(), transaction);
    }

    /// Correlation keys of every submitted payment.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn preimage_for(key: &str) -> String {
        format!("preimage-{key}")
    }

    async fn pay(&self, key: String) -> Result<PaymentSent, LnClientError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or(PaymentBehavior::Succeed);

        if let PaymentBehavior::Error(msg) = &behavior {
            return Err(LnClientError::Backend(msg.clone()));
        }

        let broadcaster = self.broadcaster.clone();
        let sent = &self.sent;
        let hash = key.clone();
        self.broadcaster
            .await_payment(&key, self.timeout, async move {
                sent.lock().unwrap().push(hash.clone());
                let event = match behavior {
                    PaymentBehavior::Succeed => Some(LnEvent::PaymentSuccessful {
                        preimage: Self::preimage_for(&hash),
                        payment_hash: hash,
                        fee_paid_msat: Some(1),
                    }),
                    PaymentBehavior::Fail(reason) => Some(LnEvent::PaymentFailed {
                        payment_hash: hash,
                        reason: Some(reason),
                    }),
                    PaymentBehavior::Hang | PaymentBehavior::Error(_) => None,
                };
                if let Some(event) = event {
                    tokio::spawn(async move {
                        broadcaster.publish(event);
                    });
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl LnClient for MockLnClient {
    async fn get_balance(&self) -> Result<u64, LnClientError> {
        Ok(self.balance)
    }

    async fn get_info(&self) -> Result<NodeInfo, LnClientError> {
        Ok(NodeInfo {
            alias: "mock".into(),
            color: "#3399ff".into(),
            pubkey: "02".repeat(33),
            network: "regtest".into(),
            block_height: 800_000,
            block_hash: "00".repeat(32),
        })
    }

    async fn make_invoice(
        &self,
        amount_msat: u64,
        description: &str,
        description_hash: &str,
        expiry_secs: u64,
    ) -> Result<Transaction, LnClientError> {
        let created_at = chrono::Utc::now().timestamp();
        let transaction = Transaction {
            kind: "incoming".into(),
            invoice: format!("lnbcrt{amount_msat}"),
            description: description.to_string(),
            description_hash: description_hash.to_string(),
            payment_hash: format!("{:064x}", amount_msat),
            amount: amount_msat,
            created_at,
            expires_at: Some(created_at + expiry_secs as i64),
            ..Default::default()
        };
        self.add_invoice(transaction.clone());
        Ok(transaction)
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<Transaction, LnClientError> {
        self.invoices
            .lock()
            .unwrap()
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| LnClientError::NotFound(format!("invoice {payment_hash}")))
    }

    async fn list_transactions(
        &self,
        params: &ListTransactionsParams,
    ) -> Result<Vec<Transaction>, LnClientError> {
        let mut transactions: Vec<Transaction> =
            self.invoices.lock().unwrap().values().cloned().collect();
        transactions.sort_by_key(|t| t.created_at);
        if let Some(limit) = params.limit {
            transactions.truncate(limit as usize);
        }
        Ok(transactions)
    }

    async fn send_payment(
        &self,
        invoice: &str,
        _amount_msat: Option<u64>,
    ) -> Result<PaymentSent, LnClientError> {
        let decoded = decode_invoice(invoice).map_err(|e| LnClientError::Backend(e.to_string()))?;
        self.pay(decoded.payment_hash).await
    }

    async fn send_keysend(
        &self,
        _amount_msat: u64,
        destination: &str,
        _preimage: Option<&str>,
        _tlv_records: &[TlvRecord],
    ) -> Result<PaymentSent, LnClientError> {
        self.pay(destination.to_string()).await
    }
}

// =============================================================================
// Relay & analytics
// =============================================================================

#[derive(Default)]
pub struct RecordingRelay {
    published: Mutex<Vec<Event>>,
    rejected_recipients: Mutex<HashSet<String>>,
}

impl RecordingRelay {
    pub fn events(&self) -> Vec<Event> {
        self.published.lock().unwrap().clone()
    }

    /// Fail every publish addressed to `pubkey`.
    pub fn reject_recipient(&self, pubkey: &str) {
        self.rejected_recipients
            .lock()
            .unwrap()
            .insert(pubkey.to_string());
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn publish(&self, event: &Event) -> Result<(), RelayError> {
        let recipient = event.tag_value("p").unwrap_or_default().to_string();
        if self.rejected_recipients.lock().unwrap().contains(&recipient) {
            return Err(RelayError::Rejected {
                event_id: event.id.clone(),
                reason: "blocked".into(),
            });
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingSink {
    pub fn of_type(&self, event: AnalyticsEventType) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: AnalyticsEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A service wired to test doubles, with one paired client app.
pub struct Harness {
    _dir: TempDir,
    pub service: Service,
    pub repo: Arc<Repository>,
    pub ln: Arc<MockLnClient>,
    pub relay: Arc<RecordingRelay>,
    pub sink: Arc<RecordingSink>,
    pub broadcaster: EventBroadcaster,
    pub client: Envelope,
    pub app: App,
}

impl Harness {
    pub fn new(permissions: &[(PermissionScope, u64, BudgetRenewal)]) -> Self {
        Self::with_backend(permissions, |ln| ln)
    }

    pub fn with_backend(
        permissions: &[(PermissionScope, u64, BudgetRenewal)],
        configure: impl FnOnce(MockLnClient) -> MockLnClient,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::open(&dir.path().join("nwc.redb")).unwrap();
        let repo = Arc::new(Repository::new(db));

        let broadcaster = EventBroadcaster::new(64);
        let ln = Arc::new(configure(MockLnClient::new(broadcaster.clone())));
        let relay = Arc::new(RecordingRelay::default());
        let sink = Arc::new(RecordingSink::default());
        let service_envelope = Arc::new(Envelope::new(Keys::generate().unwrap(), 16));

        let service = Service::new(
            repo.clone(),
            service_envelope,
            ln.clone(),
            relay.clone(),
            sink.clone(),
        );

        let client = Envelope::new(Keys::generate().unwrap(), 4);
        let app = App::new("test app", client.public_key());
        let perms: Vec<AppPermission> = permissions
            .iter()
            .map(|(scope, max, renewal)| {
                AppPermission::new(&app.id, *scope).with_budget(*max, *renewal)
            })
            .collect();
        repo.create_app(&app, &perms).unwrap();

        Self {
            _dir: dir,
            service,
            repo,
            ln,
            relay,
            sink,
            broadcaster,
            client,
            app,
        }
    }

    /// Pair another client with the given permissions.
    pub fn pair(&self, name: &str, scopes: &[PermissionScope]) -> (Envelope, App) {
        let client = Envelope::new(Keys::generate().unwrap(), 4);
        let app = App::new(name, client.public_key());
        let perms: Vec<AppPermission> = scopes
            .iter()
            .map(|scope| AppPermission::new(&app.id, *scope))
            .collect();
        self.repo.create_app(&app, &perms).unwrap();
        (client, app)
    }

    /// A signed, encrypted request from `client` to the service.
    pub fn request_from(&self, client: &Envelope, method: &str, params: Value) -> Event {
        let payload = serde_json::json!({"method": method, "params": params}).to_string();
        client
            .seal(REQUEST_KIND, self.service.public_key(), &payload, Vec::new())
            .unwrap()
    }

    pub fn request(&self, method: &str, params: Value) -> Event {
        self.request_from(&self.client, method, params)
    }

    /// Send a request and return the responses published for it.
    pub async fn call(&self, method: &str, params: Value) -> Vec<(Event, Response)> {
        let event = self.request(method, params);
        self.service.handle_event(event.clone()).await;
        self.responses_to(&self.client, &event.id)
    }

    /// Decrypted responses to `request_id` addressed to `client`.
    pub fn responses_to(&self, client: &Envelope, request_id: &str) -> Vec<(Event, Response)> {
        self.relay
            .events()
            .into_iter()
            .filter(|e| e.kind == RESPONSE_KIND && e.tag_value("e") == Some(request_id))
            .filter(|e| e.tag_value("p") == Some(client.public_key()))
            .map(|e| {
                let plaintext = Self::open(client, self.service.public_key(), &e.content);
                let response: Response = serde_json::from_str(&plaintext).unwrap();
                (e, response)
            })
            .collect()
    }

    pub fn open(client: &Envelope, sender: &str, content: &str) -> String {
        let secret = client.shared_secret(sender).unwrap();
        decrypt(&secret, content).unwrap()
    }
}
