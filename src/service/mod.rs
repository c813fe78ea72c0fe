// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Service
//!
//! Receives signed request events from the relay, authorizes them, executes
//! them against the Lightning backend and publishes encrypted responses.
//!
//! ## Request lifecycle
//!
//! ```text
//! Received -> Decoded -> Authorized -> Executed -> Responded
//! ```
//!
//! Any failure short-circuits to `Responded` with an error payload. The only
//! requests that get no reply are those that fail validation or decryption,
//! since there is no readable request to answer.
//!
//! ## Modules
//!
//! - `handlers` - single-method handlers and the shared payment pipeline
//! - `multi_pay` - batched invoice and keysend payments

mod handlers;
mod multi_pay;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analytics::EventSink;
use crate::config::GatewayConfig;
use crate::error::{ErrorCode, GatewayResult};
use crate::event_pump::EventPump;
use crate::lnclient::{EventBroadcaster, LnClient, LnEvent};
use crate::nip47::envelope::{tag, Envelope, Event, Keys};
use crate::nip47::{
    Method, Request, Response, INFO_EVENT_KIND, PAYMENT_RECEIVED_NOTIFICATION, REQUEST_KIND,
    RESPONSE_KIND,
};
use crate::notifier::Notifier;
use crate::permissions::PermissionEngine;
use crate::relay::Relay;
use crate::storage::{App, Repository, RequestEvent, WalletDb};

/// Where a response goes.
#[derive(Debug, Clone)]
pub(crate) struct ReplyTo {
    pub client_pubkey: String,
    pub request_event_id: String,
}

/// An accepted request from a paired app.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub app: App,
    pub reply: ReplyTo,
}

/// The wallet-connect request processor. Cheap to clone.
#[derive(Clone)]
pub struct Service {
    repo: Arc<Repository>,
    permissions: Arc<PermissionEngine>,
    envelope: Arc<Envelope>,
    ln_client: Arc<dyn LnClient>,
    relay: Arc<dyn Relay>,
    sink: Arc<dyn EventSink>,
    client_pubkey: Option<String>,
}

impl Service {
    pub fn new(
        repo: Arc<Repository>,
        envelope: Arc<Envelope>,
        ln_client: Arc<dyn LnClient>,
        relay: Arc<dyn Relay>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            permissions: Arc::new(PermissionEngine::new(repo.clone())),
            repo,
            envelope,
            ln_client,
            relay,
            sink,
            client_pubkey: None,
        }
    }

    /// Open the database and derive the service identity from `config`.
    pub fn from_config(
        config: &GatewayConfig,
        ln_client: Arc<dyn LnClient>,
        relay: Arc<dyn Relay>,
        sink: Arc<dyn EventSink>,
    ) -> GatewayResult<Self> {
        let db = WalletDb::open(&config.database_path())?;
        let keys = Keys::from_hex(&config.secret_key)?;
        let envelope = Envelope::new(keys, config.secret_cache_size);

        let service = Self::new(
            Arc::new(Repository::new(db)),
            Arc::new(envelope),
            ln_client,
            relay,
            sink,
        );
        Ok(match &config.client_pubkey {
            Some(pubkey) => service.with_client_pubkey(pubkey),
            None => service,
        })
    }

    /// Only accept requests signed by `pubkey`.
    pub fn with_client_pubkey(mut self, pubkey: &str) -> Self {
        self.client_pubkey = Some(pubkey.to_lowercase());
        self
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn public_key(&self) -> &str {
        self.envelope.public_key()
    }

    /// Notification publisher sharing this service's identity and relay.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(
            self.permissions.clone(),
            self.repo.clone(),
            self.envelope.clone(),
            self.ln_client.clone(),
            self.relay.clone(),
        )
    }

    /// Pump that forwards backend events into `broadcaster`, analytics and notifications.
    pub fn event_pump(
        &self,
        events: mpsc::Receiver<LnEvent>,
        broadcaster: EventBroadcaster,
    ) -> EventPump {
        EventPump::new(events, broadcaster, self.notifier(), self.sink.clone())
    }

    /// Publish the info event advertising supported methods.
    pub async fn publish_info(&self) -> GatewayResult<Event> {
        let tags = vec![tag("notifications", PAYMENT_RECEIVED_NOTIFICATION)];
        let event = self
            .envelope
            .keys()
            .sign_event(INFO_EVENT_KIND, tags, Method::capabilities())?;
        self.relay.publish(&event).await?;
        info!(event_id = %event.id, "Published info event");
        Ok(event)
    }

    /// Process inbound events until `shutdown` fires or the channel closes.
    ///
    /// Each event is handled on its own task. In-flight requests are allowed
    /// to finish before this returns.
    pub async fn run(self, mut inbound: mpsc::Receiver<Event>, shutdown: CancellationToken) {
        info!(pubkey = %self.public_key(), "Wallet service starting");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Wallet service shutting down");
                    break;
                }
                event = inbound.recv() => match event {
                    Some(event) => {
                        let service = self.clone();
                        tasks.spawn(async move { service.handle_event(event).await });
                    }
                    None => {
                        info!("Inbound event stream closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Request task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Request task panicked");
            }
        }
    }

    /// Handle one inbound relay event end to end.
    pub async fn handle_event(&self, event: Event) {
        let event_id = event.id.clone();
        if let Err(e) = self.process_event(event).await {
            error!(request_event_id = %event_id, error = %e, "Failed to process request");
        }
    }

    async fn process_event(&self, event: Event) -> GatewayResult<()> {
        if !self.accepts(&event) {
            return Ok(());
        }

        let content = match self.envelope.decrypt(&event.pubkey, &event.content) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    request_event_id = %event.id,
                    sender = %event.pubkey,
                    error = %e,
                    "Failed to decrypt request, dropping"
                );
                return Ok(());
            }
        };

        let app = self.repo.find_app_by_pubkey(&event.pubkey)?;
        let stored = RequestEvent {
            id: event.id.clone(),
            app_id: app.as_ref().map(|a| a.id.clone()),
            content: content.clone(),
            received_at: Utc::now(),
        };
        if !self.repo.record_request(&stored)? {
            debug!(request_event_id = %event.id, "Request already processed");
            return Ok(());
        }

        let reply = ReplyTo {
            client_pubkey: event.pubkey.to_lowercase(),
            request_event_id: event.id.clone(),
        };
        let request = serde_json::from_str::<Request>(&content);
        let result_type = request
            .as_ref()
            .map(|r| r.method.clone())
            .unwrap_or_default();

        let Some(app) = app else {
            warn!(sender = %reply.client_pubkey, "Request from unpaired key");
            let response = Response::error(
                result_type,
                ErrorCode::Unauthorized,
                "The public key does not have a wallet connected",
            );
            self.respond_to(&reply, &response, None).await;
            return Ok(());
        };

        self.repo.touch_app(&app.id, Utc::now())?;

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(app_id = %app.id, error = %e, "Malformed request content");
                let response =
                    Response::error(result_type, ErrorCode::Internal, format!("Invalid request: {e}"));
                self.respond_to(&reply, &response, None).await;
                return Ok(());
            }
        };

        let method = match request.method.parse::<Method>() {
            Ok(method) => method,
            Err(_) => {
                info!(app_id = %app.id, method = %request.method, "Unknown method");
                let response = Response::error(
                    &request.method,
                    ErrorCode::NotImplemented,
                    format!("Unknown method: {}", request.method),
                );
                self.respond_to(&reply, &response, None).await;
                return Ok(());
            }
        };

        info!(
            app_id = %app.id,
            request_event_id = %reply.request_event_id,
            method = %method,
            "Processing request"
        );

        let ctx = RequestContext { app, reply };
        self.dispatch(ctx, method, request.params).await;
        Ok(())
    }

    /// Kind, addressee, author and signature checks.
    fn accepts(&self, event: &Event) -> bool {
        if event.kind != REQUEST_KIND {
            debug!(request_event_id = %event.id, kind = event.kind, "Ignoring event kind");
            return false;
        }

        let addressed = event
            .tag_value("p")
            .is_some_and(|p| p.eq_ignore_ascii_case(self.public_key()));
        if !addressed {
            debug!(request_event_id = %event.id, "Event not addressed to this wallet");
            return false;
        }

        if let Some(only) = &self.client_pubkey {
            if !event.pubkey.eq_ignore_ascii_case(only) {
                warn!(request_event_id = %event.id, sender = %event.pubkey, "Event from foreign client");
                return false;
            }
        }

        if let Err(e) = event.verify() {
            warn!(request_event_id = %event.id, error = %e, "Invalid event signature");
            return false;
        }
        true
    }

    async fn dispatch(&self, ctx: RequestContext, method: Method, params: serde_json::Value) {
        let response = match method {
            Method::GetBalance => self.get_balance(&ctx).await,
            Method::GetInfo => self.get_info(&ctx).await,
            Method::MakeInvoice => self.make_invoice(&ctx, params).await,
            Method::LookupInvoice => self.lookup_invoice(&ctx, params).await,
            Method::ListTransactions => self.list_transactions(&ctx, params).await,
            Method::PayInvoice => self.pay_invoice(&ctx, params).await,
            Method::PayKeysend => self.pay_keysend(&ctx, params).await,
            Method::MultiPayInvoice => {
                self.multi_pay_invoice(&ctx, params).await;
                return;
            }
            Method::MultiPayKeysend => {
                self.multi_pay_keysend(&ctx, params).await;
                return;
            }
        };
        self.respond(&ctx, &response, None).await;
    }

    pub(crate) async fn respond(
        &self,
        ctx: &RequestContext,
        response: &Response,
        correlation: Option<&str>,
    ) {
        self.respond_to(&ctx.reply, response, correlation).await;
    }

    /// Encrypt, sign and publish a response. Failures are logged.
    pub(crate) async fn respond_to(
        &self,
        reply: &ReplyTo,
        response: &Response,
        correlation: Option<&str>,
    ) {
        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                return;
            }
        };

        let mut tags = vec![tag("e", reply.request_event_id.as_str())];
        if let Some(d) = correlation {
            tags.push(tag("d", d));
        }

        let event = match self
            .envelope
            .seal(RESPONSE_KIND, &reply.client_pubkey, &payload, tags)
        {
            Ok(event) => event,
            Err(e) => {
                error!(
                    request_event_id = %reply.request_event_id,
                    error = %e,
                    "Failed to seal response"
                );
                return;
            }
        };

        match self.relay.publish(&event).await {
            Ok(()) => debug!(
                request_event_id = %reply.request_event_id,
                response_event_id = %event.id,
                result_type = %response.result_type,
                error_code = ?response.error_code(),
                "Published response"
            ),
            Err(e) => error!(
                request_event_id = %reply.request_event_id,
                error = %e,
                "Failed to publish response"
            ),
        }
    }
}
