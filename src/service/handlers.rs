// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-method handlers and the shared payment pipeline.
//!
//! Every handler decodes its params, authorizes, calls the backend and turns
//! the outcome into a [`Response`]. Nothing here publishes; the dispatcher
//! (or the batch orchestrator) does.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{RequestContext, Service};
use crate::analytics::{AnalyticsEvent, AnalyticsEventType};
use crate::error::ErrorCode;
use crate::lnclient::{LnClientError, PaymentSent};
use crate::nip47::bolt11::{decode_invoice, DecodedInvoice};
use crate::nip47::{
    BalanceResult, GetInfoResult, KeysendParams, ListTransactionsParams, ListTransactionsResult,
    LookupInvoiceParams, MakeInvoiceParams, Method, PayInvoiceParams, PayResult, PermissionScope,
    Response,
};
use crate::permissions::AuthorizationDecision;
use crate::storage::NewPayment;

/// Default `make_invoice` expiry in seconds.
pub(crate) const DEFAULT_INVOICE_EXPIRY_SECS: u64 = 86_400;

/// What a payment unit pays.
#[derive(Debug, Clone)]
pub(crate) enum PaymentTarget {
    Invoice {
        invoice: DecodedInvoice,
        /// Amount for invoices that carry none.
        amount_override: Option<u64>,
    },
    Keysend(KeysendParams),
}

impl PaymentTarget {
    /// Resolve the invoice amount, falling back to the caller supplied one.
    pub(crate) fn invoice(invoice: DecodedInvoice, amount: Option<u64>) -> Result<Self, String> {
        match (invoice.amount_msat, amount) {
            (Some(_), _) => Ok(PaymentTarget::Invoice {
                invoice,
                amount_override: None,
            }),
            (None, Some(amount)) if amount > 0 => Ok(PaymentTarget::Invoice {
                invoice,
                amount_override: Some(amount),
            }),
            (None, _) => Err("Invoice has no amount and none was provided".to_string()),
        }
    }

    pub(crate) fn amount_msat(&self) -> u64 {
        match self {
            PaymentTarget::Invoice {
                invoice,
                amount_override,
            } => invoice.amount_msat.or(*amount_override).unwrap_or(0),
            PaymentTarget::Keysend(params) => params.amount,
        }
    }

    fn is_keysend(&self) -> bool {
        matches!(self, PaymentTarget::Keysend(_))
    }

    fn new_payment(&self, ctx: &RequestContext) -> NewPayment {
        let (payment_request, destination, payment_hash) = match self {
            PaymentTarget::Invoice { invoice, .. } => (
                Some(invoice.bolt11.clone()),
                None,
                Some(invoice.payment_hash.clone()),
            ),
            PaymentTarget::Keysend(params) => (None, Some(params.pubkey.clone()), None),
        };
        NewPayment {
            app_id: ctx.app.id.clone(),
            request_event_id: ctx.reply.request_event_id.clone(),
            payment_request,
            destination,
            payment_hash,
            amount_msat: self.amount_msat(),
        }
    }
}

pub(crate) fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    // Requests without params arrive as `null`
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| format!("Failed to decode params: {e}"))
}

impl Service {
    /// `Some(response)` if the request must stop here.
    fn check(
        &self,
        ctx: &RequestContext,
        method: Method,
        amount_msat: u64,
    ) -> Option<Response> {
        match self
            .permissions
            .authorize(&ctx.app, method.permission_scope(), amount_msat)
        {
            Ok(AuthorizationDecision::Allowed) => None,
            Ok(AuthorizationDecision::Denied { code, message }) => {
                info!(
                    app_id = %ctx.app.id,
                    method = %method,
                    amount_msat,
                    code = %code,
                    "Request not authorized"
                );
                Some(Response::error(method.as_str(), code, message))
            }
            Err(e) => {
                error!(app_id = %ctx.app.id, error = %e, "Authorization lookup failed");
                Some(Response::error(
                    method.as_str(),
                    ErrorCode::Internal,
                    "Failed to check permissions",
                ))
            }
        }
    }

    fn backend_error(method: Method, e: LnClientError) -> Response {
        match e {
            LnClientError::NotFound(what) => {
                Response::error(method.as_str(), ErrorCode::NotFound, what)
            }
            other => Response::error(method.as_str(), ErrorCode::Internal, other.to_string()),
        }
    }

    pub(crate) async fn get_balance(&self, ctx: &RequestContext) -> Response {
        let method = Method::GetBalance;
        if let Some(denied) = self.check(ctx, method, 0) {
            return denied;
        }

        let balance = match self.ln_client.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(app_id = %ctx.app.id, error = %e, "Failed to fetch balance");
                return Self::backend_error(method, e);
            }
        };

        let mut result = BalanceResult {
            balance,
            max_amount: None,
            budget_renewal: None,
        };
        match self
            .repo
            .get_permission(&ctx.app.id, PermissionScope::PayInvoice)
        {
            Ok(Some(pay)) if pay.max_amount_msat > 0 => {
                result.max_amount = Some(pay.max_amount_msat);
                result.budget_renewal = Some(pay.budget_renewal);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(app_id = %ctx.app.id, error = %e, "Failed to load budget for balance hints");
            }
        }

        Response::success(method.as_str(), &result)
    }

    pub(crate) async fn get_info(&self, ctx: &RequestContext) -> Response {
        let method = Method::GetInfo;
        if let Some(denied) = self.check(ctx, method, 0) {
            return denied;
        }

        let info = match self.ln_client.get_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!(app_id = %ctx.app.id, error = %e, "Failed to fetch node info");
                return Self::backend_error(method, e);
            }
        };

        let granted = match self.repo.list_permissions(&ctx.app.id) {
            Ok(permissions) => permissions,
            Err(e) => {
                error!(app_id = %ctx.app.id, error = %e, "Failed to list permissions");
                return Response::error(method.as_str(), ErrorCode::Internal, e.to_string());
            }
        };
        let methods = Method::ALL
            .iter()
            .filter(|m| granted.iter().any(|p| p.scope == m.permission_scope()))
            .map(|m| m.as_str().to_string())
            .collect();

        Response::success(
            method.as_str(),
            &GetInfoResult {
                alias: info.alias,
                color: info.color,
                pubkey: info.pubkey,
                network: info.network,
                block_height: info.block_height,
                block_hash: info.block_hash,
                methods,
            },
        )
    }

    pub(crate) async fn make_invoice(&self, ctx: &RequestContext, params: Value) -> Response {
        let method = Method::MakeInvoice;
        let params: MakeInvoiceParams = match decode_params(params) {
            Ok(params) => params,
            Err(msg) => return Response::error(method.as_str(), ErrorCode::Internal, msg),
        };
        if let Some(denied) = self.check(ctx, method, 0) {
            return denied;
        }

        let expiry = match params.expiry {
            0 => DEFAULT_INVOICE_EXPIRY_SECS,
            secs => secs,
        };
        match self
            .ln_client
            .make_invoice(
                params.amount,
                &params.description,
                &params.description_hash,
                expiry,
            )
            .await
        {
            Ok(transaction) => {
                info!(
                    app_id = %ctx.app.id,
                    payment_hash = %transaction.payment_hash,
                    amount_msat = params.amount,
                    "Invoice created"
                );
                Response::success(method.as_str(), &transaction)
            }
            Err(e) => {
                warn!(app_id = %ctx.app.id, error = %e, "Failed to create invoice");
                Self::backend_error(method, e)
            }
        }
    }

    pub(crate) async fn lookup_invoice(&self, ctx: &RequestContext, params: Value) -> Response {
        let method = Method::LookupInvoice;
        let params: LookupInvoiceParams = match decode_params(params) {
            Ok(params) => params,
            Err(msg) => return Response::error(method.as_str(), ErrorCode::Internal, msg),
        };

        let payment_hash = match (params.payment_hash, params.invoice) {
            (Some(hash), _) if !hash.is_empty() => hash,
            (_, Some(invoice)) if !invoice.is_empty() => match decode_invoice(&invoice) {
                Ok(decoded) => decoded.payment_hash,
                Err(e) => return Response::error(method.as_str(), ErrorCode::Internal, e.to_string()),
            },
            _ => {
                return Response::error(
                    method.as_str(),
                    ErrorCode::Internal,
                    "Either payment_hash or invoice is required",
                )
            }
        };

        if let Some(denied) = self.check(ctx, method, 0) {
            return denied;
        }

        match self.ln_client.lookup_invoice(&payment_hash).await {
            Ok(transaction) => Response::success(method.as_str(), &transaction),
            Err(e) => {
                info!(app_id = %ctx.app.id, payment_hash = %payment_hash, error = %e, "Invoice lookup failed");
                Self::backend_error(method, e)
            }
        }
    }

    pub(crate) async fn list_transactions(&self, ctx: &RequestContext, params: Value) -> Response {
        let method = Method::ListTransactions;
        let params: ListTransactionsParams = match decode_params(params) {
            Ok(params) => params,
            Err(msg) => return Response::error(method.as_str(), ErrorCode::Internal, msg),
        };
        if let Some(denied) = self.check(ctx, method, 0) {
            return denied;
        }

        match self.ln_client.list_transactions(&params).await {
            Ok(transactions) => {
                Response::success(method.as_str(), &ListTransactionsResult { transactions })
            }
            Err(e) => {
                warn!(app_id = %ctx.app.id, error = %e, "Failed to list transactions");
                Self::backend_error(method, e)
            }
        }
    }

    pub(crate) async fn pay_invoice(&self, ctx: &RequestContext, params: Value) -> Response {
        let method = Method::PayInvoice;
        let params: PayInvoiceParams = match decode_params(params) {
            Ok(params) => params,
            Err(msg) => return Response::error(method.as_str(), ErrorCode::Internal, msg),
        };
        let target = decode_invoice(&params.invoice)
            .map_err(|e| e.to_string())
            .and_then(|invoice| PaymentTarget::invoice(invoice, params.amount));

        match target {
            Ok(target) => self.execute_payment(ctx, method, target).await,
            Err(msg) => {
                info!(app_id = %ctx.app.id, error = %msg, "Rejected invoice");
                Response::error(method.as_str(), ErrorCode::Internal, msg)
            }
        }
    }

    pub(crate) async fn pay_keysend(&self, ctx: &RequestContext, params: Value) -> Response {
        let method = Method::PayKeysend;
        match decode_params::<KeysendParams>(params) {
            Ok(params) => {
                self.execute_payment(ctx, method, PaymentTarget::Keysend(params))
                    .await
            }
            Err(msg) => Response::error(method.as_str(), ErrorCode::Internal, msg),
        }
    }

    /// Authorize, record, pay, settle, report.
    ///
    /// The pending payment row is written before the backend is called and is
    /// left pending when the payment fails or its outcome is unknown.
    pub(crate) async fn execute_payment(
        &self,
        ctx: &RequestContext,
        method: Method,
        target: PaymentTarget,
    ) -> Response {
        let amount_msat = target.amount_msat();
        if let Some(denied) = self.check(ctx, method, amount_msat) {
            return denied;
        }

        let payment = match self.repo.create_payment(target.new_payment(ctx)) {
            Ok(payment) => payment,
            Err(e) => {
                error!(
                    app_id = %ctx.app.id,
                    request_event_id = %ctx.reply.request_event_id,
                    error = %e,
                    "Failed to record pending payment"
                );
                return Response::error(
                    method.as_str(),
                    ErrorCode::Internal,
                    "Failed to record payment",
                );
            }
        };

        info!(
            app_id = %ctx.app.id,
            payment_id = payment.id,
            amount_msat,
            keysend = target.is_keysend(),
            "Sending payment"
        );

        let sent = match &target {
            PaymentTarget::Invoice {
                invoice,
                amount_override,
            } => {
                self.ln_client
                    .send_payment(&invoice.bolt11, *amount_override)
                    .await
            }
            PaymentTarget::Keysend(params) => {
                self.ln_client
                    .send_keysend(
                        params.amount,
                        &params.pubkey,
                        params.preimage.as_deref(),
                        &params.tlv_records,
                    )
                    .await
            }
        };

        let analytics = |event: AnalyticsEventType| {
            AnalyticsEvent::new(event)
                .with("app_id", ctx.app.id.clone())
                .with("amount_msat", amount_msat)
                .with("multi", matches!(method, Method::MultiPayInvoice | Method::MultiPayKeysend))
                .with("keysend", target.is_keysend())
        };

        match sent {
            Ok(PaymentSent { preimage, fee_msat }) => {
                if let Err(e) = self.repo.settle_payment(payment.id, &preimage, fee_msat) {
                    error!(payment_id = payment.id, error = %e, "Failed to record settled payment");
                }
                info!(app_id = %ctx.app.id, payment_id = payment.id, "Payment sent");
                self.sink.publish(analytics(AnalyticsEventType::PaymentSucceeded));
                Response::success(
                    method.as_str(),
                    &PayResult {
                        preimage,
                        fees_paid: fee_msat,
                    },
                )
            }
            Err(LnClientError::PaymentTimeout { payment_hash }) => {
                warn!(
                    app_id = %ctx.app.id,
                    payment_id = payment.id,
                    payment_hash = %payment_hash,
                    "Payment outcome unknown"
                );
                self.sink.publish(
                    analytics(AnalyticsEventType::PaymentInDoubt).with("payment_hash", payment_hash),
                );
                Response::error(
                    method.as_str(),
                    ErrorCode::PaymentInDoubt,
                    "Timed out waiting for the payment to complete; it may still succeed",
                )
            }
            Err(e) => {
                info!(app_id = %ctx.app.id, payment_id = payment.id, error = %e, "Payment failed");
                self.sink.publish(
                    analytics(AnalyticsEventType::PaymentFailed).with("reason", e.to_string()),
                );
                Response::error(
                    method.as_str(),
                    ErrorCode::Internal,
                    format!("Failed to send payment: {e}"),
                )
            }
        }
    }
}
