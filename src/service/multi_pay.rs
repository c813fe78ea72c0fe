// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Batched payments.
//!
//! Each item of a `multi_pay_invoice` / `multi_pay_keysend` request runs as
//! its own task through [`Service::execute_payment`] and gets its own
//! response, tagged `d` with the client-supplied id or a fallback derived from
//! the payment target. Items that fail to decode are answered immediately and
//! never block the rest. The request completes once every item has finished.

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::handlers::{decode_params, PaymentTarget};
use super::{RequestContext, Service};
use crate::error::ErrorCode;
use crate::nip47::bolt11::decode_invoice;
use crate::nip47::{
    Method, MultiPayInvoiceElement, MultiPayInvoiceParams, MultiPayKeysendElement,
    MultiPayKeysendParams, Response,
};

/// A batch item that could not be turned into a payment.
#[derive(Debug)]
struct Rejected {
    correlation: String,
    message: String,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Correlation tag for an item that is not even a valid element.
fn raw_fallback(raw: &Value) -> String {
    sha256_hex(raw.to_string().as_bytes())
}

fn decode_invoice_item(raw: Value) -> Result<(String, PaymentTarget), Rejected> {
    let element: MultiPayInvoiceElement =
        serde_json::from_value(raw.clone()).map_err(|e| Rejected {
            correlation: raw_fallback(&raw),
            message: format!("Failed to decode invoice element: {e}"),
        })?;

    let invoice = decode_invoice(&element.invoice).map_err(|e| Rejected {
        correlation: element
            .id
            .clone()
            .unwrap_or_else(|| sha256_hex(element.invoice.as_bytes())),
        message: e.to_string(),
    })?;

    let correlation = element
        .id
        .clone()
        .unwrap_or_else(|| invoice.payment_hash.clone());
    match PaymentTarget::invoice(invoice, element.amount) {
        Ok(target) => Ok((correlation, target)),
        Err(message) => Err(Rejected {
            correlation,
            message,
        }),
    }
}

fn decode_keysend_item(raw: Value) -> Result<(String, PaymentTarget), Rejected> {
    let element: MultiPayKeysendElement =
        serde_json::from_value(raw.clone()).map_err(|e| Rejected {
            correlation: raw_fallback(&raw),
            message: format!("Failed to decode keysend element: {e}"),
        })?;

    let correlation = element
        .id
        .unwrap_or_else(|| element.keysend.pubkey.clone());
    Ok((correlation, PaymentTarget::Keysend(element.keysend)))
}

impl Service {
    pub(crate) async fn multi_pay_invoice(&self, ctx: &RequestContext, params: Value) {
        let method = Method::MultiPayInvoice;
        match decode_params::<MultiPayInvoiceParams>(params) {
            Ok(params) => {
                self.run_batch(ctx, method, params.invoices, decode_invoice_item)
                    .await
            }
            Err(msg) => {
                let response = Response::error(method.as_str(), ErrorCode::Internal, msg);
                self.respond(ctx, &response, None).await;
            }
        }
    }

    pub(crate) async fn multi_pay_keysend(&self, ctx: &RequestContext, params: Value) {
        let method = Method::MultiPayKeysend;
        match decode_params::<MultiPayKeysendParams>(params) {
            Ok(params) => {
                self.run_batch(ctx, method, params.keysends, decode_keysend_item)
                    .await
            }
            Err(msg) => {
                let response = Response::error(method.as_str(), ErrorCode::Internal, msg);
                self.respond(ctx, &response, None).await;
            }
        }
    }

    async fn run_batch<F>(&self, ctx: &RequestContext, method: Method, items: Vec<Value>, decode: F)
    where
        F: Fn(Value) -> Result<(String, PaymentTarget), Rejected>,
    {
        info!(
            app_id = %ctx.app.id,
            request_event_id = %ctx.reply.request_event_id,
            method = %method,
            items = items.len(),
            "Processing batch"
        );

        let mut units = JoinSet::new();
        for raw in items {
            match decode(raw) {
                Ok((correlation, target)) => {
                    let service = self.clone();
                    let ctx = ctx.clone();
                    units.spawn(async move {
                        let response = service.execute_payment(&ctx, method, target).await;
                        service.respond(&ctx, &response, Some(correlation.as_str())).await;
                    });
                }
                Err(rejected) => {
                    warn!(
                        app_id = %ctx.app.id,
                        correlation = %rejected.correlation,
                        error = %rejected.message,
                        "Skipping undecodable batch item"
                    );
                    let response =
                        Response::error(method.as_str(), ErrorCode::Internal, rejected.message);
                    self.respond(ctx, &response, Some(rejected.correlation.as_str()))
                        .await;
                }
            }
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!(app_id = %ctx.app.id, error = %e, "Batch item task panicked");
            }
        }
    }
}
