// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared handle over [`WalletDb`] used by every concurrent unit of work.
//!
//! Writes are serialized through a single process-wide lock; reads are
//! unlocked.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::database::{StoreError, StoreResult, WalletDb};
use super::models::{App, AppPermission, NewPayment, Payment, RequestEvent};
use crate::nip47::PermissionScope;

pub struct Repository {
    db: Arc<WalletDb>,
    write_lock: Mutex<()>,
}

impl Repository {
    pub fn new(db: WalletDb) -> Self {
        Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        }
    }

    fn write<T>(&self, op: impl FnOnce(&WalletDb) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        op(&self.db)
    }

    // =========================================================================
    // Apps
    // =========================================================================

    /// Pair a new app together with its initial permissions.
    pub fn create_app(&self, app: &App, permissions: &[AppPermission]) -> StoreResult<()> {
        self.write(|db| {
            db.insert_app(app)?;
            for permission in permissions {
                db.upsert_permission(permission)?;
            }
            Ok(())
        })?;
        tracing::info!(app_id = %app.id, name = %app.name, "App paired");
        Ok(())
    }

    pub fn get_app(&self, app_id: &str) -> StoreResult<Option<App>> {
        self.db.get_app(app_id)
    }

    pub fn find_app_by_pubkey(&self, pubkey: &str) -> StoreResult<Option<App>> {
        self.db.get_app_by_pubkey(pubkey)
    }

    pub fn list_apps(&self) -> StoreResult<Vec<App>> {
        self.db.list_apps()
    }

    pub fn touch_app(&self, app_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.write(|db| db.touch_app(app_id, at))
    }

    /// Revoke an app. Its payments and request events are kept.
    pub fn revoke_app(&self, app_id: &str) -> StoreResult<bool> {
        let removed = self.write(|db| db.delete_app(app_id))?;
        if removed {
            tracing::info!(app_id = %app_id, "App revoked");
        }
        Ok(removed)
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    pub fn set_permission(&self, permission: &AppPermission) -> StoreResult<()> {
        self.write(|db| db.upsert_permission(permission))
    }

    pub fn get_permission(
        &self,
        app_id: &str,
        scope: PermissionScope,
    ) -> StoreResult<Option<AppPermission>> {
        self.db.get_permission(app_id, scope)
    }

    pub fn list_permissions(&self, app_id: &str) -> StoreResult<Vec<AppPermission>> {
        self.db.list_permissions(app_id)
    }

    // =========================================================================
    // Requests & payments
    // =========================================================================

    /// Returns `Ok(false)` if the event id was already stored.
    pub fn record_request(&self, event: &RequestEvent) -> StoreResult<bool> {
        match self.write(|db| db.insert_request_event(event)) {
            Ok(()) => Ok(true),
            Err(StoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_request_event(&self, id: &str) -> StoreResult<Option<RequestEvent>> {
        self.db.get_request_event(id)
    }

    pub fn create_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        self.write(|db| db.create_payment(new))
    }

    pub fn settle_payment(
        &self,
        payment_id: u64,
        preimage: &str,
        fee_msat: Option<u64>,
    ) -> StoreResult<Payment> {
        self.write(|db| db.settle_payment(payment_id, preimage, fee_msat))
    }

    pub fn get_payment(&self, payment_id: u64) -> StoreResult<Option<Payment>> {
        self.db.get_payment(payment_id)
    }

    pub fn list_payments(&self, app_id: &str) -> StoreResult<Vec<Payment>> {
        self.db.list_payments(app_id, None)
    }

    pub fn settled_since(&self, app_id: &str, since: DateTime<Utc>) -> StoreResult<u64> {
        self.db.sum_settled_since(app_id, since)
    }
}
