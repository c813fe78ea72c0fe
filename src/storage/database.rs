// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded wallet-connect database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `apps`: app_id → serialized App
//! - `app_pubkeys`: client pubkey → app_id
//! - `permissions`: `app_id|scope` → serialized AppPermission
//! - `request_events`: transport event id → serialized RequestEvent
//! - `payments`: payment id → serialized Payment
//! - `app_payment_index`: composite key (app_id|created_ms|payment_id) → payment id
//! - `counters`: name → u64 sequence value

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::models::{App, AppPermission, NewPayment, Payment, RequestEvent};
use crate::nip47::PermissionScope;

// =============================================================================
// Table Definitions
// =============================================================================

const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Unique: lowercase hex pubkey → app_id.
const APP_PUBKEYS: TableDefinition<&str, &str> = TableDefinition::new("app_pubkeys");

/// Key format: `app_id|scope`.
const PERMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("permissions");

const REQUEST_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("request_events");

const PAYMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("payments");

/// Key format: `app_id|created_ms_be|payment_id_be` for ascending-time range scans.
const APP_PAYMENT_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("app_payment_index");

const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const PAYMENT_SEQUENCE: &str = "payment_seq";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Key Helpers
// =============================================================================

fn permission_key(app_id: &str, scope: PermissionScope) -> String {
    format!("{app_id}|{}", scope.as_str())
}

/// Half-open string range covering every `app_id|...` key.
///
/// `}` sorts directly after `|`, so `app_id}` bounds the prefix.
fn permission_range(app_id: &str) -> (String, String) {
    (format!("{app_id}|"), format!("{app_id}}}"))
}

fn timestamp_ms(at: DateTime<Utc>) -> u64 {
    at.timestamp_millis().max(0) as u64
}

fn payment_index_key(app_id: &str, created_at: DateTime<Utc>, payment_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(app_id.len() + 1 + 8 + 8);
    key.extend_from_slice(app_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&timestamp_ms(created_at).to_be_bytes());
    key.extend_from_slice(&payment_id.to_be_bytes());
    key
}

/// Lower bound for payments of `app_id` created at or after `since`.
fn payment_index_start(app_id: &str, since: Option<DateTime<Utc>>) -> Vec<u8> {
    let mut key = Vec::with_capacity(app_id.len() + 1 + 8);
    key.extend_from_slice(app_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&since.map(timestamp_ms).unwrap_or(0).to_be_bytes());
    key
}

fn payment_index_end(app_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(app_id.len() + 1 + 17);
    end.extend_from_slice(app_id.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 17]);
    end
}

// =============================================================================
// WalletDb
// =============================================================================

/// Embedded ACID store for apps, permissions, requests and payments.
pub struct WalletDb {
    db: Database,
}

impl WalletDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(APPS)?;
            let _ = write_txn.open_table(APP_PUBKEYS)?;
            let _ = write_txn.open_table(PERMISSIONS)?;
            let _ = write_txn.open_table(REQUEST_EVENTS)?;
            let _ = write_txn.open_table(PAYMENTS)?;
            let _ = write_txn.open_table(APP_PAYMENT_INDEX)?;
            let _ = write_txn.open_table(COUNTERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // =========================================================================
    // Apps
    // =========================================================================

    /// Insert a new app. Fails if the pubkey is already paired.
    pub fn insert_app(&self, app: &App) -> StoreResult<()> {
        let json = serde_json::to_vec(app)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut pubkeys = write_txn.open_table(APP_PUBKEYS)?;
            if pubkeys.get(app.pubkey.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "App with pubkey {}",
                    app.pubkey
                )));
            }
            pubkeys.insert(app.pubkey.as_str(), app.id.as_str())?;

            let mut apps = write_txn.open_table(APPS)?;
            apps.insert(app.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_app(&self, app_id: &str) -> StoreResult<Option<App>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPS)?;
        match table.get(app_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve the app paired with a client pubkey.
    pub fn get_app_by_pubkey(&self, pubkey: &str) -> StoreResult<Option<App>> {
        let pubkey = pubkey.to_lowercase();
        let read_txn = self.db.begin_read()?;
        let pubkeys = read_txn.open_table(APP_PUBKEYS)?;
        let Some(app_id) = pubkeys.get(pubkey.as_str())? else {
            return Ok(None);
        };
        let apps = read_txn.open_table(APPS)?;
        let app_id = app_id.value().to_string();
        match apps.get(app_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_apps(&self) -> StoreResult<Vec<App>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPS)?;
        let mut apps = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            apps.push(serde_json::from_slice(value.value())?);
        }
        Ok(apps)
    }

    /// Record when the app last sent a request.
    pub fn touch_app(&self, app_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(APPS)?;
            let existing_bytes = {
                let existing = table
                    .get(app_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("App {app_id}")))?;
                existing.value().to_vec()
            };

            let mut app: App = serde_json::from_slice(&existing_bytes)?;
            app.last_event_at = Some(at);

            let json = serde_json::to_vec(&app)?;
            table.insert(app_id, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Revoke an app: removes the app, its pubkey mapping and permissions.
    ///
    /// Payments and request events stay behind for auditing.
    pub fn delete_app(&self, app_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut apps = write_txn.open_table(APPS)?;
            let removed = apps.remove(app_id)?.map(|v| v.value().to_vec());
            match removed {
                Some(bytes) => {
                    let app: App = serde_json::from_slice(&bytes)?;
                    let mut pubkeys = write_txn.open_table(APP_PUBKEYS)?;
                    pubkeys.remove(app.pubkey.as_str())?;

                    let mut perms = write_txn.open_table(PERMISSIONS)?;
                    let (start, end) = permission_range(app_id);
                    let keys = perms
                        .range(start.as_str()..end.as_str())?
                        .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for key in keys {
                        perms.remove(key.as_str())?;
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Insert or replace the permission for `(app_id, scope)`.
    pub fn upsert_permission(&self, permission: &AppPermission) -> StoreResult<()> {
        let key = permission_key(&permission.app_id, permission.scope);
        let json = serde_json::to_vec(permission)?;
        let write_txn = self.db.begin_write()?;
        {
            let apps = write_txn.open_table(APPS)?;
            if apps.get(permission.app_id.as_str())?.is_none() {
                return Err(StoreError::NotFound(format!("App {}", permission.app_id)));
            }
            let mut table = write_txn.open_table(PERMISSIONS)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_permission(
        &self,
        app_id: &str,
        scope: PermissionScope,
    ) -> StoreResult<Option<AppPermission>> {
        let key = permission_key(app_id, scope);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_permissions(&self, app_id: &str) -> StoreResult<Vec<AppPermission>> {
        let (start, end) = permission_range(app_id);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS)?;
        let mut permissions = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            permissions.push(serde_json::from_slice(value.value())?);
        }
        Ok(permissions)
    }

    // =========================================================================
    // Request events
    // =========================================================================

    /// Insert a request event. Fails with `AlreadyExists` on a duplicate id.
    pub fn insert_request_event(&self, event: &RequestEvent) -> StoreResult<()> {
        let json = serde_json::to_vec(event)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REQUEST_EVENTS)?;
            if table.get(event.id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "Request event {}",
                    event.id
                )));
            }
            table.insert(event.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_request_event(&self, id: &str) -> StoreResult<Option<RequestEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUEST_EVENTS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Record a pending payment and assign it the next sequence id.
    pub fn create_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        let payment = {
            let mut counters = write_txn.open_table(COUNTERS)?;
            let id = counters
                .get(PAYMENT_SEQUENCE)?
                .map(|v| v.value())
                .unwrap_or(0)
                + 1;
            counters.insert(PAYMENT_SEQUENCE, id)?;

            let payment = Payment {
                id,
                app_id: new.app_id,
                request_event_id: new.request_event_id,
                payment_request: new.payment_request,
                destination: new.destination,
                payment_hash: new.payment_hash,
                amount_msat: new.amount_msat,
                preimage: None,
                fee_msat: None,
                created_at: now,
                updated_at: now,
            };

            let json = serde_json::to_vec(&payment)?;
            let mut payments = write_txn.open_table(PAYMENTS)?;
            payments.insert(id, json.as_slice())?;

            let key = payment_index_key(&payment.app_id, payment.created_at, id);
            let mut index = write_txn.open_table(APP_PAYMENT_INDEX)?;
            index.insert(key.as_slice(), id)?;

            payment
        };
        write_txn.commit()?;
        Ok(payment)
    }

    /// Mark a payment settled.
    pub fn settle_payment(
        &self,
        payment_id: u64,
        preimage: &str,
        fee_msat: Option<u64>,
    ) -> StoreResult<Payment> {
        let write_txn = self.db.begin_write()?;
        let payment = {
            let mut table = write_txn.open_table(PAYMENTS)?;
            let existing_bytes = {
                let existing = table
                    .get(payment_id)?
                    .ok_or_else(|| StoreError::NotFound(format!("Payment {payment_id}")))?;
                existing.value().to_vec()
            };

            let mut payment: Payment = serde_json::from_slice(&existing_bytes)?;
            payment.preimage = Some(preimage.to_string());
            payment.fee_msat = fee_msat;
            payment.updated_at = Utc::now();

            let json = serde_json::to_vec(&payment)?;
            table.insert(payment_id, json.as_slice())?;
            payment
        };
        write_txn.commit()?;
        Ok(payment)
    }

    pub fn get_payment(&self, payment_id: u64) -> StoreResult<Option<Payment>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PAYMENTS)?;
        match table.get(payment_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Payments of an app created at or after `since`, oldest first.
    pub fn list_payments(
        &self,
        app_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Payment>> {
        let start = payment_index_start(app_id, since);
        let end = payment_index_end(app_id);

        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(APP_PAYMENT_INDEX)?;
        let payments = read_txn.open_table(PAYMENTS)?;

        let mut results = Vec::new();
        for entry in index.range(start.as_slice()..end.as_slice())? {
            let (_, id) = entry?;
            if let Some(value) = payments.get(id.value())? {
                results.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(results)
    }

    /// Total settled amount (msat) of an app's payments created at or after `since`.
    pub fn sum_settled_since(&self, app_id: &str, since: DateTime<Utc>) -> StoreResult<u64> {
        let total = self
            .list_payments(app_id, Some(since))?
            .iter()
            .filter(|p| p.is_settled() && p.created_at >= since)
            .fold(0u64, |acc, p| acc.saturating_add(p.amount_msat));
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BudgetRenewal;
    use chrono::Duration;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, WalletDb) {
        let dir = tempdir().unwrap();
        let db = WalletDb::open(&dir.path().join("nwc.redb")).unwrap();
        (dir, db)
    }

    fn new_payment(app_id: &str, amount_msat: u64) -> NewPayment {
        NewPayment {
            app_id: app_id.to_string(),
            request_event_id: "evt".to_string(),
            payment_request: Some("lnbcrt1".to_string()),
            destination: None,
            payment_hash: None,
            amount_msat,
        }
    }

    #[test]
    fn app_lookup_by_pubkey() {
        let (_dir, db) = open_db();
        let app = App::new("alby", "AA".repeat(32));
        db.insert_app(&app).unwrap();

        let found = db.get_app_by_pubkey(&"aa".repeat(32)).unwrap().unwrap();
        assert_eq!(found.id, app.id);
        assert!(db.get_app_by_pubkey(&"bb".repeat(32)).unwrap().is_none());
        assert_eq!(db.list_apps().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_pubkey_is_rejected() {
        let (_dir, db) = open_db();
        db.insert_app(&App::new("one", "aa")).unwrap();
        let err = db.insert_app(&App::new("two", "aa")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn touch_app_sets_last_event() {
        let (_dir, db) = open_db();
        let app = App::new("one", "aa");
        db.insert_app(&app).unwrap();

        let at = Utc::now();
        db.touch_app(&app.id, at).unwrap();
        assert_eq!(db.get_app(&app.id).unwrap().unwrap().last_event_at, Some(at));

        assert!(matches!(
            db.touch_app("missing", at),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn permissions_are_scoped_per_app() {
        let (_dir, db) = open_db();
        let a = App::new("a", "aa");
        let b = App::new("b", "bb");
        db.insert_app(&a).unwrap();
        db.insert_app(&b).unwrap();

        db.upsert_permission(&AppPermission::new(&a.id, PermissionScope::GetBalance))
            .unwrap();
        db.upsert_permission(
            &AppPermission::new(&a.id, PermissionScope::PayInvoice)
                .with_budget(1_000, BudgetRenewal::Daily),
        )
        .unwrap();
        db.upsert_permission(&AppPermission::new(&b.id, PermissionScope::GetInfo))
            .unwrap();

        assert_eq!(db.list_permissions(&a.id).unwrap().len(), 2);
        assert_eq!(db.list_permissions(&b.id).unwrap().len(), 1);

        let pay = db
            .get_permission(&a.id, PermissionScope::PayInvoice)
            .unwrap()
            .unwrap();
        assert_eq!(pay.max_amount_msat, 1_000);
        assert!(db
            .get_permission(&b.id, PermissionScope::PayInvoice)
            .unwrap()
            .is_none());
    }

    #[test]
    fn permission_for_unknown_app_is_rejected() {
        let (_dir, db) = open_db();
        let err = db
            .upsert_permission(&AppPermission::new("ghost", PermissionScope::GetInfo))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_app_keeps_payments() {
        let (_dir, db) = open_db();
        let app = App::new("a", "aa");
        db.insert_app(&app).unwrap();
        db.upsert_permission(&AppPermission::new(&app.id, PermissionScope::PayInvoice))
            .unwrap();
        let payment = db.create_payment(new_payment(&app.id, 500)).unwrap();

        assert!(db.delete_app(&app.id).unwrap());
        assert!(!db.delete_app(&app.id).unwrap());

        assert!(db.get_app(&app.id).unwrap().is_none());
        assert!(db.get_app_by_pubkey("aa").unwrap().is_none());
        assert!(db.list_permissions(&app.id).unwrap().is_empty());
        assert!(db.get_payment(payment.id).unwrap().is_some());

        // The key can be paired again
        db.insert_app(&App::new("again", "aa")).unwrap();
    }

    #[test]
    fn request_events_are_unique() {
        let (_dir, db) = open_db();
        let event = RequestEvent {
            id: "abc".into(),
            app_id: None,
            content: String::new(),
            received_at: Utc::now(),
        };
        db.insert_request_event(&event).unwrap();
        assert!(matches!(
            db.insert_request_event(&event),
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(db.get_request_event("abc").unwrap().unwrap(), event);
    }

    #[test]
    fn payment_ids_are_sequential_and_settle() {
        let (_dir, db) = open_db();
        let first = db.create_payment(new_payment("app", 100)).unwrap();
        let second = db.create_payment(new_payment("app", 200)).unwrap();
        assert_eq!(second.id, first.id + 1);
        assert!(!first.is_settled());

        let settled = db.settle_payment(first.id, "pre", Some(3)).unwrap();
        assert_eq!(settled.preimage.as_deref(), Some("pre"));
        assert_eq!(settled.fee_msat, Some(3));
        assert!(matches!(
            db.settle_payment(999, "pre", None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn sum_only_counts_settled_payments_in_window() {
        let (_dir, db) = open_db();
        let start = Utc::now() - Duration::seconds(1);

        let a = db.create_payment(new_payment("app", 600)).unwrap();
        db.create_payment(new_payment("app", 700)).unwrap();
        let other = db.create_payment(new_payment("other", 900)).unwrap();
        db.settle_payment(a.id, "p1", None).unwrap();
        db.settle_payment(other.id, "p2", None).unwrap();

        assert_eq!(db.sum_settled_since("app", start).unwrap(), 600);
        assert_eq!(db.sum_settled_since("other", start).unwrap(), 900);
        assert_eq!(
            db.sum_settled_since("app", Utc::now() + Duration::hours(1))
                .unwrap(),
            0
        );
        assert_eq!(db.list_payments("app", None).unwrap().len(), 2);
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nwc.redb");
        let app = App::new("a", "aa");
        {
            let db = WalletDb::open(&path).unwrap();
            db.insert_app(&app).unwrap();
            db.create_payment(new_payment(&app.id, 1)).unwrap();
        }
        let db = WalletDb::open(&path).unwrap();
        assert!(db.get_app(&app.id).unwrap().is_some());
        let next = db.create_payment(new_payment(&app.id, 1)).unwrap();
        assert_eq!(next.id, 2);
    }
}
