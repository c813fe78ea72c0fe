// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Permission and budget engine.
//!
//! Decides whether an app may invoke a method for a given amount. Budget
//! usage is recomputed from settled payments on every check; there is no
//! cached counter and no reservation, so concurrent checks against the same
//! window can jointly overspend it.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::error::ErrorCode;
use crate::nip47::PermissionScope;
use crate::storage::{App, AppPermission, BudgetRenewal, Repository, StoreResult};

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationDecision {
    Allowed,
    Denied { code: ErrorCode, message: String },
}

impl AuthorizationDecision {
    fn denied(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Denied {
            code,
            message: message.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allowed)
    }
}

/// Start of the renewal window containing `now`, or `None` for `never`.
///
/// Windows are anchored at `anchor` (the app's creation time). Daily and
/// weekly windows are fixed multiples of 24 h / 7 d; monthly and yearly
/// windows advance by calendar months with the day clamped to month end.
pub fn budget_window_start(
    renewal: BudgetRenewal,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if now <= anchor {
        return match renewal {
            BudgetRenewal::Never => None,
            _ => Some(anchor),
        };
    }

    match renewal {
        BudgetRenewal::Never => None,
        BudgetRenewal::Daily => Some(fixed_window_start(anchor, now, Duration::days(1))),
        BudgetRenewal::Weekly => Some(fixed_window_start(anchor, now, Duration::weeks(1))),
        BudgetRenewal::Monthly => Some(calendar_window_start(anchor, now, 1)),
        BudgetRenewal::Yearly => Some(calendar_window_start(anchor, now, 12)),
    }
}

fn fixed_window_start(anchor: DateTime<Utc>, now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let elapsed = (now - anchor).num_milliseconds();
    let periods = elapsed / period.num_milliseconds();
    anchor + Duration::milliseconds(periods * period.num_milliseconds())
}

fn calendar_window_start(anchor: DateTime<Utc>, now: DateTime<Utc>, step_months: u32) -> DateTime<Utc> {
    let months_between = (month_index(now) - month_index(anchor)).max(0) as u32;
    let mut steps = months_between / step_months;

    loop {
        let candidate = anchor
            .checked_add_months(Months::new(steps * step_months))
            .unwrap_or(anchor);
        if candidate <= now || steps == 0 {
            return candidate;
        }
        steps -= 1;
    }
}

fn month_index(at: DateTime<Utc>) -> i64 {
    i64::from(at.year()) * 12 + i64::from(at.month0())
}

/// Evaluates requests against stored permissions and payment history.
pub struct PermissionEngine {
    repo: Arc<Repository>,
}

impl PermissionEngine {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub fn authorize(
        &self,
        app: &App,
        scope: PermissionScope,
        amount_msat: u64,
    ) -> StoreResult<AuthorizationDecision> {
        self.authorize_at(app, scope, amount_msat, Utc::now())
    }

    /// Check order: permission exists, app not expired, per-call max, window budget.
    pub fn authorize_at(
        &self,
        app: &App,
        scope: PermissionScope,
        amount_msat: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<AuthorizationDecision> {
        let Some(permission) = self.repo.get_permission(&app.id, scope)? else {
            return Ok(AuthorizationDecision::denied(
                ErrorCode::Restricted,
                format!("This app does not have permission to request {scope}"),
            ));
        };

        if app.is_expired_at(now) {
            return Ok(AuthorizationDecision::denied(
                ErrorCode::Expired,
                "This app has expired",
            ));
        }

        self.check_budget(app, &permission, amount_msat, now)
    }

    fn check_budget(
        &self,
        app: &App,
        permission: &AppPermission,
        amount_msat: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<AuthorizationDecision> {
        let max = permission.max_amount_msat;
        if max == 0 {
            return Ok(AuthorizationDecision::Allowed);
        }

        if amount_msat > max {
            return Ok(AuthorizationDecision::denied(
                ErrorCode::QuotaExceeded,
                format!("Amount {amount_msat} msat exceeds the maximum of {max} msat"),
            ));
        }

        let Some(window_start) = budget_window_start(permission.budget_renewal, app.created_at, now)
        else {
            return Ok(AuthorizationDecision::Allowed);
        };

        let used = self.repo.settled_since(&app.id, window_start)?;
        if used.saturating_add(amount_msat) > max {
            tracing::debug!(
                app_id = %app.id,
                used_msat = used,
                amount_msat,
                max_msat = max,
                renewal = %permission.budget_renewal,
                "Budget exhausted"
            );
            return Ok(AuthorizationDecision::denied(
                ErrorCode::QuotaExceeded,
                format!(
                    "Insufficient budget: {} msat left in the current {} window",
                    max.saturating_sub(used),
                    permission.budget_renewal
                ),
            ));
        }

        Ok(AuthorizationDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewPayment, WalletDb};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: Arc<Repository>,
        engine: PermissionEngine,
        app: App,
    }

    fn fixture(permissions: impl FnOnce(&str) -> Vec<AppPermission>) -> Fixture {
        let dir = tempdir().unwrap();
        let db = WalletDb::open(&dir.path().join("nwc.redb")).unwrap();
        let repo = Arc::new(Repository::new(db));

        let mut app = App::new("test", "aa");
        app.created_at = Utc::now() - Duration::hours(1);
        repo.create_app(&app, &permissions(&app.id)).unwrap();

        Fixture {
            _dir: dir,
            engine: PermissionEngine::new(repo.clone()),
            repo,
            app,
        }
    }

    fn settle(repo: &Repository, app_id: &str, amount_msat: u64) {
        let payment = repo
            .create_payment(NewPayment {
                app_id: app_id.into(),
                request_event_id: "evt".into(),
                payment_request: None,
                destination: None,
                payment_hash: None,
                amount_msat,
            })
            .unwrap();
        repo.settle_payment(payment.id, "pre", None).unwrap();
    }

    fn code(decision: AuthorizationDecision) -> Option<ErrorCode> {
        match decision {
            AuthorizationDecision::Allowed => None,
            AuthorizationDecision::Denied { code, .. } => Some(code),
        }
    }

    #[test]
    fn daily_windows_are_anchored_at_creation() {
        let anchor = at(2026, 1, 1, 15);
        assert_eq!(
            budget_window_start(BudgetRenewal::Daily, anchor, at(2026, 1, 3, 10)),
            Some(at(2026, 1, 2, 15))
        );
        assert_eq!(
            budget_window_start(BudgetRenewal::Daily, anchor, at(2026, 1, 3, 15)),
            Some(at(2026, 1, 3, 15))
        );
        assert_eq!(
            budget_window_start(BudgetRenewal::Weekly, anchor, at(2026, 1, 20, 0)),
            Some(at(2026, 1, 15, 15))
        );
        assert_eq!(
            budget_window_start(BudgetRenewal::Never, anchor, at(2026, 1, 20, 0)),
            None
        );
    }

    #[test]
    fn monthly_windows_clamp_to_month_end() {
        let anchor = at(2026, 1, 31, 12);
        assert_eq!(
            budget_window_start(BudgetRenewal::Monthly, anchor, at(2026, 3, 1, 0)),
            Some(at(2026, 2, 28, 12))
        );
        assert_eq!(
            budget_window_start(BudgetRenewal::Monthly, anchor, at(2026, 2, 15, 0)),
            Some(anchor)
        );
        assert_eq!(
            budget_window_start(BudgetRenewal::Yearly, anchor, at(2028, 1, 30, 0)),
            Some(at(2027, 1, 31, 12))
        );
    }

    #[test]
    fn window_before_anchor_starts_at_anchor() {
        let anchor = at(2026, 5, 1, 0);
        assert_eq!(
            budget_window_start(BudgetRenewal::Daily, anchor, at(2026, 4, 1, 0)),
            Some(anchor)
        );
    }

    #[test]
    fn missing_permission_is_restricted() {
        let f = fixture(|id| vec![AppPermission::new(id, PermissionScope::GetBalance)]);
        let decision = f
            .engine
            .authorize(&f.app, PermissionScope::PayInvoice, 0)
            .unwrap();
        assert_eq!(code(decision), Some(ErrorCode::Restricted));

        let decision = f
            .engine
            .authorize(&f.app, PermissionScope::GetBalance, 0)
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn expired_app_is_rejected() {
        let f = fixture(|id| vec![AppPermission::new(id, PermissionScope::GetInfo)]);
        let expired = f.app.clone().with_expiry(Utc::now() - Duration::minutes(1));
        let decision = f
            .engine
            .authorize(&expired, PermissionScope::GetInfo, 0)
            .unwrap();
        assert_eq!(code(decision), Some(ErrorCode::Expired));
    }

    #[test]
    fn per_call_maximum_is_inclusive() {
        let f = fixture(|id| {
            vec![AppPermission::new(id, PermissionScope::PayInvoice)
                .with_budget(1_000, BudgetRenewal::Never)]
        });

        let exact = f
            .engine
            .authorize(&f.app, PermissionScope::PayInvoice, 1_000)
            .unwrap();
        assert!(exact.is_allowed());

        let over = f
            .engine
            .authorize(&f.app, PermissionScope::PayInvoice, 1_001)
            .unwrap();
        assert_eq!(code(over), Some(ErrorCode::QuotaExceeded));
    }

    #[test]
    fn never_renewal_ignores_history() {
        let f = fixture(|id| {
            vec![AppPermission::new(id, PermissionScope::PayInvoice)
                .with_budget(1_000, BudgetRenewal::Never)]
        });
        settle(&f.repo, &f.app.id, 900);
        let decision = f
            .engine
            .authorize(&f.app, PermissionScope::PayInvoice, 900)
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn daily_budget_rolls_over() {
        let f = fixture(|id| {
            vec![AppPermission::new(id, PermissionScope::PayInvoice)
                .with_budget(1_000, BudgetRenewal::Daily)]
        });

        let now = Utc::now();
        let first = f
            .engine
            .authorize_at(&f.app, PermissionScope::PayInvoice, 600, now)
            .unwrap();
        assert!(first.is_allowed());
        settle(&f.repo, &f.app.id, 600);

        let second = f
            .engine
            .authorize_at(&f.app, PermissionScope::PayInvoice, 600, now)
            .unwrap();
        assert_eq!(code(second), Some(ErrorCode::QuotaExceeded));

        let remaining = f
            .engine
            .authorize_at(&f.app, PermissionScope::PayInvoice, 400, now)
            .unwrap();
        assert!(remaining.is_allowed());

        let next_day = f
            .engine
            .authorize_at(&f.app, PermissionScope::PayInvoice, 600, now + Duration::days(1))
            .unwrap();
        assert!(next_day.is_allowed());
    }

    #[test]
    fn pending_payments_do_not_count() {
        let f = fixture(|id| {
            vec![AppPermission::new(id, PermissionScope::PayInvoice)
                .with_budget(1_000, BudgetRenewal::Weekly)]
        });
        f.repo
            .create_payment(NewPayment {
                app_id: f.app.id.clone(),
                request_event_id: "evt".into(),
                payment_request: None,
                destination: None,
                payment_hash: None,
                amount_msat: 900,
            })
            .unwrap();

        let decision = f
            .engine
            .authorize(&f.app, PermissionScope::PayInvoice, 900)
            .unwrap();
        assert!(decision.is_allowed());
    }
}
