// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state of the gateway, kept in a single redb file.
//!
//! ## Layout
//!
//! - `models` - apps, permissions, request events and payments
//! - `database` - table definitions and transactional operations
//! - `repository` - shared handle that serializes writes
//!
//! ## Important Notes
//!
//! - Every write goes through [`Repository`], never [`WalletDb`] directly
//! - Revoking an app keeps its payments and request events

pub mod database;
pub mod models;
pub mod repository;

pub use database::{StoreError, StoreResult, WalletDb};
pub use models::{App, AppPermission, BudgetRenewal, NewPayment, Payment, RequestEvent};
pub use repository::Repository;
