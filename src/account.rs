// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Account rows as seen by the transfer engine.
//!
//! Accounts are created by account management; the engine only reads them
//! and moves their balance through
//! [`Queries::add_account_balance`](crate::store::Queries::add_account_balance).
//!
//! # Example
//!
//! ```
//! use transfer_engine_rs::{Context, CreateAccountParams, MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let ctx = Context::background();
//! let account = store
//!     .create_account(&ctx, CreateAccountParams::new("alice", "USD", 100))
//!     .unwrap();
//! assert_eq!(store.get_account(&ctx, account.id).unwrap().balance, 100);
//! ```

use crate::base::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an account row.
///
/// `balance` is expressed in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub currency: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: String,
    pub balance: i64,
}

impl CreateAccountParams {
    pub fn new(owner: impl Into<String>, currency: impl Into<String>, balance: i64) -> Self {
        Self {
            owner: owner.into(),
            currency: currency.into(),
            balance,
        }
    }
}
