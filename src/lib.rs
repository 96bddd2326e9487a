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

//! # Transfer Engine
//!
//! This library moves funds between two accounts as one atomic,
//! concurrency-safe unit of work: a transfer record, a debit and a credit
//! entry, and both balance changes either all commit or all roll back.
//!
//! ## Core Components
//!
//! - [`Engine`]: Validates transfer requests and drives the unit of work
//! - [`run_in_transaction`]: Commits a group of writes as a whole, or rolls them back
//! - [`lock_order`]: Decides the order in which two balances are locked and changed
//! - [`Store`]: The transactional store interface the engine runs against
//! - [`MemoryStore`]: An in-memory store with row-level locks
//!
//! ## Example
//!
//! ```
//! use transfer_engine_rs::{Context, CreateAccountParams, Engine, MemoryStore, TransferParams};
//!
//! let store = MemoryStore::new();
//! let ctx = Context::background();
//! let alice = store.create_account(&ctx, CreateAccountParams::new("alice", "USD", 100)).unwrap();
//! let bob = store.create_account(&ctx, CreateAccountParams::new("bob", "USD", 50)).unwrap();
//!
//! let engine = Engine::new(store);
//! let result = engine
//!     .transfer(&ctx, TransferParams::new(alice.id, bob.id, 10))
//!     .unwrap();
//!
//! assert_eq!(result.from_account.balance, 90);
//! assert_eq!(result.to_account.balance, 60);
//! assert_eq!(result.from_entry.amount, -10);
//! assert_eq!(result.to_entry.amount, 10);
//! ```
//!
//! ## Thread Safety
//!
//! [`Engine`] is `Sync` whenever its store is. Transfers on disjoint accounts
//! run in parallel; transfers sharing an account wait on that account's row
//! lock, always taken in ascending id order.

pub mod account;
mod base;
pub mod context;
mod engine;
pub mod error;
mod ordering;
pub mod store;
mod transfer;
mod unit_of_work;

pub use account::{Account, CreateAccountParams};
pub use base::{AccountId, EntryId, Record, TransferId};
pub use context::Context;
pub use engine::Engine;
pub use error::{InvalidArgument, StoreError, TransferError};
pub use ordering::lock_order;
pub use store::{FailPoint, MemoryStore, MemoryTx, Queries, Store, StoreConfig, Transaction};
pub use transfer::{
    CreateEntryParams, CreateTransferParams, Entry, Transfer, TransferParams, TransferResult,
};
pub use unit_of_work::run_in_transaction;
