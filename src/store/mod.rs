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

//! Store interfaces consumed by the engine.
//!
//! [`Store`] opens transactions and serves committed reads. [`Queries`] is
//! the set of operations available inside one transaction, and
//! [`Transaction`] ends it. Writes made through a transaction are invisible
//! outside it until [`Transaction::commit`] returns.

mod memory;

pub use memory::{MemoryStore, MemoryTx};

use crate::account::Account;
use crate::base::{AccountId, EntryId, TransferId};
use crate::context::Context;
use crate::error::StoreError;
use crate::transfer::{CreateEntryParams, CreateTransferParams, Entry, Transfer};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Operations available inside a transaction.
pub trait Queries {
    /// Reads an account, including changes made earlier in this transaction.
    fn get_account(&mut self, ctx: &Context, id: AccountId) -> Result<Account, StoreError>;

    fn create_transfer(
        &mut self,
        ctx: &Context,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError>;

    fn create_entry(&mut self, ctx: &Context, params: CreateEntryParams)
    -> Result<Entry, StoreError>;

    /// Adds `delta` to the account balance as one indivisible step and
    /// returns the updated row.
    ///
    /// The row stays locked until the transaction ends. A result below zero
    /// fails with [`StoreError::InsufficientBalance`].
    fn add_account_balance(
        &mut self,
        ctx: &Context,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError>;
}

/// An open transaction.
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction: Queries {
    fn commit(self, ctx: &Context) -> Result<(), StoreError>;

    /// Discards every write. Runs even when the context is done.
    fn rollback(self) -> Result<(), StoreError>;
}

pub trait Store: Send + Sync {
    type Tx: Transaction;

    fn begin(&self, ctx: &Context) -> Result<Self::Tx, StoreError>;

    fn get_account(&self, ctx: &Context, id: AccountId) -> Result<Account, StoreError>;

    fn get_transfer(&self, ctx: &Context, id: TransferId) -> Result<Transfer, StoreError>;

    fn get_entry(&self, ctx: &Context, id: EntryId) -> Result<Entry, StoreError>;

    /// Committed entries of one account, oldest first.
    fn list_entries(&self, ctx: &Context, account_id: AccountId)
    -> Result<Vec<Entry>, StoreError>;

    /// Committed transfers with the account on either side, oldest first.
    fn list_transfers(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> Result<Vec<Transfer>, StoreError>;
}

/// Store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Longest a transaction waits for a row lock before giving up.
    pub lock_timeout: Duration,
}

impl StoreConfig {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Store operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    CreateTransfer,
    CreateEntry,
    AddBalance,
    Commit,
    Rollback,
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailPoint::Begin => "begin",
            FailPoint::CreateTransfer => "create_transfer",
            FailPoint::CreateEntry => "create_entry",
            FailPoint::AddBalance => "add_account_balance",
            FailPoint::Commit => "commit",
            FailPoint::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    point: FailPoint,
    /// Hits to let through before failing.
    skip: usize,
}

/// One-shot failure injection shared by a store and its transactions.
#[derive(Debug, Default)]
pub(crate) struct FailPoints {
    any: AtomicBool,
    armed: Mutex<Vec<Armed>>,
}

impl FailPoints {
    pub(crate) fn arm(&self, point: FailPoint, skip: usize) {
        self.armed.lock().push(Armed { point, skip });
        self.any.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.armed.lock().clear();
        self.any.store(false, Ordering::SeqCst);
    }

    /// Fails if `point` is armed and its skip count is used up.
    pub(crate) fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        if !self.any.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut armed = self.armed.lock();
        let Some(index) = armed.iter().position(|a| a.point == point) else {
            return Ok(());
        };
        if armed[index].skip > 0 {
            armed[index].skip -= 1;
            return Ok(());
        }
        armed.remove(index);
        if armed.is_empty() {
            self.any.store(false, Ordering::SeqCst);
        }
        Err(StoreError::Injected(point))
    }
}
