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

//! In-memory transactional store.
//!
//! Each account row carries its own write lock. A transaction takes the lock
//! the first time it changes a row and keeps it until it commits or rolls
//! back, so two transactions changing the same account run one after the
//! other. Readers never take row locks: outside a transaction they see the
//! last committed snapshot, inside one they also see its own changes.
//!
//! Transfer and entry inserts are buffered in the transaction and published
//! on commit under a store-wide write guard; reads take the shared side of
//! that guard, so a commit is seen whole or not at all. Ids come from sequences and are never reused, including ids
//! handed out to transactions that later rolled back.

use super::{FailPoint, FailPoints, Queries, Store, StoreConfig, Transaction};
use crate::account::{Account, CreateAccountParams};
use crate::base::{AccountId, EntryId, Record, TransferId};
use crate::context::Context;
use crate::error::StoreError;
use crate::transfer::{CreateEntryParams, CreateTransferParams, Entry, Transfer};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest single sleep while waiting for a row lock before the context is
/// checked again.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct AccountRow {
    /// Held by the transaction currently changing this row.
    lock: Arc<Mutex<()>>,
    committed: RwLock<Account>,
}

#[derive(Debug)]
struct Shared {
    config: StoreConfig,
    accounts: DashMap<AccountId, Arc<AccountRow>>,
    transfers: DashMap<TransferId, Transfer>,
    entries: DashMap<EntryId, Entry>,
    account_seq: AtomicI64,
    transfer_seq: AtomicI64,
    entry_seq: AtomicI64,
    tx_seq: AtomicU64,
    fail_points: FailPoints,
    /// Exclusive while a commit publishes, shared for committed reads.
    commit_lock: RwLock<()>,
}

impl Shared {
    fn new(config: StoreConfig) -> Self {
        Self {
            config,
            accounts: DashMap::new(),
            transfers: DashMap::new(),
            entries: DashMap::new(),
            account_seq: AtomicI64::new(1),
            transfer_seq: AtomicI64::new(1),
            entry_seq: AtomicI64::new(1),
            tx_seq: AtomicU64::new(1),
            fail_points: FailPoints::default(),
            commit_lock: RwLock::new(()),
        }
    }

    // The map guard is released before the caller waits on the row lock.
    fn row(&self, id: AccountId) -> Result<Arc<AccountRow>, StoreError> {
        self.accounts
            .get(&id)
            .map(|row| Arc::clone(row.value()))
            .ok_or_else(|| StoreError::not_found(Record::Account, id.0))
    }

    fn committed_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let row = self.row(id)?;
        let _published = self.commit_lock.read();
        let account = row.committed.read().clone();
        Ok(account)
    }

    fn ensure_account(&self, id: AccountId) -> Result<(), StoreError> {
        if self.accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found(Record::Account, id.0))
        }
    }
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::Relaxed)
}

/// Shared handle to an in-memory store. Clones refer to the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.shared.config
    }

    /// Opens an account outside of any transaction.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConstraintViolation`] - The opening balance is negative.
    /// - [`StoreError::Cancelled`] / [`StoreError::DeadlineExceeded`] - The context is done.
    pub fn create_account(
        &self,
        ctx: &Context,
        params: CreateAccountParams,
    ) -> Result<Account, StoreError> {
        ctx.check()?;
        if params.balance < 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "opening balance must not be negative, got {}",
                params.balance
            )));
        }

        let account = Account {
            id: AccountId(next_id(&self.shared.account_seq)),
            owner: params.owner,
            currency: params.currency,
            balance: params.balance,
            created_at: Utc::now(),
        };
        let row = AccountRow {
            lock: Arc::new(Mutex::new(())),
            committed: RwLock::new(account.clone()),
        };
        self.shared.accounts.insert(account.id, Arc::new(row));

        debug!(account = %account.id, balance = account.balance, "account created");
        Ok(account)
    }

    /// Committed snapshots of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        let rows: Vec<Arc<AccountRow>> = self
            .shared
            .accounts
            .iter()
            .map(|row| Arc::clone(row.value()))
            .collect();
        let _published = self.shared.commit_lock.read();
        let mut accounts: Vec<Account> = rows.iter().map(|row| row.committed.read().clone()).collect();
        accounts.sort_by_key(|account| account.id);
        accounts
    }

    pub fn transfer_count(&self) -> usize {
        let _published = self.shared.commit_lock.read();
        self.shared.transfers.len()
    }

    pub fn entry_count(&self) -> usize {
        let _published = self.shared.commit_lock.read();
        self.shared.entries.len()
    }

    /// Makes the `skip + 1`-th next call to `point` fail with
    /// [`StoreError::Injected`].
    pub fn arm_fail_point(&self, point: FailPoint, skip: usize) {
        self.shared.fail_points.arm(point, skip);
    }

    pub fn clear_fail_points(&self) {
        self.shared.fail_points.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    fn begin(&self, ctx: &Context) -> Result<MemoryTx, StoreError> {
        ctx.check()?;
        self.shared.fail_points.trip(FailPoint::Begin)?;
        let id = self.shared.tx_seq.fetch_add(1, Ordering::Relaxed);
        trace!(tx = id, "transaction started");
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            id,
            locked: HashMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
            done: false,
        })
    }

    fn get_account(&self, ctx: &Context, id: AccountId) -> Result<Account, StoreError> {
        ctx.check()?;
        self.shared.committed_account(id)
    }

    fn get_transfer(&self, ctx: &Context, id: TransferId) -> Result<Transfer, StoreError> {
        ctx.check()?;
        let _published = self.shared.commit_lock.read();
        self.shared
            .transfers
            .get(&id)
            .map(|transfer| transfer.value().clone())
            .ok_or_else(|| StoreError::not_found(Record::Transfer, id.0))
    }

    fn get_entry(&self, ctx: &Context, id: EntryId) -> Result<Entry, StoreError> {
        ctx.check()?;
        let _published = self.shared.commit_lock.read();
        self.shared
            .entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(Record::Entry, id.0))
    }

    fn list_entries(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> Result<Vec<Entry>, StoreError> {
        ctx.check()?;
        let _published = self.shared.commit_lock.read();
        let mut entries: Vec<Entry> = self
            .shared
            .entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    fn list_transfers(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> Result<Vec<Transfer>, StoreError> {
        ctx.check()?;
        let _published = self.shared.commit_lock.read();
        let mut transfers: Vec<Transfer> = self
            .shared
            .transfers
            .iter()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .map(|t| t.value().clone())
            .collect();
        transfers.sort_by_key(|transfer| transfer.id);
        Ok(transfers)
    }
}

struct LockedRow {
    row: Arc<AccountRow>,
    /// This transaction's view of the row.
    current: Account,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

/// A transaction against a [`MemoryStore`].
pub struct MemoryTx {
    shared: Arc<Shared>,
    id: u64,
    locked: HashMap<AccountId, LockedRow>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    done: bool,
}

impl MemoryTx {
    /// Locks the row for the rest of the transaction, waiting at most the
    /// lock timeout or whatever is left of the context deadline. The wait is
    /// sliced so a cancelled context ends it early.
    fn lock_row(&mut self, ctx: &Context, id: AccountId) -> Result<&mut LockedRow, StoreError> {
        let shared = &self.shared;
        match self.locked.entry(id) {
            Slot::Occupied(slot) => Ok(slot.into_mut()),
            Slot::Vacant(slot) => {
                let row = shared.row(id)?;
                let lock_timeout = shared.config.lock_timeout;
                let (wait, deadline_bound) = match ctx.remaining() {
                    Some(remaining) if remaining < lock_timeout => (remaining, true),
                    _ => (lock_timeout, false),
                };

                let started = Instant::now();
                let guard = loop {
                    if let Err(err) = ctx.check() {
                        debug!(tx = self.id, account = %id, error = %err, "row lock wait abandoned");
                        return Err(err);
                    }
                    let slice = wait.saturating_sub(started.elapsed()).min(LOCK_POLL_INTERVAL);
                    if let Some(guard) = row.lock.try_lock_arc_for(slice) {
                        break guard;
                    }
                    if started.elapsed() >= wait {
                        debug!(tx = self.id, account = %id, ?wait, "row lock wait expired");
                        return Err(if deadline_bound {
                            StoreError::DeadlineExceeded
                        } else {
                            StoreError::LockTimeout(id)
                        });
                    }
                };
                ctx.check()?;

                let current = row.committed.read().clone();
                trace!(tx = self.id, account = %id, "row locked");
                Ok(slot.insert(LockedRow {
                    row,
                    current,
                    _guard: guard,
                }))
            }
        }
    }

    fn discard(&mut self) {
        self.locked.clear();
        self.transfers.clear();
        self.entries.clear();
        self.done = true;
    }
}

impl Queries for MemoryTx {
    fn get_account(&mut self, ctx: &Context, id: AccountId) -> Result<Account, StoreError> {
        ctx.check()?;
        match self.locked.get(&id) {
            Some(locked) => Ok(locked.current.clone()),
            None => self.shared.committed_account(id),
        }
    }

    fn create_transfer(
        &mut self,
        ctx: &Context,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        ctx.check()?;
        self.shared.fail_points.trip(FailPoint::CreateTransfer)?;
        if params.amount <= 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "transfer amount must be positive, got {}",
                params.amount
            )));
        }
        self.shared.ensure_account(params.from_account_id)?;
        self.shared.ensure_account(params.to_account_id)?;

        let transfer = Transfer {
            id: TransferId(next_id(&self.shared.transfer_seq)),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    fn create_entry(
        &mut self,
        ctx: &Context,
        params: CreateEntryParams,
    ) -> Result<Entry, StoreError> {
        ctx.check()?;
        self.shared.fail_points.trip(FailPoint::CreateEntry)?;
        self.shared.ensure_account(params.account_id)?;

        let entry = Entry {
            id: EntryId(next_id(&self.shared.entry_seq)),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn add_account_balance(
        &mut self,
        ctx: &Context,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        ctx.check()?;
        self.shared.fail_points.trip(FailPoint::AddBalance)?;
        let locked = self.lock_row(ctx, id)?;

        let current = locked.current.balance;
        let balance = current.checked_add(delta).ok_or_else(|| {
            StoreError::ConstraintViolation(format!("balance overflow on account {id}"))
        })?;
        if balance < 0 {
            return Err(StoreError::InsufficientBalance {
                account_id: id,
                balance: current,
                delta,
            });
        }

        locked.current.balance = balance;
        Ok(locked.current.clone())
    }
}

impl Transaction for MemoryTx {
    fn commit(mut self, ctx: &Context) -> Result<(), StoreError> {
        ctx.check()?;
        self.shared.fail_points.trip(FailPoint::Commit)?;

        let publish = self.shared.commit_lock.write();
        for transfer in self.transfers.drain(..) {
            self.shared.transfers.insert(transfer.id, transfer);
        }
        for entry in self.entries.drain(..) {
            self.shared.entries.insert(entry.id, entry);
        }
        for locked in self.locked.values() {
            *locked.row.committed.write() = locked.current.clone();
        }
        drop(publish);
        self.done = true;

        debug!(tx = self.id, rows = self.locked.len(), "transaction committed");
        Ok(())
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        let result = self.shared.fail_points.trip(FailPoint::Rollback);
        self.discard();
        debug!(tx = self.id, "transaction rolled back");
        result
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.done {
            debug!(tx = self.id, "transaction dropped before commit, rolling back");
            self.discard();
        }
    }
}

impl fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTx")
            .field("id", &self.id)
            .field("locked", &self.locked.keys().collect::<Vec<_>>())
            .field("pending_transfers", &self.transfers.len())
            .field("pending_entries", &self.entries.len())
            .field("done", &self.done)
            .finish()
    }
}
