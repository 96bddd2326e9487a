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

//! Transfer orchestration.
//!
//! The [`Engine`] validates a transfer request and runs it as one unit of
//! work against its [`Store`]:
//!
//! 1. Insert the transfer record.
//! 2. Insert the debit entry on the source account.
//! 3. Insert the credit entry on the destination account.
//! 4. Apply both balance deltas, lower account id first.
//!
//! A failure at any step rolls back the previous ones.
//!
//! # Thread Safety
//!
//! The engine holds no locks of its own. Concurrent transfers are serialized
//! by the store's row locks, and because every transfer locks its two rows
//! in ascending id order, transfers over the same pair of accounts in
//! opposite directions cannot deadlock.

use crate::account::Account;
use crate::base::{AccountId, EntryId, TransferId};
use crate::context::Context;
use crate::error::TransferError;
use crate::ordering::lock_order;
use crate::store::{MemoryStore, Queries, Store};
use crate::transfer::{
    CreateEntryParams, CreateTransferParams, Entry, Transfer, TransferParams, TransferResult,
};
use crate::unit_of_work::run_in_transaction;
use tracing::{debug, info, info_span, warn};

/// Moves funds between accounts of a [`Store`].
///
/// # Invariants
///
/// - Every committed transfer has exactly two entries that sum to zero.
/// - Balances only change inside a unit of work, through
///   [`Queries::add_account_balance`].
/// - Balance deltas are applied in ascending account id order.
pub struct Engine<S: Store> {
    store: S,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S) -> Self {
        Engine { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Moves `params.amount` from the source to the destination account.
    ///
    /// The caller is expected to have checked currency, ownership and
    /// available funds. A debit that would still take the source below zero
    /// fails the transfer.
    ///
    /// # Errors
    ///
    /// - [`TransferError::InvalidArgument`] - Non-positive amount or account id, or source equals
    ///   destination. Nothing is sent to the store.
    /// - [`TransferError::NotFound`] - One of the accounts does not exist.
    /// - [`TransferError::Transaction`] - The store failed, the context was cancelled or expired,
    ///   a row lock timed out, or the source balance is insufficient.
    /// - [`TransferError::Rollback`] - One of the above, and the rollback failed as well.
    pub fn transfer(
        &self,
        ctx: &Context,
        params: TransferParams,
    ) -> Result<TransferResult, TransferError> {
        params.validate()?;

        let span = info_span!(
            "transfer",
            from = %params.from_account_id,
            to = %params.to_account_id,
            amount = params.amount
        );
        let _enter = span.enter();
        debug!("starting transfer");

        let result = run_in_transaction(&self.store, ctx, |tx| execute_transfer(tx, ctx, params));

        match &result {
            Ok(done) => info!(transfer_id = %done.transfer.id, "transfer committed"),
            Err(err) => warn!(error = %err, "transfer aborted"),
        }
        result
    }

    pub fn get_account(&self, ctx: &Context, id: AccountId) -> Result<Account, TransferError> {
        Ok(self.store.get_account(ctx, id)?)
    }

    pub fn get_transfer(&self, ctx: &Context, id: TransferId) -> Result<Transfer, TransferError> {
        Ok(self.store.get_transfer(ctx, id)?)
    }

    pub fn get_entry(&self, ctx: &Context, id: EntryId) -> Result<Entry, TransferError> {
        Ok(self.store.get_entry(ctx, id)?)
    }

    pub fn list_entries(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> Result<Vec<Entry>, TransferError> {
        Ok(self.store.list_entries(ctx, account_id)?)
    }

    pub fn list_transfers(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> Result<Vec<Transfer>, TransferError> {
        Ok(self.store.list_transfers(ctx, account_id)?)
    }
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::new(MemoryStore::new())
    }
}

fn execute_transfer<Q: Queries>(
    q: &mut Q,
    ctx: &Context,
    params: TransferParams,
) -> Result<TransferResult, TransferError> {
    let transfer = q.create_transfer(ctx, CreateTransferParams::from(params))?;

    let from_entry = q.create_entry(
        ctx,
        CreateEntryParams {
            account_id: params.from_account_id,
            amount: -params.amount,
        },
    )?;
    let to_entry = q.create_entry(
        ctx,
        CreateEntryParams {
            account_id: params.to_account_id,
            amount: params.amount,
        },
    )?;

    let (from_account, to_account) = apply_deltas(q, ctx, &params)?;

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Debits the source and credits the destination, lower id first.
///
/// Returns `(from_account, to_account)` regardless of the order applied.
fn apply_deltas<Q: Queries>(
    q: &mut Q,
    ctx: &Context,
    params: &TransferParams,
) -> Result<(Account, Account), TransferError> {
    let delta_for = |id: AccountId| {
        if id == params.from_account_id {
            -params.amount
        } else {
            params.amount
        }
    };

    let (first, second) = lock_order(params.from_account_id, params.to_account_id);
    let first_account = q.add_account_balance(ctx, first, delta_for(first))?;
    let second_account = q.add_account_balance(ctx, second, delta_for(second))?;

    if first == params.from_account_id {
        Ok((first_account, second_account))
    } else {
        Ok((second_account, first_account))
    }
}
