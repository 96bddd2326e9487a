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

//! Transfers and the ledger entries they produce.
//!
//! One committed [`Transfer`] always comes with exactly two [`Entry`] rows:
//! a debit on the source account and a credit on the destination account,
//! whose amounts sum to zero. Neither is ever updated or deleted.

use crate::account::Account;
use crate::base::{AccountId, EntryId, TransferId};
use crate::error::InvalidArgument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of one completed funds movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable signed ledger line for one leg of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    /// Negative for a debit, positive for a credit.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// A request to move `amount` from one account to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Checks the structural invariants of the request.
    ///
    /// Funds, currency and ownership are the caller's business.
    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.amount <= 0 {
            return Err(InvalidArgument::NonPositiveAmount(self.amount));
        }
        for id in [self.from_account_id, self.to_account_id] {
            if id.0 <= 0 {
                return Err(InvalidArgument::InvalidAccountId(id));
            }
        }
        if self.from_account_id == self.to_account_id {
            return Err(InvalidArgument::SameAccount(self.from_account_id));
        }
        Ok(())
    }
}

/// Everything a committed transfer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    /// Source account after the debit.
    pub from_account: Account,
    /// Destination account after the credit.
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Row values for inserting a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl From<TransferParams> for CreateTransferParams {
    fn from(params: TransferParams) -> Self {
        Self {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        }
    }
}

/// Row values for inserting a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}
