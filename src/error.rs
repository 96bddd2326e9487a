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

//! Error types for the store and the transfer engine.

use crate::base::{AccountId, Record};
use crate::store::FailPoint;
use thiserror::Error;

/// Errors reported by a store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced row does not exist
    #[error("{record} {id} not found")]
    NotFound { record: Record, id: i64 },

    /// Applying the delta would take the balance below zero
    #[error("insufficient balance on account {account_id}: balance {balance}, delta {delta}")]
    InsufficientBalance {
        account_id: AccountId,
        balance: i64,
        delta: i64,
    },

    /// A row constraint rejected the write
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The row lock could not be acquired within the configured lock timeout
    #[error("lock timeout on account {0}")]
    LockTimeout(AccountId),

    /// The caller cancelled the context
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A fail point armed on the store tripped
    #[error("injected failure at {0}")]
    Injected(FailPoint),
}

impl StoreError {
    pub(crate) fn not_found(record: Record, id: i64) -> Self {
        StoreError::NotFound { record, id }
    }
}

/// Structural problems with a transfer request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidArgument {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("source and destination are the same account ({0})")]
    SameAccount(AccountId),

    #[error("account id must be positive, got {0}")]
    InvalidAccountId(AccountId),
}

/// Transfer processing errors.
///
/// Every failed attempt yields exactly one of these. A failed rollback never
/// replaces the error that caused it: both travel in [`TransferError::Rollback`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Rejected before any store interaction
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] InvalidArgument),

    /// A referenced row does not exist
    #[error("{record} {id} not found")]
    NotFound { record: Record, id: i64 },

    /// The store failed while opening, writing or committing the transaction
    #[error("transaction failed: {0}")]
    Transaction(StoreError),

    /// The unit of work failed and so did the rollback
    #[error("tx err: {source}, rb err: {rollback}")]
    Rollback {
        source: Box<TransferError>,
        rollback: StoreError,
    },
}

impl TransferError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, TransferError::InvalidArgument(_))
    }

    /// The store error behind this failure, if any.
    ///
    /// For a failed rollback this is the original error, not the rollback one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TransferError::Transaction(err) => Some(err),
            TransferError::Rollback { source, .. } => source.store_error(),
            _ => None,
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { record, id } => TransferError::NotFound { record, id },
            other => TransferError::Transaction(other),
        }
    }
}
