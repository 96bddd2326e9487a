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

//! All-or-nothing execution of a group of dependent writes.

use crate::context::Context;
use crate::error::TransferError;
use crate::store::{Store, Transaction};
use tracing::{debug, error};

/// Runs `f` inside one transaction of `store`.
///
/// If `f` succeeds the transaction is committed and a commit failure is
/// returned as-is, without retrying. If `f` fails the transaction is rolled
/// back and `f`'s error is returned; should the rollback fail too, both
/// errors come back together in [`TransferError::Rollback`].
pub fn run_in_transaction<S, T, F>(store: &S, ctx: &Context, f: F) -> Result<T, TransferError>
where
    S: Store + ?Sized,
    F: FnOnce(&mut S::Tx) -> Result<T, TransferError>,
{
    let mut tx = store.begin(ctx)?;

    match f(&mut tx) {
        Ok(value) => {
            tx.commit(ctx)?;
            Ok(value)
        }
        Err(err) => {
            debug!(error = %err, "unit of work failed, rolling back");
            match tx.rollback() {
                Ok(()) => Err(err),
                Err(rollback) => {
                    error!(error = %err, rollback_error = %rollback, "rollback failed");
                    Err(TransferError::Rollback {
                        source: Box::new(err),
                        rollback,
                    })
                }
            }
        }
    }
}
