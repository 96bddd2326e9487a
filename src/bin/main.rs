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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use transfer_engine_rs::{
    AccountId, Context, CreateAccountParams, Engine, MemoryStore, StoreConfig, TransferParams,
};

/// Transfer Engine - Replay transfers against seeded accounts
///
/// Seeds accounts from one CSV file, runs the transfers listed in another
/// concurrently, and writes the final account states to stdout.
#[derive(Parser, Debug)]
#[command(name = "transfer-engine")]
#[command(about = "Runs transfer CSVs through the atomic transfer engine", long_about = None)]
struct Args {
    /// CSV file with opening accounts
    ///
    /// Expected format: owner,currency,balance
    /// Accounts get ids 1, 2, ... in file order.
    #[arg(value_name = "ACCOUNTS")]
    accounts: PathBuf,

    /// CSV file with transfers
    ///
    /// Expected format: from,to,amount
    #[arg(value_name = "TRANSFERS")]
    transfers: PathBuf,

    /// Number of worker threads executing transfers
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    workers: u16,

    /// Longest a transfer waits for an account lock, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    lock_timeout_ms: u64,

    /// Per-transfer deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("a transfer worker panicked")]
    WorkerPanicked,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config =
        StoreConfig::default().with_lock_timeout(Duration::from_millis(args.lock_timeout_ms));
    let store = MemoryStore::with_config(config);

    let accounts = open(&args.accounts);
    let seeded = match seed_accounts(&store, BufReader::new(accounts)) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Error seeding accounts: {}", e);
            process::exit(1);
        }
    };
    info!(accounts = seeded, "accounts seeded");

    let engine = Engine::new(store);
    let transfers = open(&args.transfers);
    let options = RunOptions {
        workers: usize::from(args.workers),
        timeout: args.timeout_ms.map(Duration::from_millis),
    };
    let summary = match run_transfers(&engine, BufReader::new(transfers), &options) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error processing transfers: {}", e);
            process::exit(1);
        }
    };
    info!(
        committed = summary.committed,
        failed = summary.failed,
        "transfers processed"
    );

    if let Err(e) = write_accounts(engine.store(), std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn open(path: &Path) -> File {
    match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader)
}

/// Opening account row: `owner, currency, balance`.
#[derive(Debug, Deserialize)]
struct AccountRecord {
    owner: String,
    currency: String,
    balance: i64,
}

/// Transfer row: `from, to, amount`.
#[derive(Debug, Deserialize)]
struct TransferRecord {
    from: i64,
    to: i64,
    amount: i64,
}

/// Output row: `id, owner, currency, balance`.
#[derive(Debug, Serialize)]
struct AccountRow<'a> {
    id: AccountId,
    owner: &'a str,
    currency: &'a str,
    balance: i64,
}

#[derive(Debug, Clone)]
struct RunOptions {
    workers: usize,
    timeout: Option<Duration>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    committed: usize,
    failed: usize,
}

/// Creates one account per valid row, in file order.
///
/// Malformed rows and rows the store rejects are skipped. An unreadable
/// header fails the whole file.
fn seed_accounts<R: Read>(store: &MemoryStore, reader: R) -> Result<usize, CliError> {
    let ctx = Context::background();
    let mut seeded = 0;

    let mut rdr = csv_reader(reader);
    rdr.headers()?;
    for result in rdr.deserialize::<AccountRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed account row");
                continue;
            }
        };
        let params = CreateAccountParams::new(record.owner, record.currency, record.balance);
        match store.create_account(&ctx, params) {
            Ok(account) => {
                debug!(account = %account.id, "seeded account");
                seeded += 1;
            }
            Err(e) => warn!(error = %e, "skipping account row"),
        }
    }

    Ok(seeded)
}

/// Runs every transfer row through the engine on a pool of worker threads.
///
/// Rows are handed out through a bounded channel as they are parsed, so
/// the file is never loaded whole. Failed transfers are logged and counted.
fn run_transfers<R: Read>(
    engine: &Engine<MemoryStore>,
    reader: R,
    options: &RunOptions,
) -> Result<Summary, CliError> {
    let committed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let mut rdr = csv_reader(reader);
    rdr.headers()?;

    let (sender, receiver) = crossbeam::channel::bounded::<TransferParams>(options.workers * 2);

    crossbeam::scope(|scope| {
        for _ in 0..options.workers {
            let receiver = receiver.clone();
            let (committed, failed) = (&committed, &failed);
            scope.spawn(move |_| {
                for params in receiver.iter() {
                    let ctx = match options.timeout {
                        Some(timeout) => Context::background().with_timeout(timeout),
                        None => Context::background(),
                    };
                    match engine.transfer(&ctx, params) {
                        Ok(_) => committed.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
        drop(receiver);

        for result in rdr.deserialize::<TransferRecord>() {
            match result {
                Ok(record) => {
                    let params = TransferParams::new(
                        AccountId(record.from),
                        AccountId(record.to),
                        record.amount,
                    );
                    if sender.send(params).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "skipping malformed transfer row"),
            }
        }
        drop(sender);
    })
    .map_err(|_| CliError::WorkerPanicked)?;

    Ok(Summary {
        committed: committed.into_inner(),
        failed: failed.into_inner(),
    })
}

/// Writes committed account states as CSV, ordered by id.
fn write_accounts<W: Write>(store: &MemoryStore, writer: W) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);

    for account in store.accounts() {
        wtr.serialize(AccountRow {
            id: account.id,
            owner: &account.owner,
            currency: &account.currency,
            balance: account.balance,
        })?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
