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

//! Concurrency tests for the transfer engine.
//!
//! Transfers run on plain OS threads against one shared [`MemoryStore`].
//! Each test runs parking_lot's deadlock detector in the background, which
//! sees the store's row locks, so a lock cycle between transfers fails the
//! test instead of only showing up as lock timeouts.

use parking_lot::deadlock;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use transfer_engine_rs::{
    AccountId, Context, CreateAccountParams, Engine, MemoryStore, Store, StoreConfig,
    TransferParams, TransferResult,
};

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Helpers ===

fn setup(balances: &[i64]) -> (Arc<Engine<MemoryStore>>, Vec<AccountId>) {
    let store = MemoryStore::with_config(
        StoreConfig::default().with_lock_timeout(Duration::from_secs(10)),
    );
    let ctx = Context::background();
    let ids = balances
        .iter()
        .map(|&balance| {
            store
                .create_account(&ctx, CreateAccountParams::new("owner", "USD", balance))
                .unwrap()
                .id
        })
        .collect();
    (Arc::new(Engine::new(store)), ids)
}

fn balance(engine: &Engine<MemoryStore>, id: AccountId) -> i64 {
    engine
        .get_account(&Context::background(), id)
        .unwrap()
        .balance
}

/// Runs one transfer per element of `plan` on its own thread.
fn run_concurrently(
    engine: &Arc<Engine<MemoryStore>>,
    plan: Vec<TransferParams>,
) -> Vec<TransferResult> {
    let handles: Vec<_> = plan
        .into_iter()
        .map(|params| {
            let engine = engine.clone();
            thread::spawn(move || engine.transfer(&Context::background(), params))
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| {
            handle
                .join()
                .expect("Thread panicked")
                .expect("Transfer failed")
        })
        .collect()
}

// === Tests ===

/// Five concurrent transfers of 10 from A(100) to B(0).
#[test]
fn concurrent_transfers_same_direction_lose_no_updates() {
    let detector = start_deadlock_detector();
    let (engine, ids) = setup(&[100, 0]);
    let (a, b) = (ids[0], ids[1]);

    const N: i64 = 5;
    const AMOUNT: i64 = 10;

    let plan = (0..N).map(|_| TransferParams::new(a, b, AMOUNT)).collect();
    let results = run_concurrently(&engine, plan);

    stop_deadlock_detector(detector);

    let mut seen_steps = HashSet::new();
    let mut entry_amounts = Vec::new();
    for result in &results {
        assert_eq!(result.transfer.from_account_id, a);
        assert_eq!(result.transfer.to_account_id, b);
        assert_eq!(result.transfer.amount, AMOUNT);

        let debited = 100 - result.from_account.balance;
        let credited = result.to_account.balance;
        assert_eq!(debited, credited);
        assert_eq!(debited % AMOUNT, 0);

        // Each transfer observes a distinct point in the serial order.
        let step = debited / AMOUNT;
        assert!((1..=N).contains(&step));
        assert!(seen_steps.insert(step), "step {step} seen twice");

        entry_amounts.push(result.from_entry.amount);
        entry_amounts.push(result.to_entry.amount);
    }

    entry_amounts.sort();
    assert_eq!(entry_amounts, vec![-10, -10, -10, -10, -10, 10, 10, 10, 10, 10]);

    let transfer_ids: HashSet<_> = results.iter().map(|r| r.transfer.id).collect();
    assert_eq!(transfer_ids.len(), 5);

    assert_eq!(balance(&engine, a), 50);
    assert_eq!(balance(&engine, b), 50);
    assert_eq!(engine.store().transfer_count(), 5);
    assert_eq!(engine.store().entry_count(), 10);
}

/// Alternating A→B / B→A transfers all complete and cancel out.
#[test]
fn bidirectional_transfers_do_not_deadlock() {
    let detector = start_deadlock_detector();
    let (engine, ids) = setup(&[1_000, 1_000]);
    let (a, b) = (ids[0], ids[1]);

    const N: usize = 10;

    let plan = (0..N)
        .map(|i| {
            if i % 2 == 0 {
                TransferParams::new(a, b, 10)
            } else {
                TransferParams::new(b, a, 10)
            }
        })
        .collect();
    let results = run_concurrently(&engine, plan);

    stop_deadlock_detector(detector);

    assert_eq!(results.len(), N);
    assert_eq!(balance(&engine, a), 1_000);
    assert_eq!(balance(&engine, b), 1_000);
}

/// Many threads hammering the same pair in both directions.
#[test]
fn bidirectional_high_contention() {
    let detector = start_deadlock_detector();
    let (engine, ids) = setup(&[100_000, 100_000]);
    let (a, b) = (ids[0], ids[1]);

    const NUM_THREADS: usize = 32;
    const OPS_PER_THREAD: usize = 50;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let engine = engine.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                for i in 0..OPS_PER_THREAD {
                    let params = if (thread_id + i) % 2 == 0 {
                        TransferParams::new(a, b, 3)
                    } else {
                        TransferParams::new(b, a, 3)
                    };
                    engine.transfer(&ctx, params).expect("Transfer failed");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every thread does as many A→B as B→A transfers.
    assert_eq!(balance(&engine, a), 100_000);
    assert_eq!(balance(&engine, b), 100_000);
    assert_eq!(
        engine.store().transfer_count(),
        NUM_THREADS * OPS_PER_THREAD
    );
}

/// Transfers across a ring of accounts, in both directions around the ring.
#[test]
fn cross_account_ring_conserves_total() {
    let detector = start_deadlock_detector();
    const NUM_ACCOUNTS: usize = 8;
    let (engine, ids) = setup(&[10_000; NUM_ACCOUNTS]);

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 40;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let engine = engine.clone();
            let ids = ids.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                for i in 0..OPS_PER_THREAD {
                    let from = (thread_id + i) % NUM_ACCOUNTS;
                    let to = if thread_id % 2 == 0 {
                        (from + 1) % NUM_ACCOUNTS
                    } else {
                        (from + NUM_ACCOUNTS - 1) % NUM_ACCOUNTS
                    };
                    engine
                        .transfer(&ctx, TransferParams::new(ids[from], ids[to], 1 + (i as i64 % 5)))
                        .expect("Transfer failed");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let total: i64 = ids.iter().map(|&id| balance(&engine, id)).sum();
    assert_eq!(total, 10_000 * NUM_ACCOUNTS as i64);

    let ctx = Context::background();
    let entries: i64 = ids
        .iter()
        .map(|&id| {
            engine
                .list_entries(&ctx, id)
                .unwrap()
                .iter()
                .map(|e| e.amount)
                .sum::<i64>()
        })
        .sum();
    assert_eq!(entries, 0);
}

/// Concurrent debits that would overdraw the source: the excess fail, the
/// rest commit, and the balance never goes below zero.
#[test]
fn concurrent_overdraft_attempts_never_go_negative() {
    let detector = start_deadlock_detector();
    let (engine, ids) = setup(&[50, 0]);
    let (a, b) = (ids[0], ids[1]);

    const NUM_THREADS: usize = 12;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine
                    .transfer(&Context::background(), TransferParams::new(a, b, 10))
                    .is_ok()
            })
        })
        .collect();

    let committed = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .filter(|&ok| ok)
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(committed, 5);
    assert_eq!(balance(&engine, a), 0);
    assert_eq!(balance(&engine, b), 50);
    assert_eq!(engine.store().transfer_count(), 5);
    assert_eq!(engine.store().entry_count(), 10);
}

/// Readers running alongside writers only ever see whole commits: the pair
/// total never moves and no transfer is visible without both of its entries.
#[test]
fn readers_see_only_committed_state() {
    let detector = start_deadlock_detector();
    let (engine, ids) = setup(&[5_000, 5_000]);
    let (a, b) = (ids[0], ids[1]);
    let running = Arc::new(AtomicBool::new(true));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let engine = engine.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                for i in 0..200 {
                    let params = if (w + i) % 2 == 0 {
                        TransferParams::new(a, b, 7)
                    } else {
                        TransferParams::new(b, a, 7)
                    };
                    engine.transfer(&ctx, params).expect("Transfer failed");
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut observations = 0;
                while running.load(Ordering::SeqCst) {
                    let accounts = engine.store().accounts();
                    assert!(accounts.iter().all(|account| account.balance >= 0));
                    let total: i64 = accounts.iter().map(|account| account.balance).sum();
                    assert_eq!(total, 10_000, "Reader saw a partially applied transfer");

                    // Entries only grow, so counting them second keeps the check sound.
                    let transfers = engine.store().transfer_count();
                    let entries = engine.store().entry_count();
                    assert!(
                        entries >= 2 * transfers,
                        "Reader saw {transfers} transfers but only {entries} entries"
                    );

                    observations += 1;
                    thread::yield_now();
                }
                observations
            })
        })
        .collect();

    for handle in writers {
        handle.join().expect("Thread panicked");
    }
    running.store(false, Ordering::SeqCst);
    let observations: usize = readers
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .sum();

    stop_deadlock_detector(detector);

    assert!(observations > 0);
    assert_eq!(balance(&engine, a) + balance(&engine, b), 10_000);
    assert_eq!(engine.store().transfer_count(), 800);
    assert_eq!(engine.store().entry_count(), 1_600);
}

/// Transfers on disjoint pairs never wait on each other's locks.
#[test]
fn disjoint_pairs_proceed_while_another_pair_is_locked() {
    let (engine, ids) = setup(&[100, 100, 100, 100]);
    let ctx = Context::background();

    // Hold the rows of the first pair in an open transaction.
    let mut holder = engine.store().begin(&ctx).unwrap();
    {
        use transfer_engine_rs::Queries;
        holder.add_account_balance(&ctx, ids[0], 0).unwrap();
        holder.add_account_balance(&ctx, ids[1], 0).unwrap();
    }

    let other = engine.clone();
    let (c, d) = (ids[2], ids[3]);
    let handle = thread::spawn(move || {
        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        other.transfer(&ctx, TransferParams::new(c, d, 10))
    });
    let result = handle.join().expect("Thread panicked");
    assert!(result.is_ok());

    drop(holder);
    assert_eq!(balance(&engine, c), 90);
    assert_eq!(balance(&engine, d), 110);
}
