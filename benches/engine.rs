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

//! Benchmarks for the transfer engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single transfers between two accounts
//! - Sequential transfer throughput
//! - Parallel transfers on disjoint account pairs
//! - Parallel transfers contending on one pair in both directions

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use transfer_engine_rs::{
    AccountId, Context, CreateAccountParams, Engine, MemoryStore, TransferParams,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn seeded_engine(accounts: usize, balance: i64) -> (Engine<MemoryStore>, Vec<AccountId>) {
    let store = MemoryStore::new();
    let ctx = Context::background();
    let ids = (0..accounts)
        .map(|i| {
            store
                .create_account(
                    &ctx,
                    CreateAccountParams::new(format!("owner-{i}"), "USD", balance),
                )
                .unwrap()
                .id
        })
        .collect();
    (Engine::new(store), ids)
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_transfer(c: &mut Criterion) {
    let (engine, ids) = seeded_engine(2, i64::MAX / 2);
    let ctx = Context::background();
    let mut forward = true;

    c.bench_function("single_transfer", |b| {
        b.iter(|| {
            let params = if forward {
                TransferParams::new(ids[0], ids[1], 1)
            } else {
                TransferParams::new(ids[1], ids[0], 1)
            };
            forward = !forward;
            engine.transfer(&ctx, black_box(params)).unwrap();
        })
    });
}

fn bench_sequential_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_throughput");

    for count in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let (engine, ids) = seeded_engine(10, 1_000_000);
                let ctx = Context::background();
                for i in 0..count {
                    let from = ids[i % ids.len()];
                    let to = ids[(i + 3) % ids.len()];
                    engine.transfer(&ctx, TransferParams::new(from, to, 5)).unwrap();
                }
                black_box(&engine);
            })
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_disjoint_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_disjoint_pairs");

    for pairs in [4usize, 16, 64].iter() {
        let per_pair = 100;
        group.throughput(Throughput::Elements((*pairs * per_pair) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pairs), pairs, |b, &pairs| {
            b.iter(|| {
                let (engine, ids) = seeded_engine(pairs * 2, 1_000_000);
                (0..pairs).into_par_iter().for_each(|pair| {
                    let ctx = Context::background();
                    let (from, to) = (ids[pair * 2], ids[pair * 2 + 1]);
                    for _ in 0..per_pair {
                        engine.transfer(&ctx, TransferParams::new(from, to, 1)).unwrap();
                    }
                });
                black_box(&engine);
            })
        });
    }
    group.finish();
}

fn bench_parallel_contended_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_contended_pair");

    for count in [1_000usize, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let (engine, ids) = seeded_engine(2, 1_000_000_000);
                (0..count).into_par_iter().for_each(|i| {
                    let params = if i % 2 == 0 {
                        TransferParams::new(ids[0], ids[1], 1)
                    } else {
                        TransferParams::new(ids[1], ids[0], 1)
                    };
                    engine.transfer(&Context::background(), params).unwrap();
                });
                black_box(&engine);
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_transfer,
    bench_sequential_throughput,
    bench_parallel_disjoint_pairs,
    bench_parallel_contended_pair,
);
criterion_main!(benches);
