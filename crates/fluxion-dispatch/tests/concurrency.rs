// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Overlapping re-plans against one decision store.

mod common;

use common::{FlatForecast, MockPlant, at, test_config};
use fluxion_dispatch::{DecisionStore, HorizonOptimizer, SqliteDecisionStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const T: i64 = 1_735_689_600;
const SLOT: i64 = 900;
const PRICES: [f64; 4] = [1.0, 2.5, 4.0, 7.5];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_mixed_plan() {
    let store = Arc::new(SqliteDecisionStore::open_in_memory().unwrap());
    let config = test_config();

    // One optimizer per price so writes really interleave
    let optimizers: Vec<Arc<HorizonOptimizer>> = PRICES
        .iter()
        .map(|price| {
            let optimizer = HorizonOptimizer::new(
                &config,
                FlatForecast::new(*price, 1.0, 2.0, 1.0),
                MockPlant::new(5.0, 0.5),
                store.clone(),
            )
            .unwrap();
            Arc::new(optimizer)
        })
        .collect();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..3 {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        readers.push(tokio::spawn(async move {
            let mut seen = 0usize;
            while !done.load(Ordering::Acquire) {
                let rows = store.load_future(T).unwrap();
                if !rows.is_empty() {
                    assert_eq!(rows.len(), 8);
                    for (i, row) in rows.iter().enumerate() {
                        assert_eq!(row.timestamp, T + i as i64 * SLOT);
                        assert!((row.import_price - rows[0].import_price).abs() < 1e-12);
                    }
                    assert!(PRICES.contains(&rows[0].import_price));
                    seen += 1;
                }
                tokio::task::yield_now().await;
            }
            seen
        }));
    }

    let mut writers = Vec::new();
    for optimizer in &optimizers {
        let optimizer = Arc::clone(optimizer);
        writers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let outcome = optimizer.replan(at(T)).await.unwrap();
                assert_eq!(outcome.slots_written, 8);
                tokio::task::yield_now().await;
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.await.unwrap();
    }

    let last = store.load_future(T).unwrap();
    assert_eq!(last.len(), 8);
    assert!(PRICES.contains(&last[0].import_price));
    assert!(
        last.iter()
            .all(|row| (row.import_price - last[0].import_price).abs() < 1e-12)
    );
}
