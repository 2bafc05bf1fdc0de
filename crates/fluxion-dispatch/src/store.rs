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

//! Per-slot persistence of dispatch decisions.
//!
//! One row per slot start. A re-plan replaces the suffix of the stored plan
//! starting at its first slot; everything before it is kept as an audit
//! trail until pruned.

use fluxion_types::TimeSlotDecision;
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{DispatchError, Result};

/// Storage of the dispatch plan, keyed by slot start
pub trait DecisionStore: Send + Sync {
    /// Atomically replace all stored decisions with `timestamp >= min(timestamp)`
    /// of `decisions` by `decisions`. Returns the number of rows written.
    fn upsert_range(&self, decisions: &[TimeSlotDecision]) -> Result<usize>;

    /// All decisions with `timestamp >= now`, ascending
    fn load_future(&self, now: i64) -> Result<Vec<TimeSlotDecision>>;

    /// Decisions with `from <= timestamp < to`, ascending
    fn load_range(&self, from: i64, to: i64) -> Result<Vec<TimeSlotDecision>>;

    /// Decision stored for exactly this slot start
    fn decision_at(&self, slot_timestamp: i64) -> Result<Option<TimeSlotDecision>>;

    /// Delete decisions older than `timestamp`. Returns the number removed.
    fn prune_before(&self, timestamp: i64) -> Result<usize>;
}

const SELECT_COLUMNS: &str = "timestamp, slot_index, battery_charge_from_pv, battery_charge_from_grid,
    battery_discharge, grid_import, grid_export, battery_soc, profit, import_price, export_price,
    solar_forecast, load_forecast, solar_curtailed, cloud_coverage, weather_symbol,
    battery_avg_cell_temp, air_temperature, battery_preheat_active, preheat_cost";

/// SQLite-backed decision store.
///
/// All access goes through one connection mutex, writes additionally through
/// a transaction, so readers observe either the old or the new plan.
#[derive(Debug)]
pub struct SqliteDecisionStore {
    conn: Mutex<Connection>,
}

impl SqliteDecisionStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        Self::init(Connection::open(path)?)
    }

    /// Volatile store, used by tests and dry runs without a data directory
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS slot_decisions (
                timestamp                 INTEGER PRIMARY KEY,
                slot_index                INTEGER NOT NULL,
                battery_charge            REAL NOT NULL,
                battery_charge_from_pv    REAL NOT NULL,
                battery_charge_from_grid  REAL NOT NULL,
                battery_discharge         REAL NOT NULL,
                grid_import               REAL NOT NULL,
                grid_export               REAL NOT NULL,
                battery_soc               REAL NOT NULL,
                profit                    REAL NOT NULL,
                import_price              REAL NOT NULL,
                export_price              REAL NOT NULL,
                solar_forecast            REAL NOT NULL,
                load_forecast             REAL NOT NULL,
                solar_curtailed           REAL NOT NULL DEFAULT 0,
                cloud_coverage            REAL,
                weather_symbol            TEXT,
                battery_avg_cell_temp     REAL,
                air_temperature           REAL,
                battery_preheat_active    INTEGER NOT NULL DEFAULT 0,
                preheat_cost              REAL NOT NULL DEFAULT 0
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, sql: &str, bounds: &[i64]) -> Result<Vec<TimeSlotDecision>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bounds.iter()), row_to_decision)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_decision(row: &Row<'_>) -> rusqlite::Result<TimeSlotDecision> {
    Ok(TimeSlotDecision {
        timestamp: row.get(0)?,
        slot_index: row.get(1)?,
        battery_charge_from_pv: row.get(2)?,
        battery_charge_from_grid: row.get(3)?,
        battery_discharge: row.get(4)?,
        grid_import: row.get(5)?,
        grid_export: row.get(6)?,
        battery_soc: row.get(7)?,
        profit: row.get(8)?,
        import_price: row.get(9)?,
        export_price: row.get(10)?,
        solar_forecast: row.get(11)?,
        load_forecast: row.get(12)?,
        solar_curtailed: row.get(13)?,
        cloud_coverage: row.get(14)?,
        weather_symbol: row.get(15)?,
        battery_avg_cell_temp: row.get(16)?,
        air_temperature: row.get(17)?,
        battery_preheat_active: row.get(18)?,
        preheat_cost: row.get(19)?,
    })
}

impl DecisionStore for SqliteDecisionStore {
    fn upsert_range(&self, decisions: &[TimeSlotDecision]) -> Result<usize> {
        let Some(min_ts) = decisions.iter().map(|d| d.timestamp).min() else {
            return Ok(0);
        };

        let mut seen = HashSet::with_capacity(decisions.len());
        for decision in decisions {
            if !seen.insert(decision.timestamp) {
                return Err(DispatchError::DuplicateSlot(decision.timestamp));
            }
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM slot_decisions WHERE timestamp >= ?1",
            params![min_ts],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO slot_decisions (
                    timestamp, slot_index, battery_charge, battery_charge_from_pv,
                    battery_charge_from_grid, battery_discharge, grid_import, grid_export,
                    battery_soc, profit, import_price, export_price, solar_forecast,
                    load_forecast, solar_curtailed, cloud_coverage, weather_symbol,
                    battery_avg_cell_temp, air_temperature, battery_preheat_active, preheat_cost
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                           ?16, ?17, ?18, ?19, ?20, ?21)",
            )?;
            for d in decisions {
                insert.execute(params![
                    d.timestamp,
                    d.slot_index,
                    d.battery_charge(),
                    d.battery_charge_from_pv,
                    d.battery_charge_from_grid,
                    d.battery_discharge,
                    d.grid_import,
                    d.grid_export,
                    d.battery_soc,
                    d.profit,
                    d.import_price,
                    d.export_price,
                    d.solar_forecast,
                    d.load_forecast,
                    d.solar_curtailed,
                    d.cloud_coverage,
                    d.weather_symbol,
                    d.battery_avg_cell_temp,
                    d.air_temperature,
                    d.battery_preheat_active,
                    d.preheat_cost,
                ])?;
            }
        }
        tx.commit()?;

        Ok(decisions.len())
    }

    fn load_future(&self, now: i64) -> Result<Vec<TimeSlotDecision>> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM slot_decisions
                 WHERE timestamp >= ?1 ORDER BY timestamp ASC"
            ),
            &[now],
        )
    }

    fn load_range(&self, from: i64, to: i64) -> Result<Vec<TimeSlotDecision>> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM slot_decisions
                 WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC"
            ),
            &[from, to],
        )
    }

    fn decision_at(&self, slot_timestamp: i64) -> Result<Option<TimeSlotDecision>> {
        let mut rows = self.query(
            &format!("SELECT {SELECT_COLUMNS} FROM slot_decisions WHERE timestamp = ?1"),
            &[slot_timestamp],
        )?;
        Ok(rows.pop())
    }

    fn prune_before(&self, timestamp: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM slot_decisions WHERE timestamp < ?1",
            params![timestamp],
        )?;
        Ok(removed)
    }
}
