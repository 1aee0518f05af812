use crate::error::AppError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_DEGRADED: &str = "degraded";
pub const STATUS_FAILED: &str = "failed";

pub const MODE_DYNAMIC: &str = "dynamic";
pub const MODE_PREDEFINED: &str = "predefined";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub source_name: String,
    pub lead_count: i64,
    pub max_groups: i64,
    pub mode: String,
    pub status: String,
    pub group_count: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunGroupRecord {
    pub id: String,
    pub run_id: String,
    pub name: String,
    pub description: String,
    pub pitch: String,
    pub lead_count: i64,
}

/// A finalized group as handed to [`Database::complete_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedGroup {
    pub name: String,
    pub description: String,
    pub pitch: String,
    pub lead_count: usize,
}

const RUN_COLUMNS: &str =
    "id, source_name, lead_count, max_groups, mode, status, group_count, created_at, completed_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        source_name: row.get(1)?,
        lead_count: row.get(2)?,
        max_groups: row.get(3)?,
        mode: row.get(4)?,
        status: row.get(5)?,
        group_count: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

/// Run history store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                source_name TEXT NOT NULL,
                lead_count INTEGER NOT NULL,
                max_groups INTEGER NOT NULL,
                mode TEXT NOT NULL DEFAULT 'dynamic',
                status TEXT NOT NULL DEFAULT 'running',
                group_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE TABLE IF NOT EXISTS run_groups (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                pitch TEXT NOT NULL,
                lead_count INTEGER NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            );
        ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn.lock().map_err(|_| AppError::LockPoisoned)
    }

    pub fn create_run(
        &self,
        source_name: &str,
        lead_count: usize,
        max_groups: usize,
        mode: &str,
    ) -> Result<RunRecord, AppError> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (id, source_name, lead_count, max_groups, mode, status, group_count, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![id, source_name, lead_count as i64, max_groups as i64, mode, STATUS_RUNNING, now],
        )?;
        Ok(RunRecord {
            id,
            source_name: source_name.to_string(),
            lead_count: lead_count as i64,
            max_groups: max_groups as i64,
            mode: mode.to_string(),
            status: STATUS_RUNNING.to_string(),
            group_count: 0,
            created_at: now,
            completed_at: None,
        })
    }

    /// Store the finalized groups and close the run with `status`.
    pub fn complete_run(&self, run_id: &str, status: &str, groups: &[FinishedGroup]) -> Result<(), AppError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let updated = tx.execute(
            "UPDATE runs SET status = ?1, group_count = ?2, completed_at = ?3 WHERE id = ?4",
            params![status, groups.len() as i64, now, run_id],
        )?;
        if updated == 0 {
            return Err(AppError::RunNotFound(run_id.to_string()));
        }
        tx.execute("DELETE FROM run_groups WHERE run_id = ?1", params![run_id])?;
        for group in groups {
            tx.execute(
                "INSERT INTO run_groups (id, run_id, name, description, pitch, lead_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    run_id,
                    group.name,
                    group.description,
                    group.pitch,
                    group.lead_count as i64
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mark_failed(&self, run_id: &str) -> Result<(), AppError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![STATUS_FAILED, now, run_id],
        )?;
        Ok(())
    }

    pub fn get_runs(&self) -> Result<Vec<RunRecord>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY created_at DESC",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS))?;
        Ok(stmt.query_row(params![run_id], run_from_row).optional()?)
    }

    pub fn get_run_groups(&self, run_id: &str) -> Result<Vec<RunGroupRecord>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, name, description, pitch, lead_count FROM run_groups WHERE run_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RunGroupRecord {
                id: row.get(0)?,
                run_id: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                pitch: row.get(4)?,
                lead_count: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a run and its groups. Returns false when no such run exists.
    pub fn delete_run(&self, run_id: &str) -> Result<bool, AppError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM run_groups WHERE run_id = ?1", params![run_id])?;
        let deleted = conn.execute("DELETE FROM runs WHERE id = ?1", params![run_id])?;
        Ok(deleted > 0)
    }
}
