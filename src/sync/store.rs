//! Local report store.
//!
//! One row per road-repair report, keyed by the remote record key. Rows
//! arrive exclusively through the reconciler, which stamps `last_synced_at`
//! on every insert and update; citizens and crews then edit them locally,
//! which raises `outbound_dirty` so a future push knows what to send.
//! Inbound reconciliation never touches that flag or the local workflow
//! columns (notes, work window, estimated budget).

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;

use crate::auth::store::epoch_secs;

/// A local report row.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: i64,
    pub remote_key: String,
    pub reporter_uid: Option<String>,
    pub reporter_email: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub problem_id: Option<String>,
    pub problem_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub surface: Option<f64>,
    pub budget: Option<f64>,
    pub photo_url: Option<String>,
    /// Remote creation stamp, epoch millis as delivered.
    pub created_at_remote: Option<i64>,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    /// Local workflow annotation, never written by the reconciler.
    pub manager_notes: Option<String>,
    /// Workflow state derived from `status`.
    pub local_status: String,
    /// Completion percentage derived from `status`.
    pub progress: i32,
    pub estimated_budget: Option<f64>,
    pub work_started_at: Option<i64>,
    pub work_ended_at: Option<i64>,
    /// True when a local edit has not yet been pushed upstream.
    pub outbound_dirty: bool,
    pub created_at: i64,
    /// When the reconciler last wrote this row.
    pub last_synced_at: i64,
    pub modified_at_local: Option<i64>,
}

/// The remote-owned fields a reconciliation carries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoteFields {
    pub reporter_uid: Option<String>,
    pub reporter_email: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub problem_id: Option<String>,
    pub problem_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub surface: Option<f64>,
    pub budget: Option<f64>,
    pub photo_url: Option<String>,
    pub created_at_remote: Option<i64>,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
}

const REPORT_COLUMNS: &str = "id, remote_key, reporter_uid, reporter_email, latitude, longitude,
     problem_id, problem_name, description, status, surface, budget, photo_url,
     created_at_remote, company_id, company_name, manager_notes, local_status,
     progress, estimated_budget, work_started_at, work_ended_at, outbound_dirty,
     created_at, last_synced_at, modified_at_local";

/// SQLite-backed report store.
pub struct ReportStore {
    conn: Mutex<rusqlite::Connection>,
}

impl ReportStore {
    /// Open (or create) the report database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_key TEXT NOT NULL UNIQUE,
                reporter_uid TEXT,
                reporter_email TEXT,
                latitude REAL,
                longitude REAL,
                problem_id TEXT,
                problem_name TEXT,
                description TEXT,
                status TEXT,
                surface REAL,
                budget REAL,
                photo_url TEXT,
                created_at_remote INTEGER,
                company_id TEXT,
                company_name TEXT,
                manager_notes TEXT,
                local_status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                estimated_budget REAL,
                work_started_at INTEGER,
                work_ended_at INTEGER,
                outbound_dirty INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_synced_at INTEGER NOT NULL,
                modified_at_local INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_reports_dirty ON reports(outbound_dirty);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a report by its remote key.
    pub fn find_by_remote_key(&self, key: &str) -> Result<Option<Report>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE remote_key = ?1"),
            rusqlite::params![key],
            map_report,
        );

        match row {
            Ok(report) => Ok(Some(report)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert a row for a record seen for the first time. New arrivals are
    /// clean: they carry nothing the remote does not already have.
    pub fn insert_remote(
        &self,
        key: &str,
        fields: &RemoteFields,
        local_status: &str,
        progress: i32,
    ) -> Result<Report> {
        let now = epoch_secs();
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO reports (remote_key, reporter_uid, reporter_email, latitude, longitude,
                                  problem_id, problem_name, description, status, surface, budget,
                                  photo_url, created_at_remote, company_id, company_name,
                                  local_status, progress, outbound_dirty, created_at, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 0, ?18, ?19)",
            rusqlite::params![
                key,
                fields.reporter_uid,
                fields.reporter_email,
                fields.latitude,
                fields.longitude,
                fields.problem_id,
                fields.problem_name,
                fields.description,
                fields.status,
                fields.surface,
                fields.budget,
                fields.photo_url,
                fields.created_at_remote,
                fields.company_id,
                fields.company_name,
                local_status,
                progress,
                now,
                now,
            ],
        );

        match result {
            Ok(_) => {
                drop(conn);
                self.find_by_remote_key(key)?
                    .ok_or_else(|| anyhow::anyhow!("Report row vanished after insert"))
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("A report with remote key '{}' already exists", key)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the remote-owned fields of an existing row and refresh
    /// `last_synced_at`. The dirty flag and the local workflow columns are
    /// deliberately left alone: an unpushed local edit stays unpushed.
    pub fn apply_remote_update(
        &self,
        key: &str,
        fields: &RemoteFields,
        local_status: &str,
        progress: i32,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE reports
             SET reporter_email = ?1, latitude = ?2, longitude = ?3, problem_id = ?4,
                 problem_name = ?5, description = ?6, status = ?7, surface = ?8,
                 budget = ?9, photo_url = ?10, local_status = ?11, progress = ?12,
                 last_synced_at = ?13
             WHERE remote_key = ?14",
            rusqlite::params![
                fields.reporter_email,
                fields.latitude,
                fields.longitude,
                fields.problem_id,
                fields.problem_name,
                fields.description,
                fields.status,
                fields.surface,
                fields.budget,
                fields.photo_url,
                local_status,
                progress,
                epoch_secs(),
                key,
            ],
        )?;
        if changed == 0 {
            bail!("No report with remote key '{}'", key);
        }
        Ok(())
    }

    /// Record a citizen-side edit: raise the dirty flag and stamp the local
    /// modification time.
    pub fn record_local_edit(
        &self,
        key: &str,
        description: Option<&str>,
        manager_notes: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE reports
             SET description = COALESCE(?1, description),
                 manager_notes = COALESCE(?2, manager_notes),
                 outbound_dirty = 1,
                 modified_at_local = ?3
             WHERE remote_key = ?4",
            rusqlite::params![description, manager_notes, epoch_secs(), key],
        )?;
        if changed == 0 {
            bail!("No report with remote key '{}'", key);
        }
        Ok(())
    }

    /// Record crew scheduling for a repair: work window and estimated cost.
    /// A local edit like any other, so it raises the dirty flag too.
    pub fn record_work_plan(
        &self,
        key: &str,
        work_started_at: Option<i64>,
        work_ended_at: Option<i64>,
        estimated_budget: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE reports
             SET work_started_at = COALESCE(?1, work_started_at),
                 work_ended_at = COALESCE(?2, work_ended_at),
                 estimated_budget = COALESCE(?3, estimated_budget),
                 outbound_dirty = 1,
                 modified_at_local = ?4
             WHERE remote_key = ?5",
            rusqlite::params![
                work_started_at,
                work_ended_at,
                estimated_budget,
                epoch_secs(),
                key
            ],
        )?;
        if changed == 0 {
            bail!("No report with remote key '{}'", key);
        }
        Ok(())
    }

    /// Clear the dirty flag after a successful push.
    pub fn mark_synced(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE reports SET outbound_dirty = 0 WHERE remote_key = ?1",
            rusqlite::params![key],
        )?;
        Ok(())
    }

    /// List rows awaiting an outbound push.
    pub fn dirty_reports(&self) -> Result<Vec<Report>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE outbound_dirty = 1 ORDER BY modified_at_local"
        ))?;
        let rows = stmt.query_map([], map_report)?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row?);
        }
        Ok(reports)
    }

    /// Count report rows.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_synced(&self, key: &str, last_synced_at: i64) {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE reports SET last_synced_at = ?1 WHERE remote_key = ?2",
            rusqlite::params![last_synced_at, key],
        )
        .unwrap();
    }
}

fn map_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get(0)?,
        remote_key: row.get(1)?,
        reporter_uid: row.get(2)?,
        reporter_email: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        problem_id: row.get(6)?,
        problem_name: row.get(7)?,
        description: row.get(8)?,
        status: row.get(9)?,
        surface: row.get(10)?,
        budget: row.get(11)?,
        photo_url: row.get(12)?,
        created_at_remote: row.get(13)?,
        company_id: row.get(14)?,
        company_name: row.get(15)?,
        manager_notes: row.get(16)?,
        local_status: row.get(17)?,
        progress: row.get(18)?,
        estimated_budget: row.get(19)?,
        work_started_at: row.get(20)?,
        work_ended_at: row.get(21)?,
        outbound_dirty: row.get(22)?,
        created_at: row.get(23)?,
        last_synced_at: row.get(24)?,
        modified_at_local: row.get(25)?,
    })
}
