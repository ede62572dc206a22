//! One-way pull reconciliation.
//!
//! The remote record store is the source of truth for report state. Each
//! run fetches the full snapshot under a hard deadline, then walks it
//! sequentially: unseen keys are inserted, known keys are updated only
//! when a remote-owned field actually changed, identical records are
//! ignored. Running the reconciler twice against an unchanged snapshot is
//! a no-op. A record that fails to apply is reported and skipped; it never
//! aborts the run or touches its neighbors.

use crate::auth::store::epoch_secs;
use crate::error::SyncError;
use crate::sync::source::{RemoteRecord, RemoteRecordSource};
use crate::sync::store::{RemoteFields, Report, ReportStore};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Hard ceiling on the snapshot fetch.
pub const FETCH_DEADLINE: Duration = Duration::from_secs(30);

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
    /// Per-record failures, keyed by remote key in the message text.
    pub errors: Vec<String>,
    pub total_remote: usize,
    /// When the run finished, successful or not (epoch seconds).
    pub completed_at: i64,
}

impl SyncReport {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            inserted: 0,
            updated: 0,
            ignored: 0,
            errors: Vec::new(),
            total_remote: 0,
            completed_at: epoch_secs(),
        }
    }
}

/// A decoded record as the preview surface shows it.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewRecord {
    pub key: String,
    pub fields: RemoteFields,
}

/// Outcome of a preview: decoded records plus the per-record parse
/// failures, nothing persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPreview {
    pub records: Vec<PreviewRecord>,
    pub errors: Vec<String>,
}

/// Pulls the remote snapshot into the local report store.
pub struct Reconciler {
    source: Arc<dyn RemoteRecordSource>,
    store: Arc<ReportStore>,
    deadline: Duration,
}

impl Reconciler {
    pub fn new(source: Arc<dyn RemoteRecordSource>, store: Arc<ReportStore>) -> Self {
        Self {
            source,
            store,
            deadline: FETCH_DEADLINE,
        }
    }

    /// Override the fetch deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run one reconciliation. Fetch failures produce a failure report;
    /// per-record failures are collected without stopping the run.
    pub async fn run(&self) -> SyncReport {
        let records = match self.fetch_snapshot().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed");
                return SyncReport::failure(e.to_string());
            }
        };

        let total_remote = records.len();
        let mut inserted = 0;
        let mut updated = 0;
        let mut ignored = 0;
        let mut errors = Vec::new();

        for record in records {
            match self.apply_record(&record) {
                Ok(Applied::Inserted) => inserted += 1,
                Ok(Applied::Updated) => updated += 1,
                Ok(Applied::Ignored) => ignored += 1,
                Err(e) => {
                    warn!(key = %record.key, error = %e, "record skipped");
                    errors.push(format!("record '{}': {}", record.key, e));
                }
            }
        }

        info!(total_remote, inserted, updated, ignored, failed = errors.len(), "reconciliation finished");
        SyncReport {
            success: true,
            message: format!(
                "{total_remote} remote records: {inserted} inserted, {updated} updated, {ignored} unchanged"
            ),
            inserted,
            updated,
            ignored,
            errors,
            total_remote,
            completed_at: epoch_secs(),
        }
    }

    /// Fetch and decode the snapshot without persisting anything. Records
    /// that fail to parse are isolated into `errors`, same as in a run.
    pub async fn preview(&self) -> Result<SyncPreview, SyncError> {
        let raw = self.fetch_snapshot().await?;

        let mut records = Vec::new();
        let mut errors = Vec::new();
        for record in raw {
            match extract_fields(&record.body) {
                Ok(fields) => records.push(PreviewRecord {
                    key: record.key,
                    fields,
                }),
                Err(e) => errors.push(format!("record '{}': {}", record.key, e)),
            }
        }
        Ok(SyncPreview { records, errors })
    }

    /// Number of reports currently held locally.
    pub fn local_count(&self) -> Result<u64, SyncError> {
        Ok(self.store.count()?)
    }

    async fn fetch_snapshot(&self) -> Result<Vec<RemoteRecord>, SyncError> {
        // Dropping the fetch future on timeout cancels the request; nothing
        // keeps running behind the reconciler's back.
        match tokio::time::timeout(self.deadline, self.source.fetch_all()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::RemoteTimeout(self.deadline.as_secs())),
        }
    }

    fn apply_record(&self, record: &RemoteRecord) -> Result<Applied, SyncError> {
        let fields = extract_fields(&record.body)?;
        let (local_status, progress) = derive_local_status(fields.status.as_deref());

        match self.store.find_by_remote_key(&record.key)? {
            None => {
                self.store
                    .insert_remote(&record.key, &fields, local_status, progress)?;
                Ok(Applied::Inserted)
            }
            Some(existing) => {
                if fields_differ(&existing, &fields) {
                    self.store
                        .apply_remote_update(&record.key, &fields, local_status, progress)?;
                    Ok(Applied::Updated)
                } else {
                    Ok(Applied::Ignored)
                }
            }
        }
    }
}

enum Applied {
    Inserted,
    Updated,
    Ignored,
}

// ── Record Decoding ─────────────────────────────────────────────────

/// Pull the remote-owned fields out of a record body. The body must be an
/// object; individual fields are optional and decoded defensively.
pub fn extract_fields(body: &Value) -> Result<RemoteFields, SyncError> {
    let Value::Object(map) = body else {
        return Err(SyncError::Malformed(format!(
            "record body is not an object: {body}"
        )));
    };

    Ok(RemoteFields {
        reporter_uid: string_field(map.get("userId")),
        reporter_email: string_field(map.get("userEmail")),
        latitude: numeric_field(map.get("latitude")),
        longitude: numeric_field(map.get("longitude")),
        problem_id: string_field(map.get("problemeId")),
        problem_name: string_field(map.get("problemeNom")),
        description: string_field(map.get("description")),
        status: string_field(map.get("status")),
        surface: numeric_field(map.get("surface")),
        budget: numeric_field(map.get("budget")),
        photo_url: string_field(map.get("photoUrl")),
        created_at_remote: numeric_field(map.get("dateCreation")).map(|millis| millis as i64),
        company_id: string_field(map.get("entrepriseId")),
        company_name: string_field(map.get("entrepriseNom")),
    })
}

/// Decode an optional string field, treating empty strings as absent.
fn string_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Decode an optional numeric field. Numbers stored as strings (a common
/// artifact of hand-entered remote data) are accepted too.
fn numeric_field(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// True when any diffed remote field changed. Coordinates, reporter and
/// company metadata ride along on an update but never trigger one on
/// their own. Float fields compare exactly: the remote is the only
/// writer, so identical snapshots carry identical bit patterns.
pub fn fields_differ(existing: &Report, incoming: &RemoteFields) -> bool {
    existing.status != incoming.status
        || existing.description != incoming.description
        || existing.problem_name != incoming.problem_name
        || existing.surface != incoming.surface
        || existing.budget != incoming.budget
}

/// Map a remote status onto the local workflow state and its completion
/// percentage. Unknown or missing statuses fall back to `nouveau`.
pub fn derive_local_status(status: Option<&str>) -> (&'static str, i32) {
    match status.map(str::trim).map(str::to_lowercase).as_deref() {
        Some("en_cours") => ("en_cours", 50),
        Some("termine") | Some("traite") => ("termine", 100),
        Some("rejete") => ("rejete", 0),
        _ => ("nouveau", 0),
    }
}
