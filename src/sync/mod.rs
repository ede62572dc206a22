//! Report synchronization.
//!
//! - [`source`] — the remote snapshot seam and its HTTP client
//! - [`store`] — local report rows with the outbound dirty flag
//! - [`reconciler`] — one-way, idempotent pull reconciliation

pub mod reconciler;
pub mod source;
pub mod store;

pub use reconciler::{PreviewRecord, Reconciler, SyncPreview, SyncReport, FETCH_DEADLINE};
pub use source::{HttpRecordSource, RemoteRecord, RemoteRecordSource};
pub use store::{RemoteFields, Report, ReportStore};
