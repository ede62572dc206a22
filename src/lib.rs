//! Roadwatch core: offline-resilient auth and report synchronization for a
//! citizen road-repair tracker.
//!
//! Two engines, joined by SQLite state:
//!
//! - [`auth`] — remote-first login with a cached-credential offline
//!   fallback, brute-force lockout, and a session ledger with lazy expiry
//! - [`sync`] — one-way, idempotent pull reconciliation of the remote
//!   report snapshot into the local store
//!
//! [`policy`] holds the admin-tunable security knobs both engines read.

pub mod auth;
pub mod config;
pub mod error;
pub mod policy;
pub mod sync;

pub use config::Config;
pub use error::{AuthError, PolicyError, SyncError};
pub use policy::{PolicyStore, SecurityPolicy};
