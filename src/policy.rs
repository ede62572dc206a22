//! Runtime-configurable security policy, persisted as a single SQLite row.
//!
//! Both engines read the policy at the moment of use — session duration when
//! a session is created or refreshed, the attempt limit when a login is
//! gated — so an operator update takes effect on the very next request
//! without a restart. The row is created lazily from static defaults on
//! first access.

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::params;
use serde::Serialize;
use std::path::Path;

use crate::error::PolicyError;

/// Default session lifetime: 30 minutes.
const DEFAULT_SESSION_DURATION_MIN: u32 = 30;

/// Default failed-login limit before lockout.
const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

/// Current security policy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityPolicy {
    /// Session lifetime in minutes, within [1, 1440].
    pub session_duration_minutes: u32,
    /// Consecutive failed logins before lockout, within [1, 10].
    pub max_failed_attempts: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            session_duration_minutes: DEFAULT_SESSION_DURATION_MIN,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
        }
    }
}

/// SQLite-backed singleton policy store.
pub struct PolicyStore {
    conn: Mutex<rusqlite::Connection>,
}

impl PolicyStore {
    /// Open (or create) the policy table at the given database path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS security_policy (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                session_duration_minutes INTEGER NOT NULL,
                max_failed_attempts INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Current policy. Seeds the defaults row if none exists yet.
    pub fn get(&self) -> Result<SecurityPolicy> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT session_duration_minutes, max_failed_attempts FROM security_policy WHERE id = 1",
            [],
            |row| {
                Ok(SecurityPolicy {
                    session_duration_minutes: row.get(0)?,
                    max_failed_attempts: row.get(1)?,
                })
            },
        );

        match row {
            Ok(policy) => Ok(policy),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let defaults = SecurityPolicy::default();
                conn.execute(
                    "INSERT INTO security_policy (id, session_duration_minutes, max_failed_attempts, updated_at)
                     VALUES (1, ?1, ?2, ?3)",
                    params![
                        defaults.session_duration_minutes,
                        defaults.max_failed_attempts,
                        epoch_secs(),
                    ],
                )?;
                tracing::info!("Security policy seeded with defaults");
                Ok(defaults)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validated partial update. `None` fields keep their current value.
    pub fn update(
        &self,
        session_duration_minutes: Option<u32>,
        max_failed_attempts: Option<u32>,
    ) -> Result<SecurityPolicy, PolicyError> {
        if let Some(minutes) = session_duration_minutes {
            if !(1..=1440).contains(&minutes) {
                return Err(PolicyError::SessionDurationOutOfRange(minutes));
            }
        }
        if let Some(attempts) = max_failed_attempts {
            if !(1..=10).contains(&attempts) {
                return Err(PolicyError::MaxAttemptsOutOfRange(attempts));
            }
        }

        let current = self.get()?;
        let next = SecurityPolicy {
            session_duration_minutes: session_duration_minutes
                .unwrap_or(current.session_duration_minutes),
            max_failed_attempts: max_failed_attempts.unwrap_or(current.max_failed_attempts),
        };

        let conn = self.conn.lock();
        conn.execute(
            "UPDATE security_policy
             SET session_duration_minutes = ?1, max_failed_attempts = ?2, updated_at = ?3
             WHERE id = 1",
            params![
                next.session_duration_minutes,
                next.max_failed_attempts,
                epoch_secs(),
            ],
        )
        .map_err(|e| PolicyError::Store(e.into()))?;

        tracing::info!(
            session_duration_minutes = next.session_duration_minutes,
            max_failed_attempts = next.max_failed_attempts,
            "Security policy updated"
        );
        Ok(next)
    }

    /// Convenience accessor used by the lockout gate.
    pub fn max_failed_attempts(&self) -> Result<u32> {
        Ok(self.get()?.max_failed_attempts)
    }

    /// Convenience accessor used by the session manager.
    pub fn session_duration_minutes(&self) -> Result<u32> {
        Ok(self.get()?.session_duration_minutes)
    }
}

fn epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, PolicyStore) {
        let tmp = TempDir::new().unwrap();
        let store = PolicyStore::open(&tmp.path().join("policy.db")).unwrap();
        (tmp, store)
    }

    #[test]
    fn seeds_defaults_on_first_access() {
        let (_tmp, store) = test_store();
        let policy = store.get().unwrap();
        assert_eq!(policy.session_duration_minutes, 30);
        assert_eq!(policy.max_failed_attempts, 5);
    }

    #[test]
    fn update_persists() {
        let (_tmp, store) = test_store();
        store.update(Some(120), Some(3)).unwrap();

        let policy = store.get().unwrap();
        assert_eq!(policy.session_duration_minutes, 120);
        assert_eq!(policy.max_failed_attempts, 3);
    }

    #[test]
    fn partial_update_keeps_other_field() {
        let (_tmp, store) = test_store();
        store.update(Some(90), None).unwrap();

        let policy = store.get().unwrap();
        assert_eq!(policy.session_duration_minutes, 90);
        assert_eq!(policy.max_failed_attempts, 5);
    }

    #[test]
    fn rejects_out_of_range_session_duration() {
        let (_tmp, store) = test_store();
        assert!(matches!(
            store.update(Some(0), None),
            Err(PolicyError::SessionDurationOutOfRange(0))
        ));
        assert!(matches!(
            store.update(Some(1441), None),
            Err(PolicyError::SessionDurationOutOfRange(1441))
        ));
        // Unchanged after rejected updates
        assert_eq!(store.get().unwrap().session_duration_minutes, 30);
    }

    #[test]
    fn rejects_out_of_range_max_attempts() {
        let (_tmp, store) = test_store();
        assert!(matches!(
            store.update(None, Some(0)),
            Err(PolicyError::MaxAttemptsOutOfRange(0))
        ));
        assert!(matches!(
            store.update(None, Some(11)),
            Err(PolicyError::MaxAttemptsOutOfRange(11))
        ));
    }

    #[test]
    fn boundary_values_accepted() {
        let (_tmp, store) = test_store();
        store.update(Some(1), Some(1)).unwrap();
        store.update(Some(1440), Some(10)).unwrap();
        let policy = store.get().unwrap();
        assert_eq!(policy.session_duration_minutes, 1440);
        assert_eq!(policy.max_failed_attempts, 10);
    }
}
