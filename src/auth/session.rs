//! Session ledger.
//!
//! Every issued token gets a row with an absolute expiry computed from the
//! policy store at creation time. Expiry is enforced lazily: a validation
//! that finds an expired row flips it inactive and reports invalid, so no
//! timer has to fire for correctness. A background sweeper deletes expired
//! rows to keep the table from growing without bound.

use crate::error::AuthError;
use crate::policy::PolicyStore;
use anyhow::Result;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::auth::store::epoch_secs;

/// A session row.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub email: String,
    pub uid: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub active: bool,
}

/// SQLite-backed session ledger.
pub struct SessionManager {
    conn: Mutex<rusqlite::Connection>,
    policy: Arc<PolicyStore>,
}

impl SessionManager {
    /// Open (or create) the session database at the given path.
    pub fn open(db_path: &Path, policy: Arc<PolicyStore>) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                uid TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_email ON sessions(email);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    /// Record a freshly issued token. The expiry is fixed now; later policy
    /// changes only affect sessions created after them.
    pub fn create_session(
        &self,
        token: &str,
        email: &str,
        uid: Option<&str>,
    ) -> Result<Session, AuthError> {
        let duration_minutes = self.policy.session_duration_minutes()?;
        let now = epoch_secs();
        let expires_at = now + i64::from(duration_minutes) * 60;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO sessions (token, email, uid, created_at, expires_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            rusqlite::params![token, email, uid, now, expires_at],
        )
        .map_err(anyhow::Error::from)?;

        debug!(email = %email, expires_at, "session created");
        Ok(Session {
            token: token.to_string(),
            email: email.to_string(),
            uid: uid.map(str::to_string),
            created_at: now,
            expires_at,
            active: true,
        })
    }

    /// Look up a session by token.
    pub fn get(&self, token: &str) -> Result<Option<Session>, AuthError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT token, email, uid, created_at, expires_at, active
             FROM sessions WHERE token = ?1",
            rusqlite::params![token],
            map_session,
        );

        match row {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow::Error::from(e).into()),
        }
    }

    /// Check whether a token names a live session. A row past its expiry is
    /// flipped inactive on the spot.
    pub fn is_valid(&self, token: &str) -> Result<bool, AuthError> {
        let Some(session) = self.get(token)? else {
            return Ok(false);
        };
        if !session.active {
            return Ok(false);
        }
        if session.expires_at <= epoch_secs() {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE sessions SET active = 0 WHERE token = ?1",
                rusqlite::params![token],
            )
            .map_err(anyhow::Error::from)?;
            debug!(email = %session.email, "session expired lazily");
            return Ok(false);
        }
        Ok(true)
    }

    /// Push the expiry of a live session forward by the current policy
    /// duration. An unknown or no-longer-valid token is a no-op, not an
    /// error: `None` says nothing was refreshed.
    pub fn refresh(&self, token: &str) -> Result<Option<Session>, AuthError> {
        if !self.is_valid(token)? {
            return Ok(None);
        }
        let duration_minutes = self.policy.session_duration_minutes()?;
        let expires_at = epoch_secs() + i64::from(duration_minutes) * 60;

        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET expires_at = ?1 WHERE token = ?2",
            rusqlite::params![expires_at, token],
        )
        .map_err(anyhow::Error::from)?;
        drop(conn);

        self.get(token)
    }

    /// Deactivate a single session (logout).
    pub fn invalidate(&self, token: &str) -> Result<(), AuthError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET active = 0 WHERE token = ?1",
            rusqlite::params![token],
        )
        .map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// Deactivate every session belonging to an email, e.g. when the
    /// account is disabled.
    pub fn invalidate_all(&self, email: &str) -> Result<u64, AuthError> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE sessions SET active = 0 WHERE email = ?1 COLLATE NOCASE",
                rusqlite::params![email],
            )
            .map_err(anyhow::Error::from)?;
        if changed > 0 {
            info!(email = %email, count = changed, "sessions revoked");
        }
        Ok(changed as u64)
    }

    /// List live, unexpired sessions for an email.
    pub fn active_sessions(&self, email: &str) -> Result<Vec<Session>, AuthError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT token, email, uid, created_at, expires_at, active
                 FROM sessions
                 WHERE email = ?1 COLLATE NOCASE AND active = 1 AND expires_at > ?2
                 ORDER BY created_at DESC",
            )
            .map_err(anyhow::Error::from)?;
        let rows = stmt
            .query_map(rusqlite::params![email, epoch_secs()], map_session)
            .map_err(anyhow::Error::from)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(anyhow::Error::from)?);
        }
        Ok(sessions)
    }

    /// Delete rows whose expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<u64, AuthError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                rusqlite::params![epoch_secs()],
            )
            .map_err(anyhow::Error::from)?;
        if removed > 0 {
            info!(count = removed, "expired sessions swept");
        }
        Ok(removed as u64)
    }

    /// Spawn the periodic sweeper. Runs until the process exits.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired() {
                    tracing::warn!(error = %e, "session sweep failed");
                }
            }
        })
    }

    #[cfg(test)]
    fn backdate(&self, token: &str, expires_at: i64) {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET expires_at = ?1 WHERE token = ?2",
            rusqlite::params![expires_at, token],
        )
        .unwrap();
    }
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        token: row.get(0)?,
        email: row.get(1)?,
        uid: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        active: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SessionManager) {
        let tmp = TempDir::new().unwrap();
        let policy = Arc::new(PolicyStore::open(&tmp.path().join("policy.db")).unwrap());
        let sessions = SessionManager::open(&tmp.path().join("sessions.db"), policy).unwrap();
        (tmp, sessions)
    }

    #[test]
    fn create_and_validate() {
        let (_tmp, sessions) = setup();

        let session = sessions
            .create_session("tok-1", "a@x.com", Some("uid-a"))
            .unwrap();
        // Default policy: 30 minutes.
        assert_eq!(session.expires_at - session.created_at, 30 * 60);
        assert!(sessions.is_valid("tok-1").unwrap());
        assert!(!sessions.is_valid("tok-missing").unwrap());
    }

    #[test]
    fn expired_session_is_flipped_inactive() {
        let (_tmp, sessions) = setup();

        sessions.create_session("tok-old", "a@x.com", None).unwrap();
        sessions.backdate("tok-old", epoch_secs() - 10);

        assert!(!sessions.is_valid("tok-old").unwrap());
        // The flip is persisted, not just reported.
        let row = sessions.get("tok-old").unwrap().unwrap();
        assert!(!row.active);
    }

    #[test]
    fn refresh_extends_expiry() {
        let (_tmp, sessions) = setup();

        sessions.create_session("tok-r", "a@x.com", None).unwrap();
        sessions.backdate("tok-r", epoch_secs() + 5);

        let refreshed = sessions.refresh("tok-r").unwrap().unwrap();
        assert!(refreshed.expires_at >= epoch_secs() + 29 * 60);
    }

    #[test]
    fn refresh_of_unknown_token_is_a_noop() {
        let (_tmp, sessions) = setup();
        assert!(sessions.refresh("tok-never-issued").unwrap().is_none());
    }

    #[test]
    fn refresh_of_expired_session_is_a_noop() {
        let (_tmp, sessions) = setup();

        sessions.create_session("tok-x", "a@x.com", None).unwrap();
        sessions.backdate("tok-x", epoch_secs() - 1);

        assert!(sessions.refresh("tok-x").unwrap().is_none());
        // The expired row stays expired.
        assert!(!sessions.is_valid("tok-x").unwrap());
    }

    #[test]
    fn invalidate_all_revokes_only_that_email() {
        let (_tmp, sessions) = setup();

        sessions.create_session("tok-a1", "a@x.com", None).unwrap();
        sessions.create_session("tok-a2", "A@X.COM", None).unwrap();
        sessions.create_session("tok-b", "b@x.com", None).unwrap();

        let revoked = sessions.invalidate_all("a@x.com").unwrap();
        assert_eq!(revoked, 2);
        assert!(!sessions.is_valid("tok-a1").unwrap());
        assert!(!sessions.is_valid("tok-a2").unwrap());
        assert!(sessions.is_valid("tok-b").unwrap());
    }

    #[test]
    fn active_sessions_excludes_expired_and_revoked() {
        let (_tmp, sessions) = setup();

        sessions.create_session("tok-live", "a@x.com", None).unwrap();
        sessions.create_session("tok-dead", "a@x.com", None).unwrap();
        sessions.create_session("tok-gone", "a@x.com", None).unwrap();
        sessions.backdate("tok-dead", epoch_secs() - 10);
        sessions.invalidate("tok-gone").unwrap();

        let live = sessions.active_sessions("a@x.com").unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].token, "tok-live");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_removes_expired_rows() {
        let tmp = TempDir::new().unwrap();
        let policy = Arc::new(PolicyStore::open(&tmp.path().join("policy.db")).unwrap());
        let sessions =
            Arc::new(SessionManager::open(&tmp.path().join("sessions.db"), policy).unwrap());

        sessions.create_session("tok-old", "a@x.com", None).unwrap();
        sessions.backdate("tok-old", epoch_secs() - 10);
        sessions.create_session("tok-live", "a@x.com", None).unwrap();

        let handle = sessions.clone().spawn_sweeper(Duration::from_secs(60));
        // The first tick fires immediately; yield until it has run.
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(sessions.get("tok-old").unwrap().is_none());
        assert!(sessions.get("tok-live").unwrap().is_some());
        handle.abort();
    }

    #[test]
    fn sweep_deletes_expired_rows() {
        let (_tmp, sessions) = setup();

        sessions.create_session("tok-keep", "a@x.com", None).unwrap();
        sessions.create_session("tok-drop", "a@x.com", None).unwrap();
        sessions.backdate("tok-drop", epoch_secs() - 10);

        assert_eq!(sessions.sweep_expired().unwrap(), 1);
        assert!(sessions.get("tok-drop").unwrap().is_none());
        assert!(sessions.get("tok-keep").unwrap().is_some());
    }
}
