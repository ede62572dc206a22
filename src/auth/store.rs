//! SQLite-backed account store.
//!
//! One row per account, keyed by email (unique, case-insensitive). The
//! remote provider owns the authoritative identity; this table mirrors the
//! pieces the local engines need: the lockout counters, the cached password
//! hash that makes offline login possible, and the provider uid once it is
//! known. `uid` stays NULL for shadow rows provisioned by a failed login
//! against an email the provider never confirmed.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Role assigned to new and shadow accounts.
pub const DEFAULT_ROLE: &str = "USER";

/// A local account row.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    /// Provider uid; NULL until the first confirmed online login.
    pub uid: Option<String>,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    /// Cached credential enabling offline login; NULL until the first
    /// successful online login or registration.
    pub password_hash: Option<String>,
    pub salt: Option<String>,
    pub failed_attempts: u32,
    /// Set by the lockout policy when the failure ceiling is hit, or by an
    /// explicit admin action. Cleared only by admin unlock.
    pub locked: bool,
    /// Mirror of the provider-side disable flag. Independent of `locked`:
    /// a disabled account is refused even with a clean failure counter.
    pub disabled: bool,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

/// Fields for a freshly created account row.
#[derive(Debug, Default)]
pub struct NewAccount<'a> {
    pub uid: Option<&'a str>,
    pub email: &'a str,
    pub display_name: Option<&'a str>,
    pub password_hash: Option<&'a str>,
    pub salt: Option<&'a str>,
    pub failed_attempts: u32,
}

/// SQLite-backed account store.
pub struct AccountStore {
    conn: Mutex<rusqlite::Connection>,
}

impl AccountStore {
    /// Open (or create) the account database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid TEXT UNIQUE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                display_name TEXT,
                role TEXT NOT NULL DEFAULT 'USER',
                password_hash TEXT,
                salt TEXT,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                locked INTEGER NOT NULL DEFAULT 0,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_uid ON accounts(uid);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new account row. Fails if the email is already taken.
    pub fn create(&self, new: NewAccount<'_>) -> Result<Account> {
        let email = new.email.trim();
        if email.is_empty() {
            bail!("Email cannot be empty");
        }

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO accounts (uid, email, display_name, role, password_hash, salt, failed_attempts, locked, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            rusqlite::params![
                new.uid,
                email,
                new.display_name,
                DEFAULT_ROLE,
                new.password_hash,
                new.salt,
                new.failed_attempts,
                epoch_secs(),
            ],
        );

        match result {
            Ok(_) => {
                drop(conn);
                self.find_by_email(email)?
                    .ok_or_else(|| anyhow::anyhow!("Account row vanished after insert"))
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("An account with email '{}' already exists", email)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an account by email (case-insensitive).
    pub fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT id, uid, email, display_name, role, password_hash, salt,
                    failed_attempts, locked, disabled, created_at, last_login
             FROM accounts WHERE email = ?1 COLLATE NOCASE",
            rusqlite::params![email.trim()],
            map_account,
        );

        match row {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an account by provider uid.
    pub fn find_by_uid(&self, uid: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT id, uid, email, display_name, role, password_hash, salt,
                    failed_attempts, locked, disabled, created_at, last_login
             FROM accounts WHERE uid = ?1",
            rusqlite::params![uid],
            map_account,
        );

        match row {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the failure counter and lock flag for an account.
    pub fn set_attempts(&self, email: &str, failed_attempts: u32, locked: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts SET failed_attempts = ?1, locked = ?2 WHERE email = ?3 COLLATE NOCASE",
            rusqlite::params![failed_attempts, locked, email.trim()],
        )?;
        Ok(())
    }

    /// Refresh the cached credential after a successful online login or
    /// registration, attaching the provider uid when it was unknown.
    pub fn cache_credentials(
        &self,
        email: &str,
        uid: Option<&str>,
        password_hash: &str,
        salt: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts
             SET password_hash = ?1,
                 salt = ?2,
                 uid = COALESCE(?3, uid),
                 last_login = ?4
             WHERE email = ?5 COLLATE NOCASE",
            rusqlite::params![password_hash, salt, uid, epoch_secs(), email.trim()],
        )?;
        Ok(())
    }

    /// Update the last-login timestamp.
    pub fn touch_last_login(&self, email: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts SET last_login = ?1 WHERE email = ?2 COLLATE NOCASE",
            rusqlite::params![epoch_secs(), email.trim()],
        )?;
        Ok(())
    }

    /// Mirror a provider-side disable/enable onto the local row. The
    /// lockout `locked` flag is left alone when disabling; re-enabling
    /// gives the account a clean slate (counter, lock, and disable flag).
    pub fn set_disabled_by_uid(&self, uid: &str, disabled: bool) -> Result<()> {
        let conn = self.conn.lock();
        if disabled {
            conn.execute(
                "UPDATE accounts SET disabled = 1 WHERE uid = ?1",
                rusqlite::params![uid],
            )?;
        } else {
            conn.execute(
                "UPDATE accounts SET disabled = 0, locked = 0, failed_attempts = 0 WHERE uid = ?1",
                rusqlite::params![uid],
            )?;
        }
        Ok(())
    }

    /// Mirror a provider-side profile update onto the local row.
    pub fn update_profile(
        &self,
        uid: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts
             SET display_name = COALESCE(?1, display_name),
                 email = COALESCE(?2, email)
             WHERE uid = ?3",
            rusqlite::params![display_name, email, uid],
        )?;
        Ok(())
    }

    /// Count account rows.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        uid: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        role: row.get(4)?,
        password_hash: row.get(5)?,
        salt: row.get(6)?,
        failed_attempts: row.get(7)?,
        locked: row.get(8)?,
        disabled: row.get(9)?,
        created_at: row.get(10)?,
        last_login: row.get(11)?,
    })
}

// ── Cryptographic Helpers ───────────────────────────────────────────

/// Generate a random salt (hex-encoded).
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, AccountStore) {
        let tmp = TempDir::new().unwrap();
        let store = AccountStore::open(&tmp.path().join("accounts.db")).unwrap();
        (tmp, store)
    }

    #[test]
    fn create_and_find_by_email() {
        let (_tmp, store) = test_store();

        let account = store
            .create(NewAccount {
                uid: Some("uid-1"),
                email: "citizen@example.com",
                display_name: Some("Citizen"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(account.email, "citizen@example.com");
        assert_eq!(account.role, "USER");
        assert_eq!(account.failed_attempts, 0);
        assert!(!account.locked);

        let found = store.find_by_email("CITIZEN@example.com").unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().uid.as_deref(), Some("uid-1"));
    }

    #[test]
    fn duplicate_email_fails() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                email: "dup@example.com",
                ..Default::default()
            })
            .unwrap();
        let result = store.create(NewAccount {
            email: "dup@example.com",
            ..Default::default()
        });
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[test]
    fn shadow_row_has_no_uid_or_hash() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                email: "ghost@example.com",
                failed_attempts: 1,
                ..Default::default()
            })
            .unwrap();

        let account = store.find_by_email("ghost@example.com").unwrap().unwrap();
        assert!(account.uid.is_none());
        assert!(account.password_hash.is_none());
        assert_eq!(account.failed_attempts, 1);
    }

    #[test]
    fn cache_credentials_attaches_uid_and_hash() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                email: "late@example.com",
                ..Default::default()
            })
            .unwrap();

        let salt = generate_salt();
        let hash = hash_password("hunter22", &salt);
        store
            .cache_credentials("late@example.com", Some("uid-late"), &hash, &salt)
            .unwrap();

        let account = store.find_by_email("late@example.com").unwrap().unwrap();
        assert_eq!(account.uid.as_deref(), Some("uid-late"));
        assert_eq!(account.password_hash.as_deref(), Some(hash.as_str()));
        assert!(account.last_login.is_some());
    }

    #[test]
    fn cache_credentials_keeps_existing_uid_when_none() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                uid: Some("uid-keep"),
                email: "keep@example.com",
                ..Default::default()
            })
            .unwrap();

        store
            .cache_credentials("keep@example.com", None, "h", "s")
            .unwrap();
        let account = store.find_by_email("keep@example.com").unwrap().unwrap();
        assert_eq!(account.uid.as_deref(), Some("uid-keep"));
    }

    #[test]
    fn set_attempts_persists() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                email: "attempts@example.com",
                ..Default::default()
            })
            .unwrap();
        store.set_attempts("attempts@example.com", 4, true).unwrap();

        let account = store
            .find_by_email("attempts@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(account.failed_attempts, 4);
        assert!(account.locked);
    }

    #[test]
    fn disable_leaves_lockout_state_alone() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                uid: Some("uid-dis"),
                email: "disable@example.com",
                ..Default::default()
            })
            .unwrap();
        store.set_attempts("disable@example.com", 2, false).unwrap();

        store.set_disabled_by_uid("uid-dis", true).unwrap();
        let account = store.find_by_email("disable@example.com").unwrap().unwrap();
        assert!(account.disabled);
        assert!(!account.locked);
        assert_eq!(account.failed_attempts, 2);
    }

    #[test]
    fn enable_by_uid_gives_a_clean_slate() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                uid: Some("uid-en"),
                email: "enable@example.com",
                ..Default::default()
            })
            .unwrap();
        store.set_attempts("enable@example.com", 5, true).unwrap();
        store.set_disabled_by_uid("uid-en", true).unwrap();

        store.set_disabled_by_uid("uid-en", false).unwrap();
        let account = store.find_by_email("enable@example.com").unwrap().unwrap();
        assert!(!account.disabled);
        assert!(!account.locked);
        assert_eq!(account.failed_attempts, 0);
    }

    #[test]
    fn update_profile_by_uid() {
        let (_tmp, store) = test_store();

        store
            .create(NewAccount {
                uid: Some("uid-p"),
                email: "profile@example.com",
                display_name: Some("Before"),
                ..Default::default()
            })
            .unwrap();

        store.update_profile("uid-p", Some("After"), None).unwrap();
        let account = store.find_by_uid("uid-p").unwrap().unwrap();
        assert_eq!(account.display_name.as_deref(), Some("After"));
        assert_eq!(account.email, "profile@example.com");
    }

    #[test]
    fn password_hash_is_deterministic_with_same_salt() {
        let h1 = hash_password("test_password", "fixed_salt_value");
        let h2 = hash_password("test_password", "fixed_salt_value");
        assert_eq!(h1, h2);
    }

    #[test]
    fn password_hash_differs_with_different_salt() {
        let h1 = hash_password("test_password", "salt_a");
        let h2 = hash_password("test_password", "salt_b");
        assert_ne!(h1, h2);
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
