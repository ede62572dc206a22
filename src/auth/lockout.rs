//! Brute-force lockout enforcement.
//!
//! The failure counter and lock flag live on the account row; the ceiling is
//! read from [`PolicyStore`] on every decision so an admin change takes
//! effect without restart. Locks are set lazily: an account whose counter
//! already meets the ceiling is locked at the next check even if the flag
//! was never persisted.

use crate::auth::store::{AccountStore, NewAccount};
use crate::error::AuthError;
use crate::policy::PolicyStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Lockout decisions for login attempts.
pub struct LockoutPolicy {
    accounts: Arc<AccountStore>,
    policy: Arc<PolicyStore>,
}

impl LockoutPolicy {
    pub fn new(accounts: Arc<AccountStore>, policy: Arc<PolicyStore>) -> Self {
        Self { accounts, policy }
    }

    /// Gate an incoming login attempt. Unknown emails pass: they cannot be
    /// locked until a failure provisions a shadow row.
    pub fn check_attempt(&self, email: &str) -> Result<(), AuthError> {
        let Some(account) = self.accounts.find_by_email(email)? else {
            return Ok(());
        };

        if account.locked {
            return Err(AuthError::AccountLocked);
        }

        let max = self.policy.max_failed_attempts()?;
        if account.failed_attempts >= max {
            // Counter reached the ceiling before the flag did; persist it now.
            warn!(email = %email, attempts = account.failed_attempts, "locking account lazily");
            self.accounts
                .set_attempts(email, account.failed_attempts, true)?;
            return Err(AuthError::AccountLocked);
        }

        Ok(())
    }

    /// Record a failed credential check. Provisions a shadow row for emails
    /// the store has never seen, so repeat probing of unknown addresses is
    /// throttled the same way as real accounts.
    pub fn record_failure(&self, email: &str) -> Result<(), AuthError> {
        let max = self.policy.max_failed_attempts()?;

        match self.accounts.find_by_email(email)? {
            Some(account) => {
                let attempts = account.failed_attempts.saturating_add(1);
                let lock = attempts >= max;
                if lock {
                    warn!(email = %email, attempts, "account locked after repeated failures");
                }
                self.accounts.set_attempts(email, attempts, lock)?;
            }
            None => {
                info!(email = %email, "provisioning shadow row for unknown email");
                self.accounts.create(NewAccount {
                    email,
                    failed_attempts: 1,
                    ..Default::default()
                })?;
            }
        }

        Ok(())
    }

    /// Reset the counter after a successful login.
    pub fn record_success(&self, email: &str) -> Result<(), AuthError> {
        if self.accounts.find_by_email(email)?.is_some() {
            self.accounts.set_attempts(email, 0, false)?;
        }
        Ok(())
    }

    /// Administrative unlock: clear the counter and flag for an email.
    pub fn reset_attempts(&self, email: &str) -> Result<(), AuthError> {
        match self.accounts.find_by_email(email)? {
            Some(_) => {
                info!(email = %email, "failure counter reset");
                self.accounts.set_attempts(email, 0, false)?;
                Ok(())
            }
            None => Err(AuthError::UnknownAccount(email.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LockoutPolicy, Arc<AccountStore>) {
        let tmp = TempDir::new().unwrap();
        let accounts = Arc::new(AccountStore::open(&tmp.path().join("accounts.db")).unwrap());
        let policy = Arc::new(PolicyStore::open(&tmp.path().join("policy.db")).unwrap());
        let lockout = LockoutPolicy::new(accounts.clone(), policy);
        (tmp, lockout, accounts)
    }

    #[test]
    fn unknown_email_passes_check() {
        let (_tmp, lockout, _accounts) = setup();
        assert!(lockout.check_attempt("nobody@example.com").is_ok());
    }

    #[test]
    fn failure_provisions_shadow_row() {
        let (_tmp, lockout, accounts) = setup();

        lockout.record_failure("guess@example.com").unwrap();
        let account = accounts.find_by_email("guess@example.com").unwrap().unwrap();
        assert_eq!(account.failed_attempts, 1);
        assert!(account.uid.is_none());
    }

    #[test]
    fn locks_at_default_ceiling() {
        let (_tmp, lockout, _accounts) = setup();

        for _ in 0..4 {
            lockout.record_failure("victim@example.com").unwrap();
            assert!(lockout.check_attempt("victim@example.com").is_ok());
        }
        lockout.record_failure("victim@example.com").unwrap();

        let err = lockout.check_attempt("victim@example.com").unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
    }

    #[test]
    fn lazy_lock_persists_flag() {
        let (_tmp, lockout, accounts) = setup();

        accounts
            .create(NewAccount {
                email: "stale@example.com",
                failed_attempts: 7,
                ..Default::default()
            })
            .unwrap();

        assert!(matches!(
            lockout.check_attempt("stale@example.com"),
            Err(AuthError::AccountLocked)
        ));
        let account = accounts.find_by_email("stale@example.com").unwrap().unwrap();
        assert!(account.locked);
    }

    #[test]
    fn success_resets_counter() {
        let (_tmp, lockout, accounts) = setup();

        lockout.record_failure("reset@example.com").unwrap();
        lockout.record_failure("reset@example.com").unwrap();
        lockout.record_success("reset@example.com").unwrap();

        let account = accounts.find_by_email("reset@example.com").unwrap().unwrap();
        assert_eq!(account.failed_attempts, 0);
        assert!(!account.locked);
    }

    #[test]
    fn admin_reset_unlocks() {
        let (_tmp, lockout, _accounts) = setup();

        for _ in 0..5 {
            lockout.record_failure("admin@example.com").unwrap();
        }
        assert!(lockout.check_attempt("admin@example.com").is_err());

        lockout.reset_attempts("admin@example.com").unwrap();
        assert!(lockout.check_attempt("admin@example.com").is_ok());
    }

    #[test]
    fn admin_reset_unknown_email_errors() {
        let (_tmp, lockout, _accounts) = setup();
        assert!(matches!(
            lockout.reset_attempts("ghost@example.com"),
            Err(AuthError::UnknownAccount(_))
        ));
    }
}
