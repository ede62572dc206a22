//! Dual-mode authentication gateway.
//!
//! Login is remote-first: the hosted identity provider is the authority
//! whenever it can be reached, and its verdicts (wrong password, disabled
//! account) are final. Only when the provider is *unreachable* does the
//! gateway fall back to the locally cached credential, so a citizen in a
//! dead zone can still open the app. Every path — online, offline, and
//! every failure — flows through the same lockout ledger.

use crate::auth::lockout::LockoutPolicy;
use crate::auth::provider::{ProviderError, RemoteIdentityProvider, RemoteUser};
use crate::auth::session::SessionManager;
use crate::auth::store::{
    constant_time_eq, generate_salt, hash_password, AccountStore, NewAccount,
};
use crate::error::AuthError;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Prefix marking tokens minted locally during an offline fallback login.
pub const OFFLINE_TOKEN_PREFIX: &str = "local-token-";

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    /// Provider uid; absent for accounts that cached credentials before a
    /// uid was known.
    pub uid: Option<String>,
    pub email: String,
    /// True when the provider was unreachable and the cached credential
    /// authenticated this login.
    pub offline: bool,
}

/// Orchestrates login, registration, and provider-mirrored account admin.
pub struct AuthGateway {
    accounts: Arc<AccountStore>,
    lockout: Arc<LockoutPolicy>,
    sessions: Arc<SessionManager>,
    provider: Arc<dyn RemoteIdentityProvider>,
}

impl AuthGateway {
    pub fn new(
        accounts: Arc<AccountStore>,
        lockout: Arc<LockoutPolicy>,
        sessions: Arc<SessionManager>,
        provider: Arc<dyn RemoteIdentityProvider>,
    ) -> Self {
        Self {
            accounts,
            lockout,
            sessions,
            provider,
        }
    }

    /// Authenticate an email/password pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = email.trim();
        self.lockout.check_attempt(email)?;
        if let Some(account) = self.accounts.find_by_email(email)? {
            // The locally mirrored disable flag refuses the login outright;
            // it is not a lockout and does not report as one.
            if account.disabled {
                return Err(AuthError::AccountDisabled);
            }
        }

        match self.provider.verify_password(email, password).await {
            Ok(user) => self.complete_online_login(user, password).await,
            Err(ProviderError::Network(reason)) => {
                warn!(email = %email, %reason, "identity provider unreachable, trying cached credential");
                self.offline_login(email, password)
            }
            Err(ProviderError::Disabled) => Err(AuthError::AccountDisabled),
            Err(ProviderError::InvalidCredentials) => self.reject(email),
            // Quota, malformed responses, unrecognized verdicts: surfaced
            // as provider failures, never counted against the account.
            Err(other) => {
                warn!(email = %email, error = %other, "provider error during login");
                Err(AuthError::Provider(other.to_string()))
            }
        }
    }

    async fn complete_online_login(
        &self,
        user: RemoteUser,
        password: &str,
    ) -> Result<LoginOutcome, AuthError> {
        if user.disabled {
            return Err(AuthError::AccountDisabled);
        }

        self.lockout.record_success(&user.email)?;

        // Ensure a local row exists, then refresh the cached credential so
        // the next offline login works with the password used just now.
        if self.accounts.find_by_email(&user.email)?.is_none() {
            self.accounts.create(NewAccount {
                uid: Some(&user.uid),
                email: &user.email,
                display_name: user.display_name.as_deref(),
                ..Default::default()
            })?;
        }
        let salt = generate_salt();
        let hash = hash_password(password, &salt);
        self.accounts
            .cache_credentials(&user.email, Some(&user.uid), &hash, &salt)?;

        let token = self
            .provider
            .issue_login_token(&user.uid)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        self.sessions
            .create_session(&token, &user.email, Some(&user.uid))?;

        info!(email = %user.email, uid = %user.uid, "online login succeeded");
        Ok(LoginOutcome {
            token,
            uid: Some(user.uid),
            email: user.email,
            offline: false,
        })
    }

    fn offline_login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let account = self
            .accounts
            .find_by_email(email)?
            .filter(|a| a.password_hash.is_some());
        let Some(account) = account else {
            // No cached credential: this account never logged in online
            // from this device, so offline verification is impossible.
            return Err(AuthError::NeverSyncedLocally(email.to_string()));
        };

        let (Some(stored_hash), Some(salt)) = (&account.password_hash, &account.salt) else {
            return Err(AuthError::NeverSyncedLocally(email.to_string()));
        };
        let candidate = hash_password(password, salt);
        if !constant_time_eq(candidate.as_bytes(), stored_hash.as_bytes()) {
            return self.reject(email);
        }

        self.lockout.record_success(email)?;
        self.accounts.touch_last_login(email)?;

        let token = format!("{}{}", OFFLINE_TOKEN_PREFIX, Uuid::new_v4());
        self.sessions
            .create_session(&token, email, account.uid.as_deref())?;

        info!(email = %email, "offline fallback login succeeded");
        Ok(LoginOutcome {
            token,
            uid: account.uid,
            email: account.email,
            offline: true,
        })
    }

    /// Record the failure, then re-check so a freshly triggered lock is
    /// surfaced on this attempt rather than the next one.
    fn reject(&self, email: &str) -> Result<LoginOutcome, AuthError> {
        self.lockout.record_failure(email)?;
        self.lockout.check_attempt(email)?;
        Err(AuthError::InvalidCredentials)
    }

    /// Register a new account on the provider and mirror it locally with a
    /// cached credential, so the very first offline login can succeed.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<LoginOutcome, AuthError> {
        let email = email.trim();
        let user = self
            .provider
            .create_user(email, password, display_name)
            .await
            .map_err(|e| match e {
                ProviderError::Network(r) => AuthError::Network(r),
                ProviderError::Conflict(r) => AuthError::Provider(r),
                other => AuthError::Provider(other.to_string()),
            })?;

        let salt = generate_salt();
        let hash = hash_password(password, &salt);
        match self.accounts.find_by_email(email)? {
            // A shadow row from earlier failed guesses may already exist.
            Some(_) => self
                .accounts
                .cache_credentials(email, Some(&user.uid), &hash, &salt)?,
            None => {
                self.accounts.create(NewAccount {
                    uid: Some(&user.uid),
                    email,
                    display_name,
                    password_hash: Some(&hash),
                    salt: Some(&salt),
                    ..Default::default()
                })?;
            }
        }
        self.lockout.record_success(email)?;

        let token = self
            .provider
            .issue_login_token(&user.uid)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        self.sessions.create_session(&token, email, Some(&user.uid))?;

        info!(email = %email, uid = %user.uid, "account registered");
        Ok(LoginOutcome {
            token,
            uid: Some(user.uid),
            email: email.to_string(),
            offline: false,
        })
    }

    /// Verify a bearer token. Offline tokens are validated against the
    /// session ledger; provider tokens are checked remotely first with the
    /// ledger as fallback.
    pub async fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        if token.starts_with(OFFLINE_TOKEN_PREFIX) {
            return match self.sessions.get(token)? {
                Some(session) if self.sessions.is_valid(token)? => Ok(session.email),
                _ => Err(AuthError::InvalidCredentials),
            };
        }

        match self.provider.verify_token(token).await {
            Ok(uid) => {
                let account = self
                    .accounts
                    .find_by_uid(&uid)?
                    .ok_or(AuthError::UnknownAccount(uid))?;
                Ok(account.email)
            }
            Err(ProviderError::Network(_)) => match self.sessions.get(token)? {
                Some(session) if self.sessions.is_valid(token)? => Ok(session.email),
                _ => Err(AuthError::InvalidCredentials),
            },
            Err(_) => Err(AuthError::InvalidCredentials),
        }
    }

    /// Disable an account on the provider and mirror the flag locally,
    /// revoking its sessions. The lockout state is untouched so a later
    /// re-enable does not depend on it.
    pub async fn disable_user(&self, uid: &str) -> Result<(), AuthError> {
        self.provider
            .set_disabled(uid, true)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        self.accounts.set_disabled_by_uid(uid, true)?;
        if let Some(account) = self.accounts.find_by_uid(uid)? {
            self.sessions.invalidate_all(&account.email)?;
        }
        info!(uid = %uid, "account disabled");
        Ok(())
    }

    /// Re-enable an account on the provider and clear the local mirror,
    /// failure counter included.
    pub async fn enable_user(&self, uid: &str) -> Result<(), AuthError> {
        self.provider
            .set_disabled(uid, false)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        self.accounts.set_disabled_by_uid(uid, false)?;
        info!(uid = %uid, "account enabled");
        Ok(())
    }

    /// Update display name and/or email on the provider, then locally.
    pub async fn update_profile(
        &self,
        uid: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), AuthError> {
        self.provider
            .update_user(uid, display_name, email)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        self.accounts.update_profile(uid, display_name, email)?;
        Ok(())
    }
}
