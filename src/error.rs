//! Error taxonomies for the authentication engine and the sync reconciler.
//!
//! Authentication failures are classified and surfaced to the caller
//! verbatim; a `Network` failure is the only one that triggers the local
//! fallback path. Sync per-record failures never appear here — they are
//! collected into the run report — so `SyncError` only covers failures of
//! the snapshot pull itself.

use thiserror::Error;

/// Classified login/registration failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Local lockout policy gate. Terminal until an administrative unblock.
    #[error("account locked after repeated failed login attempts; contact an administrator")]
    AccountLocked,

    /// Wrong password (remote or cached-local check). Always counted as a
    /// failed attempt.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The remote provider reports the account as disabled.
    #[error("account is disabled")]
    AccountDisabled,

    /// Offline login attempted for an account with no cached credential
    /// (no prior successful online login).
    #[error("no cached credentials for {0}; an online login is required first")]
    NeverSyncedLocally(String),

    /// Transient transport failure reaching the identity provider.
    /// Triggers the local fallback; never counted as a failed attempt.
    #[error("identity provider unreachable: {0}")]
    Network(String),

    /// No local account row where one is required.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Any other identity-provider failure (quota, malformed response, ...).
    #[error("identity provider error: {0}")]
    Provider(String),

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Failures of the snapshot pull itself. Per-record apply errors are
/// isolated into the run report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote round trip exceeded the configured deadline. The whole
    /// run fails; nothing from it is applied.
    #[error("remote snapshot fetch exceeded the {0}s deadline")]
    RemoteTimeout(u64),

    /// Non-success HTTP status from the record source.
    #[error("record source returned HTTP {0}")]
    Http(u16),

    /// Connection-level failure reaching the record source.
    #[error("record source unreachable: {0}")]
    Transport(String),

    /// The snapshot body was not the expected keyed-object shape.
    #[error("malformed snapshot payload: {0}")]
    Malformed(String),

    /// Local store failure outside per-record apply.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Validation failures for runtime security-policy updates.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("session duration must be between 1 and 1440 minutes, got {0}")]
    SessionDurationOutOfRange(u32),

    #[error("max failed attempts must be between 1 and 10, got {0}")]
    MaxAttemptsOutOfRange(u32),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
