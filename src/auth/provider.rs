//! Remote identity provider.
//!
//! [`RemoteIdentityProvider`] is the seam between the auth gateway and the
//! hosted identity service. The gateway only cares about three outcome
//! classes on login: verified, rejected, or unreachable — the distinction
//! that drives the offline fallback. [`HttpIdentityProvider`] talks to a
//! REST identity API shaped like Google's identitytoolkit endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Provider-side view of an account.
#[derive(Debug, Clone)]
pub struct RemoteUser {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub disabled: bool,
}

/// Outcome classes for provider calls.
///
/// `Network` is the only variant that triggers the offline fallback; every
/// other variant is an authoritative answer from the provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not be reached: connect failure, DNS, timeout,
    /// or a 5xx that says nothing about the credential.
    #[error("identity provider unreachable: {0}")]
    Network(String),

    /// The provider answered and rejected the credential.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The provider answered and the account is disabled.
    #[error("account disabled")]
    Disabled,

    /// Resource conflict, e.g. registering an email that already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other definitive provider failure.
    #[error("provider error: {0}")]
    Other(String),
}

/// Remote identity service operations.
#[async_trait]
pub trait RemoteIdentityProvider: Send + Sync {
    /// Verify an email/password pair. Ok means the credential is valid and
    /// the account enabled on the provider side.
    async fn verify_password(&self, email: &str, password: &str)
        -> Result<RemoteUser, ProviderError>;

    /// Look up a user by email.
    async fn get_user_by_email(&self, email: &str) -> Result<RemoteUser, ProviderError>;

    /// Create a new user, returning its uid.
    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<RemoteUser, ProviderError>;

    /// Set or clear the disabled flag.
    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), ProviderError>;

    /// Update display name and/or email.
    async fn update_user(
        &self,
        uid: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), ProviderError>;

    /// Mint a session-bearing token for a verified user.
    async fn issue_login_token(&self, uid: &str) -> Result<String, ProviderError>;

    /// Verify a previously issued token, returning the uid it belongs to.
    async fn verify_token(&self, token: &str) -> Result<String, ProviderError>;
}

// ── HTTP Implementation ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VerifyPasswordResponse {
    #[serde(rename = "localId")]
    local_id: String,
    email: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    users: Option<Vec<LookupUser>>,
}

#[derive(Debug, Deserialize)]
struct LookupUser {
    #[serde(rename = "localId")]
    local_id: String,
    email: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(rename = "localId")]
    local_id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct VerifyTokenResponse {
    uid: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// REST client for the hosted identity service.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}?key={}", self.base_url, action, self.api_key)
    }

    async fn post_json(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(action))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if status.is_success() {
            return Ok(text);
        }
        if status.is_server_error() {
            // 5xx says nothing about the credential; treat as unreachable.
            warn!(%status, action, "identity provider server error");
            return Err(ProviderError::Network(format!("HTTP {status}")));
        }

        Err(classify_api_error(&text, status.as_u16()))
    }
}

#[async_trait]
impl RemoteIdentityProvider for HttpIdentityProvider {
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, ProviderError> {
        debug!(email = %email, "verifying password against identity provider");
        let text = self
            .post_json(
                "accounts:signInWithPassword",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        let parsed: VerifyPasswordResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(RemoteUser {
            uid: parsed.local_id,
            email: parsed.email,
            display_name: parsed.display_name,
            disabled: false,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> Result<RemoteUser, ProviderError> {
        let text = self
            .post_json(
                "accounts:lookup",
                serde_json::json!({ "email": [email] }),
            )
            .await?;

        let parsed: LookupResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Other(e.to_string()))?;
        let user = parsed
            .users
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or(ProviderError::InvalidCredentials)?;

        Ok(RemoteUser {
            uid: user.local_id,
            email: user.email,
            display_name: user.display_name,
            disabled: user.disabled,
        })
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<RemoteUser, ProviderError> {
        let text = self
            .post_json(
                "accounts:signUp",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "displayName": display_name,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        let parsed: SignUpResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(RemoteUser {
            uid: parsed.local_id,
            email: parsed.email,
            display_name: display_name.map(str::to_string),
            disabled: false,
        })
    }

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), ProviderError> {
        self.post_json(
            "accounts:update",
            serde_json::json!({ "localId": uid, "disableUser": disabled }),
        )
        .await?;
        Ok(())
    }

    async fn update_user(
        &self,
        uid: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.post_json(
            "accounts:update",
            serde_json::json!({
                "localId": uid,
                "displayName": display_name,
                "email": email,
            }),
        )
        .await?;
        Ok(())
    }

    async fn issue_login_token(&self, uid: &str) -> Result<String, ProviderError> {
        let text = self
            .post_json("accounts:createCustomToken", serde_json::json!({ "uid": uid }))
            .await?;
        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(parsed.token)
    }

    async fn verify_token(&self, token: &str) -> Result<String, ProviderError> {
        let text = self
            .post_json("accounts:verifyToken", serde_json::json!({ "token": token }))
            .await?;
        let parsed: VerifyTokenResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(parsed.uid)
    }
}

// ── Failure Classification ──────────────────────────────────────────

/// Classify a reqwest transport failure. Anything that never produced an
/// HTTP response counts as unreachable.
fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_timeout() {
        return ProviderError::Network(err.to_string());
    }
    let msg = err.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("dns") || lowered.contains("connection") || lowered.contains("network") {
        return ProviderError::Network(msg);
    }
    ProviderError::Other(msg)
}

/// Classify a 4xx error body from the identity API.
fn classify_api_error(body: &str, status: u16) -> ProviderError {
    let code = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_default();

    match code.as_str() {
        "INVALID_PASSWORD" | "EMAIL_NOT_FOUND" | "INVALID_LOGIN_CREDENTIALS" => {
            ProviderError::InvalidCredentials
        }
        "USER_DISABLED" => ProviderError::Disabled,
        "EMAIL_EXISTS" => ProviderError::Conflict("email already registered".into()),
        _ => ProviderError::Other(format!("HTTP {status}: {code}")),
    }
}
