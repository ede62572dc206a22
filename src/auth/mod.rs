//! Authentication and session resilience.
//!
//! - [`store`] — SQLite account rows with cached offline credentials
//! - [`lockout`] — brute-force failure counting and lazy locking
//! - [`provider`] — the remote identity service seam and its HTTP client
//! - [`gateway`] — remote-first login with local fallback
//! - [`session`] — token ledger with lazy expiry and periodic sweep

pub mod gateway;
pub mod lockout;
pub mod provider;
pub mod session;
pub mod store;

pub use gateway::{AuthGateway, LoginOutcome, OFFLINE_TOKEN_PREFIX};
pub use lockout::LockoutPolicy;
pub use provider::{HttpIdentityProvider, ProviderError, RemoteIdentityProvider, RemoteUser};
pub use session::{Session, SessionManager};
pub use store::{Account, AccountStore, NewAccount};
