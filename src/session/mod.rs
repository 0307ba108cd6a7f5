//! Authentication session: the single owner of the bearer token.
//!
//! - `claims`: unverified JWT decoding and the [`Session`] value
//! - `store`: persisted token slots and cross-client change events
//! - `manager`: restore, login, logout, expiry sweep, idle refresh
//! - `idle` / `clock`: time sources the manager depends on

mod claims;
mod clock;
mod idle;
mod manager;
pub mod store;

#[cfg(test)]
pub(crate) use claims::test_tokens;

pub use claims::{Session, TokenClaims, decode_claims};
pub use clock::{Clock, ManualClock, SystemClock};
pub use idle::IdleTracker;
pub use manager::{AuthState, SessionManager, SignOutReason, TokenGrant, TokenRefresher};
pub use store::{
    FileTokenStore, MemoryStorage, MemoryTokenStore, StorageEvent, StoreError, TokenStore,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token expired at {0}")]
    Expired(i64),

    #[error("not signed in")]
    NotSignedIn,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("token store error: {0}")]
    Store(#[from] StoreError),
}
