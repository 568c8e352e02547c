//! Authenticated session credentials
//!
//! Every REST call and the stream handshake carry a bearer token tied
//! to one account. The session source is pluggable so callers can back
//! it with their own token refresh machinery; [`StaticSession`] covers
//! tests and tools that hold a fixed token.

use parking_lot::RwLock;

use crate::types::AccountId;

/// Source of the caller's identity and bearer credential
pub trait AuthSession: Send + Sync {
    /// Token scheme, usually "bearer"
    fn token_type(&self) -> String;

    /// Current access token
    fn access_token(&self) -> String;

    /// Account the token belongs to
    fn account_id(&self) -> AccountId;

    /// Display name of the account, shown in member meta
    fn display_name(&self) -> String;

    /// Full Authorization header value
    fn bearer(&self) -> String {
        format!("{} {}", self.token_type(), self.access_token())
    }
}

/// Session holding a fixed account and a swappable token
pub struct StaticSession {
    account_id: AccountId,
    display_name: String,
    access_token: RwLock<String>,
}

impl StaticSession {
    /// Build a session from an account and its current token
    pub fn new(
        account_id: AccountId,
        display_name: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            display_name: display_name.into(),
            access_token: RwLock::new(access_token.into()),
        }
    }

    /// Replace the stored token after an out-of-band refresh
    pub fn replace_token(&self, token: impl Into<String>) {
        *self.access_token.write() = token.into();
    }
}

impl AuthSession for StaticSession {
    fn token_type(&self) -> String {
        "bearer".to_string()
    }

    fn access_token(&self) -> String {
        self.access_token.read().clone()
    }

    fn account_id(&self) -> AccountId {
        self.account_id.clone()
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }
}
