//! Credential seam for the actuator.

use parking_lot::RwLock;

use crate::error::AuthError;

/// Supplies bearer tokens for the player service.
///
/// Acquiring the first token (browser flow, token cache) happens outside this
/// crate; implementations only hand out the current token and renew it.
pub trait AuthProvider: Send + Sync {
    fn access_token(&self) -> String;

    /// Obtain a fresh token, replacing the current one.
    fn refresh(&self) -> Result<String, AuthError>;
}

/// A token handed over by the participant, e.g. in the relay's initial request.
pub struct StaticToken {
    token: RwLock<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Replace the token, e.g. after the participant renewed it elsewhere.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }
}

impl AuthProvider for StaticToken {
    fn access_token(&self) -> String {
        self.token.read().clone()
    }

    fn refresh(&self) -> Result<String, AuthError> {
        Err(AuthError::RefreshUnsupported)
    }
}
