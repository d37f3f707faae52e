use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, OperationError};
use crate::subscription::Subscription;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub uid: UserId,
    #[serde(default)]
    pub email: String,
}

impl Principal {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: UserId::new(uid),
            email: email.into(),
        }
    }
}

pub type SessionListener = Arc<dyn Fn(Option<Principal>) + Send + Sync>;

/// Identity provider contract.
///
/// `on_change` must deliver the current principal (or `None`) as soon as the
/// listener is registered, then again on every transition. It is the only
/// source of truth for whether anyone is signed in; the return values of
/// `sign_up`/`sign_in` are informational.
pub trait SessionManager: Send + Sync {
    fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    fn sign_out(&self) -> Result<(), OperationError>;

    fn on_change(&self, listener: SessionListener) -> Subscription;
}
