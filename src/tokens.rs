use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque bearer capability handed to anonymous clients.
///
/// Whoever presents the string owns the posts created with it. Nothing binds
/// it to a client; it never expires and cannot be revoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserToken(String);

impl UserToken {
    /// Issue a fresh, unguessable token (UUIDv4 text form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Ownership check is plain string equality.
    pub fn grants(&self, owner: &str) -> bool {
        self.0 == owner
    }
}

impl From<String> for UserToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
