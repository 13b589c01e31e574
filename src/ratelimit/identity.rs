//! Namespaced identity keys.

use std::fmt;

/// A key that identifies a client for counting and blocking.
///
/// Raw identities are namespaced by kind, so an IP `abc` and a token `abc`
/// never share a counter or a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Client IP address
    Ip(String),
    /// Opaque access token
    Token(String),
}

impl IdentityKey {
    /// Key for a client IP address.
    pub fn ip(address: impl Into<String>) -> Self {
        IdentityKey::Ip(address.into())
    }

    /// Key for an access token.
    pub fn token(value: impl Into<String>) -> Self {
        IdentityKey::Token(value.into())
    }

    /// The namespace prefix, without the separator.
    pub fn namespace(&self) -> &'static str {
        match self {
            IdentityKey::Ip(_) => "ip",
            IdentityKey::Token(_) => "token",
        }
    }

    /// The raw identity value.
    pub fn value(&self) -> &str {
        match self {
            IdentityKey::Ip(value) | IdentityKey::Token(value) => value,
        }
    }

    /// The string used as the counter store key, e.g. `ip:10.0.0.1`.
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}", self.namespace(), self.value())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace(), self.value())
    }
}
