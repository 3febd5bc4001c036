//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection identifier assigned by the transport layer.
///
/// The inner String is private to ensure all construction goes through
/// the defined constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new `ConnectionId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the connection ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Debug session identifier, generated when a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugSessionId(String);

impl DebugSessionId {
    /// Generate a fresh random session ID.
    pub fn generate() -> Self {
        Self(format!("debug_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing session ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DebugSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display_and_conversions() {
        let a = ConnectionId::from("conn-1");
        let b = ConnectionId::new(String::from("conn-1"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "conn-1");
        assert_eq!(a.as_str(), "conn-1");
    }

    #[test]
    fn debug_session_ids_are_unique() {
        let a = DebugSessionId::generate();
        let b = DebugSessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("debug_"));
    }
}
