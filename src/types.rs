//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `VisitorId`: UUID-based unique visitor identifier
//! - `RoomId`: normalized room identifier, compared case-insensitively

use uuid::Uuid;

/// Room id meaning "no room". A visitor transitioning here is destroyed.
pub const VOID_ROOM_ID: &str = "";

/// Unique visitor identifier (newtype pattern)
///
/// Stable for the whole connection, unlike the display name which can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisitorId(pub Uuid);

impl VisitorId {
    /// Create a new random visitor ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VisitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VisitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strip brace characters from user supplied room ids and names.
pub fn normalize_name(name: &str) -> String {
    name.chars().filter(|c| *c != '{' && *c != '}').collect()
}

/// Lookup key for names and room ids.
pub fn registry_key(name: &str) -> String {
    name.to_lowercase()
}

/// Room identifier as typed by the first visitor that referenced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Normalize user input into a room id
    pub fn parse(raw: &str) -> Self {
        Self(normalize_name(raw).trim().to_string())
    }

    /// The "no room" sentinel
    pub fn void() -> Self {
        Self(VOID_ROOM_ID.to_string())
    }

    pub fn is_void(&self) -> bool {
        self.0 == VOID_ROOM_ID
    }

    /// Case-insensitive key used by the room registry
    pub fn key(&self) -> String {
        registry_key(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visitor_id_unique() {
        let id1 = VisitorId::new();
        let id2 = VisitorId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_room_id_strips_braces() {
        let id = RoomId::parse(" {Cave} ");
        assert_eq!(id.as_str(), "Cave");
        assert_eq!(id.key(), "cave");
    }

    #[test]
    fn test_room_id_void() {
        assert!(RoomId::void().is_void());
        assert!(RoomId::parse("{}").is_void());
        assert!(!RoomId::parse("lobby").is_void());
    }

    #[test]
    fn test_normalize_name_keeps_other_chars() {
        assert_eq!(normalize_name("a{b}c d"), "abc d");
    }
}
