//! Identifier types shared across the wire and the state machines.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use uuid::Uuid;

use crate::errors::{ProtocolError, Result};

/// Numeric user identity.
///
/// Never zero: the legacy presence encoding folds the online flag into the
/// sign of the id, which leaves no room for `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(u64);

impl UserId {
    /// Validate and wrap a raw id.
    pub fn new(raw: u64) -> Result<Self> {
        if raw == 0 {
            return Err(ProtocolError::InvalidUserId(raw.to_string()));
        }
        Ok(Self(raw))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Parse from decimal text.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: u64 =
            text.trim().parse().map_err(|_| ProtocolError::InvalidUserId(text.to_string()))?;
        Self::new(raw)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Relays disagree on whether ids are numbers or numeric strings.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self::new(n).map_err(de::Error::custom),
            Raw::Text(s) => Self::parse(&s).map_err(de::Error::custom),
        }
    }
}

/// Identity of a message within its conversation.
///
/// Optimistic messages carry a client-generated `Local` id until the relay
/// echoes them back with the stored id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Client-generated, not yet confirmed.
    Local(Uuid),
    /// Assigned by the message store.
    Server(u64),
}

impl MessageId {
    /// Whether the relay has confirmed this message.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Server(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(uuid) => write!(f, "local-{uuid}"),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(UserId::new(0).is_err());
        assert!(UserId::parse("0").is_err());
        assert!(serde_json::from_str::<UserId>("0").is_err());
    }

    #[test]
    fn accepts_number_or_string() {
        assert_eq!(serde_json::from_str::<UserId>("42").unwrap().get(), 42);
        assert_eq!(serde_json::from_str::<UserId>("\"42\"").unwrap().get(), 42);
        assert!(serde_json::from_str::<UserId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<UserId>("-1").is_err());
    }

    #[test]
    fn serializes_as_number() {
        let id = UserId::new(7).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        assert_eq!(id.to_string(), "7");
        assert_eq!(format!("{id:>4}|{id:<3}|"), "   7|7  |");
    }
}
