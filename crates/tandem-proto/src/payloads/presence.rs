//! Presence topic bodies.
//!
//! Relays encode presence in one of two forms:
//!
//! - legacy: the user id as a signed integer, negative meaning offline
//!   (`42` online, `-42` offline), optionally quoted
//! - explicit: `{"userId": 42, "isOnline": true}`
//!
//! Both decode to the same [`PresenceUpdate`]. Zero is rejected in both forms.

use serde::{Deserialize, Serialize};

use crate::{
    UserId,
    errors::{ProtocolError, Result},
};

/// Online/offline transition for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    /// Subject of the update
    pub user_id: UserId,
    /// New status
    pub is_online: bool,
}

impl PresenceUpdate {
    /// Decode a presence body in either encoding.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| ProtocolError::InvalidUtf8("presence body"))?
            .trim();
        let unquoted = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')).unwrap_or(text);

        if let Ok(signed) = unquoted.parse::<i64>() {
            return Self::from_signed(signed);
        }

        serde_json::from_str(text).map_err(|_| ProtocolError::InvalidPresence(text.to_string()))
    }

    /// Decode the legacy signed form.
    pub fn from_signed(signed: i64) -> Result<Self> {
        let user_id = UserId::new(signed.unsigned_abs())?;
        Ok(Self { user_id, is_online: signed > 0 })
    }

    /// Encode in the legacy signed form.
    ///
    /// Ids above `i64::MAX` cannot be represented and fall back to `None`.
    pub fn to_signed(&self) -> Option<i64> {
        let magnitude = i64::try_from(self.user_id.get()).ok()?;
        Some(if self.is_online { magnitude } else { -magnitude })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_sign_carries_status() {
        let online = PresenceUpdate::from_body(b"42").unwrap();
        assert_eq!(online.user_id.get(), 42);
        assert!(online.is_online);

        let offline = PresenceUpdate::from_body(b" -42\n").unwrap();
        assert_eq!(offline.user_id.get(), 42);
        assert!(!offline.is_online);

        let quoted = PresenceUpdate::from_body(b"\"-7\"").unwrap();
        assert!(!quoted.is_online);
    }

    #[test]
    fn explicit_object_form() {
        let update = PresenceUpdate::from_body(br#"{"userId": 9, "isOnline": false}"#).unwrap();
        assert_eq!(update.user_id.get(), 9);
        assert!(!update.is_online);
    }

    #[test]
    fn zero_and_garbage_rejected() {
        assert!(matches!(PresenceUpdate::from_body(b"0"), Err(ProtocolError::InvalidUserId(_))));
        assert!(matches!(PresenceUpdate::from_body(b"-0"), Err(ProtocolError::InvalidUserId(_))));
        assert!(matches!(
            PresenceUpdate::from_body(b"online"),
            Err(ProtocolError::InvalidPresence(_))
        ));
        assert!(PresenceUpdate::from_body(br#"{"userId": 0, "isOnline": true}"#).is_err());
    }
}
