//! Chat payloads: messages, read receipts and history records.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{UserId, errors::Result};

/// Outbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Local user
    pub sender_id: UserId,
    /// Conversation partner
    pub receiver_id: UserId,
    /// Message text
    pub content: String,
}

/// Read receipt.
///
/// Published by the reader with `receiver_id` = reader and `sender_id` = the
/// author whose messages were read. Delivered to the author unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// User who read the messages
    pub receiver_id: UserId,
    /// Author of the messages that were read
    pub sender_id: UserId,
}

/// Stored chat message as delivered on the message queue or by history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Store-assigned id. Absent on relays that deliver before persisting.
    #[serde(default)]
    pub id: Option<u64>,
    /// Author
    pub sender_id: UserId,
    /// Author display name, when the relay includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Author avatar URL, when the relay includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    /// Recipient
    pub receiver_id: UserId,
    /// Message text
    pub content: String,
    /// Store timestamp
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the recipient has read it
    #[serde(default)]
    pub is_read: bool,
}

impl ChatMessage {
    /// Decode a message-queue body.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Conversation summary returned by the history service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// The other participant, which is also the conversation id
    pub user_id: UserId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Avatar URL
    #[serde(default)]
    pub avatar: Option<String>,
    /// Preview of the newest message
    #[serde(default)]
    pub last_message: Option<String>,
    /// Time of the newest message
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Messages from the other participant not yet read
    #[serde(default)]
    pub unread_count: u32,
    /// Presence as last known by the server
    #[serde(default)]
    pub is_online: bool,
}

/// Contact record returned by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Avatar URL
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Accept RFC 3339, zone-less ISO-8601 (as UTC), or epoch milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    let Some(raw) = Option::<Raw>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match raw {
        Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        Raw::Text(text) => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {text:?}"))),
    }
}

/// Parse a timestamp string in any of the accepted forms.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_all_fields() {
        let body = br#"{
            "id": 9, "senderId": 1, "senderName": "Ana", "senderAvatar": "a.png",
            "receiverId": 2, "content": "hi", "timestamp": "2024-03-01T10:00:00Z",
            "isRead": true
        }"#;
        let msg = ChatMessage::from_body(body).unwrap();
        assert_eq!(msg.id, Some(9));
        assert_eq!(msg.sender_name.as_deref(), Some("Ana"));
        assert!(msg.is_read);
        assert_eq!(msg.timestamp.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn message_with_minimal_fields() {
        let msg = ChatMessage::from_body(br#"{"senderId":"1","receiverId":2,"content":"x"}"#)
            .unwrap();
        assert_eq!(msg.id, None);
        assert_eq!(msg.timestamp, None);
        assert!(!msg.is_read);
    }

    #[test]
    fn timestamp_forms() {
        let naive = parse_timestamp("2024-03-01T10:00:00.250").unwrap();
        assert_eq!(naive.timestamp_millis(), 1_709_287_200_250);
        let offset = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(offset.timestamp(), 1_709_287_200);
        assert!(parse_timestamp("yesterday").is_none());

        let msg = ChatMessage::from_body(
            br#"{"senderId":1,"receiverId":2,"content":"x","timestamp":1709287200000}"#,
        )
        .unwrap();
        assert_eq!(msg.timestamp.unwrap().timestamp(), 1_709_287_200);
    }

    #[test]
    fn zero_sender_is_rejected() {
        assert!(ChatMessage::from_body(br#"{"senderId":0,"receiverId":2,"content":"x"}"#).is_err());
    }

    #[test]
    fn summary_defaults() {
        let summary: ConversationSummary = serde_json::from_str(r#"{"userId": 5}"#).unwrap();
        assert_eq!(summary.unread_count, 0);
        assert_eq!(summary.last_message, None);
        assert!(!summary.is_online);
    }
}
