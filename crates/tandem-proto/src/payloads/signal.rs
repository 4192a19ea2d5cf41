//! Call-signaling payloads.
//!
//! A [`Signal`] carries one step of a peer-to-peer negotiation between two
//! users: an offer, its answer, trickled ICE candidates, or the end of the
//! call. Signals are transient and never stored.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    UserId,
    errors::{ProtocolError, Result},
};

/// Signal type, spelled `offer | answer | candidate | end-call` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Session offer from the caller
    Offer,
    /// Session answer from the callee
    Answer,
    /// Trickled ICE candidate
    Candidate,
    /// Call ended or rejected
    EndCall,
}

impl SignalKind {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::EndCall => "end-call",
        }
    }
}

/// SDP text of an offer or answer.
///
/// Serialized as the bare SDP string. Decoding also accepts the
/// `{"type": .., "sdp": ..}` object browsers produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionDescription(pub String);

impl SessionDescription {
    /// SDP text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for SessionDescription {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionDescription {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Object { sdp: String },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(sdp) | Raw::Object { sdp } => Self(sdp),
        })
    }
}

/// ICE connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// Call-signaling frame body.
///
/// # Invariants
///
/// - `offer` and `answer` carry `sdp`; `candidate` carries `candidate`.
///   Checked by [`Signal::from_body`]; the constructors cannot violate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Author of the signal
    pub sender_id: UserId,
    /// Intended recipient
    pub receiver_id: UserId,
    /// Signal type
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Session description for offers and answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    /// ICE candidate for candidate signals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

impl Signal {
    fn bare(kind: SignalKind, from: UserId, to: UserId) -> Self {
        Self { sender_id: from, receiver_id: to, kind, sdp: None, candidate: None }
    }

    /// Offer from `from` to `to`.
    pub fn offer(from: UserId, to: UserId, sdp: SessionDescription) -> Self {
        Self { sdp: Some(sdp), ..Self::bare(SignalKind::Offer, from, to) }
    }

    /// Answer from `from` to `to`.
    pub fn answer(from: UserId, to: UserId, sdp: SessionDescription) -> Self {
        Self { sdp: Some(sdp), ..Self::bare(SignalKind::Answer, from, to) }
    }

    /// Trickled candidate from `from` to `to`.
    pub fn candidate(from: UserId, to: UserId, candidate: IceCandidate) -> Self {
        Self { candidate: Some(candidate), ..Self::bare(SignalKind::Candidate, from, to) }
    }

    /// End-of-call notice from `from` to `to`.
    pub fn end_call(from: UserId, to: UserId) -> Self {
        Self::bare(SignalKind::EndCall, from, to)
    }

    /// Decode and validate a call-signal queue body.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let signal: Self = serde_json::from_slice(body)?;
        signal.validate()?;
        Ok(signal)
    }

    fn validate(&self) -> Result<()> {
        let kind = self.kind.as_str();
        match self.kind {
            SignalKind::Offer | SignalKind::Answer if self.sdp.is_none() => {
                Err(ProtocolError::InvalidSignal { kind, reason: "missing sdp" })
            },
            SignalKind::Candidate if self.candidate.is_none() => {
                Err(ProtocolError::InvalidSignal { kind, reason: "missing candidate" })
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u64) -> UserId {
        UserId::new(n).unwrap()
    }

    #[test]
    fn offer_wire_shape() {
        let signal = Signal::offer(uid(1), uid(2), SessionDescription("v=0".to_string()));
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"senderId": 1, "receiverId": 2, "type": "offer", "sdp": "v=0"})
        );
    }

    #[test]
    fn end_call_kebab_case() {
        let json = serde_json::to_string(&Signal::end_call(uid(1), uid(2))).unwrap();
        assert!(json.contains(r#""type":"end-call""#));
        assert!(!json.contains("sdp"));
    }

    #[test]
    fn sdp_object_form_is_accepted() {
        let body = br#"{"senderId":1,"receiverId":2,"type":"answer","sdp":{"type":"answer","sdp":"v=0"}}"#;
        let signal = Signal::from_body(body).unwrap();
        assert_eq!(signal.sdp.unwrap().as_str(), "v=0");
    }

    #[test]
    fn candidate_field_names() {
        let body = br#"{"senderId":1,"receiverId":2,"type":"candidate",
            "candidate":{"candidate":"candidate:1 1 udp","sdpMid":"0","sdpMLineIndex":0}}"#;
        let signal = Signal::from_body(body).unwrap();
        let candidate = signal.candidate.unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }

    #[test]
    fn missing_required_fields_rejected() {
        let offer = br#"{"senderId":1,"receiverId":2,"type":"offer"}"#;
        assert!(matches!(Signal::from_body(offer), Err(ProtocolError::InvalidSignal { .. })));
        let cand = br#"{"senderId":1,"receiverId":2,"type":"candidate"}"#;
        assert!(matches!(Signal::from_body(cand), Err(ProtocolError::InvalidSignal { .. })));
        let unknown = br#"{"senderId":1,"receiverId":2,"type":"hangup"}"#;
        assert!(matches!(Signal::from_body(unknown), Err(ProtocolError::Json(_))));
    }
}
