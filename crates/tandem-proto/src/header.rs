//! STOMP header block and heart-beat negotiation.
//!
//! Header values are escaped on the wire (`\\`, `\n`, `\r`, `\c`) except in
//! `CONNECT` and `CONNECTED` frames, which predate escaping and are sent
//! verbatim. When a header name repeats, the first occurrence wins.

use std::time::Duration;

use crate::errors::{ProtocolError, Result};

/// Ordered STOMP header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header. Does not replace earlier entries with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Builder form of [`Headers::push`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// First value for `name`. `None` if absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Required header lookup.
    pub fn require(&self, name: &'static str) -> Result<&str> {
        self.get(name).ok_or(ProtocolError::MissingHeader(name))
    }

    /// Whether a header named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the header list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Escape a header name or value for the wire.
pub(crate) fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`]. Undefined escape sequences are a protocol error.
pub(crate) fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals as advertised in the `heart-beat` header.
///
/// `outgoing` is the smallest interval at which the sender can emit
/// heart-beats, `incoming` the interval at which it wants to receive them.
/// Zero disables the direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// Interval at which this side sends.
    pub outgoing: Duration,
    /// Interval at which this side expects to receive.
    pub incoming: Duration,
}

impl HeartBeat {
    /// Heart-beats disabled in both directions.
    pub const DISABLED: Self = Self { outgoing: Duration::ZERO, incoming: Duration::ZERO };

    /// Same interval in both directions.
    pub fn symmetric(interval: Duration) -> Self {
        Self { outgoing: interval, incoming: interval }
    }

    /// Parse a `<out-ms>,<in-ms>` header value.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidHeartBeat(value.to_string());
        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        let out: u64 = out.trim().parse().map_err(|_| invalid())?;
        let inc: u64 = inc.trim().parse().map_err(|_| invalid())?;
        Ok(Self { outgoing: Duration::from_millis(out), incoming: Duration::from_millis(inc) })
    }

    /// Header value for this heart-beat.
    pub fn to_header(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }

    /// Negotiate the effective intervals from the client's offer (`self`) and
    /// the server's reply.
    ///
    /// Returns `(send_every, expect_every)` from the client's point of view;
    /// a zero duration means that direction is disabled.
    pub fn negotiate(&self, server: &HeartBeat) -> (Duration, Duration) {
        let send = if self.outgoing.is_zero() || server.incoming.is_zero() {
            Duration::ZERO
        } else {
            self.outgoing.max(server.incoming)
        };
        let expect = if self.incoming.is_zero() || server.outgoing.is_zero() {
            Duration::ZERO
        } else {
            self.incoming.max(server.outgoing)
        };
        (send, expect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trips_reserved_characters() {
        let raw = "a:b\\c\nd\re";
        let escaped = escape(raw);
        assert_eq!(escaped, "a\\cb\\\\c\\nd\\re");
        assert_eq!(unescape(&escaped).unwrap(), raw);
    }

    #[test]
    fn unescape_rejects_unknown_sequence() {
        assert!(matches!(unescape("bad\\t"), Err(ProtocolError::InvalidEscape(_))));
        assert!(matches!(unescape("dangling\\"), Err(ProtocolError::InvalidEscape(_))));
    }

    #[test]
    fn first_header_wins() {
        let headers = Headers::new().with("destination", "/a").with("destination", "/b");
        assert_eq!(headers.get("destination"), Some("/a"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn heart_beat_parse_and_format() {
        let hb = HeartBeat::parse("10000, 5000").unwrap();
        assert_eq!(hb.outgoing, Duration::from_secs(10));
        assert_eq!(hb.incoming, Duration::from_secs(5));
        assert_eq!(hb.to_header(), "10000,5000");
        assert!(HeartBeat::parse("10000").is_err());
        assert!(HeartBeat::parse("x,1").is_err());
    }

    #[test]
    fn heart_beat_negotiation_takes_max_and_respects_zero() {
        let client = HeartBeat::symmetric(Duration::from_secs(10));
        let server = HeartBeat {
            outgoing: Duration::from_secs(20),
            incoming: Duration::from_secs(5),
        };
        assert_eq!(
            client.negotiate(&server),
            (Duration::from_secs(10), Duration::from_secs(20))
        );

        let (send, expect) = client.negotiate(&HeartBeat::DISABLED);
        assert!(send.is_zero());
        assert!(expect.is_zero());
    }
}
