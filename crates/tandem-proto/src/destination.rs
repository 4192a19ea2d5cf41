//! Destination names.
//!
//! Publishing goes to application destinations under `app_prefix`. Inbound
//! traffic arrives on per-user queues under `user_prefix` or on global topics
//! under `topic_prefix`. Prefixes are configurable because relays mount the
//! broker under different paths.

use crate::ids::UserId;

/// Inbound subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Per-user chat message queue.
    Messages,
    /// Per-user read-receipt queue.
    ReadReceipts,
    /// Global presence topic.
    Presence,
    /// Per-user call-signal queue.
    CallSignals,
}

impl Channel {
    /// Every channel a session subscribes to, in subscription order.
    pub const ALL: [Channel; 4] =
        [Channel::Messages, Channel::ReadReceipts, Channel::Presence, Channel::CallSignals];

    /// Short label for logs and subscription ids.
    pub fn label(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::ReadReceipts => "read-receipts",
            Self::Presence => "presence",
            Self::CallSignals => "call-signals",
        }
    }
}

/// Destination naming scheme for one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    /// Prefix for client publishes.
    pub app_prefix: String,
    /// Prefix for per-user queues.
    pub user_prefix: String,
    /// Prefix for global topics.
    pub topic_prefix: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            app_prefix: "/app".to_string(),
            user_prefix: "/user".to_string(),
            topic_prefix: "/topic".to_string(),
        }
    }
}

impl Destinations {
    /// Connect announcement.
    pub fn connect(&self) -> String {
        format!("{}/chat.connect", self.app_prefix)
    }

    /// Disconnect announcement.
    pub fn disconnect(&self) -> String {
        format!("{}/chat.disconnect", self.app_prefix)
    }

    /// Chat message publish.
    pub fn send_message(&self) -> String {
        format!("{}/chat.send", self.app_prefix)
    }

    /// Read-receipt publish.
    pub fn mark_read(&self) -> String {
        format!("{}/chat.read", self.app_prefix)
    }

    /// Call-signal publish.
    pub fn call_signal(&self) -> String {
        format!("{}/call.signal", self.app_prefix)
    }

    /// Subscription destination for `channel` as seen by `user`.
    pub fn channel(&self, channel: Channel, user: UserId) -> String {
        match channel {
            Channel::Messages => format!("{}/{user}/queue/messages", self.user_prefix),
            Channel::ReadReceipts => format!("{}/{user}/queue/read-receipts", self.user_prefix),
            Channel::Presence => format!("{}/presence", self.topic_prefix),
            Channel::CallSignals => format!("{}/{user}/queue/call-signals", self.user_prefix),
        }
    }

    /// Map an inbound destination back to its channel.
    ///
    /// Per-user queues only match for `user`; anything else is `None`.
    pub fn resolve(&self, destination: &str, user: UserId) -> Option<Channel> {
        Channel::ALL.into_iter().find(|&channel| self.channel(channel, user) == destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new(42).unwrap()
    }

    #[test]
    fn default_names() {
        let d = Destinations::default();
        assert_eq!(d.connect(), "/app/chat.connect");
        assert_eq!(d.send_message(), "/app/chat.send");
        assert_eq!(d.mark_read(), "/app/chat.read");
        assert_eq!(d.call_signal(), "/app/call.signal");
        assert_eq!(d.disconnect(), "/app/chat.disconnect");
        assert_eq!(d.channel(Channel::Messages, user()), "/user/42/queue/messages");
        assert_eq!(d.channel(Channel::ReadReceipts, user()), "/user/42/queue/read-receipts");
        assert_eq!(d.channel(Channel::Presence, user()), "/topic/presence");
        assert_eq!(d.channel(Channel::CallSignals, user()), "/user/42/queue/call-signals");
    }

    #[test]
    fn resolve_is_per_user() {
        let d = Destinations::default();
        for channel in Channel::ALL {
            assert_eq!(d.resolve(&d.channel(channel, user()), user()), Some(channel));
        }
        let other = UserId::new(7).unwrap();
        assert_eq!(d.resolve("/user/42/queue/messages", other), None);
        assert_eq!(d.resolve("/topic/presence", other), Some(Channel::Presence));
        assert_eq!(d.resolve("/topic/unknown", user()), None);
    }
}
