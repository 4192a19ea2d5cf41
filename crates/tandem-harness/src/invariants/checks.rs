//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use tandem_core::CallStatus;

use super::{ClientSnapshot, Invariant, InvariantResult, SystemSnapshot, Violation};

fn violation(invariant: &'static str, client: &ClientSnapshot, message: String) -> Violation {
    Violation { invariant, message: format!("client {}: {message}", client.label) }
}

/// The open conversation must be in the conversation list.
pub struct ActiveConversationListed;

impl Invariant for ActiveConversationListed {
    fn name(&self) -> &'static str {
        "active_conversation_listed"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(active) = client.state.active else {
                continue;
            };
            if !client.state.conversations.iter().any(|c| c.id == active) {
                return Err(violation(self.name(), client, format!("active {active} not listed")));
            }
        }
        Ok(())
    }
}

/// The open conversation has nothing unread.
pub struct ActiveConversationRead;

impl Invariant for ActiveConversationRead {
    fn name(&self) -> &'static str {
        "active_conversation_read"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let active = client.state.active;
            let unread = client.state.conversations.iter().find(|c| Some(c.id) == active);
            if let Some(conversation) = unread.filter(|c| c.unread > 0) {
                return Err(violation(
                    self.name(),
                    client,
                    format!("active {} shows {} unread", conversation.id, conversation.unread),
                ));
            }
        }
        Ok(())
    }
}

/// Each contact appears at most once in the list.
pub struct UniqueConversations;

impl Invariant for UniqueConversations {
    fn name(&self) -> &'static str {
        "unique_conversations"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let mut seen = HashSet::new();
            for conversation in &client.state.conversations {
                if !seen.insert(conversation.id) {
                    return Err(violation(
                        self.name(),
                        client,
                        format!("{} listed twice", conversation.id),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// No message id appears twice in the open thread, local ids included.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let mut seen = HashSet::new();
            for message in &client.state.thread {
                if !seen.insert(message.id) {
                    return Err(violation(
                        self.name(),
                        client,
                        format!("message {} appears twice", message.id),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The thread only holds messages of the open conversation.
pub struct ThreadMatchesActive;

impl Invariant for ThreadMatchesActive {
    fn name(&self) -> &'static str {
        "thread_matches_active"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let active = client.state.active;
            if let Some(stray) = client.state.thread.iter().find(|m| Some(m.conversation) != active) {
                return Err(violation(
                    self.name(),
                    client,
                    format!("thread holds message of {} while {active:?} is open", stray.conversation),
                ));
            }
        }
        Ok(())
    }
}

/// An idle call view carries no session leftovers.
pub struct IdleCallIsClean;

impl Invariant for IdleCallIsClean {
    fn name(&self) -> &'static str {
        "idle_call_is_clean"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let call = &client.state.call;
            if call.status == CallStatus::Idle
                && (call.remote.is_some() || call.has_local_stream || call.has_remote_stream)
            {
                return Err(violation(self.name(), client, format!("idle call view {call:?}")));
            }
        }
        Ok(())
    }
}

/// An idle client holds no media.
///
/// Media is released asynchronously, so only check this once the simulation
/// has settled.
pub struct IdleHoldsNoMedia;

impl Invariant for IdleHoldsNoMedia {
    fn name(&self) -> &'static str {
        "idle_holds_no_media"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.state.call.status == CallStatus::Idle
                && (client.live_tracks > 0 || client.open_peers > 0)
            {
                return Err(violation(
                    self.name(),
                    client,
                    format!(
                        "idle with {} live tracks and {} open peers",
                        client.live_tracks, client.open_peers
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Two connected clients in a call with each other agree on it.
pub struct ConnectedPeersAgree;

impl Invariant for ConnectedPeersAgree {
    fn name(&self) -> &'static str {
        "connected_peers_agree"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let call = &client.state.call;
            if call.status != CallStatus::Connected {
                continue;
            }
            let Some(remote) = call.remote.and_then(|r| state.client(r)) else {
                continue;
            };
            let theirs = &remote.state.call;
            if theirs.status == CallStatus::Connected && theirs.remote != client.state.user {
                return Err(violation(
                    self.name(),
                    client,
                    format!("connected to {} who is connected to {:?}", remote.label, theirs.remote),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use tandem_app::{CallView, Conversation, Delivery, Message, Snapshot};
    use tandem_proto::{MessageId, UserId};
    use uuid::Uuid;

    use super::*;

    fn uid(n: u64) -> UserId {
        UserId::new(n).unwrap()
    }

    fn client(state: Snapshot) -> SystemSnapshot {
        SystemSnapshot::single(ClientSnapshot::new("a", state))
    }

    #[test]
    fn unlisted_active_conversation_is_caught() {
        let state = Snapshot { active: Some(uid(2)), ..Snapshot::default() };
        assert!(ActiveConversationListed.check(&client(state)).is_err());
    }

    #[test]
    fn unread_in_active_conversation_is_caught() {
        let mut conversation = Conversation::new(uid(2));
        conversation.unread = 1;
        let state =
            Snapshot { active: Some(uid(2)), conversations: vec![conversation], ..Snapshot::default() };
        let err = ActiveConversationRead.check(&client(state)).unwrap_err();
        assert_eq!(err.invariant, "active_conversation_read");
    }

    #[test]
    fn duplicate_conversation_is_caught() {
        let state = Snapshot {
            conversations: vec![Conversation::new(uid(2)), Conversation::new(uid(2))],
            ..Snapshot::default()
        };
        assert!(UniqueConversations.check(&client(state)).is_err());
    }

    #[test]
    fn duplicate_local_message_id_is_caught() {
        let message = |id: MessageId| Message {
            id,
            conversation: uid(2),
            sender: uid(2),
            content: "hi".into(),
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
            is_me: false,
            is_read: true,
            delivery: Delivery::Confirmed,
        };
        let thread = |ids: [MessageId; 2]| Snapshot {
            active: Some(uid(2)),
            conversations: vec![Conversation::new(uid(2))],
            thread: ids.into_iter().map(message).collect(),
            ..Snapshot::default()
        };

        let distinct = thread([MessageId::Local(Uuid::from_u128(1)), MessageId::Local(Uuid::from_u128(2))]);
        assert!(UniqueMessageIds.check(&client(distinct)).is_ok());

        let same = thread([MessageId::Local(Uuid::from_u128(1)), MessageId::Local(Uuid::from_u128(1))]);
        let err = UniqueMessageIds.check(&client(same)).unwrap_err();
        assert_eq!(err.invariant, "unique_message_ids");
    }

    #[test]
    fn idle_media_is_caught() {
        let snapshot = SystemSnapshot::single(ClientSnapshot::new("a", Snapshot::default()).with_media(1, 0));
        assert!(IdleHoldsNoMedia.check(&snapshot).is_err());
    }

    #[test]
    fn mismatched_connected_peers_are_caught() {
        let connected_to = |user: u64, remote: u64| Snapshot {
            user: Some(uid(user)),
            call: CallView { status: CallStatus::Connected, remote: Some(uid(remote)), ..CallView::default() },
            ..Snapshot::default()
        };
        let agree = SystemSnapshot::from_clients(vec![
            ClientSnapshot::new("a", connected_to(1, 2)),
            ClientSnapshot::new("b", connected_to(2, 1)),
        ]);
        assert!(ConnectedPeersAgree.check(&agree).is_ok());

        let disagree = SystemSnapshot::from_clients(vec![
            ClientSnapshot::new("a", connected_to(1, 2)),
            ClientSnapshot::new("b", connected_to(2, 3)),
        ]);
        assert!(ConnectedPeersAgree.check(&disagree).is_err());
    }
}
