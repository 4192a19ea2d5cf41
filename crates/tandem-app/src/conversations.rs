//! Conversation store.
//!
//! Owns the conversation list and every thread. Pure: operations mutate the
//! store and return [`StoreEffect`]s (publishes, notifications, lookups) for
//! the reducer to carry out.
//!
//! # Invariants
//!
//! - Ordering: every send or receive moves the touched conversation to index 0
//! - Active Unread: the open conversation's unread counter is zero
//! - Read Monotonic: a message's `is_read` never goes back to `false`
//! - Unique Ids: a message id appears at most once per thread; messages the
//!   relay sent without an id take a fresh local one

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tandem_proto::{
    ChatMessage, ConversationSummary, MessageId, PresenceUpdate, ReadReceipt, SendMessage, UserId,
    UserProfile,
};
use uuid::Uuid;

use crate::{
    Notification,
    state::{Conversation, Delivery, Message},
};

/// Conversation store configuration.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Oldest messages beyond this are dropped from a thread
    pub max_thread_len: usize,
    /// Characters of message text in notification previews
    pub preview_chars: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_thread_len: 1000, preview_chars: 80 }
    }
}

/// Side effect requested by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEffect {
    /// Publish an optimistic message.
    Send {
        /// Local id of the optimistic copy
        id: MessageId,
        /// Body to publish
        message: SendMessage,
    },
    /// Publish a read receipt.
    Receipt(ReadReceipt),
    /// Notify the presentation layer.
    Notify(Notification),
    /// Look the contact up in the user directory.
    ResolveContact(UserId),
    /// Fetch the thread from the history service.
    LoadHistory(UserId),
}

/// Conversation list and threads for one user.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    config: ConversationConfig,
    me: Option<UserId>,
    order: Vec<Conversation>,
    threads: HashMap<UserId, Vec<Message>>,
    active: Option<UserId>,
}

impl ConversationStore {
    /// Empty store.
    pub fn new(config: ConversationConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Switch the local identity. Clears everything when it changes.
    pub fn set_user(&mut self, me: Option<UserId>) {
        if self.me != me {
            self.order.clear();
            self.threads.clear();
            self.active = None;
        }
        self.me = me;
    }

    /// Local identity.
    pub fn user(&self) -> Option<UserId> {
        self.me
    }

    /// Conversations, most recently active first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.order
    }

    /// Conversation with `id`.
    pub fn conversation(&self, id: UserId) -> Option<&Conversation> {
        self.order.iter().find(|c| c.id == id)
    }

    /// Thread with `id`, oldest first.
    pub fn thread(&self, id: UserId) -> &[Message] {
        self.threads.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Open conversation.
    pub fn active(&self) -> Option<UserId> {
        self.active
    }

    /// Unread messages across all conversations.
    pub fn total_unread(&self) -> u32 {
        self.order.iter().map(|c| c.unread).sum()
    }

    /// Append an optimistic message and publish it.
    ///
    /// The message keeps its `Local` id until the relay echoes it back.
    pub fn send_message(
        &mut self,
        to: UserId,
        content: String,
        local: Uuid,
        now: DateTime<Utc>,
    ) -> Vec<StoreEffect> {
        let Some(me) = self.me else {
            return vec![];
        };
        let id = MessageId::Local(local);

        self.threads.entry(to).or_default().push(Message {
            id,
            conversation: to,
            sender: me,
            content: content.clone(),
            timestamp: now,
            is_me: true,
            is_read: false,
            delivery: Delivery::Pending,
        });
        self.trim(to);

        let mut effects = Vec::new();
        let (conversation, created) = self.touch(to);
        conversation.last_message = Some(content.clone());
        conversation.last_activity = Some(now);
        if created {
            effects.push(StoreEffect::ResolveContact(to));
        }

        effects.push(StoreEffect::Send {
            id,
            message: SendMessage { sender_id: me, receiver_id: to, content },
        });
        effects
    }

    /// Flag an optimistic message whose publish failed.
    pub fn mark_failed(&mut self, conversation: UserId, id: MessageId) {
        if let Some(message) =
            self.threads.get_mut(&conversation).and_then(|t| t.iter_mut().find(|m| m.id == id))
        {
            message.delivery = Delivery::Failed;
        }
    }

    /// Apply a message from the per-user queue.
    ///
    /// Messages authored by the local user are echoes and reconcile the
    /// oldest matching optimistic copy. `local` identifies the message when
    /// the relay did not assign a server id.
    pub fn receive(&mut self, message: ChatMessage, now: DateTime<Utc>, local: Uuid) -> Vec<StoreEffect> {
        let Some(me) = self.me else {
            return vec![];
        };
        let is_echo = message.sender_id == me;
        let other = if is_echo {
            message.receiver_id
        } else if message.receiver_id == me {
            message.sender_id
        } else {
            tracing::debug!(
                sender = %message.sender_id,
                receiver = %message.receiver_id,
                "ignoring message for another user"
            );
            return vec![];
        };

        let server_id = message.id.map(MessageId::Server);
        let timestamp = message.timestamp.unwrap_or(now);
        let thread = self.threads.entry(other).or_default();

        if let Some(existing) = server_id.and_then(|id| thread.iter_mut().find(|m| m.id == id)) {
            existing.is_read |= message.is_read;
            return vec![];
        }

        if is_echo {
            let optimistic = thread.iter().position(|m| {
                m.is_me
                    && !m.id.is_confirmed()
                    && m.delivery != Delivery::Confirmed
                    && m.content == message.content
            });
            match optimistic {
                Some(index) => {
                    let m = &mut thread[index];
                    if let Some(id) = server_id {
                        m.id = id;
                    }
                    m.delivery = Delivery::Confirmed;
                    m.timestamp = timestamp;
                    m.is_read |= message.is_read;
                },
                None => thread.push(Message {
                    id: server_id.unwrap_or(MessageId::Local(local)),
                    conversation: other,
                    sender: me,
                    content: message.content.clone(),
                    timestamp,
                    is_me: true,
                    is_read: message.is_read,
                    delivery: Delivery::Confirmed,
                }),
            }
            self.trim(other);

            let (conversation, created) = self.touch(other);
            conversation.last_message = Some(message.content);
            conversation.last_activity = Some(timestamp);
            return if created { vec![StoreEffect::ResolveContact(other)] } else { vec![] };
        }

        let is_active = self.active == Some(other);
        thread.push(Message {
            id: server_id.unwrap_or(MessageId::Local(local)),
            conversation: other,
            sender: other,
            content: message.content.clone(),
            timestamp,
            is_me: false,
            is_read: message.is_read || is_active,
            delivery: Delivery::Confirmed,
        });
        self.trim(other);

        let preview_chars = self.config.preview_chars;
        let mut effects = Vec::new();
        let (conversation, created) = self.touch(other);
        if conversation.name.is_none() {
            conversation.name = message.sender_name.clone();
        }
        if conversation.avatar.is_none() {
            conversation.avatar = message.sender_avatar.clone();
        }
        if created && conversation.name.is_none() {
            effects.push(StoreEffect::ResolveContact(other));
        }
        conversation.last_message = Some(message.content.clone());
        conversation.last_activity = Some(timestamp);

        if is_active {
            effects.push(StoreEffect::Receipt(ReadReceipt { receiver_id: me, sender_id: other }));
        } else if !message.is_read {
            conversation.unread = conversation.unread.saturating_add(1);
            effects.push(StoreEffect::Notify(Notification::NewMessage {
                from: other,
                name: conversation.name.clone(),
                preview: message.content.chars().take(preview_chars).collect(),
            }));
        }
        effects
    }

    /// Mark the conversation with `with` as read.
    ///
    /// Idempotent: with nothing unread no receipt is published.
    pub fn mark_read(&mut self, with: UserId) -> Vec<StoreEffect> {
        let Some(me) = self.me else {
            return vec![];
        };
        let Some(conversation) = self.order.iter_mut().find(|c| c.id == with) else {
            return vec![];
        };
        let thread = self.threads.entry(with).or_default();
        let has_unread = thread.iter().any(|m| !m.is_me && !m.is_read);
        if conversation.unread == 0 && !has_unread {
            return vec![];
        }

        conversation.unread = 0;
        for message in thread.iter_mut().filter(|m| !m.is_me) {
            message.is_read = true;
        }
        vec![StoreEffect::Receipt(ReadReceipt { receiver_id: me, sender_id: with })]
    }

    /// Open the thread with `with`: load its history and mark it read.
    pub fn open(&mut self, with: UserId) -> Vec<StoreEffect> {
        if self.me.is_none() {
            return vec![];
        }
        self.active = Some(with);

        let mut effects = Vec::new();
        if self.conversation(with).is_none() {
            // Opening is not activity; the new entry goes last.
            self.order.push(Conversation::new(with));
            effects.push(StoreEffect::ResolveContact(with));
        }
        effects.push(StoreEffect::LoadHistory(with));
        effects.extend(self.mark_read(with));
        effects
    }

    /// Close the open thread.
    pub fn close(&mut self) {
        self.active = None;
    }

    /// Apply a read receipt from the per-user queue.
    pub fn apply_receipt(&mut self, receipt: ReadReceipt) -> bool {
        if Some(receipt.sender_id) != self.me {
            return false;
        }
        let Some(thread) = self.threads.get_mut(&receipt.receiver_id) else {
            return false;
        };
        let mut changed = false;
        for message in thread.iter_mut().filter(|m| m.is_me && !m.is_read) {
            message.is_read = true;
            changed = true;
        }
        changed
    }

    /// Apply a presence transition.
    pub fn apply_presence(&mut self, update: PresenceUpdate) -> bool {
        match self.order.iter_mut().find(|c| c.id == update.user_id) {
            Some(conversation) if conversation.online != update.is_online => {
                conversation.online = update.is_online;
                true
            },
            _ => false,
        }
    }

    /// Attach a resolved contact.
    pub fn apply_profile(&mut self, profile: UserProfile) -> bool {
        let Some(conversation) = self.order.iter_mut().find(|c| c.id == profile.id) else {
            return false;
        };
        conversation.name = Some(profile.name);
        if profile.avatar.is_some() {
            conversation.avatar = profile.avatar;
        }
        true
    }

    /// Replace the conversation list with the history service's summaries.
    ///
    /// Server order (most recent first) and unread counters are taken as-is.
    /// Conversations only known locally are kept after them.
    pub fn load_conversations(&mut self, summaries: Vec<ConversationSummary>) -> Vec<StoreEffect> {
        let mut order: Vec<Conversation> = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if order.iter().any(|c| c.id == summary.user_id) {
                continue;
            }
            order.push(Conversation {
                id: summary.user_id,
                name: Some(summary.name).filter(|n| !n.is_empty()),
                avatar: summary.avatar,
                last_message: summary.last_message,
                last_activity: summary.last_message_time,
                unread: summary.unread_count,
                online: summary.is_online,
            });
        }

        let local_only = std::mem::take(&mut self.order).into_iter().filter(|c| {
            !order.iter().any(|o| o.id == c.id)
                && (self.active == Some(c.id) || !self.thread(c.id).is_empty())
        });
        let local_only: Vec<_> = local_only.collect();
        order.extend(local_only);
        self.order = order;

        match self.active {
            Some(active) => self.mark_read(active),
            None => vec![],
        }
    }

    /// Replace a thread with its history.
    ///
    /// Local messages the history does not know yet (optimistic, failed, or
    /// newer than the history snapshot) are kept after it. Rows without a
    /// server id take a fresh id from `local_id`.
    pub fn load_messages(
        &mut self,
        with: UserId,
        history: Vec<ChatMessage>,
        mut local_id: impl FnMut() -> Uuid,
    ) -> Vec<StoreEffect> {
        let Some(me) = self.me else {
            return vec![];
        };

        let mut thread: Vec<Message> = Vec::with_capacity(history.len());
        for message in history {
            let id = message.id.map(MessageId::Server);
            if id.is_some() && thread.iter().any(|m| Some(m.id) == id) {
                continue;
            }
            let is_me = message.sender_id == me;
            thread.push(Message {
                id: id.unwrap_or_else(|| MessageId::Local(local_id())),
                conversation: with,
                sender: message.sender_id,
                content: message.content,
                timestamp: message.timestamp.unwrap_or_default(),
                is_me,
                is_read: message.is_read,
                delivery: Delivery::Confirmed,
            });
        }

        for existing in self.threads.remove(&with).unwrap_or_default() {
            let known = match existing.id {
                MessageId::Server(_) => thread.iter_mut().find(|m| m.id == existing.id),
                MessageId::Local(_) => None,
            };
            match known {
                Some(m) => m.is_read |= existing.is_read,
                None if existing.id.is_confirmed() || existing.delivery != Delivery::Confirmed => {
                    thread.push(existing);
                },
                None => {},
            }
        }
        self.threads.insert(with, thread);
        self.trim(with);

        if self.active == Some(with) { self.mark_read(with) } else { vec![] }
    }

    /// Move `id` to the head of the list, creating it if needed.
    fn touch(&mut self, id: UserId) -> (&mut Conversation, bool) {
        let created = match self.order.iter().position(|c| c.id == id) {
            Some(0) => false,
            Some(index) => {
                let conversation = self.order.remove(index);
                self.order.insert(0, conversation);
                false
            },
            None => {
                self.order.insert(0, Conversation::new(id));
                true
            },
        };
        (&mut self.order[0], created)
    }

    fn trim(&mut self, id: UserId) {
        let max = self.config.max_thread_len;
        if let Some(thread) = self.threads.get_mut(&id) {
            let excess = thread.len().saturating_sub(max);
            thread.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use chrono::TimeZone;

    use super::*;

    fn uid(n: u64) -> UserId {
        UserId::new(n).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fresh() -> Uuid {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Uuid::from_u64_pair(0, NEXT.fetch_add(1, Ordering::Relaxed))
    }

    fn store(me: u64) -> ConversationStore {
        let mut store = ConversationStore::new(ConversationConfig::default());
        store.set_user(Some(uid(me)));
        store
    }

    fn inbound(id: u64, from: u64, to: u64, content: &str) -> ChatMessage {
        ChatMessage {
            id: Some(id),
            sender_id: uid(from),
            sender_name: Some(format!("user-{from}")),
            sender_avatar: None,
            receiver_id: uid(to),
            content: content.to_string(),
            timestamp: Some(at(id as i64)),
            is_read: false,
        }
    }

    #[test]
    fn send_is_optimistic_and_moves_to_head() {
        let mut store = store(1);
        store.receive(inbound(1, 2, 1, "a"), at(0), fresh());
        store.receive(inbound(2, 3, 1, "b"), at(0), fresh());
        assert_eq!(store.conversations()[0].id, uid(3));

        let local = Uuid::from_u128(7);
        let effects = store.send_message(uid(2), "hi".to_string(), local, at(5));
        assert_eq!(effects, vec![StoreEffect::Send {
            id: MessageId::Local(local),
            message: SendMessage { sender_id: uid(1), receiver_id: uid(2), content: "hi".into() },
        }]);

        assert_eq!(store.conversations()[0].id, uid(2));
        assert_eq!(store.conversations()[0].last_message.as_deref(), Some("hi"));
        let last = store.thread(uid(2)).last().unwrap();
        assert_eq!(last.delivery, Delivery::Pending);
        assert!(last.is_me);
    }

    #[test]
    fn echo_reconciles_optimistic_copy() {
        let mut store = store(1);
        let local = Uuid::from_u128(7);
        store.send_message(uid(2), "hi".to_string(), local, at(0));
        store.send_message(uid(2), "hi".to_string(), Uuid::from_u128(8), at(1));

        let effects = store.receive(inbound(100, 1, 2, "hi"), at(2), fresh());
        assert!(effects.is_empty());

        let thread = store.thread(uid(2));
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].id, MessageId::Server(100));
        assert_eq!(thread[0].delivery, Delivery::Confirmed);
        assert_eq!(thread[1].id, MessageId::Local(Uuid::from_u128(8)));

        // A repeated echo is not appended again.
        store.receive(inbound(100, 1, 2, "hi"), at(3), fresh());
        assert_eq!(store.thread(uid(2)).len(), 2);
    }

    #[test]
    fn unmatched_echo_is_appended() {
        let mut store = store(1);
        store.receive(inbound(5, 1, 2, "sent elsewhere"), at(0), fresh());
        let thread = store.thread(uid(2));
        assert_eq!(thread.len(), 1);
        assert!(thread[0].is_me);
    }

    #[test]
    fn inbound_for_background_conversation_counts_unread() {
        let mut store = store(1);
        let effects = store.receive(inbound(1, 2, 1, "hello"), at(0), fresh());
        assert_eq!(effects, vec![StoreEffect::Notify(Notification::NewMessage {
            from: uid(2),
            name: Some("user-2".into()),
            preview: "hello".into(),
        })]);
        assert_eq!(store.conversation(uid(2)).unwrap().unread, 1);
        assert_eq!(store.conversation(uid(2)).unwrap().name.as_deref(), Some("user-2"));
    }

    #[test]
    fn inbound_for_active_conversation_is_read_and_acknowledged() {
        let mut store = store(1);
        store.open(uid(2));
        let effects = store.receive(inbound(1, 2, 1, "hello"), at(0), fresh());
        assert_eq!(effects, vec![StoreEffect::Receipt(ReadReceipt {
            receiver_id: uid(1),
            sender_id: uid(2),
        })]);
        assert_eq!(store.conversation(uid(2)).unwrap().unread, 0);
        assert!(store.thread(uid(2))[0].is_read);
    }

    #[test]
    fn unknown_sender_without_name_is_resolved() {
        let mut store = store(1);
        let mut message = inbound(1, 9, 1, "yo");
        message.sender_name = None;
        let effects = store.receive(message, at(0), fresh());
        assert!(effects.contains(&StoreEffect::ResolveContact(uid(9))));

        store.apply_profile(UserProfile { id: uid(9), name: "Nine".into(), avatar: None });
        assert_eq!(store.conversation(uid(9)).unwrap().name.as_deref(), Some("Nine"));
    }

    #[test]
    fn messages_for_other_users_are_ignored() {
        let mut store = store(1);
        assert!(store.receive(inbound(1, 2, 3, "not mine"), at(0), fresh()).is_empty());
        assert!(store.conversations().is_empty());
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut store = store(1);
        store.receive(inbound(1, 2, 1, "a"), at(0), fresh());
        store.receive(inbound(2, 2, 1, "b"), at(1), fresh());

        let first = store.mark_read(uid(2));
        assert_eq!(first.len(), 1);
        assert_eq!(store.conversation(uid(2)).unwrap().unread, 0);
        assert!(store.thread(uid(2)).iter().all(|m| m.is_read));

        assert!(store.mark_read(uid(2)).is_empty());
        assert!(store.mark_read(uid(42)).is_empty());
    }

    #[test]
    fn receipt_marks_own_messages_read() {
        let mut store = store(1);
        store.send_message(uid(2), "a".into(), Uuid::from_u128(1), at(0));
        store.send_message(uid(3), "b".into(), Uuid::from_u128(2), at(0));

        // Receipt for another author changes nothing.
        assert!(!store.apply_receipt(ReadReceipt { receiver_id: uid(2), sender_id: uid(5) }));

        assert!(store.apply_receipt(ReadReceipt { receiver_id: uid(2), sender_id: uid(1) }));
        assert!(store.thread(uid(2))[0].is_read);
        assert!(!store.thread(uid(3))[0].is_read);
    }

    #[test]
    fn presence_sets_online_flag() {
        let mut store = store(1);
        store.receive(inbound(1, 2, 1, "a"), at(0), fresh());
        assert!(store.apply_presence(PresenceUpdate { user_id: uid(2), is_online: true }));
        assert!(store.conversation(uid(2)).unwrap().online);
        assert!(!store.apply_presence(PresenceUpdate { user_id: uid(2), is_online: true }));
        assert!(!store.apply_presence(PresenceUpdate { user_id: uid(8), is_online: true }));
    }

    #[test]
    fn reload_takes_server_order_and_counters() {
        let mut store = store(1);
        store.send_message(uid(9), "local only".into(), Uuid::from_u128(1), at(0));

        let summary = |id: u64, unread: u32| ConversationSummary {
            user_id: uid(id),
            name: format!("user-{id}"),
            avatar: None,
            last_message: Some("hello".into()),
            last_message_time: Some(at(id as i64)),
            unread_count: unread,
            is_online: false,
        };
        let effects = store.load_conversations(vec![summary(3, 0), summary(2, 1)]);
        assert!(effects.is_empty());

        let ids: Vec<_> = store.conversations().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![uid(3), uid(2), uid(9)]);
        assert_eq!(store.conversation(uid(2)).unwrap().unread, 1);
        assert_eq!(store.conversation(uid(2)).unwrap().last_message.as_deref(), Some("hello"));
    }

    #[test]
    fn reload_keeps_active_conversation_read() {
        let mut store = store(1);
        store.open(uid(2));
        let summary = ConversationSummary {
            user_id: uid(2),
            name: "two".into(),
            avatar: None,
            last_message: Some("x".into()),
            last_message_time: None,
            unread_count: 2,
            is_online: true,
        };
        let effects = store.load_conversations(vec![summary]);
        assert_eq!(effects.len(), 1);
        assert_eq!(store.conversation(uid(2)).unwrap().unread, 0);
    }

    #[test]
    fn history_keeps_pending_local_messages() {
        let mut store = store(1);
        store.send_message(uid(2), "pending".into(), Uuid::from_u128(1), at(10));

        let history = vec![inbound(1, 2, 1, "old"), inbound(2, 1, 2, "older reply")];
        store.load_messages(uid(2), history, fresh);

        let contents: Vec<_> = store.thread(uid(2)).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["old", "older reply", "pending"]);
        assert!(store.thread(uid(2))[1].is_me);
    }

    #[test]
    fn messages_without_server_id_get_distinct_local_ids() {
        let mut store = store(1);
        let mut first = inbound(0, 2, 1, "one");
        first.id = None;
        let mut second = inbound(0, 2, 1, "two");
        second.id = None;

        store.receive(first.clone(), at(0), fresh());
        store.receive(second, at(1), fresh());
        store.receive(first, at(2), fresh());

        let thread = store.thread(uid(2));
        assert_eq!(thread.len(), 3);
        assert!(thread.iter().all(|m| !m.id.is_confirmed()));
        assert_ne!(thread[0].id, thread[1].id);
        assert_ne!(thread[0].id, thread[2].id);
        assert_ne!(thread[1].id, thread[2].id);
    }

    #[test]
    fn history_rows_without_server_id_get_distinct_local_ids() {
        let mut store = store(1);
        let mut history = vec![inbound(0, 2, 1, "a"), inbound(0, 1, 2, "b"), inbound(7, 2, 1, "c")];
        history[0].id = None;
        history[1].id = None;

        store.load_messages(uid(2), history, fresh);

        let thread = store.thread(uid(2));
        assert_eq!(thread.len(), 3);
        assert!(matches!(thread[0].id, MessageId::Local(_)));
        assert!(matches!(thread[1].id, MessageId::Local(_)));
        assert_ne!(thread[0].id, thread[1].id);
        assert_eq!(thread[2].id, MessageId::Server(7));
    }

    #[test]
    fn failed_messages_are_flagged() {
        let mut store = store(1);
        let local = Uuid::from_u128(3);
        store.send_message(uid(2), "x".into(), local, at(0));
        store.mark_failed(uid(2), MessageId::Local(local));
        assert_eq!(store.thread(uid(2))[0].delivery, Delivery::Failed);
    }

    #[test]
    fn threads_are_bounded() {
        let mut store = ConversationStore::new(ConversationConfig {
            max_thread_len: 3,
            ..ConversationConfig::default()
        });
        store.set_user(Some(uid(1)));
        for n in 1..=5 {
            store.receive(inbound(n, 2, 1, &n.to_string()), at(0), fresh());
        }
        let contents: Vec<_> = store.thread(uid(2)).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["3", "4", "5"]);
    }

    #[test]
    fn switching_user_clears_state() {
        let mut store = store(1);
        store.receive(inbound(1, 2, 1, "a"), at(0), fresh());
        store.set_user(Some(uid(1)));
        assert_eq!(store.conversations().len(), 1);
        store.set_user(Some(uid(5)));
        assert!(store.conversations().is_empty());
    }
}
