//! Property-based tests for the conversation store.
//!
//! Arbitrary interleavings of sends, deliveries, history loads and navigation
//! must keep the list consistent: one entry per partner, most recent activity
//! first, no unread count on the open conversation, and no message id twice
//! in a thread.

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tandem_app::{ConversationConfig, ConversationStore, StoreEffect};
use tandem_proto::{ChatMessage, MessageId, UserId};
use uuid::Uuid;

const ME: u64 = 1;

#[derive(Debug, Clone)]
enum Op {
    Send { to: u64 },
    Receive { from: u64 },
    ReceiveUnnumbered { from: u64 },
    Echo { to: u64 },
    Open { with: u64 },
    Close,
    MarkRead { with: u64 },
    LoadHistory { with: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let peer = 2u64..6;
    prop_oneof![
        3 => peer.clone().prop_map(|to| Op::Send { to }),
        4 => peer.clone().prop_map(|from| Op::Receive { from }),
        2 => peer.clone().prop_map(|from| Op::ReceiveUnnumbered { from }),
        2 => peer.clone().prop_map(|to| Op::Echo { to }),
        2 => peer.clone().prop_map(|with| Op::Open { with }),
        1 => Just(Op::Close),
        2 => peer.clone().prop_map(|with| Op::MarkRead { with }),
        1 => peer.prop_map(|with| Op::LoadHistory { with }),
    ]
}

fn uid(n: u64) -> UserId {
    UserId::new(n).unwrap()
}

struct Model {
    store: ConversationStore,
    next_id: u64,
}

impl Model {
    fn new() -> Self {
        let mut store = ConversationStore::new(ConversationConfig::default());
        store.set_user(Some(uid(ME)));
        Self { store, next_id: 1 }
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Apply `op`, returning the partner whose conversation saw activity.
    fn apply(&mut self, op: &Op) -> Option<u64> {
        let n = self.next();
        let at = Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap();
        let local = Uuid::from_u128(u128::from(n));
        match *op {
            Op::Send { to } => {
                self.store.send_message(uid(to), format!("out {n}"), local, at);
                Some(to)
            },
            Op::Receive { from } => {
                self.store.receive(message(n, from, ME, &format!("in {n}")), at, local);
                Some(from)
            },
            Op::ReceiveUnnumbered { from } => {
                let mut message = message(n, from, ME, &format!("in {n}"));
                message.id = None;
                self.store.receive(message, at, local);
                Some(from)
            },
            Op::Echo { to } => {
                self.store.receive(message(n, ME, to, &format!("out {n}")), at, local);
                Some(to)
            },
            Op::Open { with } => {
                self.store.open(uid(with));
                None
            },
            Op::Close => {
                self.store.close();
                None
            },
            Op::MarkRead { with } => {
                self.store.mark_read(uid(with));
                None
            },
            Op::LoadHistory { with } => {
                let mut history = vec![
                    message(n, with, ME, "old"),
                    message(n, ME, with, "old reply"),
                    message(n, with, ME, "kept"),
                ];
                history[0].id = None;
                history[1].id = None;
                let next_id = &mut self.next_id;
                self.store.load_messages(uid(with), history, || {
                    let id = *next_id;
                    *next_id += 1;
                    Uuid::from_u128(u128::from(id))
                });
                None
            },
        }
    }
}

fn message(id: u64, from: u64, to: u64, content: &str) -> ChatMessage {
    ChatMessage {
        id: Some(id),
        sender_id: uid(from),
        sender_name: None,
        sender_avatar: None,
        receiver_id: uid(to),
        content: content.to_string(),
        timestamp: None,
        is_read: false,
    }
}

proptest! {
    #[test]
    fn prop_list_stays_consistent(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let mut model = Model::new();

        for op in &ops {
            let touched = model.apply(op);
            let store = &model.store;

            let ids: HashSet<UserId> = store.conversations().iter().map(|c| c.id).collect();
            prop_assert_eq!(ids.len(), store.conversations().len(), "duplicate conversation");

            if let Some(partner) = touched {
                prop_assert_eq!(store.conversations()[0].id, uid(partner));
            }

            if let Some(active) = store.active() {
                let open = store.conversation(active);
                prop_assert!(open.is_some());
                prop_assert_eq!(open.map(|c| c.unread), Some(0));
            }

            let sum: u32 = store.conversations().iter().map(|c| c.unread).sum();
            prop_assert_eq!(sum, store.total_unread());

            for conversation in store.conversations() {
                let thread = store.thread(conversation.id);
                let unique: HashSet<MessageId> = thread.iter().map(|m| m.id).collect();
                prop_assert_eq!(unique.len(), thread.len(), "duplicate message id in thread");
            }
        }
    }

    #[test]
    fn prop_mark_read_is_idempotent(
        ops in prop::collection::vec(op_strategy(), 0..40),
        with in 2u64..6,
    ) {
        let mut model = Model::new();
        for op in &ops {
            model.apply(op);
        }

        model.store.mark_read(uid(with));
        let again = model.store.mark_read(uid(with));

        prop_assert!(!again.iter().any(|e| matches!(e, StoreEffect::Receipt(_))));
        prop_assert_eq!(model.store.conversation(uid(with)).map_or(0, |c| c.unread), 0);
    }

    #[test]
    fn prop_redelivery_is_ignored(from in 2u64..6, count in 1usize..10) {
        let mut model = Model::new();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let original = message(42, from, ME, "hello");

        for _ in 0..count {
            model.store.receive(original.clone(), at, Uuid::from_u128(1));
        }

        prop_assert_eq!(model.store.thread(uid(from)).len(), 1);
        prop_assert_eq!(model.store.total_unread(), 1);
    }
}
