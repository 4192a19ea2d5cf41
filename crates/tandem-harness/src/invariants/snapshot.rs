//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what each client publishes to its presentation layer,
//! plus what its media backend still holds. Invariants operate on snapshots
//! rather than live state so every check sees one consistent moment.

use tandem_app::Snapshot;
use tandem_proto::UserId;

/// Snapshot of the whole simulated system.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }

    /// Add a client snapshot.
    pub fn add_client(&mut self, client: ClientSnapshot) {
        self.clients.push(client);
    }

    /// Client signed in as `user`, if any.
    pub fn client(&self, user: UserId) -> Option<&ClientSnapshot> {
        self.clients.iter().find(|c| c.state.user == Some(user))
    }
}

/// One client's observable state.
#[derive(Debug, Clone, Default)]
pub struct ClientSnapshot {
    /// Label used in violation messages.
    pub label: String,
    /// Published view model.
    pub state: Snapshot,
    /// Media tracks not yet stopped.
    pub live_tracks: usize,
    /// Peer connections still open.
    pub open_peers: usize,
}

impl ClientSnapshot {
    /// Snapshot of a client without media.
    pub fn new(label: impl Into<String>, state: Snapshot) -> Self {
        Self { label: label.into(), state, ..Self::default() }
    }

    /// Record what the media backend still holds.
    #[must_use]
    pub fn with_media(mut self, live_tracks: usize, open_peers: usize) -> Self {
        self.live_tracks = live_tracks;
        self.open_peers = open_peers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot() {
        let snapshot = SystemSnapshot::empty();
        assert!(snapshot.clients.is_empty());
    }

    #[test]
    fn lookup_by_signed_in_user() {
        let user = UserId::new(3).unwrap();
        let state = Snapshot { user: Some(user), ..Snapshot::default() };
        let mut system = SystemSnapshot::single(ClientSnapshot::new("anon", Snapshot::default()));
        system.add_client(ClientSnapshot::new("carol", state).with_media(2, 1));

        let carol = system.client(user).unwrap();
        assert_eq!(carol.label, "carol");
        assert_eq!((carol.live_tracks, carol.open_peers), (2, 1));
    }
}
