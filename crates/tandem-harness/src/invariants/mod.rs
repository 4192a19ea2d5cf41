//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during system execution.
//! Unlike example-based tests that check specific scenarios, invariants
//! verify behavioral properties across all possible execution paths.
//!
//! # Architecture
//!
//! The invariant system extracts observable state from each client's
//! published [`Snapshot`](tandem_app::Snapshot) and media backend into a
//! [`SystemSnapshot`], then runs registered [`Invariant`] checks against it.
//! Violations trigger panics with detailed context for debugging.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = cluster.snapshot();
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ActiveConversationListed, ActiveConversationRead, ConnectedPeersAgree, IdleCallIsClean,
    IdleHoldsNoMedia, ThreadMatchesActive, UniqueConversations, UniqueMessageIds,
};
pub use snapshot::{ClientSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against system state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Invariants that hold at any moment.
    ///
    /// Includes:
    /// - [`ActiveConversationListed`]: the open conversation is listed
    /// - [`ActiveConversationRead`]: the open conversation has no unread
    /// - [`UniqueConversations`]: no contact is listed twice
    /// - [`ThreadMatchesActive`]: the thread belongs to the open conversation
    /// - [`UniqueMessageIds`]: no message id appears twice in the thread
    /// - [`IdleCallIsClean`]: an idle call view has no session data
    /// - [`ConnectedPeersAgree`]: connected callers point at each other
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ActiveConversationListed);
        registry.add(ActiveConversationRead);
        registry.add(UniqueConversations);
        registry.add(ThreadMatchesActive);
        registry.add(UniqueMessageIds);
        registry.add(IdleCallIsClean);
        registry.add(ConnectedPeersAgree);
        registry
    }

    /// [`standard`](Self::standard) plus checks that need a settled system.
    ///
    /// Adds [`IdleHoldsNoMedia`], which races the asynchronous media release
    /// unless every task has run to completion.
    pub fn settled() -> Self {
        let mut registry = Self::standard();
        registry.add(IdleHoldsNoMedia);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking on the violations found.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_have_invariants() {
        assert_eq!(InvariantRegistry::standard().len(), 7);
        assert_eq!(InvariantRegistry::settled().len(), 8);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::settled();
        let snapshot = SystemSnapshot::empty();
        assert!(registry.check_all(&snapshot).is_ok());
    }
}
