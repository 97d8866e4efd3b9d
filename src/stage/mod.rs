//! # Stage and Object Registries
//!
//! Server-side game rooms. A [`stage::Stage`] groups the sessions that are
//! physically in the room, the characters that merely reserved a slot
//! (quest parties), the objects spawned inside it, and opaque binary
//! blobs the room owner sets for the server to echo verbatim to every
//! joiner.
//!
//! ## Concurrency
//! One read/write lock per stage: membership changes and broadcasts on
//! the same stage serialize against each other, so a session can never be
//! broadcast to mid-teardown. Each object carries its own lock so
//! position updates on different objects never contend. Broadcast fan-out
//! enqueues through each session's non-blocking queue capability and
//! never waits on a slow client's socket.

pub mod object;
pub mod registry;
pub mod stage;

#[cfg(test)]
pub(crate) mod testutil;

pub use object::Object;
pub use registry::StageRegistry;
pub use stage::{Stage, StageBinaryKey, StageSession};

/// Process-unique identifier for a connected session.
///
/// Stages key their membership on this rather than on the session object
/// itself, so equality survives trait-object indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
