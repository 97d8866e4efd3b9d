//! # Protocol Dispatch
//!
//! The u16 opcode space carried at the front of every decrypted payload,
//! and the handler table that routes a packet to its message handler.
//!
//! Payloads are packet *groups*: one or more `[opcode(2)][body]` messages
//! back to back, closed by the [`opcode::PacketId::SYS_END`] terminator.
//! The session layer walks the group, dispatching each message in turn.
//!
//! Unknown or unimplemented opcodes are a recoverable condition here:
//! the dispatcher returns [`crate::error::ProtocolError::NotImplemented`]
//! and the session drops the remainder of the group instead of taking the
//! whole connection (or process) down.

pub mod dispatcher;
pub mod opcode;

pub use dispatcher::Dispatcher;
pub use opcode::PacketId;
