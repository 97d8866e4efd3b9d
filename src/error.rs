//! # Error Types
//!
//! Error handling for the crypt transport and stage layer.
//!
//! This module defines all error variants that can occur while driving an
//! encrypted client connection, from low-level I/O failures to checksum
//! desynchronization that survived brute-force recovery.
//!
//! ## Error Categories
//! - **I/O Errors**: socket read/write failures; always fatal to the connection
//! - **Framing Errors**: malformed crypt packet headers
//! - **Cryptographic Errors**: payload checksums disagreeing with the header
//! - **Dispatch Errors**: unknown or unimplemented message opcodes
//!
//! All errors implement `std::error::Error` for interoperability. None of
//! these are retried at this layer: the wire protocol has no
//! resynchronization primitive above the transport, so the owning worker
//! tears the connection down and removes the session from its stages.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Framing errors
    pub const ERR_SHORT_HEADER: &str = "header is not exactly 14 bytes";

    /// Handshake errors
    pub const ERR_NULL_INIT: &str = "failed to read the 8-byte null init";

    /// Stage errors
    pub const ERR_STAGE_LOCKED: &str = "stage is locked";
    pub const ERR_STAGE_FULL: &str = "stage is at max players";
    pub const ERR_STAGE_PASSWORD: &str = "stage password does not match";
}

/// Primary error type for all transport and stage operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed crypt packet header: {0}")]
    MalformedHeader(&'static str),

    #[error("Decrypted data checksum doesn't match header")]
    ChecksumMismatch,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    HandshakeError(&'static str),

    #[error("Payload too large for crypt framing: {0} bytes")]
    OversizedPayload(usize),

    #[error("Opcode {0:#06x} is not implemented")]
    NotImplemented(u16),

    #[error("Malformed message body for opcode {opcode:#06x}: {reason}")]
    MalformedBody { opcode: u16, reason: &'static str },

    #[error("Stage error: {0}")]
    StageError(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
