//! # frontier-protocol
//!
//! Encrypted transport and stage/session core for a legacy hunting-MMO
//! game server. The wire format is fixed by an external, unmodifiable
//! client binary: every frame is a 14-byte header followed by a
//! stream-ciphered payload, with rolling per-direction keys and embedded
//! checksums used to detect (and brute-force out of) cipher
//! desynchronization.
//!
//! ## Architecture
//! - [`core`] — the crypt packet header codec, the cipher primitive, and
//!   the stateful [`core::codec::CryptCodec`] that frames a byte stream
//! - [`transport`] — [`transport::conn::CryptConn`], one per TCP client:
//!   the 8-byte null-init handshake and `read_packet`/`send_packet`
//! - [`protocol`] — the u16 opcode space and the opcode dispatcher
//! - [`stage`] — concurrent game-room registry: clients, reserved slots,
//!   spawned objects, opaque stage binaries, broadcasts
//! - [`server`] — the game-channel front-end: accept loop and the
//!   per-connection session worker
//! - [`config`], [`error`], [`utils`] — configuration, error taxonomy,
//!   logging and metrics
//!
//! ## Wire Format
//! ```text
//! [Pf0(1)] [KeyRotDelta(1)] [PacketNum(2)] [DataSize(2)]
//! [PrevPacketCombinedCheck(2)] [Check0(2)] [Check1(2)] [Check2(2)]
//! [DataSize ciphertext bytes]
//! ```
//! All integers are big-endian. There is no record type and no
//! out-of-band framing; the stream is this frame, repeated, for the life
//! of the connection.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stage;
pub mod transport;
pub mod utils;

pub use crate::core::codec::CryptCodec;
pub use crate::core::crypto::{decrypt, encrypt, Checksums};
pub use crate::core::header::{CryptHeader, CRYPT_HEADER_LEN};
pub use crate::error::{ProtocolError, Result};
pub use crate::transport::conn::CryptConn;
