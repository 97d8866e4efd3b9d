//! # Core Protocol Components
//!
//! Low-level crypt packet handling: header codec, cipher primitive, and
//! the stateful stream codec.
//!
//! ## Components
//! - **Header**: the fixed 14-byte frame header carried before every
//!   ciphertext payload
//! - **Crypto**: the keyed, length-preserving cipher primitive and its
//!   three 16-bit sub-checksums plus combined checksum
//! - **Codec**: tokio codec that owns the rolling read/send keys, packet
//!   counters, and previous-packet checksums for one connection
//!
//! ## Wire Format
//! ```text
//! [Pf0(1)] [KeyRotDelta(1)] [PacketNum(2)] [DataSize(2)]
//! [PrevCheck(2)] [Check0(2)] [Check1(2)] [Check2(2)] [Payload(DataSize)]
//! ```
//!
//! ## Desync Recovery
//! A payload whose checksums disagree with its header is assumed to be a
//! cipher desynchronization: the codec retries decryption under every
//! override key byte `0..=254` before declaring the connection dead.

pub mod codec;
pub mod crypto;
pub mod header;
