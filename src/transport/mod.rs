//! # Transport
//!
//! One [`conn::CryptConn`] per accepted TCP client. The connection owns
//! the framed crypt codec and exposes only `read_packet`/`send_packet`;
//! front-ends never touch key state, headers, or checksums directly.
//!
//! Clients initialize a connection by sending 8 zero bytes; the server
//! reads and discards them before the first encrypted frame. There is no
//! further handshake and no key agreement: both sides start from the
//! fixed key seed, and a reconnecting client always starts over.

pub mod conn;

pub use conn::{CryptConn, CryptReadHalf, CryptWriteHalf, NULL_INIT_LEN};
