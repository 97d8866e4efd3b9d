//! Packet opcode identifiers.
//!
//! The terminator's wire bytes (`0x00 0x10`) are fixed by the client; the
//! remaining system opcodes live in the contiguous sys range above it.
//! The dispatcher treats ids as opaque u16s, so correcting an id against
//! reference traffic is a one-line change here.

use std::fmt;

/// A u16 message opcode as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId(pub u16);

impl PacketId {
    /// Group terminator, appended to every outgoing packet group.
    pub const SYS_END: PacketId = PacketId(0x0010);
    pub const SYS_PING: PacketId = PacketId(0x0011);
    pub const SYS_ACK: PacketId = PacketId(0x0012);
    pub const SYS_TIME: PacketId = PacketId(0x0013);
    pub const SYS_LOGIN: PacketId = PacketId(0x0014);
    pub const SYS_LOGOUT: PacketId = PacketId(0x0015);

    pub const SYS_CREATE_STAGE: PacketId = PacketId(0x0020);
    pub const SYS_ENTER_STAGE: PacketId = PacketId(0x0021);
    pub const SYS_LEAVE_STAGE: PacketId = PacketId(0x0022);
    pub const SYS_LOCK_STAGE: PacketId = PacketId(0x0023);
    pub const SYS_RESERVE_STAGE: PacketId = PacketId(0x0024);
    pub const SYS_UNRESERVE_STAGE: PacketId = PacketId(0x0025);
    pub const SYS_SET_STAGE_BINARY: PacketId = PacketId(0x0026);
    pub const SYS_GET_STAGE_BINARY: PacketId = PacketId(0x0027);
    pub const SYS_CAST_BINARY: PacketId = PacketId(0x0028);

    pub const SYS_CREATE_OBJECT: PacketId = PacketId(0x0030);
    pub const SYS_DELETE_OBJECT: PacketId = PacketId(0x0031);
    pub const SYS_POSITION_OBJECT: PacketId = PacketId(0x0032);
    /// Server-originated announcement of an object spawned by another client.
    pub const SYS_DUPLICATE_OBJECT: PacketId = PacketId(0x0033);

    /// Human-readable name for logging; unknown ids render as hex.
    pub fn name(self) -> &'static str {
        match self {
            Self::SYS_END => "SYS_END",
            Self::SYS_PING => "SYS_PING",
            Self::SYS_ACK => "SYS_ACK",
            Self::SYS_TIME => "SYS_TIME",
            Self::SYS_LOGIN => "SYS_LOGIN",
            Self::SYS_LOGOUT => "SYS_LOGOUT",
            Self::SYS_CREATE_STAGE => "SYS_CREATE_STAGE",
            Self::SYS_ENTER_STAGE => "SYS_ENTER_STAGE",
            Self::SYS_LEAVE_STAGE => "SYS_LEAVE_STAGE",
            Self::SYS_LOCK_STAGE => "SYS_LOCK_STAGE",
            Self::SYS_RESERVE_STAGE => "SYS_RESERVE_STAGE",
            Self::SYS_UNRESERVE_STAGE => "SYS_UNRESERVE_STAGE",
            Self::SYS_SET_STAGE_BINARY => "SYS_SET_STAGE_BINARY",
            Self::SYS_GET_STAGE_BINARY => "SYS_GET_STAGE_BINARY",
            Self::SYS_CAST_BINARY => "SYS_CAST_BINARY",
            Self::SYS_CREATE_OBJECT => "SYS_CREATE_OBJECT",
            Self::SYS_DELETE_OBJECT => "SYS_DELETE_OBJECT",
            Self::SYS_POSITION_OBJECT => "SYS_POSITION_OBJECT",
            Self::SYS_DUPLICATE_OBJECT => "SYS_DUPLICATE_OBJECT",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            "UNKNOWN" => write!(f, "{:#06x}", self.0),
            name => f.write_str(name),
        }
    }
}

impl From<u16> for PacketId {
    fn from(raw: u16) -> Self {
        PacketId(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_wire_bytes() {
        assert_eq!(PacketId::SYS_END.0.to_be_bytes(), [0x00, 0x10]);
    }

    #[test]
    fn display_names_known_and_unknown() {
        assert_eq!(PacketId::SYS_PING.to_string(), "SYS_PING");
        assert_eq!(PacketId(0xBEEF).to_string(), "0xbeef");
    }
}
