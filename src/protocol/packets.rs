//! Packet definitions module
//!
//! Holds the static opcode-to-size table the cumulative decoder is keyed by,
//! and constructors for the outgoing packets the server sends outside of the
//! entity synchronization path.

use crate::net::buffer::{Packet, PacketBuilder};
use crate::game::location::Location;

/// Expected payload length for an incoming opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSize {
    /// Fixed payload length
    Fixed(usize),
    /// Variable length; the frame carries a 1-byte length prefix
    Variable,
}

impl PacketSize {
    /// Get the fixed size value, if applicable
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            PacketSize::Fixed(size) => Some(*size),
            PacketSize::Variable => None,
        }
    }

    /// Check if this is a variable length packet
    pub fn is_variable(&self) -> bool {
        matches!(self, PacketSize::Variable)
    }
}

/// Sentinel in the raw table marking a variable-length packet
const VARIABLE: i8 = -1;

/// Payload sizes for every client-to-server opcode. A value of -1 means the
/// frame carries its own 1-byte length prefix.
#[rustfmt::skip]
static INCOMING_SIZES: [i8; 256] = [
    0, 0, 0, 1, -1, 0, 0, 0, 0, 0,     // 0
    0, 0, 0, 0, 8, 0, 6, 2, 2, 0,      // 10
    0, 2, 0, 6, 0, 12, 0, 0, 0, 0,     // 20
    0, 0, 0, 0, 0, 8, 4, 0, 0, 2,      // 30
    2, 6, 0, 6, 0, -1, 0, 0, 0, 0,     // 40
    0, 0, 0, 12, 0, 0, 0, 8, 8, 0,     // 50
    8, 8, 0, 0, 0, 0, 0, 0, 0, 0,      // 60
    6, 0, 2, 2, 8, 6, 0, -1, 0, 6,     // 70
    0, 0, 0, 0, 0, 1, 4, 6, 0, 0,      // 80
    0, 0, 0, 0, 0, 3, 0, 0, -1, 0,     // 90
    0, 13, 0, -1, 0, 0, 0, 0, 0, 0,    // 100
    0, 0, 0, 0, 0, 0, 0, 6, 0, 0,      // 110
    1, 0, 6, 0, 0, 0, -1, 0, 2, 6,     // 120
    0, 4, 6, 8, 0, 6, 0, 0, 0, 2,      // 130
    0, 0, 0, 0, 0, 6, 0, 0, 0, 0,      // 140
    0, 0, 1, 2, 0, 2, 6, 0, 0, 0,      // 150
    0, 0, 0, 0, -1, -1, 0, 0, 0, 0,    // 160
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,      // 170
    0, 8, 0, 3, 0, 2, 0, 0, 8, 1,      // 180
    0, 0, 12, 0, 0, 0, 0, 0, 0, 0,     // 190
    2, 0, 0, 0, 0, 0, 0, 0, 4, 0,      // 200
    4, 0, 0, 0, 7, 8, 0, 0, 10, 0,     // 210
    0, 0, 0, 0, 0, 0, -1, 0, 6, 0,     // 220
    1, 0, 0, 0, 6, 0, 6, 8, 1, 0,      // 230
    0, 4, 0, 0, 0, 0, 10, 0, -1, 0,    // 240
    -1, 0, 6, 0, 0, 0,                 // 250
];

/// Look up the expected payload size for an incoming opcode
pub fn incoming_size(opcode: u8) -> PacketSize {
    match INCOMING_SIZES[opcode as usize] {
        VARIABLE => PacketSize::Variable,
        n => PacketSize::Fixed(n as usize),
    }
}

// ============ Incoming Opcodes ============

/// Keep-alive/ping packet
pub const OP_KEEPALIVE: u8 = 0;
/// Window focus change
pub const OP_FOCUS_CHANGE: u8 = 3;
/// Public chat message
pub const OP_CHAT: u8 = 4;
/// Walk initiated from an on-screen click
pub const OP_WALK: u8 = 164;
/// Walk initiated on an entity/object interaction
pub const OP_WALK_ENTITY: u8 = 98;
/// Walk initiated from the minimap (carries 14 trailing bytes)
pub const OP_WALK_MINIMAP: u8 = 248;
/// Player command (::command)
pub const OP_COMMAND: u8 = 103;
/// Interface button click
pub const OP_BUTTON: u8 = 185;
/// Idle timeout notification from the client
pub const OP_IDLE: u8 = 202;

// ============ Outgoing Opcodes ============

/// System/game message in the chat box
pub const OP_SYSTEM_MESSAGE: u8 = 253;
/// Log the client out
pub const OP_LOGOUT: u8 = 109;
/// Load the map region around a position
pub const OP_MAP_REGION: u8 = 73;
/// Player synchronization packet
pub const OP_PLAYER_UPDATE: u8 = 81;
/// NPC synchronization packet
pub const OP_NPC_UPDATE: u8 = 65;

// ============ Outgoing Packet Constructors ============

/// Build a system message packet shown in the client's chat box
pub fn system_message(message: &str) -> Packet {
    let mut builder = PacketBuilder::var_byte(OP_SYSTEM_MESSAGE);
    builder.put_string(message);
    builder.build()
}

/// Build the logout packet
pub fn logout() -> Packet {
    PacketBuilder::fixed(OP_LOGOUT).build()
}

/// Build the map region load packet for the area around `location`
pub fn load_map_region(location: &Location) -> Packet {
    let mut builder = PacketBuilder::fixed(OP_MAP_REGION);
    builder.put_short_a(location.zone_x());
    builder.put_u16(location.zone_y());
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_table_covers_all_opcodes() {
        assert_eq!(INCOMING_SIZES.len(), 256);
        for opcode in 0u8..=255 {
            // Every opcode resolves; unassigned ones fall back to Fixed(0)
            let _ = incoming_size(opcode);
        }
    }

    #[test]
    fn test_known_sizes() {
        assert_eq!(incoming_size(OP_KEEPALIVE), PacketSize::Fixed(0));
        assert_eq!(incoming_size(OP_FOCUS_CHANGE), PacketSize::Fixed(1));
        assert_eq!(incoming_size(OP_CHAT), PacketSize::Variable);
        assert_eq!(incoming_size(OP_WALK), PacketSize::Variable);
        assert_eq!(incoming_size(OP_WALK_ENTITY), PacketSize::Variable);
        assert_eq!(incoming_size(OP_WALK_MINIMAP), PacketSize::Variable);
        assert_eq!(incoming_size(OP_COMMAND), PacketSize::Variable);
        assert_eq!(incoming_size(OP_BUTTON), PacketSize::Fixed(2));
        assert_eq!(incoming_size(OP_IDLE), PacketSize::Fixed(0));
    }

    #[test]
    fn test_system_message() {
        let packet = system_message("Welcome to Runevale.");
        assert_eq!(packet.opcode(), OP_SYSTEM_MESSAGE as i32);
        let mut reader = packet.reader();
        assert_eq!(reader.read_string(), "Welcome to Runevale.");
    }

    #[test]
    fn test_logout_packet_is_empty() {
        let packet = logout();
        assert_eq!(packet.opcode(), OP_LOGOUT as i32);
        assert!(packet.is_empty());
    }

    #[test]
    fn test_load_map_region() {
        let loc = Location::new(3222, 3222, 0);
        let packet = load_map_region(&loc);
        let mut reader = packet.reader();
        assert_eq!(reader.read_short_a(), loc.zone_x());
        assert_eq!(reader.read_u16(), loc.zone_y());
    }
}
