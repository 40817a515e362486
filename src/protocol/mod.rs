//! Protocol implementation
//!
//! - `handshake` - the pre-authentication login state machine
//! - `login` - credential types, response codes, username utilities
//! - `packets` - the opcode size table and outgoing packet constructors
//! - `game` - in-game packet handlers and the login task flow

pub mod game;
pub mod handshake;
pub mod login;
pub mod packets;
