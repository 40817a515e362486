//! Error handling module
//!
//! Defines custom error types for the Runevale server.

use std::io;

use thiserror::Error;

/// Main error type for the Runevale server
#[derive(Error, Debug)]
pub enum RunevaleError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Game logic errors
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Task engine errors
    #[error("Engine error: {0}")]
    Engine(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Write channel closed")]
    WriteChannelClosed,

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Protocol-specific errors
///
/// Every variant here is fatal to the connection that produced it. A client
/// that sends a malformed handshake or frame is disconnected without retry.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected handshake opcode: {0}")]
    BadHandshakeOpcode(u8),

    #[error("Unexpected login opcode: {0}")]
    BadLoginOpcode(u8),

    #[error("Invalid login magic: {0}")]
    BadMagic(u8),

    #[error("Invalid revision: expected {expected}, got {actual}")]
    InvalidRevision { expected: u32, actual: u32 },

    #[error("Login block length mismatch: declared {declared}, expected {expected}")]
    LengthMismatch { declared: usize, expected: usize },

    #[error("Invalid login block marker: {0}")]
    BadBlockMarker(u8),

    #[error("Server key echo mismatch")]
    KeyEchoMismatch,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },
}

/// Authentication-specific errors
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Already logged in")]
    AlreadyLoggedIn,

    #[error("World full")]
    WorldFull,

    #[error("Invalid username format")]
    InvalidUsername,

    #[error("Invalid password format")]
    InvalidPassword,

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),
}

/// Game logic errors
#[derive(Error, Debug)]
pub enum GameError {
    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("NPC not found: {0}")]
    NpcNotFound(u16),

    #[error("Invalid location: ({x}, {y}, {z})")]
    InvalidLocation { x: i32, y: i32, z: i32 },

    #[error("World not ready")]
    WorldNotReady,
}

/// Result type alias for Runevale operations
pub type Result<T> = std::result::Result<T, RunevaleError>;
