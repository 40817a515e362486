//! Login protocol definitions
//!
//! The credential block collected by the handshake decoder, the numeric
//! response codes written back to the client, and the username utilities
//! shared between login and the synchronization layer.

use bytes::Bytes;

use crate::error::{AuthError, Result, RunevaleError};
use crate::net::buffer::Packet;

/// Login kinds accepted in the login header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginKind {
    /// Fresh login
    Fresh = 16,
    /// Reconnection after a dropped session
    Reconnect = 18,
}

impl LoginKind {
    /// Convert a u8 to a LoginKind
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            16 => Some(Self::Fresh),
            18 => Some(Self::Reconnect),
            _ => None,
        }
    }

    /// Get the wire value
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Credentials and key material collected by a completed handshake
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Fresh login or reconnection
    pub kind: LoginKind,
    /// Low memory client flag
    pub low_memory: bool,
    /// Client-reported unique identifier
    pub uid: u32,
    /// 64-bit key contributed by the client
    pub client_key: u64,
    /// 64-bit key issued by the server, echoed back by the client
    pub server_key: u64,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

impl LoginRequest {
    /// The four cipher seed words for this session
    pub fn cipher_seeds(&self) -> [u32; 4] {
        crate::crypto::Isaac::session_seed(self.client_key, self.server_key)
    }
}

/// Response codes for the login protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginResponse {
    /// Successful login
    Success = 2,
    /// Invalid username or password
    InvalidCredentials = 3,
    /// Account is disabled
    AccountDisabled = 4,
    /// Account is already logged in
    AlreadyLoggedIn = 5,
    /// Game has been updated
    GameUpdated = 6,
    /// World is full
    WorldFull = 7,
    /// Login server offline
    LoginServerOffline = 8,
    /// Login limit exceeded
    LoginLimitExceeded = 9,
    /// Bad session ID
    BadSessionId = 10,
    /// Login server rejected session
    LoginServerRejected = 11,
    /// Need members account
    MembersAccount = 12,
    /// Could not complete login
    CouldNotCompleteLogin = 13,
    /// Server being updated
    ServerUpdating = 14,
    /// Too many incorrect logins
    TooManyIncorrectLogins = 16,
    /// Standing in members area
    StandingInMembersArea = 17,
}

impl LoginResponse {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<&AuthError> for LoginResponse {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => LoginResponse::InvalidCredentials,
            AuthError::AccountDisabled => LoginResponse::AccountDisabled,
            AuthError::AlreadyLoggedIn => LoginResponse::AlreadyLoggedIn,
            AuthError::WorldFull => LoginResponse::WorldFull,
            _ => LoginResponse::CouldNotCompleteLogin,
        }
    }
}

/// Build the raw success response: code, rights, flagged.
/// Raw because the steady-state cipher is not yet engaged on this byte.
pub fn success_packet(rights: u8, flagged: bool) -> Packet {
    Packet::raw(Bytes::copy_from_slice(&[
        LoginResponse::Success.as_u8(),
        rights,
        u8::from(flagged),
    ]))
}

/// Build the raw single-byte reject response
pub fn reject_packet(code: LoginResponse) -> Packet {
    Packet::raw(Bytes::copy_from_slice(&[code.as_u8()]))
}

/// Validate and normalize a username
pub fn validate_username(username: &str) -> Result<String> {
    let username = username.trim().to_lowercase();

    if username.is_empty() || username.len() > 12 {
        return Err(RunevaleError::Auth(AuthError::InvalidUsername));
    }

    let valid = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ');

    if !valid {
        return Err(RunevaleError::Auth(AuthError::InvalidUsername));
    }

    // Spaces become underscores for storage
    Ok(username.replace(' ', "_"))
}

/// Validate a password
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() || password.len() < 4 || password.len() > 20 {
        return Err(RunevaleError::Auth(AuthError::InvalidPassword));
    }
    Ok(())
}

/// Encode a display name as the base-37 long the client renders names from
pub fn encode_name_base37(name: &str) -> i64 {
    let mut result: i64 = 0;

    for c in name.chars().take(12) {
        result = result.wrapping_mul(37);
        match c {
            'A'..='Z' => result += (c as i64) - 64,
            'a'..='z' => result += (c as i64) - 96,
            '0'..='9' => result += (c as i64) - 21,
            _ => {}
        }
    }

    while result % 37 == 0 && result != 0 {
        result /= 37;
    }

    result
}
