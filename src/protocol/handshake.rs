//! Login handshake state machine
//!
//! Drives a new connection from its first byte to a collected credential
//! block. The exchange is cleartext: the cipher pair only exists once the
//! keys inside the credential block have been read.
//!
//! Every malformed input closes the connection. The protocol treats any
//! deviation as a hostile or buggy client, so there are no retry paths.
//!
//! Wire layout of the credential block (after the 2-byte login header):
//! magic byte 255, 2-byte protocol version, 1 byte low-memory flag, nine
//! 4-byte reserved words, 1 byte reported cipher-block length, 1 byte block
//! marker, 8-byte client key, 8-byte server key echo, 4-byte user id, then
//! terminated username and password strings.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result, RunevaleError};
use crate::net::buffer::PacketReader;
use crate::protocol::login::{LoginKind, LoginRequest};
use crate::REVISION;

/// Handshake opcode that opens a game login
pub const LOGIN_MARKER: u8 = 14;

/// Magic byte leading the credential block
pub const LOGIN_MAGIC: u8 = 255;

/// Marker byte leading the key/credential section
pub const LOGIN_BLOCK_MARKER: u8 = 10;

/// Bytes of the credential block preceding the key/credential section:
/// magic (1) + version (2) + low memory (1) + reserved words (36)
pub const LOGIN_HEADER_LEN: usize = 40;

/// Current stage of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeStage {
    /// Waiting for the opening opcode byte
    AwaitOpcode,
    /// Waiting for the name hash byte (discarded)
    AwaitNameHash,
    /// Waiting for the login opcode and declared block size
    AwaitLoginHeader,
    /// Waiting for the full credential block
    AwaitCredentials {
        kind: LoginKind,
        size: usize,
        encrypted_len: usize,
    },
    /// Credentials emitted; this codec is spent
    Done,
}

/// Output of a decode attempt
#[derive(Debug)]
pub enum HandshakeStep {
    /// Not enough data buffered; try again after the next read
    Incomplete,
    /// The key exchange reply that must be written to the client now
    KeyExchange(Bytes),
    /// The handshake finished; swap to the steady-state codec
    Complete(LoginRequest),
}

/// Decoder for the pre-authentication handshake.
///
/// Owned by a single connection; state advances monotonically through the
/// stages and survives arbitrarily-chunked delivery.
#[derive(Debug)]
pub struct HandshakeCodec {
    stage: HandshakeStage,
    server_key: Option<u64>,
}

impl HandshakeCodec {
    /// Create a codec for a fresh connection
    pub fn new() -> Self {
        Self {
            stage: HandshakeStage::AwaitOpcode,
            server_key: None,
        }
    }

    /// Create a codec with a predetermined server key instead of a random one
    pub fn with_server_key(key: u64) -> Self {
        Self {
            stage: HandshakeStage::AwaitOpcode,
            server_key: Some(key),
        }
    }

    /// The key issued during the key exchange, once issued
    pub fn server_key(&self) -> Option<u64> {
        self.server_key
    }

    /// Advance the state machine over the buffered bytes.
    ///
    /// Consumes nothing when the current stage lacks data; the caller keeps
    /// accumulating into `buf` and calls again.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<HandshakeStep> {
        loop {
            match self.stage {
                HandshakeStage::AwaitOpcode => {
                    if buf.is_empty() {
                        return Ok(HandshakeStep::Incomplete);
                    }
                    let opcode = buf.split_to(1)[0];
                    if opcode != LOGIN_MARKER {
                        return Err(RunevaleError::Protocol(
                            ProtocolError::BadHandshakeOpcode(opcode),
                        ));
                    }
                    self.stage = HandshakeStage::AwaitNameHash;
                }

                HandshakeStage::AwaitNameHash => {
                    if buf.is_empty() {
                        return Ok(HandshakeStep::Incomplete);
                    }
                    // The name hash only ever served login-server routing
                    let _name_hash = buf.split_to(1)[0];

                    let key = *self.server_key.get_or_insert_with(rand::random);
                    let mut reply = BytesMut::with_capacity(17);
                    reply.put_bytes(0, 8);
                    reply.put_u8(0);
                    reply.put_u64(key);

                    self.stage = HandshakeStage::AwaitLoginHeader;
                    return Ok(HandshakeStep::KeyExchange(reply.freeze()));
                }

                HandshakeStage::AwaitLoginHeader => {
                    if buf.len() < 2 {
                        return Ok(HandshakeStep::Incomplete);
                    }
                    let header = buf.split_to(2);
                    let kind = LoginKind::from_u8(header[0]).ok_or(RunevaleError::Protocol(
                        ProtocolError::BadLoginOpcode(header[0]),
                    ))?;
                    let size = header[1] as usize;
                    if size <= LOGIN_HEADER_LEN {
                        return Err(RunevaleError::Protocol(ProtocolError::LengthMismatch {
                            declared: size,
                            expected: LOGIN_HEADER_LEN + 1,
                        }));
                    }
                    self.stage = HandshakeStage::AwaitCredentials {
                        kind,
                        size,
                        encrypted_len: size - LOGIN_HEADER_LEN,
                    };
                }

                HandshakeStage::AwaitCredentials {
                    kind,
                    size,
                    encrypted_len,
                } => {
                    if buf.len() < size {
                        return Ok(HandshakeStep::Incomplete);
                    }
                    let block = buf.split_to(size).freeze();
                    let request = self.parse_credentials(kind, encrypted_len, block)?;
                    self.stage = HandshakeStage::Done;
                    return Ok(HandshakeStep::Complete(request));
                }

                HandshakeStage::Done => {
                    return Ok(HandshakeStep::Incomplete);
                }
            }
        }
    }

    /// Validate and unpack the credential block
    fn parse_credentials(
        &self,
        kind: LoginKind,
        encrypted_len: usize,
        block: Bytes,
    ) -> Result<LoginRequest> {
        let mut reader = PacketReader::new(block);

        let magic = reader.read_u8();
        if magic != LOGIN_MAGIC {
            return Err(RunevaleError::Protocol(ProtocolError::BadMagic(magic)));
        }

        let version = reader.read_u16() as u32;
        if version != REVISION {
            return Err(RunevaleError::Protocol(ProtocolError::InvalidRevision {
                expected: REVISION,
                actual: version,
            }));
        }

        let low_memory = reader.read_u8() == 1;

        // Reserved words; nothing consumes these server-side
        for _ in 0..9 {
            let _ = reader.read_u32();
        }

        let reported = reader.read_u8() as usize;
        if reported != encrypted_len - 1 {
            return Err(RunevaleError::Protocol(ProtocolError::LengthMismatch {
                declared: reported,
                expected: encrypted_len - 1,
            }));
        }

        let marker = reader.read_u8();
        if marker != LOGIN_BLOCK_MARKER {
            return Err(RunevaleError::Protocol(ProtocolError::BadBlockMarker(
                marker,
            )));
        }

        let client_key = reader.read_u64();
        let server_key = reader.read_u64();
        if Some(server_key) != self.server_key {
            return Err(RunevaleError::Protocol(ProtocolError::KeyEchoMismatch));
        }

        let uid = reader.read_u32();
        let username = reader.read_string();
        let password = reader.read_string();

        Ok(LoginRequest {
            kind,
            low_memory,
            uid,
            client_key,
            server_key,
            username,
            password,
        })
    }
}

impl Default for HandshakeCodec {
    fn default() -> Self {
        Self::new()
    }
}
