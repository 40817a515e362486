//! Packet buffer implementation
//!
//! Provides the serialization primitives for the game protocol:
//! - The immutable [`Packet`] value emitted by the decoder and consumed by
//!   the encoder
//! - [`PacketBuilder`] for writing payloads, including the obfuscated field
//!   encodings (byte A/C/S, short A, etc.) and bit-level packing
//! - [`PacketReader`] for the mirrored read operations
//!
//! The per-field byte-order/offset variants exist purely to defeat naive
//! packet sniffers and must be reproduced bit-exactly for client
//! compatibility.

use bytes::{BufMut, Bytes, BytesMut};

/// Maximum packet size (64KB)
pub const MAX_PACKET_SIZE: usize = 65535;

/// Terminator byte for protocol strings
pub const STRING_TERMINATOR: u8 = 10;

/// Opcode value marking a raw packet that bypasses framing entirely
pub const RAW_OPCODE: i32 = -1;

/// Masks for extracting the low `n` bits of a value, indexed by `n`
pub(crate) const BIT_MASKS: [u32; 33] = {
    let mut masks = [0u32; 33];
    let mut i = 0;
    while i < 32 {
        masks[i] = (1u32 << i) - 1;
        i += 1;
    }
    masks[32] = u32::MAX;
    masks
};

/// How a packet's payload length is conveyed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Length is fixed by the opcode; no prefix is written
    Fixed,
    /// 1-byte length prefix
    VarByte,
    /// 2-byte big-endian length prefix
    VarShort,
}

/// A discrete protocol frame, immutable once built.
///
/// An opcode of [`RAW_OPCODE`] marks a raw packet whose payload is written to
/// the wire untouched; the handshake's cleartext exchanges use this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: i32,
    framing: Framing,
    payload: Bytes,
}

impl Packet {
    /// Create a packet with the given opcode, framing and payload
    pub fn new(opcode: u8, framing: Framing, payload: Bytes) -> Self {
        Self {
            opcode: opcode as i32,
            framing,
            payload,
        }
    }

    /// Create a raw packet that bypasses framing
    pub fn raw(payload: Bytes) -> Self {
        Self {
            opcode: RAW_OPCODE,
            framing: Framing::Fixed,
            payload,
        }
    }

    /// The packet opcode, or [`RAW_OPCODE`] for raw packets
    #[inline]
    pub fn opcode(&self) -> i32 {
        self.opcode
    }

    /// The framing kind chosen when the packet was built
    #[inline]
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// The packet payload
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether this packet bypasses framing
    #[inline]
    pub fn is_raw(&self) -> bool {
        self.opcode == RAW_OPCODE
    }

    /// Payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Open a reader over the payload
    pub fn reader(&self) -> PacketReader {
        PacketReader::new(self.payload.clone())
    }
}

/// Builder for outgoing packets.
///
/// The framing kind is chosen at construction time and only affects the
/// length prefix written when the finished builder is encoded onto the wire.
#[derive(Debug)]
pub struct PacketBuilder {
    opcode: i32,
    framing: Framing,
    payload: BytesMut,
    /// Bit cursor, present while in bit access mode
    bit_index: Option<usize>,
}

impl PacketBuilder {
    /// Create a builder for a fixed-size packet
    pub fn fixed(opcode: u8) -> Self {
        Self::with_framing(opcode as i32, Framing::Fixed)
    }

    /// Create a builder for a packet with a 1-byte length prefix
    pub fn var_byte(opcode: u8) -> Self {
        Self::with_framing(opcode as i32, Framing::VarByte)
    }

    /// Create a builder for a packet with a 2-byte length prefix
    pub fn var_short(opcode: u8) -> Self {
        Self::with_framing(opcode as i32, Framing::VarShort)
    }

    /// Create a builder for a raw packet (no opcode, no framing)
    pub fn raw() -> Self {
        Self::with_framing(RAW_OPCODE, Framing::Fixed)
    }

    fn with_framing(opcode: i32, framing: Framing) -> Self {
        Self {
            opcode,
            framing,
            payload: BytesMut::with_capacity(64),
            bit_index: None,
        }
    }

    /// Current payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether nothing has been written yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    // ============ Byte-Oriented Writes ============

    /// Write an unsigned byte
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        debug_assert!(self.bit_index.is_none(), "byte write during bit access");
        self.payload.put_u8(value);
        self
    }

    /// Write a signed byte
    pub fn put_i8(&mut self, value: i8) -> &mut Self {
        self.payload.put_i8(value);
        self
    }

    /// Write byte A (value + 128)
    pub fn put_byte_a(&mut self, value: u8) -> &mut Self {
        self.put_u8(value.wrapping_add(128))
    }

    /// Write byte C (negated)
    pub fn put_byte_c(&mut self, value: i8) -> &mut Self {
        self.put_i8(value.wrapping_neg())
    }

    /// Write byte S (128 - value)
    pub fn put_byte_s(&mut self, value: u8) -> &mut Self {
        self.put_u8(128u8.wrapping_sub(value))
    }

    /// Write a big-endian unsigned short
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.payload.put_u16(value);
        self
    }

    /// Write a little-endian unsigned short
    pub fn put_le_u16(&mut self, value: u16) -> &mut Self {
        self.payload.put_u16_le(value);
        self
    }

    /// Write short A (high byte, then low byte + 128)
    pub fn put_short_a(&mut self, value: u16) -> &mut Self {
        self.put_u8((value >> 8) as u8);
        self.put_u8((value as u8).wrapping_add(128))
    }

    /// Write little-endian short A (low byte + 128, then high byte)
    pub fn put_le_short_a(&mut self, value: u16) -> &mut Self {
        self.put_u8((value as u8).wrapping_add(128));
        self.put_u8((value >> 8) as u8)
    }

    /// Write a big-endian unsigned int
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.payload.put_u32(value);
        self
    }

    /// Write a big-endian signed int
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.payload.put_i32(value);
        self
    }

    /// Write a big-endian unsigned long
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.payload.put_u64(value);
        self
    }

    /// Write a big-endian signed long
    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.payload.put_i64(value);
        self
    }

    /// Write a terminated protocol string
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.payload.extend_from_slice(value.as_bytes());
        self.put_u8(STRING_TERMINATOR)
    }

    /// Write raw bytes
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    /// Write bytes in reverse order
    pub fn put_bytes_reversed(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes.iter().rev() {
            self.payload.put_u8(b);
        }
        self
    }

    // ============ Bit Access ============

    /// Enter bit access mode; the cursor starts at the current byte offset
    /// times eight.
    pub fn start_bit_access(&mut self) -> &mut Self {
        debug_assert!(self.bit_index.is_none(), "already in bit access mode");
        self.bit_index = Some(self.payload.len() * 8);
        self
    }

    /// Write the low `num_bits` bits of `value`, crossing byte boundaries as
    /// needed and advancing the cursor.
    pub fn put_bits(&mut self, num_bits: usize, value: u32) -> &mut Self {
        assert!(num_bits >= 1 && num_bits <= 32, "bit count out of range");
        let bit_index = self.bit_index.expect("not in bit access mode");

        let mut byte_pos = bit_index >> 3;
        let mut bit_offset = 8 - (bit_index & 7);
        self.bit_index = Some(bit_index + num_bits);

        // Grow the buffer to cover every byte the write touches
        let needed = (bit_index + num_bits + 7) >> 3;
        if self.payload.len() < needed {
            self.payload.resize(needed, 0);
        }

        let mut remaining = num_bits;
        while remaining > bit_offset {
            self.payload[byte_pos] &= !(BIT_MASKS[bit_offset] as u8);
            self.payload[byte_pos] |=
                ((value >> (remaining - bit_offset)) & BIT_MASKS[bit_offset]) as u8;
            remaining -= bit_offset;
            byte_pos += 1;
            bit_offset = 8;
        }

        if remaining == bit_offset {
            self.payload[byte_pos] &= !(BIT_MASKS[bit_offset] as u8);
            self.payload[byte_pos] |= (value & BIT_MASKS[bit_offset]) as u8;
        } else {
            self.payload[byte_pos] &=
                !((BIT_MASKS[remaining] << (bit_offset - remaining)) as u8);
            self.payload[byte_pos] |=
                ((value & BIT_MASKS[remaining]) << (bit_offset - remaining)) as u8;
        }

        self
    }

    /// Leave bit access mode, rounding the cursor up to the next whole byte.
    /// Subsequent byte writes resume there.
    pub fn finish_bit_access(&mut self) -> &mut Self {
        let bit_index = self.bit_index.take().expect("not in bit access mode");
        let byte_len = (bit_index + 7) >> 3;
        if self.payload.len() < byte_len {
            self.payload.resize(byte_len, 0);
        }
        self
    }

    /// Finalize into an immutable [`Packet`]
    pub fn build(mut self) -> Packet {
        if self.bit_index.is_some() {
            self.finish_bit_access();
        }
        Packet {
            opcode: self.opcode,
            framing: self.framing,
            payload: self.payload.freeze(),
        }
    }
}

/// Reader for inbound packet payloads.
///
/// Reads past the end of the buffer yield zero rather than panicking; frame
/// boundaries are enforced by the decoder before a payload reaches a handler.
#[derive(Debug, Clone)]
pub struct PacketReader {
    data: Bytes,
    pos: usize,
    /// Bit cursor, present while in bit access mode
    bit_index: Option<usize>,
}

impl PacketReader {
    /// Create a reader over the given bytes
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            bit_index: None,
        }
    }

    /// Create a reader over a byte slice
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether any bytes remain
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Read an unsigned byte
    pub fn read_u8(&mut self) -> u8 {
        if self.pos >= self.data.len() {
            return 0;
        }
        let value = self.data[self.pos];
        self.pos += 1;
        value
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> i8 {
        self.read_u8() as i8
    }

    /// Read byte A (value - 128)
    pub fn read_byte_a(&mut self) -> u8 {
        self.read_u8().wrapping_sub(128)
    }

    /// Read byte C (negated)
    pub fn read_byte_c(&mut self) -> i8 {
        self.read_i8().wrapping_neg()
    }

    /// Read byte S (128 - value)
    pub fn read_byte_s(&mut self) -> u8 {
        128u8.wrapping_sub(self.read_u8())
    }

    /// Read a big-endian unsigned short
    pub fn read_u16(&mut self) -> u16 {
        let hi = self.read_u8() as u16;
        let lo = self.read_u8() as u16;
        (hi << 8) | lo
    }

    /// Read a little-endian unsigned short
    pub fn read_le_u16(&mut self) -> u16 {
        let lo = self.read_u8() as u16;
        let hi = self.read_u8() as u16;
        (hi << 8) | lo
    }

    /// Read short A (high byte, then low byte - 128)
    pub fn read_short_a(&mut self) -> u16 {
        let hi = self.read_u8() as u16;
        let lo = self.read_u8().wrapping_sub(128) as u16;
        (hi << 8) | lo
    }

    /// Read little-endian short A (low byte - 128, then high byte)
    pub fn read_le_short_a(&mut self) -> u16 {
        let lo = self.read_u8().wrapping_sub(128) as u16;
        let hi = self.read_u8() as u16;
        (hi << 8) | lo
    }

    /// Read a big-endian unsigned int
    pub fn read_u32(&mut self) -> u32 {
        let hi = self.read_u16() as u32;
        let lo = self.read_u16() as u32;
        (hi << 16) | lo
    }

    /// Read a big-endian unsigned long
    pub fn read_u64(&mut self) -> u64 {
        let hi = self.read_u32() as u64;
        let lo = self.read_u32() as u64;
        (hi << 32) | lo
    }

    /// Read a terminated protocol string
    pub fn read_string(&mut self) -> String {
        let mut bytes = Vec::new();
        while self.has_remaining() {
            let b = self.read_u8();
            if b == STRING_TERMINATOR {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Read a specific number of bytes
    pub fn read_bytes(&mut self, length: usize) -> Vec<u8> {
        let end = (self.pos + length).min(self.data.len());
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        bytes
    }

    /// Skip a number of bytes
    pub fn skip(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.data.len());
    }

    // ============ Bit Access ============

    /// Enter bit access mode at the current byte position
    pub fn start_bit_access(&mut self) {
        self.bit_index = Some(self.pos * 8);
    }

    /// Read `num_bits` bits from the buffer, advancing the cursor
    pub fn read_bits(&mut self, num_bits: usize) -> u32 {
        assert!(num_bits >= 1 && num_bits <= 32, "bit count out of range");
        let bit_index = self.bit_index.expect("not in bit access mode");

        let mut byte_pos = bit_index >> 3;
        let mut bit_offset = 8 - (bit_index & 7);
        self.bit_index = Some(bit_index + num_bits);

        let mut value = 0u32;
        let mut remaining = num_bits;

        while remaining > bit_offset {
            let byte = self.data.get(byte_pos).copied().unwrap_or(0) as u32;
            value |= (byte & BIT_MASKS[bit_offset]) << (remaining - bit_offset);
            remaining -= bit_offset;
            byte_pos += 1;
            bit_offset = 8;
        }

        let byte = self.data.get(byte_pos).copied().unwrap_or(0) as u32;
        if remaining == bit_offset {
            value |= byte & BIT_MASKS[bit_offset];
        } else {
            value |= (byte >> (bit_offset - remaining)) & BIT_MASKS[remaining];
        }

        value
    }

    /// Leave bit access mode, rounding the byte cursor up
    pub fn finish_bit_access(&mut self) {
        if let Some(bit_index) = self.bit_index.take() {
            self.pos = (bit_index + 7) >> 3;
        }
    }
}
