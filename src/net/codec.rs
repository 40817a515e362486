//! Steady-state frame codec
//!
//! Once the handshake has established the cipher pair, every inbound byte
//! stream is cut into frames by [`GameDecoder`]: one ciphered opcode byte, an
//! optional 1-byte length (for variable-size opcodes), then the payload. The
//! decoder is cumulative - it tolerates delivery of a frame across any number
//! of reads and resumes from its stored state without consuming input it
//! cannot yet use.
//!
//! [`encode`] is the mirror image for outgoing frames and is the single place
//! opcode encryption happens on the way out.

use bytes::{BufMut, Bytes, BytesMut};

use crate::crypto::Isaac;
use crate::net::buffer::{Framing, Packet};
use crate::protocol::packets::{incoming_size, PacketSize};

/// Cumulative decoder for post-authentication frames.
///
/// Owns the inbound cipher stream; constructing more than one decoder per
/// connection would desynchronize the keystream.
pub struct GameDecoder {
    cipher: Isaac,
    /// Deciphered opcode of the frame in progress
    pending_opcode: Option<u8>,
    /// Resolved payload size of the frame in progress
    pending_size: Option<usize>,
}

impl GameDecoder {
    /// Create a decoder over the inbound cipher stream
    pub fn new(cipher: Isaac) -> Self {
        Self {
            cipher,
            pending_opcode: None,
            pending_size: None,
        }
    }

    /// Attempt to decode one frame from the buffered bytes.
    ///
    /// Returns `None` when more data is needed; nothing unusable is consumed,
    /// and the next call resumes from the stored opcode/size state.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Packet> {
        // Phase 1: the ciphered opcode byte
        if self.pending_opcode.is_none() {
            if buf.is_empty() {
                return None;
            }
            let wire = buf.split_to(1)[0];
            let opcode = wire.wrapping_sub(self.cipher.next_byte());
            self.pending_opcode = Some(opcode);
            self.pending_size = match incoming_size(opcode) {
                PacketSize::Fixed(n) => Some(n),
                PacketSize::Variable => None,
            };
        }

        // Phase 2: the length byte, for variable-size opcodes only
        if self.pending_size.is_none() {
            if buf.is_empty() {
                return None;
            }
            self.pending_size = Some(buf.split_to(1)[0] as usize);
        }

        // Phase 3: the payload
        let size = self.pending_size.expect("size resolved above");
        if buf.len() < size {
            return None;
        }

        let opcode = self.pending_opcode.take().expect("opcode resolved above");
        self.pending_size = None;

        let payload = buf.split_to(size).freeze();
        let framing = match incoming_size(opcode) {
            PacketSize::Fixed(_) => Framing::Fixed,
            PacketSize::Variable => Framing::VarByte,
        };
        Some(Packet::new(opcode, framing, payload))
    }

    /// Whether a partially-decoded frame is pending
    pub fn mid_frame(&self) -> bool {
        self.pending_opcode.is_some()
    }
}

/// Encode a packet for the wire.
///
/// Raw packets pass their payload through untouched. Framed packets get the
/// ciphered opcode byte followed by the framing's length prefix; a missing
/// cipher writes the opcode in the clear, which only ever happens in tests.
pub fn encode(packet: &Packet, cipher: Option<&mut Isaac>) -> Bytes {
    if packet.is_raw() {
        return packet.payload().clone();
    }

    let payload = packet.payload();
    let mut out = BytesMut::with_capacity(payload.len() + 3);

    let opcode = packet.opcode() as u8;
    let wire_opcode = match cipher {
        Some(cipher) => opcode.wrapping_add(cipher.next_byte()),
        None => opcode,
    };
    out.put_u8(wire_opcode);

    match packet.framing() {
        Framing::Fixed => {}
        Framing::VarByte => {
            debug_assert!(payload.len() <= u8::MAX as usize, "payload too long");
            out.put_u8(payload.len() as u8);
        }
        Framing::VarShort => {
            debug_assert!(payload.len() <= u16::MAX as usize, "payload too long");
            out.put_u16(payload.len() as u16);
        }
    }

    out.extend_from_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IsaacPair;
    use crate::net::buffer::PacketBuilder;

    const SEEDS: [u32; 4] = [11, 22, 33, 44];

    /// Client-side encode of a frame, as the real client would produce it
    fn client_frame(client: &mut IsaacPair, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![client.encode_opcode(opcode)];
        if incoming_size(opcode).is_variable() {
            bytes.push(payload.len() as u8);
        }
        bytes.extend_from_slice(payload);
        bytes
    }

    fn server_decoder() -> GameDecoder {
        GameDecoder::new(IsaacPair::new(&SEEDS).split().0)
    }

    fn client_pair() -> IsaacPair {
        IsaacPair::for_client(&SEEDS)
    }

    #[test]
    fn test_zero_size_frame_decodes_immediately() {
        let mut client = client_pair();
        let mut decoder = server_decoder();

        let mut buf = BytesMut::from(&client_frame(&mut client, 0, &[])[..]);
        let packet = decoder.decode(&mut buf).expect("frame should decode");
        assert_eq!(packet.opcode(), 0);
        assert!(packet.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fixed_size_frame() {
        let mut client = client_pair();
        let mut decoder = server_decoder();

        // Opcode 185 (button) carries a fixed 2-byte payload
        let mut buf = BytesMut::from(&client_frame(&mut client, 185, &[0x12, 0x34])[..]);
        let packet = decoder.decode(&mut buf).unwrap();
        assert_eq!(packet.opcode(), 185);
        assert_eq!(packet.payload()[..], [0x12, 0x34]);
    }

    #[test]
    fn test_variable_size_frame() {
        let mut client = client_pair();
        let mut decoder = server_decoder();

        // Opcode 103 (command) is variable-length
        let mut buf = BytesMut::from(&client_frame(&mut client, 103, b"ping")[..]);
        let packet = decoder.decode(&mut buf).unwrap();
        assert_eq!(packet.opcode(), 103);
        assert_eq!(packet.payload()[..], b"ping"[..]);
        assert_eq!(packet.framing(), Framing::VarByte);
    }

    #[test]
    fn test_resumes_across_arbitrary_chunking() {
        let mut reference_client = client_pair();
        let frame = client_frame(&mut reference_client, 103, b"hello world");

        // Whole frame at once establishes the expected packet
        let mut decoder = server_decoder();
        let mut buf = BytesMut::from(&frame[..]);
        let expected = decoder.decode(&mut buf).unwrap();

        // Every split into byte-sized chunks must yield the identical packet
        let mut client = client_pair();
        let frame = client_frame(&mut client, 103, b"hello world");
        let mut decoder = server_decoder();
        let mut buf = BytesMut::new();
        let mut decoded = None;

        for &b in &frame {
            buf.put_u8(b);
            if let Some(packet) = decoder.decode(&mut buf) {
                assert!(decoded.is_none(), "more than one packet decoded");
                decoded = Some(packet);
            }
        }

        assert_eq!(decoded.expect("no packet decoded"), expected);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut client = client_pair();
        let mut decoder = server_decoder();

        let mut bytes = client_frame(&mut client, 0, &[]);
        bytes.extend(client_frame(&mut client, 185, &[0, 7]));
        bytes.extend(client_frame(&mut client, 103, b"home"));

        let mut buf = BytesMut::from(&bytes[..]);
        let first = decoder.decode(&mut buf).unwrap();
        let second = decoder.decode(&mut buf).unwrap();
        let third = decoder.decode(&mut buf).unwrap();
        assert_eq!(first.opcode(), 0);
        assert_eq!(second.opcode(), 185);
        assert_eq!(third.opcode(), 103);
        assert!(decoder.decode(&mut buf).is_none());
    }

    #[test]
    fn test_mid_frame_state() {
        let mut client = client_pair();
        let mut decoder = server_decoder();

        let frame = client_frame(&mut client, 185, &[1, 2]);
        let mut buf = BytesMut::from(&frame[..1]);

        assert!(decoder.decode(&mut buf).is_none());
        assert!(decoder.mid_frame());

        buf.extend_from_slice(&frame[1..]);
        assert!(decoder.decode(&mut buf).is_some());
        assert!(!decoder.mid_frame());
    }

    #[test]
    fn test_encode_raw_passthrough() {
        let packet = Packet::raw(Bytes::from_static(&[9, 8, 7]));
        let bytes = encode(&packet, None);
        assert_eq!(bytes[..], [9, 8, 7]);
    }

    #[test]
    fn test_encode_framing_prefixes() {
        let mut builder = PacketBuilder::var_byte(253);
        builder.put_bytes(b"abc");
        let bytes = encode(&builder.build(), None);
        assert_eq!(bytes[..], [253, 3, b'a', b'b', b'c']);

        let mut builder = PacketBuilder::var_short(81);
        builder.put_bytes(&[1, 2, 3, 4]);
        let bytes = encode(&builder.build(), None);
        assert_eq!(bytes[..], [81, 0, 4, 1, 2, 3, 4]);

        let mut builder = PacketBuilder::fixed(109);
        let bytes = encode(&builder.build(), None);
        assert_eq!(bytes[..], [109]);
    }

    #[test]
    fn test_encode_ciphers_opcode_only() {
        let mut server = IsaacPair::new(&SEEDS);
        let mut expected_stream = IsaacPair::new(&SEEDS);

        let mut builder = PacketBuilder::var_byte(253);
        builder.put_bytes(b"hi");
        let bytes = encode(&builder.build(), Some(&mut server.encode));

        let expected_opcode = 253u8.wrapping_add(expected_stream.encode.next_byte());
        assert_eq!(bytes[0], expected_opcode);
        // Length prefix and payload remain in the clear
        assert_eq!(bytes[1..], [2, b'h', b'i']);
    }
}
