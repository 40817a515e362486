//! ISAAC (Indirection, Shift, Accumulate, Add, and Count) cipher implementation
//!
//! ISAAC is a keyed pseudorandom keystream generator. The game protocol uses
//! one independently-seeded instance per direction to obscure packet opcodes:
//! the client's encode stream must match the server's decode stream call for
//! call, so determinism from the seed alone is the load-bearing property here.
//!
//! Reference: http://www.burtleburtle.net/bob/rand/isaacafa.html

use std::fmt;

/// Size of the ISAAC state array (must be a power of 2)
const SIZE: usize = 256;

/// Mask for array indexing (SIZE - 1)
const MASK: usize = SIZE - 1;

/// Golden ratio constant used in initialization
const GOLDEN_RATIO: u32 = 0x9e37_79b9;

/// Offset applied per seed word to derive the encode cipher from the decode
/// cipher. Both ends of the connection apply the same offset, which keeps the
/// two directions in step without a second key exchange.
pub const ENCODE_SEED_OFFSET: u32 = 50;

/// ISAAC cipher state
///
/// Determinism depends only on the seed and the number of `next` calls made;
/// there are no external mutators.
#[derive(Clone)]
pub struct Isaac {
    /// Results buffer
    results: [u32; SIZE],
    /// Internal state
    memory: [u32; SIZE],
    /// Accumulator
    aa: u32,
    /// Previous result
    bb: u32,
    /// Counter
    cc: u32,
    /// Current position in results buffer
    count: usize,
}

impl Isaac {
    /// Create a new ISAAC cipher with the given seed
    pub fn new(seed: &[u32]) -> Self {
        let mut isaac = Self {
            results: [0u32; SIZE],
            memory: [0u32; SIZE],
            aa: 0,
            bb: 0,
            cc: 0,
            count: 0,
        };

        isaac.init(seed);
        isaac
    }

    /// Build the session seed words from the two 64-bit handshake keys.
    ///
    /// The client contributes one key, the server the other; each is split
    /// into its high and low 32-bit halves.
    pub fn session_seed(client_key: u64, server_key: u64) -> [u32; 4] {
        [
            (client_key >> 32) as u32,
            client_key as u32,
            (server_key >> 32) as u32,
            server_key as u32,
        ]
    }

    /// Initialize the cipher with the given seed
    fn init(&mut self, seed: &[u32]) {
        for (slot, &word) in self.results.iter_mut().zip(seed.iter()) {
            *slot = word;
        }

        let mut state = [GOLDEN_RATIO; 8];

        // Scramble the initial values
        for _ in 0..4 {
            mix(&mut state);
        }

        // Two diffusion passes: first over the seeded results, then over the
        // memory produced by the first pass.
        for pass in 0..2 {
            for i in (0..SIZE).step_by(8) {
                for j in 0..8 {
                    let source = if pass == 0 {
                        self.results[i + j]
                    } else {
                        self.memory[i + j]
                    };
                    state[j] = state[j].wrapping_add(source);
                }

                mix(&mut state);

                self.memory[i..i + 8].copy_from_slice(&state);
            }
        }

        // Generate initial results
        self.generate();
        self.count = SIZE;
    }

    /// Generate 256 new random values
    fn generate(&mut self) {
        self.cc = self.cc.wrapping_add(1);
        self.bb = self.bb.wrapping_add(self.cc);

        for i in 0..SIZE {
            let x = self.memory[i];

            self.aa = match i & 3 {
                0 => self.aa ^ (self.aa << 13),
                1 => self.aa ^ (self.aa >> 6),
                2 => self.aa ^ (self.aa << 2),
                3 => self.aa ^ (self.aa >> 16),
                _ => unreachable!(),
            };

            self.aa = self.memory[(i + 128) & MASK].wrapping_add(self.aa);

            let y = self.memory[((x >> 2) as usize) & MASK]
                .wrapping_add(self.aa)
                .wrapping_add(self.bb);

            self.memory[i] = y;
            self.bb = self.memory[((y >> 10) as usize) & MASK].wrapping_add(x);
            self.results[i] = self.bb;
        }
    }

    /// Get the next value from the keystream
    #[inline]
    pub fn next(&mut self) -> u32 {
        if self.count == 0 {
            self.generate();
            self.count = SIZE;
        }
        self.count -= 1;
        self.results[self.count]
    }

    /// Get the next keystream value truncated to the low 8 bits.
    /// This is the quantity added to (or subtracted from) an opcode byte.
    #[inline]
    pub fn next_byte(&mut self) -> u8 {
        (self.next() & 0xFF) as u8
    }
}

impl fmt::Debug for Isaac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isaac")
            .field("count", &self.count)
            .field("aa", &self.aa)
            .field("bb", &self.bb)
            .field("cc", &self.cc)
            .finish()
    }
}

/// Mix function for ISAAC initialization
#[inline]
fn mix(s: &mut [u32; 8]) {
    s[0] ^= s[1] << 11;
    s[3] = s[3].wrapping_add(s[0]);
    s[1] = s[1].wrapping_add(s[2]);

    s[1] ^= s[2] >> 2;
    s[4] = s[4].wrapping_add(s[1]);
    s[2] = s[2].wrapping_add(s[3]);

    s[2] ^= s[3] << 8;
    s[5] = s[5].wrapping_add(s[2]);
    s[3] = s[3].wrapping_add(s[4]);

    s[3] ^= s[4] >> 16;
    s[6] = s[6].wrapping_add(s[3]);
    s[4] = s[4].wrapping_add(s[5]);

    s[4] ^= s[5] << 10;
    s[7] = s[7].wrapping_add(s[4]);
    s[5] = s[5].wrapping_add(s[6]);

    s[5] ^= s[6] >> 4;
    s[0] = s[0].wrapping_add(s[5]);
    s[6] = s[6].wrapping_add(s[7]);

    s[6] ^= s[7] << 8;
    s[1] = s[1].wrapping_add(s[6]);
    s[7] = s[7].wrapping_add(s[0]);

    s[7] ^= s[0] >> 9;
    s[2] = s[2].wrapping_add(s[7]);
    s[0] = s[0].wrapping_add(s[1]);
}

/// Paired ISAAC ciphers for one session.
///
/// The decode cipher is seeded with the raw session words and tracks the
/// client's encode stream; the encode cipher uses the same words offset by
/// [`ENCODE_SEED_OFFSET`] and is what the client decodes against.
pub struct IsaacPair {
    /// Cipher for encoding outgoing opcodes
    pub encode: Isaac,
    /// Cipher for decoding incoming opcodes
    pub decode: Isaac,
}

impl IsaacPair {
    /// Create a server-side pair from the four session seed words
    pub fn new(seeds: &[u32; 4]) -> Self {
        let decode = Isaac::new(seeds);

        let mut encode_seeds = *seeds;
        for word in &mut encode_seeds {
            *word = word.wrapping_add(ENCODE_SEED_OFFSET);
        }
        let encode = Isaac::new(&encode_seeds);

        Self { encode, decode }
    }

    /// Create a server-side pair from the two 64-bit handshake keys
    pub fn from_keys(client_key: u64, server_key: u64) -> Self {
        Self::new(&Isaac::session_seed(client_key, server_key))
    }

    /// Create the client side of the pair (mirrored directions)
    pub fn for_client(seeds: &[u32; 4]) -> Self {
        let encode = Isaac::new(seeds);

        let mut decode_seeds = *seeds;
        for word in &mut decode_seeds {
            *word = word.wrapping_add(ENCODE_SEED_OFFSET);
        }
        let decode = Isaac::new(&decode_seeds);

        Self { encode, decode }
    }

    /// Split the pair into its directions (decode, encode). The frame decoder
    /// owns the inbound stream; the session owns the outbound one.
    pub fn split(self) -> (Isaac, Isaac) {
        (self.decode, self.encode)
    }

    /// Encode a packet opcode
    #[inline]
    pub fn encode_opcode(&mut self, opcode: u8) -> u8 {
        opcode.wrapping_add(self.encode.next_byte())
    }

    /// Decode a packet opcode
    #[inline]
    pub fn decode_opcode(&mut self, encoded: u8) -> u8 {
        encoded.wrapping_sub(self.decode.next_byte())
    }
}

impl fmt::Debug for IsaacPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsaacPair")
            .field("encode", &self.encode)
            .field("decode", &self.decode)
            .finish()
    }
}
