//! Cryptographic utilities
//!
//! The protocol obscures the opcode byte of every post-authentication frame
//! with an ISAAC keystream; this module holds that cipher and the paired
//! encode/decode construction derived from the login handshake keys.

pub mod isaac;

pub use isaac::{Isaac, IsaacPair};
