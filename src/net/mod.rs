//! Networking module
//!
//! Everything between the TCP socket and the task engine:
//! - `transport` - the listener and the per-connection writer loop
//! - `handler` - the session bridge: the reader task that owns a
//!   connection's decode state and turns bytes into engine tasks
//! - `codec` - the steady-state cumulative frame decoder/encoder
//! - `buffer` - packet values and the byte/bit serialization primitives
//! - `session` - typed per-connection state and the live-session registry

pub mod buffer;
pub mod codec;
pub mod handler;
pub mod session;
pub mod transport;
