//! Session management module
//!
//! A session is the typed per-connection state: lifecycle stage, the
//! outbound cipher once the handshake has negotiated one, the associated
//! player handle once login completes, and the channel packets are written
//! through. The inbound decode state deliberately does NOT live here - it is
//! owned exclusively by the connection's reader task, which is what makes
//! decode attempts safe without a lock.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use crate::crypto::Isaac;
use crate::net::buffer::Packet;
use crate::net::codec;

/// Unique session identifier
pub type SessionId = u64;

/// Session lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStage {
    /// Connected; the handshake state machine is running
    Handshake,
    /// Credentials collected; waiting on the authentication collaborator
    LoggingIn,
    /// Fully authenticated and in-game
    InGame,
    /// Connection is closed or closing
    Closed,
}

impl SessionStage {
    /// Whether the session is still usable
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionStage::Closed)
    }
}

/// Messages consumed by a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    /// Encoded bytes to write
    Data(Bytes),
    /// Flush and close the connection
    Close,
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time of session creation
    pub created_at: Instant,
    /// Current lifecycle stage
    stage: RwLock<SessionStage>,
    /// Outbound opcode cipher (installed when the handshake completes)
    cipher: Mutex<Option<Isaac>>,
    /// Associated player handle (set when in-game)
    player_index: RwLock<Option<u16>>,
    /// Channel to the connection's writer task
    outbound_tx: UnboundedSender<Outbound>,
}

impl Session {
    /// Create a new session bound to a writer channel
    pub fn new(id: SessionId, address: SocketAddr, outbound_tx: UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            address,
            created_at: Instant::now(),
            stage: RwLock::new(SessionStage::Handshake),
            cipher: Mutex::new(None),
            player_index: RwLock::new(None),
            outbound_tx,
        }
    }

    /// Get the current lifecycle stage
    pub fn stage(&self) -> SessionStage {
        *self.stage.read()
    }

    /// Set the lifecycle stage
    pub fn set_stage(&self, new_stage: SessionStage) {
        let mut stage = self.stage.write();
        trace!(session_id = self.id, old = ?*stage, new = ?new_stage, "Session stage changed");
        *stage = new_stage;
    }

    /// Whether the session is still active
    pub fn is_active(&self) -> bool {
        self.stage().is_active()
    }

    /// Install the outbound opcode cipher negotiated by the handshake
    pub fn install_cipher(&self, cipher: Isaac) {
        *self.cipher.lock() = Some(cipher);
    }

    /// Set the player handle once login completes
    pub fn set_player_index(&self, index: u16) {
        *self.player_index.write() = Some(index);
    }

    /// The associated player handle, if in-game
    pub fn player_index(&self) -> Option<u16> {
        *self.player_index.read()
    }

    /// Encode a packet and hand it to the writer task.
    ///
    /// Best-effort: a packet written to a connection that has already gone
    /// away is silently dropped. Client disappearance is routine and must
    /// never surface as a task failure.
    pub fn write(&self, packet: &Packet) {
        let bytes = {
            let mut cipher = self.cipher.lock();
            codec::encode(packet, cipher.as_mut())
        };
        if self.outbound_tx.send(Outbound::Data(bytes)).is_err() {
            trace!(session_id = self.id, "Dropped packet for closed connection");
        }
    }

    /// Hand pre-encoded bytes to the writer task (handshake replies)
    pub fn write_raw(&self, bytes: Bytes) {
        if self.outbound_tx.send(Outbound::Data(bytes)).is_err() {
            trace!(session_id = self.id, "Dropped bytes for closed connection");
        }
    }

    /// Mark the session closed and ask the writer task to tear down
    pub fn close(&self) {
        self.set_stage(SessionStage::Closed);
        let _ = self.outbound_tx.send(Outbound::Close);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("stage", &self.stage())
            .field("player_index", &self.player_index())
            .finish()
    }
}

/// Thread-safe registry of live sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create and track a new session
    pub fn create(
        &self,
        address: SocketAddr,
        outbound_tx: UnboundedSender<Outbound>,
    ) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, address, outbound_tx));
        self.sessions.insert(id, session.clone());
        debug!(session_id = id, address = %address, "Session created");
        session
    }

    /// Look up a session by id
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// Remove a session from the registry
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, s)| s);
        if removed.is_some() {
            debug!(session_id = id, "Session removed");
        }
        removed
    }

    /// Number of tracked sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Visit every tracked session
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        for entry in self.sessions.iter() {
            f(&entry);
        }
    }

    /// Close every session (used at shutdown)
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.close();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::buffer::PacketBuilder;
    use tokio::sync::mpsc;

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    fn test_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Session::new(1, test_address(), tx)), rx)
    }

    #[test]
    fn test_stage_lifecycle() {
        let (session, _rx) = test_session();
        assert_eq!(session.stage(), SessionStage::Handshake);
        assert!(session.is_active());

        session.set_stage(SessionStage::InGame);
        assert_eq!(session.stage(), SessionStage::InGame);

        session.close();
        assert_eq!(session.stage(), SessionStage::Closed);
        assert!(!session.is_active());
    }

    #[test]
    fn test_write_without_cipher_is_cleartext() {
        let (session, mut rx) = test_session();
        let mut builder = PacketBuilder::var_byte(253);
        builder.put_bytes(b"hi");
        session.write(&builder.build());

        match rx.try_recv().unwrap() {
            Outbound::Data(bytes) => assert_eq!(bytes[..], [253, 2, b'h', b'i']),
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[test]
    fn test_write_with_cipher_obscures_opcode() {
        let (session, mut rx) = test_session();
        let seeds = [1u32, 2, 3, 4];
        let pair = crate::crypto::IsaacPair::new(&seeds);
        let (_, encode) = pair.split();
        session.install_cipher(encode);

        let mut expected = crate::crypto::IsaacPair::new(&seeds);
        session.write(&PacketBuilder::fixed(109).build());

        match rx.try_recv().unwrap() {
            Outbound::Data(bytes) => {
                assert_eq!(bytes[0], 109u8.wrapping_add(expected.encode.next_byte()));
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[test]
    fn test_write_after_receiver_dropped_is_silent() {
        let (session, rx) = test_session();
        drop(rx);
        // Must not panic
        session.write(&PacketBuilder::fixed(109).build());
    }

    #[test]
    fn test_close_sends_teardown() {
        let (session, mut rx) = test_session();
        session.close();
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close));
    }

    #[test]
    fn test_registry_create_get_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.create(test_address(), tx);
        let id = session.id;

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get(id).unwrap().id, id);

        registry.remove(id);
        assert!(registry.get(id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_registry_ids_are_unique() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.create(test_address(), tx.clone());
        let b = registry.create(test_address(), tx);
        assert_ne!(a.id, b.id);
    }
}
