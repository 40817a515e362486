//! Session bridge
//!
//! The per-connection reader task: it owns the connection's decode state
//! outright (first the handshake state machine, then the steady-state
//! cumulative decoder) and turns low-level connection events into tasks on
//! the engine. Single ownership is what makes decode attempts safe without
//! any locking - no other task can ever touch this state.
//!
//! Lifecycle: opened -> handshake bytes -> cipher pair installed, codec
//! swapped -> decoded game packets as handler tasks -> closed (peer drop,
//! idle timeout, or protocol violation) -> cleanup task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::crypto::IsaacPair;
use crate::error::{NetworkError, Result, RunevaleError};
use crate::net::codec::GameDecoder;
use crate::net::session::{Session, SessionStage};
use crate::net::transport;
use crate::protocol::game;
use crate::protocol::handshake::{HandshakeCodec, HandshakeStep};
use crate::state::ServerContext;

/// The connection's decode state, exclusively owned by its reader task
enum DecodeState {
    /// Pre-authentication: the cleartext login state machine
    Handshake(HandshakeCodec),
    /// Post-authentication: the ciphered cumulative frame decoder
    Game(GameDecoder),
}

/// Serve one connection to completion.
///
/// Splits the stream, registers a session, runs the writer loop and the
/// read loop, and pushes the cleanup task when either side goes away.
/// Generic over the stream so tests can drive it with an in-memory pipe.
pub async fn serve_connection<S>(ctx: Arc<ServerContext>, stream: S, address: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = ctx.sessions.create(address, outbound_tx);

    let writer = tokio::spawn(transport::write_loop(write_half, outbound_rx));
    ctx.engine.push(game::connect_task(session.clone()));

    if let Err(e) = read_loop(&ctx, &session, read_half).await {
        match &e {
            RunevaleError::Protocol(violation) => {
                warn!(
                    session_id = session.id,
                    address = %session.address,
                    error = %violation,
                    "Protocol violation; closing connection"
                );
            }
            RunevaleError::Network(NetworkError::Timeout) => {
                debug!(session_id = session.id, "Connection idled out");
            }
            other => {
                debug!(session_id = session.id, error = %other, "Connection error");
            }
        }
    }

    session.close();
    ctx.engine.push(game::disconnect_task(session.clone()));
    let _ = writer.await;
}

/// Accumulate bytes and drive the decode state until the peer goes away.
///
/// Every read is bounded by the configured idle timeout, so a client that
/// stalls mid-frame (or never sends its declared payload) is dropped rather
/// than held forever.
async fn read_loop<R>(ctx: &Arc<ServerContext>, session: &Arc<Session>, mut reader: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let idle = Duration::from_secs(ctx.config.idle_timeout_secs.max(1));
    let mut state = DecodeState::Handshake(HandshakeCodec::new());
    let mut buf = BytesMut::with_capacity(512);

    loop {
        // Drain everything the buffer already holds
        let completed = match &mut state {
            DecodeState::Handshake(codec) => {
                let mut completed = None;
                loop {
                    match codec.decode(&mut buf)? {
                        HandshakeStep::Incomplete => break,
                        HandshakeStep::KeyExchange(reply) => session.write_raw(reply),
                        HandshakeStep::Complete(request) => {
                            completed = Some(request);
                            break;
                        }
                    }
                }
                completed
            }
            DecodeState::Game(decoder) => {
                while let Some(packet) = decoder.decode(&mut buf) {
                    ctx.engine.push(game::packet_task(session.clone(), packet));
                }
                None
            }
        };

        // Handshake done: install the cipher pair and swap the codec. Any
        // bytes already buffered behind the credential block are game frames
        // and are drained on the next pass.
        if let Some(request) = completed {
            debug!(
                session_id = session.id,
                username = %request.username,
                "Handshake complete; swapping to game codec"
            );
            let (decode, encode) =
                IsaacPair::from_keys(request.client_key, request.server_key).split();
            session.install_cipher(encode);
            session.set_stage(SessionStage::LoggingIn);
            ctx.engine.push(game::login_task(session.clone(), request));
            state = DecodeState::Game(GameDecoder::new(decode));
            continue;
        }

        if !session.is_active() {
            return Ok(());
        }

        let read = timeout(idle, reader.read_buf(&mut buf))
            .await
            .map_err(|_| RunevaleError::Network(NetworkError::Timeout))??;
        if read == 0 {
            // Peer closed the connection; routine, not an error
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::net::buffer::PacketBuilder;
    use crate::protocol::handshake::{LOGIN_BLOCK_MARKER, LOGIN_MAGIC, LOGIN_MARKER};
    use crate::protocol::login::LoginKind;

    use tokio::io::AsyncWriteExt;

    const CLIENT_KEY: u64 = 0x0102_0304_0506_0708;

    fn context() -> Arc<ServerContext> {
        ServerContext::new(ServerConfig::default()).unwrap()
    }

    fn test_address() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Client-side credential block for the given version and echoed key
    fn credential_block(version: u16, server_key: u64) -> Vec<u8> {
        let mut tail = PacketBuilder::raw();
        tail.put_u8(LOGIN_BLOCK_MARKER);
        tail.put_u64(CLIENT_KEY);
        tail.put_u64(server_key);
        tail.put_u32(1);
        tail.put_string("tester");
        tail.put_string("password");
        let tail = tail.build();

        let mut block = PacketBuilder::raw();
        block.put_u8(LOGIN_MAGIC);
        block.put_u16(version);
        block.put_u8(0);
        for _ in 0..9 {
            block.put_u32(0);
        }
        block.put_u8(tail.len() as u8);
        block.put_bytes(tail.payload());
        block.build().payload().to_vec()
    }

    /// Read from the client side until EOF, returning everything received
    async fn read_to_eof(client: &mut tokio::io::DuplexStream) -> Vec<u8> {
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match tokio::io::AsyncReadExt::read(client, &mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
            }
        }
        received
    }

    #[tokio::test]
    async fn test_stale_revision_gets_only_key_exchange() {
        let ctx = context();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = tokio::spawn(serve_connection(ctx.clone(), server, test_address()));

        client.write_all(&[LOGIN_MARKER, 0]).await.unwrap();

        // The key exchange comes back before the client commits its block
        let mut reply = [0u8; 17];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut reply)
            .await
            .unwrap();
        let server_key = u64::from_be_bytes(reply[9..17].try_into().unwrap());

        let block = credential_block(316, server_key);
        client
            .write_all(&[LoginKind::Fresh.as_u8(), block.len() as u8])
            .await
            .unwrap();
        client.write_all(&block).await.unwrap();

        // Nothing further is written; the connection just closes
        assert!(read_to_eof(&mut client).await.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_opening_opcode_closes_immediately() {
        let ctx = context();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = tokio::spawn(serve_connection(ctx.clone(), server, test_address()));

        client.write_all(&[99]).await.unwrap();

        assert!(read_to_eof(&mut client).await.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_times_out() {
        let ctx = context();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = tokio::spawn(serve_connection(ctx.clone(), server, test_address()));

        // The client never sends a byte; paused time auto-advances past the
        // idle limit and the server must close rather than hang
        assert!(read_to_eof(&mut client).await.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfinished_credential_block_times_out() {
        let ctx = context();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = tokio::spawn(serve_connection(ctx.clone(), server, test_address()));

        client.write_all(&[LOGIN_MARKER, 0]).await.unwrap();
        let mut reply = [0u8; 17];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut reply)
            .await
            .unwrap();

        // Declare a 60-byte block but only ever deliver 3 bytes of it
        client
            .write_all(&[LoginKind::Fresh.as_u8(), 60, LOGIN_MAGIC, 1, 61])
            .await
            .unwrap();

        assert!(read_to_eof(&mut client).await.is_empty());
        handle.await.unwrap();
    }
}
