//! Connection transport
//!
//! The TCP listener and the per-connection writer loop. Each accepted
//! connection gets two tokio tasks: a reader (the session bridge in
//! [`crate::net::handler`]) and the writer loop below, fed through the
//! session's outbound channel. The writer is deliberately dumb - encoding
//! already happened in [`crate::net::session::Session::write`] - so a slow
//! or dead peer can never block anything but its own channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::net::handler;
use crate::net::session::Outbound;
use crate::state::ServerContext;

/// Accept game connections until shutdown is signalled.
///
/// Each connection is served on its own spawned task; accept failures are
/// logged and the loop keeps going.
pub async fn run_listener(
    ctx: Arc<ServerContext>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<()> {
    let address = SocketAddr::from(([0, 0, 0, 0], ctx.config.game_port));
    let listener = TcpListener::bind(address).await?;
    info!(%address, "Game listener bound");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(address = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        debug!(address = %peer, "Connection accepted");
                        tokio::spawn(handler::serve_connection(ctx.clone(), stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Game listener shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Drain a session's outbound channel onto the wire.
///
/// Exits on [`Outbound::Close`], on a write failure, or when the sending
/// side is dropped; all three end with a best-effort socket shutdown.
pub(crate) async fn write_loop<W>(mut writer: W, mut rx: UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        match message {
            Outbound::Data(bytes) => {
                if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
}
