//! End-to-end login and synchronization tests
//!
//! Drives a real server context (engine, world, auth) through the session
//! bridge over an in-memory pipe, acting as a protocol-faithful client:
//! cleartext handshake, ISAAC-ciphered frames, bit-packed update packets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use runevale_server::config::ServerConfig;
use runevale_server::crypto::{Isaac, IsaacPair};
use runevale_server::game::sync::tick_task;
use runevale_server::net::buffer::{PacketBuilder, PacketReader};
use runevale_server::net::handler::serve_connection;
use runevale_server::protocol::handshake::{LOGIN_BLOCK_MARKER, LOGIN_MAGIC, LOGIN_MARKER};
use runevale_server::protocol::login::LoginKind;
use runevale_server::protocol::packets::{
    OP_BUTTON, OP_COMMAND, OP_KEEPALIVE, OP_LOGOUT, OP_MAP_REGION, OP_NPC_UPDATE,
    OP_PLAYER_UPDATE, OP_SYSTEM_MESSAGE,
};
use runevale_server::state::ServerContext;
use runevale_server::REVISION;

const CLIENT_KEY: u64 = 0xA1B2_C3D4_E5F6_0718;

/// Build a started server context saving under a test-private directory
fn test_context(tag: &str) -> Arc<ServerContext> {
    let config = ServerConfig {
        dev_mode: true,
        data_path: std::env::temp_dir().join(format!(
            "runevale-e2e-{}-{}",
            std::process::id(),
            tag
        )),
        autosave_interval_secs: 0,
        ..ServerConfig::default()
    };
    let ctx = ServerContext::new(config).unwrap();
    ctx.start_engine();
    ctx
}

/// Poll a condition until it holds or two seconds pass
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Client-side credential block (step 4 of the handshake)
fn credential_block(version: u16, server_key: u64, username: &str, password: &str) -> Vec<u8> {
    let mut tail = PacketBuilder::raw();
    tail.put_u8(LOGIN_BLOCK_MARKER);
    tail.put_u64(CLIENT_KEY);
    tail.put_u64(server_key);
    tail.put_u32(42);
    tail.put_string(username);
    tail.put_string(password);
    let tail = tail.build();

    let mut block = PacketBuilder::raw();
    block.put_u8(LOGIN_MAGIC);
    block.put_u16(version);
    block.put_u8(0); // low memory off
    for _ in 0..9 {
        block.put_u32(0);
    }
    block.put_u8(tail.len() as u8);
    block.put_bytes(tail.payload());
    block.build().payload().to_vec()
}

/// A protocol-faithful client over one half of an in-memory pipe
struct TestClient {
    stream: DuplexStream,
    ciphers: Option<IsaacPair>,
}

impl TestClient {
    /// Connect a new client to the server context
    fn connect(ctx: &Arc<ServerContext>, port: u16) -> Self {
        let (client, server) = tokio::io::duplex(1 << 16);
        let address: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        tokio::spawn(serve_connection(ctx.clone(), server, address));
        Self {
            stream: client,
            ciphers: None,
        }
    }

    async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; n];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut bytes))
            .await
            .expect("read timed out")
            .expect("read failed");
        bytes
    }

    /// Run the full handshake. On success installs the cipher pair and
    /// returns the 3-byte response; on rejection returns the 1-byte code.
    async fn login(&mut self, username: &str, password: &str, version: u16) -> Vec<u8> {
        self.stream.write_all(&[LOGIN_MARKER, 0]).await.unwrap();

        let reply = self.read_exact(17).await;
        assert_eq!(&reply[..8], &[0u8; 8]);
        assert_eq!(reply[8], 0);
        let server_key = u64::from_be_bytes(reply[9..17].try_into().unwrap());

        let block = credential_block(version, server_key, username, password);
        self.stream
            .write_all(&[LoginKind::Fresh.as_u8(), block.len() as u8])
            .await
            .unwrap();
        self.stream.write_all(&block).await.unwrap();

        let head = self.read_exact(1).await;
        if head[0] != 2 {
            return head;
        }
        let rest = self.read_exact(2).await;

        let seeds = Isaac::session_seed(CLIENT_KEY, server_key);
        self.ciphers = Some(IsaacPair::for_client(&seeds));
        vec![head[0], rest[0], rest[1]]
    }

    /// Read one server frame, deciphering the opcode and consuming the
    /// framing the client knows for that opcode
    async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let wire = self.read_exact(1).await[0];
        let opcode = self
            .ciphers
            .as_mut()
            .expect("not logged in")
            .decode_opcode(wire);

        let size = match opcode {
            OP_MAP_REGION => 4,
            OP_LOGOUT => 0,
            OP_SYSTEM_MESSAGE => usize::from(self.read_exact(1).await[0]),
            OP_PLAYER_UPDATE | OP_NPC_UPDATE => {
                let len = self.read_exact(2).await;
                usize::from(u16::from_be_bytes([len[0], len[1]]))
            }
            other => panic!("unexpected server opcode {}", other),
        };
        (opcode, self.read_exact(size).await)
    }

    /// Read frames until one with the wanted opcode arrives
    async fn read_frame_of(&mut self, wanted: u8) -> Vec<u8> {
        for _ in 0..16 {
            let (opcode, payload) = self.read_frame().await;
            if opcode == wanted {
                return payload;
            }
        }
        panic!("never received opcode {}", wanted);
    }

    /// Send one ciphered client frame
    async fn send_frame(&mut self, opcode: u8, payload: &[u8], variable: bool) {
        let ciphers = self.ciphers.as_mut().expect("not logged in");
        let mut frame = vec![ciphers.encode_opcode(opcode)];
        if variable {
            frame.push(payload.len() as u8);
        }
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn send_command(&mut self, line: &str) {
        let mut payload = PacketBuilder::raw();
        payload.put_string(line);
        let payload = payload.build();
        self.send_frame(OP_COMMAND, payload.payload(), true).await;
    }
}

#[tokio::test]
async fn test_full_login_flow() {
    let ctx = test_context("login");
    let mut client = TestClient::connect(&ctx, 50001);

    // Handshake succeeds; dev mode grants administrator rights
    let response = client.login("tester", "password", REVISION as u16).await;
    assert_eq!(response, vec![2, 2, 0]);
    wait_until("player registration", || ctx.world.player_count() == 1).await;

    // The post-login burst: map region, then the welcome message
    let region = client.read_frame_of(OP_MAP_REGION).await;
    assert_eq!(region.len(), 4);
    let welcome = client.read_frame_of(OP_SYSTEM_MESSAGE).await;
    let mut reader = PacketReader::from_slice(&welcome);
    assert_eq!(reader.read_string(), "Welcome to Runevale.");

    // A zero-size frame decodes immediately; the command right behind it
    // proves the keepalive was consumed cleanly
    client.send_frame(OP_KEEPALIVE, &[], false).await;
    client.send_command("players").await;
    let reply = client.read_frame_of(OP_SYSTEM_MESSAGE).await;
    let mut reader = PacketReader::from_slice(&reply);
    assert_eq!(reader.read_string(), "There are 1 players online.");

    // Dropping the connection unregisters the player and saves the profile
    drop(client);
    wait_until("player cleanup", || ctx.world.player_count() == 0).await;
    let profile = ctx.config.save_path().join("tester.json");
    wait_until("profile save", || profile.exists()).await;

    ctx.engine.stop();
}

#[tokio::test]
async fn test_handshake_survives_byte_at_a_time_delivery() {
    let ctx = test_context("chunked");
    let mut client = TestClient::connect(&ctx, 50002);

    client.stream.write_all(&[LOGIN_MARKER]).await.unwrap();
    tokio::task::yield_now().await;
    client.stream.write_all(&[0]).await.unwrap();

    let reply = client.read_exact(17).await;
    let server_key = u64::from_be_bytes(reply[9..17].try_into().unwrap());

    let block = credential_block(REVISION as u16, server_key, "drip", "password");
    let mut bytes = vec![LoginKind::Fresh.as_u8(), block.len() as u8];
    bytes.extend_from_slice(&block);

    // One byte per write, yielding so the bridge sees every chunk alone
    for b in bytes {
        client.stream.write_all(&[b]).await.unwrap();
        tokio::task::yield_now().await;
    }

    assert_eq!(client.read_exact(3).await, vec![2, 2, 0]);
    wait_until("player registration", || ctx.world.player_count() == 1).await;

    ctx.engine.stop();
}

#[tokio::test]
async fn test_stale_revision_is_rejected_silently() {
    let ctx = test_context("stale");
    let mut client = TestClient::connect(&ctx, 50003);

    client.stream.write_all(&[LOGIN_MARKER, 0]).await.unwrap();
    let reply = client.read_exact(17).await;
    let server_key = u64::from_be_bytes(reply[9..17].try_into().unwrap());

    let block = credential_block(316, server_key, "old", "password");
    client
        .stream
        .write_all(&[LoginKind::Fresh.as_u8(), block.len() as u8])
        .await
        .unwrap();
    client.stream.write_all(&block).await.unwrap();

    // No reject code, no login: the connection just closes
    let mut rest = Vec::new();
    client.stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert_eq!(ctx.world.player_count(), 0);

    ctx.engine.stop();
}

#[tokio::test]
async fn test_two_clients_discover_each_other_on_tick() {
    let ctx = test_context("discover");
    let mut alice = TestClient::connect(&ctx, 50004);
    let mut bob = TestClient::connect(&ctx, 50005);

    alice.login("alice", "password", REVISION as u16).await;
    bob.login("bob", "password", REVISION as u16).await;
    wait_until("both registered", || ctx.world.player_count() == 2).await;

    ctx.engine.push(tick_task());

    // Both spawn at the same point, so each client's first update packet
    // must carry more than the 3-byte empty-view minimum (the other
    // player's addition plus appearance blocks)
    let alice_update = alice.read_frame_of(OP_PLAYER_UPDATE).await;
    assert!(alice_update.len() > 3, "alice saw nobody: {:?}", alice_update);
    let bob_update = bob.read_frame_of(OP_PLAYER_UPDATE).await;
    assert!(bob_update.len() > 3, "bob saw nobody: {:?}", bob_update);

    // The NPC list stays empty but the packet still closes properly
    let npcs = alice.read_frame_of(OP_NPC_UPDATE).await;
    assert!(npcs.len() >= 3);

    ctx.engine.stop();
}

#[tokio::test]
async fn test_logout_button_ends_session() {
    let ctx = test_context("logout");
    let mut client = TestClient::connect(&ctx, 50006);

    client.login("leaver", "password", REVISION as u16).await;
    wait_until("player registration", || ctx.world.player_count() == 1).await;
    client.read_frame_of(OP_SYSTEM_MESSAGE).await;

    // Button 2458 is the logout button
    client.send_frame(OP_BUTTON, &2458u16.to_be_bytes(), false).await;

    let (opcode, payload) = client.read_frame().await;
    assert_eq!(opcode, OP_LOGOUT);
    assert!(payload.is_empty());

    // The server closes its side; the client hangs up and cleanup follows
    let mut rest = Vec::new();
    client.stream.read_to_end(&mut rest).await.unwrap();
    drop(client);
    wait_until("player cleanup", || ctx.world.player_count() == 0).await;

    ctx.engine.stop();
}
