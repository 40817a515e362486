//! In-game packet handling and the login task flow
//!
//! Everything here runs as engine tasks: the session bridge turns decoded
//! packets and connection events into the task constructors below, and the
//! dispatcher runs them one at a time. Login credential checks are the one
//! blocking step, so they detour through the background lane and come back
//! as a completion task.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::auth::LoginOutcome;
use crate::engine::Task;
use crate::error::Result;
use crate::game::player::Player;
use crate::net::buffer::Packet;
use crate::net::session::{Session, SessionStage};
use crate::protocol::login::{reject_packet, success_packet, LoginRequest, LoginResponse};
use crate::protocol::packets::{self, *};
use crate::state::ServerContext;

/// Interface button that requests a logout
const LOGOUT_BUTTON: u16 = 2458;

// ============ Task Constructors (used by the session bridge) ============

/// Task run when a connection is accepted
pub fn connect_task(session: Arc<Session>) -> Task {
    Task::unit("session-opened", move |ctx| {
        debug!(
            session_id = session.id,
            address = %session.address,
            online = ctx.sessions.count(),
            "Connection opened"
        );
        Ok(())
    })
}

/// Task run for each decoded in-game packet
pub fn packet_task(session: Arc<Session>, packet: Packet) -> Task {
    Task::unit("game-packet", move |ctx| handle_packet(ctx, &session, packet))
}

/// Task run when a handshake completes: detour the blocking credential
/// check through the background lane, then finish on the logic lane.
pub fn login_task(session: Arc<Session>, request: LoginRequest) -> Task {
    Task::unit("login-check", move |ctx| {
        ctx.engine.submit_background(move |ctx| {
            let outcome = ctx.auth.check_login(&request.username, &request.password);
            ctx.engine
                .push(login_completion_task(session, request, outcome));
        });
        Ok(())
    })
}

/// Task run when a connection goes away
pub fn disconnect_task(session: Arc<Session>) -> Task {
    Task::unit("session-closed", move |ctx| {
        if let Some(handle) = session.player_index() {
            if let Some(player) = ctx.world.unregister_player(handle) {
                info!(username = %player.username, "Player logged out");
                ctx.engine.submit_background(move |ctx| {
                    ctx.auth.save_player(&player);
                });
            }
        }
        ctx.sessions.remove(session.id);
        Ok(())
    })
}

/// Completion task: apply the login outcome to the world
fn login_completion_task(
    session: Arc<Session>,
    request: LoginRequest,
    outcome: LoginOutcome,
) -> Task {
    Task::unit("login-complete", move |ctx| {
        if !session.is_active() {
            debug!(session_id = session.id, "Login abandoned: connection gone");
            return Ok(());
        }

        let profile = match outcome {
            LoginOutcome::Accepted(profile) => profile,
            LoginOutcome::Rejected(code) => {
                info!(
                    session_id = session.id,
                    username = %request.username,
                    code = code.as_u8(),
                    "Login rejected"
                );
                session.write(&reject_packet(code));
                session.close();
                return Ok(());
            }
        };

        // One session per account
        if ctx.world.player_by_name(&profile.username).is_some() {
            session.write(&reject_packet(LoginResponse::AlreadyLoggedIn));
            session.close();
            return Ok(());
        }

        let player = Arc::new(Player::new(
            session.clone(),
            profile.username.clone(),
            request.uid,
            profile.rights,
            profile.location,
            profile.appearance,
        ));

        let Some(handle) = ctx.world.register_player(player.clone()) else {
            // A full registry is routine at the population cap
            session.write(&reject_packet(LoginResponse::WorldFull));
            session.close();
            return Ok(());
        };

        session.set_player_index(handle);
        session.set_stage(SessionStage::InGame);

        session.write(&success_packet(profile.rights.as_u8(), false));
        session.write(&packets::load_map_region(&player.location()));
        session.write(&packets::system_message(&format!(
            "Welcome to {}.",
            ctx.world.settings.name
        )));

        info!(
            username = %player.username,
            handle = handle,
            online = ctx.world.player_count(),
            "Player logged in"
        );
        Ok(())
    })
}

// ============ Packet Dispatch ============

/// Route one decoded packet to its handler
fn handle_packet(ctx: &ServerContext, session: &Arc<Session>, packet: Packet) -> Result<()> {
    let Some(player) = session
        .player_index()
        .and_then(|handle| ctx.world.get_player(handle))
    else {
        // Packets racing a disconnect or an unfinished login are dropped
        trace!(session_id = session.id, opcode = packet.opcode(), "Packet without player");
        return Ok(());
    };

    match packet.opcode() as u8 {
        OP_KEEPALIVE => {}
        OP_FOCUS_CHANGE => {}
        OP_IDLE => handle_idle(&player),
        OP_CHAT => handle_chat(&player, &packet),
        OP_WALK | OP_WALK_ENTITY => handle_walk(&player, &packet, false),
        OP_WALK_MINIMAP => handle_walk(&player, &packet, true),
        OP_COMMAND => handle_command(ctx, &player, &packet),
        OP_BUTTON => handle_button(&player, &packet),
        opcode => {
            trace!(opcode = opcode, size = packet.len(), "Unhandled packet");
        }
    }

    Ok(())
}

/// Public chat: unpack the client's packed text and flag it for the
/// synchronization pass
fn handle_chat(player: &Arc<Player>, packet: &Packet) {
    let mut reader = packet.reader();
    let effects = reader.read_byte_s();
    let color = reader.read_byte_s();

    let packed = reader.read_bytes(reader.remaining());
    let text: Vec<u8> = packed.iter().rev().map(|b| b.wrapping_sub(128)).collect();
    if text.is_empty() || text.len() > 100 {
        return;
    }

    player
        .update_mut()
        .set_chat(effects, color, player.rights().as_u8(), text);
}

/// Walk request: checkpoint tiles plus a run flag. Minimap walks carry 14
/// trailing navigation-assist bytes the server ignores.
fn handle_walk(player: &Arc<Player>, packet: &Packet, minimap: bool) {
    let extra = if minimap { 14 } else { 0 };
    if packet.len() < 5 + extra {
        warn!(size = packet.len(), "Runt walk packet");
        return;
    }
    let step_bytes = packet.len() - 5 - extra;
    if step_bytes % 2 != 0 {
        warn!(size = packet.len(), "Malformed walk packet");
        return;
    }
    let steps = step_bytes / 2;

    let mut reader = packet.reader();
    let first_x = reader.read_le_short_a();
    let offsets: Vec<(i8, i8)> = (0..steps)
        .map(|_| (reader.read_i8(), reader.read_i8()))
        .collect();
    let first_y = reader.read_le_u16();
    let run = reader.read_byte_c() == 1;

    let mut waypoints = vec![(first_x, first_y)];
    for (dx, dy) in offsets {
        waypoints.push((
            first_x.wrapping_add_signed(dx as i16),
            first_y.wrapping_add_signed(dy as i16),
        ));
    }

    player.queue_walk(&waypoints, run);
}

/// Interface button click
fn handle_button(player: &Arc<Player>, packet: &Packet) {
    let button = packet.reader().read_u16();
    match button {
        LOGOUT_BUTTON => handle_idle(player),
        152 => player.set_run_enabled(false),
        153 => player.set_run_enabled(true),
        _ => trace!(button = button, "Unhandled button"),
    }
}

/// Log the player out; the disconnect task does the cleanup once the
/// connection drops
fn handle_idle(player: &Arc<Player>) {
    player.session.write(&packets::logout());
    player.session.close();
}

/// Player command (::command)
fn handle_command(ctx: &ServerContext, player: &Arc<Player>, packet: &Packet) {
    let line = packet.reader().read_string();
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return;
    };

    debug!(username = %player.username, command = %line, "Command");

    match command {
        "pos" => {
            player
                .session
                .write(&packets::system_message(&format!("You are at {}.", player.location())));
        }
        "players" => {
            player.session.write(&packets::system_message(&format!(
                "There are {} players online.",
                ctx.world.player_count()
            )));
        }
        "tele" if player.rights().is_admin() => {
            let coords: Vec<u16> = parts.filter_map(|p| p.parse().ok()).collect();
            if let [x, y] = coords[..] {
                player.teleport(crate::game::location::Location::new(x, y, player.location().z));
            }
        }
        _ => {
            player
                .session
                .write(&packets::system_message("Unknown command."));
        }
    }
}
