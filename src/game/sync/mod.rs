//! Entity synchronization
//!
//! The per-tick pipeline: a movement step on the logic lane, a parallel
//! fan-out building one update packet pair per connected player, and a
//! cleanup step clearing the tick's flags. The whole pipeline is one
//! composite task, so the dispatcher never interleaves it with other work.

pub mod npc_sync;
pub mod player_sync;
pub mod update_flags;

use std::sync::Arc;

use tracing::debug;

use crate::engine::Task;
use crate::game::player::Player;
use crate::protocol::packets;
use crate::state::ServerContext;

/// Build the composite task executed once per game tick
pub fn tick_task() -> Task {
    Task::sequential(vec![
        Task::unit("tick-movement", |ctx| {
            ctx.world.advance_tick();
            ctx.world.pre_update();
            Ok(())
        }),
        Task::unit("tick-sync", |ctx| {
            let players = ctx.world.players();
            if players.is_empty() {
                return Ok(());
            }
            let fan_out: Vec<Task> = players
                .into_iter()
                .map(|player| {
                    Task::unit("player-view-sync", move |ctx| {
                        synchronize_player(ctx, &player);
                        Ok(())
                    })
                })
                .collect();
            Task::parallel(fan_out).execute(ctx)
        }),
        Task::unit("tick-cleanup", |ctx| {
            ctx.world.post_update();
            if ctx.world.autosave_due() {
                schedule_autosave(ctx);
            }
            Ok(())
        }),
    ])
}

/// Build and send one player's view of the world for this tick.
///
/// Runs on the parallel lane: it writes only to its own player's view sets
/// and session, and reads everything else.
pub fn synchronize_player(ctx: &ServerContext, player: &Arc<Player>) {
    let location = player.location();
    if location.needs_map_refresh(&player.map_anchor()) {
        player.set_map_anchor(location);
        player.session.write(&packets::load_map_region(&location));
    }

    let player_diff = player_sync::update_local_view(player, &ctx.world);
    let player_packet = player_sync::build_player_packet(player, &ctx.world, &player_diff);
    player.session.write(&player_packet);

    let npc_diff = npc_sync::update_npc_view(player, &ctx.world);
    let npc_packet = npc_sync::build_npc_packet(player, &ctx.world, &npc_diff);
    player.session.write(&npc_packet);
}

/// Queue a background save for every connected player
fn schedule_autosave(ctx: &ServerContext) {
    let players = ctx.world.players();
    if players.is_empty() {
        return;
    }
    debug!(players = players.len(), "Scheduling autosave");

    for player in players {
        ctx.engine.submit_background(move |ctx| {
            ctx.auth.save_player(&player);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::game::location::Location;
    use crate::game::player::test_player;

    #[test]
    fn test_tick_task_round_trips_through_engine() {
        let ctx = ServerContext::new(ServerConfig::default()).unwrap();
        ctx.engine.start(ctx.clone());

        let a = Arc::new(test_player("a", Location::new(3200, 3200, 0)));
        let b = Arc::new(test_player("b", Location::new(3202, 3200, 0)));
        ctx.world.register_player(a.clone()).unwrap();
        ctx.world.register_player(b.clone()).unwrap();
        a.queue_walk(&[(3200, 3201)], false);

        ctx.engine.push(tick_task());
        ctx.engine.push(tick_task());
        ctx.engine.stop();

        assert_eq!(ctx.world.tick(), 2);
        // Movement applied, then cleared by the cleanup step
        assert_eq!(a.location(), Location::new(3200, 3201, 0));
        assert_eq!(a.movement(), crate::game::player::Movement::None);
        // Both players discovered each other during the fan-out
        assert!(a.local_players().contains(&b.index()));
        assert!(b.local_players().contains(&a.index()));
    }
}
