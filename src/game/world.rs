//! World module
//!
//! Owns the entity registries, the region index, and the tick counter, and
//! provides the movement step executed at the top of every tick. The tick
//! pump at the bottom of this file is the only producer of tick tasks; all
//! actual mutation happens inside the engine's logic lane.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::game::entity::SlotRegistry;
use crate::game::location::{Direction, Location};
use crate::game::npc::{Npc, NpcSpawn, MAX_NPC_HANDLES};
use crate::game::player::{Movement, Player, MAX_PLAYER_HANDLES};
use crate::game::region::{EntityKind, RegionIndex};
use crate::state::ServerContext;

/// Standard game tick rate in milliseconds
pub const TICK_RATE_MS: u64 = 600;

/// World settings
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// World ID (1-255)
    pub world_id: u8,
    /// World name
    pub name: String,
    /// Tick rate in milliseconds
    pub tick_rate_ms: u64,
    /// Maximum players allowed
    pub max_players: usize,
    /// Maximum NPCs allowed
    pub max_npcs: usize,
    /// Autosave interval in ticks (0 to disable)
    pub autosave_interval: u64,
}

impl WorldSettings {
    /// Derive world settings from the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        let autosave_interval = if config.autosave_interval_secs > 0 {
            let ticks_per_second = 1000 / config.tick_rate_ms.max(1);
            config.autosave_interval_secs * ticks_per_second.max(1)
        } else {
            0
        };

        Self {
            world_id: config.world_id,
            name: config.server_name.clone(),
            tick_rate_ms: config.tick_rate_ms,
            max_players: (config.max_players as usize).min(MAX_PLAYER_HANDLES as usize),
            max_npcs: (config.max_npcs as usize).min(MAX_NPC_HANDLES as usize),
            autosave_interval,
        }
    }
}

/// The game world
pub struct GameWorld {
    /// World settings
    pub settings: WorldSettings,
    /// Spatial index over all entities
    pub regions: RegionIndex,
    /// Current tick number
    tick: AtomicU64,
    /// Ticks since the last autosave
    ticks_since_autosave: AtomicU64,
    players: RwLock<SlotRegistry<Arc<Player>>>,
    npcs: RwLock<SlotRegistry<Arc<Npc>>>,
}

impl GameWorld {
    /// Create a world sized from the configuration
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let settings = WorldSettings::from_config(config);
        info!(
            world_id = settings.world_id,
            name = %settings.name,
            max_players = settings.max_players,
            "Creating game world"
        );

        Ok(Self {
            regions: RegionIndex::new(),
            tick: AtomicU64::new(0),
            ticks_since_autosave: AtomicU64::new(0),
            players: RwLock::new(SlotRegistry::with_capacity(settings.max_players)),
            npcs: RwLock::new(SlotRegistry::with_capacity(settings.max_npcs)),
            settings,
        })
    }

    /// Current tick number
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Advance the tick counter, returning the new tick number
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether an autosave is due this tick
    pub fn autosave_due(&self) -> bool {
        if self.settings.autosave_interval == 0 {
            return false;
        }
        let ticks = self.ticks_since_autosave.fetch_add(1, Ordering::SeqCst) + 1;
        if ticks >= self.settings.autosave_interval {
            self.ticks_since_autosave.store(0, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    // ============ Players ============

    /// Register a player, assigning its handle and region membership.
    /// Returns `None` when the world is at its population cap.
    pub fn register_player(&self, player: Arc<Player>) -> Option<u16> {
        let handle = self.players.write().add(player.clone())?;
        player.set_index(handle);
        self.regions
            .add(EntityKind::Player, handle, &player.location());
        debug!(handle = handle, username = %player.username, "Player registered");
        Some(handle)
    }

    /// Remove a player, freeing its handle for reuse
    pub fn unregister_player(&self, handle: u16) -> Option<Arc<Player>> {
        let player = self.players.write().remove(handle)?;
        self.regions
            .remove(EntityKind::Player, handle, &player.location());
        debug!(handle = handle, username = %player.username, "Player unregistered");
        Some(player)
    }

    /// Look up a player by handle
    pub fn get_player(&self, handle: u16) -> Option<Arc<Player>> {
        self.players.read().get(handle).cloned()
    }

    /// Look up a player by normalized username
    pub fn player_by_name(&self, username: &str) -> Option<Arc<Player>> {
        let players = self.players.read();
        players
            .iter()
            .find(|(_, p)| p.username == username)
            .map(|(_, p)| p.clone())
    }

    /// Snapshot of all registered players
    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.read().iter().map(|(_, p)| p.clone()).collect()
    }

    /// Number of registered players
    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    // ============ NPCs ============

    /// Spawn an NPC into the world
    pub fn register_npc(&self, spawn: &NpcSpawn) -> Option<Arc<Npc>> {
        let npc = Arc::new(Npc::from_spawn(spawn));
        let handle = self.npcs.write().add(npc.clone())?;
        npc.set_index(handle);
        self.regions.add(EntityKind::Npc, handle, &npc.location());
        Some(npc)
    }

    /// Remove an NPC from the world, freeing its handle
    pub fn unregister_npc(&self, handle: u16) -> Option<Arc<Npc>> {
        let npc = self.npcs.write().remove(handle)?;
        self.regions.remove(EntityKind::Npc, handle, &npc.location());
        Some(npc)
    }

    /// Look up an NPC by handle
    pub fn get_npc(&self, handle: u16) -> Option<Arc<Npc>> {
        self.npcs.read().get(handle).cloned()
    }

    /// Snapshot of all registered NPCs
    pub fn npcs(&self) -> Vec<Arc<Npc>> {
        self.npcs.read().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Number of registered NPCs
    pub fn npc_count(&self) -> usize {
        self.npcs.read().len()
    }

    // ============ Tick Steps ============

    /// The movement step: apply teleports and walk queues, wander NPCs.
    /// Runs on the logic lane before the synchronization fan-out.
    pub fn pre_update(&self) {
        for player in self.players() {
            self.step_player(&player);
        }
        for npc in self.npcs() {
            self.wander_npc(&npc);
        }
    }

    /// Clear per-tick state. Runs on the logic lane after the fan-out.
    pub fn post_update(&self) {
        for player in self.players() {
            player.reset_tick();
        }
        for npc in self.npcs() {
            npc.reset_tick();
        }
    }

    fn step_player(&self, player: &Arc<Player>) {
        if let Some(dest) = player.take_pending_teleport() {
            let from = player.location();
            self.regions
                .update(EntityKind::Player, player.index(), &from, &dest);
            player.set_location(dest);
            player.set_movement(Movement::Teleport);
            return;
        }

        let max = if player.run_enabled() && player.queued_steps() >= 2 {
            2
        } else {
            1
        };
        let steps = player.pop_steps(max);
        if steps.is_empty() {
            return;
        }

        let from = player.location();
        let movement = match steps.as_slice() {
            [one] => match Direction::between(&from, one) {
                Some(d) => Movement::Walk(d),
                // Corrupt queue; snap to the tile instead of desyncing
                None => Movement::Teleport,
            },
            [one, two] => {
                match (Direction::between(&from, one), Direction::between(one, two)) {
                    (Some(a), Some(b)) => Movement::Run(a, b),
                    _ => Movement::Teleport,
                }
            }
            _ => unreachable!("pop_steps bounded at two"),
        };

        let dest = *steps.last().expect("steps nonempty");
        self.regions
            .update(EntityKind::Player, player.index(), &from, &dest);
        player.set_location(dest);
        player.set_movement(movement);
    }

    fn wander_npc(&self, npc: &Arc<Npc>) {
        if npc.wander_radius == 0 {
            return;
        }
        // Roughly one step every few ticks
        if rand::random::<u8>() % 8 != 0 {
            return;
        }

        let directions = [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
            Direction::NorthEast,
            Direction::NorthWest,
            Direction::SouthEast,
            Direction::SouthWest,
        ];
        let dir = directions[rand::random::<usize>() % directions.len()];
        let from = npc.location();
        let dest = from.step(dir);
        if !npc.within_wander_bounds(&dest) {
            return;
        }

        self.regions
            .update(EntityKind::Npc, npc.index(), &from, &dest);
        npc.set_location(dest);
        npc.set_movement(Movement::Walk(dir));
    }
}

impl std::fmt::Debug for GameWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameWorld")
            .field("settings", &self.settings)
            .field("tick", &self.tick())
            .field("players", &self.player_count())
            .field("npcs", &self.npc_count())
            .finish()
    }
}

/// Run the tick pump: push one tick task per interval until shutdown.
///
/// The pump never mutates game state itself; it only feeds the engine.
pub async fn run_tick_pump(ctx: Arc<ServerContext>, shutdown_rx: &mut broadcast::Receiver<()>) {
    info!(
        tick_rate_ms = ctx.world.settings.tick_rate_ms,
        "Starting tick pump"
    );

    let mut ticker = interval(Duration::from_millis(ctx.world.settings.tick_rate_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !ctx.engine.is_running() {
                    break;
                }
                ctx.engine.push(crate::game::sync::tick_task());
            }
            _ = shutdown_rx.recv() => {
                info!("Tick pump received shutdown signal");
                break;
            }
        }
    }

    info!(total_ticks = ctx.world.tick(), "Tick pump stopped");
}
