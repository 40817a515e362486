//! Player module
//!
//! The player entity: identity, position, pending movement, and the per-tick
//! synchronization state (update payloads plus the local-view sets of
//! entities the client was last told about).
//!
//! Field mutation follows the engine's single-writer rule: game logic writes
//! happen inside dispatched tasks, while the per-player locks exist so the
//! parallel synchronization fan-out can read neighbors concurrently.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::game::location::{Direction, Location};
use crate::game::sync::update_flags::UpdateData;
use crate::net::session::Session;

/// Maximum player handle representable in the update packets (11 bits, with
/// the top value reserved as the list terminator)
pub const MAX_PLAYER_HANDLES: u16 = 2047;

/// Player rights/privilege levels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum PlayerRights {
    /// Normal player
    #[default]
    Normal = 0,
    /// Player moderator
    Moderator = 1,
    /// Administrator
    Administrator = 2,
}

impl PlayerRights {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Moderator,
            2 => Self::Administrator,
            _ => Self::Normal,
        }
    }

    pub fn is_moderator(&self) -> bool {
        matches!(self, Self::Moderator | Self::Administrator)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Administrator)
    }
}

/// Movement performed by an entity this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Movement {
    /// Standing still
    #[default]
    None,
    /// One tile
    Walk(Direction),
    /// Two tiles
    Run(Direction, Direction),
    /// Placed somewhere discontinuously
    Teleport,
}

/// Player appearance (body model ids and colors)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appearance {
    /// 0 = male, 1 = female
    pub gender: u8,
    pub head: u16,
    pub torso: u16,
    pub arms: u16,
    pub hands: u16,
    pub legs: u16,
    pub feet: u16,
    pub beard: u16,
    pub hair_color: u8,
    pub torso_color: u8,
    pub legs_color: u8,
    pub feet_color: u8,
    pub skin_color: u8,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            gender: 0,
            head: 0,
            torso: 18,
            arms: 26,
            hands: 33,
            legs: 36,
            feet: 42,
            beard: 10,
            hair_color: 0,
            torso_color: 0,
            legs_color: 0,
            feet_color: 0,
            skin_color: 0,
        }
    }
}

/// A connected player entity
pub struct Player {
    /// Registry handle, assigned at registration; 0 until then
    index: AtomicU16,
    /// The connection this player belongs to
    pub session: Arc<Session>,
    /// Normalized account name
    pub username: String,
    /// Name shown to other players
    pub display_name: String,
    /// Client-reported unique identifier
    pub uid: u32,
    rights: RwLock<PlayerRights>,
    combat_level: AtomicU8,
    location: RwLock<Location>,
    /// Map area the client last loaded; local coordinates are relative here
    map_anchor: RwLock<Location>,
    pending_teleport: Mutex<Option<Location>>,
    movement: RwLock<Movement>,
    walk_queue: Mutex<VecDeque<Location>>,
    run_enabled: AtomicBool,
    appearance: RwLock<Appearance>,
    update: RwLock<UpdateData>,
    /// Player handles this client was last told are visible
    local_players: Mutex<BTreeSet<u16>>,
    /// NPC handles this client was last told are visible
    local_npcs: Mutex<BTreeSet<u16>>,
}

impl Player {
    /// Create a player at a spawn location
    pub fn new(
        session: Arc<Session>,
        username: String,
        uid: u32,
        rights: PlayerRights,
        location: Location,
        appearance: Appearance,
    ) -> Self {
        let display_name = username.replace('_', " ");
        let mut update = UpdateData::default();
        // A fresh player is unknown to every client, itself included
        update.flag_appearance();

        Self {
            index: AtomicU16::new(0),
            session,
            username,
            display_name,
            uid,
            rights: RwLock::new(rights),
            combat_level: AtomicU8::new(3),
            location: RwLock::new(location),
            map_anchor: RwLock::new(location),
            pending_teleport: Mutex::new(None),
            movement: RwLock::new(Movement::None),
            walk_queue: Mutex::new(VecDeque::new()),
            run_enabled: AtomicBool::new(false),
            appearance: RwLock::new(appearance),
            update: RwLock::new(update),
            local_players: Mutex::new(BTreeSet::new()),
            local_npcs: Mutex::new(BTreeSet::new()),
        }
    }

    /// Registry handle
    pub fn index(&self) -> u16 {
        self.index.load(Ordering::SeqCst)
    }

    /// Assign the registry handle; called once at registration
    pub(crate) fn set_index(&self, index: u16) {
        self.index.store(index, Ordering::SeqCst);
    }

    pub fn rights(&self) -> PlayerRights {
        *self.rights.read()
    }

    pub fn set_rights(&self, rights: PlayerRights) {
        *self.rights.write() = rights;
    }

    pub fn combat_level(&self) -> u8 {
        self.combat_level.load(Ordering::SeqCst)
    }

    pub fn location(&self) -> Location {
        *self.location.read()
    }

    pub(crate) fn set_location(&self, location: Location) {
        *self.location.write() = location;
    }

    /// Map anchor the client's local coordinates are relative to
    pub fn map_anchor(&self) -> Location {
        *self.map_anchor.read()
    }

    pub fn set_map_anchor(&self, anchor: Location) {
        *self.map_anchor.write() = anchor;
    }

    pub fn movement(&self) -> Movement {
        *self.movement.read()
    }

    pub(crate) fn set_movement(&self, movement: Movement) {
        *self.movement.write() = movement;
    }

    pub fn run_enabled(&self) -> bool {
        self.run_enabled.load(Ordering::SeqCst)
    }

    pub fn set_run_enabled(&self, enabled: bool) {
        self.run_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn appearance(&self) -> Appearance {
        self.appearance.read().clone()
    }

    pub fn set_appearance(&self, appearance: Appearance) {
        *self.appearance.write() = appearance;
        self.update.write().flag_appearance();
    }

    /// Pending update payloads for this tick
    pub fn update(&self) -> parking_lot::RwLockReadGuard<'_, UpdateData> {
        self.update.read()
    }

    /// Mutate the pending update payloads
    pub fn update_mut(&self) -> parking_lot::RwLockWriteGuard<'_, UpdateData> {
        self.update.write()
    }

    /// The local-view set of player handles
    pub fn local_players(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.local_players.lock()
    }

    /// The local-view set of NPC handles
    pub fn local_npcs(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.local_npcs.lock()
    }

    /// Replace the walk queue with a path to walk. Waypoints are checkpoint
    /// tiles from the client; the queue holds every intermediate tile.
    pub fn queue_walk(&self, waypoints: &[(u16, u16)], run: bool) {
        let mut queue = self.walk_queue.lock();
        queue.clear();
        self.run_enabled.store(run, Ordering::SeqCst);

        let mut current = self.location();
        for &(x, y) in waypoints {
            let target = Location::new(x, y, current.z);
            // Step tile by tile toward each checkpoint, diagonals first
            while current != target {
                let dx = (i32::from(target.x) - i32::from(current.x)).signum();
                let dy = (i32::from(target.y) - i32::from(current.y)).signum();
                current = Location::new(
                    current.x.wrapping_add_signed(dx as i16),
                    current.y.wrapping_add_signed(dy as i16),
                    current.z,
                );
                queue.push_back(current);
            }
        }
    }

    /// Pop up to `max` queued steps
    pub(crate) fn pop_steps(&self, max: usize) -> Vec<Location> {
        let mut queue = self.walk_queue.lock();
        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }

    /// Number of queued steps
    pub fn queued_steps(&self) -> usize {
        self.walk_queue.lock().len()
    }

    /// Request a discontinuous move, applied at the next tick boundary
    pub fn teleport(&self, destination: Location) {
        *self.pending_teleport.lock() = Some(destination);
        self.walk_queue.lock().clear();
    }

    pub(crate) fn take_pending_teleport(&self) -> Option<Location> {
        self.pending_teleport.lock().take()
    }

    /// Clear per-tick state after the synchronization pass
    pub(crate) fn reset_tick(&self) {
        *self.movement.write() = Movement::None;
        self.update.write().reset();
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("index", &self.index())
            .field("username", &self.username)
            .field("location", &self.location())
            .field("rights", &self.rights())
            .finish()
    }
}

/// Build a player over a dangling session channel. Writes become no-ops,
/// which the session tolerates; everything else behaves as in production.
#[cfg(test)]
pub(crate) fn test_player(username: &str, location: Location) -> Player {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let session = Arc::new(Session::new(1, "127.0.0.1:1".parse().unwrap(), tx));
    Player::new(
        session,
        username.to_string(),
        0,
        PlayerRights::Normal,
        location,
        Appearance::default(),
    )
}
