//! NPC module
//!
//! NPCs share the handle/region machinery with players but carry far less
//! state: a definition id, a spawn point they wander around, and the pending
//! update payloads for the synchronization pass.

use std::sync::atomic::{AtomicU16, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::game::location::Location;
use crate::game::player::Movement;
use crate::game::sync::update_flags::NpcUpdateData;

/// Maximum NPC handle representable in the update packets (14 bits, with the
/// top value reserved as the list terminator)
pub const MAX_NPC_HANDLES: u16 = 16383;

/// A static NPC spawn definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcSpawn {
    /// NPC definition id
    pub npc_id: u16,
    pub location: Location,
    /// Tiles the NPC may wander from its spawn point (0 = stationary)
    #[serde(default)]
    pub wander_radius: u8,
}

/// A live NPC entity
pub struct Npc {
    /// Registry handle, assigned at registration; 0 until then
    index: AtomicU16,
    /// NPC definition id the client renders
    pub npc_id: u16,
    /// Where the NPC spawned; wandering is bounded around this
    pub spawn_point: Location,
    /// Wander radius in tiles
    pub wander_radius: u8,
    location: RwLock<Location>,
    movement: RwLock<Movement>,
    update: RwLock<NpcUpdateData>,
}

impl Npc {
    /// Create an NPC from its spawn definition
    pub fn from_spawn(spawn: &NpcSpawn) -> Self {
        Self {
            index: AtomicU16::new(0),
            npc_id: spawn.npc_id,
            spawn_point: spawn.location,
            wander_radius: spawn.wander_radius,
            location: RwLock::new(spawn.location),
            movement: RwLock::new(Movement::None),
            update: RwLock::new(NpcUpdateData::default()),
        }
    }

    /// Registry handle
    pub fn index(&self) -> u16 {
        self.index.load(Ordering::SeqCst)
    }

    pub(crate) fn set_index(&self, index: u16) {
        self.index.store(index, Ordering::SeqCst);
    }

    pub fn location(&self) -> Location {
        *self.location.read()
    }

    pub(crate) fn set_location(&self, location: Location) {
        *self.location.write() = location;
    }

    pub fn movement(&self) -> Movement {
        *self.movement.read()
    }

    pub(crate) fn set_movement(&self, movement: Movement) {
        *self.movement.write() = movement;
    }

    /// Pending update payloads for this tick
    pub fn update(&self) -> parking_lot::RwLockReadGuard<'_, NpcUpdateData> {
        self.update.read()
    }

    /// Mutate the pending update payloads
    pub fn update_mut(&self) -> parking_lot::RwLockWriteGuard<'_, NpcUpdateData> {
        self.update.write()
    }

    /// Whether a tile is inside this NPC's wander bounds
    pub fn within_wander_bounds(&self, location: &Location) -> bool {
        match self.spawn_point.distance(location) {
            Some(d) => d <= u16::from(self.wander_radius),
            None => false,
        }
    }

    /// Clear per-tick state after the synchronization pass
    pub(crate) fn reset_tick(&self) {
        *self.movement.write() = Movement::None;
        self.update.write().reset();
    }
}

impl std::fmt::Debug for Npc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Npc")
            .field("index", &self.index())
            .field("npc_id", &self.npc_id)
            .field("location", &self.location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn() -> NpcSpawn {
        NpcSpawn {
            npc_id: 1,
            location: Location::new(3222, 3222, 0),
            wander_radius: 3,
        }
    }

    #[test]
    fn test_from_spawn() {
        let npc = Npc::from_spawn(&spawn());
        assert_eq!(npc.npc_id, 1);
        assert_eq!(npc.location(), Location::new(3222, 3222, 0));
        assert_eq!(npc.movement(), Movement::None);
        assert!(!npc.update().any());
    }

    #[test]
    fn test_wander_bounds() {
        let npc = Npc::from_spawn(&spawn());
        assert!(npc.within_wander_bounds(&Location::new(3225, 3222, 0)));
        assert!(!npc.within_wander_bounds(&Location::new(3226, 3222, 0)));
        // Other planes are out of bounds outright
        assert!(!npc.within_wander_bounds(&Location::new(3222, 3222, 1)));
    }

    #[test]
    fn test_reset_tick() {
        let npc = Npc::from_spawn(&spawn());
        npc.update_mut().set_forced_chat("Buying gf".to_string());
        npc.set_movement(Movement::Teleport);

        npc.reset_tick();
        assert!(!npc.update().any());
        assert_eq!(npc.movement(), Movement::None);
    }
}
