//! Spatial region index
//!
//! The world is partitioned into fixed-size square cells. Each cell tracks
//! which entities currently stand in it, so interest management can scan the
//! 3x3 neighborhood around a position instead of every entity in the world.
//!
//! Regions are created lazily on first reference and never destroyed;
//! an emptied membership set is tolerated for the process lifetime.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::game::location::Location;

/// Side length of a region cell in tiles
pub const REGION_SIZE: i32 = 32;

/// Coordinates of a region cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionCoordinates {
    pub x: i32,
    pub y: i32,
}

impl RegionCoordinates {
    /// The cell owning a world position
    pub fn of(location: &Location) -> Self {
        Self {
            x: i32::from(location.x) / REGION_SIZE,
            y: i32::from(location.y) / REGION_SIZE,
        }
    }

    /// The 3x3 block of cells centered on this one
    pub fn neighborhood(&self) -> [RegionCoordinates; 9] {
        let mut cells = [*self; 9];
        let mut i = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                cells[i] = RegionCoordinates {
                    x: self.x + dx,
                    y: self.y + dy,
                };
                i += 1;
            }
        }
        cells
    }
}

/// Membership sets for one region cell
#[derive(Debug, Default)]
pub struct Region {
    players: HashSet<u16>,
    npcs: HashSet<u16>,
    objects: HashSet<u32>,
}

impl Region {
    /// Player handles in this cell
    pub fn players(&self) -> &HashSet<u16> {
        &self.players
    }

    /// NPC handles in this cell
    pub fn npcs(&self) -> &HashSet<u16> {
        &self.npcs
    }

    /// Object ids in this cell
    pub fn objects(&self) -> &HashSet<u32> {
        &self.objects
    }
}

/// Which membership set of a region an entity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player,
    Npc,
}

/// The region map, keyed by cell coordinates
#[derive(Debug, Default)]
pub struct RegionIndex {
    regions: DashMap<RegionCoordinates, Region>,
}

impl RegionIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            regions: DashMap::new(),
        }
    }

    /// Number of cells materialized so far
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Record an entity entering the cell owning `location`
    pub fn add(&self, kind: EntityKind, handle: u16, location: &Location) {
        let coords = RegionCoordinates::of(location);
        let mut region = self.regions.entry(coords).or_default();
        match kind {
            EntityKind::Player => region.players.insert(handle),
            EntityKind::Npc => region.npcs.insert(handle),
        };
    }

    /// Record an entity leaving the cell owning `location`
    pub fn remove(&self, kind: EntityKind, handle: u16, location: &Location) {
        let coords = RegionCoordinates::of(location);
        if let Some(mut region) = self.regions.get_mut(&coords) {
            match kind {
                EntityKind::Player => region.players.remove(&handle),
                EntityKind::Npc => region.npcs.remove(&handle),
            };
        }
    }

    /// Move an entity between cells if its location change crossed a cell
    /// boundary. Membership is only touched when the owning cell changes.
    pub fn update(&self, kind: EntityKind, handle: u16, from: &Location, to: &Location) {
        if RegionCoordinates::of(from) == RegionCoordinates::of(to) {
            return;
        }
        self.remove(kind, handle, from);
        self.add(kind, handle, to);
    }

    /// Record an object placed in the cell owning `location`
    pub fn add_object(&self, object_id: u32, location: &Location) {
        self.regions
            .entry(RegionCoordinates::of(location))
            .or_default()
            .objects
            .insert(object_id);
    }

    /// Player handles in the 3x3 neighborhood around `location`, in cell
    /// scan order. The order is what bounds the interest cap tie-break.
    pub fn surrounding_players(&self, location: &Location) -> Vec<u16> {
        self.surrounding(location, EntityKind::Player)
    }

    /// NPC handles in the 3x3 neighborhood around `location`
    pub fn surrounding_npcs(&self, location: &Location) -> Vec<u16> {
        self.surrounding(location, EntityKind::Npc)
    }

    fn surrounding(&self, location: &Location, kind: EntityKind) -> Vec<u16> {
        let mut handles = Vec::new();
        for coords in RegionCoordinates::of(location).neighborhood() {
            if let Some(region) = self.regions.get(&coords) {
                let set = match kind {
                    EntityKind::Player => &region.players,
                    EntityKind::Npc => &region.npcs,
                };
                // Deterministic order within a cell
                let mut cell: Vec<u16> = set.iter().copied().collect();
                cell.sort_unstable();
                handles.extend(cell);
            }
        }
        handles
    }

    /// Run a closure against the region owning `location`, creating the cell
    /// if this is its first reference
    pub fn with_region<R>(&self, location: &Location, f: impl FnOnce(&Region) -> R) -> R {
        let region = self
            .regions
            .entry(RegionCoordinates::of(location))
            .or_default();
        f(&region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_coordinates() {
        let loc = Location::new(3222, 3222, 0);
        let coords = RegionCoordinates::of(&loc);
        assert_eq!(coords, RegionCoordinates { x: 100, y: 100 });
    }

    #[test]
    fn test_lazy_creation() {
        let index = RegionIndex::new();
        assert_eq!(index.region_count(), 0);

        index.with_region(&Location::new(3222, 3222, 0), |_| ());
        assert_eq!(index.region_count(), 1);

        // Referencing the same cell does not create another
        index.with_region(&Location::new(3223, 3223, 0), |_| ());
        assert_eq!(index.region_count(), 1);
    }

    #[test]
    fn test_neighborhood_is_three_by_three() {
        let center = RegionCoordinates { x: 10, y: 10 };
        let cells = center.neighborhood();
        assert_eq!(cells.len(), 9);
        for dx in -1..=1 {
            for dy in -1..=1 {
                assert!(cells.contains(&RegionCoordinates {
                    x: 10 + dx,
                    y: 10 + dy
                }));
            }
        }
    }

    #[test]
    fn test_membership_add_remove() {
        let index = RegionIndex::new();
        let loc = Location::new(3222, 3222, 0);

        index.add(EntityKind::Player, 1, &loc);
        index.add(EntityKind::Npc, 7, &loc);
        assert_eq!(index.surrounding_players(&loc), vec![1]);
        assert_eq!(index.surrounding_npcs(&loc), vec![7]);

        index.remove(EntityKind::Player, 1, &loc);
        assert!(index.surrounding_players(&loc).is_empty());
        // NPC membership untouched
        assert_eq!(index.surrounding_npcs(&loc), vec![7]);
    }

    #[test]
    fn test_update_moves_between_cells() {
        let index = RegionIndex::new();
        let from = Location::new(3222, 3222, 0); // cell (100, 100)
        let to = Location::new(3260, 3222, 0); // cell (101, 100)

        index.add(EntityKind::Player, 1, &from);
        index.update(EntityKind::Player, 1, &from, &to);

        // Both positions still see the player: the cells neighbor each other
        assert_eq!(index.surrounding_players(&from), vec![1]);
        assert_eq!(index.surrounding_players(&to), vec![1]);

        // A position two cells away from the old one does not
        let far = Location::new(3222 - 64, 3222, 0);
        assert!(index.surrounding_players(&far).is_empty());
    }

    #[test]
    fn test_update_within_cell_is_noop() {
        let index = RegionIndex::new();
        let from = Location::new(3222, 3222, 0);
        let to = Location::new(3223, 3222, 0);

        index.add(EntityKind::Player, 1, &from);
        let cells_before = index.region_count();
        index.update(EntityKind::Player, 1, &from, &to);
        assert_eq!(index.region_count(), cells_before);
        assert_eq!(index.surrounding_players(&to), vec![1]);
    }

    #[test]
    fn test_neighborhood_scan_spans_cells() {
        let index = RegionIndex::new();
        // Three players in three adjacent cells
        index.add(EntityKind::Player, 1, &Location::new(3190, 3222, 0));
        index.add(EntityKind::Player, 2, &Location::new(3222, 3222, 0));
        index.add(EntityKind::Player, 3, &Location::new(3250, 3222, 0));

        let seen = index.surrounding_players(&Location::new(3222, 3222, 0));
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&1) && seen.contains(&2) && seen.contains(&3));
    }

    #[test]
    fn test_objects_tracked_per_cell() {
        let index = RegionIndex::new();
        let loc = Location::new(3222, 3222, 0);
        index.add_object(5131, &loc);
        let present = index.with_region(&loc, |r| r.objects().contains(&5131));
        assert!(present);
    }
}
