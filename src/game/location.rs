//! World coordinates and movement directions

use serde::{Deserialize, Serialize};

/// A tile position in the game world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// X coordinate
    pub x: u16,
    /// Y coordinate
    pub y: u16,
    /// Height plane (0-3)
    pub z: u8,
}

impl Location {
    /// Create a new location
    pub fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    /// The default spawn point for new players
    pub fn default_spawn() -> Self {
        Self::new(3222, 3222, 0)
    }

    /// Zone X coordinate (8x8 tile blocks, used by map region loading)
    pub fn zone_x(&self) -> u16 {
        self.x >> 3
    }

    /// Zone Y coordinate
    pub fn zone_y(&self) -> u16 {
        self.y >> 3
    }

    /// X offset within the client's loaded map area, anchored at `anchor`
    pub fn local_x(&self, anchor: &Location) -> u8 {
        (self.x - 8 * (anchor.zone_x().saturating_sub(6))) as u8
    }

    /// Y offset within the client's loaded map area, anchored at `anchor`
    pub fn local_y(&self, anchor: &Location) -> u8 {
        (self.y - 8 * (anchor.zone_y().saturating_sub(6))) as u8
    }

    /// Whether this position has drifted close enough to the edge of the map
    /// area anchored at `anchor` that the client must load a new region
    pub fn needs_map_refresh(&self, anchor: &Location) -> bool {
        let lx = i32::from(self.x) - 8 * (i32::from(anchor.zone_x()) - 6);
        let ly = i32::from(self.y) - 8 * (i32::from(anchor.zone_y()) - 6);
        lx < 16 || lx >= 88 || ly < 16 || ly >= 88
    }

    /// The broadcast-distance test used by interest management.
    ///
    /// The rectangle is asymmetric because the client viewport is not
    /// centered on the player: one tile short on the positive side.
    pub fn within_viewport(&self, other: &Location) -> bool {
        if self.z != other.z {
            return false;
        }
        let dx = i32::from(other.x) - i32::from(self.x);
        let dy = i32::from(other.y) - i32::from(self.y);
        (-15..=14).contains(&dx) && (-15..=14).contains(&dy)
    }

    /// Chebyshev distance on the same plane, or `None` across planes
    pub fn distance(&self, other: &Location) -> Option<u16> {
        if self.z != other.z {
            return None;
        }
        let dx = (i32::from(self.x) - i32::from(other.x)).unsigned_abs();
        let dy = (i32::from(self.y) - i32::from(other.y)).unsigned_abs();
        Some(dx.max(dy) as u16)
    }

    /// The location one step away in `direction`
    pub fn step(&self, direction: Direction) -> Location {
        Location::new(
            self.x.wrapping_add_signed(direction.dx() as i16),
            self.y.wrapping_add_signed(direction.dy() as i16),
            self.z,
        )
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One of the eight movement directions, in the 3-bit encoding the update
/// packets use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    NorthWest = 0,
    North = 1,
    NorthEast = 2,
    West = 3,
    East = 4,
    SouthWest = 5,
    South = 6,
    SouthEast = 7,
}

impl Direction {
    /// The 3-bit wire value
    pub fn value(self) -> u32 {
        self as u32
    }

    /// X delta for one step in this direction
    pub fn dx(self) -> i8 {
        match self {
            Self::NorthWest | Self::West | Self::SouthWest => -1,
            Self::North | Self::South => 0,
            Self::NorthEast | Self::East | Self::SouthEast => 1,
        }
    }

    /// Y delta for one step in this direction
    pub fn dy(self) -> i8 {
        match self {
            Self::NorthWest | Self::North | Self::NorthEast => 1,
            Self::West | Self::East => 0,
            Self::SouthWest | Self::South | Self::SouthEast => -1,
        }
    }

    /// The direction of a single-tile step from `from` to `to`, if the two
    /// tiles are distinct and adjacent on the same plane
    pub fn between(from: &Location, to: &Location) -> Option<Direction> {
        if from.z != to.z {
            return None;
        }
        let dx = i32::from(to.x) - i32::from(from.x);
        let dy = i32::from(to.y) - i32::from(from.y);
        match (dx, dy) {
            (-1, 1) => Some(Self::NorthWest),
            (0, 1) => Some(Self::North),
            (1, 1) => Some(Self::NorthEast),
            (-1, 0) => Some(Self::West),
            (1, 0) => Some(Self::East),
            (-1, -1) => Some(Self::SouthWest),
            (0, -1) => Some(Self::South),
            (1, -1) => Some(Self::SouthEast),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_asymmetric() {
        let center = Location::new(3200, 3200, 0);

        assert!(center.within_viewport(&Location::new(3214, 3200, 0)));
        assert!(!center.within_viewport(&Location::new(3215, 3200, 0)));
        assert!(center.within_viewport(&Location::new(3185, 3200, 0)));
        assert!(!center.within_viewport(&Location::new(3184, 3200, 0)));
    }

    #[test]
    fn test_viewport_requires_same_plane() {
        let center = Location::new(3200, 3200, 0);
        assert!(!center.within_viewport(&Location::new(3200, 3200, 1)));
    }

    #[test]
    fn test_distance() {
        let a = Location::new(3200, 3200, 0);
        assert_eq!(a.distance(&Location::new(3203, 3201, 0)), Some(3));
        assert_eq!(a.distance(&Location::new(3200, 3200, 1)), None);
    }

    #[test]
    fn test_direction_between_adjacent() {
        let from = Location::new(100, 100, 0);
        assert_eq!(
            Direction::between(&from, &Location::new(100, 101, 0)),
            Some(Direction::North)
        );
        assert_eq!(
            Direction::between(&from, &Location::new(101, 99, 0)),
            Some(Direction::SouthEast)
        );
        assert_eq!(Direction::between(&from, &from), None);
        assert_eq!(
            Direction::between(&from, &Location::new(103, 100, 0)),
            None
        );
    }

    #[test]
    fn test_step_inverts_between() {
        let from = Location::new(100, 100, 0);
        for dir in [
            Direction::NorthWest,
            Direction::North,
            Direction::NorthEast,
            Direction::West,
            Direction::East,
            Direction::SouthWest,
            Direction::South,
            Direction::SouthEast,
        ] {
            let to = from.step(dir);
            assert_eq!(Direction::between(&from, &to), Some(dir));
        }
    }

    #[test]
    fn test_local_coordinates() {
        let anchor = Location::new(3222, 3222, 0);
        // Anchored at its own zone, a location sits near the middle of the
        // 104-tile map area
        let lx = anchor.local_x(&anchor);
        let ly = anchor.local_y(&anchor);
        assert!((48..56).contains(&lx), "local x {}", lx);
        assert!((48..56).contains(&ly), "local y {}", ly);
        assert!(!anchor.needs_map_refresh(&anchor));

        // Far enough from the anchor the client needs a region reload
        let edge = Location::new(3222 + 40, 3222, 0);
        assert!(edge.needs_map_refresh(&anchor));
    }
}
