//! Update flags for entity synchronization
//!
//! Tracks which aspects of an entity changed this tick and carries the
//! payloads the update blocks are built from. Flags and payloads are set by
//! packet handlers and game logic during the tick, consumed by the
//! synchronization tasks, and cleared in the post-update step.

use bitflags::bitflags;

bitflags! {
    /// Pending property changes for a player
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateFlags: u16 {
        const NONE = 0;
        /// Appearance changed (body, colors, equipment)
        const APPEARANCE = 1 << 0;
        /// Animation is playing
        const ANIMATION = 1 << 1;
        /// Graphic/spot effect
        const GRAPHIC = 1 << 2;
        /// Public chat message
        const CHAT = 1 << 3;
        /// Face another entity
        const FACE_ENTITY = 1 << 4;
        /// Face a coordinate
        const FACE_COORDINATE = 1 << 5;
        /// Damage splat
        const HIT = 1 << 6;
        /// Overhead text
        const FORCED_CHAT = 1 << 7;
    }
}

impl Default for UpdateFlags {
    fn default() -> Self {
        Self::NONE
    }
}

impl UpdateFlags {
    /// Whether anything is flagged
    pub fn any(&self) -> bool {
        !self.is_empty()
    }

    /// The wire mask for the update block header. Bit positions are fixed by
    /// the client and unrelated to the internal flag bits.
    pub fn to_mask(&self) -> u16 {
        let mut mask: u16 = 0;
        if self.contains(Self::GRAPHIC) {
            mask |= 0x100;
        }
        if self.contains(Self::ANIMATION) {
            mask |= 0x8;
        }
        if self.contains(Self::FORCED_CHAT) {
            mask |= 0x4;
        }
        if self.contains(Self::CHAT) {
            mask |= 0x80;
        }
        if self.contains(Self::FACE_ENTITY) {
            mask |= 0x1;
        }
        if self.contains(Self::APPEARANCE) {
            mask |= 0x10;
        }
        if self.contains(Self::FACE_COORDINATE) {
            mask |= 0x2;
        }
        if self.contains(Self::HIT) {
            mask |= 0x20;
        }
        mask
    }
}

/// Animation payload
#[derive(Debug, Clone, Default)]
pub struct Animation {
    /// Animation id (-1 resets)
    pub id: i16,
    /// Delay in client cycles
    pub delay: u8,
}

/// Graphic/spot effect payload
#[derive(Debug, Clone, Default)]
pub struct Graphic {
    pub id: u16,
    /// Height above the tile
    pub height: u16,
    /// Delay before starting
    pub delay: u16,
}

/// Public chat payload
#[derive(Debug, Clone, Default)]
pub struct ChatMessage {
    /// Chat effect bits (wave, scroll, ...)
    pub effects: u8,
    /// Chat color bits
    pub color: u8,
    /// Speaker rights, shown as a crown
    pub rights: u8,
    /// Packed message text as received from the client
    pub text: Vec<u8>,
}

/// Damage splat payload
#[derive(Debug, Clone, Default)]
pub struct Hit {
    pub damage: u8,
    /// 0 = miss, 1 = hit, 2 = poison
    pub hit_type: u8,
    pub current_hp: u8,
    pub max_hp: u8,
}

/// Everything flagged on a player this tick
#[derive(Debug, Clone, Default)]
pub struct UpdateData {
    pub flags: UpdateFlags,
    pub animation: Option<Animation>,
    pub graphic: Option<Graphic>,
    pub chat: Option<ChatMessage>,
    pub face_entity: Option<u16>,
    pub face_coordinate: Option<(u16, u16)>,
    pub hit: Option<Hit>,
    pub forced_chat: Option<String>,
}

impl UpdateData {
    /// Whether any update block must be written
    pub fn any(&self) -> bool {
        self.flags.any()
    }

    pub fn flag_appearance(&mut self) {
        self.flags |= UpdateFlags::APPEARANCE;
    }

    pub fn set_animation(&mut self, id: i16, delay: u8) {
        self.animation = Some(Animation { id, delay });
        self.flags |= UpdateFlags::ANIMATION;
    }

    pub fn set_graphic(&mut self, id: u16, height: u16, delay: u16) {
        self.graphic = Some(Graphic { id, height, delay });
        self.flags |= UpdateFlags::GRAPHIC;
    }

    pub fn set_chat(&mut self, effects: u8, color: u8, rights: u8, text: Vec<u8>) {
        self.chat = Some(ChatMessage {
            effects,
            color,
            rights,
            text,
        });
        self.flags |= UpdateFlags::CHAT;
    }

    pub fn set_face_entity(&mut self, index: u16) {
        self.face_entity = Some(index);
        self.flags |= UpdateFlags::FACE_ENTITY;
    }

    pub fn set_face_coordinate(&mut self, x: u16, y: u16) {
        // Doubled with a half-tile offset so the client faces tile centers
        self.face_coordinate = Some((x * 2 + 1, y * 2 + 1));
        self.flags |= UpdateFlags::FACE_COORDINATE;
    }

    pub fn set_hit(&mut self, damage: u8, hit_type: u8, current_hp: u8, max_hp: u8) {
        self.hit = Some(Hit {
            damage,
            hit_type,
            current_hp,
            max_hp,
        });
        self.flags |= UpdateFlags::HIT;
    }

    pub fn set_forced_chat(&mut self, text: String) {
        self.forced_chat = Some(text);
        self.flags |= UpdateFlags::FORCED_CHAT;
    }

    /// Clear everything for the next tick
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

bitflags! {
    /// Pending property changes for an NPC
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NpcUpdateFlags: u8 {
        const NONE = 0;
        const ANIMATION = 1 << 0;
        const FORCED_CHAT = 1 << 1;
        const HIT = 1 << 2;
    }
}

impl Default for NpcUpdateFlags {
    fn default() -> Self {
        Self::NONE
    }
}

impl NpcUpdateFlags {
    pub fn any(&self) -> bool {
        !self.is_empty()
    }

    /// The wire mask for the NPC update block header
    pub fn to_mask(&self) -> u8 {
        let mut mask: u8 = 0;
        if self.contains(Self::ANIMATION) {
            mask |= 0x10;
        }
        if self.contains(Self::FORCED_CHAT) {
            mask |= 0x1;
        }
        if self.contains(Self::HIT) {
            mask |= 0x8;
        }
        mask
    }
}

/// Everything flagged on an NPC this tick
#[derive(Debug, Clone, Default)]
pub struct NpcUpdateData {
    pub flags: NpcUpdateFlags,
    pub animation: Option<Animation>,
    pub forced_chat: Option<String>,
    pub hit: Option<Hit>,
}

impl NpcUpdateData {
    pub fn any(&self) -> bool {
        self.flags.any()
    }

    pub fn set_animation(&mut self, id: i16, delay: u8) {
        self.animation = Some(Animation { id, delay });
        self.flags |= NpcUpdateFlags::ANIMATION;
    }

    pub fn set_forced_chat(&mut self, text: String) {
        self.forced_chat = Some(text);
        self.flags |= NpcUpdateFlags::FORCED_CHAT;
    }

    pub fn set_hit(&mut self, damage: u8, hit_type: u8, current_hp: u8, max_hp: u8) {
        self.hit = Some(Hit {
            damage,
            hit_type,
            current_hp,
            max_hp,
        });
        self.flags |= NpcUpdateFlags::HIT;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_flags_produce_empty_mask() {
        let flags = UpdateFlags::default();
        assert!(!flags.any());
        assert_eq!(flags.to_mask(), 0);
    }

    #[test]
    fn test_mask_bit_positions() {
        assert_eq!(UpdateFlags::APPEARANCE.to_mask(), 0x10);
        assert_eq!(UpdateFlags::CHAT.to_mask(), 0x80);
        assert_eq!(UpdateFlags::GRAPHIC.to_mask(), 0x100);
        assert_eq!(UpdateFlags::ANIMATION.to_mask(), 0x8);
        assert_eq!(UpdateFlags::HIT.to_mask(), 0x20);
        assert_eq!(
            (UpdateFlags::APPEARANCE | UpdateFlags::CHAT).to_mask(),
            0x90
        );
    }

    #[test]
    fn test_update_data_set_and_reset() {
        let mut data = UpdateData::default();
        assert!(!data.any());

        data.set_animation(828, 0);
        data.set_chat(0, 0, 2, vec![1, 2, 3]);
        data.flag_appearance();
        assert!(data.any());
        assert!(data.flags.contains(UpdateFlags::ANIMATION));
        assert!(data.flags.contains(UpdateFlags::CHAT));

        data.reset();
        assert!(!data.any());
        assert!(data.animation.is_none());
        assert!(data.chat.is_none());
    }

    #[test]
    fn test_face_coordinate_centers_on_tile() {
        let mut data = UpdateData::default();
        data.set_face_coordinate(100, 200);
        assert_eq!(data.face_coordinate, Some((201, 401)));
    }

    #[test]
    fn test_npc_update_data() {
        let mut data = NpcUpdateData::default();
        assert!(!data.any());

        data.set_animation(422, 0);
        assert!(data.any());
        assert_eq!(data.flags.to_mask(), 0x10);

        data.set_hit(3, 1, 7, 10);
        assert_eq!(data.flags.to_mask(), 0x18);

        data.reset();
        assert!(!data.any());
    }
}
