//! Player synchronization
//!
//! Builds the per-tick player update packet for one client: the client's own
//! movement, removals and additions to its local player list, and the update
//! blocks for everything that changed. The local list diff is driven by the
//! region neighborhood scan, so cost tracks local population rather than
//! world population.

use std::sync::Arc;

use crate::game::location::Location;
use crate::game::player::{Movement, Player};
use crate::game::world::GameWorld;
use crate::net::buffer::{Packet, PacketBuilder};
use crate::protocol::login::encode_name_base37;
use crate::protocol::packets::OP_PLAYER_UPDATE;

/// Cap on entities a single client tracks, imposed by the 8-bit local-list
/// count on the wire
pub const MAX_LOCAL_ENTITIES: usize = 255;

/// 11-bit terminator closing the addition section
const PLAYER_LIST_TERMINATOR: u32 = 2047;

/// Chat mask bit; a player's own chat is never echoed back to them
const MASK_CHAT: u16 = 0x80;

/// Extended-mask marker for masks that spill into a second byte
const MASK_EXTENDED: u16 = 0x40;

/// Result of diffing a client's local view against the world
#[derive(Debug, Default, Clone)]
pub struct ViewDiff {
    /// Handles tracked before this tick, ascending
    pub previous: Vec<u16>,
    /// Subset of `previous` dropped this tick
    pub removed: Vec<u16>,
    /// Handles newly tracked this tick, in neighborhood scan order
    pub added: Vec<u16>,
}

impl ViewDiff {
    /// Handles surviving from the previous tick
    pub fn retained(&self) -> Vec<u16> {
        self.previous
            .iter()
            .copied()
            .filter(|h| !self.removed.contains(h))
            .collect()
    }
}

/// Diff one player's local player list against the world.
///
/// Step 1 re-tests every tracked handle against the viewport predicate and
/// drops failures (including teleports, which must be re-added at their new
/// position). Step 2 scans the 3x3 region neighborhood for candidates,
/// accepting them in scan order up to the cap; overflow waits for a later
/// tick. The view set is mutated in place.
pub fn update_local_view(player: &Player, world: &GameWorld) -> ViewDiff {
    let my_location = player.location();
    let my_index = player.index();
    let mut view = player.local_players();

    let mut diff = ViewDiff {
        previous: view.iter().copied().collect(),
        ..Default::default()
    };

    // Step 1: drop tracked entities that left the viewport or the world
    for &handle in &diff.previous {
        let keep = match world.get_player(handle) {
            Some(other) => {
                other.movement() != Movement::Teleport
                    && my_location.within_viewport(&other.location())
            }
            None => false,
        };
        if !keep {
            diff.removed.push(handle);
        }
    }
    for handle in &diff.removed {
        view.remove(handle);
    }

    // Step 2: scan the neighborhood for new entities, bounded by the cap
    for handle in world.regions.surrounding_players(&my_location) {
        if view.len() >= MAX_LOCAL_ENTITIES {
            break;
        }
        if handle == my_index || view.contains(&handle) {
            continue;
        }
        let Some(other) = world.get_player(handle) else {
            continue;
        };
        if my_location.within_viewport(&other.location()) {
            view.insert(handle);
            diff.added.push(handle);
        }
    }

    diff
}

/// Build the player update packet for one client from a computed diff
pub fn build_player_packet(player: &Player, world: &GameWorld, diff: &ViewDiff) -> Packet {
    let mut builder = PacketBuilder::var_short(OP_PLAYER_UPDATE);
    let mut blocks = PacketBuilder::raw();
    builder.start_bit_access();

    write_own_movement(&mut builder, &mut blocks, player);

    // Local list walk: the client iterates its list in the same order
    builder.put_bits(8, diff.previous.len() as u32);
    for &handle in &diff.previous {
        if diff.removed.contains(&handle) {
            builder.put_bits(1, 1);
            builder.put_bits(2, 3);
            continue;
        }
        let other = world
            .get_player(handle)
            .expect("retained handle resolves; removals were filtered above");
        write_other_movement(&mut builder, &mut blocks, &other);
    }

    // Additions, with a forced appearance block so the client can render them
    let my_location = player.location();
    for &handle in &diff.added {
        let Some(other) = world.get_player(handle) else {
            continue;
        };
        let other_location = other.location();
        let dx = i32::from(other_location.x) - i32::from(my_location.x);
        let dy = i32::from(other_location.y) - i32::from(my_location.y);

        builder.put_bits(11, u32::from(handle));
        builder.put_bits(1, 1); // update block follows
        builder.put_bits(1, 1); // discard any stale walking queue
        builder.put_bits(5, (dy & 0x1F) as u32);
        builder.put_bits(5, (dx & 0x1F) as u32);

        write_update_block(&mut blocks, &other, true, true);
    }

    builder.put_bits(11, PLAYER_LIST_TERMINATOR);
    builder.finish_bit_access();

    let blocks = blocks.build();
    builder.put_bytes(blocks.payload());
    builder.build()
}

/// Movement section for the client's own player
fn write_own_movement(builder: &mut PacketBuilder, blocks: &mut PacketBuilder, player: &Player) {
    let has_update = own_mask(player) != 0;

    match player.movement() {
        Movement::None if !has_update => {
            builder.put_bits(1, 0);
            return;
        }
        Movement::None => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 0);
        }
        Movement::Walk(direction) => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 1);
            builder.put_bits(3, direction.value());
            builder.put_bits(1, u32::from(has_update));
        }
        Movement::Run(first, second) => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 2);
            builder.put_bits(3, first.value());
            builder.put_bits(3, second.value());
            builder.put_bits(1, u32::from(has_update));
        }
        Movement::Teleport => {
            let location = player.location();
            let anchor = player.map_anchor();
            builder.put_bits(1, 1);
            builder.put_bits(2, 3);
            builder.put_bits(2, u32::from(location.z));
            builder.put_bits(1, 1); // discard walking queue
            builder.put_bits(1, u32::from(has_update));
            builder.put_bits(7, u32::from(location.local_y(&anchor)));
            builder.put_bits(7, u32::from(location.local_x(&anchor)));
        }
    }

    if has_update {
        // Own chat is suppressed; the client renders it locally
        write_update_block(blocks, player, false, false);
    }
}

/// Movement section for a retained local player
fn write_other_movement(builder: &mut PacketBuilder, blocks: &mut PacketBuilder, other: &Player) {
    let has_update = other.update().any();

    match other.movement() {
        Movement::None if !has_update => {
            builder.put_bits(1, 0);
            return;
        }
        Movement::None => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 0);
        }
        Movement::Walk(direction) => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 1);
            builder.put_bits(3, direction.value());
            builder.put_bits(1, u32::from(has_update));
        }
        Movement::Run(first, second) => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 2);
            builder.put_bits(3, first.value());
            builder.put_bits(3, second.value());
            builder.put_bits(1, u32::from(has_update));
        }
        Movement::Teleport => unreachable!("teleports are dropped from the view before building"),
    }

    if has_update {
        write_update_block(blocks, other, true, false);
    }
}

/// The wire mask for a player's own update block (chat suppressed)
fn own_mask(player: &Player) -> u16 {
    player.update().flags.to_mask() & !MASK_CHAT
}

/// Append one player's update block to the block buffer.
///
/// `include_chat` is false only for the client's own player;
/// `force_appearance` is set for newly added players regardless of flags.
fn write_update_block(
    blocks: &mut PacketBuilder,
    player: &Player,
    include_chat: bool,
    force_appearance: bool,
) {
    let update = player.update();
    let mut mask = update.flags.to_mask();
    if force_appearance {
        mask |= 0x10;
    }
    if !include_chat {
        mask &= !MASK_CHAT;
    }

    if mask >= 0x100 {
        mask |= MASK_EXTENDED;
        blocks.put_u8((mask & 0xFF) as u8);
        blocks.put_u8((mask >> 8) as u8);
    } else {
        blocks.put_u8(mask as u8);
    }

    // Block order is fixed by the client
    if mask & 0x100 != 0 {
        if let Some(graphic) = &update.graphic {
            blocks.put_le_u16(graphic.id);
            blocks.put_i32(
                ((u32::from(graphic.height) << 16) | u32::from(graphic.delay)) as i32,
            );
        }
    }

    if mask & 0x8 != 0 {
        if let Some(animation) = &update.animation {
            blocks.put_le_u16(animation.id as u16);
            blocks.put_byte_c(animation.delay as i8);
        }
    }

    if mask & 0x4 != 0 {
        if let Some(text) = &update.forced_chat {
            blocks.put_string(text);
        }
    }

    if mask & MASK_CHAT != 0 {
        if let Some(chat) = &update.chat {
            blocks.put_le_u16((u16::from(chat.color) << 8) | u16::from(chat.effects));
            blocks.put_u8(chat.rights);
            blocks.put_byte_c(chat.text.len() as i8);
            blocks.put_bytes_reversed(&chat.text);
        }
    }

    if mask & 0x1 != 0 {
        if let Some(index) = update.face_entity {
            blocks.put_le_u16(index);
        }
    }

    if mask & 0x10 != 0 {
        write_appearance_block(blocks, player);
    }

    if mask & 0x2 != 0 {
        if let Some((x, y)) = update.face_coordinate {
            blocks.put_le_short_a(x);
            blocks.put_le_u16(y);
        }
    }

    if mask & 0x20 != 0 {
        if let Some(hit) = &update.hit {
            blocks.put_u8(hit.damage);
            blocks.put_byte_a(hit.hit_type);
            blocks.put_byte_c(hit.current_hp as i8);
            blocks.put_u8(hit.max_hp);
        }
    }
}

/// Append the length-prefixed appearance block
fn write_appearance_block(blocks: &mut PacketBuilder, player: &Player) {
    let appearance = player.appearance();
    let mut props = PacketBuilder::raw();

    props.put_u8(appearance.gender);
    props.put_u8(0); // head icon

    // Equipment slots; bare body parts are offset into the model id space
    props.put_u8(0); // hat
    props.put_u8(0); // cape
    props.put_u8(0); // amulet
    props.put_u8(0); // weapon
    props.put_u16(0x100 + appearance.torso);
    props.put_u8(0); // shield
    props.put_u16(0x100 + appearance.arms);
    props.put_u16(0x100 + appearance.legs);
    props.put_u16(0x100 + appearance.head);
    props.put_u16(0x100 + appearance.hands);
    props.put_u16(0x100 + appearance.feet);
    if appearance.gender == 0 {
        props.put_u16(0x100 + appearance.beard);
    } else {
        props.put_u8(0);
    }

    props.put_u8(appearance.hair_color);
    props.put_u8(appearance.torso_color);
    props.put_u8(appearance.legs_color);
    props.put_u8(appearance.feet_color);
    props.put_u8(appearance.skin_color);

    // Idle, turn, walk, turn-180, turn-90-cw, turn-90-ccw, run
    for animation in [808u16, 823, 819, 820, 821, 822, 824] {
        props.put_u16(animation);
    }

    props.put_i64(encode_name_base37(&player.display_name));
    props.put_u8(player.combat_level());
    props.put_u16(0); // total skill, unused on this interface

    let props = props.build();
    blocks.put_byte_c(props.len() as i8);
    blocks.put_bytes(props.payload());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::game::player::test_player;

    fn world() -> GameWorld {
        GameWorld::new(&ServerConfig::default()).unwrap()
    }

    fn spawn(world: &GameWorld, name: &str, loc: Location) -> Arc<Player> {
        let player = Arc::new(test_player(name, loc));
        world.register_player(player.clone()).unwrap();
        player
    }

    #[test]
    fn test_first_tick_adds_nearby_player() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        let b = spawn(&world, "b", Location::new(3202, 3200, 0));

        let diff = update_local_view(&a, &world);
        assert_eq!(diff.added, vec![b.index()]);
        assert!(diff.removed.is_empty());
        assert!(a.local_players().contains(&b.index()));
    }

    #[test]
    fn test_motionless_ticks_are_idempotent() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        let _b = spawn(&world, "b", Location::new(3202, 3200, 0));

        let first = update_local_view(&a, &world);
        assert_eq!(first.added.len(), 1);

        // Nothing moved: the second diff must be empty both ways
        let second = update_local_view(&a, &world);
        assert!(second.added.is_empty());
        assert!(second.removed.is_empty());
        assert_eq!(second.previous.len(), 1);
    }

    #[test]
    fn test_departed_player_is_removed() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        let b = spawn(&world, "b", Location::new(3202, 3200, 0));

        update_local_view(&a, &world);
        assert!(a.local_players().contains(&b.index()));

        // Move b out of the viewport (and across regions)
        let from = b.location();
        let to = Location::new(3300, 3200, 0);
        world
            .regions
            .update(crate::game::region::EntityKind::Player, b.index(), &from, &to);
        b.set_location(to);

        let diff = update_local_view(&a, &world);
        assert_eq!(diff.removed, vec![b.index()]);
        assert!(!a.local_players().contains(&b.index()));
    }

    #[test]
    fn test_logged_out_player_is_removed() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        let b = spawn(&world, "b", Location::new(3202, 3200, 0));

        update_local_view(&a, &world);
        let b_index = b.index();
        world.unregister_player(b_index);

        // The destroyed handle must not survive in the view set
        let diff = update_local_view(&a, &world);
        assert_eq!(diff.removed, vec![b_index]);
        assert!(a.local_players().is_empty());
    }

    #[test]
    fn test_teleported_player_is_readded_at_new_position() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        let b = spawn(&world, "b", Location::new(3202, 3200, 0));

        update_local_view(&a, &world);

        // Teleport within the viewport: dropped and re-added the same tick
        b.teleport(Location::new(3198, 3200, 0));
        world.pre_update();

        let diff = update_local_view(&a, &world);
        assert_eq!(diff.removed, vec![b.index()]);
        assert_eq!(diff.added, vec![b.index()]);
    }

    #[test]
    fn test_addition_cap_defers_overflow() {
        let world = world();
        let observer = spawn(&world, "observer", Location::new(3200, 3200, 0));
        for i in 0..(MAX_LOCAL_ENTITIES + 20) {
            spawn(&world, &format!("p{}", i), Location::new(3201, 3200, 0));
        }

        let diff = update_local_view(&observer, &world);
        assert_eq!(diff.added.len(), MAX_LOCAL_ENTITIES);
        assert_eq!(observer.local_players().len(), MAX_LOCAL_ENTITIES);

        // The overflow is deferred, not lost: free capacity and rescan
        let victim = diff.added[0];
        world.unregister_player(victim);
        let second = update_local_view(&observer, &world);
        assert_eq!(second.removed, vec![victim]);
        assert_eq!(second.added.len(), 1);
        assert_eq!(observer.local_players().len(), MAX_LOCAL_ENTITIES);
    }

    #[test]
    fn test_own_standing_packet_is_minimal() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        // Consume the login appearance flag
        a.reset_tick();

        let diff = update_local_view(&a, &world);
        let packet = build_player_packet(&a, &world, &diff);

        // 1 bit (no self update) + 8 bits (zero local players) + 11 bits
        // (terminator) = 20 bits = 3 bytes
        assert_eq!(packet.opcode(), OP_PLAYER_UPDATE as i32);
        assert_eq!(packet.len(), 3);

        let mut reader = packet.reader();
        reader.start_bit_access();
        assert_eq!(reader.read_bits(1), 0);
        assert_eq!(reader.read_bits(8), 0);
        assert_eq!(reader.read_bits(11), PLAYER_LIST_TERMINATOR);
    }

    #[test]
    fn test_walk_movement_bits() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        a.reset_tick();

        a.queue_walk(&[(3200, 3201)], false);
        world.pre_update();

        let diff = update_local_view(&a, &world);
        let packet = build_player_packet(&a, &world, &diff);

        let mut reader = packet.reader();
        reader.start_bit_access();
        assert_eq!(reader.read_bits(1), 1); // something to say
        assert_eq!(reader.read_bits(2), 1); // walking
        assert_eq!(reader.read_bits(3), 1); // north
        assert_eq!(reader.read_bits(1), 0); // no update block
    }

    #[test]
    fn test_added_player_forces_appearance_block() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        let b = spawn(&world, "b", Location::new(3202, 3201, 0));
        a.reset_tick();
        b.reset_tick(); // no pending flags; the add must still carry appearance

        let diff = update_local_view(&a, &world);
        let packet = build_player_packet(&a, &world, &diff);

        let mut reader = packet.reader();
        reader.start_bit_access();
        assert_eq!(reader.read_bits(1), 0); // self: nothing
        assert_eq!(reader.read_bits(8), 0); // no previously tracked players
        assert_eq!(reader.read_bits(11), u32::from(b.index()));
        assert_eq!(reader.read_bits(1), 1); // update block follows
        assert_eq!(reader.read_bits(1), 1); // discard walk queue
        assert_eq!(reader.read_bits(5), 1); // dy
        assert_eq!(reader.read_bits(5), 2); // dx
        assert_eq!(reader.read_bits(11), PLAYER_LIST_TERMINATOR);
        reader.finish_bit_access();

        // The trailing block buffer opens with the appearance mask
        let mask = reader.read_u8();
        assert_eq!(mask & 0x10, 0x10);
    }

    #[test]
    fn test_chat_not_echoed_to_self() {
        let world = world();
        let a = spawn(&world, "a", Location::new(3200, 3200, 0));
        a.reset_tick();
        a.update_mut().set_chat(0, 0, 0, vec![1, 2, 3]);

        let diff = update_local_view(&a, &world);
        let packet = build_player_packet(&a, &world, &diff);

        // Chat alone produces no self-update at all
        let mut reader = packet.reader();
        reader.start_bit_access();
        assert_eq!(reader.read_bits(1), 0);
    }
}
