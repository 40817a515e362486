//! NPC synchronization
//!
//! The NPC counterpart of the player update: per client, diff the local NPC
//! list against the region neighborhood and emit movement, additions (with
//! the 14-bit handle space), removals, and update blocks.

use std::sync::Arc;

use crate::game::npc::Npc;
use crate::game::player::{Movement, Player};
use crate::game::sync::player_sync::{ViewDiff, MAX_LOCAL_ENTITIES};
use crate::game::world::GameWorld;
use crate::net::buffer::{Packet, PacketBuilder};
use crate::protocol::packets::OP_NPC_UPDATE;

/// 14-bit terminator closing the addition section
const NPC_LIST_TERMINATOR: u32 = 16383;

/// Diff one player's local NPC list against the world. Same algorithm as the
/// player list; only the membership source and handle width differ.
pub fn update_npc_view(player: &Player, world: &GameWorld) -> ViewDiff {
    let my_location = player.location();
    let mut view = player.local_npcs();

    let mut diff = ViewDiff {
        previous: view.iter().copied().collect(),
        ..Default::default()
    };

    for &handle in &diff.previous {
        let keep = match world.get_npc(handle) {
            Some(npc) => {
                npc.movement() != Movement::Teleport
                    && my_location.within_viewport(&npc.location())
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

    for handle in world.regions.surrounding_npcs(&my_location) {
        if view.len() >= MAX_LOCAL_ENTITIES {
            break;
        }
        if view.contains(&handle) {
            continue;
        }
        let Some(npc) = world.get_npc(handle) else {
            continue;
        };
        if my_location.within_viewport(&npc.location()) {
            view.insert(handle);
            diff.added.push(handle);
        }
    }

    diff
}

/// Build the NPC update packet for one client from a computed diff
pub fn build_npc_packet(player: &Player, world: &GameWorld, diff: &ViewDiff) -> Packet {
    let mut builder = PacketBuilder::var_short(OP_NPC_UPDATE);
    let mut blocks = PacketBuilder::raw();
    builder.start_bit_access();

    builder.put_bits(8, diff.previous.len() as u32);
    for &handle in &diff.previous {
        if diff.removed.contains(&handle) {
            builder.put_bits(1, 1);
            builder.put_bits(2, 3);
            continue;
        }
        let npc = world
            .get_npc(handle)
            .expect("retained handle resolves; removals were filtered above");
        write_npc_movement(&mut builder, &mut blocks, &npc);
    }

    let my_location = player.location();
    for &handle in &diff.added {
        let Some(npc) = world.get_npc(handle) else {
            continue;
        };
        let npc_location = npc.location();
        let dx = i32::from(npc_location.x) - i32::from(my_location.x);
        let dy = i32::from(npc_location.y) - i32::from(my_location.y);
        let has_update = npc.update().any();

        builder.put_bits(14, u32::from(handle));
        builder.put_bits(5, (dy & 0x1F) as u32);
        builder.put_bits(5, (dx & 0x1F) as u32);
        builder.put_bits(1, 0); // keep walking queue
        builder.put_bits(12, u32::from(npc.npc_id));
        builder.put_bits(1, u32::from(has_update));

        if has_update {
            write_npc_update_block(&mut blocks, &npc);
        }
    }

    builder.put_bits(14, NPC_LIST_TERMINATOR);
    builder.finish_bit_access();

    let blocks = blocks.build();
    builder.put_bytes(blocks.payload());
    builder.build()
}

/// Movement section for a retained local NPC
fn write_npc_movement(builder: &mut PacketBuilder, blocks: &mut PacketBuilder, npc: &Arc<Npc>) {
    let has_update = npc.update().any();

    match npc.movement() {
        Movement::None if !has_update => {
            builder.put_bits(1, 0);
            return;
        }
        Movement::None => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 0);
        }
        // NPCs never run; a two-step move walks its first leg
        Movement::Walk(direction) | Movement::Run(direction, _) => {
            builder.put_bits(1, 1);
            builder.put_bits(2, 1);
            builder.put_bits(3, direction.value());
            builder.put_bits(1, u32::from(has_update));
        }
        Movement::Teleport => unreachable!("teleports are dropped from the view before building"),
    }

    if has_update {
        write_npc_update_block(blocks, npc);
    }
}

/// Append one NPC's update block to the block buffer
fn write_npc_update_block(blocks: &mut PacketBuilder, npc: &Arc<Npc>) {
    let update = npc.update();
    let mask = update.flags.to_mask();
    blocks.put_u8(mask);

    if mask & 0x1 != 0 {
        if let Some(text) = &update.forced_chat {
            blocks.put_string(text);
        }
    }

    if mask & 0x8 != 0 {
        if let Some(hit) = &update.hit {
            blocks.put_u8(hit.damage);
            blocks.put_u8(hit.hit_type);
            blocks.put_u8(hit.current_hp);
            blocks.put_u8(hit.max_hp);
        }
    }

    if mask & 0x10 != 0 {
        if let Some(animation) = &update.animation {
            blocks.put_le_u16(animation.id as u16);
            blocks.put_u8(animation.delay);
        }
    }
}
