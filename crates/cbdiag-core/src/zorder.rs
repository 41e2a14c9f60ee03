//! Z-order compositing.
//!
//! Every block carries an integer `z_index`; ordering is global across the
//! whole diagram, not per sibling group. Children never stack below their
//! container, and moving a container in z moves its whole subtree by the
//! same delta. Connections inherit the higher z of their endpoints unless
//! they carry an explicit override.

use crate::hierarchy::descendants;
use crate::id::{BlockId, ConnectionId};
use crate::model::{Connection, Diagram};
use std::cmp::Ordering;

/// Highest z-index in the diagram, or 0 when empty.
pub fn max_z(diagram: &Diagram) -> i64 {
    diagram.blocks.values().map(|b| b.z_index).max().unwrap_or(0)
}

/// Lowest z-index in the diagram, or 0 when empty.
pub fn min_z(diagram: &Diagram) -> i64 {
    diagram.blocks.values().map(|b| b.z_index).min().unwrap_or(0)
}

/// The z-index a newly created block receives: on top of everything.
pub fn next_z(diagram: &Diagram) -> i64 {
    max_z(diagram) + 1
}

/// Raise `z` to `parent.z + 1` when it would put `id` below its parent.
pub fn clamp_to_parent(diagram: &Diagram, id: BlockId, z: i64) -> i64 {
    let parent_z = diagram
        .block(id)
        .and_then(|b| b.parent_id)
        .and_then(|p| diagram.block(p))
        .map(|p| p.z_index);
    match parent_z {
        Some(pz) if z < pz => pz + 1,
        _ => z,
    }
}

/// Add `delta` to the z-index of `id` and all its descendants.
pub fn shift_subtree(diagram: &mut Diagram, id: BlockId, delta: i64) {
    if delta == 0 {
        return;
    }
    for target in std::iter::once(id).chain(descendants(diagram, id)) {
        if let Some(b) = diagram.block_mut(target) {
            b.z_index += delta;
        }
    }
}

/// Set the z-index of `id` without clamping, carrying its subtree along.
/// Returns the z applied, or `None` for unknown ids.
pub fn place_subtree(diagram: &mut Diagram, id: BlockId, z: i64) -> Option<i64> {
    let old = diagram.block(id)?.z_index;
    shift_subtree(diagram, id, z - old);
    Some(z)
}

/// Set the z-index of `id`, clamped above its parent, carrying its
/// subtree along. Returns the z actually applied.
pub fn assign_z_index(diagram: &mut Diagram, id: BlockId, z: i64) -> Option<i64> {
    let z = clamp_to_parent(diagram, id, z);
    place_subtree(diagram, id, z)
}

/// Z-index that puts `id` above every block in the diagram.
pub fn front_z(diagram: &Diagram, id: BlockId) -> Option<i64> {
    diagram.block(id)?;
    Some(max_z(diagram) + 1)
}

/// Z-index that puts `id` below every block in the diagram (before
/// clamping against its parent).
pub fn back_z(diagram: &Diagram, id: BlockId) -> Option<i64> {
    diagram.block(id)?;
    Some(min_z(diagram) - 1)
}

/// Effective stacking of a connection: its override, or the higher of
/// its endpoints' z-indices (missing endpoints count as 0).
pub fn connection_z(diagram: &Diagram, conn: &Connection) -> i64 {
    conn.z_index.unwrap_or_else(|| {
        let z = |id| diagram.block(id).map_or(0, |b| b.z_index);
        z(conn.from).max(z(conn.to))
    })
}

/// Raise any block sitting below its parent to `parent.z + 1`, top-down.
/// Used when upgrading data saved before z-ordering existed. Returns the
/// number of blocks moved.
pub fn normalize(diagram: &mut Diagram) -> usize {
    let roots: Vec<BlockId> = diagram
        .blocks
        .values()
        .filter(|b| b.parent_id.is_none_or(|p| !diagram.contains_block(p)))
        .map(|b| b.id)
        .collect();
    let mut moved = 0;
    for root in roots {
        for id in descendants(diagram, root) {
            let Some(z) = diagram.block(id).map(|b| b.z_index) else {
                continue;
            };
            let clamped = clamp_to_parent(diagram, id, z);
            if clamped != z {
                place_subtree(diagram, id, clamped);
                moved += 1;
            }
        }
    }
    moved
}

// ─── Render list ─────────────────────────────────────────────────────────

/// Something the view draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderItem {
    Connection(ConnectionId),
    Block(BlockId),
}

/// One entry of the render list, with the keys it was sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderEntry {
    pub item: RenderItem,
    pub z_index: i64,
    /// Slot within the item's own collection.
    pub slot: usize,
}

impl RenderEntry {
    fn type_rank(&self) -> u8 {
        match self.item {
            RenderItem::Connection(_) => 0,
            RenderItem::Block(_) => 1,
        }
    }
}

fn paint_order(a: &RenderEntry, b: &RenderEntry) -> Ordering {
    a.z_index
        .cmp(&b.z_index)
        .then(a.type_rank().cmp(&b.type_rank()))
        .then(a.slot.cmp(&b.slot))
}

/// Everything in the diagram in back-to-front paint order.
///
/// Sorted by `(z, connections-before-blocks, insertion slot)` so that at
/// equal z edges draw underneath node rectangles.
pub fn render_list(diagram: &Diagram) -> Vec<RenderEntry> {
    let blocks = diagram.blocks.values().enumerate().map(|(slot, b)| RenderEntry {
        item: RenderItem::Block(b.id),
        z_index: b.z_index,
        slot,
    });
    let connections = diagram
        .connections
        .values()
        .enumerate()
        .map(|(slot, c)| RenderEntry {
            item: RenderItem::Connection(c.id),
            z_index: connection_z(diagram, c),
            slot,
        });
    let mut entries: Vec<RenderEntry> = blocks.chain(connections).collect();
    entries.sort_by(paint_order);
    entries
}
