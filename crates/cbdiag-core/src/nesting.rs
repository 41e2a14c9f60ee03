//! Nesting engine: drop-target hit testing, re-parenting and container
//! auto-sizing.
//!
//! Re-parenting never moves a block visually; only its coordinate frame
//! changes. Containers grow to fit their children plus padding and never
//! shrink on their own.

use crate::geometry::{global_bounds, global_to_local, local_to_global};
use crate::hierarchy::{ancestors, debug_audit, depth, descendants, is_ancestor_of};
use crate::id::BlockId;
use crate::model::{Bounds, Diagram};
use crate::zorder::{max_z, place_subtree};
use kurbo::{Point, Size, Vec2};
use std::time::Duration;

/// Tunables of the nesting engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NestingConfig {
    /// Minimum gap between a container's edge and its children.
    pub padding: f64,
    /// Extra room added when a container has to grow.
    pub size_buffer: f64,
    /// How long a drop target must stay under the pointer before it
    /// becomes the active parenting target.
    pub hold_delay: Duration,
    /// Floor for any block size.
    pub min_size: Size,
}

impl Default for NestingConfig {
    fn default() -> Self {
        Self {
            padding: 20.0,
            size_buffer: 40.0,
            hold_delay: Duration::from_millis(500),
            min_size: Size::new(50.0, 30.0),
        }
    }
}

/// Find the most deeply nested block that could adopt `dragged`.
///
/// A candidate must contain both the pointer and the dragged block's own
/// center in its global bounds, and must not be the dragged block, one of
/// its ancestors, or one of its descendants. Among matches the deepest
/// wins; ties go to the earliest block in the diagram.
pub fn find_potential_parent(
    diagram: &Diagram,
    dragged: BlockId,
    cursor: Point,
) -> Option<BlockId> {
    let block = diagram.block(dragged)?;
    let center = global_bounds(diagram, block).center();
    let excluded: Vec<BlockId> = ancestors(diagram, dragged)
        .into_iter()
        .chain(descendants(diagram, dragged))
        .chain(std::iter::once(dragged))
        .collect();

    let mut best: Option<(usize, BlockId)> = None;
    for candidate in diagram.blocks.values() {
        if excluded.contains(&candidate.id) {
            continue;
        }
        let bounds = global_bounds(diagram, candidate);
        if !bounds.contains(cursor) || !bounds.contains(center) {
            continue;
        }
        let d = depth(diagram, candidate.id);
        if best.is_none_or(|(best_depth, _)| d > best_depth) {
            best = Some((d, candidate.id));
        }
    }
    best.map(|(_, id)| id)
}

/// Make `child` a child of `parent`, keeping its global position.
///
/// The child is stacked directly above its new container (its subtree
/// follows), and the container grows to fit. Returns `false` without
/// touching anything if either block is missing, if they are the same
/// block, or if `parent` lies inside `child`'s subtree.
pub fn perform_parenting(
    diagram: &mut Diagram,
    child: BlockId,
    parent: BlockId,
    config: &NestingConfig,
) -> bool {
    let (Some(child_block), Some(parent_block)) = (diagram.block(child), diagram.block(parent))
    else {
        return false;
    };
    if child == parent || is_ancestor_of(diagram, child, parent) {
        log::debug!("parenting {child} under {parent} rejected: would create a cycle");
        return false;
    }
    let global = local_to_global(diagram, child_block);
    let parent_z = parent_block.z_index;

    diagram.detach_child(child);
    diagram.attach_child(parent, child, None);
    let local = global_to_local(diagram, global, Some(parent));
    if let Some(c) = diagram.block_mut(child) {
        c.position = local;
    }
    place_subtree(diagram, child, parent_z + 1);
    auto_resize_parent(diagram, parent, config);

    log::debug!("parented {child} under {parent} at local ({}, {})", local.x, local.y);
    debug_audit(diagram);
    true
}

/// Detach `child` from its parent, keeping its global position, and raise
/// it above everything else in the diagram. Returns `false` if the block
/// is missing or already top-level.
pub fn perform_unparenting(diagram: &mut Diagram, child: BlockId) -> bool {
    let Some(block) = diagram.block(child) else {
        return false;
    };
    if block.parent_id.is_none() {
        return false;
    }
    let global = local_to_global(diagram, block);

    diagram.detach_child(child);
    if let Some(c) = diagram.block_mut(child) {
        c.position = global;
    }
    let top = max_z(diagram) + 1;
    place_subtree(diagram, child, top);

    log::debug!("unparented {child} to ({}, {})", global.x, global.y);
    debug_audit(diagram);
    true
}

/// Grow `parent` until it encloses all its children with padding.
///
/// Children closer than `padding` to the top/left edge are shifted inward
/// by the deficit; the container's origin moves outward by the same amount
/// and it grows by it, so no child moves in global space. Growth beyond
/// the children's extent adds `size_buffer`. The container never shrinks.
/// When its frame changes, the grandparent is re-fitted as well.
///
/// Returns whether anything changed.
pub fn auto_resize_parent(diagram: &mut Diagram, parent: BlockId, config: &NestingConfig) -> bool {
    let Some(block) = diagram.block(parent) else {
        return false;
    };
    let children: Vec<Bounds> = block
        .child_ids
        .iter()
        .filter_map(|id| diagram.block(*id))
        .map(|c| c.local_bounds())
        .collect();
    if children.is_empty() {
        return false;
    }

    let min_x = children.iter().map(|b| b.x).fold(f64::INFINITY, f64::min);
    let min_y = children.iter().map(|b| b.y).fold(f64::INFINITY, f64::min);
    let max_x = children.iter().map(Bounds::right).fold(f64::NEG_INFINITY, f64::max);
    let max_y = children.iter().map(Bounds::bottom).fold(f64::NEG_INFINITY, f64::max);

    let shift = Vec2::new(
        (config.padding - min_x).max(0.0),
        (config.padding - min_y).max(0.0),
    );
    let required = Size::new(
        max_x + shift.x + config.padding + config.size_buffer,
        max_y + shift.y + config.padding + config.size_buffer,
    );

    let child_ids = block.child_ids.clone();
    let grandparent = block.parent_id;
    let Some(block) = diagram.block_mut(parent) else {
        return false;
    };
    let before = block.frame();
    block.position -= shift;
    block.size.width += shift.x;
    block.size.height += shift.y;
    block.size.width = block.size.width.max(required.width);
    block.size.height = block.size.height.max(required.height);
    let changed = block.frame() != before;

    if shift != Vec2::ZERO {
        for id in child_ids {
            if let Some(c) = diagram.block_mut(id) {
                c.position += shift;
            }
        }
    }

    if changed {
        log::trace!("resized container {parent} to {:?}", diagram.block(parent).map(|b| b.size));
        if let Some(gp) = grandparent {
            auto_resize_parent(diagram, gp, config);
        }
    }
    changed
}

/// Smallest size `parent` may be resized to by hand: the configured floor,
/// or the extent of its children plus padding, whichever is larger.
pub fn min_size_for_children(diagram: &Diagram, parent: BlockId, config: &NestingConfig) -> Size {
    let extent = diagram
        .block(parent)
        .into_iter()
        .flat_map(|p| p.child_ids.iter())
        .filter_map(|id| diagram.block(*id))
        .fold(Size::ZERO, |acc, c| {
            let b = c.local_bounds();
            Size::new(
                acc.width.max(b.right() + config.padding),
                acc.height.max(b.bottom() + config.padding),
            )
        });
    Size::new(
        config.min_size.width.max(extent.width),
        config.min_size.height.max(extent.height),
    )
}

/// Spacing between candidate spots in [`find_non_overlapping_position`].
const PLACEMENT_STEP: f64 = 80.0;
/// Clearance kept around existing blocks when placing a new one.
const PLACEMENT_CLEARANCE: f64 = 20.0;
/// Rings searched before giving up.
const PLACEMENT_RINGS: i32 = 50;

/// Find a center point near `center` where a block of `size` does not
/// crowd any top-level block, searching outward in square rings.
pub fn find_non_overlapping_position(diagram: &Diagram, center: Point, size: Size) -> Point {
    let top_level: Vec<Bounds> = diagram
        .blocks
        .values()
        .filter(|b| b.parent_id.is_none())
        .map(|b| global_bounds(diagram, b))
        .collect();

    let free = |c: Point| {
        let x = c.x - size.width / 2.0;
        let y = c.y - size.height / 2.0;
        !top_level.iter().any(|b| {
            x < b.right() + PLACEMENT_CLEARANCE
                && x + size.width + PLACEMENT_CLEARANCE > b.x
                && y < b.bottom() + PLACEMENT_CLEARANCE
                && y + size.height + PLACEMENT_CLEARANCE > b.y
        })
    };

    if free(center) {
        return center;
    }
    for ring in 1..=PLACEMENT_RINGS {
        for dx in -ring..=ring {
            for dy in -ring..=ring {
                if dx.abs() != ring && dy.abs() != ring {
                    continue;
                }
                let candidate = center + Vec2::new(dx as f64, dy as f64) * PLACEMENT_STEP;
                if free(candidate) {
                    return candidate;
                }
            }
        }
    }
    let fallback = top_level.len() as f64 * 30.0;
    center + Vec2::new(fallback, fallback)
}
