//! Local ↔ global coordinate conversion.
//!
//! A block's `position` is relative to its parent's origin, and the parent's
//! position is itself relative to *its* parent. The global position is the
//! sum along the ancestor chain. All functions here are pure and read-only.

use crate::hierarchy::ancestor_chain;
use crate::id::BlockId;
use crate::model::{Block, Bounds, Diagram, Side};
use kurbo::{Point, Vec2};

/// Global (diagram-space) position of a block's origin.
///
/// Stops at the first missing ancestor and treats it as the root.
pub fn local_to_global(diagram: &Diagram, block: &Block) -> Point {
    ancestor_chain(diagram, block).fold(block.position, |p, a| p + a.position.to_vec2())
}

/// Translate a global point into the local space of `parent`.
/// `None` means diagram space, where local and global coincide.
pub fn global_to_local(diagram: &Diagram, global: Point, parent: Option<BlockId>) -> Point {
    let offset = parent
        .and_then(|id| diagram.block(id))
        .map_or(Vec2::ZERO, |p| local_to_global(diagram, p).to_vec2());
    global - offset
}

/// Global bounding box of a block.
pub fn global_bounds(diagram: &Diagram, block: &Block) -> Bounds {
    Bounds::new(local_to_global(diagram, block), block.size)
}

/// Whether two blocks overlap in global space (touching edges overlap).
pub fn blocks_overlap(diagram: &Diagram, a: &Block, b: &Block) -> bool {
    global_bounds(diagram, a).overlaps(&global_bounds(diagram, b))
}

/// Global midpoint of the given side of a block.
pub fn anchor_point(diagram: &Diagram, block: &Block, side: Side) -> Point {
    let b = global_bounds(diagram, block);
    let c = b.center();
    match side {
        Side::Top => Point::new(c.x, b.y),
        Side::Bottom => Point::new(c.x, b.bottom()),
        Side::Left => Point::new(b.x, c.y),
        Side::Right => Point::new(b.right(), c.y),
    }
}

/// Pick the facing sides for an edge from `from` to `to` based on the
/// offset between their global centers: horizontal when |dx| ≥ |dy|.
pub fn best_sides(diagram: &Diagram, from: &Block, to: &Block) -> (Side, Side) {
    let d = global_bounds(diagram, to).center() - global_bounds(diagram, from).center();
    if d.x.abs() >= d.y.abs() {
        if d.x >= 0.0 {
            (Side::Right, Side::Left)
        } else {
            (Side::Left, Side::Right)
        }
    } else if d.y > 0.0 {
        (Side::Bottom, Side::Top)
    } else {
        (Side::Top, Side::Bottom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DiagramId;
    use kurbo::Size;

    fn block(name: &str, x: f64, y: f64, w: f64, h: f64) -> Block {
        Block::new(BlockId::intern(name), Point::new(x, y), Size::new(w, h))
    }

    /// outer(100,100) > mid(+20,+30) > inner(+5,+5)
    fn nested() -> Diagram {
        let mut d = Diagram::new(DiagramId::numbered(1), "geo");
        d.insert_block(block("outer", 100.0, 100.0, 400.0, 300.0), None);
        d.insert_block(block("mid", 20.0, 30.0, 200.0, 150.0), None);
        d.insert_block(block("inner", 5.0, 5.0, 50.0, 30.0), None);
        d.attach_child(BlockId::intern("outer"), BlockId::intern("mid"), None);
        d.attach_child(BlockId::intern("mid"), BlockId::intern("inner"), None);
        d
    }

    #[test]
    fn global_position_sums_ancestors() {
        let d = nested();
        let outer = d.block(BlockId::intern("outer")).unwrap();
        let inner = d.block(BlockId::intern("inner")).unwrap();
        assert_eq!(local_to_global(&d, outer), Point::new(100.0, 100.0));
        assert_eq!(local_to_global(&d, inner), Point::new(125.0, 135.0));
    }

    #[test]
    fn global_to_local_inverts() {
        let d = nested();
        let p = global_to_local(&d, Point::new(125.0, 135.0), Some(BlockId::intern("mid")));
        assert_eq!(p, Point::new(5.0, 5.0));
        let root = global_to_local(&d, Point::new(7.0, 8.0), None);
        assert_eq!(root, Point::new(7.0, 8.0));
    }

    #[test]
    fn missing_parent_is_treated_as_root() {
        let mut d = nested();
        d.remove_block(BlockId::intern("outer"));
        let mid = d.block(BlockId::intern("mid")).unwrap();
        assert_eq!(local_to_global(&d, mid), Point::new(20.0, 30.0));
    }

    #[test]
    fn global_bounds_exposes_edges() {
        let d = nested();
        let b = global_bounds(&d, d.block(BlockId::intern("inner")).unwrap());
        assert_eq!((b.x, b.y, b.right(), b.bottom()), (125.0, 135.0, 175.0, 165.0));
    }

    #[test]
    fn sides_follow_dominant_axis() {
        let mut d = Diagram::new(DiagramId::numbered(1), "sides");
        d.insert_block(block("a", 100.0, 100.0, 120.0, 60.0), None);
        d.insert_block(block("b", 300.0, 100.0, 120.0, 60.0), None);
        d.insert_block(block("c", 100.0, 400.0, 120.0, 60.0), None);
        let get = |n: &str| d.block(BlockId::intern(n)).unwrap();
        assert_eq!(best_sides(&d, get("a"), get("b")), (Side::Right, Side::Left));
        assert_eq!(best_sides(&d, get("b"), get("a")), (Side::Left, Side::Right));
        assert_eq!(best_sides(&d, get("a"), get("c")), (Side::Bottom, Side::Top));
        assert_eq!(best_sides(&d, get("c"), get("a")), (Side::Top, Side::Bottom));
        assert_eq!(anchor_point(&d, get("a"), Side::Right), Point::new(220.0, 130.0));
    }

    #[test]
    fn overlap_uses_global_space() {
        let mut d = nested();
        d.insert_block(block("far", 0.0, 0.0, 50.0, 50.0), None);
        let inner = d.block(BlockId::intern("inner")).unwrap();
        let far = d.block(BlockId::intern("far")).unwrap();
        // Locally both sit near the origin; globally they are apart.
        assert!(!blocks_overlap(&d, inner, far));
    }
}
