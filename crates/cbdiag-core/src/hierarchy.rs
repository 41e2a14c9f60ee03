//! Ancestor/descendant queries over the parent/child block graph.
//!
//! Traversals follow `parent_id` upward and `child_ids` downward. The
//! mutation paths keep the graph acyclic; [`check_invariants`] audits that
//! explicitly (and is wired into debug assertions), while the walkers below
//! still stop on dangling ids so a corrupt arena cannot hang a query.

use crate::id::{BlockId, ConnectionId};
use crate::model::{Block, Diagram};
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashSet;
use thiserror::Error;

/// Iterator over a block's ancestors, nearest first.
pub struct Ancestors<'a> {
    diagram: &'a Diagram,
    next: Option<BlockId>,
    /// Hop budget: a well-formed chain is never longer than the arena.
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<&'a Block> {
        let id = self.next?;
        if self.remaining == 0 {
            log::warn!("parent chain through {id} exceeds block count; stopping");
            self.next = None;
            return None;
        }
        self.remaining -= 1;
        let block = self.diagram.block(id)?;
        self.next = block.parent_id;
        Some(block)
    }
}

/// Walk the ancestors of `block` (not including itself).
pub fn ancestor_chain<'a>(diagram: &'a Diagram, block: &Block) -> Ancestors<'a> {
    Ancestors {
        diagram,
        next: block.parent_id,
        remaining: diagram.blocks.len(),
    }
}

/// Ancestor ids of `id`, nearest first. Empty for unknown ids.
pub fn ancestors(diagram: &Diagram, id: BlockId) -> Vec<BlockId> {
    diagram
        .block(id)
        .map(|b| ancestor_chain(diagram, b).map(|a| a.id).collect())
        .unwrap_or_default()
}

/// Number of ancestors of `id`.
pub fn depth(diagram: &Diagram, id: BlockId) -> usize {
    diagram
        .block(id)
        .map_or(0, |b| ancestor_chain(diagram, b).count())
}

/// All descendants of `id`, each subtree fully expanded before the next
/// sibling (pre-order). Empty for unknown ids.
pub fn descendants(diagram: &Diagram, id: BlockId) -> Vec<BlockId> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([id]);
    collect_children(diagram, id, &mut seen, &mut out);
    out
}

fn collect_children(
    diagram: &Diagram,
    parent: BlockId,
    seen: &mut HashSet<BlockId>,
    out: &mut Vec<BlockId>,
) {
    let Some(block) = diagram.block(parent) else {
        return;
    };
    for &child in &block.child_ids {
        if diagram.contains_block(child) && seen.insert(child) {
            out.push(child);
            collect_children(diagram, child, seen, out);
        }
    }
}

/// Whether `ancestor` appears in the ancestor chain of `descendant`.
/// A block is never its own ancestor.
pub fn is_ancestor_of(diagram: &Diagram, ancestor: BlockId, descendant: BlockId) -> bool {
    diagram
        .block(descendant)
        .is_some_and(|b| ancestor_chain(diagram, b).any(|a| a.id == ancestor))
}

// ─── Invariant audit ─────────────────────────────────────────────────────

/// A structural invariant that does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("block {block} names missing parent {parent}")]
    DanglingParent { block: BlockId, parent: BlockId },
    #[error("{parent} and {child} disagree about their parent/child link")]
    LinkMismatch { parent: BlockId, child: BlockId },
    #[error("block {child} is listed twice under {parent}")]
    DuplicateChild { parent: BlockId, child: BlockId },
    #[error("the parent graph contains a cycle")]
    Cycle,
    #[error("block {block} (z {z}) renders below its parent {parent} (z {parent_z})")]
    BelowParent {
        block: BlockId,
        z: i64,
        parent: BlockId,
        parent_z: i64,
    },
    #[error("connection {0} references a missing block")]
    DanglingConnection(ConnectionId),
    #[error("connection {0} joins a block to itself")]
    SelfConnection(ConnectionId),
    #[error("connections {0} and {1} join the same pair of blocks")]
    DuplicateConnection(ConnectionId, ConnectionId),
}

/// Audit the structural invariants of a diagram:
/// parent/child links agree, the parent graph is acyclic, children stack
/// at or above their parent, and connections are valid and unique.
pub fn check_invariants(diagram: &Diagram) -> Result<(), InvariantViolation> {
    let mut graph = DiGraphMap::<BlockId, ()>::new();

    for block in diagram.blocks.values() {
        graph.add_node(block.id);
        if let Some(parent_id) = block.parent_id {
            let parent = diagram
                .block(parent_id)
                .ok_or(InvariantViolation::DanglingParent {
                    block: block.id,
                    parent: parent_id,
                })?;
            if !parent.child_ids.contains(&block.id) {
                return Err(InvariantViolation::LinkMismatch {
                    parent: parent_id,
                    child: block.id,
                });
            }
            if block.z_index < parent.z_index {
                return Err(InvariantViolation::BelowParent {
                    block: block.id,
                    z: block.z_index,
                    parent: parent_id,
                    parent_z: parent.z_index,
                });
            }
            graph.add_edge(parent_id, block.id, ());
        }

        let mut listed = HashSet::new();
        for &child in &block.child_ids {
            if !listed.insert(child) {
                return Err(InvariantViolation::DuplicateChild {
                    parent: block.id,
                    child,
                });
            }
            if diagram.block(child).and_then(|c| c.parent_id) != Some(block.id) {
                return Err(InvariantViolation::LinkMismatch {
                    parent: block.id,
                    child,
                });
            }
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(InvariantViolation::Cycle);
    }

    let conns: Vec<_> = diagram.connections.values().collect();
    for (i, conn) in conns.iter().enumerate() {
        if conn.from == conn.to {
            return Err(InvariantViolation::SelfConnection(conn.id));
        }
        if !diagram.contains_block(conn.from) || !diagram.contains_block(conn.to) {
            return Err(InvariantViolation::DanglingConnection(conn.id));
        }
        if let Some(dup) = conns[i + 1..].iter().find(|c| c.joins(conn.from, conn.to)) {
            return Err(InvariantViolation::DuplicateConnection(conn.id, dup.id));
        }
    }

    Ok(())
}

/// Debug-build audit after a structural mutation.
pub(crate) fn debug_audit(diagram: &Diagram) {
    if cfg!(debug_assertions)
        && let Err(violation) = check_invariants(diagram)
    {
        panic!("diagram {} invariant broken: {violation}", diagram.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DiagramId;
    use crate::model::DEFAULT_BLOCK_SIZE;
    use kurbo::Point;

    /// root ─┬─ a ── a1
    ///       └─ b
    fn tree() -> Diagram {
        let mut d = Diagram::new(DiagramId::numbered(1), "tree");
        for (z, name) in ["root", "a", "a1", "b", "loose"].iter().enumerate() {
            let mut block = Block::new(BlockId::intern(name), Point::ZERO, DEFAULT_BLOCK_SIZE);
            block.z_index = z as i64;
            d.insert_block(block, None);
        }
        let id = BlockId::intern;
        d.attach_child(id("root"), id("a"), None);
        d.attach_child(id("a"), id("a1"), None);
        d.attach_child(id("root"), id("b"), None);
        d
    }

    #[test]
    fn ancestors_are_nearest_first() {
        let d = tree();
        assert_eq!(
            ancestors(&d, BlockId::intern("a1")),
            vec![BlockId::intern("a"), BlockId::intern("root")]
        );
        assert!(ancestors(&d, BlockId::intern("root")).is_empty());
        assert!(ancestors(&d, BlockId::intern("nope")).is_empty());
        assert_eq!(depth(&d, BlockId::intern("a1")), 2);
    }

    #[test]
    fn descendants_expand_each_subtree() {
        let d = tree();
        let names: Vec<_> = descendants(&d, BlockId::intern("root"))
            .iter()
            .map(|id| id.as_str().to_owned())
            .collect();
        assert_eq!(names, ["a", "a1", "b"]);
        assert!(descendants(&d, BlockId::intern("b")).is_empty());
    }

    #[test]
    fn ancestor_relation_is_strict() {
        let d = tree();
        let id = BlockId::intern;
        assert!(is_ancestor_of(&d, id("root"), id("a1")));
        assert!(!is_ancestor_of(&d, id("a1"), id("root")));
        assert!(!is_ancestor_of(&d, id("a"), id("a")));
        assert!(!is_ancestor_of(&d, id("b"), id("a1")));
    }

    #[test]
    fn well_formed_tree_passes_audit() {
        assert_eq!(check_invariants(&tree()), Ok(()));
    }

    #[test]
    fn audit_reports_cycles() {
        let mut d = tree();
        let id = BlockId::intern;
        // Forge a loop behind the mutation API's back.
        d.block_mut(id("root")).unwrap().parent_id = Some(id("a1"));
        d.block_mut(id("a1")).unwrap().child_ids.push(id("root"));
        for name in ["root", "a", "a1", "b"] {
            d.block_mut(id(name)).unwrap().z_index = 10;
        }
        assert_eq!(check_invariants(&d), Err(InvariantViolation::Cycle));

        // Walkers still terminate.
        assert!(ancestors(&d, id("a1")).len() <= d.blocks.len());
        assert_eq!(descendants(&d, id("root")).len(), 3);
    }

    #[test]
    fn audit_reports_half_links() {
        let mut d = tree();
        d.block_mut(BlockId::intern("b")).unwrap().parent_id = None;
        assert_eq!(
            check_invariants(&d),
            Err(InvariantViolation::LinkMismatch {
                parent: BlockId::intern("root"),
                child: BlockId::intern("b"),
            })
        );
    }

    #[test]
    fn audit_reports_children_below_parent() {
        let mut d = tree();
        d.block_mut(BlockId::intern("a1")).unwrap().z_index = -3;
        assert!(matches!(
            check_invariants(&d),
            Err(InvariantViolation::BelowParent { .. })
        ));
    }
}
