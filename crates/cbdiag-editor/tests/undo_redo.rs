//! Integration tests: undo/redo through the workspace (cbdiag-editor).
//!
//! Drives the mutation API the way the view layer does and checks that
//! history reproduces exact diagram snapshots in both directions.

use cbdiag_core::hierarchy::check_invariants;
use cbdiag_core::{
    BlockId, DiagramRecord, LineStyle, NestingConfig, Point, Side, Size, global_bounds,
    local_to_global,
};
use cbdiag_editor::commands::{BlockUpdate, ConnectionUpdate, HistoryConfig};
use cbdiag_editor::workspace::{Recording, Workspace};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn snapshot(ws: &Workspace) -> DiagramRecord {
    DiagramRecord::capture(ws.current())
}

fn block_at(ws: &mut Workspace, x: f64, y: f64) -> BlockId {
    ws.create_block(Point::new(x, y), None, Recording::Record)
        .unwrap()
        .id
}

fn resize(ws: &mut Workspace, id: BlockId, w: f64, h: f64) {
    let update = BlockUpdate {
        size: Some(Size::new(w, h)),
        ..Default::default()
    };
    ws.update_block(id, update, Recording::Record);
}

// ─── Reference scenario ─────────────────────────────────────────────────

#[test]
fn connect_then_nest_scenario() {
    init();
    let mut ws = Workspace::new();
    let a = block_at(&mut ws, 100.0, 100.0);
    let b = block_at(&mut ws, 300.0, 100.0);
    assert_eq!(ws.block(a).unwrap().z_index, 1);
    assert_eq!(ws.block(b).unwrap().z_index, 2);

    let conn = ws.create_connection(a, b, Recording::Record).unwrap();
    assert_eq!((conn.from_side, conn.to_side), (Side::Right, Side::Left));

    resize(&mut ws, b, 300.0, 200.0);
    let before = ws.global_bounds(a).unwrap();
    assert!(ws.perform_parenting(a, b, Recording::Record));

    let d = ws.current();
    let child = d.block(a).unwrap();
    let parent = d.block(b).unwrap();
    let parent_origin = local_to_global(d, parent);
    assert_eq!(child.parent_id, Some(b));
    assert_eq!(child.position, before.origin() - parent_origin.to_vec2());
    assert_eq!(child.z_index, 3);
    assert_eq!(global_bounds(d, child), before);
    // A sat left of B, so B grew to take it in.
    let cfg = NestingConfig::default();
    assert!(child.position.x >= cfg.padding && child.position.y >= cfg.padding);
    assert!(parent.size.width >= child.position.x + child.size.width + cfg.padding);
    assert_eq!(check_invariants(d), Ok(()));
}

// ─── Basic undo/redo ────────────────────────────────────────────────────

#[test]
fn undo_restores_previous_state() {
    init();
    let mut ws = Workspace::new();
    let id = block_at(&mut ws, 0.0, 0.0);
    let before = snapshot(&ws);

    resize(&mut ws, id, 200.0, 100.0);
    assert_eq!(ws.block(id).unwrap().size, Size::new(200.0, 100.0));

    assert_eq!(ws.undo(), Some("Update block"));
    assert_eq!(snapshot(&ws), before);
}

#[test]
fn redo_reapplies_undone_action() {
    let mut ws = Workspace::new();
    let id = block_at(&mut ws, 0.0, 0.0);
    resize(&mut ws, id, 200.0, 100.0);
    let after = snapshot(&ws);

    ws.undo();
    assert!(ws.can_redo());
    assert_eq!(ws.redo(), Some("Update block"));
    assert_eq!(snapshot(&ws), after);
    assert!(!ws.can_redo());
}

#[test]
fn new_action_clears_redo() {
    let mut ws = Workspace::new();
    let id = block_at(&mut ws, 0.0, 0.0);
    resize(&mut ws, id, 200.0, 100.0);
    ws.undo();
    block_at(&mut ws, 300.0, 0.0);
    assert!(!ws.can_redo());
}

#[test]
fn history_depth_is_bounded() {
    let mut ws = Workspace::with_config(NestingConfig::default(), HistoryConfig { max_depth: 3 });
    for i in 0..5 {
        block_at(&mut ws, i as f64 * 200.0, 0.0);
    }
    let mut undone = 0;
    while ws.undo().is_some() {
        undone += 1;
    }
    assert_eq!(undone, 3);
    assert_eq!(ws.current().blocks.len(), 2);
}

#[test]
fn switching_diagrams_clears_history() {
    let mut ws = Workspace::new();
    let first = ws.current_id();
    block_at(&mut ws, 0.0, 0.0);
    ws.create_diagram(None);
    assert!(!ws.can_undo());
    ws.switch_diagram(first);
    assert!(!ws.can_undo());
    assert_eq!(ws.current().blocks.len(), 1);
}

// ─── Cascade delete ─────────────────────────────────────────────────────

#[test]
fn delete_cascades_and_undo_restores_everything() {
    init();
    let mut ws = Workspace::new();
    let outer = block_at(&mut ws, 0.0, 0.0);
    resize(&mut ws, outer, 600.0, 400.0);
    let mid = ws
        .create_block(Point::new(40.0, 40.0), Some(outer), Recording::Record)
        .unwrap()
        .id;
    resize(&mut ws, mid, 300.0, 200.0);
    let leaf = ws
        .create_block(Point::new(30.0, 30.0), Some(mid), Recording::Record)
        .unwrap()
        .id;
    let x = block_at(&mut ws, 900.0, 0.0);
    let y = block_at(&mut ws, 900.0, 300.0);
    let touching = ws.create_connection(leaf, x, Recording::Record).unwrap().id;
    let unrelated = ws.create_connection(x, y, Recording::Record).unwrap().id;
    let before = snapshot(&ws);

    assert!(ws.delete_block(outer, Recording::Record));
    for id in [outer, mid, leaf] {
        assert!(ws.block(id).is_none());
    }
    assert!(ws.connection(touching).is_none());
    assert!(ws.connection(unrelated).is_some());

    assert_eq!(ws.undo(), Some("Delete block"));
    assert_eq!(snapshot(&ws), before);
    assert_eq!(check_invariants(ws.current()), Ok(()));

    ws.redo();
    assert_eq!(ws.current().blocks.len(), 2);
}

#[test]
fn stale_commands_are_skipped() {
    let mut ws = Workspace::new();
    let id = block_at(&mut ws, 0.0, 0.0);
    let update = BlockUpdate {
        position: Some(Point::new(50.0, 50.0)),
        ..Default::default()
    };
    ws.update_block(id, update, Recording::Skip);
    ws.record_move(id, Point::ZERO);
    // Remove the block behind history's back.
    ws.delete_block(id, Recording::Skip);

    assert_eq!(ws.undo(), Some("Move block"));
    assert!(ws.block(id).is_none());
}

// ─── Id counters ────────────────────────────────────────────────────────

#[test]
fn undo_never_rewinds_onto_an_unrecorded_block() {
    init();
    let mut ws = Workspace::new();
    let recorded = block_at(&mut ws, 0.0, 0.0);
    let quiet = ws
        .create_block(Point::new(200.0, 0.0), None, Recording::Skip)
        .unwrap()
        .id;
    assert_eq!(ws.undo(), Some("Create block"));
    assert!(ws.block(recorded).is_none());

    let mut ids = vec![quiet];
    for i in 0..3 {
        let id = ws
            .create_block(Point::new(0.0, 200.0 * f64::from(i)), None, Recording::Record)
            .expect("create after undo")
            .id;
        assert!(!ids.contains(&id), "{id} handed out twice");
        ids.push(id);
    }
    assert_eq!(ws.current().blocks.len(), 4);
    assert_eq!(ws.block(quiet).unwrap().position, Point::new(200.0, 0.0));
    assert_eq!(check_invariants(ws.current()), Ok(()));
}

#[test]
fn undo_never_rewinds_onto_an_unrecorded_connection() {
    init();
    let mut ws = Workspace::new();
    let b: Vec<_> = (0..8).map(|i| block_at(&mut ws, 200.0 * f64::from(i), 0.0)).collect();
    let first = ws.create_connection(b[0], b[1], Recording::Record).unwrap().id;
    let quiet = ws.create_connection(b[2], b[3], Recording::Skip).unwrap().id;
    assert_eq!(ws.undo(), Some("Create connection"));
    assert!(ws.connection(first).is_none());

    let e = ws.create_connection(b[4], b[5], Recording::Record).unwrap().id;
    let g = ws.create_connection(b[6], b[7], Recording::Record).unwrap().id;
    assert_ne!(e, quiet);
    assert_ne!(g, quiet);
    assert_ne!(e, g);
    assert_eq!(ws.current().connections.len(), 3);
    assert_eq!(ws.connection(quiet).unwrap().from, b[2]);
}

// ─── Inverse law ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Create { x: i32, y: i32, nested: Option<usize> },
    Resize { i: usize, w: i32, h: i32 },
    Move { i: usize, x: i32, y: i32 },
    Connect { a: usize, b: usize },
    Style { c: usize },
    Parent { child: usize, parent: usize },
    Unparent(usize),
    Front(usize),
    Back(usize),
    Delete(usize),
    Disconnect(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (-400..400i32, -400..400i32, prop::option::of(0..16usize))
            .prop_map(|(x, y, nested)| Op::Create { x, y, nested }),
        1 => (0..16usize, 50..500i32, 30..400i32).prop_map(|(i, w, h)| Op::Resize { i, w, h }),
        1 => (0..16usize, -400..400i32, -400..400i32).prop_map(|(i, x, y)| Op::Move { i, x, y }),
        2 => (0..16usize, 0..16usize).prop_map(|(a, b)| Op::Connect { a, b }),
        1 => (0..16usize).prop_map(|c| Op::Style { c }),
        2 => (0..16usize, 0..16usize).prop_map(|(child, parent)| Op::Parent { child, parent }),
        1 => (0..16usize).prop_map(Op::Unparent),
        1 => (0..16usize).prop_map(Op::Front),
        1 => (0..16usize).prop_map(Op::Back),
        1 => (0..16usize).prop_map(Op::Delete),
        1 => (0..16usize).prop_map(Op::Disconnect),
    ]
}

fn nth_block(ws: &Workspace, i: usize) -> Option<BlockId> {
    let blocks = &ws.current().blocks;
    if blocks.is_empty() {
        return None;
    }
    blocks.keys().nth(i % blocks.len()).copied()
}

fn apply(ws: &mut Workspace, op: &Op) {
    let rec = Recording::Record;
    let pt = |x: i32, y: i32| Point::new(x.into(), y.into());
    match *op {
        Op::Create { x, y, nested } => {
            let parent = nested.and_then(|i| nth_block(ws, i));
            ws.create_block(pt(x, y), parent, rec);
        }
        Op::Resize { i, w, h } => {
            if let Some(id) = nth_block(ws, i) {
                resize(ws, id, w.into(), h.into());
            }
        }
        Op::Move { i, x, y } => {
            if let Some(id) = nth_block(ws, i) {
                let update = BlockUpdate {
                    position: Some(pt(x, y)),
                    ..Default::default()
                };
                ws.update_block(id, update, rec);
            }
        }
        Op::Connect { a, b } => {
            if let (Some(a), Some(b)) = (nth_block(ws, a), nth_block(ws, b)) {
                ws.create_connection(a, b, rec);
            }
        }
        Op::Style { c } => {
            let conns = &ws.current().connections;
            if !conns.is_empty() {
                let id = *conns.keys().nth(c % conns.len()).unwrap();
                let update = ConnectionUpdate {
                    line_style: Some(LineStyle::Dotted),
                    z_index: Some(Some(c as i64)),
                    ..Default::default()
                };
                ws.update_connection(id, update, rec);
            }
        }
        Op::Parent { child, parent } => {
            if let (Some(c), Some(p)) = (nth_block(ws, child), nth_block(ws, parent)) {
                ws.perform_parenting(c, p, rec);
            }
        }
        Op::Unparent(i) => {
            if let Some(id) = nth_block(ws, i) {
                ws.perform_unparenting(id, rec);
            }
        }
        Op::Front(i) => {
            if let Some(id) = nth_block(ws, i) {
                ws.bring_to_front(id, rec);
            }
        }
        Op::Back(i) => {
            if let Some(id) = nth_block(ws, i) {
                ws.send_to_back(id, rec);
            }
        }
        Op::Delete(i) => {
            if let Some(id) = nth_block(ws, i) {
                ws.delete_block(id, rec);
            }
        }
        Op::Disconnect(c) => {
            let conns = &ws.current().connections;
            if !conns.is_empty() {
                let id = *conns.keys().nth(c % conns.len()).unwrap();
                ws.delete_connection(id, rec);
            }
        }
    }
}

proptest! {
    #[test]
    fn undo_all_then_redo_all_is_exact(
        seed in prop::collection::vec(op(), 0..6),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut ws = Workspace::new();
        for op in &seed {
            apply(&mut ws, op);
        }
        let start = snapshot(&ws);
        let seeded = {
            let mut n = 0;
            while ws.undo().is_some() {
                n += 1;
            }
            for _ in 0..n {
                ws.redo();
            }
            n
        };
        prop_assert_eq!(snapshot(&ws), start.clone());

        for op in &ops {
            apply(&mut ws, op);
            prop_assert_eq!(check_invariants(ws.current()), Ok(()));
        }
        let end = snapshot(&ws);

        let mut undone = 0;
        while undone < ops.len() + seeded {
            if ws.undo().is_none() {
                break;
            }
            undone += 1;
            prop_assert_eq!(check_invariants(ws.current()), Ok(()));
        }
        // Every command is reverted, including the seed ones.
        prop_assert!(!ws.can_undo());
        for _ in 0..undone {
            ws.redo();
        }
        prop_assert_eq!(snapshot(&ws), end);

        // Walk back exactly over `ops` and land on the seeded state.
        let recorded = undone - seeded;
        for _ in 0..recorded {
            ws.undo();
        }
        prop_assert_eq!(snapshot(&ws), start);
    }
}
