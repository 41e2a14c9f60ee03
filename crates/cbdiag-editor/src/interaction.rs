//! Pointer gestures on the canvas.
//!
//! Each gesture owns the transient state of one press-move-release cycle.
//! Intermediate frames mutate the workspace with [`Recording::Skip`]; the
//! undoable command is recorded once on release.
//!
//! Time is passed in explicitly so hosts drive the hold timer from their
//! own event loop and tests can step it deterministically.

use crate::commands::BlockUpdate;
use crate::workspace::{Recording, Workspace};
use cbdiag_core::{BlockId, Point, Size, Vec2};
use smallvec::SmallVec;
use std::time::{Duration, Instant};

// ─── Hold timer ──────────────────────────────────────────────────────────

/// Fires once after a candidate parent has been hovered for `delay`.
#[derive(Debug, Clone)]
pub struct HoldTimer {
    delay: Duration,
    pending: Option<(BlockId, Instant)>,
    fired: bool,
}

impl HoldTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            fired: false,
        }
    }

    /// Start waiting on `target`, replacing any earlier wait.
    pub fn arm(&mut self, target: BlockId, now: Instant) {
        self.pending = Some((target, now + self.delay));
        self.fired = false;
    }

    pub fn cancel(&mut self) {
        self.pending = None;
        self.fired = false;
    }

    /// Returns the target the first time `now` reaches the deadline.
    pub fn poll(&mut self, now: Instant) -> Option<BlockId> {
        let (target, deadline) = self.pending?;
        if self.fired || now < deadline {
            return None;
        }
        self.fired = true;
        Some(target)
    }

    pub fn pending(&self) -> Option<BlockId> {
        self.pending.map(|(target, _)| target)
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

// ─── Drag ────────────────────────────────────────────────────────────────

/// What the view should show while a block is dragged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DragFeedback {
    /// Block being hovered as a prospective parent.
    pub candidate: Option<BlockId>,
    /// The hold delay has elapsed: releasing now nests into `candidate`.
    pub parenting_ready: bool,
    /// The dragged block's center has left its parent.
    pub unparent_preview: bool,
    /// Blocks stacked above the dragged one that overlap it. The view
    /// renders these fully see-through until the drag ends.
    pub see_through: SmallVec<[BlockId; 4]>,
}

/// How a drag ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragOutcome {
    Parented(BlockId),
    Unparented,
    Moved,
    Unchanged,
}

/// Moving a block with the pointer, with nest/unnest detection.
#[derive(Debug, Clone)]
pub struct DragGesture {
    block: BlockId,
    start: Point,
    /// Pointer minus the block's global origin at press time.
    grab: Vec2,
    timer: HoldTimer,
    target: Option<BlockId>,
    parenting_ready: bool,
    unparent_preview: bool,
}

impl DragGesture {
    /// Start dragging `block` grabbed at global `pointer`.
    pub fn begin(ws: &Workspace, block: BlockId, pointer: Point) -> Option<Self> {
        let start = ws.block(block)?.position;
        let origin = ws.local_to_global(block)?;
        Some(Self {
            block,
            start,
            grab: pointer - origin,
            timer: HoldTimer::new(ws.nesting_config().hold_delay),
            target: None,
            parenting_ready: false,
            unparent_preview: false,
        })
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Move the block under `pointer` and refresh nesting previews.
    pub fn update(&mut self, ws: &mut Workspace, pointer: Point, now: Instant) -> DragFeedback {
        let Some(parent) = ws.block(self.block).map(|b| b.parent_id) else {
            return DragFeedback::default();
        };
        let local = ws.global_to_local(pointer - self.grab, parent);
        let moved = BlockUpdate {
            position: Some(local),
            ..Default::default()
        };
        ws.update_block(self.block, moved, Recording::Skip);
        log::trace!("drag {} to {local:?}", self.block);

        let center = ws.global_bounds(self.block).map(|b| b.center());
        let outside_parent = match (parent.and_then(|p| ws.global_bounds(p)), center) {
            (Some(pb), Some(c)) => !pb.contains(c),
            _ => false,
        };

        if outside_parent {
            self.unparent_preview = true;
            self.clear_parenting();
        } else {
            self.unparent_preview = false;
            match ws.find_potential_parent(self.block, pointer) {
                Some(candidate) if Some(candidate) != parent => {
                    if self.target != Some(candidate) {
                        self.clear_parenting();
                        self.target = Some(candidate);
                        self.timer.arm(candidate, now);
                    }
                }
                _ => self.clear_parenting(),
            }
            self.poll(now);
        }
        self.feedback(ws)
    }

    /// Advance the hold timer without pointer movement. Returns `true`
    /// when the parenting preview became active.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.timer.poll(now).is_some() && self.target.is_some() {
            log::debug!("parenting preview on {:?}", self.target);
            self.parenting_ready = true;
            return true;
        }
        false
    }

    fn clear_parenting(&mut self) {
        self.timer.cancel();
        self.target = None;
        self.parenting_ready = false;
    }

    fn feedback(&self, ws: &Workspace) -> DragFeedback {
        DragFeedback {
            candidate: self.target,
            parenting_ready: self.parenting_ready,
            unparent_preview: self.unparent_preview,
            see_through: see_through(ws, self.block),
        }
    }

    /// Release. Applies at most one structural change and records the
    /// gesture for undo.
    pub fn finish(mut self, ws: &mut Workspace, now: Instant) -> DragOutcome {
        self.poll(now);
        let Some(parent) = ws.block(self.block).map(|b| b.parent_id) else {
            return DragOutcome::Unchanged;
        };
        let moved = ws.record_move(self.block, self.start);

        if self.unparent_preview && parent.is_some() {
            if ws.perform_unparenting(self.block, Recording::Record) {
                return DragOutcome::Unparented;
            }
        } else if self.parenting_ready
            && let Some(target) = self.target
            && ws.perform_parenting(self.block, target, Recording::Record)
        {
            return DragOutcome::Parented(target);
        }

        if moved {
            DragOutcome::Moved
        } else {
            DragOutcome::Unchanged
        }
    }

    /// Abort, putting the block back where it started.
    pub fn cancel(self, ws: &mut Workspace) {
        let back = BlockUpdate {
            position: Some(self.start),
            ..Default::default()
        };
        ws.update_block(self.block, back, Recording::Skip);
    }
}

/// Blocks above `dragged` in paint order that overlap it, excluding its
/// own subtree.
pub fn see_through(ws: &Workspace, dragged: BlockId) -> SmallVec<[BlockId; 4]> {
    let d = ws.current();
    let (Some(block), Some(bounds)) = (d.block(dragged), ws.global_bounds(dragged)) else {
        return SmallVec::new();
    };
    let own = ws.descendants(dragged);
    d.blocks
        .values()
        .filter(|b| b.id != dragged && b.z_index > block.z_index && !own.contains(&b.id))
        .filter(|b| ws.global_bounds(b.id).is_some_and(|g| g.overlaps(&bounds)))
        .map(|b| b.id)
        .collect()
}

// ─── Resize ──────────────────────────────────────────────────────────────

/// Corner handle being dragged. The opposite corner stays fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    Nw,
    Ne,
    Sw,
    Se,
}

/// Resizing a block from one corner.
#[derive(Debug, Clone)]
pub struct ResizeGesture {
    block: BlockId,
    corner: Corner,
    press: Point,
    start: (Point, Size),
    min: Size,
}

impl ResizeGesture {
    pub fn begin(ws: &Workspace, block: BlockId, corner: Corner, pointer: Point) -> Option<Self> {
        let b = ws.block(block)?;
        Some(Self {
            block,
            corner,
            press: pointer,
            start: (b.position, b.size),
            min: ws.min_size_for_children(block),
        })
    }

    /// New local position and size for the pointer at `pointer`.
    pub fn frame_at(&self, pointer: Point) -> (Point, Size) {
        let d = pointer - self.press;
        let (pos, size) = self.start;
        let (w, h) = match self.corner {
            Corner::Se => (size.width + d.x, size.height + d.y),
            Corner::Sw => (size.width - d.x, size.height + d.y),
            Corner::Ne => (size.width + d.x, size.height - d.y),
            Corner::Nw => (size.width - d.x, size.height - d.y),
        };
        let w = w.max(self.min.width);
        let h = h.max(self.min.height);
        let x = match self.corner {
            Corner::Sw | Corner::Nw => pos.x + size.width - w,
            Corner::Ne | Corner::Se => pos.x,
        };
        let y = match self.corner {
            Corner::Ne | Corner::Nw => pos.y + size.height - h,
            Corner::Sw | Corner::Se => pos.y,
        };
        (Point::new(x, y), Size::new(w, h))
    }

    pub fn update(&self, ws: &mut Workspace, pointer: Point) {
        let (position, size) = self.frame_at(pointer);
        let update = BlockUpdate {
            position: Some(position),
            size: Some(size),
            ..Default::default()
        };
        ws.update_block(self.block, update, Recording::Skip);
    }

    /// Release. Returns `true` if a resize was recorded.
    pub fn finish(self, ws: &mut Workspace) -> bool {
        ws.record_resize(self.block, self.start)
    }
}

// ─── Connect ─────────────────────────────────────────────────────────────

/// Two-click connection mode: pick a source, then a target.
#[derive(Debug, Clone, Default)]
pub struct ConnectTool {
    source: Option<BlockId>,
}

impl ConnectTool {
    pub fn source(&self) -> Option<BlockId> {
        self.source
    }

    /// Handle a click on `block` (or empty canvas). Returns the
    /// connection id once a second, distinct block is clicked.
    pub fn click(
        &mut self,
        ws: &mut Workspace,
        block: Option<BlockId>,
    ) -> Option<cbdiag_core::ConnectionId> {
        let Some(block) = block else {
            self.source = None;
            return None;
        };
        match self.source {
            None => {
                self.source = Some(block);
                None
            }
            Some(from) if from == block => None,
            Some(from) => {
                self.source = None;
                ws.create_connection(from, block, Recording::Record)
                    .map(|c| c.id)
            }
        }
    }

    pub fn reset(&mut self) {
        self.source = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_timer_fires_once() {
        let t0 = Instant::now();
        let id = BlockId::numbered(1);
        let mut timer = HoldTimer::new(Duration::from_millis(500));
        timer.arm(id, t0);
        assert_eq!(timer.poll(t0 + Duration::from_millis(499)), None);
        assert_eq!(timer.poll(t0 + Duration::from_millis(500)), Some(id));
        assert_eq!(timer.poll(t0 + Duration::from_secs(2)), None);
        assert!(timer.has_fired());
    }

    #[test]
    fn rearming_restarts_the_wait() {
        let t0 = Instant::now();
        let mut timer = HoldTimer::new(Duration::from_millis(500));
        timer.arm(BlockId::numbered(1), t0);
        timer.arm(BlockId::numbered(2), t0 + Duration::from_millis(400));
        assert_eq!(timer.poll(t0 + Duration::from_millis(600)), None);
        assert_eq!(
            timer.poll(t0 + Duration::from_millis(900)),
            Some(BlockId::numbered(2))
        );
        timer.cancel();
        assert_eq!(timer.pending(), None);
    }

    #[test]
    fn corners_anchor_the_opposite_side() {
        let mut ws = Workspace::new();
        let id = ws
            .create_block(Point::new(100.0, 100.0), None, Recording::Record)
            .unwrap()
            .id;
        let press = Point::new(100.0, 100.0);
        let g = ResizeGesture::begin(&ws, id, Corner::Nw, press).unwrap();
        assert_eq!(
            g.frame_at(Point::new(80.0, 90.0)),
            (Point::new(80.0, 90.0), Size::new(140.0, 70.0))
        );
        // Clamped at the minimum: the far corner stays put.
        assert_eq!(
            g.frame_at(Point::new(500.0, 500.0)),
            (Point::new(170.0, 130.0), Size::new(50.0, 30.0))
        );
    }
}
