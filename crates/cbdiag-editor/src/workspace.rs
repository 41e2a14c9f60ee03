//! The editing workspace: every open diagram, the active one, its undo
//! history and the proxy drill-down trail.
//!
//! The workspace is the single source of truth the view layer reads from.
//! All mutations of the active diagram go through here so they can be
//! recorded for undo; callers pass [`Recording::Skip`] for intermediate
//! frames of a live gesture and record one command when it ends.

use crate::commands::{
    BlockUpdate, Command, CommandStack, ConnectionUpdate, Counter, HistoryConfig,
};
use cbdiag_core::geometry::{best_sides, local_to_global};
use cbdiag_core::hierarchy::{ancestors, descendants, is_ancestor_of};
use cbdiag_core::nesting::{
    self, NestingConfig, find_non_overlapping_position, min_size_for_children,
};
use cbdiag_core::snapshot::{self, LoadedStore, SnapshotError, StoreRecord};
use cbdiag_core::zorder::{self, RenderEntry, back_z, front_z, next_z};
use cbdiag_core::{
    Block, BlockId, BlockKind, Bounds, Color, Connection, ConnectionId, DEFAULT_BLOCK_SIZE,
    DEFAULT_PROXY_SIZE, Diagram, DiagramId, LineStyle, PROXY_COLOR, Point, Size, Vec2,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the diagram a fresh workspace starts with.
pub const FIRST_DIAGRAM_NAME: &str = "My First Diagram";
/// Name used when a diagram is renamed to the empty string.
pub const UNTITLED_DIAGRAM_NAME: &str = "Untitled Diagram";

/// Viewport scale per zoom-in step.
pub const ZOOM_IN_FACTOR: f64 = 0.9;
/// Viewport scale per zoom-out step.
pub const ZOOM_OUT_FACTOR: f64 = 1.1;

/// Whether a mutation goes onto the undo stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recording {
    #[default]
    Record,
    /// Apply only. Used for live gesture frames.
    Skip,
}

/// One level of proxy drill-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationEntry {
    /// Diagram that was active before drilling in.
    pub diagram: DiagramId,
    /// Proxy block that was followed.
    pub from_proxy: Option<BlockId>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// All diagrams of one editing session.
pub struct Workspace {
    /// Never empty.
    diagrams: Vec<Diagram>,
    current: usize,
    navigation: Vec<NavigationEntry>,
    history: CommandStack,
    nesting: NestingConfig,
    next_diagram_id: u64,
    /// Set on any change since the last save.
    dirty: bool,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// A workspace holding one empty diagram.
    pub fn new() -> Self {
        Self::with_config(NestingConfig::default(), HistoryConfig::default())
    }

    pub fn with_config(nesting: NestingConfig, history: HistoryConfig) -> Self {
        let mut first = Diagram::new(DiagramId::numbered(1), FIRST_DIAGRAM_NAME);
        let now = now_ms();
        first.created_at = now;
        first.updated_at = now;
        Self {
            diagrams: vec![first],
            current: 0,
            navigation: Vec::new(),
            history: CommandStack::new(history),
            nesting,
            next_diagram_id: 2,
            dirty: false,
        }
    }

    // ─── Persistence ─────────────────────────────────────────────────────

    /// Build a workspace from a decoded store. An empty store yields a
    /// fresh workspace.
    pub fn from_store(loaded: LoadedStore, nesting: NestingConfig, history: HistoryConfig) -> Self {
        if loaded.diagrams.is_empty() {
            return Self::with_config(nesting, history);
        }
        let current = loaded
            .current
            .and_then(|id| loaded.diagrams.iter().position(|d| d.id == id))
            .unwrap_or(0);
        Self {
            diagrams: loaded.diagrams,
            current,
            navigation: Vec::new(),
            history: CommandStack::new(history),
            nesting,
            next_diagram_id: loaded.next_diagram_id,
            dirty: loaded.upgraded,
        }
    }

    pub fn load_json(text: &str) -> Result<Self, SnapshotError> {
        let loaded = snapshot::decode_json(text)?;
        Ok(Self::from_store(loaded, NestingConfig::default(), HistoryConfig::default()))
    }

    pub fn load_msgpack(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let loaded = snapshot::decode_msgpack(bytes)?;
        Ok(Self::from_store(loaded, NestingConfig::default(), HistoryConfig::default()))
    }

    /// Load saved JSON, treating absent or corrupt data as an empty start.
    pub fn load_or_default(saved: Option<&str>) -> Self {
        let Some(text) = saved else {
            return Self::new();
        };
        Self::load_json(text).unwrap_or_else(|e| {
            log::warn!("discarding unreadable saved diagrams: {e}");
            Self::new()
        })
    }

    /// Plain-data form of every diagram.
    pub fn store_record(&self) -> StoreRecord {
        StoreRecord::capture(&self.diagrams, Some(self.current().id))
    }

    pub fn save_json(&mut self) -> Result<String, SnapshotError> {
        self.stamp_saved();
        snapshot::encode_json(&self.store_record())
    }

    pub fn save_msgpack(&mut self) -> Result<Vec<u8>, SnapshotError> {
        self.stamp_saved();
        snapshot::encode_msgpack(&self.store_record())
    }

    fn stamp_saved(&mut self) {
        if self.dirty {
            self.diagrams[self.current].updated_at = now_ms();
            self.dirty = false;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// The active diagram.
    pub fn current(&self) -> &Diagram {
        &self.diagrams[self.current]
    }

    pub fn current_id(&self) -> DiagramId {
        self.current().id
    }

    pub fn diagrams(&self) -> &[Diagram] {
        &self.diagrams
    }

    pub fn diagram(&self, id: DiagramId) -> Option<&Diagram> {
        self.diagrams.iter().find(|d| d.id == id)
    }

    pub fn nesting_config(&self) -> &NestingConfig {
        &self.nesting
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.current().block(id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.current().connection(id)
    }

    pub fn local_to_global(&self, id: BlockId) -> Option<Point> {
        let d = self.current();
        Some(local_to_global(d, d.block(id)?))
    }

    pub fn global_to_local(&self, global: Point, parent: Option<BlockId>) -> Point {
        cbdiag_core::global_to_local(self.current(), global, parent)
    }

    pub fn global_bounds(&self, id: BlockId) -> Option<Bounds> {
        let d = self.current();
        Some(cbdiag_core::global_bounds(d, d.block(id)?))
    }

    pub fn ancestors(&self, id: BlockId) -> Vec<BlockId> {
        ancestors(self.current(), id)
    }

    pub fn descendants(&self, id: BlockId) -> Vec<BlockId> {
        descendants(self.current(), id)
    }

    pub fn is_ancestor_of(&self, ancestor: BlockId, descendant: BlockId) -> bool {
        is_ancestor_of(self.current(), ancestor, descendant)
    }

    pub fn find_potential_parent(&self, dragged: BlockId, cursor: Point) -> Option<BlockId> {
        nesting::find_potential_parent(self.current(), dragged, cursor)
    }

    pub fn min_size_for_children(&self, id: BlockId) -> Size {
        min_size_for_children(self.current(), id, &self.nesting)
    }

    /// Back-to-front paint order of the active diagram.
    pub fn render_list(&self) -> Vec<RenderEntry> {
        zorder::render_list(self.current())
    }

    // ─── Undo/redo ───────────────────────────────────────────────────────

    pub fn undo(&mut self) -> Option<&'static str> {
        let desc = self.history.undo(&mut self.diagrams[self.current])?;
        self.dirty = true;
        Some(desc)
    }

    pub fn redo(&mut self) -> Option<&'static str> {
        let desc = self.history.redo(&mut self.diagrams[self.current])?;
        self.dirty = true;
        Some(desc)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    fn run(&mut self, mut command: Command, recording: Recording) -> bool {
        let diagram = &mut self.diagrams[self.current];
        let applied = match recording {
            Recording::Record => self.history.execute(diagram, command),
            Recording::Skip => command.forward(diagram),
        };
        self.dirty |= applied;
        applied
    }

    /// Create a plain block with its top-left corner at `position`, local
    /// to `parent` (or the diagram). Returns `None` if `parent` is missing.
    pub fn create_block(
        &mut self,
        position: Point,
        parent: Option<BlockId>,
        recording: Recording,
    ) -> Option<Block> {
        let n = self.current().free_block_number();
        let mut block = Block::new(BlockId::numbered(n), position, DEFAULT_BLOCK_SIZE);
        block.label = format!("Block {n}");
        block.color = Color::for_block_number(n);
        self.insert_new_block(block, parent, recording)
    }

    /// Create a proxy block linking to `target`. Returns `None` if the
    /// target diagram or `parent` is missing.
    pub fn create_proxy_block(
        &mut self,
        position: Point,
        target: DiagramId,
        parent: Option<BlockId>,
        recording: Recording,
    ) -> Option<Block> {
        let label = self.diagram(target)?.name.clone();
        let n = self.current().free_block_number();
        let mut block = Block::new(BlockId::numbered(n), position, DEFAULT_PROXY_SIZE);
        block.kind = BlockKind::Proxy { target };
        block.label = label;
        block.color = PROXY_COLOR;
        self.insert_new_block(block, parent, recording)
    }

    /// Create a plain block centered near `center` (the viewport center
    /// when `None`) without overlapping existing top-level blocks.
    pub fn add_block(&mut self, center: Option<Point>) -> Option<Block> {
        let d = self.current();
        let center = center.unwrap_or_else(|| {
            let v = d.viewport;
            Point::new(v.x + v.width / 2.0, v.y + v.height / 2.0)
        });
        let spot = find_non_overlapping_position(d, center, DEFAULT_BLOCK_SIZE);
        let half = Vec2::new(DEFAULT_BLOCK_SIZE.width / 2.0, DEFAULT_BLOCK_SIZE.height / 2.0);
        self.create_block(spot - half, None, Recording::Record)
    }

    fn insert_new_block(
        &mut self,
        mut block: Block,
        parent: Option<BlockId>,
        recording: Recording,
    ) -> Option<Block> {
        let d = self.current();
        if parent.is_some_and(|p| !d.contains_block(p)) {
            log::debug!("create rejected: parent {parent:?} does not exist");
            return None;
        }
        block.z_index = next_z(d);
        let id = block.id;
        let before = d.next_block_id;
        let command = Command::CreateBlock {
            block,
            parent,
            counter: Counter {
                before,
                after: id.number().map_or(before, |n| before.max(n + 1)),
            },
            config: self.nesting,
            frames: Vec::new(),
        };
        if !self.run(command, recording) {
            return None;
        }
        log::debug!("created {id}");
        self.block(id).cloned()
    }

    /// Patch a block. Sizes are floored at what its children need.
    pub fn update_block(
        &mut self,
        id: BlockId,
        mut update: BlockUpdate,
        recording: Recording,
    ) -> Option<Block> {
        self.block(id)?;
        if let Some(size) = update.size {
            let floor = self.min_size_for_children(id);
            update.size = Some(Size::new(
                size.width.max(floor.width),
                size.height.max(floor.height),
            ));
        }
        if !update.is_empty() {
            let command = Command::UpdateBlock {
                id,
                update,
                inverse: None,
            };
            self.run(command, recording);
        }
        self.block(id).cloned()
    }

    /// Delete a block with all its descendants and every connection
    /// touching them.
    pub fn delete_block(&mut self, id: BlockId, recording: Recording) -> bool {
        let deleted = self.run(Command::DeleteBlock { id, removed: None }, recording);
        if deleted {
            log::debug!("deleted {id} and its subtree");
        }
        deleted
    }

    /// Raise a block (and its subtree) above everything. Returns the new z.
    pub fn bring_to_front(&mut self, id: BlockId, recording: Recording) -> Option<i64> {
        let z = front_z(self.current(), id)?;
        self.set_z_index(id, z, recording)
    }

    /// Lower a block (and its subtree) below everything, but never below
    /// its own parent. Returns the new z.
    pub fn send_to_back(&mut self, id: BlockId, recording: Recording) -> Option<i64> {
        let z = back_z(self.current(), id)?;
        self.set_z_index(id, z, recording)
    }

    fn set_z_index(&mut self, id: BlockId, z: i64, recording: Recording) -> Option<i64> {
        let update = BlockUpdate {
            z_index: Some(z),
            ..Default::default()
        };
        self.update_block(id, update, recording).map(|b| b.z_index)
    }

    /// Connect two distinct, unconnected blocks, choosing facing sides.
    pub fn create_connection(
        &mut self,
        from: BlockId,
        to: BlockId,
        recording: Recording,
    ) -> Option<Connection> {
        let d = self.current();
        if from == to {
            log::debug!("connection rejected: {from} to itself");
            return None;
        }
        let (Some(a), Some(b)) = (d.block(from), d.block(to)) else {
            log::debug!("connection rejected: missing endpoint");
            return None;
        };
        if let Some(existing) = d.connection_between(from, to) {
            log::debug!("connection rejected: {from} and {to} already joined by {existing}");
            return None;
        }
        let (from_side, to_side) = best_sides(d, a, b);
        let n = d.free_connection_number();
        let connection = Connection {
            id: ConnectionId::numbered(n),
            from,
            to,
            from_side,
            to_side,
            line_style: LineStyle::Solid,
            color: None,
            z_index: None,
        };
        let id = connection.id;
        let command = Command::CreateConnection {
            connection,
            counter: Counter {
                before: d.next_connection_id,
                after: n + 1,
            },
        };
        if !self.run(command, recording) {
            return None;
        }
        self.connection(id).cloned()
    }

    pub fn update_connection(
        &mut self,
        id: ConnectionId,
        update: ConnectionUpdate,
        recording: Recording,
    ) -> Option<Connection> {
        self.connection(id)?;
        if update != ConnectionUpdate::default() {
            let command = Command::UpdateConnection {
                id,
                update,
                inverse: None,
            };
            self.run(command, recording);
        }
        self.connection(id).cloned()
    }

    pub fn delete_connection(&mut self, id: ConnectionId, recording: Recording) -> bool {
        self.run(Command::DeleteConnection { id, removed: None }, recording)
    }

    /// Nest `child` inside `parent` without moving it on screen.
    pub fn perform_parenting(
        &mut self,
        child: BlockId,
        parent: BlockId,
        recording: Recording,
    ) -> bool {
        let command = Command::Parent {
            child,
            parent,
            config: self.nesting,
            link: None,
            frames: Vec::new(),
        };
        self.run(command, recording)
    }

    /// Lift `child` out of its parent without moving it on screen.
    pub fn perform_unparenting(&mut self, child: BlockId, recording: Recording) -> bool {
        let command = Command::Unparent {
            child,
            link: None,
            frames: Vec::new(),
        };
        self.run(command, recording)
    }

    /// Record a move that was already applied live. No-op when the block
    /// is back where it started.
    pub fn record_move(&mut self, id: BlockId, from: Point) -> bool {
        let Some(to) = self.block(id).map(|b| b.position) else {
            return false;
        };
        if to == from {
            return false;
        }
        self.history.push(Command::MoveBlock { id, from, to });
        self.dirty = true;
        true
    }

    /// Record a resize that was already applied live.
    pub fn record_resize(&mut self, id: BlockId, from: (Point, Size)) -> bool {
        let Some(to) = self.block(id).map(|b| (b.position, b.size)) else {
            return false;
        };
        if to == from {
            return false;
        }
        self.history.push(Command::ResizeBlock { id, from, to });
        self.dirty = true;
        true
    }

    // ─── Viewport ────────────────────────────────────────────────────────

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.diagrams[self.current].viewport.pan(dx, dy);
        self.dirty = true;
    }

    /// Zoom about `anchor` (fractions of the window). Returns `false` when
    /// the zoom limit is reached.
    pub fn zoom(&mut self, factor: f64, anchor: Point) -> bool {
        let zoomed = self.diagrams[self.current].viewport.zoom(factor, anchor);
        self.dirty |= zoomed;
        zoomed
    }

    // ─── Diagrams ────────────────────────────────────────────────────────

    /// Create a diagram and make it active. Defaults to `Diagram N`.
    pub fn create_diagram(&mut self, name: Option<&str>) -> DiagramId {
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Diagram {}", self.diagrams.len() + 1));
        let id = DiagramId::numbered(self.next_diagram_id);
        self.next_diagram_id += 1;
        let mut diagram = Diagram::new(id, name);
        let now = now_ms();
        diagram.created_at = now;
        diagram.updated_at = now;
        self.diagrams.push(diagram);
        self.switch_diagram(id);
        log::debug!("created diagram {id}");
        id
    }

    /// Rename a diagram; an empty name becomes `Untitled Diagram`. Proxy
    /// blocks pointing at it pick up the new name.
    pub fn rename_diagram(&mut self, id: DiagramId, name: &str) -> bool {
        let Some(diagram) = self.diagrams.iter_mut().find(|d| d.id == id) else {
            return false;
        };
        let name = if name.is_empty() {
            UNTITLED_DIAGRAM_NAME
        } else {
            name
        };
        diagram.name = name.to_owned();
        diagram.updated_at = now_ms();
        for block in self.diagrams.iter_mut().flat_map(|d| d.blocks.values_mut()) {
            if block.proxy_target() == Some(id) {
                block.label = name.to_owned();
            }
        }
        self.dirty = true;
        true
    }

    /// Delete a diagram. The last remaining diagram cannot be deleted.
    /// Deleting the active diagram activates its neighbour.
    pub fn delete_diagram(&mut self, id: DiagramId) -> bool {
        if self.diagrams.len() <= 1 {
            log::debug!("refusing to delete the last diagram");
            return false;
        }
        let Some(index) = self.diagrams.iter().position(|d| d.id == id) else {
            return false;
        };
        let was_current = index == self.current;
        let current_id = self.current_id();
        self.diagrams.remove(index);
        self.navigation.retain(|n| n.diagram != id);
        if was_current {
            self.navigation.clear();
            self.current = index.min(self.diagrams.len() - 1);
            self.history.clear();
        } else if let Some(pos) = self.diagrams.iter().position(|d| d.id == current_id) {
            self.current = pos;
        }
        self.dirty = true;
        true
    }

    /// Make a diagram active from outside the drill-down trail, which is
    /// cleared along with the undo history.
    pub fn switch_diagram(&mut self, id: DiagramId) -> bool {
        self.navigation.clear();
        self.activate(id)
    }

    fn activate(&mut self, id: DiagramId) -> bool {
        let Some(index) = self.diagrams.iter().position(|d| d.id == id) else {
            return false;
        };
        self.current = index;
        self.history.clear();
        true
    }

    /// Follow a proxy block into its target diagram.
    pub fn navigate_into(&mut self, proxy: BlockId) -> Option<DiagramId> {
        let target = self.block(proxy)?.proxy_target()?;
        self.diagram(target)?;
        let entry = NavigationEntry {
            diagram: self.current_id(),
            from_proxy: Some(proxy),
        };
        self.activate(target);
        self.navigation.push(entry);
        Some(target)
    }

    /// Go back one drill-down level, or to entry `to` of the trail.
    /// Returns the proxy block that was followed from there.
    pub fn navigate_back(&mut self, to: Option<usize>) -> Option<BlockId> {
        let entry = match to {
            Some(index) => {
                let entry = *self.navigation.get(index)?;
                self.navigation.truncate(index);
                entry
            }
            None => self.navigation.pop()?,
        };
        self.activate(entry.diagram);
        entry.from_proxy
    }

    pub fn navigation(&self) -> &[NavigationEntry] {
        &self.navigation
    }
}
