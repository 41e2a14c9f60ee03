//! Undo/Redo command stack.
//!
//! Every recorded mutation is a reversible `Command`. Commands hold plain
//! value snapshots of whatever they need to invert themselves: a removed
//! subtree with its arena slots, the inverse of a property patch, or the
//! before/after frames of every block a structural change touched.
//!
//! Drag and resize gestures update the diagram live without recording and
//! then `push` a single Move/Resize command covering start → end.

use cbdiag_core::hierarchy::descendants;
use cbdiag_core::nesting::{
    NestingConfig, auto_resize_parent, perform_parenting, perform_unparenting,
};
use cbdiag_core::zorder::assign_z_index;
use cbdiag_core::{
    Block, BlockId, BlockKind, Color, Connection, ConnectionId, Diagram, DiagramId, Frame,
    LineStyle, Point, Side, Size,
};

// ─── Patches ─────────────────────────────────────────────────────────────

/// Partial update of a block's properties. `None` fields are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockUpdate {
    pub position: Option<Point>,
    pub size: Option<Size>,
    pub label: Option<String>,
    pub color: Option<Color>,
    pub opacity: Option<f64>,
    /// Clamped above the parent; descendants shift by the same delta.
    pub z_index: Option<i64>,
    /// Retarget a proxy block. Ignored for plain blocks.
    pub target: Option<DiagramId>,
}

impl BlockUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Partial update of a connection. Double options clear with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub from_side: Option<Side>,
    pub to_side: Option<Side>,
    pub line_style: Option<LineStyle>,
    pub color: Option<Option<Color>>,
    pub z_index: Option<Option<i64>>,
}

/// Apply `update` to block `id`, returning the patch that reverts it.
pub fn apply_block_update(
    diagram: &mut Diagram,
    id: BlockId,
    update: &BlockUpdate,
) -> Option<BlockUpdate> {
    let block = diagram.block(id)?;
    let mut inverse = BlockUpdate {
        position: update.position.map(|_| block.position),
        size: update.size.map(|_| block.size),
        label: update.label.as_ref().map(|_| block.label.clone()),
        color: update.color.map(|_| block.color),
        opacity: update.opacity.map(|_| block.opacity),
        z_index: update.z_index.map(|_| block.z_index),
        target: None,
    };
    let block = diagram.block_mut(id)?;
    if let Some(position) = update.position {
        block.position = position;
    }
    if let Some(size) = update.size {
        block.size = size;
    }
    if let Some(label) = &update.label {
        block.label.clone_from(label);
    }
    if let Some(color) = update.color {
        block.color = color;
    }
    if let Some(opacity) = update.opacity {
        block.opacity = opacity.clamp(0.0, 1.0);
    }
    if let (Some(new_target), BlockKind::Proxy { target }) = (update.target, &mut block.kind) {
        inverse.target = Some(*target);
        *target = new_target;
    }
    if let Some(z) = update.z_index {
        assign_z_index(diagram, id, z);
    }
    Some(inverse)
}

/// Apply `update` to connection `id`, returning the patch that reverts it.
pub fn apply_connection_update(
    diagram: &mut Diagram,
    id: ConnectionId,
    update: &ConnectionUpdate,
) -> Option<ConnectionUpdate> {
    let conn = diagram.connection_mut(id)?;
    let inverse = ConnectionUpdate {
        from_side: update.from_side.map(|_| conn.from_side),
        to_side: update.to_side.map(|_| conn.to_side),
        line_style: update.line_style.map(|_| conn.line_style),
        color: update.color.map(|_| conn.color),
        z_index: update.z_index.map(|_| conn.z_index),
    };
    if let Some(side) = update.from_side {
        conn.from_side = side;
    }
    if let Some(side) = update.to_side {
        conn.to_side = side;
    }
    if let Some(style) = update.line_style {
        conn.line_style = style;
    }
    if let Some(color) = update.color {
        conn.color = color;
    }
    if let Some(z) = update.z_index {
        conn.z_index = z;
    }
    Some(inverse)
}

// ─── Snapshots ───────────────────────────────────────────────────────────

/// Frame of one block before and after a structural change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameChange {
    pub id: BlockId,
    pub before: Frame,
    pub after: Frame,
}

fn frames(diagram: &Diagram) -> Vec<(BlockId, Frame)> {
    diagram.blocks.values().map(|b| (b.id, b.frame())).collect()
}

fn frame_changes(diagram: &Diagram, before: Vec<(BlockId, Frame)>) -> Vec<FrameChange> {
    before
        .into_iter()
        .filter_map(|(id, before)| {
            let after = diagram.block(id)?.frame();
            (after != before).then_some(FrameChange { id, before, after })
        })
        .collect()
}

fn restore_frames(diagram: &mut Diagram, changes: &[FrameChange]) {
    for change in changes {
        if let Some(block) = diagram.block_mut(change.id) {
            block.set_frame(change.before);
        }
    }
}

/// Where a block hung in the hierarchy: its parent and its slot there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub parent: BlockId,
    pub slot: Option<usize>,
}

fn link_of(diagram: &Diagram, id: BlockId) -> Option<Link> {
    let parent = diagram.block(id)?.parent_id?;
    let slot = diagram
        .block(parent)
        .and_then(|p| p.child_ids.iter().position(|c| *c == id));
    Some(Link { parent, slot })
}

fn relink(diagram: &mut Diagram, id: BlockId, link: Option<Link>) {
    diagram.detach_child(id);
    if let Some(link) = link {
        diagram.attach_child(link.parent, id, link.slot);
    }
}

/// A deleted block, its descendants and every connection touching them,
/// each with the arena slot it occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedSubtree {
    /// Ascending by slot.
    pub blocks: Vec<(usize, Block)>,
    /// Ascending by slot.
    pub connections: Vec<(usize, Connection)>,
    pub link: Option<Link>,
}

fn remove_subtree(diagram: &mut Diagram, id: BlockId) -> Option<RemovedSubtree> {
    diagram.block(id)?;
    let link = link_of(diagram, id);
    let mut members = vec![id];
    members.extend(descendants(diagram, id));

    let mut conn_slots: Vec<(usize, ConnectionId)> = diagram
        .connections_touching(&members)
        .into_iter()
        .filter_map(|c| Some((diagram.connections.get_index_of(&c)?, c)))
        .collect();
    conn_slots.sort_unstable_by_key(|(slot, _)| *slot);
    let mut block_slots: Vec<(usize, BlockId)> = members
        .iter()
        .filter_map(|b| Some((diagram.block_slot(*b)?, *b)))
        .collect();
    block_slots.sort_unstable_by_key(|(slot, _)| *slot);

    diagram.detach_child(id);
    let connections = conn_slots
        .into_iter()
        .filter_map(|(slot, c)| Some((slot, diagram.remove_connection(c)?.1)))
        .collect();
    let blocks = block_slots
        .into_iter()
        .filter_map(|(slot, b)| Some((slot, diagram.remove_block(b)?.1)))
        .collect();

    Some(RemovedSubtree {
        blocks,
        connections,
        link,
    })
}

fn restore_subtree(diagram: &mut Diagram, primary: BlockId, removed: &RemovedSubtree) {
    // Ascending slots: every lower slot is already occupied when a block
    // is re-inserted, so each lands exactly where it was.
    for (slot, block) in &removed.blocks {
        diagram.insert_block(block.clone(), Some(*slot));
    }
    if let Some(link) = removed.link {
        diagram.attach_child(link.parent, primary, link.slot);
    }
    for (slot, conn) in &removed.connections {
        diagram.insert_connection(conn.clone(), Some(*slot));
    }
}

// ─── Commands ────────────────────────────────────────────────────────────

/// Id counter values around a create. Undo rewinds to `before` unless a
/// live id sits at or past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub before: u64,
    pub after: u64,
}

/// A reversible mutation of one diagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateBlock {
        /// As created, unlinked; `parent` re-attaches it.
        block: Block,
        parent: Option<BlockId>,
        counter: Counter,
        config: NestingConfig,
        frames: Vec<FrameChange>,
    },
    DeleteBlock {
        id: BlockId,
        removed: Option<RemovedSubtree>,
    },
    UpdateBlock {
        id: BlockId,
        update: BlockUpdate,
        inverse: Option<BlockUpdate>,
    },
    MoveBlock {
        id: BlockId,
        from: Point,
        to: Point,
    },
    ResizeBlock {
        id: BlockId,
        from: (Point, Size),
        to: (Point, Size),
    },
    CreateConnection {
        connection: Connection,
        counter: Counter,
    },
    DeleteConnection {
        id: ConnectionId,
        removed: Option<(usize, Connection)>,
    },
    UpdateConnection {
        id: ConnectionId,
        update: ConnectionUpdate,
        inverse: Option<ConnectionUpdate>,
    },
    Parent {
        child: BlockId,
        parent: BlockId,
        config: NestingConfig,
        link: Option<Link>,
        frames: Vec<FrameChange>,
    },
    Unparent {
        child: BlockId,
        link: Option<Link>,
        frames: Vec<FrameChange>,
    },
}

impl Command {
    pub fn description(&self) -> &'static str {
        match self {
            Command::CreateBlock { block, .. } if block.is_proxy() => "Create proxy block",
            Command::CreateBlock { .. } => "Create block",
            Command::DeleteBlock { .. } => "Delete block",
            Command::UpdateBlock { .. } => "Update block",
            Command::MoveBlock { .. } => "Move block",
            Command::ResizeBlock { .. } => "Resize block",
            Command::CreateConnection { .. } => "Create connection",
            Command::DeleteConnection { .. } => "Delete connection",
            Command::UpdateConnection { .. } => "Update connection",
            Command::Parent { .. } => "Nest block",
            Command::Unparent { .. } => "Unnest block",
        }
    }

    /// Apply the mutation. Returns `false` when it could not be applied
    /// (missing ids, rejected structure); the diagram is then unchanged.
    pub fn forward(&mut self, diagram: &mut Diagram) -> bool {
        match self {
            Command::CreateBlock {
                block,
                parent,
                counter,
                config,
                frames: changes,
            } => {
                if diagram.contains_block(block.id) {
                    return false;
                }
                let before = frames(diagram);
                diagram.insert_block(block.clone(), None);
                if let Some(parent) = *parent
                    && diagram.attach_child(parent, block.id, None)
                {
                    auto_resize_parent(diagram, parent, config);
                }
                diagram.next_block_id = diagram.next_block_id.max(counter.after);
                *changes = frame_changes(diagram, before);
                true
            }
            Command::DeleteBlock { id, removed } => {
                *removed = remove_subtree(diagram, *id);
                removed.is_some()
            }
            Command::UpdateBlock { id, update, inverse } => {
                *inverse = apply_block_update(diagram, *id, update);
                inverse.is_some()
            }
            Command::MoveBlock { id, to, .. } => set_frame(diagram, *id, *to, None),
            Command::ResizeBlock { id, to, .. } => set_frame(diagram, *id, to.0, Some(to.1)),
            Command::CreateConnection {
                connection,
                counter,
            } => {
                let valid = !diagram.connections.contains_key(&connection.id)
                    && connection.from != connection.to
                    && diagram.contains_block(connection.from)
                    && diagram.contains_block(connection.to)
                    && diagram.connection_between(connection.from, connection.to).is_none();
                if !valid {
                    return false;
                }
                diagram.insert_connection(connection.clone(), None);
                diagram.next_connection_id = diagram.next_connection_id.max(counter.after);
                true
            }
            Command::DeleteConnection { id, removed } => {
                *removed = diagram.remove_connection(*id);
                removed.is_some()
            }
            Command::UpdateConnection { id, update, inverse } => {
                *inverse = apply_connection_update(diagram, *id, update);
                inverse.is_some()
            }
            Command::Parent {
                child,
                parent,
                config,
                link,
                frames: changes,
            } => {
                let before = frames(diagram);
                let prior = link_of(diagram, *child);
                if !perform_parenting(diagram, *child, *parent, config) {
                    return false;
                }
                *link = prior;
                *changes = frame_changes(diagram, before);
                true
            }
            Command::Unparent {
                child,
                link,
                frames: changes,
            } => {
                let before = frames(diagram);
                let prior = link_of(diagram, *child);
                if !perform_unparenting(diagram, *child) {
                    return false;
                }
                *link = prior;
                *changes = frame_changes(diagram, before);
                true
            }
        }
    }

    /// Revert a previously applied mutation. Targets that no longer exist
    /// are skipped; returns `false` if nothing could be reverted.
    pub fn backward(&mut self, diagram: &mut Diagram) -> bool {
        match self {
            Command::CreateBlock {
                block,
                counter,
                frames: changes,
                ..
            } => {
                diagram.detach_child(block.id);
                let removed = diagram.remove_block(block.id).is_some();
                restore_frames(diagram, changes);
                diagram.rewind_block_counter(counter.before);
                removed
            }
            Command::DeleteBlock { id, removed } => match removed {
                Some(removed) => {
                    restore_subtree(diagram, *id, removed);
                    true
                }
                None => false,
            },
            Command::UpdateBlock { id, inverse, .. } => inverse
                .as_ref()
                .is_some_and(|inv| apply_block_update(diagram, *id, inv).is_some()),
            Command::MoveBlock { id, from, .. } => set_frame(diagram, *id, *from, None),
            Command::ResizeBlock { id, from, .. } => set_frame(diagram, *id, from.0, Some(from.1)),
            Command::CreateConnection {
                connection,
                counter,
            } => {
                let removed = diagram.remove_connection(connection.id).is_some();
                diagram.rewind_connection_counter(counter.before);
                removed
            }
            Command::DeleteConnection { removed, .. } => match removed {
                Some((slot, conn)) => {
                    diagram.insert_connection(conn.clone(), Some(*slot));
                    true
                }
                None => false,
            },
            Command::UpdateConnection { id, inverse, .. } => inverse
                .as_ref()
                .is_some_and(|inv| apply_connection_update(diagram, *id, inv).is_some()),
            Command::Parent {
                child,
                link,
                frames: changes,
                ..
            }
            | Command::Unparent {
                child,
                link,
                frames: changes,
            } => {
                if !diagram.contains_block(*child) {
                    return false;
                }
                relink(diagram, *child, *link);
                restore_frames(diagram, changes);
                true
            }
        }
    }
}

fn set_frame(diagram: &mut Diagram, id: BlockId, position: Point, size: Option<Size>) -> bool {
    let Some(block) = diagram.block_mut(id) else {
        return false;
    };
    block.position = position;
    if let Some(size) = size {
        block.size = size;
    }
    true
}

// ─── History ─────────────────────────────────────────────────────────────

/// Undo history settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Oldest entries are dropped beyond this many.
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_depth: 50 }
    }
}

/// Bounded undo/redo stacks over one diagram.
#[derive(Debug, Clone)]
pub struct CommandStack {
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
    /// Maximum undo depth.
    max_depth: usize,
}

impl Default for CommandStack {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl CommandStack {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            undo_stack: Vec::with_capacity(config.max_depth),
            redo_stack: Vec::new(),
            max_depth: config.max_depth,
        }
    }

    /// Run a command and record it. Rejected commands are not recorded.
    pub fn execute(&mut self, diagram: &mut Diagram, mut command: Command) -> bool {
        if !command.forward(diagram) {
            log::debug!("{} rejected", command.description());
            return false;
        }
        self.push(command);
        true
    }

    /// Record a command whose effect is already applied.
    pub fn push(&mut self, command: Command) {
        log::debug!("recorded: {}", command.description());
        self.undo_stack.push(command);
        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
        // Clear redo stack on new action
        self.redo_stack.clear();
    }

    /// Undo the last command, returning its description.
    pub fn undo(&mut self, diagram: &mut Diagram) -> Option<&'static str> {
        let mut cmd = self.undo_stack.pop()?;
        if !cmd.backward(diagram) {
            log::debug!("undo of {} found nothing to revert", cmd.description());
        }
        let desc = cmd.description();
        self.redo_stack.push(cmd);
        Some(desc)
    }

    /// Redo the last undone command, returning its description.
    pub fn redo(&mut self, diagram: &mut Diagram) -> Option<&'static str> {
        let mut cmd = self.redo_stack.pop()?;
        if !cmd.forward(diagram) {
            log::debug!("redo of {} found nothing to apply", cmd.description());
        }
        let desc = cmd.description();
        self.undo_stack.push(cmd);
        Some(desc)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }
}
