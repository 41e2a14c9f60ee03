//! Core data model for block diagrams.
//!
//! A [`Diagram`] is an arena of [`Block`] and [`Connection`] values keyed by
//! id. Blocks may nest: `parent_id` / `child_ids` are plain id references
//! into the same arena, never pointers, so the parent ↔ child back-links
//! carry no ownership. Positions are **local** to the parent block (or to
//! the diagram when the block is top-level); see [`crate::geometry`] for
//! the global projection.

use crate::id::{BlockId, ConnectionId, DiagramId};
use indexmap::IndexMap;
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Default size of a plain block.
pub const DEFAULT_BLOCK_SIZE: Size = Size::new(120.0, 60.0);

/// Default size of a proxy block.
pub const DEFAULT_PROXY_SIZE: Size = Size::new(140.0, 70.0);

/// Palette cycled through by newly created plain blocks.
pub const BLOCK_PALETTE: [Color; 10] = [
    Color::rgb8(0x4a, 0x90, 0xd9),
    Color::rgb8(0x50, 0xc8, 0x78),
    Color::rgb8(0xf5, 0xa6, 0x23),
    Color::rgb8(0x9b, 0x59, 0xb6),
    Color::rgb8(0xe7, 0x4c, 0x3c),
    Color::rgb8(0x1a, 0xbc, 0x9c),
    Color::rgb8(0xf3, 0x9c, 0x12),
    Color::rgb8(0x34, 0x98, 0xdb),
    Color::rgb8(0xe9, 0x1e, 0x63),
    Color::rgb8(0x00, 0xbc, 0xd4),
];

/// Fill used for proxy blocks.
pub const PROXY_COLOR: Color = Color::rgb8(0x9b, 0x59, 0xb6);

// ─── Colors ──────────────────────────────────────────────────────────────

/// RGBA color, 8 bits per channel. Serialized as a hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Helper to parse a single hex digit.
fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl Color {
    pub const fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA`. The `#` is optional.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let bytes = hex.as_bytes();
        let pair =
            |i: usize| -> Option<u8> { Some(hex_val(bytes[i])? << 4 | hex_val(bytes[i + 1])?) };

        match bytes.len() {
            3 => Some(Self::rgb8(
                hex_val(bytes[0])? * 17,
                hex_val(bytes[1])? * 17,
                hex_val(bytes[2])? * 17,
            )),
            6 => Some(Self::rgb8(pair(0)?, pair(2)?, pair(4)?)),
            8 => Some(Self {
                a: pair(6)?,
                ..Self::rgb8(pair(0)?, pair(2)?, pair(4)?)
            }),
            _ => None,
        }
    }

    /// Emit as lowercase `#rrggbb`, or `#rrggbbaa` when not fully opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    /// Palette entry for the n-th created block.
    pub fn for_block_number(n: u64) -> Self {
        BLOCK_PALETTE[(n % BLOCK_PALETTE.len() as u64) as usize]
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::from_hex(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid color {s:?}")))
    }
}

// ─── Bounds ──────────────────────────────────────────────────────────────

/// Axis-aligned box in diagram-global coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(origin: Point, size: Size) -> Self {
        Self {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Inclusive containment: points on the edge are inside.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Overlap test. Touching edges count as overlapping.
    pub fn overlaps(&self, other: &Bounds) -> bool {
        !(self.right() < other.x
            || self.x > other.right()
            || self.bottom() < other.y
            || self.y > other.bottom())
    }
}

// ─── Viewport ────────────────────────────────────────────────────────────

/// Smallest viewport width reachable by zooming in.
pub const MIN_VIEWPORT_WIDTH: f64 = 200.0;
/// Largest viewport width reachable by zooming out.
pub const MAX_VIEWPORT_WIDTH: f64 = 5000.0;

/// Pan/zoom state: the visible window onto diagram-global space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1200.0,
            height: 800.0,
        }
    }
}

impl Viewport {
    /// Shift the visible window by a diagram-space delta.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.x -= dx;
        self.y -= dy;
    }

    /// Scale the window by `factor` keeping the point at `anchor` fixed.
    ///
    /// `anchor` is given as a fraction of the window (0..1 on each axis).
    /// Returns `false` and leaves the viewport untouched when the result
    /// would leave the allowed width range.
    pub fn zoom(&mut self, factor: f64, anchor: Point) -> bool {
        let width = self.width * factor;
        if !(MIN_VIEWPORT_WIDTH..=MAX_VIEWPORT_WIDTH).contains(&width) {
            return false;
        }
        let height = self.height * factor;
        let fixed_x = self.x + anchor.x * self.width;
        let fixed_y = self.y + anchor.y * self.height;
        self.x = fixed_x - anchor.x * width;
        self.y = fixed_y - anchor.y * height;
        self.width = width;
        self.height = height;
        true
    }
}

// ─── Blocks ──────────────────────────────────────────────────────────────

/// What a block is, beyond its rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Plain,
    /// Links to another diagram for drill-down navigation.
    Proxy { target: DiagramId },
}

/// Position, size and stacking of a block: everything the nesting engine
/// may rewrite as a side effect of a structural change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub position: Point,
    pub size: Size,
    pub z_index: i64,
}

/// A positioned, sized rectangle in a diagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Local to the parent block, or diagram-global when top-level.
    pub position: Point,
    pub size: Size,
    pub z_index: i64,
    pub parent_id: Option<BlockId>,
    /// Inverse of `parent_id`, in attachment order.
    pub child_ids: SmallVec<[BlockId; 4]>,
    pub label: String,
    pub color: Color,
    /// Transparency amount: 0 is opaque, 1 fully transparent.
    pub opacity: f64,
}

impl Block {
    pub fn new(id: BlockId, position: Point, size: Size) -> Self {
        Self {
            id,
            kind: BlockKind::Plain,
            position,
            size,
            z_index: 0,
            parent_id: None,
            child_ids: SmallVec::new(),
            label: String::new(),
            color: BLOCK_PALETTE[0],
            opacity: 0.0,
        }
    }

    pub fn frame(&self) -> Frame {
        Frame {
            position: self.position,
            size: self.size,
            z_index: self.z_index,
        }
    }

    pub fn set_frame(&mut self, frame: Frame) {
        self.position = frame.position;
        self.size = frame.size;
        self.z_index = frame.z_index;
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, BlockKind::Proxy { .. })
    }

    /// Target diagram of a proxy block.
    pub fn proxy_target(&self) -> Option<DiagramId> {
        match self.kind {
            BlockKind::Proxy { target } => Some(target),
            BlockKind::Plain => None,
        }
    }

    /// Bounds in the parent's coordinate space.
    pub fn local_bounds(&self) -> Bounds {
        Bounds::new(self.position, self.size)
    }
}

// ─── Connections ─────────────────────────────────────────────────────────

/// Side of a block an edge attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

/// Stroke pattern of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// A directed edge between two distinct blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: BlockId,
    pub to: BlockId,
    pub from_side: Side,
    pub to_side: Side,
    pub line_style: LineStyle,
    /// `None` means the view's default stroke color.
    pub color: Option<Color>,
    /// Explicit stacking override; derived from the endpoints when `None`.
    pub z_index: Option<i64>,
}

impl Connection {
    pub fn touches(&self, block: BlockId) -> bool {
        self.from == block || self.to == block
    }

    /// Whether this edge joins `a` and `b`, in either direction.
    pub fn joins(&self, a: BlockId, b: BlockId) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }
}

// ─── Diagram ─────────────────────────────────────────────────────────────

/// A named container of blocks and connections. The live scene.
///
/// Both collections are arenas keyed by id that also remember insertion
/// order; the order is the last-resort render tie-break and is preserved
/// across delete/undo by slot-aware insertion.
#[derive(Debug, Clone)]
pub struct Diagram {
    pub id: DiagramId,
    pub name: String,
    pub blocks: IndexMap<BlockId, Block>,
    pub connections: IndexMap<ConnectionId, Connection>,
    /// Counter for the next `block-N` id.
    pub next_block_id: u64,
    /// Counter for the next `conn-N` id.
    pub next_connection_id: u64,
    pub viewport: Viewport,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub updated_at: u64,
}

impl Diagram {
    #[must_use]
    pub fn new(id: DiagramId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            blocks: IndexMap::new(),
            connections: IndexMap::new(),
            next_block_id: 1,
            next_connection_id: 1,
            viewport: Viewport::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Look up a block by id.
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Look up a block mutably by id.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Insertion slot of a block.
    pub fn block_slot(&self, id: BlockId) -> Option<usize> {
        self.blocks.get_index_of(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Mint the next `block-N` id and advance the counter.
    pub fn allocate_block_id(&mut self) -> BlockId {
        let id = BlockId::numbered(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    /// Mint the next `conn-N` id and advance the counter.
    pub fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId::numbered(self.next_connection_id);
        self.next_connection_id += 1;
        id
    }

    /// First `block-N` number at or after the counter not already in use.
    pub fn free_block_number(&self) -> u64 {
        (self.next_block_id..)
            .find(|&n| !self.blocks.contains_key(&BlockId::numbered(n)))
            .unwrap_or(self.next_block_id)
    }

    /// First `conn-N` number at or after the counter not already in use.
    pub fn free_connection_number(&self) -> u64 {
        (self.next_connection_id..)
            .find(|&n| !self.connections.contains_key(&ConnectionId::numbered(n)))
            .unwrap_or(self.next_connection_id)
    }

    /// Wind the block counter back to `to`, but never onto a live id.
    pub fn rewind_block_counter(&mut self, to: u64) {
        let live = self.blocks.keys().filter_map(BlockId::number).max();
        self.next_block_id = live.map_or(to, |n| to.max(n + 1));
    }

    /// Wind the connection counter back to `to`, but never onto a live id.
    pub fn rewind_connection_counter(&mut self, to: u64) {
        let live = self.connections.keys().filter_map(ConnectionId::number).max();
        self.next_connection_id = live.map_or(to, |n| to.max(n + 1));
    }

    /// Insert a block at `slot` (clamped), or at the end. A block with the
    /// same id is replaced.
    ///
    /// Raw arena operation: parent/child links are not touched.
    pub fn insert_block(&mut self, block: Block, slot: Option<usize>) {
        self.blocks.shift_remove(&block.id);
        let slot = slot.unwrap_or(self.blocks.len()).min(self.blocks.len());
        self.blocks.shift_insert(slot, block.id, block);
    }

    /// Remove a block, returning its former slot.
    ///
    /// Raw arena operation: parent/child links are not touched.
    pub fn remove_block(&mut self, id: BlockId) -> Option<(usize, Block)> {
        self.blocks
            .shift_remove_full(&id)
            .map(|(slot, _, block)| (slot, block))
    }

    /// Insert a connection at `slot` (clamped), or at the end. A connection
    /// with the same id is replaced.
    pub fn insert_connection(&mut self, connection: Connection, slot: Option<usize>) {
        self.connections.shift_remove(&connection.id);
        let slot = slot
            .unwrap_or(self.connections.len())
            .min(self.connections.len());
        self.connections
            .shift_insert(slot, connection.id, connection);
    }

    /// Remove a connection, returning its former slot.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<(usize, Connection)> {
        self.connections
            .shift_remove_full(&id)
            .map(|(slot, _, conn)| (slot, conn))
    }

    /// The connection joining `a` and `b` in either direction, if any.
    pub fn connection_between(&self, a: BlockId, b: BlockId) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|c| c.joins(a, b))
            .map(|c| c.id)
    }

    /// Ids of all connections with an endpoint in `blocks`, in slot order.
    pub fn connections_touching(&self, blocks: &[BlockId]) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| blocks.iter().any(|b| c.touches(*b)))
            .map(|c| c.id)
            .collect()
    }

    /// Link `child` under `parent` at `slot` in its `child_ids` (or append).
    ///
    /// Idempotent: an existing link is left where it is. Returns `false`
    /// if either block is missing.
    pub fn attach_child(&mut self, parent: BlockId, child: BlockId, slot: Option<usize>) -> bool {
        if !self.contains_block(child) {
            return false;
        }
        let Some(p) = self.blocks.get_mut(&parent) else {
            return false;
        };
        if !p.child_ids.contains(&child) {
            let slot = slot.unwrap_or(p.child_ids.len()).min(p.child_ids.len());
            p.child_ids.insert(slot, child);
        }
        if let Some(c) = self.blocks.get_mut(&child) {
            c.parent_id = Some(parent);
        }
        true
    }

    /// Unlink `child` from its parent. Returns the parent and the slot the
    /// child occupied in the parent's `child_ids`.
    pub fn detach_child(&mut self, child: BlockId) -> Option<(BlockId, Option<usize>)> {
        let parent = self.blocks.get_mut(&child)?.parent_id.take()?;
        let slot = self.blocks.get_mut(&parent).and_then(|p| {
            let slot = p.child_ids.iter().position(|id| *id == child)?;
            p.child_ids.remove(slot);
            Some(slot)
        });
        Some((parent, slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagram_with(ids: &[&str]) -> Diagram {
        let mut d = Diagram::new(DiagramId::numbered(1), "test");
        for id in ids {
            d.insert_block(
                Block::new(BlockId::intern(id), Point::ZERO, DEFAULT_BLOCK_SIZE),
                None,
            );
        }
        d
    }

    #[test]
    fn color_hex_roundtrip() {
        let c = Color::from_hex("#4A90D9").unwrap();
        assert_eq!(c, Color::rgb8(0x4a, 0x90, 0xd9));
        assert_eq!(c.to_hex(), "#4a90d9");

        let c2 = Color::from_hex("ff000080").unwrap();
        assert_eq!(c2.a, 0x80);
        assert_eq!(c2.to_hex(), "#ff000080");

        assert_eq!(Color::from_hex("#fff"), Some(Color::rgb8(255, 255, 255)));
        assert_eq!(Color::from_hex("#12345"), None);
        assert_eq!(Color::from_hex("#zzzzzz"), None);
    }

    #[test]
    fn bounds_edges_count_as_inside_and_overlapping() {
        let a = Bounds::new(Point::new(0.0, 0.0), Size::new(10.0, 10.0));
        let b = Bounds::new(Point::new(10.0, 0.0), Size::new(10.0, 10.0));
        let c = Bounds::new(Point::new(10.5, 0.0), Size::new(10.0, 10.0));
        assert!(a.contains(Point::new(10.0, 10.0)));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn slot_insert_restores_order() {
        let mut d = diagram_with(&["a", "b", "c"]);
        let (slot, b) = d.remove_block(BlockId::intern("b")).unwrap();
        assert_eq!(slot, 1);
        d.insert_block(b, Some(slot));
        let order: Vec<_> = d.blocks.keys().map(|k| k.as_str().to_owned()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn attach_is_idempotent_and_detach_reports_slot() {
        let mut d = diagram_with(&["p", "x", "y"]);
        let (p, x, y) = (BlockId::intern("p"), BlockId::intern("x"), BlockId::intern("y"));
        assert!(d.attach_child(p, x, None));
        assert!(d.attach_child(p, y, None));
        assert!(d.attach_child(p, x, None));
        assert_eq!(d.block(p).unwrap().child_ids.as_slice(), &[x, y]);

        assert_eq!(d.detach_child(x), Some((p, Some(0))));
        assert_eq!(d.block(x).unwrap().parent_id, None);
        assert_eq!(d.block(p).unwrap().child_ids.as_slice(), &[y]);
        assert_eq!(d.detach_child(x), None);
    }

    #[test]
    fn connection_between_ignores_direction() {
        let mut d = diagram_with(&["a", "b"]);
        let (a, b) = (BlockId::intern("a"), BlockId::intern("b"));
        let id = d.allocate_connection_id();
        d.insert_connection(
            Connection {
                id,
                from: a,
                to: b,
                from_side: Side::Right,
                to_side: Side::Left,
                line_style: LineStyle::Solid,
                color: None,
                z_index: None,
            },
            None,
        );
        assert_eq!(d.connection_between(b, a), Some(id));
        assert_eq!(d.connections_touching(&[a]), vec![id]);
    }

    #[test]
    fn reinserting_an_existing_id_replaces_it() {
        let mut d = diagram_with(&["a", "b"]);
        let a = BlockId::intern("a");
        d.insert_block(Block::new(a, Point::new(5.0, 5.0), DEFAULT_BLOCK_SIZE), None);
        let order: Vec<_> = d.blocks.keys().map(|k| k.as_str().to_owned()).collect();
        assert_eq!(order, ["b", "a"]);
        assert_eq!(d.block(a).unwrap().position, Point::new(5.0, 5.0));
    }

    #[test]
    fn counter_rewind_stops_past_live_ids() {
        let mut d = diagram_with(&["block-1", "block-2", "other"]);
        d.next_block_id = 3;
        d.rewind_block_counter(2);
        assert_eq!(d.next_block_id, 3);
        d.rewind_block_counter(5);
        assert_eq!(d.next_block_id, 5);

        d.next_block_id = 2;
        assert_eq!(d.free_block_number(), 3);
        d.next_connection_id = 4;
        d.rewind_connection_counter(1);
        assert_eq!(d.next_connection_id, 1);
    }

    #[test]
    fn zoom_respects_width_limits() {
        let mut vp = Viewport::default();
        assert!(vp.zoom(0.5, Point::new(0.5, 0.5)));
        assert_eq!(vp.width, 600.0);
        assert_eq!(vp.x, 300.0);
        assert!(!vp.zoom(0.1, Point::new(0.5, 0.5)));
        assert_eq!(vp.width, 600.0);
    }
}
