//! Serializable snapshots of diagrams and the multi-diagram store.
//!
//! Records mirror the persisted camelCase shape. Loading is lenient: older
//! store versions and the legacy single-diagram shape are upgraded, missing
//! nesting and z-order fields are backfilled, and inconsistent links are
//! repaired rather than rejected. Only input that is not a store at all is
//! an error.

use crate::geometry::best_sides;
use crate::hierarchy::debug_audit;
use crate::id::{BlockId, ConnectionId, DiagramId};
use crate::model::{
    BLOCK_PALETTE, Block, BlockKind, Color, Connection, DEFAULT_BLOCK_SIZE, Diagram, LineStyle,
    Side, Viewport,
};
use crate::zorder;
use indexmap::IndexMap;
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Store format written by [`encode_json`] and [`encode_msgpack`].
pub const STORE_VERSION: u32 = 2;

/// Name given to a diagram recovered from the legacy single-diagram shape.
pub const MIGRATED_DIAGRAM_NAME: &str = "Migrated Diagram";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed MessagePack snapshot: {0}")]
    MessagePack(String),
    #[error("unsupported store version {0}")]
    UnsupportedVersion(u64),
    #[error("input is neither a diagram store nor a legacy diagram")]
    UnrecognizedShape,
}

impl From<rmp_serde::decode::Error> for SnapshotError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SnapshotError::MessagePack(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SnapshotError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SnapshotError::MessagePack(e.to_string())
    }
}

// ─── Records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    #[default]
    Block,
    Proxy,
}

fn default_width() -> f64 {
    DEFAULT_BLOCK_SIZE.width
}

fn default_height() -> f64 {
    DEFAULT_BLOCK_SIZE.height
}

fn first_counter() -> u64 {
    1
}

/// Persisted block. Positions are local to the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub id: BlockId,
    #[serde(rename = "type", default)]
    pub block_type: BlockType,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub opacity: f64,
    /// Absent in stores written before z-ordering existed.
    #[serde(default)]
    pub z_index: Option<i64>,
    #[serde(default, alias = "parentId")]
    pub parent_block_id: Option<BlockId>,
    #[serde(default, alias = "childIds")]
    pub child_block_ids: Vec<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_diagram_id: Option<DiagramId>,
    /// Older name of `linkedDiagramId`, still written for readers that
    /// only know this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_diagram_id: Option<DiagramId>,
}

/// Persisted connection. Either endpoint naming is accepted on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<BlockId>,
    #[serde(default)]
    pub from_side: Option<Side>,
    #[serde(default)]
    pub to_side: Option<Side>,
    #[serde(default)]
    pub line_style: LineStyle,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub z_index: Option<i64>,
}

impl ConnectionRecord {
    fn endpoints(&self) -> Option<(BlockId, BlockId)> {
        Some((self.from_block_id.or(self.from)?, self.to_block_id.or(self.to)?))
    }
}

/// Persisted diagram: the plain-data form of a [`Diagram`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramRecord {
    pub id: DiagramId,
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<BlockRecord>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
    #[serde(default = "first_counter")]
    pub next_block_id: u64,
    #[serde(default = "first_counter")]
    pub next_connection_id: u64,
    #[serde(default)]
    pub view_box: Viewport,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

/// Persisted multi-diagram store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRecord {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub diagrams: Vec<DiagramRecord>,
    #[serde(default)]
    pub current_diagram_id: Option<DiagramId>,
}

/// Shape saved before multiple diagrams existed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    #[serde(default)]
    blocks: Vec<BlockRecord>,
    #[serde(default)]
    connections: Vec<ConnectionRecord>,
    #[serde(default = "first_counter")]
    next_block_id: u64,
    #[serde(default = "first_counter")]
    next_connection_id: u64,
    #[serde(default)]
    view_box: Viewport,
}

// ─── Capture ─────────────────────────────────────────────────────────────

impl BlockRecord {
    pub fn capture(block: &Block) -> Self {
        let target = block.proxy_target();
        Self {
            id: block.id,
            block_type: if target.is_some() {
                BlockType::Proxy
            } else {
                BlockType::Block
            },
            x: block.position.x,
            y: block.position.y,
            width: block.size.width,
            height: block.size.height,
            label: block.label.clone(),
            color: Some(block.color.to_hex()),
            opacity: block.opacity,
            z_index: Some(block.z_index),
            parent_block_id: block.parent_id,
            child_block_ids: block.child_ids.to_vec(),
            linked_diagram_id: target,
            target_diagram_id: target,
        }
    }
}

impl ConnectionRecord {
    pub fn capture(conn: &Connection) -> Self {
        Self {
            id: conn.id,
            from_block_id: Some(conn.from),
            to_block_id: Some(conn.to),
            from: None,
            to: None,
            from_side: Some(conn.from_side),
            to_side: Some(conn.to_side),
            line_style: conn.line_style,
            color: conn.color.map(|c| c.to_hex()),
            z_index: conn.z_index,
        }
    }
}

impl DiagramRecord {
    /// Snapshot the full diagram, preserving arena order.
    pub fn capture(diagram: &Diagram) -> Self {
        Self {
            id: diagram.id,
            name: diagram.name.clone(),
            blocks: diagram.blocks.values().map(BlockRecord::capture).collect(),
            connections: diagram
                .connections
                .values()
                .map(ConnectionRecord::capture)
                .collect(),
            next_block_id: diagram.next_block_id,
            next_connection_id: diagram.next_connection_id,
            view_box: diagram.viewport,
            created_at: diagram.created_at,
            updated_at: diagram.updated_at,
        }
    }

    /// Rebuild a live diagram, repairing whatever the record gets wrong.
    ///
    /// Missing z-indices become the block's insertion index. Parent links
    /// to missing blocks or that close a cycle are dropped, `child_ids` is
    /// rebuilt from `parent_id` (keeping the recorded order where it
    /// agrees), children buried below their parent are lifted, and
    /// connections with a missing or repeated endpoint pair are discarded.
    pub fn into_diagram(self) -> Diagram {
        let mut diagram = Diagram::new(self.id, self.name);
        diagram.viewport = self.view_box;
        diagram.created_at = self.created_at;
        diagram.updated_at = self.updated_at;

        let mut recorded_children: IndexMap<BlockId, Vec<BlockId>> = IndexMap::new();
        for (index, mut rec) in self.blocks.into_iter().enumerate() {
            if diagram.contains_block(rec.id) {
                log::warn!("diagram {}: duplicate block {} dropped", diagram.id, rec.id);
                continue;
            }
            recorded_children.insert(rec.id, std::mem::take(&mut rec.child_block_ids));
            diagram.insert_block(block_from_record(rec, index), None);
        }

        repair_parent_links(&mut diagram);
        rebuild_child_lists(&mut diagram, &recorded_children);
        let lifted = zorder::normalize(&mut diagram);
        if lifted > 0 {
            log::warn!("diagram {}: lifted {lifted} block(s) above their parent", diagram.id);
        }

        for rec in self.connections {
            if let Some(conn) = connection_from_record(&diagram, rec) {
                diagram.insert_connection(conn, None);
            }
        }

        let max_block = diagram.blocks.keys().filter_map(BlockId::number).max();
        let max_conn = diagram.connections.keys().filter_map(ConnectionId::number).max();
        diagram.next_block_id = self.next_block_id.max(max_block.map_or(1, |n| n + 1));
        diagram.next_connection_id = self.next_connection_id.max(max_conn.map_or(1, |n| n + 1));

        debug_audit(&diagram);
        diagram
    }
}

impl StoreRecord {
    pub fn capture<'a>(
        diagrams: impl IntoIterator<Item = &'a Diagram>,
        current: Option<DiagramId>,
    ) -> Self {
        Self {
            version: STORE_VERSION,
            diagrams: diagrams.into_iter().map(DiagramRecord::capture).collect(),
            current_diagram_id: current,
        }
    }
}

fn parse_color(raw: Option<&str>, context: impl fmt::Display) -> Option<Color> {
    let raw = raw?;
    let color = Color::from_hex(raw);
    if color.is_none() {
        log::warn!("{context}: unreadable color {raw:?}, using default");
    }
    color
}

fn block_from_record(rec: BlockRecord, index: usize) -> Block {
    let target = rec.linked_diagram_id.or(rec.target_diagram_id);
    let kind = match (rec.block_type, target) {
        (_, Some(target)) => BlockKind::Proxy { target },
        (BlockType::Proxy, None) => {
            log::warn!("proxy block {} has no target; loading as plain block", rec.id);
            BlockKind::Plain
        }
        (BlockType::Block, None) => BlockKind::Plain,
    };
    let mut block = Block::new(
        rec.id,
        Point::new(rec.x, rec.y),
        Size::new(rec.width, rec.height),
    );
    block.kind = kind;
    block.z_index = rec.z_index.unwrap_or(index as i64);
    block.parent_id = rec.parent_block_id;
    block.label = rec.label;
    block.color = parse_color(rec.color.as_deref(), rec.id).unwrap_or(BLOCK_PALETTE[0]);
    block.opacity = rec.opacity;
    block
}

fn repair_parent_links(diagram: &mut Diagram) {
    let ids: Vec<BlockId> = diagram.blocks.keys().copied().collect();
    for &id in &ids {
        let parent = diagram.block(id).and_then(|b| b.parent_id);
        if parent.is_some_and(|p| p == id || !diagram.contains_block(p)) {
            log::warn!("diagram {}: block {id} has a dangling parent", diagram.id);
            if let Some(b) = diagram.block_mut(id) {
                b.parent_id = None;
            }
        }
    }
    for &id in &ids {
        let mut seen = HashSet::new();
        let mut cursor = diagram.block(id).and_then(|b| b.parent_id);
        while let Some(p) = cursor {
            if p == id {
                log::warn!("diagram {}: parent cycle through {id} broken", diagram.id);
                if let Some(b) = diagram.block_mut(id) {
                    b.parent_id = None;
                }
                break;
            }
            if !seen.insert(p) {
                break;
            }
            cursor = diagram.block(p).and_then(|b| b.parent_id);
        }
    }
}

fn rebuild_child_lists(diagram: &mut Diagram, recorded: &IndexMap<BlockId, Vec<BlockId>>) {
    let links: Vec<(BlockId, BlockId)> = diagram
        .blocks
        .values()
        .filter_map(|b| Some((b.parent_id?, b.id)))
        .collect();

    let mut lists: IndexMap<BlockId, SmallVec<[BlockId; 4]>> = IndexMap::new();
    for (&parent, children) in recorded {
        let list = lists.entry(parent).or_default();
        for &child in children {
            let agrees = diagram.block(child).and_then(|c| c.parent_id) == Some(parent);
            if agrees && !list.contains(&child) {
                list.push(child);
            }
        }
    }
    for (parent, child) in links {
        let list = lists.entry(parent).or_default();
        if !list.contains(&child) {
            list.push(child);
        }
    }

    for block in diagram.blocks.values_mut() {
        block.child_ids = lists.swap_remove(&block.id).unwrap_or_default();
    }
}

fn connection_from_record(diagram: &Diagram, rec: ConnectionRecord) -> Option<Connection> {
    let Some((from, to)) = rec.endpoints() else {
        log::warn!("connection {} has no endpoints; dropped", rec.id);
        return None;
    };
    let (Some(a), Some(b)) = (diagram.block(from), diagram.block(to)) else {
        log::warn!("connection {} references a missing block; dropped", rec.id);
        return None;
    };
    if from == to
        || diagram.connection_between(from, to).is_some()
        || diagram.connections.contains_key(&rec.id)
    {
        log::warn!("connection {} is a self-loop or duplicate; dropped", rec.id);
        return None;
    }
    let (best_from, best_to) = best_sides(diagram, a, b);
    let color = parse_color(rec.color.as_deref(), rec.id);
    Some(Connection {
        id: rec.id,
        from,
        to,
        from_side: rec.from_side.unwrap_or(best_from),
        to_side: rec.to_side.unwrap_or(best_to),
        line_style: rec.line_style,
        color,
        z_index: rec.z_index,
    })
}

// ─── Codec ───────────────────────────────────────────────────────────────

/// Result of decoding a store.
#[derive(Debug, Clone)]
pub struct LoadedStore {
    pub diagrams: Vec<Diagram>,
    /// Active diagram: the saved one if it still exists, else the first.
    pub current: Option<DiagramId>,
    /// Next free `diagram-N` counter value.
    pub next_diagram_id: u64,
    /// Set when the input was an older shape and should be re-saved.
    pub upgraded: bool,
}

impl LoadedStore {
    fn from_records(
        records: Vec<DiagramRecord>,
        current: Option<DiagramId>,
        upgraded: bool,
    ) -> Self {
        let diagrams: Vec<Diagram> = records.into_iter().map(DiagramRecord::into_diagram).collect();
        let current = current
            .filter(|id| diagrams.iter().any(|d| d.id == *id))
            .or_else(|| diagrams.first().map(|d| d.id));
        let next_diagram_id = diagrams
            .iter()
            .filter_map(|d| d.id.number())
            .max()
            .map_or(1, |n| n + 1);
        Self {
            diagrams,
            current,
            next_diagram_id,
            upgraded,
        }
    }
}

/// Upgrade a decoded store to the current version.
fn load_store(mut store: StoreRecord) -> Result<LoadedStore, SnapshotError> {
    match store.version {
        2 => Ok(LoadedStore::from_records(store.diagrams, store.current_diagram_id, false)),
        1 => {
            log::warn!("upgrading version 1 store with {} diagram(s)", store.diagrams.len());
            for diagram in &mut store.diagrams {
                for (index, block) in diagram.blocks.iter_mut().enumerate() {
                    block.z_index.get_or_insert(index as i64);
                }
            }
            Ok(LoadedStore::from_records(store.diagrams, store.current_diagram_id, true))
        }
        other => Err(SnapshotError::UnsupportedVersion(other.into())),
    }
}

fn load_legacy(legacy: LegacyRecord) -> LoadedStore {
    log::warn!("migrating legacy single-diagram save");
    let record = DiagramRecord {
        id: DiagramId::numbered(1),
        name: MIGRATED_DIAGRAM_NAME.to_owned(),
        blocks: legacy.blocks,
        connections: legacy.connections,
        next_block_id: legacy.next_block_id,
        next_connection_id: legacy.next_connection_id,
        view_box: legacy.view_box,
        created_at: 0,
        updated_at: 0,
    };
    LoadedStore::from_records(vec![record], None, true)
}

pub fn encode_json(store: &StoreRecord) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string(store)?)
}

/// Decode any known JSON store shape.
pub fn decode_json(text: &str) -> Result<LoadedStore, SnapshotError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let Some(object) = value.as_object() else {
        return Err(SnapshotError::UnrecognizedShape);
    };
    if object.contains_key("diagrams") {
        let version = match object.get("version") {
            None => 1,
            Some(v) => v.as_u64().ok_or(SnapshotError::UnrecognizedShape)?,
        };
        if version != 1 && version != u64::from(STORE_VERSION) {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let mut store: StoreRecord = serde_json::from_value(value)?;
        store.version = version as u32;
        load_store(store)
    } else if object.contains_key("blocks") {
        let legacy: LegacyRecord = serde_json::from_value(value)?;
        Ok(load_legacy(legacy))
    } else {
        Err(SnapshotError::UnrecognizedShape)
    }
}

pub fn encode_msgpack(store: &StoreRecord) -> Result<Vec<u8>, SnapshotError> {
    Ok(rmp_serde::to_vec_named(store)?)
}

pub fn decode_msgpack(bytes: &[u8]) -> Result<LoadedStore, SnapshotError> {
    let store: StoreRecord = rmp_serde::from_slice(bytes)?;
    load_store(store)
}
