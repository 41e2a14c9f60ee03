pub mod geometry;
pub mod hierarchy;
pub mod id;
pub mod model;
pub mod nesting;
pub mod snapshot;
pub mod zorder;

pub use geometry::{global_bounds, global_to_local, local_to_global};
pub use hierarchy::{InvariantViolation, check_invariants};
pub use id::{BlockId, ConnectionId, DiagramId};
pub use model::*;
pub use nesting::NestingConfig;
pub use snapshot::{DiagramRecord, LoadedStore, SnapshotError, StoreRecord};
pub use zorder::{RenderEntry, RenderItem, render_list};

// Re-export kurbo geometry so downstream crates share one version
pub use kurbo::{Point, Size, Vec2};
