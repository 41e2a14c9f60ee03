pub mod commands;
pub mod interaction;
pub mod shortcuts;
pub mod workspace;

pub use commands::{BlockUpdate, Command, CommandStack, ConnectionUpdate, HistoryConfig};
pub use interaction::{
    ConnectTool, Corner, DragFeedback, DragGesture, DragOutcome, HoldTimer, ResizeGesture,
};
pub use shortcuts::{ShortcutAction, ShortcutMap};
pub use workspace::{NavigationEntry, Recording, Workspace};
