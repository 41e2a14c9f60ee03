//! Keyboard shortcut mapping.
//!
//! Maps key + modifier combos to semantic `ShortcutAction`s, and applies
//! the ones that only touch the workspace. Selection and mode changes are
//! left to the view.

use crate::workspace::{Recording, Workspace, ZOOM_IN_FACTOR, ZOOM_OUT_FACTOR};
use cbdiag_core::{BlockId, Point};

/// Actions that keyboard shortcuts can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    // ── Edit ──
    Undo,
    Redo,
    /// Delete the selected block or connection.
    Delete,
    /// Place a new block near the middle of the view.
    AddBlock,

    // ── Tools ──
    /// Enter two-click connection mode.
    ConnectMode,

    // ── View ──
    ZoomIn,
    ZoomOut,

    // ── Z-order ──
    SendToBack,
    BringToFront,

    // ── UI ──
    Deselect,
}

/// Resolves key events into shortcut actions.
///
/// On macOS `meta` is ⌘, elsewhere `ctrl` serves the same role.
pub struct ShortcutMap;

impl ShortcutMap {
    /// Resolve a key event to an action.
    ///
    /// `key` is the `KeyboardEvent.key` value (e.g. `"z"`, `"Delete"`).
    /// Returns `None` if the key combo has no binding.
    pub fn resolve(
        key: &str,
        ctrl: bool,
        shift: bool,
        _alt: bool,
        meta: bool,
    ) -> Option<ShortcutAction> {
        let cmd = ctrl || meta;

        // ── Modifier combos first (most specific) ──
        if cmd && shift {
            return match key {
                "z" | "Z" => Some(ShortcutAction::Redo),
                "[" | "{" => Some(ShortcutAction::SendToBack),
                "]" | "}" => Some(ShortcutAction::BringToFront),
                _ => None,
            };
        }

        if cmd {
            return match key {
                "z" | "Z" => Some(ShortcutAction::Undo),
                "y" | "Y" => Some(ShortcutAction::Redo),
                "=" | "+" => Some(ShortcutAction::ZoomIn),
                "-" => Some(ShortcutAction::ZoomOut),
                _ => None,
            };
        }

        if shift {
            return None;
        }

        // ── Single keys (no modifiers) ──
        match key {
            "c" | "C" => Some(ShortcutAction::ConnectMode),
            "b" | "B" => Some(ShortcutAction::AddBlock),
            "Delete" | "Backspace" => Some(ShortcutAction::Delete),
            "Escape" => Some(ShortcutAction::Deselect),
            _ => None,
        }
    }
}

impl ShortcutAction {
    /// Apply the action to the workspace. `selected` is the selected
    /// block, if any. Returns `false` for actions the view must handle
    /// itself, or when nothing changed.
    pub fn apply(self, ws: &mut Workspace, selected: Option<BlockId>) -> bool {
        let center = Point::new(0.5, 0.5);
        match self {
            ShortcutAction::Undo => ws.undo().is_some(),
            ShortcutAction::Redo => ws.redo().is_some(),
            ShortcutAction::AddBlock => ws.add_block(None).is_some(),
            ShortcutAction::ZoomIn => ws.zoom(ZOOM_IN_FACTOR, center),
            ShortcutAction::ZoomOut => ws.zoom(ZOOM_OUT_FACTOR, center),
            ShortcutAction::Delete => {
                selected.is_some_and(|id| ws.delete_block(id, Recording::Record))
            }
            ShortcutAction::BringToFront => selected
                .and_then(|id| ws.bring_to_front(id, Recording::Record))
                .is_some(),
            ShortcutAction::SendToBack => selected
                .and_then(|id| ws.send_to_back(id, Recording::Record))
                .is_some(),
            ShortcutAction::ConnectMode | ShortcutAction::Deselect => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_undo_redo() {
        // Cmd+Z → Undo
        assert_eq!(
            ShortcutMap::resolve("z", false, false, false, true),
            Some(ShortcutAction::Undo)
        );
        // Ctrl+Z → Undo
        assert_eq!(
            ShortcutMap::resolve("z", true, false, false, false),
            Some(ShortcutAction::Undo)
        );
        // Cmd+Shift+Z → Redo
        assert_eq!(
            ShortcutMap::resolve("Z", false, true, false, true),
            Some(ShortcutAction::Redo)
        );
        // Ctrl+Y → Redo
        assert_eq!(
            ShortcutMap::resolve("y", true, false, false, false),
            Some(ShortcutAction::Redo)
        );
    }

    #[test]
    fn resolve_delete() {
        assert_eq!(
            ShortcutMap::resolve("Delete", false, false, false, false),
            Some(ShortcutAction::Delete)
        );
        assert_eq!(
            ShortcutMap::resolve("Backspace", false, false, false, false),
            Some(ShortcutAction::Delete)
        );
    }

    #[test]
    fn resolve_escape() {
        assert_eq!(
            ShortcutMap::resolve("Escape", false, false, false, false),
            Some(ShortcutAction::Deselect)
        );
    }

    #[test]
    fn resolve_z_order() {
        assert_eq!(
            ShortcutMap::resolve("]", true, true, false, false),
            Some(ShortcutAction::BringToFront)
        );
        assert_eq!(
            ShortcutMap::resolve("[", false, true, false, true),
            Some(ShortcutAction::SendToBack)
        );
        // No single-modifier binding.
        assert_eq!(ShortcutMap::resolve("]", true, false, false, false), None);
    }

    #[test]
    fn resolve_mode_keys() {
        assert_eq!(
            ShortcutMap::resolve("c", false, false, false, false),
            Some(ShortcutAction::ConnectMode)
        );
        assert_eq!(
            ShortcutMap::resolve("B", false, false, false, false),
            Some(ShortcutAction::AddBlock)
        );
        // Cmd+C is left to the host.
        assert_eq!(ShortcutMap::resolve("c", false, false, false, true), None);
    }

    #[test]
    fn resolve_unknown_key() {
        assert_eq!(ShortcutMap::resolve("F13", false, false, false, false), None);
        assert_eq!(ShortcutMap::resolve("b", false, true, false, false), None);
    }

    #[test]
    fn apply_edits_the_workspace() {
        let mut ws = Workspace::new();
        assert!(ShortcutAction::AddBlock.apply(&mut ws, None));
        let id = ws.current().blocks.keys().next().copied().unwrap();
        assert!(!ShortcutAction::Delete.apply(&mut ws, None));
        assert!(ShortcutAction::Delete.apply(&mut ws, Some(id)));
        assert!(ws.current().blocks.is_empty());
        assert!(ShortcutAction::Undo.apply(&mut ws, None));
        assert!(ws.block(id).is_some());
        assert!(!ShortcutAction::Deselect.apply(&mut ws, Some(id)));
    }
}
