use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

/// Global string interner for diagram, block and connection ids.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

/// Declares an interned identifier type with a numbered prefix scheme
/// (`block-1`, `conn-7`, `diagram-2`).
///
/// Internally a `Spur` index: 4 bytes, Copy, Eq, Hash in O(1). Two ids
/// with the same text are the same id, regardless of which diagram minted
/// them; uniqueness within a diagram comes from its counters.
macro_rules! interned_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Spur);

        impl $name {
            /// Textual prefix used by [`Self::numbered`].
            pub const PREFIX: &'static str = $prefix;

            /// Intern a string as an id, or return the existing one.
            pub fn intern(s: &str) -> Self {
                $name(INTERNER.get_or_intern(s))
            }

            /// Build the id for counter value `n` (e.g. `block-3`).
            pub fn numbered(n: u64) -> Self {
                Self::intern(&format!("{}-{n}", Self::PREFIX))
            }

            /// Resolve back to a string slice.
            pub fn as_str(&self) -> &str {
                INTERNER.resolve(&self.0)
            }

            /// The counter value encoded in the id, if it follows the
            /// `prefix-N` scheme.
            pub fn number(&self) -> Option<u64> {
                self.as_str()
                    .strip_prefix(Self::PREFIX)?
                    .strip_prefix('-')?
                    .parse()
                    .ok()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok($name::intern(&s))
            }
        }
    };
}

interned_id!(
    /// Identifier of a block, stable for the block's lifetime.
    BlockId,
    "block"
);

interned_id!(
    /// Identifier of a connection between two blocks.
    ConnectionId,
    "conn"
);

interned_id!(
    /// Identifier of a diagram in the workspace.
    DiagramId,
    "diagram"
);
