// mod.rs - binary configuration store
//
// A config is built as a mutable tree of refcounted containers, then frozen
// into a compact, offset-addressed blob. The blob is immutable and freely
// shareable; readers navigate it without parsing or allocation.
//
// Blob layout (little-endian, offsets relative to blob start):
//   [0..4)  total size (u32)
//   [4..8)  payload area offset (u32, 8-aligned)
//   keys    (n+2) packed u32 keys, entry 0 = synthetic root, n+1 = sentinel
//   values  (n+2) u32 value words
//   interned key strings (NUL-less, shared between equal keys)
//   payload area: 8-byte scalars and length-prefixed blobs forward,
//                 NUL-terminated strings backward from the blob tail

mod builder;
mod reader;
mod types;

pub use builder::{ConfigBuilder, ConfigCursor, SharedContainer};
pub use reader::Config;
pub use types::{ConfigKey, ConfigValue, KeyType, ValueType};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The supplied blob slice was empty.
    #[error("config data was empty")]
    NullPointerData,

    /// The blob failed structural validation.
    #[error("config data is malformed")]
    InvalidArgument,

    /// A typed read did not match the stored value type.
    #[error("value at `{path}` has type {found:?}, expected {expected:?}")]
    WrongValueType {
        path: String,
        found: ValueType,
        expected: ValueType,
    },

    /// Path navigation failed.
    #[error("no value at `{path}`")]
    ResourceNotFound { path: String },

    /// Assigning a shared container into its own subtree.
    #[error("assignment would create a container cycle")]
    ContainerCycle,
}
