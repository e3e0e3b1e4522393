//! Error types for network construction and inference.
//!
//! Structural misuse (`DuplicateId`, `UnknownId`, ...) and inference
//! preconditions (`NoBlocks`, `InsufficientBlocks`, ...) are surfaced to the
//! caller, never silently repaired. The only place an error is swallowed is
//! the collapse schedule, which ends early on `InsufficientBlocks`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SbmError>;

/// Errors raised by the network container and the inference engine.
#[derive(Debug, Error)]
pub enum SbmError {
    /// A node with this id already exists at this level.
    #[error("node `{id}` already exists at level {level}")]
    DuplicateId {
        /// Offending node id
        id: String,
        /// Level of the existing node
        level: usize,
    },

    /// No node with this id exists where one was required.
    #[error("node `{id}` is not present in the network")]
    UnknownId {
        /// The id that failed to resolve
        id: String,
    },

    /// A level outside the valid range was requested.
    #[error("level {level} is out of range for this network")]
    InvalidLevel {
        /// The requested level
        level: usize,
    },

    /// Two nodes that must share a level do not.
    #[error("nodes live on different levels ({left} vs {right})")]
    LevelMismatch {
        /// Level of the first node
        left: usize,
        /// Level of the second node
        right: usize,
    },

    /// A type name absent from the network's type table.
    #[error("type `{name}` does not exist in the network")]
    UnknownType {
        /// The unrecognized type name
        name: String,
    },

    /// A block-level operation was requested but only level 0 exists.
    #[error("no block levels to operate on")]
    NoBlocks,

    /// More blocks were requested for a type than it has nodes (or zero).
    #[error("cannot seed {requested} blocks for type `{type_name}` holding {available} nodes")]
    Overprovisioned {
        /// Name of the type that cannot host the blocks
        type_name: String,
        /// Number of blocks requested per type
        requested: usize,
        /// Number of nodes of that type
        available: usize,
    },

    /// A merge step needs at least two blocks of every type.
    #[error("type `{type_name}` has {count} block(s) at level {level}; at least 2 are required to merge")]
    InsufficientBlocks {
        /// Name of the type that ran out of blocks
        type_name: String,
        /// Block level of the attempted merge
        level: usize,
        /// Blocks of that type remaining
        count: usize,
    },

    /// `agglomerative_merge` was asked for zero merges.
    #[error("zero merges requested")]
    ZeroMerges,

    /// The sampler was asked to draw from an empty collection.
    #[error("cannot draw from an empty collection")]
    EmptyDraw,
}
