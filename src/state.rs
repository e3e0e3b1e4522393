//! Value-typed snapshot of a partition.
//!
//! Four parallel columns; entry `i` asserts that node `ids[i]` of type
//! `types[i]` living at `levels[i]` has parent `parents[i]` at
//! `levels[i] + 1`. Top-level blocks are omitted — they appear only in the
//! `parents` column. Any column-oriented tabular encoding round-trips this
//! struct; the derives leave the choice of format to the caller.

use serde::{Deserialize, Serialize};

/// Partition snapshot used for checkpointing and restoration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDump {
    /// Node ids, one entry per non-top-level node
    pub ids: Vec<String>,
    /// Type names, parallel to `ids`
    pub types: Vec<String>,
    /// Parent block ids, parallel to `ids`
    pub parents: Vec<String>,
    /// Levels the nodes live on, parallel to `ids`
    pub levels: Vec<usize>,
}

impl StateDump {
    /// An empty dump with room for `size` entries.
    pub fn with_capacity(size: usize) -> Self {
        StateDump {
            ids: Vec::with_capacity(size),
            types: Vec::with_capacity(size),
            parents: Vec::with_capacity(size),
            levels: Vec::with_capacity(size),
        }
    }

    /// Append one entry.
    pub fn push(
        &mut self,
        id: impl Into<String>,
        type_name: impl Into<String>,
        parent: impl Into<String>,
        level: usize,
    ) {
        self.ids.push(id.into());
        self.types.push(type_name.into());
        self.parents.push(parent.into());
        self.levels.push(level);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the dump has no entries.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether all four columns have the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.ids.len();
        self.types.len() == n && self.parents.len() == n && self.levels.len() == n
    }
}
