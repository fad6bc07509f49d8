//! Freeze Partition of the Backbone
//!
//! Blocks `[0, boundary)` are frozen and blocks `[boundary, num_blocks)` are
//! fine-tunable. The frozen group is always a prefix: only the deepest blocks are
//! ever trained.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Two-group split of the backbone's blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackbonePartition {
    num_blocks: usize,
    boundary: usize,
}

impl BackbonePartition {
    /// Every block frozen (phase 1)
    pub fn all_frozen(num_blocks: usize) -> Self {
        Self {
            num_blocks,
            boundary: num_blocks,
        }
    }

    /// Every block trainable
    pub fn all_trainable(num_blocks: usize) -> Self {
        Self {
            num_blocks,
            boundary: 0,
        }
    }

    /// Only the last `count` blocks trainable; `count` is capped at `num_blocks`
    pub fn fine_tune_last(num_blocks: usize, count: usize) -> Self {
        Self {
            num_blocks,
            boundary: num_blocks - count.min(num_blocks),
        }
    }

    /// Unfreeze everything, then re-freeze all but the last `count` blocks
    pub fn unfreeze_last(self, count: usize) -> Self {
        let unfrozen = Self::all_trainable(self.num_blocks);
        Self::fine_tune_last(unfrozen.num_blocks, count)
    }

    /// Indices of frozen blocks
    pub fn frozen_range(&self) -> Range<usize> {
        0..self.boundary
    }

    /// Indices of fine-tunable blocks
    pub fn trainable_range(&self) -> Range<usize> {
        self.boundary..self.num_blocks
    }

    pub fn is_frozen(&self, block: usize) -> bool {
        block < self.boundary
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn num_trainable(&self) -> usize {
        self.num_blocks - self.boundary
    }
}

impl std::fmt::Display for BackbonePartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frozen / {} trainable of {} blocks",
            self.boundary,
            self.num_trainable(),
            self.num_blocks
        )
    }
}
