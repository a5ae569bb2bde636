//! Priority keys and the process-wide ordering policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Numeric dispatch priority of a message.
///
/// Whether a larger or a smaller value is more urgent is decided by the
/// [`PriorityOrder`] of the queue, never by the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i64);

impl Priority {
    /// Create a priority from its raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw numeric value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value as i64)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of the numeric range is dispatched first.
///
/// Fixed at queue construction and applied to every dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    /// Larger values are more urgent.
    #[default]
    HighestFirst,
    /// Smaller values are more urgent.
    LowestFirst,
}

impl PriorityOrder {
    /// Most urgent priority in an ordered set.
    pub(crate) fn head(self, active: &BTreeSet<Priority>) -> Option<Priority> {
        match self {
            PriorityOrder::HighestFirst => active.last().copied(),
            PriorityOrder::LowestFirst => active.first().copied(),
        }
    }
}

impl fmt::Display for PriorityOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityOrder::HighestFirst => f.write_str("highest_first"),
            PriorityOrder::LowestFirst => f.write_str("lowest_first"),
        }
    }
}
