//! State diff: which relays to close and which to open.

use crate::relay::RelayState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    /// In the target but not currently closed.
    pub to_close: RelayState,
    /// Currently closed but not in the target.
    pub to_open: RelayState,
    /// The target itself, to be committed as the new cache.
    pub total: RelayState,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.to_close.is_empty() && self.to_open.is_empty()
    }
}

pub fn diff(before: &RelayState, after: &RelayState) -> StateDiff {
    StateDiff {
        to_close: after.difference(before),
        to_open: before.difference(after),
        total: after.clone(),
    }
}
