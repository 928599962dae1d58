//! Relay values and the set-of-closed-relays state type.
//!
//! A `RelayState` is a plain value: it is built once (from the codec, the
//! diff engine, or an iterator of pairs) and never edited afterwards. Set
//! operations return new states.

use std::collections::{BTreeMap, BTreeSet, btree_set};
use std::fmt;

/// One controllable connection point: `line` routed to `tap`.
///
/// Ordering is by line, then tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relay {
    pub line: u32,
    pub tap: u32,
}

impl Relay {
    pub const fn new(line: u32, tap: u32) -> Self {
        Self { line, tap }
    }
}

impl From<(u32, u32)> for Relay {
    fn from((line, tap): (u32, u32)) -> Self {
        Self::new(line, tap)
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.line, self.tap)
    }
}

/// A set of closed relays.
///
/// Construction deduplicates. Iteration is ascending by line, then tap,
/// independent of the order the relays were supplied in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayState(BTreeSet<Relay>);

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sanitized state from any sequence of relays, dropping duplicates.
    pub fn from_relays<I: IntoIterator<Item = Relay>>(relays: I) -> Self {
        Self(relays.into_iter().collect())
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(u32, u32)]) -> Self {
        Self(pairs.iter().copied().map(Relay::from).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, relay: &Relay) -> bool {
        self.0.contains(relay)
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Relay> {
        self.0.iter()
    }

    pub fn union(&self, other: &RelayState) -> RelayState {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Relays in `self` that are not in `other`.
    pub fn difference(&self, other: &RelayState) -> RelayState {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// Lines grouped per tap; taps ascending, lines ascending within a tap.
    pub fn lines_by_tap(&self) -> BTreeMap<u32, Vec<u32>> {
        let mut out: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for relay in &self.0 {
            out.entry(relay.tap).or_default().push(relay.line);
        }
        for lines in out.values_mut() {
            lines.sort_unstable();
        }
        out
    }

    #[cfg(test)]
    pub fn to_pairs(&self) -> Vec<(u32, u32)> {
        self.0.iter().map(|r| (r.line, r.tap)).collect()
    }
}

impl FromIterator<Relay> for RelayState {
    fn from_iter<I: IntoIterator<Item = Relay>>(iter: I) -> Self {
        Self::from_relays(iter)
    }
}

impl<'a> IntoIterator for &'a RelayState {
    type Item = &'a Relay;
    type IntoIter = btree_set::Iter<'a, Relay>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for RelayState {
    type Item = Relay;
    type IntoIter = btree_set::IntoIter<Relay>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn construction_deduplicates_and_sorts() {
        let state = RelayState::from_pairs(&[(24, 8), (22, 7), (20, 6), (1, 9), (2, 0), (24, 8), (20, 6)]);
        assert_eq!(state.len(), 5);
        assert_eq!(state.to_pairs(), vec![(1, 9), (2, 0), (20, 6), (22, 7), (24, 8)]);
    }

    #[test]
    fn equality_ignores_construction_order() {
        let a = RelayState::from_pairs(&[(1, 0), (2, 0), (3, 4)]);
        let b: RelayState = [(3, 4), (1, 0), (2, 0), (1, 0)].into_iter().map(Relay::from).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn union_and_difference() {
        let a = RelayState::from_pairs(&[(7, 5), (3, 4)]);
        let b = RelayState::from_pairs(&[(1, 2), (3, 4)]);

        assert_eq!(a.union(&b).to_pairs(), vec![(1, 2), (3, 4), (7, 5)]);
        assert_eq!(a.difference(&b).to_pairs(), vec![(7, 5)]);
        assert_eq!(b.difference(&a).to_pairs(), vec![(1, 2)]);
        assert!(a.contains(&Relay::new(3, 4)));
        assert!(!a.contains(&Relay::new(1, 2)));
    }

    #[test]
    fn lines_grouped_by_ascending_tap() {
        let state = RelayState::from_pairs(&[(4, 9), (24, 7), (2, 0), (23, 7), (1, 0)]);
        let groups: Vec<(u32, Vec<u32>)> = state.lines_by_tap().into_iter().collect();
        assert_eq!(groups, vec![(0, vec![1, 2]), (7, vec![23, 24]), (9, vec![4])]);
    }
}
