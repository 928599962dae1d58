//! Channel-list codec: the compact wire encoding of a relay set.
//!
//! Grammar:
//!
//! ```text
//! list  := "(@" [ item ( "," item )* ] ")"
//! item  := D "!" D | D "!" D ":" D "!" D
//! D     := ASCII digit+
//! ```
//!
//! Example: `(@1!0:3!0,4!9,23!7:24!7)` is lines 1..=3 at tap 0, line 4 at
//! tap 9, and lines 23..=24 at tap 7.
//!
//! Parsing is strict: no whitespace, no signs, and a range must name the same
//! tap on both sides with a non-decreasing line.

use crate::relay::{Relay, RelayState};
use regex::Regex;
use std::fmt;
use thiserror::Error;

const CHANNEL_LIST_RE: &str = r"^\(@([0-9,:!]*)\)$";

/// Malformed channel-list text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("expected channel list, got {0:?}")]
    MissingWrapper(String),
    #[error("expected channel sequence, got {0:?}")]
    ExpectedSequence(String),
    #[error("expected channel pair, got {0:?}")]
    ExpectedPair(String),
    #[error("expected channel, got {0:?}")]
    ExpectedChannel(String),
    /// A two-sided range whose halves name different taps.
    #[error("expected same breakout in sequence, got {0:?}")]
    InconsistentRange(String),
    #[error("expected ascending lines in sequence, got {0:?}")]
    ReversedRange(String),
    #[error("channel list pattern: {0}")]
    Pattern(String),
}

/// A run of consecutive lines `start..=end` sharing one tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u32,
    pub tap: u32,
    pub end: u32,
}

impl Interval {
    pub fn single(line: u32, tap: u32) -> Self {
        Self {
            start: line,
            tap,
            end: line,
        }
    }

    pub fn relays(&self) -> impl Iterator<Item = Relay> + use<> {
        let tap = self.tap;
        (self.start..=self.end).map(move |line| Relay::new(line, tap))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}!{}", self.start, self.tap)
        } else {
            write!(f, "{}!{}:{}!{}", self.start, self.tap, self.end, self.tap)
        }
    }
}

/// Parse the items of a channel list, in textual order.
pub fn parse_intervals(text: &str) -> Result<Vec<Interval>, FormatError> {
    let re = Regex::new(CHANNEL_LIST_RE).map_err(|err| FormatError::Pattern(err.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| FormatError::MissingWrapper(text.to_string()))?;
    let body = caps.get(1).map_or("", |m| m.as_str());

    if body.is_empty() {
        return Ok(Vec::new());
    }

    body.split(',').map(parse_interval).collect()
}

/// Parse a channel list into relays in first-seen order. Duplicates are kept.
pub fn parse_relays(text: &str) -> Result<Vec<Relay>, FormatError> {
    let intervals = parse_intervals(text)?;
    Ok(intervals.iter().flat_map(Interval::relays).collect())
}

/// Parse a channel list into a (deduplicated) relay state.
pub fn parse(text: &str) -> Result<RelayState, FormatError> {
    Ok(RelayState::from_relays(parse_relays(text)?))
}

/// One `line!tap` item per relay, in the state's iteration order.
pub fn to_expanded(state: &RelayState) -> String {
    wrap(state.iter().map(Relay::to_string))
}

/// Merge a state into maximal runs: taps ascending, runs ascending by start line.
pub fn compress(state: &RelayState) -> Vec<Interval> {
    let mut out = Vec::new();
    for (tap, lines) in state.lines_by_tap() {
        let mut lines = lines.into_iter();
        let Some(first) = lines.next() else {
            continue;
        };
        let mut run = Interval::single(first, tap);
        for line in lines {
            if run.end.checked_add(1) == Some(line) {
                run.end = line;
            } else {
                out.push(run);
                run = Interval::single(line, tap);
            }
        }
        out.push(run);
    }
    out
}

pub fn to_compressed(state: &RelayState) -> String {
    wrap(compress(state).iter().map(Interval::to_string))
}

/// Re-serialize a channel list with every relay spelled out.
pub fn expand_channel_list(text: &str) -> Result<String, FormatError> {
    Ok(to_expanded(&parse(text)?))
}

/// Re-serialize a channel list in its most compact form.
pub fn compress_channel_list(text: &str) -> Result<String, FormatError> {
    Ok(to_compressed(&parse(text)?))
}

fn wrap(items: impl Iterator<Item = String>) -> String {
    let items: Vec<String> = items.collect();
    format!("(@{})", items.join(","))
}

fn parse_interval(item: &str) -> Result<Interval, FormatError> {
    let halves: Vec<&str> = item.split(':').collect();
    let ((start, tap), (end, end_tap)) = match halves.as_slice() {
        [""] => return Err(FormatError::ExpectedSequence(item.to_string())),
        [single] => {
            let channel = parse_channel(single)?;
            (channel, channel)
        }
        [first, last] => (parse_channel(first)?, parse_channel(last)?),
        _ => return Err(FormatError::ExpectedSequence(item.to_string())),
    };

    if tap != end_tap {
        return Err(FormatError::InconsistentRange(item.to_string()));
    }
    if end < start {
        return Err(FormatError::ReversedRange(item.to_string()));
    }

    Ok(Interval { start, tap, end })
}

/// Parse "LINE!TAP".
fn parse_channel(half: &str) -> Result<(u32, u32), FormatError> {
    let mut parts = half.split('!');
    let (Some(line), Some(tap), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(FormatError::ExpectedPair(half.to_string()));
    };
    Ok((parse_decimal(line)?, parse_decimal(tap)?))
}

fn parse_decimal(token: &str) -> Result<u32, FormatError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::ExpectedChannel(token.to_string()));
    }
    token
        .parse()
        .map_err(|_| FormatError::ExpectedChannel(token.to_string()))
}
