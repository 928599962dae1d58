//! Human names for lines and breakout taps.
//!
//! A name resolves through the table first; a name that is not in the table
//! but is a plain decimal number resolves to that number.

use crate::error::{Result, SwitchError};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Arrangement {
    #[serde(default)]
    pub lines: BTreeMap<String, u32>,

    #[serde(default)]
    pub breakouts: BTreeMap<String, u32>,
}

impl Arrangement {
    #[cfg(test)]
    pub fn new(lines: &[(&str, u32)], breakouts: &[(&str, u32)]) -> Self {
        let owned = |pairs: &[(&str, u32)]| {
            pairs
                .iter()
                .map(|(name, n)| (name.to_string(), *n))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            lines: owned(lines),
            breakouts: owned(breakouts),
        }
    }

    pub fn line(&self, name: &str) -> Result<u32> {
        resolve(&self.lines, name).ok_or_else(|| SwitchError::UnknownLine(name.to_string()))
    }

    pub fn tap(&self, name: &str) -> Result<u32> {
        resolve(&self.breakouts, name).ok_or_else(|| SwitchError::UnknownTap(name.to_string()))
    }

    pub fn resolve_lines<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<u32>> {
        names.iter().map(|name| self.line(name.as_ref())).collect()
    }
}

fn resolve(table: &BTreeMap<String, u32>, name: &str) -> Option<u32> {
    if let Some(n) = table.get(name) {
        return Some(*n);
    }
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
