use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Line correspondence between stripped output and the original script.
///
/// Every stripped line has an entry; `None` marks a line with no single
/// original counterpart (`else:`, `finally:`). Lines are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceMap {
    /// Entry `i` is the original line of stripped line `i + 1`.
    stripped_to_original: Vec<Option<usize>>,
    /// First stripped line rendered from each original line.
    original_to_stripped: BTreeMap<usize, usize>,
}

impl SourceMap {
    /// Build from the per-output-line origins recorded by the unparser.
    pub fn from_origins(origins: Vec<Option<usize>>) -> Self {
        let mut original_to_stripped = BTreeMap::new();
        for (i, origin) in origins.iter().enumerate() {
            if let Some(original) = origin {
                original_to_stripped.entry(*original).or_insert(i + 1);
            }
        }
        Self {
            stripped_to_original: origins,
            original_to_stripped,
        }
    }

    /// Original line for a stripped line, if it has one.
    pub fn to_original(&self, stripped_line: usize) -> Option<usize> {
        self.stripped_to_original
            .get(stripped_line.checked_sub(1)?)
            .copied()
            .flatten()
    }

    /// First stripped line rendered from an original line, if any survived.
    pub fn to_stripped(&self, original_line: usize) -> Option<usize> {
        self.original_to_stripped.get(&original_line).copied()
    }

    /// Number of stripped lines.
    pub fn len(&self) -> usize {
        self.stripped_to_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripped_to_original.is_empty()
    }

    /// `(stripped line, original line)` pairs in stripped order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.stripped_to_original
            .iter()
            .enumerate()
            .map(|(i, origin)| (i + 1, *origin))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lookups_in_both_directions() {
        let map = SourceMap::from_origins(vec![Some(9), Some(10), None, Some(10), Some(12)]);
        assert_eq!(map.len(), 5);
        assert_eq!(map.to_original(1), Some(9));
        assert_eq!(map.to_original(3), None);
        assert_eq!(map.to_original(0), None);
        assert_eq!(map.to_original(6), None);
        // several stripped lines from one original line: the first wins
        assert_eq!(map.to_stripped(10), Some(2));
        assert_eq!(map.to_stripped(11), None);
    }

    #[test]
    fn serializes_unknown_lines_explicitly() {
        let map = SourceMap::from_origins(vec![Some(3), None]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["stripped_to_original"], serde_json::json!([3, null]));
        let back: SourceMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
