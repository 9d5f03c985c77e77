use std::collections::BTreeMap;

use crate::{error::RunError, testcase::ChannelBinding};

/// Decoder channel name to physical channel index, plus the number of
/// 8-channel groups (bytes per sample) needed to reach the highest index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelMap {
    map: BTreeMap<String, usize>,
    group_count: usize,
}

impl ChannelMap {
    /// Resolve the channel bindings of one decoder spec. Binding order does
    /// not matter; a name bound twice is an error.
    pub fn resolve(bindings: &[ChannelBinding]) -> Result<Self, RunError> {
        let mut map = BTreeMap::new();
        let mut max_index = None;
        for binding in bindings {
            if map.insert(binding.name.clone(), binding.index).is_some() {
                return Err(RunError::config(format!(
                    "Channel '{}' is bound more than once.",
                    binding.name
                )));
            }
            max_index = max_index.max(Some(binding.index));
        }
        Ok(Self {
            map,
            group_count: max_index.map_or(0, |max| max / 8 + 1),
        })
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.map.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
