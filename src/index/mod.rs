//! Per-shard inverted text index.
//!
//! Maps a lowercased token to the ids of nodes whose id, label or any
//! property value equals that token. Matching is whole-value equality, not
//! substring: "Alice Smith" is indexed under "alice smith" only.

use std::collections::{HashMap, HashSet};

use crate::storage::Node;

#[derive(Debug, Default, Clone)]
pub struct InvertedIndex {
    postings: HashMap<String, HashSet<String>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from scratch over `nodes`.
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut index = Self::new();
        for node in nodes {
            index.insert(node);
        }
        index
    }

    pub fn insert(&mut self, node: &Node) {
        for token in tokens(node) {
            self.postings
                .entry(token.to_lowercase())
                .or_default()
                .insert(node.id.clone());
        }
    }

    pub fn remove(&mut self, node: &Node) {
        for token in tokens(node) {
            let key = token.to_lowercase();
            if let Some(ids) = self.postings.get_mut(&key) {
                ids.remove(&node.id);
                if ids.is_empty() {
                    self.postings.remove(&key);
                }
            }
        }
    }

    /// Ids indexed under `query`, compared case-insensitively.
    pub fn lookup(&self, query: &str) -> impl Iterator<Item = &String> + '_ {
        self.postings
            .get(&query.to_lowercase())
            .into_iter()
            .flat_map(|ids| ids.iter())
    }
}

fn tokens(node: &Node) -> impl Iterator<Item = &str> + '_ {
    [node.id.as_str(), node.label.as_str()]
        .into_iter()
        .chain(node.properties.values().map(String::as_str))
}
