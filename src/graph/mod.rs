//! Graph API and its sharded implementation

pub mod engine;
pub mod rank;
pub mod residency;
pub mod routing;
pub mod traversal;

pub use engine::{GraphEngine, GraphStats};
pub use rank::{Topology, DEFAULT_DAMPING, DEFAULT_ITERATIONS};
pub use routing::shard_of;
pub use traversal::{PathMode, WeightedPath};

use std::collections::HashMap;

use crate::error::Result;
use crate::storage::{Node, Relation};

/// Operations the engine exposes to shells, servers and importers.
///
/// Every method takes `&self`; implementations are expected to be shared
/// across threads.
pub trait GraphStore {
    // === NODE OPERATIONS ===

    /// Insert or replace a node. Returns once the write is durable.
    fn persist_node(&self, node: Node) -> Result<()>;

    /// Set one property. `Ok(false)` if the node does not exist.
    fn update_node(&self, id: &str, key: &str, value: &str) -> Result<bool>;

    /// Delete a node, its outgoing relations and every relation pointing at it.
    fn delete_node(&self, id: &str) -> Result<bool>;

    fn get_node(&self, id: &str) -> Option<Node>;

    // === RELATION OPERATIONS ===

    /// Add a relation between two existing nodes. Re-adding the same
    /// (source, target, type) replaces its properties.
    fn persist_relation(&self, relation: Relation) -> Result<()>;

    fn delete_relation(&self, source: &str, target: &str, relation_type: &str) -> Result<bool>;

    /// Rename a relation's type, keeping its properties.
    fn update_relation(&self, source: &str, target: &str, old_type: &str, new_type: &str) -> Result<bool>;

    /// Targets of `from`'s outgoing relations of type `relation_type`
    fn traverse(&self, from: &str, relation_type: &str) -> Vec<Node>;

    // === QUERIES ===

    fn search(&self, query: &str) -> Vec<Node>;

    fn all_nodes(&self) -> Vec<Node>;

    fn all_relations(&self) -> Vec<Relation>;

    /// Fewest-hop path, at most `max_depth` hops. Empty if none.
    fn find_shortest_path(&self, start: &str, end: &str, max_depth: usize) -> Vec<String>;

    /// Path by summed `weight_key` values (1.0 when absent or not numeric).
    fn find_weighted_path(&self, start: &str, end: &str, weight_key: &str, mode: PathMode) -> Option<WeightedPath>;

    fn calculate_page_rank(&self, iterations: usize, damping: f64) -> HashMap<String, f64>;

    // === MAINTENANCE ===

    /// Save every dirty shard, then empty the WAL.
    fn checkpoint(&self) -> Result<()>;

    /// Remove all data, on disk and in memory. The key is kept.
    fn wipe_database(&self) -> Result<()>;

    fn set_auto_indexing(&self, enabled: bool);

    fn is_auto_indexing(&self) -> bool;
}
