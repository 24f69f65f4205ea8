//! AtlasDB - embedded, encrypted property-graph engine
//!
//! # Architecture
//!
//! - **Shards**: a fixed number of partitions (`part_<i>.dat`), routed by
//!   BLAKE3 of the node id. Relations live with their source node.
//! - **Lazy residency**: shards load on first access; at most
//!   `max_resident` stay in memory, evicted least-recently-used.
//! - **Write-ahead log**: every mutation is durably logged before it is
//!   applied, and replayed on the next open after a crash.
//! - **Encryption at rest**: shard files and WAL lines are AES-256-GCM
//!   sealed with a key kept outside the data directory.
//! - **Inverted index**: optional per-shard token index for `search`.
//!
//! # Usage example
//!
//! ```no_run
//! use atlasdb::{EngineConfig, GraphEngine, GraphStore, Node, PathMode, Relation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = GraphEngine::open(EngineConfig::new("./atlas_db"))?;
//!
//! engine.persist_node(Node::new("alice", "Person").with_property("city", "Oslo"))?;
//! engine.persist_node(Node::new("bob", "Person"))?;
//! engine.persist_relation(Relation::new("alice", "bob", "KNOWS").with_property("weight", 2.0))?;
//!
//! let friends = engine.traverse("alice", "KNOWS");
//! let path = engine.find_weighted_path("alice", "bob", "weight", PathMode::Lowest);
//! println!("{} friends, path {:?}", friends.len(), path);
//!
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod graph;
pub mod index;
pub mod storage;

pub use config::EngineConfig;
pub use error::{GraphError, Result};
pub use graph::{GraphEngine, GraphStats, GraphStore, PathMode, WeightedPath};
pub use storage::{Node, PropertyValue, Relation};
