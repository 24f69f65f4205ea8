//! Sharded graph engine: routing, LRU residency, write-ahead logging,
//! crash recovery and the read fan-out used by queries.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::crypto::CryptoManager;
use crate::error::{GraphError, Result};
use crate::storage::shard::{quarantine_files, sibling_path, TMP_SUFFIX};
use crate::storage::{same_type, Node, Relation, Shard, WalEntry, WalOperation, WriteAheadLog};

use super::rank::{self, Topology};
use super::residency::Residency;
use super::routing::shard_of;
use super::traversal::{self, PathMode, WeightedPath};
use super::GraphStore;

/// Point-in-time summary returned by [`GraphEngine::stats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub node_count: usize,
    pub relation_count: usize,
    pub shard_count: usize,
    pub max_resident: usize,
    /// Shards in memory when the summary was taken (after counting)
    pub resident_shards: usize,
    pub indexing: bool,
    /// Combined size of the `part_*.dat` files
    pub storage_bytes: u64,
}

/// Embedded property-graph engine.
///
/// Writes are appended to the WAL before they touch a shard; the WAL is only
/// emptied by [`GraphStore::checkpoint`]. Dropping the engine without
/// [`GraphEngine::close`] leaves the WAL in place and the next `open` replays
/// it.
pub struct GraphEngine {
    config: EngineConfig,
    shards: Vec<Shard>,
    wal: WriteAheadLog,
    residency: Residency,

    // Mutations hold it shared; checkpoint and wipe hold it exclusively
    commit_gate: RwLock<()>,

    // Set when a WAL append fails; writes are refused until acknowledged
    wal_fenced: AtomicBool,

    indexing: AtomicBool,
}

impl GraphEngine {
    /// Open (or create) the database described by `config` and replay any
    /// WAL entries left by a previous run.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.db_directory)?;
        remove_stale_temp_files(&config);

        let crypto = Arc::new(CryptoManager::load_or_generate(&config.key_file)?);

        let shards = (0..config.shard_count)
            .map(|i| Shard::new(i, config.shard_path(i), Arc::clone(&crypto)))
            .collect();
        let wal = WriteAheadLog::open(config.wal_path(), crypto)?;

        let engine = Self {
            residency: Residency::new(config.max_resident),
            indexing: AtomicBool::new(false),
            commit_gate: RwLock::new(()),
            wal_fenced: AtomicBool::new(false),
            shards,
            wal,
            config,
        };

        if engine.config.indexing {
            engine.set_auto_indexing(true);
        }

        let replayed = engine.recover()?;
        tracing::info!(
            "Opened graph at {:?}: {} shards, {} resident max, {} WAL entries replayed",
            engine.config.db_directory,
            engine.shards.len(),
            engine.residency.capacity(),
            replayed
        );

        Ok(engine)
    }

    /// Checkpoint, then release the engine.
    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        tracing::info!("Closed graph at {:?}", self.config.db_directory);
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn max_resident_shards(&self) -> usize {
        self.residency.capacity()
    }

    /// Indices of shards currently held in memory
    pub fn resident_shards(&self) -> Vec<usize> {
        self.shards
            .iter()
            .filter(|s| s.is_loaded())
            .map(Shard::id)
            .collect()
    }

    /// Indices of shards whose file failed to load this session
    pub fn quarantined_shards(&self) -> Vec<usize> {
        self.shards
            .iter()
            .filter(|s| s.is_quarantined())
            .map(Shard::id)
            .collect()
    }

    /// Entries in the WAL since the last checkpoint
    pub fn wal_entry_count(&self) -> usize {
        self.wal.len()
    }

    pub fn is_write_fenced(&self) -> bool {
        self.wal_fenced.load(Ordering::Acquire)
    }

    /// Lift the write fence set by a failed WAL append.
    pub fn acknowledge_wal_failure(&self) {
        if self.wal_fenced.swap(false, Ordering::AcqRel) {
            tracing::warn!("WAL failure acknowledged; accepting writes again");
        }
    }

    /// Counts every node and relation, which loads every shard.
    pub fn stats(&self) -> GraphStats {
        let mut node_count = 0;
        let mut relation_count = 0;
        for shard in self.fan_out() {
            node_count += shard.node_count();
            relation_count += shard.relation_count();
        }

        let storage_bytes = (0..self.shards.len())
            .filter_map(|i| fs::metadata(self.config.shard_path(i)).ok())
            .map(|m| m.len())
            .sum();

        GraphStats {
            node_count,
            relation_count,
            shard_count: self.shards.len(),
            max_resident: self.residency.capacity(),
            resident_shards: self.resident_shards().len(),
            indexing: self.is_auto_indexing(),
            storage_bytes,
        }
    }

    // ── Routing & residency ────────────────────────────────────────

    /// Home shard of `id`, marked most recently used.
    fn shard_for(&self, id: &str) -> &Shard {
        let idx = shard_of(id, self.shards.len());
        self.touch(idx);
        &self.shards[idx]
    }

    /// Must not be called while holding a shard lock: eviction takes the
    /// victim's exclusive lock.
    fn touch(&self, idx: usize) {
        if let Some(victim) = self.residency.touch(idx) {
            self.evict(victim);
        }
    }

    fn evict(&self, victim: usize) {
        match self.shards[victim].unload() {
            Ok(true) => tracing::debug!("Evicted shard {}", victim),
            Ok(false) => {}
            Err(e) => tracing::error!(
                "Eviction of shard {} failed to save, keeping it resident and dirty: {}",
                victim,
                e
            ),
        }
    }

    /// Every shard exactly once, resident ones first so a full walk evicts
    /// as little as possible.
    fn fan_out(&self) -> impl Iterator<Item = &Shard> + '_ {
        let resident = self.residency.snapshot();
        let cold: Vec<usize> = (0..self.shards.len())
            .filter(|i| !resident.contains(i))
            .collect();
        resident.into_iter().chain(cold).map(move |idx| {
            self.touch(idx);
            &self.shards[idx]
        })
    }

    // ── Write path ─────────────────────────────────────────────────

    fn begin_write(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let gate = self.commit_gate.read();
        if self.is_write_fenced() {
            return Err(GraphError::WriteFenced);
        }
        Ok(gate)
    }

    fn log(&self, operations: Vec<WalOperation>) -> Result<()> {
        let entries: Vec<WalEntry> = operations.into_iter().map(WalEntry::new).collect();
        self.wal.append_batch(&entries).map_err(|e| {
            self.wal_fenced.store(true, Ordering::Release);
            let kinds: Vec<&str> = entries.iter().map(|entry| entry.operation.kind()).collect();
            tracing::error!("WAL append of {:?} failed, fencing writes: {}", kinds, e);
            e
        })
    }

    /// Remove every relation targeting `id`, visiting each shard once.
    fn cascade_relations_to(&self, id: &str) -> usize {
        let removed: usize = self.fan_out().map(|shard| shard.remove_relations_to(id)).sum();
        if removed > 0 {
            tracing::debug!("Cascade for {} removed {} incoming relations", id, removed);
        }
        removed
    }

    // ── Recovery ───────────────────────────────────────────────────

    /// Apply every readable WAL entry on top of the saved shard images.
    /// Each operation overwrites rather than accumulates, so replaying a
    /// prefix that already reached disk is harmless. The log is kept until
    /// the next checkpoint.
    fn recover(&self) -> Result<usize> {
        let entries = self.wal.read_all()?;
        if entries.is_empty() {
            return Ok(0);
        }

        tracing::info!("Replaying {} WAL entries", entries.len());
        let count = entries.len();
        for entry in entries {
            self.replay(entry.operation);
        }
        Ok(count)
    }

    fn replay(&self, operation: WalOperation) {
        match operation {
            WalOperation::AddNode(node) | WalOperation::UpdateNode(node) => {
                self.shard_for(&node.id).put_node(node);
            }
            WalOperation::DeleteNode(id) => {
                self.shard_for(&id).remove_node(&id);
                self.cascade_relations_to(&id);
            }
            WalOperation::AddLink(relation) => {
                self.shard_for(&relation.source).add_relation(relation);
            }
            WalOperation::DeleteLink { source, target, relation_type } => {
                self.shard_for(&source).remove_relation(&source, &target, &relation_type);
            }
        }
    }

    fn node_exists(&self, id: &str) -> bool {
        self.shard_for(id).contains_node(id)
    }

    #[cfg(test)]
    pub(crate) fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }
}

impl GraphStore for GraphEngine {
    fn persist_node(&self, node: Node) -> Result<()> {
        node.validate()?;
        let _gate = self.begin_write()?;

        let shard = self.shard_for(&node.id);
        let mut guard = shard.write();
        self.log(vec![WalOperation::AddNode(node.clone())])?;
        guard.put_node(node);
        Ok(())
    }

    fn update_node(&self, id: &str, key: &str, value: &str) -> Result<bool> {
        let _gate = self.begin_write()?;

        let shard = self.shard_for(id);
        let mut guard = shard.write();
        let Some(existing) = guard.get_node(id) else {
            return Ok(false);
        };
        let mut updated = existing.clone();
        updated.set_property(key, value);
        updated.validate()?;

        self.log(vec![WalOperation::UpdateNode(updated.clone())])?;
        guard.put_node(updated);
        Ok(true)
    }

    fn delete_node(&self, id: &str) -> Result<bool> {
        let _gate = self.begin_write()?;

        {
            let shard = self.shard_for(id);
            let mut guard = shard.write();
            if !guard.contains_node(id) {
                return Ok(false);
            }
            self.log(vec![WalOperation::DeleteNode(id.to_string())])?;
            guard.remove_node(id);
        }

        self.cascade_relations_to(id);
        Ok(true)
    }

    fn get_node(&self, id: &str) -> Option<Node> {
        self.shard_for(id).get_node(id)
    }

    fn persist_relation(&self, relation: Relation) -> Result<()> {
        relation.validate()?;
        let _gate = self.begin_write()?;

        if !self.node_exists(&relation.source) {
            return Err(GraphError::IntegrityViolation { id: relation.source, role: "source" });
        }
        if !self.node_exists(&relation.target) {
            return Err(GraphError::IntegrityViolation { id: relation.target, role: "target" });
        }

        let shard = self.shard_for(&relation.source);
        let mut guard = shard.write();
        // Source may have been deleted since the check above
        if !guard.contains_node(&relation.source) {
            return Err(GraphError::IntegrityViolation { id: relation.source, role: "source" });
        }
        self.log(vec![WalOperation::AddLink(relation.clone())])?;
        guard.add_relation(relation);
        Ok(())
    }

    fn delete_relation(&self, source: &str, target: &str, relation_type: &str) -> Result<bool> {
        let _gate = self.begin_write()?;

        let shard = self.shard_for(source);
        let mut guard = shard.write();
        if guard.find_relation(source, target, relation_type).is_none() {
            return Ok(false);
        }
        self.log(vec![WalOperation::DeleteLink {
            source: source.to_string(),
            target: target.to_string(),
            relation_type: relation_type.to_string(),
        }])?;
        guard.remove_relation(source, target, relation_type);
        Ok(true)
    }

    fn update_relation(&self, source: &str, target: &str, old_type: &str, new_type: &str) -> Result<bool> {
        let _gate = self.begin_write()?;

        let shard = self.shard_for(source);
        let mut guard = shard.write();
        let Some(existing) = guard.find_relation(source, target, old_type) else {
            return Ok(false);
        };
        let mut renamed = existing.clone();
        renamed.relation_type = new_type.to_string();
        renamed.validate()?;

        self.log(vec![
            WalOperation::DeleteLink {
                source: source.to_string(),
                target: target.to_string(),
                relation_type: old_type.to_string(),
            },
            WalOperation::AddLink(renamed.clone()),
        ])?;
        guard.remove_relation(source, target, old_type);
        guard.add_relation(renamed);
        Ok(true)
    }

    fn traverse(&self, from: &str, relation_type: &str) -> Vec<Node> {
        let targets: Vec<String> = self
            .shard_for(from)
            .relations_from(from)
            .into_iter()
            .filter(|r| same_type(&r.relation_type, relation_type))
            .map(|r| r.target)
            .collect();

        targets.iter().filter_map(|t| self.get_node(t)).collect()
    }

    fn search(&self, query: &str) -> Vec<Node> {
        self.fan_out().flat_map(|shard| shard.search(query)).collect()
    }

    fn all_nodes(&self) -> Vec<Node> {
        self.fan_out().flat_map(|shard| shard.nodes()).collect()
    }

    fn all_relations(&self) -> Vec<Relation> {
        self.fan_out().flat_map(|shard| shard.relations()).collect()
    }

    fn find_shortest_path(&self, start: &str, end: &str, max_depth: usize) -> Vec<String> {
        if !self.node_exists(start) || !self.node_exists(end) {
            return Vec::new();
        }
        traversal::shortest_path(start, end, max_depth, |id| {
            self.shard_for(id)
                .relations_from(id)
                .into_iter()
                .map(|r| r.target)
                .collect()
        })
    }

    fn find_weighted_path(&self, start: &str, end: &str, weight_key: &str, mode: PathMode) -> Option<WeightedPath> {
        if !self.node_exists(start) || !self.node_exists(end) {
            return None;
        }
        traversal::weighted_path(start, end, mode, |id| {
            self.shard_for(id)
                .relations_from(id)
                .into_iter()
                .map(|r| {
                    let weight = r.weight(weight_key);
                    (r.target, weight)
                })
                .collect()
        })
    }

    fn calculate_page_rank(&self, iterations: usize, damping: f64) -> HashMap<String, f64> {
        let mut topology = Topology::new();
        for node in self.all_nodes() {
            topology.add_node(node.id);
        }
        for relation in self.all_relations() {
            topology.add_edge(&relation.source, &relation.target);
        }

        tracing::debug!(
            "PageRank over {} nodes, {} edges, {} iterations",
            topology.node_count(),
            topology.edge_count(),
            iterations
        );
        rank::page_rank(&topology, iterations, damping)
    }

    fn checkpoint(&self) -> Result<()> {
        let _gate = self.commit_gate.write();

        let results: Vec<(usize, Result<bool>)> = self
            .shards
            .par_iter()
            .map(|shard| (shard.id(), shard.save()))
            .collect();

        let mut saved = 0;
        let mut first_error = None;
        for (id, result) in results {
            match result {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Checkpoint failed to save shard {}: {}", id, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            // Keep the WAL: it still holds the unsaved mutations
            return Err(e);
        }

        let truncated = self.wal.len();
        self.wal.truncate()?;
        tracing::info!("Checkpoint: {} shards saved, {} WAL entries truncated", saved, truncated);
        Ok(())
    }

    fn wipe_database(&self) -> Result<()> {
        let _gate = self.commit_gate.write();

        for shard in &self.shards {
            shard.reset();
        }
        self.residency.clear();

        for i in 0..self.shards.len() {
            let path = self.config.shard_path(i);
            remove_if_exists(&path)?;
            remove_if_exists(&sibling_path(&path, TMP_SUFFIX))?;
            for copy in quarantine_files(&path)? {
                remove_if_exists(&copy)?;
            }
        }
        self.wal.truncate()?;

        tracing::info!("Wiped graph at {:?}", self.config.db_directory);
        Ok(())
    }

    fn set_auto_indexing(&self, enabled: bool) {
        self.indexing.store(enabled, Ordering::Release);
        self.shards.par_iter().for_each(|shard| shard.set_indexing(enabled));
        tracing::info!("Auto-indexing {}", if enabled { "enabled" } else { "disabled" });
    }

    fn is_auto_indexing(&self) -> bool {
        self.indexing.load(Ordering::Acquire)
    }
}

/// A `.tmp` left behind means a save crashed before its rename; the live
/// file (if any) is still the last good image.
fn remove_stale_temp_files(config: &EngineConfig) {
    for i in 0..config.shard_count {
        let tmp = sibling_path(&config.shard_path(i), TMP_SUFFIX);
        if !tmp.exists() {
            continue;
        }
        match fs::remove_file(&tmp) {
            Ok(()) => tracing::warn!("Removed stale temp file {:?}", tmp),
            Err(e) => tracing::warn!("Could not remove stale temp file {:?}: {}", tmp, e),
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
