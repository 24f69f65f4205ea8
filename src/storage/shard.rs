//! One partition of the graph.
//!
//! A shard owns the nodes whose id routes to it, every relation whose
//! source is one of those nodes, and (when indexing is on) an inverted index
//! over its nodes. State lives behind one readers-writer lock:
//!
//! - reads take the shared lock and load the shard first if it is cold
//! - mutations and loading take the exclusive lock
//! - unloading happens under the exclusive lock, so a reader that already
//!   holds the shared lock never sees the shard disappear underneath it
//!
//! On disk a shard is one file, `part_<i>.dat`, holding the base64 of the
//! sealed `SEG_V2` payload. Saves go to `part_<i>.dat.tmp`, are fsynced and
//! then renamed over the live file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::crypto::CryptoManager;
use crate::error::{GraphError, Result};
use crate::index::InvertedIndex;
use crate::storage::codec::{decode_shard, encode_shard};
use crate::storage::{Node, Relation};

pub const TMP_SUFFIX: &str = "tmp";
pub const QUARANTINE_SUFFIX: &str = "quarantine";

#[derive(Default)]
struct ShardState {
    nodes: HashMap<String, Node>,

    // Outgoing relations grouped by source id, in insertion order
    relations: HashMap<String, Vec<Relation>>,

    index: Option<InvertedIndex>,
    indexing: bool,
    loaded: bool,
    dirty: bool,
    quarantined: bool,
}

impl ShardState {
    fn relation_count(&self) -> usize {
        self.relations.values().map(Vec::len).sum()
    }

    fn put_node(&mut self, node: Node) {
        if let Some(index) = self.index.as_mut() {
            if let Some(old) = self.nodes.get(&node.id) {
                index.remove(old);
            }
            index.insert(&node);
        }
        self.nodes.insert(node.id.clone(), node);
        self.dirty = true;
    }

    fn remove_node(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.remove(id) else {
            return false;
        };
        if let Some(index) = self.index.as_mut() {
            index.remove(&node);
        }
        self.relations.remove(id);
        self.dirty = true;
        true
    }

    fn add_relation(&mut self, relation: Relation) -> bool {
        let list = self.relations.entry(relation.source.clone()).or_default();
        self.dirty = true;
        if let Some(existing) = list
            .iter_mut()
            .find(|r| r.matches(&relation.source, &relation.target, &relation.relation_type))
        {
            *existing = relation;
            return false;
        }
        list.push(relation);
        true
    }

    fn take_relation(&mut self, source: &str, target: &str, relation_type: &str) -> Option<Relation> {
        let list = self.relations.get_mut(source)?;
        let pos = list.iter().position(|r| r.matches(source, target, relation_type))?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.relations.remove(source);
        }
        self.dirty = true;
        Some(removed)
    }

    fn remove_relations_to(&mut self, target: &str) -> usize {
        let mut removed = 0;
        self.relations.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.target != target);
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    fn relations_from(&self, source: &str) -> Vec<Relation> {
        self.relations.get(source).cloned().unwrap_or_default()
    }

    fn search(&self, query: &str) -> Vec<Node> {
        match (&self.index, self.indexing) {
            (Some(index), true) => index
                .lookup(query)
                .filter_map(|id| self.nodes.get(id))
                .cloned()
                .collect(),
            _ => {
                let needle = query.to_lowercase();
                self.nodes
                    .values()
                    .filter(|n| n.contains_text(&needle))
                    .cloned()
                    .collect()
            }
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.relations.clear();
        self.index = None;
        self.loaded = false;
        self.dirty = false;
    }
}

pub struct Shard {
    id: usize,
    path: PathBuf,
    crypto: Arc<CryptoManager>,
    state: RwLock<ShardState>,
}

impl Shard {
    /// Cold shard backed by `path`. Nothing is read until first access.
    pub fn new(id: usize, path: PathBuf, crypto: Arc<CryptoManager>) -> Self {
        Self {
            id,
            path,
            crypto,
            state: RwLock::new(ShardState::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Populate from disk on first call; no-op afterwards. A file that
    /// cannot be read is quarantined and the shard starts empty.
    pub fn load_if_required(&self) {
        if self.state.read().loaded {
            return;
        }
        let mut state = self.state.write();
        self.load_locked(&mut state);
    }

    /// Persist if loaded and dirty. Returns whether a file was written.
    /// The dirty flag is cleared only on success.
    pub fn save(&self) -> Result<bool> {
        {
            let state = self.state.read();
            if !state.loaded || !state.dirty {
                return Ok(false);
            }
        }
        let mut state = self.state.write();
        self.save_locked(&mut state)
    }

    /// Save, then drop all in-memory state. If the save fails the shard
    /// stays resident and dirty.
    pub fn unload(&self) -> Result<bool> {
        let mut state = self.state.write();
        if !state.loaded {
            return Ok(false);
        }
        self.save_locked(&mut state)?;
        state.clear();
        tracing::debug!("Shard {} unloaded", self.id);
        Ok(true)
    }

    /// Drop in-memory state without saving. Used when wiping the database.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.clear();
        state.quarantined = false;
    }

    /// Enable or disable the inverted index. Enabling on a loaded shard
    /// rebuilds the index before returning.
    pub fn set_indexing(&self, enabled: bool) {
        let mut state = self.state.write();
        state.indexing = enabled;
        state.index = if enabled && state.loaded {
            Some(InvertedIndex::build(state.nodes.values()))
        } else {
            None
        };
    }

    /// Exclusive access for a sequence of mutations. Loads the shard first.
    pub fn write(&self) -> ShardWriteGuard<'_> {
        let mut state = self.state.write();
        self.load_locked(&mut state);
        ShardWriteGuard { state }
    }

    fn read(&self) -> RwLockReadGuard<'_, ShardState> {
        loop {
            self.load_if_required();
            let state = self.state.read();
            // An eviction may slip in between loading and locking
            if state.loaded {
                return state;
            }
        }
    }

    fn load_locked(&self, state: &mut RwLockWriteGuard<'_, ShardState>) {
        if state.loaded {
            return;
        }

        match self.read_image() {
            Ok(Some(image)) => {
                for node in image.nodes {
                    state.nodes.insert(node.id.clone(), node);
                }
                for rel in image.relations {
                    state.relations.entry(rel.source.clone()).or_default().push(rel);
                }
                tracing::debug!(
                    "Shard {} loaded: {} nodes, {} relations",
                    self.id,
                    state.nodes.len(),
                    state.relation_count()
                );
            }
            Ok(None) => {
                tracing::debug!("Shard {} has no file yet; starting empty", self.id);
            }
            Err(e) => {
                tracing::error!("FATAL: load failed for shard {}: {}", self.id, e);
                self.quarantine_file();
                state.nodes.clear();
                state.relations.clear();
                state.quarantined = true;
            }
        }

        state.loaded = true;
        state.dirty = false;
        if state.indexing {
            state.index = Some(InvertedIndex::build(state.nodes.values()));
        }
    }

    fn read_image(&self) -> Result<Option<crate::storage::codec::ShardImage>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let corrupt = |reason: String| GraphError::StorageCorruption { shard: self.id, reason };

        let raw = fs::read(&self.path).map_err(|e| corrupt(format!("read: {}", e)))?;
        let text = std::str::from_utf8(&raw).map_err(|e| corrupt(format!("not base64 text: {}", e)))?;
        let sealed = BASE64
            .decode(text.trim())
            .map_err(|e| corrupt(format!("base64: {}", e)))?;
        let payload = self.crypto.decrypt(&sealed).map_err(|e| corrupt(e.to_string()))?;
        let image = decode_shard(&payload).map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(image))
    }

    fn quarantine_file(&self) {
        let target = next_quarantine_path(&self.path);
        match fs::rename(&self.path, &target) {
            Ok(()) => tracing::error!("Shard {} file moved to {:?}", self.id, target),
            Err(e) => tracing::error!("Shard {} file could not be quarantined: {}", self.id, e),
        }
    }

    fn save_locked(&self, state: &mut ShardState) -> Result<bool> {
        if !state.loaded || !state.dirty {
            return Ok(false);
        }

        let nodes: Vec<&Node> = state.nodes.values().collect();
        let relations: Vec<&Relation> = state.relations.values().flatten().collect();
        let payload = encode_shard(&nodes, &relations)?;
        let sealed = self.crypto.encrypt(&payload)?;
        let encoded = BASE64.encode(sealed);

        write_atomic(&self.path, encoded.as_bytes())?;
        state.dirty = false;

        tracing::debug!(
            "Shard {} saved: {} nodes, {} relations",
            self.id,
            nodes.len(),
            relations.len()
        );
        Ok(true)
    }

    // ── Convenience single-operation writes ────────────────────────

    pub fn put_node(&self, node: Node) {
        self.write().put_node(node);
    }

    pub fn remove_node(&self, id: &str) -> bool {
        self.write().remove_node(id)
    }

    pub fn add_relation(&self, relation: Relation) -> bool {
        self.write().add_relation(relation)
    }

    pub fn remove_relation(&self, source: &str, target: &str, relation_type: &str) -> bool {
        self.write().remove_relation(source, target, relation_type)
    }

    pub fn remove_relations_to(&self, target: &str) -> usize {
        self.write().state.remove_relations_to(target)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.read().nodes.get(id).cloned()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.read().nodes.contains_key(id)
    }

    pub fn relations_from(&self, source: &str) -> Vec<Relation> {
        self.read().relations_from(source)
    }

    /// Token lookup when indexed, case-insensitive substring scan otherwise.
    pub fn search(&self, query: &str) -> Vec<Node> {
        self.read().search(query)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.read().nodes.values().cloned().collect()
    }

    pub fn relations(&self) -> Vec<Relation> {
        self.read().relations.values().flatten().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn relation_count(&self) -> usize {
        self.read().relation_count()
    }

    // ── Flags (never trigger a load) ───────────────────────────────

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    pub fn is_quarantined(&self) -> bool {
        self.state.read().quarantined
    }

    pub fn is_indexing(&self) -> bool {
        self.state.read().indexing
    }
}

/// Exclusive, loaded view of a shard. Held by the engine across the WAL
/// append and the in-memory apply so both happen in the same order.
pub struct ShardWriteGuard<'a> {
    state: RwLockWriteGuard<'a, ShardState>,
}

impl ShardWriteGuard<'_> {
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.state.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.state.nodes.contains_key(id)
    }

    /// Insert or replace; keeps the index in step.
    pub fn put_node(&mut self, node: Node) {
        self.state.put_node(node);
    }

    /// Remove the node and its outgoing relations.
    pub fn remove_node(&mut self, id: &str) -> bool {
        self.state.remove_node(id)
    }

    /// Set semantics on (source, target, type); an existing match has its
    /// properties replaced. Returns true if a new relation was added.
    pub fn add_relation(&mut self, relation: Relation) -> bool {
        self.state.add_relation(relation)
    }

    pub fn remove_relation(&mut self, source: &str, target: &str, relation_type: &str) -> bool {
        self.state.take_relation(source, target, relation_type).is_some()
    }

    pub fn find_relation(&self, source: &str, target: &str, relation_type: &str) -> Option<&Relation> {
        self.state
            .relations
            .get(source)?
            .iter()
            .find(|r| r.matches(source, target, relation_type))
    }
}

/// Write `data` next to `path`, fsync, and rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = sibling_path(path, TMP_SUFFIX);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // Make the rename itself durable
    #[cfg(unix)]
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            File::open(dir)?.sync_all()?;
        }
    }
    Ok(())
}

/// `part_3.dat` -> `part_3.dat.<suffix>`
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// First free of `part_3.dat.quarantine`, `part_3.dat.quarantine.1`, ...
fn next_quarantine_path(path: &Path) -> PathBuf {
    let first = sibling_path(path, QUARANTINE_SUFFIX);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| sibling_path(path, &format!("{}.{}", QUARANTINE_SUFFIX, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Every quarantined copy of the shard file at `path`.
pub fn quarantine_files(path: &Path) -> io::Result<Vec<PathBuf>> {
    let first = sibling_path(path, QUARANTINE_SUFFIX);
    let Some(base) = first.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
        return Ok(Vec::new());
    };
    let dir = match first.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let numbered = name
            .strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if name == base || numbered {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}
