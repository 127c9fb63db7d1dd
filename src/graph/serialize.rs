//! Persisted form of an [`AssetGraph`]: a flat, versioned JSON document at
//! `<cache-root>/<script>/asset_graph.json`.
//!
//! Grounded on `button-rs`'s `BuildState::from_reader`: the on-disk schema
//! carries an explicit version tag, and any mismatch is treated the same as
//! "file absent" — a fresh graph, never a migration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::{AnchorKey, AssetNode, GlobKey, NodeId};

use super::AssetGraph;

/// Bumped whenever the persisted shape of [`AssetNode`] or [`NodeId`]
/// changes incompatibly. Older files are discarded rather than migrated.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedGraph {
    version: u32,
    nodes: Vec<PersistedNode>,
}

#[derive(Serialize, Deserialize)]
struct PersistedNode {
    id: NodeId,
    node: AssetNode,
}

impl AssetGraph {
    pub fn to_json(&self) -> serde_json::Result<String> {
        let nodes = self
            .node_ids()
            .filter_map(|id| self.get(id).map(|node| (id.clone(), node.clone())))
            .map(|(id, node)| PersistedNode { id, node })
            .collect();
        let persisted = PersistedGraph {
            version: SCHEMA_VERSION,
            nodes,
        };
        serde_json::to_string_pretty(&persisted)
    }

    /// Parses a persisted graph, or returns `None` if the version tag does
    /// not match [`SCHEMA_VERSION`] — callers treat `None` exactly like a
    /// missing file and start from an empty graph.
    pub fn from_json(text: &str) -> Option<AssetGraph> {
        let persisted: PersistedGraph = serde_json::from_str(text).ok()?;
        if persisted.version != SCHEMA_VERSION {
            return None;
        }
        let mut graph = AssetGraph::new();
        for entry in persisted.nodes {
            graph.add(entry.id, entry.node);
        }
        Some(graph)
    }

    /// Diagnostic snapshot of which `(phase, package, pattern)` glob keys and
    /// `(source, action)` anchor keys are currently memoized, used by tests
    /// and `--verbose` reporting rather than by the engine itself.
    pub fn debug_keys(&self) -> (Vec<GlobKey>, Vec<AnchorKey>) {
        let mut globs = Vec::new();
        let mut anchors = Vec::new();
        for id in self.node_ids() {
            match id {
                NodeId::Glob(key) => globs.push(key.clone()),
                NodeId::Anchor(key) => anchors.push(key.clone()),
                NodeId::Asset(_) => {}
            }
        }
        (globs, anchors)
    }

    /// Digest of every source/internal node, used by the invalidation engine
    /// to detect content changes between runs without needing a second,
    /// separately-persisted manifest.
    pub fn content_digests(&self) -> BTreeMap<NodeId, crate::digest::Digest> {
        let mut result = BTreeMap::new();
        for id in self.node_ids() {
            let digest = match self.get(id) {
                Some(AssetNode::Source(s)) => Some(s.digest),
                Some(AssetNode::Internal(i)) => Some(i.digest),
                _ => None,
            };
            if let Some(digest) = digest {
                result.insert(id.clone(), digest);
            }
        }
        result
    }
}
