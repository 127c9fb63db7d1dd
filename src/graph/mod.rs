//! The in-memory asset dependency graph: nodes, edges, and the primitives
//! invalidation and scheduling are built on top of.

pub mod invalidate;
pub mod serialize;

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::NodeIndex;
use petgraph::prelude::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::asset_id::{AssetId, PackageGraph};
use crate::node::{
    AnchorKey, AssetNode, GeneratedNode, GlobKey, GlobNode, InternalNode, MissingSourceNode,
    NodeId, PhaseNumber, PlaceholderNode, PostProcessAnchorNode, SourceNode,
};

/// An edge carries no data of its own; direction alone (`input -> output`)
/// is the relationship. Named, rather than `()`, so petgraph's generic
/// parameters read clearly at call sites.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEdge;

/// The asset dependency graph. Forward edges only (`inputs`, `primary_input`,
/// `primary_outputs` live on the nodes themselves); the reverse index
/// `input -> consumers` is computed on demand by [`AssetGraph::compute_outputs`]
/// rather than persisted.
#[derive(Default)]
pub struct AssetGraph {
    graph: StableGraph<AssetNode, InputEdge, Directed>,
    index: HashMap<NodeId, NodeIndex>,
}

impl AssetGraph {
    pub fn new() -> Self {
        AssetGraph::default()
    }

    /// Builds an initial graph containing only source, internal, and
    /// placeholder nodes — the starting point before any builder has run.
    pub fn build(
        sources: impl IntoIterator<Item = (AssetId, SourceNode)>,
        internal_sources: impl IntoIterator<Item = (AssetId, InternalNode)>,
        package_graph: &PackageGraph,
    ) -> AssetGraph {
        let mut graph = AssetGraph::new();
        for (id, node) in sources {
            graph.add(NodeId::Asset(id), AssetNode::Source(node));
        }
        for (id, node) in internal_sources {
            graph.add(NodeId::Asset(id), AssetNode::Internal(node));
        }
        for package in package_graph.packages() {
            for placeholder in ["$package$", "$lib$"] {
                let id = AssetId::new(package.name.clone(), placeholder.to_string());
                graph.add(NodeId::Asset(id), AssetNode::Placeholder(PlaceholderNode));
            }
        }
        graph
    }

    pub fn add(&mut self, id: NodeId, node: AssetNode) -> NodeIndex {
        if let Some(&existing) = self.index.get(&id) {
            self.graph[existing] = node;
            return existing;
        }
        let index = self.graph.add_node(node);
        self.index.insert(id, index);
        index
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&AssetNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut AssetNode> {
        let idx = *self.index.get(id)?;
        Some(&mut self.graph[idx])
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<AssetNode> {
        let idx = self.index.remove(id)?;
        self.graph.remove_node(idx)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.index.keys()
    }

    pub fn generated_node_ids(&self) -> Vec<AssetId> {
        self.index
            .iter()
            .filter_map(|(id, &idx)| match (id, &self.graph[idx]) {
                (NodeId::Asset(asset), AssetNode::Generated(_)) => Some(asset.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn source_node_ids(&self) -> Vec<AssetId> {
        self.index
            .iter()
            .filter_map(|(id, &idx)| match (id, &self.graph[idx]) {
                (NodeId::Asset(asset), AssetNode::Source(_)) => Some(asset.clone()),
                _ => None,
            })
            .collect()
    }

    /// The `$package$`/`$lib$` synthetic ids every package gets, used as the
    /// primary input of whole-package builders.
    pub fn placeholder_node_ids(&self) -> Vec<AssetId> {
        self.index
            .iter()
            .filter_map(|(id, &idx)| match (id, &self.graph[idx]) {
                (NodeId::Asset(asset), AssetNode::Placeholder(_)) => Some(asset.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wires `inputs -> output` edges for a just-committed generated node,
    /// stripping any self-edge per invariant 3 (a builder reading its own
    /// declared output never creates one).
    pub fn set_generated_inputs(&mut self, output: &AssetId, inputs: &BTreeSet<AssetId>) {
        let output_node_id = NodeId::Asset(output.clone());
        let Some(&output_idx) = self.index.get(&output_node_id) else {
            return;
        };

        // Drop edges from any previous run of this step before rewiring.
        let existing_edges: Vec<_> = self
            .graph
            .edges_directed(output_idx, petgraph::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in existing_edges {
            self.graph.remove_edge(edge);
        }

        for input in inputs {
            if input == output {
                continue;
            }
            let input_node_id = NodeId::Asset(input.clone());
            let input_idx = match self.index.get(&input_node_id) {
                Some(&idx) => idx,
                None => self.add(input_node_id, AssetNode::MissingSource(MissingSourceNode)),
            };
            self.graph.add_edge(input_idx, output_idx, InputEdge);
        }

        if let Some(AssetNode::Generated(generated)) = self.get_mut(&output_node_id) {
            generated.inputs = inputs.iter().filter(|i| *i != output).cloned().collect();
        }
    }

    /// Records that `output`'s primary input is `primary`, maintaining the
    /// bidirectional consistency of invariant 2 (`primary.primary_outputs`
    /// contains `output`).
    pub fn link_primary(&mut self, primary: &AssetId, output: &AssetId) {
        if let Some(node) = self.get_mut(&NodeId::Asset(primary.clone())) {
            match node {
                AssetNode::Source(s) => {
                    s.primary_outputs.insert(output.clone());
                }
                AssetNode::Generated(g) => {
                    g.primary_outputs.insert(output.clone());
                }
                _ => {}
            }
        }
    }

    pub fn add_glob(&mut self, key: GlobKey, results: BTreeSet<AssetId>) {
        self.add(NodeId::Glob(key), AssetNode::Glob(GlobNode { results }));
    }

    /// Records that `output` read `key` while building, so that a later
    /// change to the glob's result set can dirty exactly this consumer
    /// instead of every generated node in the graph.
    pub fn link_glob(&mut self, key: &GlobKey, output: &AssetId) {
        let Some(&glob_idx) = self.index.get(&NodeId::Glob(key.clone())) else {
            return;
        };
        let Some(&output_idx) = self.index.get(&NodeId::Asset(output.clone())) else {
            return;
        };
        if !self.graph.contains_edge(glob_idx, output_idx) {
            self.graph.add_edge(glob_idx, output_idx, InputEdge);
        }
    }

    /// The generated nodes that read `key` via [`Self::link_glob`].
    pub fn glob_consumers(&self, key: &GlobKey) -> HashSet<AssetId> {
        let Some(&idx) = self.index.get(&NodeId::Glob(key.clone())) else {
            return HashSet::new();
        };
        self.graph
            .edges_directed(idx, petgraph::Outgoing)
            .filter_map(|edge| match self.id_for_index(edge.target()) {
                Some(NodeId::Asset(id)) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn update_post_process_build_step(&mut self, key: AnchorKey, outputs: BTreeSet<AssetId>) {
        self.add(
            NodeId::Anchor(key),
            AssetNode::PostProcessAnchor(PostProcessAnchorNode { outputs }),
        );
    }

    /// The reverse index `input -> consumers`, computed fresh from the
    /// forward edges each time. Deliberately not cached on the struct.
    pub fn compute_outputs(&self) -> HashMap<AssetId, HashSet<AssetId>> {
        let by_index = self.index_to_id();
        let mut result: HashMap<AssetId, HashSet<AssetId>> = HashMap::new();
        for (id, &idx) in &self.index {
            let NodeId::Asset(output) = id else {
                continue;
            };
            for edge in self.graph.edges_directed(idx, petgraph::Incoming) {
                if let Some(NodeId::Asset(input)) = by_index.get(&edge.source()) {
                    result
                        .entry(input.clone())
                        .or_default()
                        .insert(output.clone());
                }
            }
        }
        result
    }

    /// `NodeIndex -> NodeId`, the inverse of `self.index`, built once per
    /// call rather than linearly scanned per edge.
    fn index_to_id(&self) -> HashMap<NodeIndex, &NodeId> {
        self.index.iter().map(|(id, &idx)| (idx, id)).collect()
    }

    fn id_for_index(&self, idx: NodeIndex) -> Option<&NodeId> {
        self.index
            .iter()
            .find_map(|(id, &i)| (i == idx).then_some(id))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Removes every generated node from the graph (but not sources,
    /// internals, or placeholders) — used when the invalidation engine
    /// decides a full rebuild is required.
    pub fn clear_generated(&mut self) {
        let to_remove: Vec<NodeId> = self
            .index
            .iter()
            .filter(|(_, &idx)| matches!(self.graph[idx], AssetNode::Generated(_)))
            .map(|(id, _)| id.clone())
            .collect();
        for id in to_remove {
            self.remove(&id);
        }
    }
}
