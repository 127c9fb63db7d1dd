//! The discriminated node union that makes up an [`crate::graph::AssetGraph`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::asset_id::AssetId;
use crate::digest::Digest;

/// Index of a phase within the compiled [`crate::phases::BuildPhases`] list.
/// Phases are executed and compared in this order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PhaseNumber(pub u32);

impl std::fmt::Display for PhaseNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key identifying a memoized glob node: the phase and package it was
/// resolved in, plus the pattern text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobKey {
    pub phase: PhaseNumber,
    pub package: crate::asset_id::PackageName,
    pub pattern: String,
}

/// Key identifying a post-process anchor node: the source it post-processes
/// and the action name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorKey {
    pub source: AssetId,
    pub action: String,
}

/// External identity of any node in the graph. Most nodes are keyed by
/// [`AssetId`]; glob and post-process-anchor nodes have their own key space
/// since they aren't themselves file-shaped assets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeId {
    Asset(AssetId),
    Glob(GlobKey),
    Anchor(AnchorKey),
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Asset(id) => write!(f, "{id}"),
            NodeId::Glob(key) => write!(f, "glob({}, {}, {})", key.phase, key.package, key.pattern),
            NodeId::Anchor(key) => write!(f, "anchor({}, {})", key.source, key.action),
        }
    }
}

impl From<AssetId> for NodeId {
    fn from(value: AssetId) -> Self {
        NodeId::Asset(value)
    }
}

/// Outcome of a generated node's producing step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    Success,
    Failure,
}

/// A generated node's lifecycle state, tracked in memory during a build (not
/// persisted — a reloaded graph's generated nodes are always considered
/// `Success`/`Failure` from their last run until the invalidation engine
/// marks them dirty again).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildState {
    Pending,
    Building,
    Done(StepResult),
}

/// On-disk source input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceNode {
    pub digest: Digest,
    pub primary_outputs: BTreeSet<AssetId>,
}

/// Output produced by a builder application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedNode {
    pub phase: PhaseNumber,
    pub primary_input: AssetId,
    pub is_hidden: bool,
    pub was_output: bool,
    pub result: bool,
    pub digest: Option<Digest>,
    pub inputs: BTreeSet<AssetId>,
    pub primary_outputs: BTreeSet<AssetId>,
    #[serde(skip, default = "default_build_state")]
    pub state: BuildState,
}

fn default_build_state() -> BuildState {
    BuildState::Done(StepResult::Success)
}

impl GeneratedNode {
    pub fn new(phase: PhaseNumber, primary_input: AssetId, is_hidden: bool) -> Self {
        GeneratedNode {
            phase,
            primary_input,
            is_hidden,
            was_output: false,
            result: false,
            digest: None,
            inputs: BTreeSet::new(),
            primary_outputs: BTreeSet::new(),
            state: BuildState::Pending,
        }
    }
}

/// Tombstone for an `AssetId` that was read but did not exist, retained so
/// its later creation triggers invalidation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissingSourceNode;

/// Engine-owned input that affects the whole build (package config, build
/// config). Any change forces a full rebuild.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InternalNode {
    pub digest: Digest,
}

/// A memoized glob resolution at a specific `(phase, package, pattern)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobNode {
    pub results: BTreeSet<AssetId>,
}

/// Synthetic input like `$package$` or `$lib$`, used as the primary input of
/// whole-package builders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaceholderNode;

/// One per `(source, post-process action)` pair; owns the post-process
/// outputs for that pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostProcessAnchorNode {
    pub outputs: BTreeSet<AssetId>,
}

/// The discriminated `AssetNode` union. Branches on `type`, rather than
/// a base-plus-subclasses hierarchy, so downstream code matches explicitly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AssetNode {
    Source(SourceNode),
    Generated(GeneratedNode),
    MissingSource(MissingSourceNode),
    Internal(InternalNode),
    Glob(GlobNode),
    Placeholder(PlaceholderNode),
    PostProcessAnchor(PostProcessAnchorNode),
}

impl AssetNode {
    pub fn as_generated(&self) -> Option<&GeneratedNode> {
        match self {
            AssetNode::Generated(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_generated_mut(&mut self) -> Option<&mut GeneratedNode> {
        match self {
            AssetNode::Generated(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<&SourceNode> {
        match self {
            AssetNode::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_source_mut(&mut self) -> Option<&mut SourceNode> {
        match self {
            AssetNode::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_glob(&self) -> Option<&GlobNode> {
        match self {
            AssetNode::Glob(g) => Some(g),
            _ => None,
        }
    }

    /// Whether this node currently exists "on disk" in the sense that reads
    /// of it should succeed (modulo visibility rules enforced elsewhere).
    pub fn exists(&self) -> bool {
        match self {
            AssetNode::Source(_) | AssetNode::Internal(_) | AssetNode::Placeholder(_) => true,
            AssetNode::Generated(g) => g.result && g.was_output,
            AssetNode::MissingSource(_) | AssetNode::Glob(_) | AssetNode::PostProcessAnchor(_) => {
                false
            }
        }
    }
}
