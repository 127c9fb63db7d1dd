//! Incremental, multi-phase code-generation build engine for a
//! package-structured source tree.
//!
//! A set of source files, organized into named packages (see
//! [`asset_id::PackageGraph`]), is transformed by an ordered list of builder
//! applications (see [`phases::BuildPhases`]). Each run computes the minimal
//! set of builder invocations needed to bring generated outputs up to date
//! (see [`graph::invalidate`]), executes them through the
//! [`scheduler::Scheduler`], and persists the resulting [`graph::AssetGraph`]
//! so that later runs only redo what changed.

pub mod asset_id;
pub mod build_step;
pub mod builder;
pub mod config;
pub mod digest;
pub mod error;
pub mod graph;
pub mod node;
pub mod phases;
pub mod reader_writer;
pub mod resolver;
pub mod scheduler;
pub mod tracing_init;

pub use asset_id::{AssetId, PackageGraph, PackageName};
pub use digest::Digest;
pub use error::BuildGraphError;
pub use graph::AssetGraph;
pub use node::{AssetNode, NodeId, PhaseNumber};

/// Default name of the directory the engine owns on disk for its persisted
/// graph and hidden-output cache, relative to the root package directory.
pub const DEFAULT_CACHE_ROOT: &str = ".buildgraph";

/// Script identity used when the embedding tool (out of scope for this
/// crate) does not assign one.
pub const DEFAULT_SCRIPT_ID: &str = "default";
