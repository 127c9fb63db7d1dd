//! Typed errors for the engine's own contract.
//!
//! These are the errors builders and the scheduler can observe and react to.
//! Errors that are purely about the filesystem, serialization, or config
//! parsing surface as `anyhow::Error` at the CLI boundary instead; see
//! `src/bin/buildgraph/main.rs`.

use thiserror::Error;

use crate::asset_id::AssetId;
use crate::node::PhaseNumber;

/// The discriminated error kinds the engine's error-handling design names.
/// Each corresponds to one of `CannotBuildException`,
/// `ArgumentError`, `InvalidInputException`, `AssetNotFoundException`,
/// `BuilderFailure`, and `ConcurrentModification`.
#[derive(Debug, Error, Clone)]
pub enum BuildGraphError {
    /// Setup-time failure: a builder factory threw, or a phase's
    /// configuration is invalid. Fatal — aborts the whole build before any
    /// step runs.
    #[error("cannot build: {reason}")]
    CannotBuild { reason: String },

    /// Static validation failure: two builders' declared extensions
    /// overlap for some input. Fatal.
    #[error(
        "builder `{later}`'s output extension (`{extension}`) collides with builder `{earlier}`'s \
         input extension"
    )]
    ArgumentError {
        earlier: String,
        later: String,
        extension: String,
    },

    /// A step attempted to read an asset outside its allowed visibility.
    /// Reported to the step; does not fail the build by itself.
    #[error("asset `{asset}` is not visible to phase {phase}")]
    InvalidInput { asset: AssetId, phase: PhaseNumber },

    /// An explicit read of a non-existent asset, where the caller did not
    /// first call `can_read`.
    #[error("asset `{asset}` does not exist")]
    AssetNotFound { asset: AssetId },

    /// The builder's own code raised an error.
    #[error("builder failed for input `{input}`: {message}")]
    BuilderFailure { input: AssetId, message: String },

    /// A source file changed during the build. The build completes with the
    /// snapshot it started with; the next build re-invalidates.
    #[error("source `{asset}` changed concurrently with the build")]
    ConcurrentModification { asset: AssetId },
}

impl BuildGraphError {
    /// Whether this error kind aborts the whole build (as opposed to being
    /// attributed to a single step).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BuildGraphError::CannotBuild { .. } | BuildGraphError::ArgumentError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BuildGraphError>;
