//! The `Builder` trait: a pure transformation from a primary input to zero
//! or more outputs, invoked through a [`crate::build_step::BuildStep`].
//!
//! Declared `?Send` (via `async-trait`) because the scheduler runs at most
//! one builder invocation per phase at a time — there is never a need
//! to move a builder or its future across threads.

use async_trait::async_trait;

use crate::build_step::BuildStep;
use crate::error::Result;
use crate::phases::BuilderExtensions;

#[async_trait(?Send)]
pub trait Builder {
    /// Runs this builder for the step's primary input, reading/writing
    /// through `step`. A returned `Err` marks the step failed; a panic is
    /// not caught (matching the grounding repo's convention that builder
    /// bugs should surface as process aborts in tests, not swallowed).
    async fn build(&self, step: &mut BuildStep<'_>) -> Result<()>;

    /// The static `buildExtensions` contract this builder declares.
    fn extensions(&self) -> &BuilderExtensions;
}

/// A builder that copies bytes verbatim from its primary input to every
/// declared output. Used by the end-to-end scenario tests and as a minimal
/// real implementation rather than a test-only mock.
pub struct CopyBuilder {
    extensions: BuilderExtensions,
}

impl CopyBuilder {
    pub fn new(from_ext: impl Into<String>, to_ext: impl Into<String>) -> Self {
        CopyBuilder {
            extensions: BuilderExtensions::new(vec![(from_ext.into(), vec![to_ext.into()])]),
        }
    }
}

#[async_trait(?Send)]
impl Builder for CopyBuilder {
    async fn build(&self, step: &mut BuildStep<'_>) -> Result<()> {
        let input = step.input_id().clone();
        let Some(bytes) = step.read_as_bytes(&input).await? else {
            return Ok(());
        };
        for output in step.allowed_outputs().to_vec() {
            step.write_as_bytes(&output, bytes.clone())?;
        }
        Ok(())
    }

    fn extensions(&self) -> &BuilderExtensions {
        &self.extensions
    }
}
