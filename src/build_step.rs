//! Per-invocation façade a [`crate::builder::Builder`] uses to read inputs,
//! discover dependencies, and stage outputs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use globset::{Glob, GlobSetBuilder};

use crate::asset_id::{AssetId, PackageName};
use crate::error::{BuildGraphError, Result};
use crate::node::{GlobKey, PhaseNumber};
use crate::resolver::Resolver;

/// The live build state a step needs, as seen through the scheduler. Kept
/// behind a trait (rather than a direct `&AssetGraph` borrow) because
/// resolving visibility can recursively trigger another step's run
/// ('s on-demand escalation), which needs its own mutable access to the
/// same graph.
#[async_trait(?Send)]
pub trait StepEnvironment {
    /// If `id`'s producing phase is earlier than `reader_phase` and hasn't
    /// run yet, runs it synchronously (recursively escalating further if
    /// needed) before visibility is evaluated.
    async fn ensure_produced(&self, id: &AssetId) -> Result<()>;

    fn is_visible(
        &self,
        reader_phase: PhaseNumber,
        from_package: &PackageName,
        id: &AssetId,
        explicit_read: bool,
    ) -> Result<bool>;

    fn physical_path(&self, id: &AssetId) -> Utf8PathBuf;

    fn matching_sources(&self, package: &PackageName, pattern: &str) -> Vec<AssetId>;

    async fn read_physical(&self, path: &Utf8PathBuf) -> std::io::Result<Vec<u8>>;
}

/// Everything a completed step leaves behind, for the scheduler to commit
/// into the graph and filesystem.
pub struct StepOutcome {
    pub inputs: BTreeSet<AssetId>,
    pub globs_read: Vec<GlobKey>,
    pub staged_writes: HashMap<AssetId, Vec<u8>>,
    pub builder_result: Result<()>,
}

pub struct BuildStep<'env> {
    primary_input: AssetId,
    phase: PhaseNumber,
    package: PackageName,
    allowed_outputs: Vec<AssetId>,
    env: Rc<dyn StepEnvironment + 'env>,
    resolver: Resolver,

    overlay: HashMap<AssetId, Vec<u8>>,
    inputs: BTreeSet<AssetId>,
    globs_read: Vec<GlobKey>,
    can_read_cache: HashMap<AssetId, bool>,
    unused: HashSet<AssetId>,
    span: tracing::Span,
}

impl<'env> BuildStep<'env> {
    pub fn new(
        primary_input: AssetId,
        phase: PhaseNumber,
        package: PackageName,
        allowed_outputs: Vec<AssetId>,
        env: Rc<dyn StepEnvironment + 'env>,
        resolver: Resolver,
    ) -> Self {
        let span = tracing::info_span!("build_step", input = %primary_input, phase = %phase);
        BuildStep {
            primary_input,
            phase,
            package,
            allowed_outputs,
            env,
            resolver,
            overlay: HashMap::new(),
            inputs: BTreeSet::new(),
            globs_read: Vec::new(),
            can_read_cache: HashMap::new(),
            unused: HashSet::new(),
            span,
        }
    }

    pub fn input_id(&self) -> &AssetId {
        &self.primary_input
    }

    pub fn phase(&self) -> PhaseNumber {
        self.phase
    }

    pub fn allowed_outputs(&self) -> &[AssetId] {
        &self.allowed_outputs
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// `canRead`, memoized per step so a mid-step visibility change (another
    /// step deleting the file concurrently) doesn't contradict an earlier
    /// answer within the same step.
    pub async fn can_read(&mut self, id: &AssetId) -> Result<bool> {
        if let Some(&cached) = self.can_read_cache.get(id) {
            return Ok(cached);
        }
        let answer = self.resolve_visibility(id, false).await?;
        self.can_read_cache.insert(id.clone(), answer);
        Ok(answer)
    }

    async fn resolve_visibility(&mut self, id: &AssetId, explicit_read: bool) -> Result<bool> {
        if self.overlay.contains_key(id) {
            return Ok(true);
        }
        self.env.ensure_produced(id).await?;
        self.env.is_visible(self.phase, &self.package, id, explicit_read)
    }

    pub async fn read_as_bytes(&mut self, id: &AssetId) -> Result<Option<Vec<u8>>> {
        self.inputs.insert(id.clone());

        if let Some(bytes) = self.overlay.get(id) {
            return Ok(Some(bytes.clone()));
        }

        let visible = self.resolve_visibility(id, true).await?;
        self.can_read_cache.insert(id.clone(), visible);
        if !visible {
            return Ok(None);
        }

        let path = self.env.physical_path(id);
        match self.env.read_physical(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BuildGraphError::BuilderFailure {
                input: self.primary_input.clone(),
                message: e.to_string(),
            }),
        }
    }

    pub async fn read_as_string(&mut self, id: &AssetId) -> Result<Option<String>> {
        let bytes = self.read_as_bytes(id).await?;
        match bytes {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| BuildGraphError::BuilderFailure {
                    input: self.primary_input.clone(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn write_as_bytes(&mut self, id: &AssetId, bytes: Vec<u8>) -> Result<()> {
        if !self.allowed_outputs.contains(id) {
            return Err(BuildGraphError::BuilderFailure {
                input: self.primary_input.clone(),
                message: format!("write to `{id}` is not a declared output of this step"),
            });
        }
        self.overlay.insert(id.clone(), bytes);
        Ok(())
    }

    pub fn write_as_string(&mut self, id: &AssetId, contents: String) -> Result<()> {
        self.write_as_bytes(id, contents.into_bytes())
    }

    /// `findAssets`: matches against the currently-known source set for the
    /// given package, records the glob as an input-equivalent dependency.
    pub fn find_assets(&mut self, pattern: &str, package: &PackageName) -> Vec<AssetId> {
        self.globs_read.push(GlobKey {
            phase: self.phase,
            package: package.clone(),
            pattern: pattern.to_string(),
        });
        self.env.matching_sources(package, pattern)
    }

    /// Removes `ids` from the recorded input set, unless an id is the
    /// primary input (existence of the primary input is always observed;
    /// see the open question resolved in DESIGN.md).
    pub fn report_unused_assets(&mut self, ids: impl IntoIterator<Item = AssetId>) {
        for id in ids {
            if id != self.primary_input {
                self.unused.insert(id);
            }
        }
    }

    pub fn into_outcome(self, builder_result: Result<()>) -> StepOutcome {
        let inputs = self
            .inputs
            .into_iter()
            .filter(|id| !self.unused.contains(id))
            .collect();
        StepOutcome {
            inputs,
            globs_read: self.globs_read,
            staged_writes: self.overlay,
            builder_result,
        }
    }
}
