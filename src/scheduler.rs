//! Executes a [`BuildPhases`] against an [`AssetGraph`]: phase-ordered,
//! at most one concurrent builder action per phase, with synchronous
//! on-demand escalation of optional earlier phases and cycle detection.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use async_trait::async_trait;
use camino::Utf8PathBuf;

use crate::asset_id::{AssetId, PackageName};
use crate::build_step::{BuildStep, StepEnvironment, StepOutcome};
use crate::digest::Digest;
use crate::error::{BuildGraphError, Result};
use crate::graph::AssetGraph;
use crate::node::{AssetNode, BuildState, GeneratedNode, NodeId, PhaseNumber, StepResult};
use crate::phases::{BuildPhase, BuildPhases, InBuildPhase, InputSet};
use crate::reader_writer::ReaderWriter;
use crate::resolver::Resolver;

/// Patterns limiting which non-hidden outputs *must* be produced this run.
/// `None` means no restriction.
pub type BuildFilters = Option<InputSet>;

/// Directories scoping which inputs are mandatorily in scope this run.
pub type BuildDirs = Option<InputSet>;

pub struct SchedulerOptions {
    pub delete_conflicting_outputs: bool,
    pub low_resources_mode: bool,
    pub build_filters: BuildFilters,
    pub build_dirs: BuildDirs,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            delete_conflicting_outputs: false,
            low_resources_mode: false,
            build_filters: None,
            build_dirs: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub failed_steps: Vec<(AssetId, String)>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

/// Shared, mutable build state visible to every in-flight step, including
/// ones triggered recursively through on-demand escalation.
struct Shared<'p> {
    phases: &'p BuildPhases,
    reader_writer: &'p ReaderWriter,
    graph: RefCell<AssetGraph>,
    completed: RefCell<HashSet<AssetId>>,
    running: RefCell<HashSet<AssetId>>,
    failed: RefCell<Vec<(AssetId, String)>>,
    /// Working set of asset ids that still need a builder invocation this
    /// run. Seeded from invalidation's pessimistic dirty set and narrowed
    /// over the course of the run by [`Shared::cut_off_unchanged`].
    dirty: RefCell<HashSet<AssetId>>,
    options: &'p SchedulerOptions,
    /// Set once, right after construction, so a step can hand a fresh `Rc`
    /// to itself down to a [`BuildStep`] even though escalation only has
    /// `&self` to work with (it's invoked through a `dyn StepEnvironment`).
    self_ref: RefCell<Option<std::rc::Weak<Shared<'p>>>>,
}

#[async_trait(?Send)]
impl<'p> StepEnvironment for Shared<'p> {
    async fn ensure_produced(&self, id: &AssetId) -> Result<()> {
        if self.completed.borrow().contains(id) {
            return Ok(());
        }
        let exists_already = self
            .graph
            .borrow()
            .get(&NodeId::Asset(id.clone()))
            .map(AssetNode::exists)
            .unwrap_or(false);
        if exists_already {
            return Ok(());
        }
        let Some((phase_number, in_build, primary_input)) = self.phases.find_producer(id) else {
            return Ok(());
        };
        self.run_one_step(phase_number, in_build, primary_input).await
    }

    fn is_visible(
        &self,
        reader_phase: PhaseNumber,
        from_package: &PackageName,
        id: &AssetId,
        explicit_read: bool,
    ) -> Result<bool> {
        self.reader_writer
            .is_visible(&self.graph.borrow(), reader_phase, from_package, id, explicit_read)
    }

    fn physical_path(&self, id: &AssetId) -> Utf8PathBuf {
        let is_hidden = self
            .graph
            .borrow()
            .get(&NodeId::Asset(id.clone()))
            .and_then(AssetNode::as_generated)
            .map(|g| g.is_hidden)
            .unwrap_or(false);
        self.reader_writer.physical_path(id, is_hidden)
    }

    fn matching_sources(&self, package: &PackageName, pattern: &str) -> Vec<AssetId> {
        let mut builder = globset::GlobSetBuilder::new();
        if let Ok(glob) = globset::Glob::new(pattern) {
            builder.add(glob);
        }
        let set = builder.build().unwrap_or_else(|_| globset::GlobSet::empty());
        self.graph
            .borrow()
            .source_node_ids()
            .into_iter()
            .filter(|id| &id.package == package && set.is_match(&id.path))
            .collect()
    }

    async fn read_physical(&self, path: &Utf8PathBuf) -> std::io::Result<Vec<u8>> {
        self.reader_writer.read(path).await
    }
}

impl<'p> Shared<'p> {
    /// Runs exactly one builder invocation for `(primary_input, phase_number)`,
    /// detecting cycles via `running` and committing the result into the
    /// graph (and, on success, the filesystem) before returning.
    async fn run_one_step(
        &self,
        phase_number: PhaseNumber,
        phase: &InBuildPhase,
        primary_input: AssetId,
    ) -> Result<()> {
        if self.completed.borrow().contains(&primary_input) {
            return Ok(());
        }
        if !self.running.borrow_mut().insert(primary_input.clone()) {
            return Err(BuildGraphError::CannotBuild {
                reason: format!("cycle detected while producing `{primary_input}`"),
            });
        }

        // The primary input may itself be the not-yet-materialized output of
        // an earlier, optional phase; demand it before running this step.
        if let Err(err) = self.ensure_produced(&primary_input).await {
            self.running.borrow_mut().remove(&primary_input);
            return Err(err);
        }

        let Some(outputs) = phase.extensions().outputs_for(&primary_input) else {
            self.running.borrow_mut().remove(&primary_input);
            return Ok(());
        };

        let package = primary_input.package.clone();
        let env: Rc<dyn StepEnvironment + 'p> = self
            .self_ref
            .borrow()
            .as_ref()
            .and_then(std::rc::Weak::upgrade)
            .expect("Shared::self_ref initialized before any step runs");
        let mut step = BuildStep::new(
            primary_input.clone(),
            phase_number,
            package,
            outputs.clone(),
            env,
            Resolver,
        );

        let builder_result = phase.builder.build(&mut step).await;
        let outcome = step.into_outcome(builder_result);

        self.commit(phase_number, &primary_input, phase.hide_output, &outputs, outcome)
            .await;

        self.running.borrow_mut().remove(&primary_input);
        self.completed.borrow_mut().insert(primary_input);
        Ok(())
    }

    async fn commit(
        &self,
        phase_number: PhaseNumber,
        primary_input: &AssetId,
        is_hidden: bool,
        declared_outputs: &[AssetId],
        outcome: StepOutcome,
    ) {
        let succeeded = outcome.builder_result.is_ok();

        for output in declared_outputs {
            let old_digest = self
                .graph
                .borrow()
                .get(&NodeId::Asset(output.clone()))
                .and_then(AssetNode::as_generated)
                .and_then(|g| g.digest);

            let wrote = outcome.staged_writes.contains_key(output);
            let mut node = GeneratedNode::new(phase_number, primary_input.clone(), is_hidden);
            node.inputs = outcome.inputs.clone();
            node.state = BuildState::Done(if succeeded {
                StepResult::Success
            } else {
                StepResult::Failure
            });

            let mut new_digest = None;
            if succeeded && wrote {
                let bytes = &outcome.staged_writes[output];
                let digest = Digest::of(output, bytes);
                let path = self.physical_path(output);
                if self.reader_writer.write(&path, bytes).await.is_ok() {
                    node.was_output = true;
                    node.result = true;
                    node.digest = Some(digest);
                    new_digest = Some(digest);
                }
            } else {
                // Overdeclared (succeeded but didn't write) or failed: the
                // node exists in the graph but carries no output bytes.
                node.was_output = false;
                node.result = succeeded;
            }

            {
                let mut graph = self.graph.borrow_mut();
                graph.add(NodeId::Asset(output.clone()), AssetNode::Generated(node));
                graph.set_generated_inputs(output, &outcome.inputs);
                graph.link_primary(primary_input, output);
            }

            if new_digest.is_some() && new_digest == old_digest {
                self.cut_off_unchanged(output);
            }
        }

        for glob_key in &outcome.globs_read {
            let results = self.matching_sources(&glob_key.package, &glob_key.pattern);
            let mut graph = self.graph.borrow_mut();
            graph.add_glob(glob_key.clone(), results.into_iter().collect());
            for output in declared_outputs {
                graph.link_glob(glob_key, output);
            }
        }

        if let Err(err) = &outcome.builder_result {
            self.failed.borrow_mut().push((primary_input.clone(), err.to_string()));
        }
    }

    /// Early cutoff: `output` was just rebuilt but came out byte-for-byte
    /// identical to its previous digest, so the consumers that invalidation
    /// pessimistically marked dirty purely because `output` changed don't
    /// actually need to re-run. Drops `output` and, transitively, any direct
    /// consumer whose only remaining reason to be dirty was this edge.
    fn cut_off_unchanged(&self, output: &AssetId) {
        let graph = self.graph.borrow();
        let mut dirty = self.dirty.borrow_mut();
        dirty.remove(output);

        let outputs = graph.compute_outputs();
        let mut queue: Vec<AssetId> = outputs.get(output).into_iter().flatten().cloned().collect();
        while let Some(consumer) = queue.pop() {
            if !dirty.contains(&consumer) {
                continue;
            }
            let still_dirty_for_other_reason = graph
                .get(&NodeId::Asset(consumer.clone()))
                .and_then(AssetNode::as_generated)
                .map(|g| g.inputs.iter().any(|input| input != output && dirty.contains(input)))
                .unwrap_or(true);
            if still_dirty_for_other_reason {
                continue;
            }
            dirty.remove(&consumer);
            if let Some(next) = outputs.get(&consumer) {
                queue.extend(next.iter().cloned());
            }
        }
    }
}

pub struct Scheduler<'p> {
    phases: &'p BuildPhases,
    reader_writer: &'p ReaderWriter,
    options: SchedulerOptions,
}

impl<'p> Scheduler<'p> {
    pub fn new(phases: &'p BuildPhases, reader_writer: &'p ReaderWriter, options: SchedulerOptions) -> Self {
        Scheduler { phases, reader_writer, options }
    }

    /// Runs every non-optional phase in order. Optional phases never run
    /// eagerly here; they run only via [`Shared::ensure_produced`] when a
    /// later, non-optional (or transitively demanded) step reads one of
    /// their outputs.
    ///
    /// Only candidates that are dirty (per `dirty`, as narrowed by early
    /// cutoff during the run) or have never been built are actually handed
    /// to a builder; everything else is already up to date and is skipped.
    pub async fn run(self, mut graph: AssetGraph, dirty: &HashSet<AssetId>) -> Result<(AssetGraph, BuildReport)> {
        if self.options.delete_conflicting_outputs {
            self.delete_conflicting_outputs(&mut graph).await;
        }

        let shared = Rc::new(Shared {
            phases: self.phases,
            reader_writer: self.reader_writer,
            graph: RefCell::new(graph),
            completed: RefCell::new(HashSet::new()),
            running: RefCell::new(HashSet::new()),
            failed: RefCell::new(Vec::new()),
            dirty: RefCell::new(dirty.clone()),
            options: &self.options,
            self_ref: RefCell::new(None),
        });
        *shared.self_ref.borrow_mut() = Some(Rc::downgrade(&shared));

        for (phase_number, phase) in self.phases.iter() {
            let BuildPhase::InBuild(in_build) = phase else {
                continue;
            };
            if in_build.is_optional {
                continue;
            }

            let candidates = self.candidate_inputs(&shared, phase_number, in_build);
            for primary_input in candidates {
                if !self.needs_rebuild(&shared, in_build, &primary_input) {
                    continue;
                }
                shared.run_one_step(phase_number, in_build, primary_input).await?;
            }
        }

        let failed = shared.failed.borrow().clone();
        let graph = Rc::try_unwrap(shared)
            .unwrap_or_else(|_| panic!("scheduler state still shared after run completed"))
            .graph
            .into_inner();
        Ok((graph, BuildReport { failed_steps: failed }))
    }

    /// Every asset this phase might apply to: assets already materialized in
    /// the graph, plus whatever earlier phases (including optional ones that
    /// have not run yet) could eventually produce from them. The latter is
    /// needed so a non-optional phase can demand an optional earlier phase's
    /// output purely by extension matching, before that output exists.
    fn candidate_inputs(
        &self,
        shared: &Shared<'_>,
        phase_number: PhaseNumber,
        phase: &InBuildPhase,
    ) -> Vec<AssetId> {
        let graph = shared.graph.borrow();
        let mut universe: BTreeSet<AssetId> = graph.source_node_ids().into_iter().collect();
        universe.extend(graph.placeholder_node_ids());
        // Overdeclared or failed generated nodes are book-kept in the graph
        // but never produced bytes; they must not seed further builder runs.
        universe.extend(graph.generated_node_ids().into_iter().filter(|id| {
            graph
                .get(&NodeId::Asset(id.clone()))
                .map(AssetNode::exists)
                .unwrap_or(false)
        }));
        for (earlier_number, earlier_phase) in self.phases.iter() {
            if earlier_number >= phase_number {
                break;
            }
            let BuildPhase::InBuild(earlier) = earlier_phase else {
                continue;
            };
            let mut additions = Vec::new();
            for id in &universe {
                if !earlier.applies_to_package(&id.package) || !earlier.generate_for.matches(&id.path) {
                    continue;
                }
                // If this phase already decided what `id`'s output node is
                // (produced, failed, or overdeclared), that decision stands;
                // only synthesize a potential output when it hasn't run yet.
                let Some(outputs) = earlier.extensions().outputs_for(id) else {
                    continue;
                };
                for output in outputs {
                    if !graph.contains(&NodeId::Asset(output.clone())) {
                        additions.push(output);
                    }
                }
            }
            universe.extend(additions);
        }

        universe
            .into_iter()
            .filter(|id| phase.applies_to_package(&id.package))
            .filter(|id| phase.generate_for.matches(&id.path))
            .filter(|id| phase.extensions().outputs_for(id).is_some())
            .filter(|id| self.within_build_dirs(phase, id))
            .filter(|id| self.passes_build_filters(phase, id))
            .collect()
    }

    /// Whether `primary_input`'s step must actually run this phase: either
    /// it (or one of its upstream dependencies) is marked dirty, or none of
    /// its declared outputs have a recorded, non-failed build yet.
    fn needs_rebuild(&self, shared: &Shared<'_>, phase: &InBuildPhase, primary_input: &AssetId) -> bool {
        if shared.dirty.borrow().contains(primary_input) {
            return true;
        }
        let Some(outputs) = phase.extensions().outputs_for(primary_input) else {
            return false;
        };
        let graph = shared.graph.borrow();
        outputs.iter().any(|output| {
            !matches!(
                graph.get(&NodeId::Asset(output.clone())).and_then(AssetNode::as_generated),
                Some(g) if g.result
            )
        })
    }

    /// Non-hidden outputs under a `--output` dir are always produced; hidden
    /// outputs are unaffected and still produced lazily as usual.
    fn within_build_dirs(&self, phase: &InBuildPhase, id: &AssetId) -> bool {
        if phase.hide_output {
            return true;
        }
        match &self.options.build_dirs {
            Some(dirs) => dirs.matches(&id.path),
            None => true,
        }
    }

    /// Non-hidden ("build to source") outputs are always produced,
    /// regardless of filters, to keep the source tree deterministic.
    /// Hidden outputs are subject to the filter.
    fn passes_build_filters(&self, phase: &InBuildPhase, id: &AssetId) -> bool {
        if !phase.hide_output {
            return true;
        }
        match &self.options.build_filters {
            Some(filters) => filters.matches(&id.path),
            None => true,
        }
    }

    /// Pre-existing files at a soon-to-be-generated path are treated as
    /// absent: remove them from disk so the step that produces them does
    /// not see stale bytes via a plain filesystem read outside the graph.
    async fn delete_conflicting_outputs(&self, graph: &mut AssetGraph) {
        for phase in self.phases.iter().filter_map(|(_, p)| match p {
            BuildPhase::InBuild(in_build) => Some(in_build),
            _ => None,
        }) {
            for source in graph.source_node_ids() {
                let Some(outputs) = phase.extensions().outputs_for(&source) else {
                    continue;
                };
                for output in outputs {
                    // A source node already sitting at a path this phase is
                    // about to generate is a stale leftover from a prior run,
                    // not a real source; drop it so the fresh build owns the
                    // path outright.
                    if matches!(graph.get(&NodeId::Asset(output.clone())), Some(AssetNode::Source(_))) {
                        graph.remove(&NodeId::Asset(output.clone()));
                    }
                    let path = self.reader_writer.physical_path(&output, phase.hide_output);
                    let _ = self.reader_writer.delete(&path).await;
                }
            }
        }
    }
}
