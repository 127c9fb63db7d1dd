//! Marks graph nodes dirty between runs. The engine never re-derives
//! "what changed" from scratch on every read; invalidation is a single pass
//! run once at the start of a build, whose output is the dirty set the
//! scheduler treats as its initial work queue.

use std::collections::{BTreeSet, HashMap, HashSet};

use globset::{Glob, GlobSetBuilder};

use crate::asset_id::AssetId;
use crate::digest::Digest;
use crate::node::{AssetNode, MissingSourceNode, NodeId, SourceNode};

use super::AssetGraph;

/// Outcome of running the invalidation engine once, at the start of a build.
#[derive(Debug, Default)]
pub struct InvalidationReport {
    /// Generated nodes that must re-run before the build is considered
    /// complete.
    pub dirty: HashSet<AssetId>,
    /// Whether a full rebuild was forced (an `internal` node changed).
    pub full_rebuild: bool,
}

/// A source file as observed by the current filesystem scan: its id and its
/// freshly computed digest, or `None` if the path no longer exists.
pub struct ObservedSource {
    pub id: AssetId,
    pub digest: Option<Digest>,
}

impl AssetGraph {
    /// Marks a generated node dirty and recursively marks every node in its
    /// transitive `compute_outputs()` closure dirty too.
    pub fn mark_dirty(&self, id: &AssetId, dirty: &mut HashSet<AssetId>) {
        let outputs = self.compute_outputs();
        self.mark_dirty_with(&outputs, id, dirty);
    }

    /// `mark_dirty`'s recursion, taking an already-computed reverse index so
    /// a caller marking many roots dirty in the same pass (invalidation's
    /// per-changed-source loop) only pays for `compute_outputs` once.
    fn mark_dirty_with(
        &self,
        outputs: &HashMap<AssetId, HashSet<AssetId>>,
        id: &AssetId,
        dirty: &mut HashSet<AssetId>,
    ) {
        if !dirty.insert(id.clone()) {
            return;
        }
        if let Some(consumers) = outputs.get(id) {
            for consumer in consumers {
                self.mark_dirty_with(outputs, consumer, dirty);
            }
        }
    }

    /// reconciles one observed source against the graph,
    /// returning whether it changed (and so should propagate dirtiness).
    fn reconcile_source(&mut self, observed: &ObservedSource) -> bool {
        let node_id = NodeId::Asset(observed.id.clone());
        match (&observed.digest, self.get(&node_id)) {
            (Some(digest), Some(AssetNode::Source(existing))) => {
                if existing.digest == *digest {
                    false
                } else {
                    self.get_mut(&node_id)
                        .and_then(AssetNode::as_source_mut)
                        .map(|s| s.digest = *digest)
                        .is_some()
                }
            }
            (Some(digest), _) => {
                self.add(
                    node_id,
                    AssetNode::Source(SourceNode {
                        digest: *digest,
                        primary_outputs: BTreeSet::new(),
                    }),
                );
                true
            }
            (None, Some(AssetNode::Source(_))) => {
                self.add(node_id, AssetNode::MissingSource(MissingSourceNode));
                true
            }
            (None, _) => false,
        }
    }

    /// Runs the full invalidation pass and returns the set
    /// of generated asset ids that must be rebuilt before the build can be
    /// considered complete.
    pub fn invalidate(
        &mut self,
        observed_sources: &[ObservedSource],
        internal_changed: bool,
        outputs_present_on_disk: impl Fn(&AssetId) -> bool,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        if internal_changed {
            report.full_rebuild = true;
            self.clear_generated();
            return report;
        }

        let mut changed_sources = Vec::new();
        for observed in observed_sources {
            if self.reconcile_source(observed) {
                changed_sources.push(observed.id.clone());
            }
        }

        let outputs = self.compute_outputs();
        for changed in &changed_sources {
            self.mark_dirty_with(&outputs, changed, &mut report.dirty);
        }

        self.recheck_globs(&outputs, &changed_sources, &mut report.dirty);

        let missing_outputs: Vec<AssetId> = self
            .generated_node_ids()
            .into_iter()
            .filter(|id| {
                matches!(
                    self.get(&NodeId::Asset(id.clone())).and_then(AssetNode::as_generated),
                    Some(g) if g.was_output
                ) && !outputs_present_on_disk(id)
            })
            .collect();
        for id in missing_outputs {
            self.mark_dirty_with(&outputs, &id, &mut report.dirty);
        }

        report
    }

    /// Step 4: re-resolves every memoized glob whose pattern could plausibly
    /// match one of the changed source ids, and dirties any generated node
    /// that depends on a glob whose result set changed.
    fn recheck_globs(
        &mut self,
        outputs: &HashMap<AssetId, HashSet<AssetId>>,
        changed_sources: &[AssetId],
        dirty: &mut HashSet<AssetId>,
    ) {
        let glob_keys: Vec<_> = self
            .node_ids()
            .filter_map(|id| match id {
                NodeId::Glob(key) => Some(key.clone()),
                _ => None,
            })
            .collect();

        for key in glob_keys {
            let Ok(glob) = Glob::new(&key.pattern) else {
                continue;
            };
            let mut builder = GlobSetBuilder::new();
            builder.add(glob);
            let Ok(set) = builder.build() else {
                continue;
            };

            let touches_this_glob = changed_sources
                .iter()
                .any(|id| id.package == key.package && set.is_match(&id.path));
            if !touches_this_glob {
                continue;
            }

            let node_id = NodeId::Glob(key.clone());
            let old_results = self
                .get(&node_id)
                .and_then(AssetNode::as_glob)
                .map(|g| g.results.clone())
                .unwrap_or_default();
            let new_results: BTreeSet<AssetId> = self
                .source_node_ids()
                .into_iter()
                .filter(|id| id.package == key.package && set.is_match(&id.path))
                .collect();

            if new_results != old_results {
                let consumers = self.glob_consumers(&key);
                self.add_glob(key, new_results);
                for consumer in consumers {
                    self.mark_dirty_with(outputs, &consumer, dirty);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{GeneratedNode, PhaseNumber};

    fn source(id: &AssetId, content: &[u8]) -> SourceNode {
        SourceNode {
            digest: Digest::of(id, content),
            primary_outputs: BTreeSet::new(),
        }
    }

    #[test]
    fn unchanged_digest_is_not_dirtied() {
        let mut graph = AssetGraph::new();
        let id = AssetId::new("a", "web/a.txt");
        graph.add(NodeId::Asset(id.clone()), AssetNode::Source(source(&id, b"hello")));

        let report = graph.invalidate(
            &[ObservedSource {
                id: id.clone(),
                digest: Some(Digest::of(&id, b"hello")),
            }],
            false,
            |_| true,
        );
        assert!(report.dirty.is_empty());
        assert!(!report.full_rebuild);
    }

    #[test]
    fn changed_digest_dirties_transitive_outputs() {
        let mut graph = AssetGraph::new();
        let src_id = AssetId::new("a", "web/a.txt");
        let out_id = AssetId::new("a", "web/a.txt.copy");
        graph.add(NodeId::Asset(src_id.clone()), AssetNode::Source(source(&src_id, b"v1")));
        graph.add(
            NodeId::Asset(out_id.clone()),
            AssetNode::Generated(GeneratedNode::new(PhaseNumber(0), src_id.clone(), false)),
        );
        let mut inputs = BTreeSet::new();
        inputs.insert(src_id.clone());
        graph.set_generated_inputs(&out_id, &inputs);

        let report = graph.invalidate(
            &[ObservedSource {
                id: src_id.clone(),
                digest: Some(Digest::of(&src_id, b"v2")),
            }],
            false,
            |_| true,
        );
        assert!(report.dirty.contains(&out_id));
    }

    #[test]
    fn internal_change_forces_full_rebuild() {
        let mut graph = AssetGraph::new();
        let out_id = AssetId::new("a", "web/a.txt.copy");
        graph.add(
            NodeId::Asset(out_id.clone()),
            AssetNode::Generated(GeneratedNode::new(
                PhaseNumber(0),
                AssetId::new("a", "web/a.txt"),
                false,
            )),
        );

        let report = graph.invalidate(&[], true, |_| true);
        assert!(report.full_rebuild);
        assert!(!graph.contains(&NodeId::Asset(out_id)));
    }

    #[test]
    fn deleted_source_becomes_missing_source() {
        let mut graph = AssetGraph::new();
        let id = AssetId::new("a", "web/a.txt");
        graph.add(NodeId::Asset(id.clone()), AssetNode::Source(source(&id, b"v1")));

        graph.invalidate(
            &[ObservedSource {
                id: id.clone(),
                digest: None,
            }],
            false,
            |_| true,
        );
        assert!(matches!(
            graph.get(&NodeId::Asset(id)),
            Some(AssetNode::MissingSource(_))
        ));
    }

    #[test]
    fn glob_change_only_dirties_its_own_consumer() {
        let mut graph = AssetGraph::new();
        let existing = AssetId::new("a", "web/a.txt");
        graph.add(NodeId::Asset(existing.clone()), AssetNode::Source(source(&existing, b"v1")));

        let key = crate::node::GlobKey {
            phase: PhaseNumber(0),
            package: "a".into(),
            pattern: "web/*.txt".to_string(),
        };
        graph.add_glob(key.clone(), BTreeSet::from([existing.clone()]));

        let glob_consumer = AssetId::new("a", "web/bundle.out");
        graph.add(
            NodeId::Asset(glob_consumer.clone()),
            AssetNode::Generated(GeneratedNode::new(PhaseNumber(0), existing.clone(), false)),
        );
        graph.link_glob(&key, &glob_consumer);

        let unrelated_consumer = AssetId::new("a", "web/a.txt.copy");
        graph.add(
            NodeId::Asset(unrelated_consumer.clone()),
            AssetNode::Generated(GeneratedNode::new(PhaseNumber(0), existing.clone(), false)),
        );
        let mut inputs = BTreeSet::new();
        inputs.insert(existing.clone());
        graph.set_generated_inputs(&unrelated_consumer, &inputs);

        let new_file = AssetId::new("a", "web/b.txt");
        let report = graph.invalidate(
            &[ObservedSource {
                id: new_file.clone(),
                digest: Some(Digest::of(&new_file, b"new")),
            }],
            false,
            |_| true,
        );

        assert!(report.dirty.contains(&glob_consumer));
        assert!(!report.dirty.contains(&unrelated_consumer));
    }

    #[test]
    fn missing_output_file_dirties_generated_node() {
        let mut graph = AssetGraph::new();
        let out_id = AssetId::new("a", "web/a.txt.copy");
        let mut generated = GeneratedNode::new(PhaseNumber(0), AssetId::new("a", "web/a.txt"), false);
        generated.was_output = true;
        generated.result = true;
        graph.add(NodeId::Asset(out_id.clone()), AssetNode::Generated(generated));

        let report = graph.invalidate(&[], false, |_| false);
        assert!(report.dirty.contains(&out_id));
    }
}
