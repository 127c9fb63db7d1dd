//! End-to-end scheduler scenarios, one per seed case: a single real builder
//! graph run through a real [`Scheduler`] against a temp-dir package tree,
//! asserting both the final graph shape and the bytes written to disk.

mod support;

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use async_trait::async_trait;
use buildgraph::build_step::BuildStep;
use buildgraph::builder::{Builder, CopyBuilder};
use buildgraph::error::Result;
use buildgraph::graph::invalidate::ObservedSource;
use buildgraph::graph::AssetGraph;
use buildgraph::node::{AssetNode, NodeId, SourceNode};
use buildgraph::phases::{BuildPhase, BuildPhases, BuilderExtensions, InBuildPhase, InputSet};
use buildgraph::reader_writer::ReaderWriter;
use buildgraph::scheduler::{Scheduler, SchedulerOptions};
use buildgraph::AssetId;
use buildgraph::Digest;
use support::Fixture;

fn copy_phase(from_ext: &str, to_ext: &str, optional: bool, hide_output: bool) -> BuildPhase {
    BuildPhase::InBuild(InBuildPhase {
        builder_key: format!("copy{from_ext}{to_ext}"),
        builder: std::rc::Rc::new(CopyBuilder::new(from_ext, to_ext)),
        target_package_filter: None,
        generate_for: InputSet::everything(),
        is_optional: optional,
        hide_output,
    })
}

#[tokio::test]
async fn s1_single_builder_one_input() {
    let fixture = Fixture::new()
        .package("a")
        .source("a", "web/a.txt", b"a");

    let phases = BuildPhases::new(vec![copy_phase(".txt", ".txt.copy", false, false)]).unwrap();
    let (graph, report, reader_writer) = fixture
        .run("a", phases, SchedulerOptions::default())
        .await;

    assert!(report.is_success());
    let output = AssetId::new("a", "web/a.txt.copy");
    assert!(graph
        .get(&NodeId::Asset(output.clone()))
        .and_then(AssetNode::as_generated)
        .map(|g| g.was_output)
        .unwrap_or(false));
    assert_eq!(
        fixture.read_output(&reader_writer, &output, false),
        Some(b"a".to_vec())
    );
}

#[tokio::test]
async fn s2_optional_chain_escalates_through_two_phases() {
    let fixture = Fixture::new()
        .package("a")
        .source("a", "web/a.txt", b"a");

    let phases = BuildPhases::new(vec![
        copy_phase(".txt", ".txt.1", true, false),
        copy_phase(".txt.1", ".txt.2", true, false),
        copy_phase(".txt.2", ".txt.3", false, false),
    ])
    .unwrap();
    let (graph, report, reader_writer) = fixture
        .run("a", phases, SchedulerOptions::default())
        .await;

    assert!(report.is_success());
    for (ext, content) in [(".txt.1", b"a"), (".txt.2", b"a"), (".txt.3", b"a")] {
        let id = AssetId::new("a", format!("web/a{ext}"));
        assert_eq!(
            fixture.read_output(&reader_writer, &id, false),
            Some(content.to_vec()),
            "missing or wrong content for {ext}"
        );
    }
}

#[tokio::test]
async fn s3_delete_conflicting_outputs_treats_stale_output_as_absent() {
    let fixture = Fixture::new()
        .package("a")
        .source("a", "web/a.txt", b"a")
        .source("a", "web/a.txt.copy", b"stale");

    let phases = BuildPhases::new(vec![
        copy_phase(".txt", ".txt.copy", false, false),
        copy_phase(".txt.copy", ".txt.copy.clone", false, false),
    ])
    .unwrap();
    let options = SchedulerOptions {
        delete_conflicting_outputs: true,
        ..SchedulerOptions::default()
    };
    let (graph, report, reader_writer) = fixture.run("a", phases, options).await;

    assert!(report.is_success());
    let copy_id = AssetId::new("a", "web/a.txt.copy");
    assert!(matches!(
        graph.get(&NodeId::Asset(copy_id.clone())),
        Some(AssetNode::Generated(_))
    ));
    assert_eq!(
        fixture.read_output(&reader_writer, &copy_id, false),
        Some(b"a".to_vec())
    );
    let clone_id = AssetId::new("a", "web/a.txt.copy.clone");
    assert_eq!(
        fixture.read_output(&reader_writer, &clone_id, false),
        Some(b"a".to_vec())
    );
}

struct SummaryBuilder {
    extensions: BuilderExtensions,
}

impl SummaryBuilder {
    fn new() -> Self {
        SummaryBuilder {
            extensions: BuilderExtensions::new(vec![(".txt".to_string(), vec![".txt.summary".to_string()])]),
        }
    }
}

#[async_trait(?Send)]
impl Builder for SummaryBuilder {
    async fn build(&self, step: &mut BuildStep<'_>) -> Result<()> {
        let package = step.input_id().package.clone();
        let used = AssetId::new(package.clone(), "web/a.txt.used");
        let unused = AssetId::new(package.clone(), "web/a.txt.unused");
        let used_bytes = step.read_as_bytes(&used).await?.unwrap_or_default();
        step.read_as_bytes(&unused).await?;
        step.report_unused_assets([unused]);
        let output = AssetId::new(package, "web/a.txt.summary");
        step.write_as_bytes(&output, used_bytes)
    }

    fn extensions(&self) -> &BuilderExtensions {
        &self.extensions
    }
}

#[tokio::test]
async fn s4_unused_asset_is_excluded_from_recorded_inputs() {
    let fixture = Fixture::new()
        .package("a")
        .source("a", "web/a.txt", b"a")
        .source("a", "web/a.txt.used", b"u1")
        .source("a", "web/a.txt.unused", b"n1");

    let phases = BuildPhases::new(vec![BuildPhase::InBuild(InBuildPhase {
        builder_key: "summary".to_string(),
        builder: std::rc::Rc::new(SummaryBuilder::new()),
        target_package_filter: None,
        generate_for: InputSet::everything(),
        is_optional: false,
        hide_output: false,
    })])
    .unwrap();
    let (mut graph, report, reader_writer) = fixture
        .run("a", phases, SchedulerOptions::default())
        .await;
    assert!(report.is_success());

    let summary = AssetId::new("a", "web/a.txt.summary");
    assert_eq!(
        fixture.read_output(&reader_writer, &summary, false),
        Some(b"u1".to_vec())
    );

    let used = AssetId::new("a", "web/a.txt.used");
    let unused = AssetId::new("a", "web/a.txt.unused");
    {
        let generated = graph
            .get(&NodeId::Asset(summary.clone()))
            .and_then(AssetNode::as_generated)
            .unwrap();
        assert!(generated.inputs.contains(&used));
        assert!(!generated.inputs.contains(&unused));
    }

    let report = graph.invalidate(
        &[ObservedSource {
            id: unused.clone(),
            digest: Some(Digest::of(&unused, b"n2")),
        }],
        false,
        |_| true,
    );
    assert!(
        !report.dirty.contains(&summary),
        "changing an unused asset should not dirty the step that ignored it"
    );

    let report = graph.invalidate(
        &[ObservedSource {
            id: used.clone(),
            digest: Some(Digest::of(&used, b"u2")),
        }],
        false,
        |_| true,
    );
    assert!(
        report.dirty.contains(&summary),
        "changing a recorded input should dirty its consumer"
    );
}

struct ProbeBuilder {
    extensions: BuilderExtensions,
    probe: AssetId,
}

#[async_trait(?Send)]
impl Builder for ProbeBuilder {
    async fn build(&self, step: &mut BuildStep<'_>) -> Result<()> {
        let found = step.read_as_bytes(&self.probe).await?.is_some();
        let output = AssetId::new(step.input_id().package.clone(), "web/a.result");
        step.write_as_bytes(&output, if found { b"true".to_vec() } else { b"false".to_vec() })
    }

    fn extensions(&self) -> &BuilderExtensions {
        &self.extensions
    }
}

#[tokio::test]
async fn s5_hidden_output_visible_to_explicit_cross_package_read() {
    let fixture = Fixture::new()
        .package("a")
        .package("b")
        .source("a", "web/a.txt", b"ignored")
        .source("b", "lib/b.txt", b"x");

    let hidden_copy = BuildPhase::InBuild(InBuildPhase {
        builder_key: "hidden-copy".to_string(),
        builder: std::rc::Rc::new(CopyBuilder::new(".txt", ".txt.copy")),
        target_package_filter: Some(HashSet::from(["b".into()])),
        generate_for: InputSet::everything(),
        is_optional: false,
        hide_output: true,
    });
    let probe = BuildPhase::InBuild(InBuildPhase {
        builder_key: "probe".to_string(),
        builder: std::rc::Rc::new(ProbeBuilder {
            extensions: BuilderExtensions::new(vec![(".txt".to_string(), vec![".result".to_string()])]),
            probe: AssetId::new("b", "lib/b.txt.copy"),
        }),
        target_package_filter: Some(HashSet::from(["a".into()])),
        generate_for: InputSet::everything(),
        is_optional: false,
        hide_output: false,
    });
    let phases = BuildPhases::new(vec![hidden_copy, probe]).unwrap();
    let (_graph, report, reader_writer) = fixture
        .run("a", phases, SchedulerOptions::default())
        .await;

    assert!(report.is_success());
    let result = AssetId::new("a", "web/a.result");
    assert_eq!(
        fixture.read_output(&reader_writer, &result, false),
        Some(b"true".to_vec())
    );
}

struct OverdeclaringBuilder {
    extensions: BuilderExtensions,
}

#[async_trait(?Send)]
impl Builder for OverdeclaringBuilder {
    async fn build(&self, _step: &mut BuildStep<'_>) -> Result<()> {
        Ok(())
    }

    fn extensions(&self) -> &BuilderExtensions {
        &self.extensions
    }
}

#[tokio::test]
async fn s6_overdeclared_output_is_never_treated_as_a_real_asset() {
    let fixture = Fixture::new().package("a").source("a", "web/a.txt", b"a");

    let overdeclare = BuildPhase::InBuild(InBuildPhase {
        builder_key: "overdeclare".to_string(),
        builder: std::rc::Rc::new(OverdeclaringBuilder {
            extensions: BuilderExtensions::new(vec![(".txt".to_string(), vec![".unexpected".to_string()])]),
        }),
        target_package_filter: None,
        generate_for: InputSet::everything(),
        is_optional: false,
        hide_output: false,
    });
    let expected = copy_phase(".txt", ".expected", false, false);
    let copy_everything = BuildPhase::InBuild(InBuildPhase {
        builder_key: "copy-everything".to_string(),
        builder: std::rc::Rc::new(CopyBuilder::new("", ".copy")),
        target_package_filter: None,
        generate_for: InputSet::everything(),
        is_optional: false,
        hide_output: false,
    });
    let phases = BuildPhases::new(vec![overdeclare, expected, copy_everything]).unwrap();
    let (graph, report, reader_writer) = fixture
        .run("a", phases, SchedulerOptions::default())
        .await;

    assert!(report.is_success());

    for path in ["web/a.txt.copy", "web/a.expected", "web/a.expected.copy"] {
        let id = AssetId::new("a", path);
        assert_eq!(
            fixture.read_output(&reader_writer, &id, false),
            Some(b"a".to_vec()),
            "expected {path} to have been produced"
        );
    }

    for path in ["web/a.unexpected", "web/a.unexpected.copy"] {
        let id = AssetId::new("a", path);
        assert_eq!(
            fixture.read_output(&reader_writer, &id, false),
            None,
            "{path} must never be produced"
        );
        assert!(
            !matches!(
                graph.get(&NodeId::Asset(id)).and_then(AssetNode::as_generated),
                Some(g) if g.was_output
            ),
            "{path} must not be recorded as a real output"
        );
    }
}

/// Wraps a real builder and counts how many times the scheduler actually
/// invoked it, so tests can assert on re-run behavior rather than just
/// on-disk output.
struct CountingBuilder {
    inner: CopyBuilder,
    calls: Rc<Cell<u32>>,
}

#[async_trait(?Send)]
impl Builder for CountingBuilder {
    async fn build(&self, step: &mut BuildStep<'_>) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        self.inner.build(step).await
    }

    fn extensions(&self) -> &BuilderExtensions {
        self.inner.extensions()
    }
}

#[tokio::test]
async fn s7_incremental_rebuild_only_revisits_dirty_nodes() {
    let fixture = Fixture::new().package("a").source("a", "web/a.txt", b"a");

    let copy_calls = Rc::new(Cell::new(0));
    let clone_calls = Rc::new(Cell::new(0));
    let phases = BuildPhases::new(vec![
        BuildPhase::InBuild(InBuildPhase {
            builder_key: "copy".to_string(),
            builder: Rc::new(CountingBuilder {
                inner: CopyBuilder::new(".txt", ".txt.copy"),
                calls: copy_calls.clone(),
            }),
            target_package_filter: None,
            generate_for: InputSet::everything(),
            is_optional: false,
            hide_output: false,
        }),
        BuildPhase::InBuild(InBuildPhase {
            builder_key: "clone".to_string(),
            builder: Rc::new(CountingBuilder {
                inner: CopyBuilder::new(".txt.copy", ".txt.copy.clone"),
                calls: clone_calls.clone(),
            }),
            target_package_filter: None,
            generate_for: InputSet::everything(),
            is_optional: false,
            hide_output: false,
        }),
    ])
    .unwrap();

    let package_graph = fixture.package_graph("a");
    let reader_writer = ReaderWriter::new(fixture.cache_root(), package_graph.clone());
    let source = AssetId::new("a", "web/a.txt");
    let source_node = SourceNode {
        digest: Digest::of(&source, b"a"),
        primary_outputs: Default::default(),
    };
    let graph = AssetGraph::build([(source.clone(), source_node)], std::iter::empty(), &package_graph);

    let scheduler = Scheduler::new(&phases, &reader_writer, SchedulerOptions::default());
    let (mut graph, report) = scheduler.run(graph, &HashSet::new()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(copy_calls.get(), 1, "first build must run every step");
    assert_eq!(clone_calls.get(), 1, "first build must run every step");

    // Second run: nothing changed on disk, so invalidation finds nothing
    // dirty, and the scheduler must not re-invoke either builder.
    let unchanged = [ObservedSource {
        id: source.clone(),
        digest: Some(Digest::of(&source, b"a")),
    }];
    let invalidation = graph.invalidate(&unchanged, false, |_| true);
    assert!(invalidation.dirty.is_empty());
    let scheduler = Scheduler::new(&phases, &reader_writer, SchedulerOptions::default());
    let (mut graph, report) = scheduler.run(graph, &invalidation.dirty).await.unwrap();
    assert!(report.is_success());
    assert_eq!(copy_calls.get(), 1, "an unchanged source must not re-run its step");
    assert_eq!(clone_calls.get(), 1, "an unchanged upstream digest must not re-run its consumer");

    // Third run: invalidation observes a digest mismatch for the source (as
    // if its mtime/content tracking flagged a change), so the copy step is
    // dirty and re-runs — but the bytes on disk are still "a", so the copy
    // step's recomputed digest is identical to its previous one. Early
    // cutoff must keep the clone step, which invalidation pessimistically
    // marked dirty too, from re-running.
    let spurious_change = [ObservedSource {
        id: source.clone(),
        digest: Some(Digest::of(&source, b"a-spurious")),
    }];
    let invalidation = graph.invalidate(&spurious_change, false, |_| true);
    assert!(invalidation.dirty.contains(&source));
    let scheduler = Scheduler::new(&phases, &reader_writer, SchedulerOptions::default());
    let (_graph, report) = scheduler.run(graph, &invalidation.dirty).await.unwrap();
    assert!(report.is_success());
    assert_eq!(copy_calls.get(), 2, "a dirty source must re-run its own step");
    assert_eq!(
        clone_calls.get(),
        1,
        "a recomputed-but-unchanged digest must cut off the downstream consumer"
    );
}

#[tokio::test]
async fn s8_build_dirs_scopes_non_hidden_but_not_hidden_outputs() {
    let fixture = Fixture::new()
        .package("a")
        .source("a", "web/a.txt", b"a")
        .source("a", "other/b.txt", b"b");

    let phases = BuildPhases::new(vec![
        copy_phase(".txt", ".txt.copy", false, false),
        copy_phase(".txt", ".txt.hidden", false, true),
    ])
    .unwrap();

    let options = SchedulerOptions {
        build_dirs: Some(InputSet::new(vec!["web/**".to_string()], vec![])),
        ..SchedulerOptions::default()
    };
    let (graph, report, _reader_writer) = fixture.run("a", phases, options).await;
    assert!(report.is_success());

    assert!(graph.contains(&NodeId::Asset(AssetId::new("a", "web/a.txt.copy"))));
    assert!(!graph.contains(&NodeId::Asset(AssetId::new("a", "other/b.txt.copy"))));

    assert!(graph.contains(&NodeId::Asset(AssetId::new("a", "web/a.txt.hidden"))));
    assert!(graph.contains(&NodeId::Asset(AssetId::new("a", "other/b.txt.hidden"))));
}
