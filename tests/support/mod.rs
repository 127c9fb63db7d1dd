//! Shared fixture for the end-to-end scheduler tests: a temp-dir-backed
//! package tree plus the graph/reader-writer scaffolding needed to run a
//! real [`Scheduler`] pass without touching anything outside the temp dir.

use std::collections::HashSet;

use buildgraph::asset_id::{Package, PackageGraph, PackageName};
use buildgraph::digest::Digest;
use buildgraph::graph::AssetGraph;
use buildgraph::node::SourceNode;
use buildgraph::reader_writer::ReaderWriter;
use buildgraph::scheduler::{BuildReport, Scheduler, SchedulerOptions};
use buildgraph::phases::BuildPhases;
use buildgraph::AssetId;
use camino::Utf8PathBuf;
use tempfile::TempDir;

pub struct Fixture {
    dir: TempDir,
    packages: Vec<Package>,
    sources: Vec<(AssetId, Vec<u8>)>,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            dir: TempDir::new().expect("tempdir"),
            packages: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn package(mut self, name: &str) -> Self {
        let root = Utf8PathBuf::from_path_buf(self.dir.path().join(name)).unwrap();
        std::fs::create_dir_all(root.as_std_path()).unwrap();
        self.packages.push(Package {
            name: PackageName::from(name),
            root,
            dependencies: Vec::new(),
            additional_public_assets: Vec::new(),
        });
        self
    }

    /// Writes a source file to disk under `package`'s root and records it
    /// as a source node for the initial graph.
    pub fn source(mut self, package: &str, path: &str, content: &[u8]) -> Self {
        let root = self
            .packages
            .iter()
            .find(|p| p.name.as_ref() == package)
            .expect("package must be added before its sources")
            .root
            .clone();
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent.as_std_path()).unwrap();
        }
        std::fs::write(full.as_std_path(), content).unwrap();
        self.sources
            .push((AssetId::new(package, path), content.to_vec()));
        self
    }

    pub fn package_graph(&self, root: &str) -> PackageGraph {
        PackageGraph::new(PackageName::from(root), self.packages.clone())
    }

    pub fn cache_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join(".buildgraph")).unwrap()
    }

    /// Builds the initial `AssetGraph` from the recorded sources and runs
    /// `phases` through a real `Scheduler`. Returns the final graph, the
    /// build report, and the `ReaderWriter` used (so the test can resolve
    /// physical paths to check written bytes).
    pub async fn run(
        &self,
        root_package: &str,
        phases: BuildPhases,
        options: SchedulerOptions,
    ) -> (AssetGraph, BuildReport, ReaderWriter) {
        let package_graph = self.package_graph(root_package);
        let sources = self.sources.iter().map(|(id, content)| {
            (
                id.clone(),
                SourceNode {
                    digest: Digest::of(id, content),
                    primary_outputs: Default::default(),
                },
            )
        });
        let graph = AssetGraph::build(sources, std::iter::empty(), &package_graph);
        let reader_writer = ReaderWriter::new(self.cache_root(), package_graph);
        let scheduler = Scheduler::new(&phases, &reader_writer, options);
        let (graph, report) = scheduler
            .run(graph, &HashSet::new())
            .await
            .expect("scheduler run should not hit a fatal error in these fixtures");
        (graph, report, reader_writer)
    }

    pub fn read_output(&self, reader_writer: &ReaderWriter, id: &AssetId, hidden: bool) -> Option<Vec<u8>> {
        let path = reader_writer.physical_path(id, hidden);
        std::fs::read(path.as_std_path()).ok()
    }
}
