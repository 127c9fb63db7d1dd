use std::collections::{HashMap, HashSet};
use std::process::ExitCode;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;

use buildgraph::asset_id::{AssetId, PackageGraph};
use buildgraph::config::{BuildConfigFile, PackageConfigFile, BUILD_CONFIG_FILE_NAME};
use buildgraph::digest::Digest;
use buildgraph::graph::invalidate::ObservedSource;
use buildgraph::graph::AssetGraph;
use buildgraph::node::{InternalNode, SourceNode};
use buildgraph::phases::{BuildPhase, BuildPhases, InBuildPhase, InputSet};
use buildgraph::reader_writer::ReaderWriter;
use buildgraph::scheduler::{Scheduler, SchedulerOptions};

mod args;
mod builders;

use args::{Args, BuildArgs, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    buildgraph::tracing_init::init(args.verbose, true);

    let build_args = match &args.command {
        Command::Build(b) | Command::Serve(b) | Command::Test(b) | Command::Watch(b) => b.clone(),
    };

    match run(&args, &build_args).await {
        Ok(true) => ExitCode::from(0),
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns `Ok(true)` on a clean build, `Ok(false)` if at least one builder
/// failed, `Err` for a configuration error (mapped to exit codes 0/1/2).
async fn run(args: &Args, build_args: &BuildArgs) -> Result<bool> {
    let workspace_root: Utf8PathBuf = std::env::current_dir()
        .context("reading working directory")?
        .try_into()
        .context("working directory is not valid UTF-8")?;

    let package_config_text = tokio::fs::read_to_string(workspace_root.join("packages.toml"))
        .await
        .context("reading packages.toml")?;
    let package_config = PackageConfigFile::parse(&package_config_text).context("parsing packages.toml")?;
    let package_graph = package_config.to_package_graph(&workspace_root);

    let mut build_configs = Vec::new();
    for package in package_graph.packages() {
        let path = package.root.join(BUILD_CONFIG_FILE_NAME);
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {path}"))?;
        let config = BuildConfigFile::parse(&text).with_context(|| format!("parsing {path}"))?;
        build_configs.push((package.name.clone(), text, config));
    }

    let phases = compile_phases(&build_configs)?;

    let reader_writer = ReaderWriter::new(args.cache_root.clone(), package_graph.clone());

    let source_selectors: HashMap<_, _> = build_configs
        .iter()
        .map(|(name, _, config)| (name.clone(), config.sources.clone()))
        .collect();
    let sources = scan_sources(&package_graph, &args.cache_root, &source_selectors).await?;
    let internal_nodes = compute_internal_nodes(&package_config_text, &build_configs);

    let state_path = args
        .cache_root
        .join(&args.script)
        .join("asset_graph.json");
    let mut graph = match tokio::fs::read_to_string(&state_path).await {
        Ok(text) => AssetGraph::from_json(&text).unwrap_or_else(|| {
            AssetGraph::build(
                sources.iter().map(|(id, node)| (id.clone(), node.clone())),
                internal_nodes.iter().map(|(id, node)| (id.clone(), node.clone())),
                &package_graph,
            )
        }),
        Err(_) => AssetGraph::build(
            sources.iter().map(|(id, node)| (id.clone(), node.clone())),
            internal_nodes.iter().map(|(id, node)| (id.clone(), node.clone())),
            &package_graph,
        ),
    };

    let internal_changed = internal_nodes.iter().any(|(id, node)| {
        graph
            .get(&buildgraph::node::NodeId::Asset(id.clone()))
            .and_then(|n| match n {
                buildgraph::node::AssetNode::Internal(existing) => Some(existing.digest == node.digest),
                _ => None,
            })
            .map(|unchanged| !unchanged)
            .unwrap_or(true)
    });
    for (id, node) in &internal_nodes {
        graph.add(buildgraph::node::NodeId::Asset(id.clone()), buildgraph::node::AssetNode::Internal(node.clone()));
    }

    let mut observed: Vec<ObservedSource> = sources
        .iter()
        .map(|(id, node)| ObservedSource {
            id: id.clone(),
            digest: Some(node.digest),
        })
        .collect();
    let scanned_ids: HashSet<AssetId> = sources.iter().map(|(id, _)| id.clone()).collect();
    for id in graph.source_node_ids() {
        if !scanned_ids.contains(&id) {
            observed.push(ObservedSource { id, digest: None });
        }
    }

    let report = graph.invalidate(&observed, internal_changed, |id| {
        reader_writer.physical_path(id, false).exists() || reader_writer.physical_path(id, true).exists()
    });
    tracing::info!(dirty = report.dirty.len(), full_rebuild = report.full_rebuild, "invalidation complete");

    let build_filters = if build_args.build_filter.is_empty() {
        None
    } else {
        Some(InputSet::new(build_args.build_filter.clone(), vec![]))
    };
    let build_dirs = build_args
        .output
        .as_ref()
        .map(|dir| InputSet::new(vec![format!("{dir}/**")], vec![]));

    let options = SchedulerOptions {
        delete_conflicting_outputs: build_args.delete_conflicting_outputs,
        low_resources_mode: build_args.low_resources_mode,
        build_filters,
        build_dirs,
    };

    let scheduler = Scheduler::new(&phases, &reader_writer, options);
    let dirty: HashSet<AssetId> = report.dirty;
    let (graph, build_report) = scheduler.run(graph, &dirty).await.context("running scheduler")?;

    if let Some(parent) = state_path.parent() {
        tokio::fs::create_dir_all(parent).await.context("creating cache directory")?;
    }
    let json = graph.to_json().context("serializing graph")?;
    tokio::fs::write(&state_path, json).await.context("writing persisted graph")?;

    for (input, message) in &build_report.failed_steps {
        eprintln!("FAILED {input}: {message}");
    }

    Ok(build_report.is_success())
}

fn compile_phases(
    build_configs: &[(buildgraph::asset_id::PackageName, String, BuildConfigFile)],
) -> Result<BuildPhases> {
    let mut phases = Vec::new();
    for (package_name, _, config) in build_configs {
        for builder_config in &config.builders {
            let builder = builders::build_from_config(builder_config)?;
            let target_package_filter = if builder_config.packages.is_empty() {
                None
            } else {
                Some(
                    builder_config
                        .packages
                        .iter()
                        .map(|p| buildgraph::asset_id::PackageName::from(p.as_str()))
                        .collect(),
                )
            };
            let _ = package_name;
            phases.push(BuildPhase::InBuild(InBuildPhase {
                builder_key: builder_config.key.clone(),
                builder,
                target_package_filter,
                generate_for: if builder_config.generate_for.is_empty() {
                    InputSet::everything()
                } else {
                    InputSet::new(builder_config.generate_for.clone(), vec![])
                },
                is_optional: builder_config.is_optional,
                hide_output: builder_config.hide_output,
            }));
        }
    }
    Ok(BuildPhases::new(phases)?)
}

async fn scan_sources(
    package_graph: &PackageGraph,
    cache_root: &Utf8PathBuf,
    source_selectors: &HashMap<buildgraph::asset_id::PackageName, buildgraph::config::SourceSelector>,
) -> Result<Vec<(AssetId, SourceNode)>> {
    let mut sources = Vec::new();
    for package in package_graph.packages() {
        let input_set = source_selectors.get(&package.name).map(|selector| selector.to_input_set());
        for entry in walkdir::WalkDir::new(&package.root)
            .into_iter()
            .filter_entry(|e| !e.path().starts_with(cache_root.as_std_path()))
        {
            let entry = entry.with_context(|| format!("scanning {}", package.root))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8PathBuf::try_from(entry.path().to_path_buf())
                .with_context(|| format!("non-UTF-8 path under {}", package.root))?;
            let Ok(relative) = path.strip_prefix(&package.root) else {
                continue;
            };
            let relative = relative.as_str().replace('\\', "/");
            if let Some(input_set) = &input_set {
                if !input_set.matches(&relative) {
                    continue;
                }
            }
            let id = AssetId::new(package.name.clone(), relative);
            let bytes = tokio::fs::read(&path).await.with_context(|| format!("reading {path}"))?;
            let digest = Digest::of(&id, &bytes);
            sources.push((
                id,
                SourceNode {
                    digest,
                    primary_outputs: Default::default(),
                },
            ));
        }
    }
    Ok(sources)
}

fn compute_internal_nodes(
    package_config_text: &str,
    build_configs: &[(buildgraph::asset_id::PackageName, String, BuildConfigFile)],
) -> Vec<(AssetId, InternalNode)> {
    let mut nodes = vec![(
        buildgraph::config::config_internal_id(),
        InternalNode {
            digest: Digest::of(&buildgraph::config::config_internal_id(), package_config_text.as_bytes()),
        },
    )];
    for (package_name, raw, _) in build_configs {
        let id = buildgraph::config::build_config_internal_id(package_name);
        nodes.push((
            id.clone(),
            InternalNode {
                digest: Digest::of(&id, raw.as_bytes()),
            },
        ));
    }
    nodes
}
