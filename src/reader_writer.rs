//! Virtual filesystem exposed to builders: resolves visibility rules
//! and performs the physical reads/writes that back a [`crate::build_step::BuildStep`].

use camino::Utf8PathBuf;

use crate::asset_id::{AssetId, PackageGraph, PackageName};
use crate::error::{BuildGraphError, Result};
use crate::graph::AssetGraph;
use crate::node::{AssetNode, NodeId, PhaseNumber};

/// Maps asset identities to physical paths and checks cross-package and
/// cross-phase visibility rules. Holds no per-build state of its own; staging
/// lives on the [`crate::build_step::BuildStep`] that uses it.
pub struct ReaderWriter {
    cache_root: Utf8PathBuf,
    packages: PackageGraph,
}

impl ReaderWriter {
    pub fn new(cache_root: Utf8PathBuf, packages: PackageGraph) -> Self {
        ReaderWriter { cache_root, packages }
    }

    pub fn packages(&self) -> &PackageGraph {
        &self.packages
    }

    /// The physical path an asset is read from or written to. Hidden
    /// generated outputs live under the engine's cache root; everything
    /// else lives at its natural path in the owning package's source tree
    /// ("build to source"); `hide_output` is what redirects a builder's
    /// output into the cache, not the default.
    pub fn physical_path(&self, id: &AssetId, is_hidden: bool) -> Utf8PathBuf {
        if is_hidden {
            return self
                .cache_root
                .join("generated")
                .join(id.package.as_ref())
                .join(&id.path);
        }
        match self.packages.get(&id.package) {
            Some(package) => package.root.join(&id.path),
            None => Utf8PathBuf::from(&id.path),
        }
    }

    pub async fn read(&self, path: &Utf8PathBuf) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path.as_std_path()).await
    }

    pub async fn write(&self, path: &Utf8PathBuf, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent.as_std_path()).await?;
        }
        tokio::fs::write(path.as_std_path(), bytes).await
    }

    pub async fn delete(&self, path: &Utf8PathBuf) -> std::io::Result<()> {
        match tokio::fs::remove_file(path.as_std_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether `id` is visible to a read issued by phase `reader_phase` in
    /// package `from_package`. `explicit_read` distinguishes a
    /// caller that is actively reading a hidden output (which forces its
    /// producing phase to have completed) from passive membership checks
    /// like glob resolution.
    pub fn is_visible(
        &self,
        graph: &AssetGraph,
        reader_phase: PhaseNumber,
        from_package: &PackageName,
        id: &AssetId,
        explicit_read: bool,
    ) -> Result<bool> {
        if !self.packages.is_visible_across_packages(id, from_package) {
            return Err(BuildGraphError::InvalidInput {
                asset: id.clone(),
                phase: reader_phase,
            });
        }

        match graph.get(&NodeId::Asset(id.clone())) {
            Some(AssetNode::Source(_)) | Some(AssetNode::Internal(_)) | Some(AssetNode::Placeholder(_)) => {
                Ok(true)
            }
            Some(AssetNode::Generated(generated)) => {
                if generated.phase >= reader_phase || !generated.was_output {
                    return Ok(false);
                }
                if !generated.is_hidden {
                    return Ok(true);
                }
                Ok(explicit_read)
            }
            Some(AssetNode::MissingSource(_))
            | Some(AssetNode::Glob(_))
            | Some(AssetNode::PostProcessAnchor(_))
            | None => Ok(false),
        }
    }
}
