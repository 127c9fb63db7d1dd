//! On-disk configuration: `packages.toml` at the workspace root and one
//! `build.toml` per package. Both are loaded as plain `serde`/`toml`
//! structs and recorded as `internal` graph nodes — any change to either
//! forces a full rebuild.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::asset_id::{Package, PackageGraph, PackageName};
use crate::digest::Digest;

pub const PACKAGE_CONFIG_FILE_NAME: &str = "packages.toml";
pub const BUILD_CONFIG_FILE_NAME: &str = "build.toml";

/// Shape of `packages.toml`: the root package plus every package's
/// filesystem path relative to the workspace root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageConfigFile {
    pub root: String,
    pub packages: HashMap<String, PackageEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageEntry {
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub additional_public_assets: Vec<String>,
}

impl PackageConfigFile {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_package_graph(&self, workspace_root: &Utf8PathBuf) -> PackageGraph {
        let packages = self
            .packages
            .iter()
            .map(|(name, entry)| Package {
                name: PackageName::from(name.as_str()),
                root: workspace_root.join(&entry.path),
                dependencies: entry
                    .dependencies
                    .iter()
                    .map(|d| PackageName::from(d.as_str()))
                    .collect(),
                additional_public_assets: entry.additional_public_assets.clone(),
            })
            .collect();
        PackageGraph::new(PackageName::from(self.root.as_str()), packages)
    }

    pub fn digest(&self, raw: &str) -> Digest {
        Digest::of(&config_internal_id(), raw.as_bytes())
    }
}

/// Shape of a package's `build.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildConfigFile {
    #[serde(default)]
    pub sources: SourceSelector,
    #[serde(default)]
    pub additional_public_assets: Vec<String>,
    #[serde(default)]
    pub builders: Vec<BuilderConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceSelector {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl SourceSelector {
    /// An unconfigured `include` means "match everything under the
    /// package", not "match nothing" — the same default `generate_for`
    /// uses for builder applications.
    pub fn to_input_set(&self) -> crate::phases::InputSet {
        if self.include.is_empty() {
            crate::phases::InputSet::everything()
        } else {
            crate::phases::InputSet::new(self.include.clone(), self.exclude.clone())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Names which compiled-in builder kind to instantiate (e.g. `"copy"`);
    /// the factory mapping lives in the CLI binary — builder factories are
    /// not themselves data-driven beyond selecting among known kinds.
    pub key: String,
    #[serde(default)]
    pub generate_for: Vec<String>,
    /// Packages this builder application targets; empty means every package.
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub hide_output: bool,
    #[serde(default)]
    pub options: toml::Table,
}

impl BuildConfigFile {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// The engine-internal `AssetId` package configuration is tracked under in
/// the graph, at the workspace root package.
pub fn config_internal_id() -> crate::asset_id::AssetId {
    crate::asset_id::AssetId::new("$workspace$", PACKAGE_CONFIG_FILE_NAME)
}

pub fn build_config_internal_id(package: &PackageName) -> crate::asset_id::AssetId {
    crate::asset_id::AssetId::new(package.clone(), BUILD_CONFIG_FILE_NAME)
}
