//! Stable identity of assets, and the package adjacency they live in.

use std::collections::HashMap;
use std::fmt;

use camino::Utf8PathBuf;
use derive_more::{AsRef, Display};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Name of a package in the [`PackageGraph`].
#[derive(
    Clone, Debug, Default, Display, PartialEq, Eq, Hash, PartialOrd, Ord, AsRef, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PackageName(String);

impl From<&str> for PackageName {
    fn from(value: &str) -> Self {
        PackageName(value.to_string())
    }
}

impl From<String> for PackageName {
    fn from(value: String) -> Self {
        PackageName(value)
    }
}

/// Path space an asset's `path` falls into: `lib/**` is visible
/// across packages, everything else is private to the owning package.
pub fn is_public_path(path: &str) -> bool {
    path == "lib" || path.starts_with("lib/")
}

/// Stable identity of an asset: a package plus a forward-slash relative path
/// within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    pub package: PackageName,
    pub path: String,
}

impl AssetId {
    pub fn new(package: impl Into<PackageName>, path: impl Into<String>) -> Self {
        AssetId {
            package: package.into(),
            path: path.into(),
        }
    }

    /// Whether this asset lives under the package's public `lib/**` space.
    pub fn is_public(&self) -> bool {
        is_public_path(&self.path)
    }

    /// The `package:<path-under-lib>` URI form, if this asset is public.
    pub fn package_uri(&self) -> Option<String> {
        let rest = self.path.strip_prefix("lib/")?;
        Some(format!("package:{}/{}", self.package, rest))
    }

    /// File extension (everything from the first `.` in the final path
    /// segment onward), used to match `buildExtensions` patterns.
    pub fn extension(&self) -> Option<&str> {
        let file_name = self.path.rsplit('/').next().unwrap_or(&self.path);
        file_name.find('.').map(|idx| &file_name[idx..])
    }

    /// Returns a new `AssetId` with `old_ext` stripped from the end of the
    /// path and `new_ext` appended, used when computing a builder's output
    /// path from its primary input.
    pub fn with_extension_replaced(&self, old_ext: &str, new_ext: &str) -> Option<AssetId> {
        let stripped = self.path.strip_suffix(old_ext)?;
        Some(AssetId::new(
            self.package.clone(),
            format!("{stripped}{new_ext}"),
        ))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.package, self.path)
    }
}

impl std::str::FromStr for AssetId {
    type Err = AssetIdParseError;

    /// Parses the `<package>|<path>` identity string form. Does not
    /// accept the `$$` hidden-output prefix — callers that need to
    /// distinguish hidden references strip it first (see
    /// [`crate::reader_writer`]).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (package, path) = s.split_once('|').ok_or(AssetIdParseError)?;
        Ok(AssetId::new(package, path.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetIdParseError;

impl fmt::Display for AssetIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected `<package>|<path>`")
    }
}

impl std::error::Error for AssetIdParseError {}

/// One package: its filesystem root and its declared dependencies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub name: PackageName,
    pub root: Utf8PathBuf,
    pub dependencies: Vec<PackageName>,
    /// Globs (relative to the package root) of assets outside `lib/**` that
    /// are nonetheless visible to other packages.
    pub additional_public_assets: Vec<String>,
}

impl Package {
    fn additional_public_globset(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.additional_public_assets {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        builder.build().unwrap_or_else(|_| GlobSet::empty())
    }
}

/// The set of packages making up a build, with a distinguished root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageGraph {
    pub root: PackageName,
    packages: HashMap<PackageName, Package>,
}

impl PackageGraph {
    pub fn new(root: PackageName, packages: Vec<Package>) -> Self {
        PackageGraph {
            root,
            packages: packages.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    pub fn get(&self, name: &PackageName) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains_key(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Whether `asset` is visible to code in `from_package`:
    /// always visible within the owning package, otherwise only if it's
    /// under `lib/**` or matched by the owning package's
    /// `additional_public_assets`.
    pub fn is_visible_across_packages(&self, asset: &AssetId, from_package: &PackageName) -> bool {
        if &asset.package == from_package {
            return true;
        }
        if asset.is_public() {
            return true;
        }
        match self.packages.get(&asset.package) {
            Some(owning) => owning.additional_public_globset().is_match(&asset.path),
            None => false,
        }
    }
}
