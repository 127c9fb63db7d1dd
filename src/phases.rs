//! Compiled, ordered list of builder applications.

use std::collections::HashSet;
use std::rc::Rc;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::asset_id::{AssetId, PackageName};
use crate::builder::Builder;
use crate::error::{BuildGraphError, Result};
use crate::node::PhaseNumber;

/// Include/exclude glob set a phase or build target is scoped to. The
/// `GlobSet`s are compiled once at construction, since `matches` is called
/// once per candidate asset per phase.
#[derive(Clone, Debug)]
pub struct InputSet {
    include: Vec<String>,
    exclude: Vec<String>,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl Default for InputSet {
    fn default() -> Self {
        InputSet::new(Vec::new(), Vec::new())
    }
}

impl InputSet {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        let include_set = Self::build_set(&include);
        let exclude_set = Self::build_set(&exclude);
        InputSet { include, exclude, include_set, exclude_set }
    }

    pub fn everything() -> Self {
        InputSet::new(vec!["**".to_string()], vec![])
    }

    fn build_set(patterns: &[String]) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        builder.build().unwrap_or_else(|_| GlobSet::empty())
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.include.is_empty() {
            return false;
        }
        let included = self.include_set.is_match(path);
        let excluded = !self.exclude.is_empty() && self.exclude_set.is_match(path);
        included && !excluded
    }
}

/// A declared `input extension -> output extension templates` mapping.
/// Extensions are matched as literal path suffixes; a leading `^` marks the
/// pattern as root-relative (matched against the whole path rather than the
/// trailing segment).
#[derive(Clone, Debug, Default)]
pub struct BuilderExtensions {
    templates: Vec<(String, Vec<String>)>,
}

impl BuilderExtensions {
    pub fn new(templates: Vec<(String, Vec<String>)>) -> Self {
        BuilderExtensions { templates }
    }

    fn matching_pattern<'a>(&'a self, path: &str) -> Option<&'a (String, Vec<String>)> {
        self.templates.iter().find(|(pattern, _)| {
            if let Some(root_relative) = pattern.strip_prefix('^') {
                path == root_relative
            } else {
                path.ends_with(pattern.as_str())
            }
        })
    }

    /// The outputs this builder would declare for `input`, or `None` if the
    /// input's extension doesn't match any declared pattern.
    pub fn outputs_for(&self, input: &AssetId) -> Option<Vec<AssetId>> {
        let (pattern, templates) = self.matching_pattern(&input.path)?;
        let stem_len = if let Some(root_relative) = pattern.strip_prefix('^') {
            input.path.len() - root_relative.len()
        } else {
            input.path.len() - pattern.len()
        };
        let stem = &input.path[..stem_len];
        Some(
            templates
                .iter()
                .map(|tpl| AssetId::new(input.package.clone(), format!("{stem}{tpl}")))
                .collect(),
        )
    }

    pub fn input_patterns(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|(pattern, _)| pattern.as_str())
    }

    /// Reverses [`Self::outputs_for`]: given a produced asset, finds the
    /// primary input that would have produced it, if this builder's
    /// extensions account for it. Used by on-demand escalation, which
    /// is handed an output asset and needs to find the step that owns it.
    pub fn primary_input_for_output(&self, output: &AssetId) -> Option<AssetId> {
        for (input_pattern, output_templates) in &self.templates {
            for template in output_templates {
                let Some(stem) = output.path.strip_suffix(template.as_str()) else {
                    continue;
                };
                let input_path = if let Some(root_relative) = input_pattern.strip_prefix('^') {
                    if !stem.is_empty() {
                        continue;
                    }
                    root_relative.to_string()
                } else {
                    format!("{stem}{input_pattern}")
                };
                return Some(AssetId::new(output.package.clone(), input_path));
            }
        }
        None
    }

    pub fn output_patterns(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().flat_map(|(_, outs)| outs.iter().map(String::as_str))
    }
}

/// One post-process action within a [`PostBuildPhase`], keyed by the source
/// asset it processes.
pub struct PostProcessAction {
    pub name: String,
    pub builder: Rc<dyn Builder>,
}

pub struct PostBuildPhase {
    pub actions: Vec<PostProcessAction>,
}

/// A single builder application slot.
pub struct InBuildPhase {
    pub builder_key: String,
    pub builder: Rc<dyn Builder>,
    pub target_package_filter: Option<HashSet<PackageName>>,
    pub generate_for: InputSet,
    pub is_optional: bool,
    pub hide_output: bool,
}

impl InBuildPhase {
    pub fn applies_to_package(&self, package: &PackageName) -> bool {
        match &self.target_package_filter {
            Some(set) => set.contains(package),
            None => true,
        }
    }

    pub fn extensions(&self) -> &BuilderExtensions {
        self.builder.extensions()
    }
}

pub enum BuildPhase {
    InBuild(InBuildPhase),
    PostBuild(PostBuildPhase),
}

/// The compiled, ordered phase list. Construction validates the output
/// extension contract: no builder's output extension may collide with
/// another builder's input extension (self-feeding is rejected statically).
pub struct BuildPhases {
    phases: Vec<BuildPhase>,
}

impl BuildPhases {
    pub fn new(phases: Vec<BuildPhase>) -> Result<Self> {
        Self::validate_extension_overlap(&phases)?;
        Ok(BuildPhases { phases })
    }

    fn validate_extension_overlap(phases: &[BuildPhase]) -> Result<()> {
        let mut seen_inputs: Vec<(String, String)> = Vec::new();
        for phase in phases {
            let BuildPhase::InBuild(in_build) = phase else {
                continue;
            };
            let extensions = in_build.extensions();
            let own_inputs: Vec<&str> = extensions.input_patterns().collect();

            for output in extensions.output_patterns() {
                // A builder reading back its own declared output is
                // self-feeding, regardless of what any other phase declares.
                if own_inputs.iter().any(|input| *input == output) {
                    return Err(BuildGraphError::ArgumentError {
                        earlier: in_build.builder_key.clone(),
                        later: in_build.builder_key.clone(),
                        extension: output.to_string(),
                    });
                }
                for (earlier_key, earlier_input) in &seen_inputs {
                    if earlier_input == output {
                        return Err(BuildGraphError::ArgumentError {
                            earlier: earlier_key.clone(),
                            later: in_build.builder_key.clone(),
                            extension: output.to_string(),
                        });
                    }
                }
            }
            for input in own_inputs {
                seen_inputs.push((in_build.builder_key.clone(), input.to_string()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, phase: PhaseNumber) -> Option<&BuildPhase> {
        self.phases.get(phase.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PhaseNumber, &BuildPhase)> {
        self.phases
            .iter()
            .enumerate()
            .map(|(idx, phase)| (PhaseNumber(idx as u32), phase))
    }

    /// Finds the `InBuildPhase` that would have produced `output`, and the
    /// primary input that step ran for. Used by on-demand escalation to
    /// resolve "who produces this asset" without the caller needing to know
    /// the phase in advance.
    pub fn find_producer(&self, output: &AssetId) -> Option<(PhaseNumber, &InBuildPhase, AssetId)> {
        for (phase_number, phase) in self.iter() {
            let BuildPhase::InBuild(in_build) = phase else {
                continue;
            };
            if let Some(primary_input) = in_build.extensions().primary_input_for_output(output) {
                return Some((phase_number, in_build, primary_input));
            }
        }
        None
    }
}
