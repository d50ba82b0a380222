//! Pipeline configuration as seen by the resolution core.
//!
//! Parsing and schema migration of the on-disk configuration are external
//! collaborators; the core receives already-parsed values.

use crate::ids::{Fingerprint, PipelineName};
use crate::material::{DependencySpec, MaterialConfig};
use crate::modification::Revision;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    pub name: PipelineName,
    pub materials: Vec<MaterialConfig>,
    #[serde(default)]
    pub origin: ConfigOrigin,
    #[serde(default)]
    pub timer: Option<TimerConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<PipelineName>, materials: Vec<MaterialConfig>) -> Self {
        Self {
            name: name.into(),
            materials,
            origin: ConfigOrigin::File,
            timer: None,
        }
    }

    pub fn with_origin(mut self, origin: ConfigOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn material_fingerprints(&self) -> Vec<Fingerprint> {
        self.materials.iter().map(|m| m.fingerprint()).collect()
    }

    pub fn dependency_materials(&self) -> impl Iterator<Item = (&MaterialConfig, &DependencySpec)> {
        self.materials
            .iter()
            .filter_map(|m| m.as_dependency().map(|d| (m, d)))
    }

    pub fn has_dependency_materials(&self) -> bool {
        self.materials.iter().any(|m| m.is_dependency())
    }

    pub fn is_config_defined_remotely(&self) -> bool {
        matches!(self.origin, ConfigOrigin::Repo { .. })
    }

    /// Whether the config-repo material this pipeline's definition came
    /// from is also one of its own configured materials.
    pub fn is_config_origin_one_of_materials(&self) -> bool {
        match &self.origin {
            ConfigOrigin::File => false,
            ConfigOrigin::Repo { material, .. } => {
                let origin_fingerprint = material.fingerprint();
                self.materials
                    .iter()
                    .any(|m| m.fingerprint() == origin_fingerprint)
            }
        }
    }

    /// Whether both pipelines' definitions come from the same config repo.
    pub fn has_same_config_origin(&self, other: &PipelineConfig) -> bool {
        match (&self.origin, &other.origin) {
            (
                ConfigOrigin::Repo { material: a, .. },
                ConfigOrigin::Repo { material: b, .. },
            ) => a.fingerprint() == b.fingerprint(),
            _ => false,
        }
    }
}

/// Where a pipeline's configuration was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigOrigin {
    /// The server's own configuration file.
    #[default]
    File,
    /// A config repository: the definition was parsed from `material` at
    /// `revision`.
    Repo {
        material: MaterialConfig,
        revision: Revision,
    },
}

impl ConfigOrigin {
    pub fn repo(material: MaterialConfig, revision: impl Into<Revision>) -> Self {
        ConfigOrigin::Repo {
            material,
            revision: revision.into(),
        }
    }
}

/// Cron-like timer trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimerConfig {
    pub spec: String,
    /// Only produce a run when the materials actually moved since the
    /// previous one.
    #[serde(default)]
    pub only_on_changes: bool,
}

/// Caller-supplied options for a manual or timer schedule request.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Revisions pinned by the user, keyed by material fingerprint. For
    /// dependency materials the revision uses the dependency grammar.
    pub specified_revisions: HashMap<Fingerprint, Revision>,
    /// Environment variable overrides for this run, in declaration order.
    pub variables: Vec<(String, String)>,
    /// Whether materials should be re-polled before the cause is computed.
    pub update_materials_before_scheduling: bool,
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self {
            specified_revisions: HashMap::new(),
            variables: Vec::new(),
            update_materials_before_scheduling: true,
        }
    }

    pub fn with_specified_revision(
        mut self,
        fingerprint: Fingerprint,
        revision: impl Into<Revision>,
    ) -> Self {
        self.specified_revisions.insert(fingerprint, revision.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }
}
