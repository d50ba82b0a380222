//! The sealed resolution result attached to every pipeline run.

use crate::error::{Error, Result};
use crate::material::MaterialConfig;
use crate::pipeline::{ConfigOrigin, PipelineConfig};
use crate::revision::MaterialRevisions;
use crate::trigger::BuildTrigger;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a pipeline run was triggered and from exactly which material
/// revisions.
///
/// A cause is constructed once at scheduling time through a named
/// constructor and never mutated afterwards, except for the narrow
/// pre-persistence adjustments (`set_message`, `set_approver`,
/// `add_overridden_variables`). It owns its revisions and trigger
/// exclusively; nothing is shared between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BuildCause {
    material_revisions: MaterialRevisions,
    trigger: BuildTrigger,
    approver: String,
    /// Environment variable overrides for this run, in declaration order.
    variables: Vec<(String, String)>,
}

/// Approver recorded for modification-driven runs.
pub const DEFAULT_APPROVER: &str = "changes";

/// Approver recorded for timer/external runs.
pub const EXTERNAL_APPROVER: &str = "timer";

impl BuildCause {
    /// The distinguished "this pipeline has no history" value.
    pub fn never_run() -> Self {
        Self {
            material_revisions: MaterialRevisions::new(),
            trigger: BuildTrigger::NeverRun,
            approver: String::new(),
            variables: Vec::new(),
        }
    }

    pub fn create_with_modifications(
        material_revisions: MaterialRevisions,
        approver: impl Into<String>,
    ) -> Result<Self> {
        if material_revisions.is_empty() {
            return Err(Error::NoModifications(
                "cannot create a modification cause without revisions".to_string(),
            ));
        }
        let message = material_revisions.build_cause_message();
        Ok(Self {
            material_revisions,
            trigger: BuildTrigger::modifications(message),
            approver: approver.into(),
            variables: Vec::new(),
        })
    }

    pub fn create_manual_forced(
        material_revisions: MaterialRevisions,
        approver: impl Into<String>,
    ) -> Result<Self> {
        if material_revisions.is_empty() {
            return Err(Error::NoModifications(
                "cannot force a run without material revisions".to_string(),
            ));
        }
        let approver = approver.into();
        Ok(Self {
            material_revisions,
            trigger: BuildTrigger::forced(approver.clone()),
            approver,
            variables: Vec::new(),
        })
    }

    pub fn create_external(material_revisions: MaterialRevisions) -> Result<Self> {
        if material_revisions.is_empty() {
            return Err(Error::NoModifications(
                "cannot create an external cause without revisions".to_string(),
            ));
        }
        Ok(Self {
            material_revisions,
            trigger: BuildTrigger::External,
            approver: EXTERNAL_APPROVER.to_string(),
            variables: Vec::new(),
        })
    }

    pub fn material_revisions(&self) -> &MaterialRevisions {
        &self.material_revisions
    }

    pub fn trigger(&self) -> &BuildTrigger {
        &self.trigger
    }

    pub fn approver(&self) -> &str {
        &self.approver
    }

    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    pub fn message(&self) -> &str {
        self.trigger.message()
    }

    pub fn is_forced(&self) -> bool {
        self.trigger.is_forced()
    }

    pub fn has_never_run(&self) -> bool {
        self.trigger.is_never_run()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.trigger = match std::mem::replace(&mut self.trigger, BuildTrigger::NeverRun) {
            BuildTrigger::Forced { approver, .. } => BuildTrigger::Forced { message, approver },
            BuildTrigger::Modifications { .. } => BuildTrigger::Modifications { message },
            other => other,
        };
    }

    pub fn set_approver(&mut self, approver: impl Into<String>) {
        self.approver = approver.into();
    }

    /// Append variable overrides; a later value for an existing name wins.
    pub fn add_overridden_variables(
        &mut self,
        variables: impl IntoIterator<Item = (String, String)>,
    ) {
        for (name, value) in variables {
            if let Some(existing) = self.variables.iter_mut().find(|(n, _)| *n == name) {
                existing.1 = value;
            } else {
                self.variables.push((name, value));
            }
        }
    }

    pub fn has_dependency_materials(&self) -> bool {
        self.material_revisions
            .iter()
            .any(|r| r.material.is_dependency())
    }

    pub fn dependency_materials(&self) -> impl Iterator<Item = &MaterialConfig> {
        self.material_revisions
            .iter()
            .map(|r| &r.material)
            .filter(|m| m.is_dependency())
    }

    /// Same trigger kind and element-wise equal material revisions.
    pub fn is_same_as(&self, other: &BuildCause) -> bool {
        self.trigger.same_kind(&other.trigger)
            && self.material_revisions.is_same_as(&other.material_revisions)
    }

    /// Whether this candidate cause should replace `incumbent` as the
    /// pending cause for its pipeline.
    ///
    /// Kind precedence first (Forced wins, NeverRun loses); between
    /// same-tier triggers an identical cause never trumps and otherwise
    /// the strictly newer latest-modification wins.
    pub fn trumps(&self, incumbent: &BuildCause) -> bool {
        if self.trigger.trumps(&incumbent.trigger) {
            return true;
        }
        if incumbent.trigger.trumps(&self.trigger) {
            return false;
        }
        if self.is_same_as(incumbent) {
            return false;
        }
        match (
            self.material_revisions.date_of_latest_modification(),
            incumbent.material_revisions.date_of_latest_modification(),
        ) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// True iff every configured material's fingerprint appears in this
    /// cause. A false result means the cause was computed against a
    /// configuration that has since changed materials.
    pub fn materials_match(&self, configured: &[MaterialConfig]) -> bool {
        configured.iter().all(|m| {
            self.material_revisions
                .find_revision_for_fingerprint(&m.fingerprint())
                .is_some()
        })
    }

    /// Throwing counterpart of [`materials_match`](Self::materials_match).
    /// The error is user-visible and non-retryable: the caller must
    /// re-poll rather than retry the same cause.
    pub fn assert_materials_match(&self, configured: &[MaterialConfig]) -> Result<()> {
        let missing: Vec<String> = configured
            .iter()
            .filter(|m| {
                self.material_revisions
                    .find_revision_for_fingerprint(&m.fingerprint())
                    .is_none()
            })
            .map(|m| m.display_name())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::BuildCauseOutOfDate(format!(
                "configured materials not present in build cause: {}",
                missing.join(", ")
            )))
        }
    }

    /// Config-as-code guard: when the pipeline's definition was parsed
    /// from one of its own materials, the revision this cause would build
    /// must be the revision the definition was parsed from. Forced runs
    /// are exempt; mixing configuration and code revisions on a re-run is
    /// a documented escape hatch.
    ///
    /// Side-effect-free and idempotent.
    pub fn assert_pipeline_config_and_material_revision_match(
        &self,
        pipeline_config: &PipelineConfig,
    ) -> Result<()> {
        if !pipeline_config.is_config_origin_one_of_materials() {
            return Ok(());
        }
        if self.trigger.is_forced() {
            return Ok(());
        }
        let ConfigOrigin::Repo { material, revision } = &pipeline_config.origin else {
            return Ok(());
        };
        let fingerprint = material.fingerprint();
        let Some(material_revision) = self
            .material_revisions
            .find_revision_for_fingerprint(&fingerprint)
        else {
            return Err(Error::BuildCauseOutOfDate(format!(
                "no revision for config origin material '{}' in build cause",
                material.display_name()
            )));
        };
        if material_revision.revision() != revision {
            return Err(Error::BuildCauseOutOfDate(format!(
                "pipeline '{}' configuration was parsed from revision {} but the build cause \
                 would run material '{}' at revision {}",
                pipeline_config.name,
                revision,
                material.display_name(),
                material_revision.revision()
            )));
        }
        Ok(())
    }

    /// Advisory, non-throwing variant of the config-origin guard.
    pub fn pipeline_config_and_material_revision_match(
        &self,
        pipeline_config: &PipelineConfig,
    ) -> bool {
        self.assert_pipeline_config_and_material_revision_match(pipeline_config)
            .is_ok()
    }

    /// The durable record of why this run happened.
    pub fn to_db_string(&self) -> &'static str {
        self.trigger.to_db_string()
    }

    /// Rehydrate a historical cause from its persisted trigger string.
    /// Only the trigger kind survives; revisions, message and approver are
    /// re-attached from their own persisted records by the caller.
    pub fn from_db_string(text: &str) -> Result<Self> {
        let trigger = BuildTrigger::from_db_string(text)?;
        let approver = match &trigger {
            BuildTrigger::Modifications { .. } => DEFAULT_APPROVER.to_string(),
            BuildTrigger::External => EXTERNAL_APPROVER.to_string(),
            _ => String::new(),
        };
        Ok(Self {
            material_revisions: MaterialRevisions::new(),
            trigger,
            approver,
            variables: Vec::new(),
        })
    }
}

impl fmt::Display for BuildCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trigger.message())
    }
}
