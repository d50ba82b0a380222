//! Observed changes on a material.
//!
//! A [`Modification`] is an immutable record of one change seen while
//! polling a material: a commit, a package publish, or the completion of
//! an upstream pipeline stage. Within a material's history modifications
//! are ordered newest first.

use crate::error::{Error, Result};
use crate::ids::PipelineName;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque revision identifier. For SCM materials this is whatever the
/// protocol produces (hash, integer, changelist number); for dependency
/// materials it follows the [`DependencyMaterialRevision`] grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Revision {
    fn from(rev: &str) -> Self {
        Self::new(rev)
    }
}

/// One observed change on a material. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Modification {
    pub revision: Revision,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub modified_time: DateTime<Utc>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Display label of the upstream pipeline instance. Only meaningful
    /// for dependency materials.
    #[serde(default)]
    pub pipeline_label: Option<String>,
}

impl Modification {
    pub fn new(
        revision: impl Into<Revision>,
        author: Option<String>,
        comment: Option<String>,
        modified_time: DateTime<Utc>,
    ) -> Self {
        Self {
            revision: revision.into(),
            author,
            comment,
            modified_time,
            changed_files: Vec::new(),
            pipeline_label: None,
        }
    }

    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = files;
        self
    }
}

impl From<String> for Revision {
    fn from(rev: String) -> Self {
        Self::new(rev)
    }
}

/// The revision of a dependency material: one completed stage of one
/// upstream pipeline instance.
///
/// Persisted as a plain [`Revision`] using the fixed grammar
/// `pipeline/counter/stage/stage-counter`, which must round-trip
/// losslessly. The display label is carried on the [`Modification`], not
/// in the revision string; when absent it defaults to the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DependencyMaterialRevision {
    pub pipeline_name: PipelineName,
    pub pipeline_counter: u32,
    pub pipeline_label: String,
    pub stage_name: String,
    pub stage_counter: u32,
}

impl DependencyMaterialRevision {
    pub fn new(
        pipeline_name: impl Into<PipelineName>,
        pipeline_counter: u32,
        pipeline_label: Option<String>,
        stage_name: impl Into<String>,
        stage_counter: u32,
    ) -> Self {
        let label = pipeline_label.unwrap_or_else(|| pipeline_counter.to_string());
        Self {
            pipeline_name: pipeline_name.into(),
            pipeline_counter,
            pipeline_label: label,
            stage_name: stage_name.into(),
            stage_counter,
        }
    }

    /// The encoded revision string, e.g. `upstream/12/dist/1`.
    pub fn revision(&self) -> Revision {
        Revision::new(format!(
            "{}/{}/{}/{}",
            self.pipeline_name, self.pipeline_counter, self.stage_name, self.stage_counter
        ))
    }

    /// Parse an encoded dependency revision. The label is not part of the
    /// grammar and is rehydrated as the counter.
    pub fn parse(revision: &str) -> Result<Self> {
        let parts: Vec<&str> = revision.split('/').collect();
        if parts.len() != 4 {
            return Err(Error::MalformedDependencyRevision(revision.to_string()));
        }
        if parts[0].is_empty() || parts[2].is_empty() {
            return Err(Error::MalformedDependencyRevision(revision.to_string()));
        }
        let pipeline_counter: u32 = parts[1]
            .parse()
            .map_err(|_| Error::MalformedDependencyRevision(revision.to_string()))?;
        let stage_counter: u32 = parts[3]
            .parse()
            .map_err(|_| Error::MalformedDependencyRevision(revision.to_string()))?;
        Ok(Self::new(
            parts[0],
            pipeline_counter,
            None,
            parts[2],
            stage_counter,
        ))
    }

    /// Wrap into a modification at the time the upstream stage completed.
    pub fn into_modification(self, completed_at: DateTime<Utc>) -> Modification {
        Modification {
            revision: self.revision(),
            author: None,
            comment: Some(format!(
                "Completed stage {} of {}/{}",
                self.stage_name, self.pipeline_name, self.pipeline_counter
            )),
            modified_time: completed_at,
            changed_files: Vec::new(),
            pipeline_label: Some(self.pipeline_label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_revision_roundtrip() {
        let original =
            DependencyMaterialRevision::new("upstream", 12, None, "dist", 1);
        let parsed = DependencyMaterialRevision::parse(original.revision().as_str()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_dependency_revision_encoding() {
        let rev = DependencyMaterialRevision::new("build", 5, None, "package", 2);
        assert_eq!(rev.revision().as_str(), "build/5/package/2");
        assert_eq!(rev.pipeline_label, "5");
    }

    #[test]
    fn test_parse_rejects_malformed_strings() {
        assert!(DependencyMaterialRevision::parse("not-a-dep-revision").is_err());
        assert!(DependencyMaterialRevision::parse("a/b/c/d").is_err());
        assert!(DependencyMaterialRevision::parse("a/1/c").is_err());
        assert!(DependencyMaterialRevision::parse("/1/stage/1").is_err());
        assert!(DependencyMaterialRevision::parse("a/1/stage/1/extra").is_err());
    }

    #[test]
    fn test_custom_label_is_not_encoded() {
        let rev = DependencyMaterialRevision::new(
            "upstream",
            3,
            Some("release-1.2.3".to_string()),
            "dist",
            1,
        );
        assert_eq!(rev.revision().as_str(), "upstream/3/dist/1");
        let parsed = DependencyMaterialRevision::parse(rev.revision().as_str()).unwrap();
        assert_eq!(parsed.pipeline_label, "3");
    }
}
