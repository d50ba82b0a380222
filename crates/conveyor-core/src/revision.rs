//! Resolved material revisions for one pipeline run.

use crate::error::{Error, Result};
use crate::ids::Fingerprint;
use crate::material::MaterialConfig;
use crate::modification::{DependencyMaterialRevision, Modification, Revision};
use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One material paired with everything new on it since the last run,
/// newest modification first. The newest modification's revision is the
/// effective revision used for checkout and consistency checks.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct MaterialRevision {
    pub material: MaterialConfig,
    modifications: Vec<Modification>,
    /// Whether these modifications were new for the run they were resolved
    /// for, as opposed to carried over unchanged from the previous run.
    changed: bool,
}

/// Wire form of [`MaterialRevision`]. Deserialization goes through
/// [`MaterialRevision::new`] so a persisted record with an empty
/// modification list is rejected instead of producing a value whose
/// accessors would panic.
#[derive(Deserialize)]
struct MaterialRevisionRecord {
    material: MaterialConfig,
    modifications: Vec<Modification>,
    #[serde(default)]
    changed: bool,
}

impl<'de> serde::Deserialize<'de> for MaterialRevision {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let record = MaterialRevisionRecord::deserialize(deserializer)?;
        let mut revision = MaterialRevision::new(record.material, record.modifications)
            .map_err(serde::de::Error::custom)?;
        revision.changed = record.changed;
        Ok(revision)
    }
}

impl MaterialRevision {
    pub fn new(material: MaterialConfig, modifications: Vec<Modification>) -> Result<Self> {
        if modifications.is_empty() {
            return Err(Error::EmptyMaterialRevision(material.display_name()));
        }
        Ok(Self {
            material,
            modifications,
            changed: false,
        })
    }

    pub fn changed(material: MaterialConfig, modifications: Vec<Modification>) -> Result<Self> {
        let mut rev = Self::new(material, modifications)?;
        rev.changed = true;
        Ok(rev)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.material.fingerprint()
    }

    /// The effective revision: the newest modification's identifier.
    pub fn revision(&self) -> &Revision {
        &self.modifications[0].revision
    }

    pub fn latest_modification(&self) -> &Modification {
        &self.modifications[0]
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn modified_time(&self) -> DateTime<Utc> {
        self.modifications[0].modified_time
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_as_changed(&mut self) {
        self.changed = true;
    }

    pub fn mark_as_not_changed(&mut self) {
        self.changed = false;
    }

    /// The parsed dependency revision, when this material is a dependency.
    pub fn dependency_revision(&self) -> Option<DependencyMaterialRevision> {
        if !self.material.is_dependency() {
            return None;
        }
        DependencyMaterialRevision::parse(self.revision().as_str()).ok()
    }
}

/// The ordered collection of material revisions for one pipeline run, one
/// entry per configured material, insertion order matching declaration
/// order. Empty is the "never polled" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MaterialRevisions {
    revisions: Vec<MaterialRevision>,
}

impl MaterialRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, revision: MaterialRevision) -> Result<()> {
        let fingerprint = revision.fingerprint();
        if self.find_revision_for_fingerprint(&fingerprint).is_some() {
            return Err(Error::DuplicateMaterial(
                revision.material.display_name(),
            ));
        }
        self.revisions.push(revision);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialRevision> {
        self.revisions.iter()
    }

    pub fn find_revision_for_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Option<&MaterialRevision> {
        self.revisions
            .iter()
            .find(|r| &r.fingerprint() == fingerprint)
    }

    /// Latest modification date across all materials.
    pub fn date_of_latest_modification(&self) -> Option<DateTime<Utc>> {
        self.revisions.iter().map(|r| r.modified_time()).max()
    }

    /// Human-readable summary of who caused this change set.
    pub fn build_cause_message(&self) -> String {
        if self.revisions.is_empty() {
            return "No modifications".to_string();
        }
        let parts: Vec<String> = self
            .revisions
            .iter()
            .map(|r| {
                let latest = r.latest_modification();
                match (&latest.author, &latest.comment) {
                    (Some(author), Some(comment)) => {
                        format!("modified by {}: {}", author, comment)
                    }
                    (Some(author), None) => format!("modified by {}", author),
                    (None, Some(comment)) => format!("modified: {}", comment),
                    (None, None) => format!("modified {}", latest.revision),
                }
            })
            .collect();
        parts.join("; ")
    }

    /// Whether anything moved relative to a previously resolved set.
    /// Order-insensitive: a changed material set, or any material whose
    /// effective revision differs, counts as changed.
    pub fn has_changed_since(&self, original: &MaterialRevisions) -> bool {
        if !self.same_material_set(original) {
            return true;
        }
        self.revisions.iter().any(|mine| {
            original
                .find_revision_for_fingerprint(&mine.fingerprint())
                .map(|theirs| theirs.revision() != mine.revision())
                .unwrap_or(true)
        })
    }

    /// Element-wise equality on heads, ignoring modification bodies and
    /// declaration order.
    pub fn is_same_as(&self, other: &MaterialRevisions) -> bool {
        self.same_material_set(other) && !self.has_changed_since(other)
    }

    fn same_material_set(&self, other: &MaterialRevisions) -> bool {
        if self.revisions.len() != other.revisions.len() {
            return false;
        }
        self.revisions
            .iter()
            .all(|r| other.find_revision_for_fingerprint(&r.fingerprint()).is_some())
    }

    /// Whether any non-dependency modification was authored by, or mentions,
    /// the given matcher. Used by the notification layer ("email me when I
    /// check in").
    pub fn contains_my_checkin(&self, matcher: &CheckinMatcher) -> bool {
        self.revisions
            .iter()
            .filter(|r| !r.material.is_dependency())
            .flat_map(|r| r.modifications().iter())
            .any(|m| {
                matcher.matches(m.author.as_deref().unwrap_or(""))
                    || matcher.matches(m.comment.as_deref().unwrap_or(""))
            })
    }
}

impl IntoIterator for MaterialRevisions {
    type Item = MaterialRevision;
    type IntoIter = std::vec::IntoIter<MaterialRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.into_iter()
    }
}

/// Case-insensitive whole-word matcher over authors and comments. The word
/// is taken literally; regex metacharacters in it do not act as patterns.
#[derive(Debug, Clone)]
pub struct CheckinMatcher {
    pattern: Option<Regex>,
}

impl CheckinMatcher {
    pub fn new(word: &str) -> Self {
        if word.trim().is_empty() {
            return Self { pattern: None };
        }
        let escaped = regex::escape(word.trim());
        let pattern = Regex::new(&format!(r"(?i)\b{}\b", escaped)).ok();
        Self { pattern }
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(text),
            None => false,
        }
    }
}
