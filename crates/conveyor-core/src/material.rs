//! Material configuration types.
//!
//! A material is a configured input to a pipeline: a version-control
//! repository, a package feed, a pluggable SCM, or another pipeline. The
//! variants form a closed set so the resolution core can compare,
//! fingerprint, and order materials without knowing their concrete
//! protocol. Live polling happens behind [`crate::ports::MaterialPoller`].

use crate::ids::{Fingerprint, PipelineName};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A configured pipeline input.
///
/// Equality and hashing are fingerprint-based: two configs that differ only
/// in non-identity fields (display name, credentials, auto-update flag)
/// are the same material.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaterialConfig {
    /// User-assigned name; display name is derived when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether this material participates in automatic polling.
    #[serde(default = "default_true")]
    pub auto_update: bool,
    #[serde(flatten)]
    pub spec: MaterialSpec,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaterialSpec {
    Git(GitSpec),
    Mercurial(MercurialSpec),
    Subversion(SubversionSpec),
    Perforce(PerforceSpec),
    Tfs(TfsSpec),
    Package(PackageSpec),
    PluggableScm(PluggableScmSpec),
    Dependency(DependencySpec),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GitSpec {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub shallow_clone: bool,
}

fn default_branch() -> String {
    "master".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MercurialSpec {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubversionSpec {
    pub url: String,
    #[serde(default)]
    pub check_externals: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PerforceSpec {
    pub server_and_port: String,
    pub view: String,
    #[serde(default)]
    pub use_tickets: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TfsSpec {
    pub url: String,
    pub project_path: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PackageSpec {
    pub repository: String,
    pub package: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PluggableScmSpec {
    pub plugin_id: String,
    pub scm_id: String,
}

/// Dependency on the completion of one stage of another pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DependencySpec {
    pub pipeline: PipelineName,
    pub stage: String,
}

impl MaterialConfig {
    pub fn new(spec: MaterialSpec) -> Self {
        Self {
            name: None,
            auto_update: true,
            spec,
        }
    }

    pub fn named(name: impl Into<String>, spec: MaterialSpec) -> Self {
        Self {
            name: Some(name.into()),
            auto_update: true,
            spec,
        }
    }

    /// Stable identity hash over the identifying, non-secret configuration
    /// fields. Stable across process restarts; credentials and transient
    /// flags never participate.
    pub fn fingerprint(&self) -> Fingerprint {
        let canonical = self.identity_string();
        let digest = Sha256::digest(canonical.as_bytes());
        Fingerprint::from_digest(hex::encode(digest))
    }

    fn identity_string(&self) -> String {
        match &self.spec {
            MaterialSpec::Git(g) => format!("type=git;url={};branch={}", g.url, g.branch),
            MaterialSpec::Mercurial(h) => format!(
                "type=hg;url={};branch={}",
                h.url,
                h.branch.as_deref().unwrap_or("default")
            ),
            MaterialSpec::Subversion(s) => format!(
                "type=svn;url={};check_externals={}",
                s.url, s.check_externals
            ),
            MaterialSpec::Perforce(p) => format!(
                "type=p4;server={};view={}",
                p.server_and_port,
                p.view.trim()
            ),
            MaterialSpec::Tfs(t) => format!("type=tfs;url={};project={}", t.url, t.project_path),
            MaterialSpec::Package(p) => {
                format!("type=package;repository={};package={}", p.repository, p.package)
            }
            MaterialSpec::PluggableScm(s) => {
                format!("type=scm;plugin={};scm={}", s.plugin_id, s.scm_id)
            }
            MaterialSpec::Dependency(d) => format!(
                "type=dependency;pipeline={};stage={}",
                d.pipeline.as_str().to_ascii_lowercase(),
                d.stage
            ),
        }
    }

    pub fn kind(&self) -> MaterialKind {
        match &self.spec {
            MaterialSpec::Git(_) => MaterialKind::Git,
            MaterialSpec::Mercurial(_) => MaterialKind::Mercurial,
            MaterialSpec::Subversion(_) => MaterialKind::Subversion,
            MaterialSpec::Perforce(_) => MaterialKind::Perforce,
            MaterialSpec::Tfs(_) => MaterialKind::Tfs,
            MaterialSpec::Package(_) => MaterialKind::Package,
            MaterialSpec::PluggableScm(_) => MaterialKind::PluggableScm,
            MaterialSpec::Dependency(_) => MaterialKind::Dependency,
        }
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self.spec, MaterialSpec::Dependency(_))
    }

    pub fn as_dependency(&self) -> Option<&DependencySpec> {
        match &self.spec {
            MaterialSpec::Dependency(d) => Some(d),
            _ => None,
        }
    }

    /// User-assigned name, or a name derived from the identifying fields.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.spec {
            MaterialSpec::Git(g) => g.url.clone(),
            MaterialSpec::Mercurial(h) => h.url.clone(),
            MaterialSpec::Subversion(s) => s.url.clone(),
            MaterialSpec::Perforce(p) => p.server_and_port.clone(),
            MaterialSpec::Tfs(t) => t.url.clone(),
            MaterialSpec::Package(p) => format!("{}:{}", p.repository, p.package),
            MaterialSpec::PluggableScm(s) => s.scm_id.clone(),
            MaterialSpec::Dependency(d) => d.pipeline.to_string(),
        }
    }

    pub fn long_description(&self) -> String {
        match &self.spec {
            MaterialSpec::Git(g) => format!("Git repository {} on branch {}", g.url, g.branch),
            MaterialSpec::Mercurial(h) => format!(
                "Mercurial repository {} on branch {}",
                h.url,
                h.branch.as_deref().unwrap_or("default")
            ),
            MaterialSpec::Subversion(s) => format!("Subversion repository {}", s.url),
            MaterialSpec::Perforce(p) => {
                format!("Perforce server {} with view {}", p.server_and_port, p.view)
            }
            MaterialSpec::Tfs(t) => format!("TFS collection {} project {}", t.url, t.project_path),
            MaterialSpec::Package(p) => {
                format!("Package {} from repository {}", p.package, p.repository)
            }
            MaterialSpec::PluggableScm(s) => {
                format!("Pluggable SCM {} via plugin {}", s.scm_id, s.plugin_id)
            }
            MaterialSpec::Dependency(d) => {
                format!("Stage {} of upstream pipeline {}", d.stage, d.pipeline)
            }
        }
    }
}

impl PartialEq for MaterialConfig {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for MaterialConfig {}

impl std::hash::Hash for MaterialConfig {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Git,
    Mercurial,
    Subversion,
    Perforce,
    Tfs,
    Package,
    PluggableScm,
    Dependency,
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaterialKind::Git => "git",
            MaterialKind::Mercurial => "mercurial",
            MaterialKind::Subversion => "subversion",
            MaterialKind::Perforce => "perforce",
            MaterialKind::Tfs => "tfs",
            MaterialKind::Package => "package",
            MaterialKind::PluggableScm => "pluggable_scm",
            MaterialKind::Dependency => "dependency",
        };
        write!(f, "{}", s)
    }
}
