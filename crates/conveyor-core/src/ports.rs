//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the resolution core and the
//! external collaborators that feed it: material polling transports, the
//! pipeline history store, the pipeline configuration registry, and the
//! to-be-scheduled queue.

use crate::build_cause::BuildCause;
use crate::ids::PipelineName;
use crate::material::MaterialConfig;
use crate::modification::{DependencyMaterialRevision, Modification, Revision};
use crate::pipeline::PipelineConfig;
use crate::revision::MaterialRevisions;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Polls a material's backing store for modifications.
///
/// Implementations own the protocol (git, svn, package feed...) and any
/// retry/backoff policy. A poll either returns a valid modification list,
/// newest first, or a [`crate::Error::MaterialPoll`]; it must never report
/// a transport failure as an empty list, which would be indistinguishable
/// from "no changes".
#[async_trait]
pub trait MaterialPoller: Send + Sync {
    /// The most recent modifications visible on the material. Newest
    /// first; at least one entry when the material has any history.
    async fn latest_modification(&self, material: &MaterialConfig) -> Result<Vec<Modification>>;

    /// Everything observed after `revision`, newest first. Empty means
    /// "no changes since", which is a valid result.
    async fn modifications_since(
        &self,
        material: &MaterialConfig,
        revision: &Revision,
    ) -> Result<Vec<Modification>>;
}

/// One completed instance of an upstream pipeline's stage, as recorded by
/// the history store. Once sealed it is immutable and safe for concurrent
/// read by any number of downstream resolvers.
#[derive(Debug, Clone)]
pub struct UpstreamInstance {
    pub pipeline: PipelineName,
    pub counter: u32,
    pub label: String,
    pub stage: String,
    pub stage_counter: u32,
    pub completed_at: DateTime<Utc>,
    pub cause: BuildCause,
}

impl UpstreamInstance {
    pub fn dependency_revision(&self) -> DependencyMaterialRevision {
        DependencyMaterialRevision::new(
            self.pipeline.clone(),
            self.counter,
            Some(self.label.clone()),
            self.stage.clone(),
            self.stage_counter,
        )
    }
}

/// Read access to completed pipeline instances.
#[async_trait]
pub trait PipelineHistory: Send + Sync {
    /// Recent completed instances of `stage`, newest first.
    async fn recent_instances(
        &self,
        pipeline: &PipelineName,
        stage: &str,
        limit: usize,
    ) -> Result<Vec<UpstreamInstance>>;

    /// One specific instance, if it has completed.
    async fn instance(
        &self,
        pipeline: &PipelineName,
        counter: u32,
        stage: &str,
    ) -> Result<Option<UpstreamInstance>>;

    /// Whether the pipeline has ever run with exactly these revisions.
    async fn has_ever_run_with(
        &self,
        pipeline: &PipelineName,
        revisions: &MaterialRevisions,
    ) -> Result<bool>;
}

/// Registry of parsed pipeline configurations.
#[async_trait]
pub trait PipelineConfigSource: Send + Sync {
    async fn pipeline_config(&self, name: &PipelineName) -> Result<Option<PipelineConfig>>;
}

/// The per-pipeline to-be-scheduled queue. Persistence of the final cause
/// is the queue's concern; the core only ever hands over sealed values.
#[async_trait]
pub trait ScheduleQueue: Send + Sync {
    /// The most recently scheduled cause for the pipeline, pending or not.
    async fn most_recent_scheduled(&self, pipeline: &PipelineName) -> Result<Option<BuildCause>>;

    async fn schedule(&self, pipeline: &PipelineName, cause: BuildCause) -> Result<()>;
}
