//! In-memory test doubles for the scheduler's ports.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conveyor_core::build_cause::BuildCause;
use conveyor_core::ids::{Fingerprint, PipelineName};
use conveyor_core::material::{DependencySpec, GitSpec, MaterialConfig, MaterialSpec};
use conveyor_core::modification::{DependencyMaterialRevision, Modification, Revision};
use conveyor_core::pipeline::PipelineConfig;
use conveyor_core::ports::{
    MaterialPoller, PipelineConfigSource, PipelineHistory, ScheduleQueue, UpstreamInstance,
};
use conveyor_core::revision::{MaterialRevision, MaterialRevisions};
use conveyor_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

pub fn git(url: &str) -> MaterialConfig {
    MaterialConfig::new(MaterialSpec::Git(GitSpec {
        url: url.to_string(),
        branch: "master".to_string(),
        shallow_clone: false,
    }))
}

pub fn depends_on(pipeline: &str, stage: &str) -> MaterialConfig {
    MaterialConfig::new(MaterialSpec::Dependency(DependencySpec {
        pipeline: PipelineName::new(pipeline),
        stage: stage.to_string(),
    }))
}

pub fn modification(rev: &str, age_hours: i64) -> Modification {
    Modification::new(
        rev,
        Some("dev".to_string()),
        Some(format!("commit {rev}")),
        Utc::now() - Duration::hours(age_hours),
    )
}

/// A sealed upstream instance whose cause pins the given upstream
/// counters through dependency materials.
pub fn sealed_instance(
    pipeline: &str,
    counter: u32,
    stage: &str,
    completed_at: DateTime<Utc>,
    pinned: &[(&str, u32)],
) -> UpstreamInstance {
    let cause = if pinned.is_empty() {
        let mut revisions = MaterialRevisions::new();
        revisions
            .add(
                MaterialRevision::new(
                    git(&format!("https://example.com/{pipeline}.git")),
                    vec![modification(&format!("{pipeline}-src-{counter}"), 1)],
                )
                .unwrap(),
            )
            .unwrap();
        BuildCause::create_with_modifications(revisions, "changes").unwrap()
    } else {
        let mut revisions = MaterialRevisions::new();
        for (upstream, upstream_counter) in pinned {
            let dep = DependencyMaterialRevision::new(*upstream, *upstream_counter, None, "dist", 1);
            revisions
                .add(
                    MaterialRevision::new(
                        depends_on(upstream, "dist"),
                        vec![dep.into_modification(completed_at)],
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        BuildCause::create_with_modifications(revisions, "changes").unwrap()
    };

    UpstreamInstance {
        pipeline: PipelineName::new(pipeline),
        counter,
        label: counter.to_string(),
        stage: stage.to_string(),
        stage_counter: 1,
        completed_at,
        cause,
    }
}

pub struct StaticConfigs {
    configs: Vec<PipelineConfig>,
}

impl StaticConfigs {
    pub fn new(configs: Vec<PipelineConfig>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl PipelineConfigSource for StaticConfigs {
    async fn pipeline_config(&self, name: &PipelineName) -> Result<Option<PipelineConfig>> {
        Ok(self.configs.iter().find(|c| &c.name == name).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryHistory {
    instances: Vec<UpstreamInstance>,
    ever_ran: Vec<(PipelineName, MaterialRevisions)>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: UpstreamInstance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_completed_run(mut self, pipeline: &str, revisions: MaterialRevisions) -> Self {
        self.ever_ran.push((PipelineName::new(pipeline), revisions));
        self
    }
}

#[async_trait]
impl PipelineHistory for InMemoryHistory {
    async fn recent_instances(
        &self,
        pipeline: &PipelineName,
        stage: &str,
        limit: usize,
    ) -> Result<Vec<UpstreamInstance>> {
        let mut matching: Vec<UpstreamInstance> = self
            .instances
            .iter()
            .filter(|i| &i.pipeline == pipeline && i.stage == stage)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.counter.cmp(&a.counter));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn instance(
        &self,
        pipeline: &PipelineName,
        counter: u32,
        stage: &str,
    ) -> Result<Option<UpstreamInstance>> {
        Ok(self
            .instances
            .iter()
            .find(|i| &i.pipeline == pipeline && i.counter == counter && i.stage == stage)
            .cloned())
    }

    async fn has_ever_run_with(
        &self,
        pipeline: &PipelineName,
        revisions: &MaterialRevisions,
    ) -> Result<bool> {
        Ok(self
            .ever_ran
            .iter()
            .any(|(name, past)| name == pipeline && past.is_same_as(revisions)))
    }
}

#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<HashMap<PipelineName, BuildCause>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending(self, pipeline: &str, cause: BuildCause) -> Self {
        self.pending
            .lock()
            .unwrap()
            .insert(PipelineName::new(pipeline), cause);
        self
    }

    pub fn pending_for(&self, pipeline: &str) -> Option<BuildCause> {
        self.pending
            .lock()
            .unwrap()
            .get(&PipelineName::new(pipeline))
            .cloned()
    }
}

#[async_trait]
impl ScheduleQueue for InMemoryQueue {
    async fn most_recent_scheduled(&self, pipeline: &PipelineName) -> Result<Option<BuildCause>> {
        Ok(self.pending.lock().unwrap().get(pipeline).cloned())
    }

    async fn schedule(&self, pipeline: &PipelineName, cause: BuildCause) -> Result<()> {
        self.pending.lock().unwrap().insert(pipeline.clone(), cause);
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedPoller {
    history: HashMap<Fingerprint, Vec<Modification>>,
}

impl ScriptedPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full history of a material, newest revision first.
    pub fn with_history(mut self, material: &MaterialConfig, modifications: Vec<Modification>) -> Self {
        self.history.insert(material.fingerprint(), modifications);
        self
    }
}

#[async_trait]
impl MaterialPoller for ScriptedPoller {
    async fn latest_modification(&self, material: &MaterialConfig) -> Result<Vec<Modification>> {
        self.history
            .get(&material.fingerprint())
            .cloned()
            .ok_or_else(|| Error::MaterialPoll {
                material: material.display_name(),
                reason: "no scripted history".to_string(),
            })
    }

    async fn modifications_since(
        &self,
        material: &MaterialConfig,
        revision: &Revision,
    ) -> Result<Vec<Modification>> {
        let all = self.latest_modification(material).await?;
        let position = all.iter().position(|m| &m.revision == revision);
        Ok(match position {
            Some(p) => all[..p].to_vec(),
            None => all,
        })
    }
}
