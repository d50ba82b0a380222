//! Build-cause production.
//!
//! One scheduling attempt for one pipeline: poll, resolve, compare
//! against the pending cause, and either hand a sealed [`BuildCause`] to
//! the schedule queue or report why not. The attempt is logically
//! single-threaded; only the polls inside it run concurrently.

use crate::checker::MaterialChecker;
use crate::dag::DependencyGraph;
use crate::fanin::FanInResolver;
use conveyor_core::build_cause::{BuildCause, DEFAULT_APPROVER};
use conveyor_core::ids::{Fingerprint, PipelineName};
use conveyor_core::material::MaterialConfig;
use conveyor_core::pipeline::{PipelineConfig, ScheduleOptions};
use conveyor_core::ports::{MaterialPoller, PipelineConfigSource, PipelineHistory, ScheduleQueue};
use conveyor_core::revision::{MaterialRevision, MaterialRevisions};
use conveyor_core::Error;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// The kind of schedule request, deciding the trigger variant, the
/// approver, and whether an unchanged material set still produces a run.
#[derive(Debug, Clone)]
pub enum BuildType {
    /// Modification-driven; only schedules when something moved.
    Auto,
    /// Forced by a user; re-runs even without changes.
    Manual { username: String },
    /// Requested by the timer.
    Timer,
}

/// Why an otherwise successful attempt produced no run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing moved since the previous run.
    NoModifications,
    /// The latest revisions have already been built by an earlier run.
    AlreadyRunWithLatest,
    /// The candidate does not trump the currently pending cause.
    DoesNotTrumpPending,
    /// The configuration changed while the cause was being resolved; the
    /// partial result was discarded.
    MaterialsMismatch,
    /// An upstream dependency has no completed instance yet.
    WaitingForUpstream,
}

#[derive(Debug)]
pub enum ScheduleOutcome {
    Scheduled(BuildCause),
    NotScheduled(SkipReason),
}

#[derive(Debug, ThisError)]
pub enum ScheduleError {
    #[error("Pipeline {0} is already being triggered")]
    AlreadyTriggered(PipelineName),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(PipelineName),

    #[error(transparent)]
    Core(#[from] Error),
}

/// Per-pipeline in-flight manual-trigger guard. A second manual trigger
/// while one is pending is a conflict, not a queueing request.
#[derive(Default)]
struct TriggerMonitor {
    in_flight: Mutex<HashSet<PipelineName>>,
}

impl TriggerMonitor {
    async fn mark(&self, pipeline: &PipelineName) -> bool {
        self.in_flight.lock().await.insert(pipeline.clone())
    }

    async fn clear(&self, pipeline: &PipelineName) {
        self.in_flight.lock().await.remove(pipeline);
    }
}

pub struct BuildCauseProducer {
    configs: Arc<dyn PipelineConfigSource>,
    history: Arc<dyn PipelineHistory>,
    queue: Arc<dyn ScheduleQueue>,
    checker: MaterialChecker,
    trigger_monitor: TriggerMonitor,
    fanin_window: usize,
}

impl BuildCauseProducer {
    pub fn new(
        configs: Arc<dyn PipelineConfigSource>,
        history: Arc<dyn PipelineHistory>,
        queue: Arc<dyn ScheduleQueue>,
        poller: Arc<dyn MaterialPoller>,
    ) -> Self {
        Self {
            configs,
            history,
            queue,
            checker: MaterialChecker::new(poller),
            trigger_monitor: TriggerMonitor::default(),
            fanin_window: crate::fanin::DEFAULT_CANDIDATE_WINDOW,
        }
    }

    pub fn with_fanin_window(mut self, window: usize) -> Self {
        self.fanin_window = window.max(1);
        self
    }

    /// Modification-driven attempt, run after a polling cycle.
    pub async fn auto_schedule(
        &self,
        pipeline: &PipelineName,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let config = self.config_for(pipeline).await?;
        self.produce(&config, BuildType::Auto, ScheduleOptions::default())
            .await
    }

    /// User-forced attempt. Rejected while another manual trigger for the
    /// same pipeline is still in flight.
    pub async fn manual_schedule(
        &self,
        pipeline: &PipelineName,
        username: impl Into<String>,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let config = self.config_for(pipeline).await?;
        if !self.trigger_monitor.mark(pipeline).await {
            return Err(ScheduleError::AlreadyTriggered(pipeline.clone()));
        }
        let result = self
            .produce(
                &config,
                BuildType::Manual {
                    username: username.into(),
                },
                options,
            )
            .await;
        self.trigger_monitor.clear(pipeline).await;
        result
    }

    /// Timer-driven attempt.
    pub async fn timer_schedule(
        &self,
        pipeline: &PipelineName,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let config = self.config_for(pipeline).await?;
        self.produce(&config, BuildType::Timer, ScheduleOptions::default())
            .await
    }

    async fn config_for(&self, pipeline: &PipelineName) -> Result<PipelineConfig, ScheduleError> {
        self.configs
            .pipeline_config(pipeline)
            .await?
            .ok_or_else(|| ScheduleError::PipelineNotFound(pipeline.clone()))
    }

    async fn produce(
        &self,
        config: &PipelineConfig,
        build_type: BuildType,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let pipeline = &config.name;
        debug!(%pipeline, "start producing build cause");

        let previous = self
            .queue
            .most_recent_scheduled(pipeline)
            .await?
            .unwrap_or_else(BuildCause::never_run);

        // The whole upstream graph is validated before any polling I/O.
        let graph = DependencyGraph::build(config.clone(), self.configs.as_ref()).await?;

        let scm_materials: Vec<MaterialConfig> = config
            .materials
            .iter()
            .filter(|m| !m.is_dependency())
            .cloned()
            .collect();

        let material_configuration_changed =
            !previous.has_never_run() && self.has_material_drift(config, &previous);
        if material_configuration_changed {
            debug!(%pipeline, "material configuration drifted; using latest revisions");
        }

        // A manual trigger may ask to re-run on the already-resolved
        // revisions instead of polling again.
        let reuse_previous = matches!(build_type, BuildType::Manual { .. })
            && !options.update_materials_before_scheduling
            && !previous.has_never_run()
            && !material_configuration_changed
            && options.specified_revisions.is_empty();
        if reuse_previous {
            let combined = previous.material_revisions().clone();
            return self
                .seal_and_schedule(config, &graph, &build_type, &options, combined, &previous)
                .await;
        }

        let scm_revisions = if previous.has_never_run() || material_configuration_changed {
            self.checker
                .find_latest_revisions(&scm_materials, &options.specified_revisions)
                .await
        } else {
            self.checker
                .find_revisions_since(
                    &scm_materials,
                    previous.material_revisions(),
                    &options.specified_revisions,
                )
                .await
        };
        let scm_revisions = match scm_revisions {
            Ok(revisions) => revisions,
            Err(Error::NoModifications(reason)) => {
                debug!(%pipeline, %reason, "missing modifications; not scheduling");
                return Ok(ScheduleOutcome::NotScheduled(SkipReason::NoModifications));
            }
            Err(other) => return Err(other.into()),
        };

        let dependency_revisions = if config.has_dependency_materials() {
            let resolver = FanInResolver::new(&graph, self.history.as_ref())
                .with_candidate_window(self.fanin_window);
            match resolver.resolve(&options.specified_revisions).await {
                Ok(revisions) => {
                    self.mark_dependency_changes(revisions, previous.material_revisions())
                }
                Err(Error::NoModifications(reason)) => {
                    debug!(%pipeline, %reason, "upstream has never run; not scheduling");
                    return Ok(ScheduleOutcome::NotScheduled(SkipReason::WaitingForUpstream));
                }
                Err(other) => return Err(other.into()),
            }
        } else {
            Vec::new()
        };

        let combined = assemble_in_declaration_order(config, scm_revisions, dependency_revisions)?;
        self.seal_and_schedule(config, &graph, &build_type, &options, combined, &previous)
            .await
    }

    /// Turn a fully resolved revision set into a cause, run the
    /// pre-persistence guards, and hand it to the queue if it wins.
    async fn seal_and_schedule(
        &self,
        config: &PipelineConfig,
        graph: &DependencyGraph,
        build_type: &BuildType,
        options: &ScheduleOptions,
        combined: MaterialRevisions,
        previous: &BuildCause,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let pipeline = &config.name;

        let mut cause = match build_type {
            BuildType::Auto => {
                if !previous.has_never_run()
                    && !combined.has_changed_since(previous.material_revisions())
                {
                    debug!(%pipeline, "repository not modified; not scheduling");
                    return Ok(ScheduleOutcome::NotScheduled(SkipReason::NoModifications));
                }
                BuildCause::create_with_modifications(combined, DEFAULT_APPROVER)?
            }
            BuildType::Manual { username } => {
                BuildCause::create_manual_forced(combined, username.clone())?
            }
            BuildType::Timer => {
                let only_on_changes = config
                    .timer
                    .as_ref()
                    .map(|t| t.only_on_changes)
                    .unwrap_or(false);
                if only_on_changes {
                    if !previous.has_never_run()
                        && !combined.has_changed_since(previous.material_revisions())
                    {
                        debug!(%pipeline, "timer fired but nothing changed; not scheduling");
                        return Ok(ScheduleOutcome::NotScheduled(SkipReason::NoModifications));
                    }
                    if self.history.has_ever_run_with(pipeline, &combined).await? {
                        debug!(%pipeline, "latest revisions already built; not scheduling");
                        return Ok(ScheduleOutcome::NotScheduled(
                            SkipReason::AlreadyRunWithLatest,
                        ));
                    }
                }
                BuildCause::create_external(combined)?
            }
        };
        cause.add_overridden_variables(options.variables.clone());

        // The configuration may have changed while we were polling; a
        // cause computed against a stale material set is discarded, never
        // persisted.
        if !cause.materials_match(&config.materials) {
            warn!(
                %pipeline,
                "materials in the resolved cause do not match the configuration; discarding"
            );
            return Ok(ScheduleOutcome::NotScheduled(SkipReason::MaterialsMismatch));
        }

        self.enforce_config_origin_consistency(config, &cause, graph)?;

        if !cause.trumps(previous) {
            debug!(%pipeline, "candidate cause does not trump the pending one");
            return Ok(ScheduleOutcome::NotScheduled(SkipReason::DoesNotTrumpPending));
        }

        self.queue.schedule(pipeline, cause.clone()).await?;
        debug!(%pipeline, cause = %cause, "scheduled");
        Ok(ScheduleOutcome::Scheduled(cause))
    }

    /// Config-as-code guard. Forced runs are exempt; so is a cause whose
    /// upstream dependency shares the same config origin repo, because the
    /// upstream run already proved that origin revision.
    fn enforce_config_origin_consistency(
        &self,
        config: &PipelineConfig,
        cause: &BuildCause,
        graph: &DependencyGraph,
    ) -> Result<(), ScheduleError> {
        if !config.is_config_origin_one_of_materials() || cause.is_forced() {
            return Ok(());
        }
        let upstream_proves_origin = cause.dependency_materials().any(|material| {
            material
                .as_dependency()
                .and_then(|dep| graph.config(&dep.pipeline))
                .map(|upstream| config.has_same_config_origin(upstream))
                .unwrap_or(false)
        });
        if upstream_proves_origin {
            return Ok(());
        }
        if let Err(err) = cause.assert_pipeline_config_and_material_revision_match(config) {
            error!(pipeline = %config.name, %err, "configuration and code revisions diverge");
            return Err(err.into());
        }
        Ok(())
    }

    fn has_material_drift(&self, config: &PipelineConfig, previous: &BuildCause) -> bool {
        let configured: HashSet<Fingerprint> = config.material_fingerprints().into_iter().collect();
        let previous_set: HashSet<Fingerprint> = previous
            .material_revisions()
            .iter()
            .map(|r| r.fingerprint())
            .collect();
        configured != previous_set
    }

    fn mark_dependency_changes(
        &self,
        mut revisions: Vec<MaterialRevision>,
        previous: &MaterialRevisions,
    ) -> Vec<MaterialRevision> {
        for revision in &mut revisions {
            let moved = previous
                .find_revision_for_fingerprint(&revision.fingerprint())
                .map(|prev| prev.revision() != revision.revision())
                .unwrap_or(true);
            if moved {
                revision.mark_as_changed();
            } else {
                revision.mark_as_not_changed();
            }
        }
        revisions
    }
}

/// Stitch SCM and dependency revisions back into material declaration
/// order.
fn assemble_in_declaration_order(
    config: &PipelineConfig,
    scm: Vec<MaterialRevision>,
    dependencies: Vec<MaterialRevision>,
) -> Result<MaterialRevisions, Error> {
    let mut by_fingerprint: HashMap<Fingerprint, MaterialRevision> = scm
        .into_iter()
        .chain(dependencies)
        .map(|r| (r.fingerprint(), r))
        .collect();

    let mut combined = MaterialRevisions::new();
    for material in &config.materials {
        let Some(revision) = by_fingerprint.remove(&material.fingerprint()) else {
            return Err(Error::Internal(format!(
                "no revision resolved for material '{}'",
                material.display_name()
            )));
        };
        combined.add(revision)?;
    }
    Ok(combined)
}
