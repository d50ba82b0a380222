//! End-to-end build-cause production against in-memory ports.

mod support;

use conveyor_core::build_cause::{BuildCause, DEFAULT_APPROVER, EXTERNAL_APPROVER};
use conveyor_core::ids::PipelineName;
use conveyor_core::pipeline::{ConfigOrigin, PipelineConfig, ScheduleOptions, TimerConfig};
use conveyor_core::revision::{MaterialRevision, MaterialRevisions};
use conveyor_core::Error;
use conveyor_scheduler::{BuildCauseProducer, ScheduleError, ScheduleOutcome, SkipReason};
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{
    depends_on, git, modification, sealed_instance, InMemoryHistory, InMemoryQueue,
    ScriptedPoller, StaticConfigs,
};

fn revisions_at(material: &conveyor_core::material::MaterialConfig, rev: &str) -> MaterialRevisions {
    let mut revisions = MaterialRevisions::new();
    revisions
        .add(MaterialRevision::new(material.clone(), vec![modification(rev, 2)]).unwrap())
        .unwrap();
    revisions
}

fn producer(
    configs: StaticConfigs,
    history: InMemoryHistory,
    queue: Arc<InMemoryQueue>,
    poller: ScriptedPoller,
) -> BuildCauseProducer {
    BuildCauseProducer::new(
        Arc::new(configs),
        Arc::new(history),
        queue,
        Arc::new(poller),
    )
}

#[tokio::test]
async fn test_first_run_schedules_from_the_latest_revision() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let queue = Arc::new(InMemoryQueue::new());
    let poller = ScriptedPoller::new()
        .with_history(&material, vec![modification("r2", 1), modification("r1", 2)]);
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue.clone(),
        poller,
    );

    let outcome = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled(cause) = outcome else {
        panic!("expected a scheduled cause");
    };
    assert_eq!(cause.approver(), DEFAULT_APPROVER);
    assert_eq!(
        cause.material_revisions().iter().next().unwrap().revision().as_str(),
        "r2"
    );
    assert!(queue.pending_for("app").is_some());
}

#[tokio::test]
async fn test_auto_does_not_schedule_when_nothing_moved() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let pending =
        BuildCause::create_with_modifications(revisions_at(&material, "r2"), DEFAULT_APPROVER)
            .unwrap();
    let queue = Arc::new(InMemoryQueue::new().with_pending("app", pending));
    let poller = ScriptedPoller::new()
        .with_history(&material, vec![modification("r2", 1), modification("r1", 2)]);
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let outcome = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ScheduleOutcome::NotScheduled(SkipReason::NoModifications)
    ));
}

#[tokio::test]
async fn test_auto_replaces_the_pending_cause_when_a_newer_revision_appears() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let pending =
        BuildCause::create_with_modifications(revisions_at(&material, "r2"), DEFAULT_APPROVER)
            .unwrap();
    let queue = Arc::new(InMemoryQueue::new().with_pending("app", pending));
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1), modification("r1", 2)],
    );
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue.clone(),
        poller,
    );

    let outcome = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Scheduled(_)));
    let scheduled = queue.pending_for("app").unwrap();
    assert_eq!(
        scheduled.material_revisions().iter().next().unwrap().revision().as_str(),
        "r3"
    );
}

#[tokio::test]
async fn test_auto_does_not_displace_a_pending_forced_cause() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let pending =
        BuildCause::create_manual_forced(revisions_at(&material, "r2"), "bob").unwrap();
    let queue = Arc::new(InMemoryQueue::new().with_pending("app", pending));
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1)],
    );
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let outcome = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ScheduleOutcome::NotScheduled(SkipReason::DoesNotTrumpPending)
    ));
}

#[tokio::test]
async fn test_manual_schedule_forces_a_run_without_new_modifications() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let pending =
        BuildCause::create_with_modifications(revisions_at(&material, "r2"), DEFAULT_APPROVER)
            .unwrap();
    let queue = Arc::new(InMemoryQueue::new().with_pending("app", pending));
    let poller = ScriptedPoller::new()
        .with_history(&material, vec![modification("r2", 1), modification("r1", 2)]);
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let outcome = producer
        .manual_schedule(&PipelineName::new("app"), "bob", ScheduleOptions::new())
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled(cause) = outcome else {
        panic!("expected a scheduled cause");
    };
    assert!(cause.is_forced());
    assert_eq!(cause.approver(), "bob");
    assert_eq!(cause.message(), "Forced by bob");
}

#[tokio::test]
async fn test_manual_schedule_honors_pegged_revisions_and_variables() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let queue = Arc::new(InMemoryQueue::new());
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1), modification("r1", 2)],
    );
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let options = ScheduleOptions::new()
        .with_specified_revision(material.fingerprint(), "r2")
        .with_variable("ENV", "staging");
    let outcome = producer
        .manual_schedule(&PipelineName::new("app"), "bob", options)
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled(cause) = outcome else {
        panic!("expected a scheduled cause");
    };
    assert_eq!(
        cause.material_revisions().iter().next().unwrap().revision().as_str(),
        "r2"
    );
    assert_eq!(
        cause.variables(),
        &[("ENV".to_string(), "staging".to_string())]
    );
}

#[tokio::test]
async fn test_manual_schedule_can_rerun_without_repolling() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()]);
    let pending =
        BuildCause::create_with_modifications(revisions_at(&material, "r2"), DEFAULT_APPROVER)
            .unwrap();
    let queue = Arc::new(InMemoryQueue::new().with_pending("app", pending));
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1)],
    );
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let mut options = ScheduleOptions::new();
    options.update_materials_before_scheduling = false;
    let outcome = producer
        .manual_schedule(&PipelineName::new("app"), "bob", options)
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled(cause) = outcome else {
        panic!("expected a scheduled cause");
    };
    assert!(cause.is_forced());
    assert_eq!(
        cause.material_revisions().iter().next().unwrap().revision().as_str(),
        "r2"
    );
}

#[tokio::test]
async fn test_timer_with_only_on_changes_skips_an_already_built_revision() {
    let material = git("https://example.com/app.git");
    let mut config = PipelineConfig::new("app", vec![material.clone()]);
    config.timer = Some(TimerConfig {
        spec: "0 0 * * *".to_string(),
        only_on_changes: true,
    });
    let pending =
        BuildCause::create_with_modifications(revisions_at(&material, "r2"), DEFAULT_APPROVER)
            .unwrap();
    let queue = Arc::new(InMemoryQueue::new().with_pending("app", pending));
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1)],
    );
    let history =
        InMemoryHistory::new().with_completed_run("app", revisions_at(&material, "r3"));
    let producer = producer(StaticConfigs::new(vec![config]), history, queue, poller);

    let outcome = producer
        .timer_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ScheduleOutcome::NotScheduled(SkipReason::AlreadyRunWithLatest)
    ));
}

#[tokio::test]
async fn test_timer_first_run_is_attributed_to_the_timer() {
    let material = git("https://example.com/app.git");
    let mut config = PipelineConfig::new("app", vec![material.clone()]);
    config.timer = Some(TimerConfig {
        spec: "0 0 * * *".to_string(),
        only_on_changes: false,
    });
    let queue = Arc::new(InMemoryQueue::new());
    let poller =
        ScriptedPoller::new().with_history(&material, vec![modification("r1", 1)]);
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let outcome = producer
        .timer_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled(cause) = outcome else {
        panic!("expected a scheduled cause");
    };
    assert_eq!(cause.approver(), EXTERNAL_APPROVER);
}

#[tokio::test]
async fn test_divergent_config_origin_revision_aborts_the_attempt() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()])
        .with_origin(ConfigOrigin::repo(material.clone(), "r2"));
    let queue = Arc::new(InMemoryQueue::new());
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1)],
    );
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let err = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::Core(Error::BuildCauseOutOfDate(_))
    ));
}

#[tokio::test]
async fn test_upstream_with_same_config_origin_bypasses_the_guard() {
    let config_repo = git("https://example.com/config.git");
    let upstream = PipelineConfig::new("lib", vec![git("https://example.com/lib.git")])
        .with_origin(ConfigOrigin::repo(config_repo.clone(), "cfg-r1"));
    let config = PipelineConfig::new(
        "app",
        vec![config_repo.clone(), depends_on("lib", "dist")],
    )
    .with_origin(ConfigOrigin::repo(config_repo.clone(), "cfg-r1"));

    let queue = Arc::new(InMemoryQueue::new());
    let poller = ScriptedPoller::new().with_history(
        &config_repo,
        vec![modification("cfg-r2", 0), modification("cfg-r1", 1)],
    );
    let history =
        InMemoryHistory::new().with_instance(sealed_instance("lib", 3, "dist", Utc::now(), &[]));
    let producer = producer(
        StaticConfigs::new(vec![config, upstream]),
        history,
        queue,
        poller,
    );

    // The cause would run the origin repo at cfg-r2 while the definition
    // was parsed at cfg-r1, but the upstream run already proved the
    // shared origin revision.
    let outcome = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap();
    let ScheduleOutcome::Scheduled(cause) = outcome else {
        panic!("expected a scheduled cause");
    };
    assert_eq!(
        cause.material_revisions().iter().next().unwrap().revision().as_str(),
        "cfg-r2"
    );
}

#[tokio::test]
async fn test_upstream_with_different_config_origin_does_not_bypass_the_guard() {
    let config_repo = git("https://example.com/config.git");
    let upstream = PipelineConfig::new("lib", vec![git("https://example.com/lib.git")]);
    let config = PipelineConfig::new(
        "app",
        vec![config_repo.clone(), depends_on("lib", "dist")],
    )
    .with_origin(ConfigOrigin::repo(config_repo.clone(), "cfg-r1"));

    let queue = Arc::new(InMemoryQueue::new());
    let poller = ScriptedPoller::new().with_history(
        &config_repo,
        vec![modification("cfg-r2", 0), modification("cfg-r1", 1)],
    );
    let history =
        InMemoryHistory::new().with_instance(sealed_instance("lib", 3, "dist", Utc::now(), &[]));
    let producer = producer(
        StaticConfigs::new(vec![config, upstream]),
        history,
        queue,
        poller,
    );

    let err = producer
        .auto_schedule(&PipelineName::new("app"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::Core(Error::BuildCauseOutOfDate(_))
    ));
}

#[tokio::test]
async fn test_forced_run_bypasses_the_config_origin_guard() {
    let material = git("https://example.com/app.git");
    let config = PipelineConfig::new("app", vec![material.clone()])
        .with_origin(ConfigOrigin::repo(material.clone(), "r2"));
    let queue = Arc::new(InMemoryQueue::new());
    let poller = ScriptedPoller::new().with_history(
        &material,
        vec![modification("r3", 0), modification("r2", 1)],
    );
    let producer = producer(
        StaticConfigs::new(vec![config]),
        InMemoryHistory::new(),
        queue,
        poller,
    );

    let outcome = producer
        .manual_schedule(&PipelineName::new("app"), "bob", ScheduleOptions::new())
        .await
        .unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Scheduled(_)));
}

#[tokio::test]
async fn test_unknown_pipeline_is_an_error() {
    let queue = Arc::new(InMemoryQueue::new());
    let producer = producer(
        StaticConfigs::new(vec![]),
        InMemoryHistory::new(),
        queue,
        ScriptedPoller::new(),
    );

    let err = producer
        .auto_schedule(&PipelineName::new("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::PipelineNotFound(_)));
}
