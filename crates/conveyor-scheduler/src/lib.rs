//! Conveyor CD Scheduler
//!
//! Turns polled modifications into sealed build causes: upstream
//! dependency graph construction, fan-in resolution of shared upstream
//! pipelines, material change detection, and the production loop that
//! decides whether a candidate cause replaces the pending one.

pub mod checker;
pub mod dag;
pub mod fanin;
pub mod producer;

pub use checker::MaterialChecker;
pub use dag::DependencyGraph;
pub use fanin::FanInResolver;
pub use producer::{BuildCauseProducer, BuildType, ScheduleError, ScheduleOutcome, SkipReason};
