//! Error types for Conveyor CD.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration-time fatal errors
    #[error("Cyclic dependency detected involving pipeline: {0}")]
    DependencyCycle(String),

    #[error("Malformed dependency revision '{0}': expected pipeline/counter/stage/stage-counter")]
    MalformedDependencyRevision(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    // Material errors
    #[error("Polling material '{material}' failed: {reason}")]
    MaterialPoll { material: String, reason: String },

    #[error("Duplicate material fingerprint: {0}")]
    DuplicateMaterial(String),

    #[error("Material revision for '{0}' must carry at least one modification")]
    EmptyMaterialRevision(String),

    // Scheduling-time conditions
    #[error("Build cause is out of date: {0}")]
    BuildCauseOutOfDate(String),

    #[error("No compatible revisions of upstream pipeline '{pipeline}' found: {reason}")]
    IncompatibleRevisions { pipeline: String, reason: String },

    #[error("Pegged revision '{revision}' not found in the history of material '{material}'")]
    PeggedRevisionNotFound { material: String, revision: String },

    #[error("Cannot create a build cause without modifications for pipeline: {0}")]
    NoModifications(String),

    // Persistence format errors
    #[error("Unrecognized build cause string: {0}")]
    MalformedBuildCauseString(String),

    // Infrastructure (behind ports)
    #[error("Pipeline history error: {0}")]
    History(String),

    #[error("Schedule queue error: {0}")]
    ScheduleQueue(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
