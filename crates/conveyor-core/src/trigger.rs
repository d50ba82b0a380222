//! Build triggers and their precedence.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason a pipeline run was requested.
///
/// Each variant has a canonical persisted string form which is a de facto
/// on-disk format: historical runs are rehydrated from it, so the literals
/// must stay byte-stable across versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildTrigger {
    /// Sentinel for a pipeline that has no history. Never trumps anything.
    NeverRun,
    /// Requested by an external source (timer, remote API).
    External,
    /// Driven by polled modifications on the pipeline's materials.
    Modifications { message: String },
    /// Manually forced by a user. Always wins.
    Forced { message: String, approver: String },
}

pub const FORCED_BUILD_CAUSE: &str = "FORCED_BUILD_CAUSE";
pub const MODIFICATION_BUILD_CAUSE: &str = "MODIFICATION_BUILD_CAUSE";
pub const EXTERNAL_BUILD_CAUSE: &str = "EXTERNAL_BUILD_CAUSE";
pub const NEVER_RUN_BUILD_CAUSE: &str = "NEVER_RUN_BUILD_CAUSE";

impl BuildTrigger {
    pub fn forced(approver: impl Into<String>) -> Self {
        let approver = approver.into();
        BuildTrigger::Forced {
            message: format!("Forced by {}", approver),
            approver,
        }
    }

    pub fn modifications(message: impl Into<String>) -> Self {
        BuildTrigger::Modifications {
            message: message.into(),
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, BuildTrigger::Forced { .. })
    }

    pub fn is_never_run(&self) -> bool {
        matches!(self, BuildTrigger::NeverRun)
    }

    pub fn same_kind(&self, other: &BuildTrigger) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn message(&self) -> &str {
        match self {
            BuildTrigger::NeverRun => "Never run",
            BuildTrigger::External => "Triggered by external source",
            BuildTrigger::Modifications { message } => message,
            BuildTrigger::Forced { message, .. } => message,
        }
    }

    /// Whether this trigger beats `other` on trigger kind alone.
    ///
    /// Forced beats every non-Forced trigger; every trigger beats the
    /// NeverRun sentinel. Modifications and External do not beat each
    /// other here: the caller decides by comparing the latest modification
    /// timestamps of the competing causes.
    pub fn trumps(&self, other: &BuildTrigger) -> bool {
        if self.is_forced() {
            return !other.is_forced();
        }
        !self.is_never_run() && other.is_never_run()
    }

    /// The canonical persisted form.
    pub fn to_db_string(&self) -> &'static str {
        match self {
            BuildTrigger::NeverRun => NEVER_RUN_BUILD_CAUSE,
            BuildTrigger::External => EXTERNAL_BUILD_CAUSE,
            BuildTrigger::Modifications { .. } => MODIFICATION_BUILD_CAUSE,
            BuildTrigger::Forced { .. } => FORCED_BUILD_CAUSE,
        }
    }

    /// Rehydrate from the persisted form. Only the trigger kind survives
    /// the round trip; message and approver are defaulted, which is lossy
    /// by design for legacy strings.
    pub fn from_db_string(text: &str) -> Result<Self> {
        match text {
            FORCED_BUILD_CAUSE => Ok(BuildTrigger::Forced {
                message: "Forced".to_string(),
                approver: String::new(),
            }),
            MODIFICATION_BUILD_CAUSE => Ok(BuildTrigger::Modifications {
                message: "modified by unknown".to_string(),
            }),
            EXTERNAL_BUILD_CAUSE => Ok(BuildTrigger::External),
            NEVER_RUN_BUILD_CAUSE => Ok(BuildTrigger::NeverRun),
            other => Err(Error::MalformedBuildCauseString(other.to_string())),
        }
    }
}

impl fmt::Display for BuildTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_trumps_every_non_forced_trigger() {
        let forced = BuildTrigger::forced("bob");
        assert!(forced.trumps(&BuildTrigger::NeverRun));
        assert!(forced.trumps(&BuildTrigger::External));
        assert!(forced.trumps(&BuildTrigger::modifications("m")));
        assert!(!forced.trumps(&BuildTrigger::forced("alice")));
    }

    #[test]
    fn test_everything_trumps_never_run() {
        for candidate in [
            BuildTrigger::forced("bob"),
            BuildTrigger::External,
            BuildTrigger::modifications("m"),
        ] {
            assert!(candidate.trumps(&BuildTrigger::NeverRun));
        }
        assert!(!BuildTrigger::NeverRun.trumps(&BuildTrigger::NeverRun));
    }

    #[test]
    fn test_never_run_never_trumps() {
        for incumbent in [
            BuildTrigger::forced("bob"),
            BuildTrigger::External,
            BuildTrigger::modifications("m"),
        ] {
            assert!(!BuildTrigger::NeverRun.trumps(&incumbent));
        }
    }

    #[test]
    fn test_modifications_and_external_do_not_trump_by_kind() {
        let modifications = BuildTrigger::modifications("m");
        assert!(!modifications.trumps(&BuildTrigger::External));
        assert!(!BuildTrigger::External.trumps(&modifications));
    }

    #[test]
    fn test_db_string_literals_are_stable() {
        assert_eq!(BuildTrigger::forced("bob").to_db_string(), "FORCED_BUILD_CAUSE");
        assert_eq!(
            BuildTrigger::modifications("m").to_db_string(),
            "MODIFICATION_BUILD_CAUSE"
        );
        assert_eq!(BuildTrigger::External.to_db_string(), "EXTERNAL_BUILD_CAUSE");
        assert_eq!(BuildTrigger::NeverRun.to_db_string(), "NEVER_RUN_BUILD_CAUSE");
    }

    #[test]
    fn test_db_string_roundtrip_preserves_kind() {
        for trigger in [
            BuildTrigger::forced("bob"),
            BuildTrigger::modifications("m"),
            BuildTrigger::External,
            BuildTrigger::NeverRun,
        ] {
            let rehydrated = BuildTrigger::from_db_string(trigger.to_db_string()).unwrap();
            assert!(rehydrated.same_kind(&trigger));
        }
    }

    #[test]
    fn test_unknown_db_string_is_rejected() {
        assert!(BuildTrigger::from_db_string("SOMETHING_ELSE").is_err());
    }

    #[test]
    fn test_forced_message_names_the_approver() {
        let trigger = BuildTrigger::forced("bob");
        assert_eq!(trigger.message(), "Forced by bob");
    }
}
