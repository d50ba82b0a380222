//! Conveyor CD Core
//!
//! Material revision and build-cause resolution vocabulary for Conveyor.
//! This crate has minimal dependencies and defines the shared types used
//! by the scheduler and by every adapter that feeds it: materials, observed
//! modifications, resolved revisions, triggers, and the sealed `BuildCause`
//! attached to every pipeline run.

pub mod build_cause;
pub mod error;
pub mod ids;
pub mod material;
pub mod modification;
pub mod pipeline;
pub mod ports;
pub mod revision;
pub mod trigger;

pub use build_cause::BuildCause;
pub use error::{Error, Result};
pub use ids::{Fingerprint, PipelineName};
