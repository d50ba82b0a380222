//! Material change detection.
//!
//! Polls a pipeline's SCM materials and turns the results into
//! [`MaterialRevision`]s. Polling of distinct materials is independent
//! I/O and runs concurrently; nothing downstream starts until every poll
//! for the pipeline has completed.

use conveyor_core::ids::Fingerprint;
use conveyor_core::material::MaterialConfig;
use conveyor_core::modification::{Modification, Revision};
use conveyor_core::ports::MaterialPoller;
use conveyor_core::revision::{MaterialRevision, MaterialRevisions};
use conveyor_core::{Error, Result};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct MaterialChecker {
    poller: Arc<dyn MaterialPoller>,
}

impl MaterialChecker {
    pub fn new(poller: Arc<dyn MaterialPoller>) -> Self {
        Self { poller }
    }

    /// Latest revision of every given material, all marked changed. Used
    /// for a pipeline's first run and after its material set drifted.
    pub async fn find_latest_revisions(
        &self,
        materials: &[MaterialConfig],
        pegged: &HashMap<Fingerprint, Revision>,
    ) -> Result<Vec<MaterialRevision>> {
        let polls = materials.iter().map(|material| async move {
            let modifications = self.poller.latest_modification(material).await?;
            let modifications = slice_at_pegged(material, modifications, pegged)?;
            if modifications.is_empty() {
                return Err(Error::NoModifications(format!(
                    "material '{}' has no history",
                    material.display_name()
                )));
            }
            MaterialRevision::changed(material.clone(), modifications)
        });
        try_join_all(polls).await
    }

    /// Everything new per material since the previous run. Materials with
    /// no new modifications carry the previous head forward, marked
    /// unchanged.
    pub async fn find_revisions_since(
        &self,
        materials: &[MaterialConfig],
        previous: &MaterialRevisions,
        pegged: &HashMap<Fingerprint, Revision>,
    ) -> Result<Vec<MaterialRevision>> {
        let polls = materials.iter().map(|material| async move {
            let fingerprint = material.fingerprint();
            let Some(previous_revision) = previous.find_revision_for_fingerprint(&fingerprint)
            else {
                // Material added to the configuration since the last run.
                let modifications = self.poller.latest_modification(material).await?;
                let modifications = slice_at_pegged(material, modifications, pegged)?;
                if modifications.is_empty() {
                    return Err(Error::NoModifications(format!(
                        "material '{}' has no history",
                        material.display_name()
                    )));
                }
                return MaterialRevision::changed(material.clone(), modifications);
            };

            let since = previous_revision.revision().clone();
            let modifications = self.poller.modifications_since(material, &since).await?;
            let modifications = slice_at_pegged_since(material, modifications, &since, pegged)?;
            if modifications.is_empty() {
                debug!(material = %material.display_name(), "no new modifications");
                let mut carried = MaterialRevision::new(
                    material.clone(),
                    vec![previous_revision.latest_modification().clone()],
                )?;
                carried.mark_as_not_changed();
                Ok(carried)
            } else {
                MaterialRevision::changed(material.clone(), modifications)
            }
        });
        try_join_all(polls).await
    }
}

/// Honor a pegged revision by pretending the poll stopped there: drop
/// everything newer than the pegged revision. A pegged revision outside
/// the polled window is an explicit error, never silently ignored.
fn slice_at_pegged(
    material: &MaterialConfig,
    modifications: Vec<Modification>,
    pegged: &HashMap<Fingerprint, Revision>,
) -> Result<Vec<Modification>> {
    let Some(revision) = pegged.get(&material.fingerprint()) else {
        return Ok(modifications);
    };
    match modifications.iter().position(|m| &m.revision == revision) {
        Some(position) => Ok(modifications[position..].to_vec()),
        None => Err(Error::PeggedRevisionNotFound {
            material: material.display_name(),
            revision: revision.to_string(),
        }),
    }
}

/// Pegging against an incremental poll: a peg equal to the previous
/// revision means "nothing new", and is valid even though the previous
/// revision is not part of the new-modification list.
fn slice_at_pegged_since(
    material: &MaterialConfig,
    modifications: Vec<Modification>,
    previous: &Revision,
    pegged: &HashMap<Fingerprint, Revision>,
) -> Result<Vec<Modification>> {
    let Some(revision) = pegged.get(&material.fingerprint()) else {
        return Ok(modifications);
    };
    if revision == previous {
        return Ok(Vec::new());
    }
    match modifications.iter().position(|m| &m.revision == revision) {
        Some(position) => Ok(modifications[position..].to_vec()),
        None => Err(Error::PeggedRevisionNotFound {
            material: material.display_name(),
            revision: revision.to_string(),
        }),
    }
}
