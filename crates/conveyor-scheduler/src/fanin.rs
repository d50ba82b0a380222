//! Fan-in resolution of dependency materials.
//!
//! When a pipeline reaches the same upstream pipeline through more than
//! one dependency path (a diamond), the revisions chosen for its direct
//! dependencies must agree on every shared ancestor: picking A#7 and B#9
//! is only valid if both were built from the same instance of C. The
//! resolver searches the candidate instances of each direct dependency,
//! newest first, for the first assignment whose transitive pins are
//! mutually consistent.

use crate::dag::DependencyGraph;
use conveyor_core::ids::{Fingerprint, PipelineName};
use conveyor_core::material::MaterialConfig;
use conveyor_core::modification::{DependencyMaterialRevision, Revision};
use conveyor_core::ports::{PipelineHistory, UpstreamInstance};
use conveyor_core::revision::MaterialRevision;
use conveyor_core::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// How many recent instances of each upstream pipeline are considered.
pub const DEFAULT_CANDIDATE_WINDOW: usize = 10;

/// The counters pinned by choosing one upstream instance: the instance
/// itself plus every upstream pipeline reachable through its sealed cause.
type PinMap = HashMap<PipelineName, u32>;

pub struct FanInResolver<'a> {
    graph: &'a DependencyGraph,
    history: &'a dyn PipelineHistory,
    candidate_window: usize,
}

impl<'a> FanInResolver<'a> {
    pub fn new(graph: &'a DependencyGraph, history: &'a dyn PipelineHistory) -> Self {
        Self {
            graph,
            history,
            candidate_window: DEFAULT_CANDIDATE_WINDOW,
        }
    }

    pub fn with_candidate_window(mut self, window: usize) -> Self {
        self.candidate_window = window.max(1);
        self
    }

    /// Pick one upstream instance per direct dependency material of the
    /// root pipeline such that all transitive pins agree, and flatten the
    /// choice into one [`MaterialRevision`] per dependency material, in
    /// declaration order.
    ///
    /// `pegged` pins specific instances (manual trigger with explicit
    /// revisions), keyed by material fingerprint.
    pub async fn resolve(
        &self,
        pegged: &HashMap<Fingerprint, Revision>,
    ) -> Result<Vec<MaterialRevision>> {
        let root = self.graph.root_config();
        let dependencies: Vec<MaterialConfig> = root
            .dependency_materials()
            .map(|(material, _)| material.clone())
            .collect();
        if dependencies.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidate_lists: Vec<Vec<(UpstreamInstance, PinMap)>> = Vec::new();
        for material in &dependencies {
            let candidates = self.candidates_for(material, pegged).await?;
            let mut with_pins = Vec::with_capacity(candidates.len());
            for instance in candidates {
                let pins = self.pin_map(&instance).await?;
                with_pins.push((instance, pins));
            }
            candidate_lists.push(with_pins);
        }

        let chosen = search_compatible_assignment(&candidate_lists)?;
        debug!(
            pipeline = %root.name,
            "fan-in resolved {} dependency materials",
            dependencies.len()
        );

        let mut resolved = Vec::with_capacity(dependencies.len());
        for (material, list_index) in dependencies.into_iter().zip(chosen) {
            let (instance, _) = &candidate_lists[list_index.0][list_index.1];
            let modification = instance
                .dependency_revision()
                .into_modification(instance.completed_at);
            resolved.push(MaterialRevision::new(material, vec![modification])?);
        }
        Ok(resolved)
    }

    async fn candidates_for(
        &self,
        material: &MaterialConfig,
        pegged: &HashMap<Fingerprint, Revision>,
    ) -> Result<Vec<UpstreamInstance>> {
        let dep = material
            .as_dependency()
            .ok_or_else(|| Error::Internal("fan-in over a non-dependency material".to_string()))?;

        if let Some(revision) = pegged.get(&material.fingerprint()) {
            let pinned = DependencyMaterialRevision::parse(revision.as_str())?;
            let instance = self
                .history
                .instance(&pinned.pipeline_name, pinned.pipeline_counter, &pinned.stage_name)
                .await?
                .ok_or_else(|| Error::IncompatibleRevisions {
                    pipeline: pinned.pipeline_name.to_string(),
                    reason: format!("pinned instance {} has not completed", revision),
                })?;
            return Ok(vec![instance]);
        }

        let candidates = self
            .history
            .recent_instances(&dep.pipeline, &dep.stage, self.candidate_window)
            .await?;
        if candidates.is_empty() {
            return Err(Error::NoModifications(format!(
                "upstream pipeline '{}' has no completed instances of stage '{}'",
                dep.pipeline, dep.stage
            )));
        }
        Ok(candidates)
    }

    /// Every counter transitively pinned by one upstream instance,
    /// bottom-up through the sealed causes recorded in history. A sealed
    /// cause that pins two counters of one pipeline is itself
    /// inconsistent and reported as such.
    async fn pin_map(&self, instance: &UpstreamInstance) -> Result<PinMap> {
        let mut pins = PinMap::new();
        pins.insert(instance.pipeline.clone(), instance.counter);

        let mut pending = vec![instance.cause.clone()];
        while let Some(cause) = pending.pop() {
            for revision in cause.material_revisions().iter() {
                if !revision.material.is_dependency() {
                    continue;
                }
                let dep = DependencyMaterialRevision::parse(revision.revision().as_str())?;
                match pins.get(&dep.pipeline_name) {
                    Some(&counter) if counter != dep.pipeline_counter => {
                        return Err(Error::IncompatibleRevisions {
                            pipeline: dep.pipeline_name.to_string(),
                            reason: format!(
                                "upstream history pins both #{} and #{}",
                                counter, dep.pipeline_counter
                            ),
                        });
                    }
                    Some(_) => continue,
                    None => {
                        pins.insert(dep.pipeline_name.clone(), dep.pipeline_counter);
                        if let Some(upstream) = self
                            .history
                            .instance(&dep.pipeline_name, dep.pipeline_counter, &dep.stage_name)
                            .await?
                        {
                            pending.push(upstream.cause);
                        }
                    }
                }
            }
        }
        Ok(pins)
    }
}

/// Index of a chosen candidate: (dependency list, candidate position).
#[derive(Debug, Clone, Copy)]
struct Chosen(usize, usize);

/// Depth-first search over the candidate lists, newest first, for the
/// first assignment whose pin maps agree everywhere. Because candidates
/// are ordered newest first and lists are searched in declaration order,
/// the first hit is the most recent mutually-compatible assignment.
fn search_compatible_assignment(
    candidate_lists: &[Vec<(UpstreamInstance, PinMap)>],
) -> Result<Vec<Chosen>> {
    let mut chosen: Vec<Chosen> = Vec::with_capacity(candidate_lists.len());
    let mut conflict: Option<PipelineName> = None;

    fn descend(
        lists: &[Vec<(UpstreamInstance, PinMap)>],
        depth: usize,
        merged: &PinMap,
        chosen: &mut Vec<Chosen>,
        conflict: &mut Option<PipelineName>,
    ) -> bool {
        if depth == lists.len() {
            return true;
        }
        for (position, (_, pins)) in lists[depth].iter().enumerate() {
            match merge_pins(merged, pins) {
                Ok(next) => {
                    chosen.push(Chosen(depth, position));
                    if descend(lists, depth + 1, &next, chosen, conflict) {
                        return true;
                    }
                    chosen.pop();
                }
                Err(pipeline) => *conflict = Some(pipeline),
            }
        }
        false
    }

    if descend(
        candidate_lists,
        0,
        &PinMap::new(),
        &mut chosen,
        &mut conflict,
    ) {
        return Ok(chosen);
    }

    let pipeline = conflict
        .map(|p| p.to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    Err(Error::IncompatibleRevisions {
        pipeline,
        reason: "no mutually-compatible set of upstream instances exists within the \
                 considered history window"
            .to_string(),
    })
}

/// Merge two pin maps; the name of the first disagreeing pipeline is the
/// error value.
fn merge_pins(base: &PinMap, additional: &PinMap) -> std::result::Result<PinMap, PipelineName> {
    let mut merged = base.clone();
    for (pipeline, &counter) in additional {
        match merged.get(pipeline) {
            Some(&existing) if existing != counter => return Err(pipeline.clone()),
            Some(_) => {}
            None => {
                merged.insert(pipeline.clone(), counter);
            }
        }
    }
    Ok(merged)
}
