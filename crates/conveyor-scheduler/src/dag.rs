//! Upstream dependency graph over pipeline configurations.
//!
//! Built once per scheduling attempt, before any polling I/O. Nodes are
//! pipeline configs, edges point from an upstream pipeline to the
//! pipeline that depends on it. Cycles (including self-references) are a
//! configuration error and are rejected here, never at resolution time.

use conveyor_core::ids::PipelineName;
use conveyor_core::pipeline::PipelineConfig;
use conveyor_core::ports::PipelineConfigSource;
use conveyor_core::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<PipelineConfig, ()>,
    name_to_index: HashMap<PipelineName, NodeIndex>,
    root: NodeIndex,
}

impl DependencyGraph {
    /// Walk upstream from `root`, loading every transitively referenced
    /// pipeline config, and verify acyclicity.
    pub async fn build(
        root: PipelineConfig,
        configs: &dyn PipelineConfigSource,
    ) -> Result<DependencyGraph> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        let root_name = root.name.clone();
        let root_index = graph.add_node(root);
        name_to_index.insert(root_name.clone(), root_index);

        let mut pending = vec![root_index];
        while let Some(index) = pending.pop() {
            let upstreams: Vec<PipelineName> = graph[index]
                .dependency_materials()
                .map(|(_, dep)| dep.pipeline.clone())
                .collect();

            for upstream in upstreams {
                let upstream_index = match name_to_index.get(&upstream) {
                    Some(&existing) => existing,
                    None => {
                        let config = configs
                            .pipeline_config(&upstream)
                            .await?
                            .ok_or_else(|| Error::PipelineNotFound(upstream.to_string()))?;
                        let new_index = graph.add_node(config);
                        name_to_index.insert(upstream.clone(), new_index);
                        pending.push(new_index);
                        new_index
                    }
                };
                graph.update_edge(upstream_index, index, ());
            }
        }

        let dag = DependencyGraph {
            graph,
            name_to_index,
            root: root_index,
        };
        dag.assert_acyclic()?;
        Ok(dag)
    }

    fn assert_acyclic(&self) -> Result<()> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| {
                let name = self.graph[cycle.node_id()].name.to_string();
                Error::DependencyCycle(name)
            })
    }

    pub fn root_config(&self) -> &PipelineConfig {
        &self.graph[self.root]
    }

    pub fn config(&self, name: &PipelineName) -> Option<&PipelineConfig> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// All pipelines in the graph other than the root.
    pub fn upstream_pipelines(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.graph
            .node_indices()
            .filter(move |&idx| idx != self.root)
            .map(|idx| &self.graph[idx])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
