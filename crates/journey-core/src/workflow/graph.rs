//! Node graph analysis: trigger reachability and loop detection.
//!
//! Uses `petgraph` to model the workflow's edges as a directed graph. Loops
//! are legal only when they pass through a wait node, so loop detection runs
//! a topological sort over the graph with wait nodes' outgoing edges removed.

use std::collections::HashMap;

use journey_types::workflow::{NodeConfig, Workflow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::definition::WorkflowError;

/// A workflow's node graph, indexed by node ID.
pub struct WorkflowGraph<'a> {
    workflow: &'a Workflow,
    graph: DiGraph<&'a str, &'a str>,
    id_to_idx: HashMap<&'a str, NodeIndex>,
}

impl<'a> WorkflowGraph<'a> {
    /// Build the graph. Fails if an edge references an unknown node.
    pub fn build(workflow: &'a Workflow) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::<&str, &str>::new();
        let id_to_idx: HashMap<&str, NodeIndex> = workflow
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
            .collect();

        for edge in &workflow.edges {
            let from = id_to_idx.get(edge.source_node_id.as_str()).ok_or_else(|| {
                WorkflowError::UnknownNode(format!("edge source '{}'", edge.source_node_id))
            })?;
            let to = id_to_idx.get(edge.target_node_id.as_str()).ok_or_else(|| {
                WorkflowError::UnknownNode(format!("edge target '{}'", edge.target_node_id))
            })?;
            graph.add_edge(*from, *to, edge.source_port.as_str());
        }

        Ok(Self {
            workflow,
            graph,
            id_to_idx,
        })
    }

    /// Node IDs reachable from `start`, including `start` itself.
    pub fn reachable_from(&self, start: &str) -> Vec<&'a str> {
        let Some(&idx) = self.id_to_idx.get(start) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, idx);
        let mut reached = Vec::new();
        while let Some(next) = dfs.next(&self.graph) {
            reached.push(self.graph[next]);
        }
        reached
    }

    /// Every non-trigger node must be reachable from exactly one trigger.
    pub fn check_single_trigger_reachability(&self) -> Result<(), WorkflowError> {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for trigger in self.workflow.trigger_ids() {
            for node_id in self.reachable_from(trigger) {
                if node_id == trigger {
                    continue;
                }
                if let Some(previous) = owners.insert(node_id, trigger) {
                    if previous != trigger {
                        return Err(WorkflowError::ValidationError(format!(
                            "node '{node_id}' is reachable from more than one trigger ('{previous}', '{trigger}')"
                        )));
                    }
                }
            }
        }

        for node in &self.workflow.nodes {
            if matches!(node.config, NodeConfig::Trigger) {
                continue;
            }
            if !owners.contains_key(node.id.as_str()) {
                return Err(WorkflowError::ValidationError(format!(
                    "node '{}' is not reachable from any trigger",
                    node.id
                )));
            }
        }
        Ok(())
    }

    /// Reject loops that never pass through a wait node; such a loop would
    /// spin inside a single engine invocation.
    pub fn check_loops_wait(&self) -> Result<(), WorkflowError> {
        let mut pruned = self.graph.clone();
        pruned.retain_edges(|g, e| {
            let Some((source, _)) = g.edge_endpoints(e) else {
                return true;
            };
            !self
                .workflow
                .node(g[source])
                .is_some_and(|n| matches!(n.config, NodeConfig::Wait(_)))
        });

        toposort(&pruned, None).map(|_| ()).map_err(|cycle| {
            WorkflowError::CycleDetected(format!(
                "loop through node '{}' has no wait node",
                pruned[cycle.node_id()]
            ))
        })
    }
}
