//! Wave-based DAG execution for one stage's node set.
//!
//! Nodes with no unmet dependencies form a wave and execute concurrently;
//! the whole wave completes before any dependent is released into the next
//! one. The barrier keeps all dependency bookkeeping between waves, so the
//! shared counts are never mutated while nodes are in flight.

use crate::engine::client::NodeExecutor;
use crate::engine::resolver;
use crate::error::{EngineError, EngineResult};
use crate::types::{Node, Outputs};
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Outcome of one stage's execution.
#[derive(Debug)]
pub struct StageResults {
    /// Every node's normalized outputs, keyed by node id.
    pub all: HashMap<String, Outputs>,
    /// Outputs of nodes no sibling consumes, keyed by node id. These form
    /// the stage's contribution to the recipe result aggregate.
    pub terminal: Map<String, Value>,
}

/// Executes a DAG of nodes in dependency order, delegating each node's work
/// to the configured executor.
pub struct DagEngine {
    executor: Arc<dyn NodeExecutor>,
}

impl DagEngine {
    pub fn new(executor: Arc<dyn NodeExecutor>) -> Self {
        Self { executor }
    }

    pub async fn execute(&self, nodes: &[Node]) -> EngineResult<StageResults> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
        let mut node_by_id: HashMap<&str, &Node> = HashMap::new();

        for node in nodes {
            indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
            node_by_id.insert(node.id.as_str(), node);
        }

        // Pending-dependency counts and the reverse adjacency they imply.
        let mut pending: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for node in nodes {
            let deps = resolver::extract_dependencies(node)?;
            pending.insert(node.id.clone(), deps.len());

            for dep in deps {
                let Some(&dep_index) = indices.get(dep.as_str()) else {
                    return Err(EngineError::CycleOrUnresolvedDependency(format!(
                        "node '{}' references unknown node '{}'",
                        node.id, dep
                    )));
                };
                graph.add_edge(dep_index, indices[node.id.as_str()], ());
                dependents.entry(dep).or_default().push(node.id.clone());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(EngineError::CycleOrUnresolvedDependency(
                "stage contains a dependency cycle".to_string(),
            ));
        }

        let mut ready: Vec<String> = nodes
            .iter()
            .filter(|n| pending[&n.id] == 0)
            .map(|n| n.id.clone())
            .collect();

        let mut results: HashMap<String, Outputs> = HashMap::new();
        let mut executed = 0usize;

        while !ready.is_empty() {
            let wave = std::mem::take(&mut ready);
            debug!(?wave, "launching wave");

            let mut tasks: JoinSet<(String, EngineResult<Outputs>)> = JoinSet::new();
            for id in &wave {
                let node = node_by_id[id.as_str()];
                let resolved = resolver::resolve_inputs(node, &results)?;
                info!(node = %id, link = %node.link.href, "executing node");

                let executor = self.executor.clone();
                let node = node.clone();
                let id = id.clone();
                tasks.spawn(async move {
                    let outputs = executor.execute(&node, &resolved).await;
                    (id, outputs)
                });
            }

            // Synchronization barrier: every wave member finishes before any
            // dependent is released.
            while let Some(joined) = tasks.join_next().await {
                let (id, outputs) = joined?;
                let outputs = outputs?;
                results.insert(id.clone(), outputs);
                executed += 1;

                for dependent in dependents.get(&id).into_iter().flatten() {
                    if let Some(count) = pending.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(dependent.clone());
                        }
                    }
                }
            }
        }

        if executed != nodes.len() {
            return Err(EngineError::CycleOrUnresolvedDependency(format!(
                "executed {executed} of {} nodes",
                nodes.len()
            )));
        }

        let mut terminal = Map::new();
        for id in resolver::terminal_nodes(nodes)? {
            if let Some(outputs) = results.get(&id) {
                terminal.insert(id, Value::Object(outputs.clone()));
            }
        }

        Ok(StageResults { all: results, terminal })
    }
}
