//! Recipe-level sequencing: variable substitution, then one DAG execution
//! per stage in declaration order.

use crate::engine::dag::DagEngine;
use crate::error::{EngineError, EngineResult};
use crate::types::{Node, Recipe};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Runs a full recipe. Substitution happens exactly once, recipe-wide,
/// before any remote execution begins; a missing binding therefore aborts
/// the run with no side effects. Stages never overlap.
pub struct RecipeRunner {
    engine: DagEngine,
}

impl RecipeRunner {
    pub fn new(engine: DagEngine) -> Self {
        Self { engine }
    }

    /// Executes every stage in order and returns the aggregate of terminal
    /// outputs keyed by stage id. The first failure propagates with no
    /// partial aggregate.
    pub async fn run(
        &self,
        mut recipe: Recipe,
        variables: &Map<String, Value>,
    ) -> EngineResult<Map<String, Value>> {
        info!(
            recipe = %recipe.id,
            title = recipe.title.as_deref().unwrap_or(""),
            stages = recipe.processing.len(),
            "running recipe"
        );

        for stage in &mut recipe.processing {
            for node in &mut stage.nodes {
                substitute_node(node, variables)?;
            }
        }

        let mut content = Map::new();
        for stage in &recipe.processing {
            info!(stage = %stage.id, nodes = stage.nodes.len(), "running stage");
            let results = self.engine.execute(&stage.nodes).await?;
            content.insert(stage.id.clone(), Value::Object(results.terminal));
        }

        Ok(content)
    }
}

/// Replaces `$name` / `!name` placeholders anywhere in the node body with
/// the bound value. Walks nested objects and arrays.
fn substitute_node(node: &mut Node, variables: &Map<String, Value>) -> EngineResult<()> {
    let node_id = node.id.clone();
    for value in node.body.inputs.values_mut() {
        substitute_value(value, variables, &node_id)?;
    }
    for value in node.body.extra.values_mut() {
        substitute_value(value, variables, &node_id)?;
    }
    Ok(())
}

fn substitute_value(
    value: &mut Value,
    variables: &Map<String, Value>,
    node_id: &str,
) -> EngineResult<()> {
    match value {
        Value::Object(map) => {
            for nested in map.values_mut() {
                substitute_value(nested, variables, node_id)?;
            }
        }
        Value::Array(items) => {
            for nested in items.iter_mut() {
                substitute_value(nested, variables, node_id)?;
            }
        }
        Value::String(s) if s.starts_with('$') || s.starts_with('!') => {
            let name = &s[1..];
            let bound = variables
                .get(name)
                .ok_or_else(|| EngineError::VariableNotFound {
                    name: name.to_string(),
                    node_id: node_id.to_string(),
                })?;
            debug!(node = node_id, variable = name, "substituted variable");
            *value = bound.clone();
        }
        _ => {}
    }
    Ok(())
}
