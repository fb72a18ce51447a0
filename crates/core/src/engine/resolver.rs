//! Dependency resolution over node input mappings.
//!
//! Inputs reference other nodes' outputs with the exact form
//! `:nodeId.outputs.outputName`. These functions extract the dependency set
//! of a node, substitute recorded results for references, and identify the
//! terminal (unreferenced) nodes of a stage.

use crate::error::{EngineError, EngineResult};
use crate::types::{Node, NodeBody, Outputs};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

const REFERENCE_INFIX: &str = ".outputs.";

/// Splits a `:nodeId.outputs.outputName` reference into node id and output
/// name. Node ids may themselves contain dots, so the split happens at the
/// last `.outputs.` occurrence.
fn parse_reference(value: &str) -> EngineResult<(&str, &str)> {
    let rest = &value[1..];
    let at = rest
        .rfind(REFERENCE_INFIX)
        .ok_or_else(|| EngineError::InvalidReference(value.to_string()))?;
    let (node_id, output) = (&rest[..at], &rest[at + REFERENCE_INFIX.len()..]);
    if node_id.is_empty() || output.is_empty() {
        return Err(EngineError::InvalidReference(value.to_string()));
    }
    Ok((node_id, output))
}

fn as_reference(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| s.starts_with(':'))
}

/// Node ids this node depends on via input references, deduplicated.
pub fn extract_dependencies(node: &Node) -> EngineResult<Vec<String>> {
    let mut deps: Vec<String> = Vec::new();
    for value in node.body.inputs.values() {
        if let Some(reference) = as_reference(value) {
            let (node_id, _) = parse_reference(reference)?;
            if !deps.iter().any(|d| d == node_id) {
                deps.push(node_id.to_string());
            }
        }
    }
    Ok(deps)
}

/// Returns a copy of the node body with every input reference replaced by
/// the referenced node's recorded output. The original body is untouched.
///
/// Fails with [`EngineError::UnresolvedDependency`] when the referenced node
/// has no results entry; the DAG engine's scheduling guarantees this never
/// happens for a correctly ordered stage.
pub fn resolve_inputs(
    node: &Node,
    results: &HashMap<String, Outputs>,
) -> EngineResult<NodeBody> {
    let mut resolved = node.body.clone();
    let mut inputs = serde_json::Map::with_capacity(node.body.inputs.len());

    for (key, value) in &node.body.inputs {
        let replacement = match as_reference(value) {
            Some(reference) => {
                let (node_id, output) = parse_reference(reference)?;
                let outputs = results
                    .get(node_id)
                    .ok_or_else(|| EngineError::UnresolvedDependency(node_id.to_string()))?;
                outputs.get(output).cloned().unwrap_or(Value::Null)
            }
            None => value.clone(),
        };
        inputs.insert(key.clone(), replacement);
    }

    resolved.inputs = inputs;
    Ok(resolved)
}

/// Node ids never referenced as a dependency by any sibling, in stable input
/// order. Their outputs form the stage's final result.
pub fn terminal_nodes(nodes: &[Node]) -> EngineResult<Vec<String>> {
    let mut referenced: HashSet<String> = HashSet::new();
    for node in nodes {
        for value in node.body.inputs.values() {
            if let Some(reference) = as_reference(value) {
                let (node_id, _) = parse_reference(reference)?;
                referenced.insert(node_id.to_string());
            }
        }
    }

    Ok(nodes
        .iter()
        .map(|n| n.id.clone())
        .filter(|id| !referenced.contains(id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, inputs: Value) -> Node {
        serde_json::from_value(json!({
            "id": id,
            "link": { "href": "http://svc.test/proc", "title": id },
            "body": { "inputs": inputs },
        }))
        .unwrap()
    }

    #[test]
    fn extracts_referenced_node_ids() {
        let n = node(
            "c",
            json!({
                "x": ":a.outputs.sum",
                "y": ":b.outputs.product",
                "z": ":a.outputs.carry",
                "w": 42,
                "v": "plain string",
            }),
        );

        assert_eq!(extract_dependencies(&n).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn empty_inputs_have_no_dependencies() {
        let n = node("a", json!({}));
        assert!(extract_dependencies(&n).unwrap().is_empty());
    }

    #[test]
    fn malformed_reference_is_an_error() {
        for bad in [":a", ":a.outputs.", ":.outputs.x", ":nope.inputs.x"] {
            let n = node("c", json!({ "x": bad }));
            let err = extract_dependencies(&n).unwrap_err();
            assert!(matches!(err, EngineError::InvalidReference(_)), "{bad}");
        }
    }

    #[test]
    fn dotted_node_ids_split_at_last_outputs_infix() {
        let n = node("c", json!({ "x": ":a.outputs.b.outputs.y" }));
        assert_eq!(extract_dependencies(&n).unwrap(), vec!["a.outputs.b"]);
    }

    #[test]
    fn resolves_references_against_results() {
        let n = node("b", json!({ "x": ":a.outputs.sum", "y": 10 }));

        let mut results = HashMap::new();
        let mut outputs = Outputs::new();
        outputs.insert("sum".into(), json!(7));
        results.insert("a".to_string(), outputs);

        let resolved = resolve_inputs(&n, &results).unwrap();
        assert_eq!(resolved.inputs.get("x"), Some(&json!(7)));
        assert_eq!(resolved.inputs.get("y"), Some(&json!(10)));

        // The node's own body must be left untouched.
        assert_eq!(n.body.inputs.get("x"), Some(&json!(":a.outputs.sum")));
    }

    #[test]
    fn missing_results_entry_is_unresolved() {
        let n = node("b", json!({ "x": ":a.outputs.sum" }));
        let err = resolve_inputs(&n, &HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedDependency(id) if id == "a"));
    }

    #[test]
    fn terminal_nodes_are_the_unreferenced_ones() {
        let nodes = vec![
            node("a", json!({})),
            node("b", json!({ "x": ":a.outputs.sum" })),
            node("c", json!({ "x": ":a.outputs.sum" })),
        ];

        let terminal = terminal_nodes(&nodes).unwrap();
        assert_eq!(terminal, vec!["b", "c"]);

        // Idempotent over an unchanged node set.
        assert_eq!(terminal_nodes(&nodes).unwrap(), terminal);
    }
}
