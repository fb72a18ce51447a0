//! Data model for recipes, stages and nodes.
//!
//! The wire format follows the recipe documents accepted by the execute
//! operation: a recipe holds an ordered list of stages (`processing`), each
//! stage a set of nodes forming a DAG. Node inputs may carry literal values,
//! dependency references (`:nodeId.outputs.outputName`) or variable
//! placeholders (`$name` / `!name`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A recipe document: one or more ordered processing stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Variable bindings carried inside the document itself. Bindings
    /// supplied with the execute request take precedence over these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub processing: Vec<Stage>,
}

/// One processing stage: a DAG of nodes whose terminal outputs are recorded
/// under the stage id in the recipe's result aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One unit of delegated computation within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the enclosing stage.
    pub id: String,
    /// The remote service that performs this node's work.
    pub link: Link,
    #[serde(default)]
    pub body: NodeBody,
    #[serde(default)]
    pub execution: Execution,
}

/// Base URL and display title of a remote process service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The request body sent to a node's execution endpoint. `inputs` is the
/// mapping the dependency resolver operates on; any other fields (for
/// example a `subscriber` callback address) are forwarded verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeBody {
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeBody {
    /// Whether the node announced a callback subscriber, meaning the remote
    /// service will push completion instead of being polled.
    pub fn has_subscriber(&self) -> bool {
        self.extra.get("subscriber").is_some_and(is_truthy)
    }
}

// JavaScript-style truthiness: null, false, 0 and "" do not count.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Execution descriptor selecting the completion discipline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Immediate response carrying the outputs.
    #[default]
    Sync,
    /// 202 + job resource; completion via callback or polling.
    Async,
}

/// Normalized node outputs: output name to value.
pub type Outputs = Map<String, Value>;
