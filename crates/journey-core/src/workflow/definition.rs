//! Workflow definition parsing and validation.
//!
//! Converts YAML/JSON documents into the canonical `Workflow` type and checks
//! the structural constraints the engine relies on: unique node IDs, edges
//! that reference real nodes and real ports, and every non-trigger node being
//! reachable from exactly one trigger.

use std::collections::HashSet;
use std::path::Path;

use journey_types::workflow::{
    FALSE_PORT, NodeConfig, Predicate, SplitType, TRUE_PORT, Workflow,
};
use thiserror::Error;

use super::graph::WorkflowGraph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A loop in the graph that never yields to a wait node.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// An edge references a node that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON, which is a YAML subset) document into a validated
/// `Workflow`.
///
/// Node validity flags are recomputed from each node's own configuration
/// before the graph-level checks run.
pub fn parse_workflow(source: &str) -> Result<Workflow, WorkflowError> {
    let mut workflow: Workflow =
        serde_yaml_ng::from_str(source).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    refresh_node_validity(&mut workflow);
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Load and validate a workflow from a `.yaml`, `.yml` or `.json` file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow(&content)
}

/// Serialize a workflow to YAML.
pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Describe what is wrong with a single node's configuration, if anything.
pub fn node_config_problem(config: &NodeConfig) -> Option<String> {
    match config {
        NodeConfig::Trigger | NodeConfig::Action { .. } => None,
        NodeConfig::Message { content, .. } => content
            .trim()
            .is_empty()
            .then(|| "message content must not be empty".to_string()),
        NodeConfig::Split(split) => match split.split_type {
            SplitType::Random | SplitType::Percentage => {
                if split.branches.is_empty() {
                    return Some("split must declare at least one branch".to_string());
                }
                let mut seen = HashSet::new();
                for branch in &split.branches {
                    if !seen.insert(branch.id.as_str()) {
                        return Some(format!("duplicate branch id '{}'", branch.id));
                    }
                    if !branch.percentage.is_finite() || branch.percentage < 0.0 {
                        return Some(format!(
                            "branch '{}' has invalid percentage {}",
                            branch.id, branch.percentage
                        ));
                    }
                }
                let total: f64 = split.branches.iter().map(|b| b.percentage).sum();
                (total <= 0.0).then(|| "branch percentages must sum to more than 0".to_string())
            }
            SplitType::FieldBased => {
                if split.field_name.as_deref().is_none_or(|f| f.trim().is_empty()) {
                    return Some("field_based split requires field_name".to_string());
                }
                if split.field_values.is_empty() && split.default_branch.is_none() {
                    return Some(
                        "field_based split needs field_values or a default_branch".to_string(),
                    );
                }
                None
            }
        },
        NodeConfig::Condition { predicate } => predicate_problem(predicate),
        NodeConfig::Wait(wait) => match (wait.amount, wait.until) {
            (Some(0), _) => Some("wait amount must be > 0".to_string()),
            (Some(_), Some(_)) => Some("wait takes either amount or until, not both".to_string()),
            (None, None) => Some("wait requires amount or until".to_string()),
            _ => None,
        },
        NodeConfig::Goal { revenue, .. } => match revenue {
            Some(r) if !r.is_finite() || *r < 0.0 => {
                Some(format!("goal revenue must be a non-negative number, got {r}"))
            }
            _ => None,
        },
    }
}

fn predicate_problem(predicate: &Predicate) -> Option<String> {
    match predicate {
        Predicate::All { predicates } | Predicate::Any { predicates } => {
            if predicates.is_empty() {
                return Some("all/any predicate must not be empty".to_string());
            }
            predicates.iter().find_map(predicate_problem)
        }
        Predicate::Not { predicate } => predicate_problem(predicate),
        Predicate::Equals { field, .. }
        | Predicate::NotEquals { field, .. }
        | Predicate::Exists { field }
        | Predicate::GreaterThan { field, .. }
        | Predicate::LessThan { field, .. }
        | Predicate::Contains { field, .. } => field
            .trim()
            .is_empty()
            .then(|| "predicate field must not be empty".to_string()),
        Predicate::Before { .. } | Predicate::After { .. } => None,
    }
}

/// Recompute `is_valid` on every node from its own configuration.
pub fn refresh_node_validity(workflow: &mut Workflow) {
    for node in &mut workflow.nodes {
        node.is_valid = node_config_problem(&node.config).is_none();
    }
}

/// Validate structural constraints on a `Workflow`.
///
/// Checks:
/// - Name is non-empty and at least one node exists
/// - Node IDs are unique and every node is marked valid
/// - Edges reference existing nodes, and each `(source, port)` is used once
/// - Split edges carry a declared branch id; condition edges carry `true`/`false`
/// - At least one trigger exists and no edge targets a trigger
/// - Every non-trigger node is reachable from exactly one trigger
/// - Every loop passes through a wait node
pub fn validate_workflow(workflow: &Workflow) -> Result<(), WorkflowError> {
    if workflow.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if workflow.nodes.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one node".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate node ID: '{}'",
                node.id
            )));
        }
        if let Some(problem) = node_config_problem(&node.config) {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}': {problem}",
                node.id
            )));
        }
        if !node.is_valid {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' is marked invalid",
                node.id
            )));
        }
    }

    let mut seen_ports = HashSet::new();
    for edge in &workflow.edges {
        let Some(source) = workflow.node(&edge.source_node_id) else {
            return Err(WorkflowError::UnknownNode(format!(
                "edge source '{}'",
                edge.source_node_id
            )));
        };
        let Some(target) = workflow.node(&edge.target_node_id) else {
            return Err(WorkflowError::UnknownNode(format!(
                "edge target '{}'",
                edge.target_node_id
            )));
        };
        if matches!(target.config, NodeConfig::Trigger) {
            return Err(WorkflowError::ValidationError(format!(
                "trigger '{}' must not have incoming edges",
                target.id
            )));
        }
        if !seen_ports.insert((edge.source_node_id.as_str(), edge.source_port.as_str())) {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' has more than one edge on port '{}'",
                edge.source_node_id, edge.source_port
            )));
        }
        match &source.config {
            NodeConfig::Split(split) => {
                if !split.branch_ids().contains(&edge.source_port.as_str()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "split '{}' has an edge on undeclared branch '{}'",
                        source.id, edge.source_port
                    )));
                }
            }
            NodeConfig::Condition { .. } => {
                if edge.source_port != TRUE_PORT && edge.source_port != FALSE_PORT {
                    return Err(WorkflowError::ValidationError(format!(
                        "condition '{}' edges must use port 'true' or 'false', got '{}'",
                        source.id, edge.source_port
                    )));
                }
            }
            _ => {}
        }
    }

    if workflow.trigger_ids().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have a trigger node".to_string(),
        ));
    }

    let graph = WorkflowGraph::build(workflow)?;
    graph.check_single_trigger_reachability()?;
    graph.check_loops_wait()?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
