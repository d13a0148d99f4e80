//! Workflow domain types.
//!
//! A `Workflow` is a versioned node graph: typed `Node`s connected by `Edge`s
//! keyed on `(source_node_id, source_port)`. Node configuration is a tagged
//! sum type so each node kind carries exactly the fields it needs, and files
//! written in YAML or JSON deserialize straight into it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Port followed by linear nodes (trigger, message, wait, goal, action).
pub const DEFAULT_PORT: &str = "default";
/// Port followed when a condition evaluates to true.
pub const TRUE_PORT: &str = "true";
/// Port followed when a condition evaluates to false.
pub const FALSE_PORT: &str = "false";

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An automation definition: a directed graph of typed nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Monotonic structural version, bumped whenever nodes or edges change.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Graph vertices. Ids are unique within the workflow.
    pub nodes: Vec<Node>,
    /// Graph edges.
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl Workflow {
    /// Look up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Ids of all trigger nodes, in declaration order.
    pub fn trigger_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == NodeType::Trigger)
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Resolve the target of the edge leaving `node_id` through `port`.
    pub fn target_of(&self, node_id: &str, port: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.source_node_id == node_id && e.source_port == port)
            .map(|e| e.target_node_id.as_str())
    }

    /// Whether the node and edge sets differ from `other` (a structural edit).
    pub fn structure_differs(&self, other: &Workflow) -> bool {
        let nodes_a = serde_json::to_value(&self.nodes).ok();
        let nodes_b = serde_json::to_value(&other.nodes).ok();
        let edges_a = serde_json::to_value(&self.edges).ok();
        let edges_b = serde_json::to_value(&other.edges).ok();
        nodes_a != nodes_b || edges_a != edges_b
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    /// Schedules fire and triggers start executions.
    Active,
    /// Schedules are inactive; in-flight executions continue.
    Paused,
    /// Terminal. Existing executions may still drain.
    Archived,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "paused" => Ok(WorkflowStatus::Paused),
            "archived" => Ok(WorkflowStatus::Archived),
            other => Err(format!("unknown workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A typed graph vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the owning workflow.
    pub id: String,
    /// Type-specific configuration, tagged by `type`.
    #[serde(flatten)]
    pub config: NodeConfig,
    /// Set by validation; invalid nodes fail executions that reach them.
    #[serde(default = "default_true")]
    pub is_valid: bool,
}

fn default_true() -> bool {
    true
}

impl Node {
    pub fn kind(&self) -> NodeType {
        self.config.kind()
    }
}

/// The kind of a node, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Message,
    Split,
    Condition,
    Wait,
    Goal,
    Action,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeType::Trigger => "trigger",
            NodeType::Message => "message",
            NodeType::Split => "split",
            NodeType::Condition => "condition",
            NodeType::Wait => "wait",
            NodeType::Goal => "goal",
            NodeType::Action => "action",
        };
        write!(f, "{s}")
    }
}

/// Node configuration payload.
///
/// Internally tagged by `type` to match the file format:
/// ```yaml
/// - id: welcome
///   type: message
///   content: "Hi {{ contact.first_name }}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Entry point of the graph.
    Trigger,
    /// Send a rendered message through the channel sender.
    Message {
        /// Content template (`{{ contact.<field> }}`, `{{ vars.<key> }}`).
        content: String,
        /// Optional channel label passed through to the sender.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        /// Contact field holding the delivery address (e.g. "phone").
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_field: Option<String>,
    },
    /// Branch assignment.
    Split(SplitConfig),
    /// Boolean predicate routed to the `true` / `false` ports.
    Condition { predicate: Predicate },
    /// Delay before following the `default` port.
    Wait(WaitConfig),
    /// Goal/conversion tracking.
    Goal {
        goal_type: GoalType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revenue: Option<f64>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        metrics: HashMap<String, serde_json::Value>,
    },
    /// Merge static values into the execution context.
    Action {
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        set: serde_json::Map<String, serde_json::Value>,
    },
}

impl NodeConfig {
    pub fn kind(&self) -> NodeType {
        match self {
            NodeConfig::Trigger => NodeType::Trigger,
            NodeConfig::Message { .. } => NodeType::Message,
            NodeConfig::Split(_) => NodeType::Split,
            NodeConfig::Condition { .. } => NodeType::Condition,
            NodeConfig::Wait(_) => NodeType::Wait,
            NodeConfig::Goal { .. } => NodeType::Goal,
            NodeConfig::Action { .. } => NodeType::Action,
        }
    }
}

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

/// Configuration of a split node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub split_type: SplitType,
    /// Weighted branches for `random` / `percentage` splits, in walk order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<SplitBranch>,
    /// Field looked up for `field_based` splits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Field value -> branch id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_values: HashMap<String, String>,
    /// Branch used when the field value is absent or unmapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

impl SplitConfig {
    /// Every branch id an outgoing edge of this split may carry.
    pub fn branch_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.branches.iter().map(|b| b.id.as_str()).collect();
        for branch in self.field_values.values() {
            if !ids.contains(&branch.as_str()) {
                ids.push(branch);
            }
        }
        if let Some(default) = &self.default_branch {
            if !ids.contains(&default.as_str()) {
                ids.push(default);
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    Random,
    Percentage,
    FieldBased,
}

/// One weighted outgoing path of a split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitBranch {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub percentage: f64,
}

// ---------------------------------------------------------------------------
// Condition / wait
// ---------------------------------------------------------------------------

/// Boolean predicate over execution context and contact fields.
///
/// Field references resolve against the execution context first, then the
/// contact resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { field: String, value: serde_json::Value },
    NotEquals { field: String, value: serde_json::Value },
    Exists { field: String },
    GreaterThan { field: String, value: f64 },
    LessThan { field: String, value: f64 },
    /// String containment, or membership for array fields.
    Contains { field: String, value: serde_json::Value },
    /// True while the evaluation time is before `at`.
    Before { at: DateTime<Utc> },
    /// True once the evaluation time is at or after `at`.
    After { at: DateTime<Utc> },
    All { predicates: Vec<Predicate> },
    Any { predicates: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

/// Configuration of a wait node: a relative delay or an absolute time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<DelayUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl WaitConfig {
    /// The relative delay, if this wait is a pure delay.
    pub fn delay(&self) -> Option<chrono::Duration> {
        let amount = i64::from(self.amount?);
        Some(match self.unit.unwrap_or(DelayUnit::Minutes) {
            DelayUnit::Minutes => chrono::Duration::minutes(amount),
            DelayUnit::Hours => chrono::Duration::hours(amount),
            DelayUnit::Days => chrono::Duration::days(amount),
            DelayUnit::Weeks => chrono::Duration::weeks(amount),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

// ---------------------------------------------------------------------------
// Goals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Conversion,
    Engagement,
    Revenue,
    Custom,
}

/// A goal-completion record emitted when an execution passes a goal node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalEvent {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    pub node_id: String,
    pub contact_id: Uuid,
    pub goal_type: GoalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed connection from a node's named output port to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source_node_id: String,
    #[serde(default = "default_port")]
    pub source_port: String,
    pub target_node_id: String,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
