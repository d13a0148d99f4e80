//! Node evaluator: turns one node plus an execution's context into a decision.
//!
//! `NodeEvaluator` dispatches on the node's `NodeConfig` variant. Message
//! nodes perform their send here; every other node only reads and writes the
//! execution context. Decisions that must survive re-evaluation (split
//! branch, wait due time) are stored in the context before being returned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use journey_types::channel::Recipient;
use journey_types::execution::{FailureKind, WorkflowExecution, store_precision};
use journey_types::workflow::{
    DEFAULT_PORT, FALSE_PORT, GoalEvent, Node, NodeConfig, SplitConfig, SplitType, TRUE_PORT,
    WaitConfig,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::channel::ChannelSender;
use crate::repository::contact::ContactResolver;

use super::context::{
    Placeholder, WAIT_UNTIL_KEY, context_lookup, goal_key, message_key, placeholders,
    render_template, split_key, wait_key,
};
use super::predicate::{self, FieldValues};
use super::split::{FieldBranch, branch_for_field, pick_weighted};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What the engine should do after evaluating a node.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Follow the edge leaving on `port`.
    Advance { port: String },
    /// Park the execution until the given time, then re-evaluate this node.
    WaitUntil(DateTime<Utc>),
    /// Record a goal event, then follow `port`.
    Goal { event: GoalEvent, port: String },
    /// The node failed.
    Fail { kind: FailureKind, reason: String },
}

impl Decision {
    fn advance(port: impl Into<String>) -> Self {
        Decision::Advance { port: port.into() }
    }

    fn transient(reason: impl Into<String>) -> Self {
        Decision::Fail {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    fn permanent(reason: impl Into<String>) -> Self {
        Decision::Fail {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeEvaluator
// ---------------------------------------------------------------------------

/// Evaluates nodes against an execution, using the channel sender for
/// message delivery and the contact resolver for field lookups.
pub struct NodeEvaluator<S, C> {
    sender: Arc<S>,
    contacts: Arc<C>,
}

impl<S: ChannelSender, C: ContactResolver> NodeEvaluator<S, C> {
    pub fn new(sender: Arc<S>, contacts: Arc<C>) -> Self {
        Self { sender, contacts }
    }

    /// Evaluate `node` for `execution` at time `now`.
    ///
    /// May mutate `execution.context`; the caller persists it together with
    /// the resulting transition.
    pub async fn evaluate(
        &self,
        node: &Node,
        execution: &mut WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Decision {
        if !node.is_valid {
            return Decision::permanent(format!("node '{}' is marked invalid", node.id));
        }

        match &node.config {
            NodeConfig::Trigger => Decision::advance(DEFAULT_PORT),
            NodeConfig::Message {
                content,
                channel,
                recipient_field,
            } => {
                self.send_message(
                    node,
                    execution,
                    content,
                    channel.as_deref(),
                    recipient_field.as_deref(),
                )
                .await
            }
            NodeConfig::Split(split) => self.assign_branch(node, execution, split).await,
            NodeConfig::Condition { predicate } => {
                let mut fields = FieldValues::new();
                for field in predicate::referenced_fields(predicate) {
                    match self.resolve_field(execution, &field).await {
                        Ok(Some(value)) => {
                            fields.insert(field, value);
                        }
                        Ok(None) => {}
                        Err(reason) => return Decision::transient(reason),
                    }
                }
                let port = if predicate::evaluate(predicate, &fields, now) {
                    TRUE_PORT
                } else {
                    FALSE_PORT
                };
                Decision::advance(port)
            }
            NodeConfig::Wait(wait) => evaluate_wait(node, execution, wait, now),
            NodeConfig::Goal {
                goal_type,
                name,
                revenue,
                metrics,
            } => {
                execution
                    .context
                    .insert(goal_key(&node.id), Value::Bool(true));
                Decision::Goal {
                    event: GoalEvent {
                        id: Uuid::now_v7(),
                        execution_id: execution.id,
                        workflow_id: execution.workflow_id,
                        organization_id: execution.organization_id,
                        node_id: node.id.clone(),
                        contact_id: execution.contact_id,
                        goal_type: *goal_type,
                        name: name.clone(),
                        revenue: *revenue,
                        metrics: metrics.clone(),
                        occurred_at: now,
                    },
                    port: DEFAULT_PORT.to_string(),
                }
            }
            NodeConfig::Action { set } => {
                for (key, value) in set {
                    execution.context.insert(key.clone(), value.clone());
                }
                Decision::advance(DEFAULT_PORT)
            }
        }
    }

    /// Resolve a field from the context first, then the contact record.
    ///
    /// A `contact.` prefix skips the context. Resolver errors are returned as
    /// a failure reason; the store being unreachable is transient.
    async fn resolve_field(
        &self,
        execution: &WorkflowExecution,
        field: &str,
    ) -> Result<Option<Value>, String> {
        let contact_field = match field.strip_prefix("contact.") {
            Some(stripped) => stripped,
            None => {
                if let Some(value) = context_lookup(&execution.context, field) {
                    return Ok(Some(value.clone()));
                }
                field
            }
        };
        self.contacts
            .resolve(&execution.contact_id, contact_field)
            .await
            .map_err(|e| format!("contact lookup for '{contact_field}' failed: {e}"))
    }

    async fn send_message(
        &self,
        node: &Node,
        execution: &mut WorkflowExecution,
        content: &str,
        channel: Option<&str>,
        recipient_field: Option<&str>,
    ) -> Decision {
        let mut contact_fields = HashMap::new();
        for placeholder in placeholders(content) {
            if let Placeholder::Contact(field) = placeholder {
                match self.contacts.resolve(&execution.contact_id, &field).await {
                    Ok(Some(value)) => {
                        contact_fields.insert(field, value);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return Decision::transient(format!(
                            "contact lookup for '{field}' failed: {e}"
                        ));
                    }
                }
            }
        }

        let address = match recipient_field {
            Some(field) => match self.resolve_field(execution, field).await {
                Ok(Some(Value::String(address))) if !address.trim().is_empty() => Some(address),
                Ok(_) => {
                    return Decision::permanent(format!(
                        "contact {} has no '{field}' to deliver to",
                        execution.contact_id
                    ));
                }
                Err(reason) => return Decision::transient(reason),
            },
            None => None,
        };

        let recipient = Recipient {
            contact_id: execution.contact_id,
            address,
            channel: channel.map(String::from),
        };
        let rendered = render_template(content, &execution.context, &contact_fields);

        match self.sender.send(&recipient, &rendered).await {
            Ok(receipt) => {
                tracing::debug!(
                    execution_id = %execution.id,
                    node_id = %node.id,
                    message_id = %receipt.message_id,
                    "message delivered"
                );
                execution.context.insert(
                    message_key(&node.id),
                    json!({
                        "message_id": receipt.message_id,
                        "sent_at": receipt.sent_at,
                    }),
                );
                Decision::advance(DEFAULT_PORT)
            }
            Err(e) => Decision::Fail {
                kind: e.kind,
                reason: format!("node '{}': {}", node.id, e.message),
            },
        }
    }

    async fn assign_branch(
        &self,
        node: &Node,
        execution: &mut WorkflowExecution,
        split: &SplitConfig,
    ) -> Decision {
        let key = split_key(&node.id);
        if let Some(Value::String(branch)) = execution.context.get(&key) {
            return Decision::advance(branch.clone());
        }

        let branch = match split.split_type {
            SplitType::Random | SplitType::Percentage => {
                let picked = {
                    let mut rng = rand::thread_rng();
                    pick_weighted(&split.branches, &mut rng).map(|b| b.id.clone())
                };
                match picked {
                    Some(branch) => branch,
                    None => {
                        return Decision::permanent(format!(
                            "split '{}' has no branches",
                            node.id
                        ));
                    }
                }
            }
            SplitType::FieldBased => {
                let Some(field) = split.field_name.as_deref() else {
                    return Decision::permanent(format!(
                        "split '{}' has no field_name",
                        node.id
                    ));
                };
                let value = match self.resolve_field(execution, field).await {
                    Ok(value) => value,
                    Err(reason) => return Decision::transient(reason),
                };
                match branch_for_field(split, value.as_ref()) {
                    FieldBranch::Branch(branch) => branch,
                    FieldBranch::Unmapped(value) => {
                        return Decision::permanent(format!(
                            "split '{}': value '{value}' of field '{field}' maps to no branch",
                            node.id
                        ));
                    }
                    FieldBranch::Missing => {
                        return Decision::permanent(format!(
                            "split '{}': field '{field}' is absent and no default branch is set",
                            node.id
                        ));
                    }
                }
            }
        };

        tracing::debug!(execution_id = %execution.id, node_id = %node.id, %branch, "split branch assigned");
        execution
            .context
            .insert(key, Value::String(branch.clone()));
        Decision::advance(branch)
    }
}

/// Wait nodes store their due time on first evaluation; a later evaluation
/// at or after that time clears it and advances.
fn evaluate_wait(
    node: &Node,
    execution: &mut WorkflowExecution,
    wait: &WaitConfig,
    now: DateTime<Utc>,
) -> Decision {
    let key = wait_key(&node.id);
    let stored = execution
        .context
        .get(&key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let due = match stored {
        Some(due) => due,
        None => {
            let due = match (wait.until, wait.delay()) {
                (Some(until), _) => store_precision(until),
                (None, Some(delay)) => store_precision(now + delay),
                (None, None) => {
                    return Decision::permanent(format!("wait '{}' has no duration", node.id));
                }
            };
            if due <= now {
                return Decision::advance(DEFAULT_PORT);
            }
            execution
                .context
                .insert(key.clone(), Value::String(due.to_rfc3339()));
            due
        }
    };

    if now >= due {
        execution.context.remove(&key);
        execution.context.remove(WAIT_UNTIL_KEY);
        Decision::advance(DEFAULT_PORT)
    } else {
        execution
            .context
            .insert(WAIT_UNTIL_KEY.to_string(), Value::String(due.to_rfc3339()));
        Decision::WaitUntil(due)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{MapContacts, ORG, ScriptedSender, ts};
    use journey_types::error::ChannelError;
    use std::sync::atomic::Ordering;

    fn node(value: Value) -> Node {
        let mut node: Node = serde_json::from_value(value).unwrap();
        node.is_valid = crate::workflow::definition::node_config_problem(&node.config).is_none();
        node
    }

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(Uuid::now_v7(), ORG, Uuid::now_v7(), "start", Utc::now())
    }

    fn evaluator(
        sender: ScriptedSender,
        contacts: MapContacts,
    ) -> (NodeEvaluator<ScriptedSender, MapContacts>, Arc<ScriptedSender>, Arc<MapContacts>) {
        let sender = Arc::new(sender);
        let contacts = Arc::new(contacts);
        (
            NodeEvaluator::new(sender.clone(), contacts.clone()),
            sender,
            contacts,
        )
    }

    fn port(decision: Decision) -> String {
        match decision {
            Decision::Advance { port } => port,
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_split_assignment_is_idempotent() {
        let (eval, _, _) = evaluator(ScriptedSender::default(), MapContacts::default());
        let split = node(json!({
            "id": "ab",
            "type": "split",
            "split_type": "random",
            "branches": [
                {"id": "a", "percentage": 50},
                {"id": "b", "percentage": 50}
            ]
        }));
        let mut exec = execution();
        let first = port(eval.evaluate(&split, &mut exec, Utc::now()).await);
        assert_eq!(exec.context["split:ab"], json!(first));
        for _ in 0..200 {
            assert_eq!(port(eval.evaluate(&split, &mut exec, Utc::now()).await), first);
        }
    }

    #[tokio::test]
    async fn test_field_split_uses_contact_field() {
        let contacts = MapContacts::default();
        let mut exec = execution();
        contacts.set(exec.contact_id, "plan", json!("pro"));
        let (eval, _, _) = evaluator(ScriptedSender::default(), contacts);
        let split = node(json!({
            "id": "by_plan",
            "type": "split",
            "split_type": "field_based",
            "field_name": "plan",
            "field_values": {"pro": "upsell", "free": "nurture"}
        }));
        assert_eq!(port(eval.evaluate(&split, &mut exec, Utc::now()).await), "upsell");
    }

    #[tokio::test]
    async fn test_field_split_unmapped_value_fails_permanently() {
        let contacts = MapContacts::default();
        let mut exec = execution();
        contacts.set(exec.contact_id, "plan", json!("enterprise"));
        let (eval, _, _) = evaluator(ScriptedSender::default(), contacts);
        let split = node(json!({
            "id": "by_plan",
            "type": "split",
            "split_type": "field_based",
            "field_name": "plan",
            "field_values": {"pro": "upsell"}
        }));
        match eval.evaluate(&split, &mut exec, Utc::now()).await {
            Decision::Fail { kind, reason } => {
                assert_eq!(kind, FailureKind::Permanent);
                assert!(reason.contains("enterprise"), "got: {reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!exec.context.contains_key("split:by_plan"));
    }

    #[tokio::test]
    async fn test_resolver_outage_is_transient() {
        let contacts = MapContacts::default();
        contacts.unavailable.store(true, Ordering::SeqCst);
        let (eval, _, _) = evaluator(ScriptedSender::default(), contacts);
        let condition = node(json!({
            "id": "vip",
            "type": "condition",
            "predicate": {"op": "equals", "field": "tier", "value": "vip"}
        }));
        let mut exec = execution();
        match eval.evaluate(&condition, &mut exec, Utc::now()).await {
            Decision::Fail { kind, .. } => assert_eq!(kind, FailureKind::Transient),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_condition_prefers_context_over_contact() {
        let contacts = MapContacts::default();
        let mut exec = execution();
        contacts.set(exec.contact_id, "tier", json!("basic"));
        exec.context.insert("tier".into(), json!("vip"));
        let (eval, _, _) = evaluator(ScriptedSender::default(), contacts);
        let condition = node(json!({
            "id": "vip",
            "type": "condition",
            "predicate": {"op": "equals", "field": "tier", "value": "vip"}
        }));
        assert_eq!(port(eval.evaluate(&condition, &mut exec, Utc::now()).await), "true");
        let by_contact = node(json!({
            "id": "vip2",
            "type": "condition",
            "predicate": {"op": "equals", "field": "contact.tier", "value": "vip"}
        }));
        assert_eq!(port(eval.evaluate(&by_contact, &mut exec, Utc::now()).await), "false");
    }

    #[tokio::test]
    async fn test_wait_parks_then_advances() {
        let (eval, _, _) = evaluator(ScriptedSender::default(), MapContacts::default());
        let wait = node(json!({"id": "w", "type": "wait", "amount": 2, "unit": "days"}));
        let mut exec = execution();
        let now = ts("2026-05-01T10:00:00Z");
        let due = match eval.evaluate(&wait, &mut exec, now).await {
            Decision::WaitUntil(due) => due,
            other => panic!("expected wait, got {other:?}"),
        };
        assert_eq!(due, ts("2026-05-03T10:00:00Z"));
        assert!(exec.context.contains_key(WAIT_UNTIL_KEY));

        // An early re-evaluation keeps the original due time.
        match eval.evaluate(&wait, &mut exec, ts("2026-05-02T00:00:00Z")).await {
            Decision::WaitUntil(again) => assert_eq!(again, due),
            other => panic!("expected wait, got {other:?}"),
        }

        assert_eq!(port(eval.evaluate(&wait, &mut exec, due).await), DEFAULT_PORT);
        assert!(!exec.context.contains_key("wait:w"));
        assert!(!exec.context.contains_key(WAIT_UNTIL_KEY));
    }

    #[tokio::test]
    async fn test_wait_until_in_past_advances_immediately() {
        let (eval, _, _) = evaluator(ScriptedSender::default(), MapContacts::default());
        let wait = node(json!({"id": "w", "type": "wait", "until": "2020-01-01T00:00:00Z"}));
        let mut exec = execution();
        assert_eq!(port(eval.evaluate(&wait, &mut exec, Utc::now()).await), DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_message_renders_and_records_receipt() {
        let contacts = MapContacts::default();
        let mut exec = execution();
        contacts.set(exec.contact_id, "first_name", json!("Ada"));
        contacts.set(exec.contact_id, "phone", json!("+15550100"));
        let (eval, sender, _) = evaluator(ScriptedSender::default(), contacts);
        let message = node(json!({
            "id": "hello",
            "type": "message",
            "content": "Hi {{ contact.first_name }}",
            "channel": "sms",
            "recipient_field": "phone"
        }));
        assert_eq!(port(eval.evaluate(&message, &mut exec, Utc::now()).await), DEFAULT_PORT);
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Hi Ada");
        assert_eq!(sent[0].0.address.as_deref(), Some("+15550100"));
        assert_eq!(sent[0].0.channel.as_deref(), Some("sms"));
        assert_eq!(exec.context["message:hello"]["message_id"], json!("msg-1"));
    }

    #[tokio::test]
    async fn test_message_failure_keeps_classification() {
        let (eval, _, _) = evaluator(
            ScriptedSender::failing(vec![ChannelError::permanent("invalid number")]),
            MapContacts::default(),
        );
        let message = node(json!({"id": "m", "type": "message", "content": "hello"}));
        let mut exec = execution();
        match eval.evaluate(&message, &mut exec, Utc::now()).await {
            Decision::Fail { kind, reason } => {
                assert_eq!(kind, FailureKind::Permanent);
                assert!(reason.contains("invalid number"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_missing_recipient_is_permanent() {
        let (eval, sender, _) = evaluator(ScriptedSender::default(), MapContacts::default());
        let message = node(json!({
            "id": "m", "type": "message", "content": "hello", "recipient_field": "email"
        }));
        let mut exec = execution();
        match eval.evaluate(&message, &mut exec, Utc::now()).await {
            Decision::Fail { kind, .. } => assert_eq!(kind, FailureKind::Permanent),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(sender.attempts(), 0);
    }

    #[tokio::test]
    async fn test_goal_and_action_nodes() {
        let (eval, _, _) = evaluator(ScriptedSender::default(), MapContacts::default());
        let mut exec = execution();
        let action = node(json!({"id": "tag", "type": "action", "set": {"cohort": "spring"}}));
        assert_eq!(port(eval.evaluate(&action, &mut exec, Utc::now()).await), DEFAULT_PORT);
        assert_eq!(exec.context["cohort"], json!("spring"));

        let goal = node(json!({
            "id": "bought", "type": "goal", "goal_type": "revenue", "revenue": 49.0
        }));
        match eval.evaluate(&goal, &mut exec, Utc::now()).await {
            Decision::Goal { event, port } => {
                assert_eq!(port, DEFAULT_PORT);
                assert_eq!(event.node_id, "bought");
                assert_eq!(event.revenue, Some(49.0));
                assert_eq!(event.execution_id, exec.id);
            }
            other => panic!("expected goal, got {other:?}"),
        }
        assert_eq!(exec.context["goal:bought"], json!(true));
    }

    #[tokio::test]
    async fn test_invalid_node_fails_permanently() {
        let (eval, _, _) = evaluator(ScriptedSender::default(), MapContacts::default());
        let mut broken = node(json!({"id": "m", "type": "message", "content": "x"}));
        broken.is_valid = false;
        let mut exec = execution();
        match eval.evaluate(&broken, &mut exec, Utc::now()).await {
            Decision::Fail { kind, .. } => assert_eq!(kind, FailureKind::Permanent),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
