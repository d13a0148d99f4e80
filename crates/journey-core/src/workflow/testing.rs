//! In-memory collaborators shared by the engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use journey_types::channel::{DeliveryReceipt, Recipient};
use journey_types::error::{ChannelError, RepositoryError};
use journey_types::execution::{ExecutionGuard, ExecutionStatus, RetryState, WorkflowExecution};
use journey_types::schedule::WorkflowSchedule;
use journey_types::workflow::{GoalEvent, Workflow, WorkflowStatus};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::ChannelSender;
use crate::repository::contact::ContactResolver;
use crate::repository::goal::GoalSink;
use crate::repository::workflow::WorkflowRepository;

pub const ORG: Uuid = Uuid::from_u128(0x0190f5a2_6c1e_7cc0_a3a4_5d1c2b3a4f51);

/// Build an active workflow from JSON node and edge lists.
pub fn workflow(nodes: Value, edges: Value) -> Workflow {
    let mut wf: Workflow = serde_json::from_value(serde_json::json!({
        "id": Uuid::now_v7(),
        "organization_id": ORG,
        "name": "test journey",
        "status": "active",
        "nodes": nodes,
        "edges": edges,
    }))
    .expect("test workflow must deserialize");
    crate::workflow::definition::refresh_node_validity(&mut wf);
    wf
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().expect("test timestamp")
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, Workflow>,
    executions: HashMap<Uuid, WorkflowExecution>,
    schedules: HashMap<Uuid, WorkflowSchedule>,
    retries: HashMap<Uuid, RetryState>,
}

/// A `WorkflowRepository` backed by hash maps behind a mutex.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    /// Count of conditional execution writes rejected by the guard.
    pub conflicts: AtomicUsize,
}

impl InMemoryRepository {
    pub fn execution(&self, id: &Uuid) -> WorkflowExecution {
        self.state.lock().unwrap().executions[id].clone()
    }

    pub fn executions(&self) -> Vec<WorkflowExecution> {
        self.state.lock().unwrap().executions.values().cloned().collect()
    }

    pub fn schedule(&self, id: &Uuid) -> WorkflowSchedule {
        self.state.lock().unwrap().schedules[id].clone()
    }

    pub fn retry_state(&self, id: &Uuid) -> Option<RetryState> {
        self.state.lock().unwrap().retries.get(id).cloned()
    }

    /// Overwrite an execution without a guard, as a concurrent writer would.
    pub fn force_execution(&self, execution: WorkflowExecution) {
        self.state
            .lock()
            .unwrap()
            .executions
            .insert(execution.id, execution);
    }
}

impl WorkflowRepository for InMemoryRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .unwrap()
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.state.lock().unwrap().workflows.get(id).cloned())
    }

    async fn list_workflows(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workflows
            .values()
            .filter(|w| organization_id.is_none_or(|o| &w.organization_id == o))
            .cloned()
            .collect())
    }

    async fn set_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let workflow = state.workflows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        workflow.status = status;
        Ok(())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(execution.id.to_string()));
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.state.lock().unwrap().executions.get(id).cloned())
    }

    async fn update_execution(
        &self,
        execution: &WorkflowExecution,
        expected: &ExecutionGuard,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let Some(stored) = state.executions.get_mut(&execution.id) else {
            return Ok(false);
        };
        if stored.guard() != *expected {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Ok(false);
        }
        *stored = execution.clone();
        Ok(true)
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| &e.workflow_id == workflow_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn list_pending_executions(
        &self,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.updated_at);
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn list_due_waits(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Waiting && e.wake_at.is_some_and(|w| w <= now))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.wake_at);
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn list_stalled_executions(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running && e.updated_at < before)
            .cloned()
            .collect();
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn list_stranded_retries(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::WaitingRetry
                    && e.updated_at < before
                    && !state.retries.contains_key(&e.id)
            })
            .cloned()
            .collect();
        found.sort_by_key(|e| e.updated_at);
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn delete_terminal_executions(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let doomed: Vec<Uuid> = state
            .executions
            .values()
            .filter(|e| e.status.is_terminal() && e.completed_at.unwrap_or(e.updated_at) < before)
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            state.executions.remove(id);
            state.retries.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn create_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .unwrap()
            .schedules
            .insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, id: &Uuid) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        Ok(self.state.lock().unwrap().schedules.get(id).cloned())
    }

    async fn list_schedules(
        &self,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .schedules
            .values()
            .filter(|s| workflow_id.is_none_or(|w| &s.workflow_id == w))
            .cloned()
            .collect())
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .schedules
            .values()
            .filter(|s| s.is_active && s.next_execution_at.is_some_and(|n| n <= now))
            .filter(|s| {
                !state.workflows.get(&s.workflow_id).is_some_and(|w| {
                    matches!(w.status, WorkflowStatus::Paused | WorkflowStatus::Draft)
                })
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| s.next_execution_at);
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn update_schedule(
        &self,
        schedule: &WorkflowSchedule,
        expected_next: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let Some(stored) = state.schedules.get_mut(&schedule.id) else {
            return Ok(false);
        };
        if stored.next_execution_at != expected_next {
            return Ok(false);
        }
        *stored = schedule.clone();
        Ok(true)
    }

    async fn save_retry_state(&self, retry: &RetryState) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .unwrap()
            .retries
            .insert(retry.execution_id, retry.clone());
        Ok(())
    }

    async fn get_retry_state(&self, execution_id: &Uuid) -> Result<Option<RetryState>, RepositoryError> {
        Ok(self.state.lock().unwrap().retries.get(execution_id).cloned())
    }

    async fn list_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RetryState>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<_> = state
            .retries
            .values()
            .filter(|r| r.next_retry_at <= now)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.next_retry_at);
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn delete_retry_state(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().unwrap().retries.remove(execution_id).is_some())
    }

    async fn delete_orphaned_retry_states(&self) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let orphaned: Vec<Uuid> = state
            .retries
            .keys()
            .filter(|id| {
                state
                    .executions
                    .get(id)
                    .is_none_or(|e| e.status.is_terminal())
            })
            .copied()
            .collect();
        for id in &orphaned {
            state.retries.remove(id);
        }
        Ok(orphaned.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Channel sender
// ---------------------------------------------------------------------------

type SendHook = Box<dyn Fn(usize) + Send + Sync>;

/// A `ChannelSender` that replays scripted failures, then succeeds.
#[derive(Default)]
pub struct ScriptedSender {
    script: Mutex<VecDeque<ChannelError>>,
    sent: Mutex<Vec<(Recipient, String)>>,
    attempts: AtomicUsize,
    hook: Option<SendHook>,
}

impl ScriptedSender {
    pub fn failing(failures: Vec<ChannelError>) -> Self {
        Self {
            script: Mutex::new(failures.into()),
            ..Self::default()
        }
    }

    /// Run `hook(attempt)` at the start of every send.
    pub fn with_hook(hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Recipient, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChannelSender for ScriptedSender {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<DeliveryReceipt, ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(attempt);
        }
        if let Some(failure) = self.script.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), content.to_string()));
        Ok(DeliveryReceipt {
            message_id: format!("msg-{attempt}"),
            sent_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Contacts and goals
// ---------------------------------------------------------------------------

/// A `ContactResolver` over a fixed attribute map.
#[derive(Default)]
pub struct MapContacts {
    fields: Mutex<HashMap<(Uuid, String), Value>>,
    pub unavailable: AtomicBool,
}

impl MapContacts {
    pub fn set(&self, contact_id: Uuid, field: &str, value: Value) {
        self.fields
            .lock()
            .unwrap()
            .insert((contact_id, field.to_string()), value);
    }
}

impl ContactResolver for MapContacts {
    async fn resolve(&self, contact_id: &Uuid, field_name: &str) -> Result<Option<Value>, RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self
            .fields
            .lock()
            .unwrap()
            .get(&(*contact_id, field_name.to_string()))
            .cloned())
    }
}

/// A `GoalSink` that keeps every event in memory.
#[derive(Default)]
pub struct RecordingGoals {
    events: Mutex<Vec<GoalEvent>>,
    /// When set, every `record_goal` call fails without recording.
    pub unavailable: AtomicBool,
}

impl RecordingGoals {
    pub fn events(&self) -> Vec<GoalEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl GoalSink for RecordingGoals {
    async fn record_goal(&self, _execution_id: &Uuid, event: &GoalEvent) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
