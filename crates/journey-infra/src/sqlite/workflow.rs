//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `journey-core` using sqlx with split
//! read/write pools. Workflow definitions are stored as JSON blobs; executions,
//! schedules and retry states are stored column-per-field so the due-time
//! sweeps are indexed range scans.
//!
//! Conditional writes are single `UPDATE ... WHERE` statements on the writer
//! connection; `rows_affected() == 1` means the guard matched.

use chrono::{DateTime, SecondsFormat, Utc};
use journey_core::repository::workflow::WorkflowRepository;
use journey_types::error::RepositoryError;
use journey_types::execution::{ExecutionGuard, ExecutionStatus, RetryState, WorkflowExecution};
use journey_types::schedule::{ScheduleConfig, WorkflowSchedule};
use journey_types::workflow::{Workflow, WorkflowStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// Status list used by every "terminal" predicate below.
const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Execution counts per status, across all workflows.
    pub async fn count_executions_by_status(
        &self,
    ) -> Result<Vec<(ExecutionStatus, u64)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM workflow_executions GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status").map_err(query_err)?;
                let n: i64 = row.try_get("n").map_err(query_err)?;
                let status = status.parse::<ExecutionStatus>().map_err(RepositoryError::Query)?;
                Ok((status, n.max(0) as u64))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    definition: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            definition: row.try_get("definition")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow JSON: {e}")))
    }
}

struct ExecutionRow {
    id: String,
    workflow_id: String,
    organization_id: String,
    contact_id: String,
    status: String,
    current_node_id: Option<String>,
    execution_path: String,
    context: String,
    retry_count: i64,
    last_error: Option<String>,
    wake_at: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            organization_id: row.try_get("organization_id")?,
            contact_id: row.try_get("contact_id")?,
            status: row.try_get("status")?,
            current_node_id: row.try_get("current_node_id")?,
            execution_path: row.try_get("execution_path")?,
            context: row.try_get("context")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            wake_at: row.try_get("wake_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        let status: ExecutionStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let execution_path = serde_json::from_str(&self.execution_path)
            .map_err(|e| RepositoryError::Query(format!("invalid execution_path JSON: {e}")))?;
        let context = serde_json::from_str(&self.context)
            .map_err(|e| RepositoryError::Query(format!("invalid context JSON: {e}")))?;

        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            contact_id: parse_uuid(&self.contact_id)?,
            status,
            current_node_id: self.current_node_id,
            execution_path,
            context,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
            last_error: self.last_error,
            wake_at: parse_opt_datetime(self.wake_at.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
        })
    }
}

struct ScheduleRow {
    id: String,
    workflow_id: String,
    organization_id: String,
    config: String,
    timezone: String,
    next_execution_at: Option<String>,
    max_executions: Option<i64>,
    executions_count: i64,
    is_active: bool,
    audience: String,
    trigger_node_id: Option<String>,
    last_executed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ScheduleRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            organization_id: row.try_get("organization_id")?,
            config: row.try_get("config")?,
            timezone: row.try_get("timezone")?,
            next_execution_at: row.try_get("next_execution_at")?,
            max_executions: row.try_get("max_executions")?,
            executions_count: row.try_get("executions_count")?,
            is_active: row.try_get("is_active")?,
            audience: row.try_get("audience")?,
            trigger_node_id: row.try_get("trigger_node_id")?,
            last_executed_at: row.try_get("last_executed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_schedule(self) -> Result<WorkflowSchedule, RepositoryError> {
        let config: ScheduleConfig = serde_json::from_str(&self.config)
            .map_err(|e| RepositoryError::Query(format!("invalid schedule config JSON: {e}")))?;
        let audience = serde_json::from_str(&self.audience)
            .map_err(|e| RepositoryError::Query(format!("invalid audience JSON: {e}")))?;

        Ok(WorkflowSchedule {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            config,
            timezone: self.timezone,
            next_execution_at: parse_opt_datetime(self.next_execution_at.as_deref())?,
            max_executions: self
                .max_executions
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
            executions_count: u32::try_from(self.executions_count).unwrap_or(u32::MAX),
            is_active: self.is_active,
            audience,
            trigger_node_id: self.trigger_node_id,
            last_executed_at: parse_opt_datetime(self.last_executed_at.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct RetryRow {
    execution_id: String,
    node_id: String,
    retry_count: i64,
    next_retry_at: String,
    last_error: String,
    created_at: String,
}

impl RetryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_retry_state(self) -> Result<RetryState, RepositoryError> {
        Ok(RetryState {
            execution_id: parse_uuid(&self.execution_id)?,
            node_id: self.node_id,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
            next_retry_at: parse_datetime(&self.next_retry_at)?,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// Fixed-width UTC timestamp, so text comparison in SQL orders correctly.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_opt_datetime(dt: Option<&DateTime<Utc>>) -> Option<String> {
    dt.map(format_datetime)
}

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

fn collect_executions(
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<WorkflowExecution>, RepositoryError> {
    rows.iter()
        .map(|row| {
            ExecutionRow::from_row(row)
                .map_err(query_err)?
                .into_execution()
        })
        .collect()
}

fn collect_schedules(
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
    rows.iter()
        .map(|row| ScheduleRow::from_row(row).map_err(query_err)?.into_schedule())
        .collect()
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition_json = to_json(workflow, "workflow")?;

        sqlx::query(
            r#"INSERT INTO workflows (id, organization_id, name, status, version, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 organization_id = excluded.organization_id,
                 name = excluded.name,
                 status = excluded.status,
                 version = excluded.version,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.organization_id.to_string())
        .bind(&workflow.name)
        .bind(workflow.status.to_string())
        .bind(i64::from(workflow.version))
        .bind(&definition_json)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_workflow()?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = match organization_id {
            Some(org) => {
                sqlx::query("SELECT definition FROM workflows WHERE organization_id = ? ORDER BY name ASC")
                    .bind(org.to_string())
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT definition FROM workflows ORDER BY name ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        rows.iter()
            .map(|row| WorkflowRow::from_row(row).map_err(query_err)?.into_workflow())
            .collect()
    }

    async fn set_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let result = sqlx::query(
            r#"UPDATE workflows SET
                 status = ?,
                 definition = json_set(definition, '$.status', ?, '$.updated_at', ?),
                 updated_at = ?
               WHERE id = ?"#,
        )
        .bind(status.to_string())
        .bind(status.to_string())
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
                 (id, workflow_id, organization_id, contact_id, status, current_node_id,
                  execution_path, context, retry_count, last_error, wake_at,
                  created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.organization_id.to_string())
        .bind(execution.contact_id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.current_node_id)
        .bind(to_json(&execution.execution_path, "execution_path")?)
        .bind(to_json(&execution.context, "context")?)
        .bind(i64::from(execution.retry_count))
        .bind(&execution.last_error)
        .bind(format_opt_datetime(execution.wake_at.as_ref()))
        .bind(format_datetime(&execution.created_at))
        .bind(format_datetime(&execution.updated_at))
        .bind(format_opt_datetime(execution.completed_at.as_ref()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn update_execution(
        &self,
        execution: &WorkflowExecution,
        expected: &ExecutionGuard,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
                 status = ?,
                 current_node_id = ?,
                 execution_path = ?,
                 context = ?,
                 retry_count = ?,
                 last_error = ?,
                 wake_at = ?,
                 updated_at = ?,
                 completed_at = ?
               WHERE id = ? AND status = ? AND updated_at = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_node_id)
        .bind(to_json(&execution.execution_path, "execution_path")?)
        .bind(to_json(&execution.context, "context")?)
        .bind(i64::from(execution.retry_count))
        .bind(&execution.last_error)
        .bind(format_opt_datetime(execution.wake_at.as_ref()))
        .bind(format_datetime(&execution.updated_at))
        .bind(format_opt_datetime(execution.completed_at.as_ref()))
        .bind(execution.id.to_string())
        .bind(expected.status.as_str())
        .bind(format_datetime(&expected.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        collect_executions(&rows)
    }

    async fn list_pending_executions(
        &self,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE status = 'pending' ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        collect_executions(&rows)
    }

    async fn list_due_waits(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE status = 'waiting' AND wake_at IS NOT NULL AND wake_at <= ?
               ORDER BY wake_at ASC LIMIT ?"#,
        )
        .bind(format_datetime(&now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        collect_executions(&rows)
    }

    async fn list_stalled_executions(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE status = 'running' AND updated_at < ?
               ORDER BY updated_at ASC LIMIT ?"#,
        )
        .bind(format_datetime(&before))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        collect_executions(&rows)
    }

    async fn list_stranded_retries(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT e.* FROM workflow_executions e
               LEFT JOIN retry_states r ON r.execution_id = e.id
               WHERE e.status = 'waiting_retry' AND e.updated_at < ? AND r.execution_id IS NULL
               ORDER BY e.updated_at ASC LIMIT ?"#,
        )
        .bind(format_datetime(&before))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        collect_executions(&rows)
    }

    async fn delete_terminal_executions(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let sql = format!(
            "DELETE FROM workflow_executions WHERE status IN {TERMINAL_STATUSES} AND COALESCE(completed_at, updated_at) < ?"
        );
        let result = sqlx::query(&sql)
            .bind(format_datetime(&before))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    async fn create_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_schedules
                 (id, workflow_id, organization_id, schedule_type, config, timezone,
                  next_execution_at, max_executions, executions_count, is_active, audience,
                  trigger_node_id, last_executed_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.workflow_id.to_string())
        .bind(schedule.organization_id.to_string())
        .bind(schedule.schedule_type().to_string())
        .bind(to_json(&schedule.config, "schedule config")?)
        .bind(&schedule.timezone)
        .bind(format_opt_datetime(schedule.next_execution_at.as_ref()))
        .bind(schedule.max_executions.map(i64::from))
        .bind(i64::from(schedule.executions_count))
        .bind(schedule.is_active)
        .bind(to_json(&schedule.audience, "audience")?)
        .bind(schedule.trigger_node_id.as_deref())
        .bind(format_opt_datetime(schedule.last_executed_at.as_ref()))
        .bind(format_datetime(&schedule.created_at))
        .bind(format_datetime(&schedule.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_schedule(&self, id: &Uuid) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = ScheduleRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_schedule()?))
            }
            None => Ok(None),
        }
    }

    async fn list_schedules(
        &self,
        workflow_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let rows = match workflow_id {
            Some(wf) => {
                sqlx::query("SELECT * FROM workflow_schedules WHERE workflow_id = ? ORDER BY created_at ASC")
                    .bind(wf.to_string())
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM workflow_schedules ORDER BY created_at ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        collect_schedules(&rows)
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT s.* FROM workflow_schedules s
               LEFT JOIN workflows w ON w.id = s.workflow_id
               WHERE s.is_active = 1 AND s.next_execution_at IS NOT NULL AND s.next_execution_at <= ?
                 AND (w.status IS NULL OR w.status NOT IN ('paused', 'draft'))
               ORDER BY s.next_execution_at ASC LIMIT ?"#,
        )
        .bind(format_datetime(&now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        collect_schedules(&rows)
    }

    async fn update_schedule(
        &self,
        schedule: &WorkflowSchedule,
        expected_next: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_schedules SET
                 config = ?,
                 timezone = ?,
                 next_execution_at = ?,
                 max_executions = ?,
                 executions_count = ?,
                 is_active = ?,
                 audience = ?,
                 trigger_node_id = ?,
                 last_executed_at = ?,
                 updated_at = ?
               WHERE id = ? AND next_execution_at IS ?"#,
        )
        .bind(to_json(&schedule.config, "schedule config")?)
        .bind(&schedule.timezone)
        .bind(format_opt_datetime(schedule.next_execution_at.as_ref()))
        .bind(schedule.max_executions.map(i64::from))
        .bind(i64::from(schedule.executions_count))
        .bind(schedule.is_active)
        .bind(to_json(&schedule.audience, "audience")?)
        .bind(schedule.trigger_node_id.as_deref())
        .bind(format_opt_datetime(schedule.last_executed_at.as_ref()))
        .bind(format_datetime(&schedule.updated_at))
        .bind(schedule.id.to_string())
        .bind(format_opt_datetime(expected_next.as_ref()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    // -----------------------------------------------------------------------
    // Retry states
    // -----------------------------------------------------------------------

    async fn save_retry_state(&self, state: &RetryState) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO retry_states (execution_id, node_id, retry_count, next_retry_at, last_error, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 node_id = excluded.node_id,
                 retry_count = excluded.retry_count,
                 next_retry_at = excluded.next_retry_at,
                 last_error = excluded.last_error"#,
        )
        .bind(state.execution_id.to_string())
        .bind(&state.node_id)
        .bind(i64::from(state.retry_count))
        .bind(format_datetime(&state.next_retry_at))
        .bind(&state.last_error)
        .bind(format_datetime(&state.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_retry_state(&self, execution_id: &Uuid) -> Result<Option<RetryState>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM retry_states WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = RetryRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_retry_state()?))
            }
            None => Ok(None),
        }
    }

    async fn list_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RetryState>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM retry_states WHERE next_retry_at <= ? ORDER BY next_retry_at ASC LIMIT ?",
        )
        .bind(format_datetime(&now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| RetryRow::from_row(row).map_err(query_err)?.into_retry_state())
            .collect()
    }

    async fn delete_retry_state(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM retry_states WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_orphaned_retry_states(&self) -> Result<u64, RepositoryError> {
        let sql = format!(
            r#"DELETE FROM retry_states WHERE execution_id NOT IN (
                 SELECT id FROM workflow_executions WHERE status NOT IN {TERMINAL_STATUSES}
               )"#
        );
        let result = sqlx::query(&sql)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
