//! SQLite goal sink: persists goal-completion events for reporting.

use journey_core::repository::goal::GoalSink;
use journey_types::error::RepositoryError;
use journey_types::workflow::GoalEvent;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::workflow::{format_datetime, query_err};

/// Appends goal events to the `goal_events` table.
pub struct SqliteGoalSink {
    pool: DatabasePool,
}

impl SqliteGoalSink {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Goal events of a workflow, newest first.
    pub async fn list_goal_events(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<GoalEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event FROM goal_events WHERE workflow_id = ? ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let event: String = row.try_get("event").map_err(query_err)?;
                serde_json::from_str(&event)
                    .map_err(|e| RepositoryError::Query(format!("invalid goal event JSON: {e}")))
            })
            .collect()
    }
}

impl GoalSink for SqliteGoalSink {
    async fn record_goal(&self, execution_id: &Uuid, event: &GoalEvent) -> Result<(), RepositoryError> {
        let event_json = serde_json::to_string(event)
            .map_err(|e| RepositoryError::Query(format!("serialize goal event: {e}")))?;
        let goal_type = serde_json::to_value(event.goal_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        // Re-recording the same event is a no-op.
        sqlx::query(
            r#"INSERT INTO goal_events
                 (id, execution_id, workflow_id, organization_id, contact_id, node_id, goal_type, event, occurred_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(event.id.to_string())
        .bind(execution_id.to_string())
        .bind(event.workflow_id.to_string())
        .bind(event.organization_id.to_string())
        .bind(event.contact_id.to_string())
        .bind(&event.node_id)
        .bind(goal_type)
        .bind(&event_json)
        .bind(format_datetime(&event.occurred_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use journey_types::workflow::GoalType;

    #[tokio::test]
    async fn test_record_and_list_goal_events() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let sink = SqliteGoalSink::new(DatabasePool::new(&url).await.unwrap());

        let workflow_id = Uuid::now_v7();
        let execution_id = Uuid::now_v7();
        let event = GoalEvent {
            id: Uuid::now_v7(),
            execution_id,
            workflow_id,
            organization_id: Uuid::now_v7(),
            node_id: "purchased".into(),
            contact_id: Uuid::now_v7(),
            goal_type: GoalType::Revenue,
            name: Some("first order".into()),
            revenue: Some(49.5),
            metrics: Default::default(),
            occurred_at: Utc::now(),
        };
        sink.record_goal(&execution_id, &event).await.unwrap();
        sink.record_goal(&execution_id, &event).await.unwrap();

        let events = sink.list_goal_events(&workflow_id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].revenue, Some(49.5));
        assert_eq!(events[0].goal_type, GoalType::Revenue);
    }
}
