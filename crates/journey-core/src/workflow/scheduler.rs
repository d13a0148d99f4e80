//! Schedule processing: fires due schedules and computes their next due time.
//!
//! Provides:
//! - Cron expression normalization (5-field, 6-field, and phrases such as
//!   "every 5 minutes" or "every day at 09:30")
//! - Timezone-aware next-fire computation for once/recurring/cron schedules
//! - `Scheduler::process_due_schedules`, which claims each due schedule with
//!   a conditional write before starting executions so concurrent ticks never
//!   fire the same occurrence twice
//!
//! Recurring minute/hour intervals add elapsed time. Day/week/month intervals
//! add calendar time in the schedule's timezone, so a daily 09:00 schedule
//! stays at 09:00 local across DST changes. Local times inside a DST gap are
//! shifted forward by the gap; ambiguous local times take the earlier instant.
//! Missed occurrences are skipped, never replayed.

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, Months, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use journey_types::schedule::{IntervalUnit, ScheduleConfig, WorkflowSchedule};
use journey_types::workflow::{Workflow, WorkflowStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointManager, resolve_trigger};

/// Upper bound on interval steps walked when catching up a recurring
/// schedule.
const MAX_CATCH_UP_STEPS: u32 = 100_000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("unknown timezone: '{0}'")]
    InvalidTimezone(String),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(String),
}

// ---------------------------------------------------------------------------
// Cron normalization
// ---------------------------------------------------------------------------

/// Normalize a cron expression or schedule phrase to a 6-field cron
/// expression (seconds first).
///
/// Accepted phrases (case-insensitive): "every minute", "every hour" /
/// "hourly", "every day" / "daily", "every day at HH:MM", and
/// "every N seconds|minutes|hours".
pub fn normalize_cron(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(trimmed.to_string());

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let looks_like_cron = fields
        .first()
        .is_some_and(|f| !f.chars().all(|c| c.is_ascii_alphabetic()));
    if looks_like_cron {
        return match fields.len() {
            5 => Ok(format!("0 {}", fields.join(" "))),
            6 => Ok(fields.join(" ")),
            _ => Err(invalid()),
        };
    }

    let lower = trimmed.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    match words.as_slice() {
        ["every", "minute"] | ["minutely"] => Ok("0 * * * * *".to_string()),
        ["every", "hour"] | ["hourly"] => Ok("0 0 * * * *".to_string()),
        ["every", "day"] | ["daily"] => Ok("0 0 0 * * *".to_string()),
        ["every", "day", "at", time] => {
            let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;
            let hour: u32 = hour.parse().map_err(|_| invalid())?;
            let minute: u32 = minute.parse().map_err(|_| invalid())?;
            if hour >= 24 || minute >= 60 {
                return Err(invalid());
            }
            Ok(format!("0 {minute} {hour} * * *"))
        }
        ["every", n, unit] => {
            let n: u32 = n.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

/// Parse a (possibly phrase-form) cron expression.
pub fn parse_cron(expression: &str) -> Result<croner::Cron, SchedulerError> {
    let normalized = normalize_cron(expression)?;
    normalized
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{expression}': {e}")))
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

// ---------------------------------------------------------------------------
// Next-fire computation
// ---------------------------------------------------------------------------

/// Resolve a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; nonexistent
/// times (DST spring-forward gap) are read on the pre-gap offset, which
/// lands them the gap's length later on the post-gap clock.
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let before = tz
                .from_local_datetime(&(local - Duration::hours(3)))
                .earliest()?;
            let offset = before.offset().fix();
            offset
                .from_local_datetime(&local)
                .single()
                .map(|t| t.with_timezone(&Utc))
        }
    }
}

/// The `k`-th occurrence of a recurring schedule counted from `anchor`.
fn nth_occurrence(
    tz: Tz,
    anchor: DateTime<Utc>,
    interval: u32,
    unit: IntervalUnit,
    k: u32,
) -> Option<DateTime<Utc>> {
    let steps = i64::from(interval) * i64::from(k);
    match unit {
        IntervalUnit::Minutes => anchor.checked_add_signed(Duration::try_minutes(steps)?),
        IntervalUnit::Hours => anchor.checked_add_signed(Duration::try_hours(steps)?),
        IntervalUnit::Days | IntervalUnit::Weeks => {
            let days = if unit == IntervalUnit::Weeks { steps * 7 } else { steps };
            let local = anchor.with_timezone(&tz).naive_local();
            resolve_local(tz, local.checked_add_signed(Duration::try_days(days)?)?)
        }
        IntervalUnit::Months => {
            let local = anchor.with_timezone(&tz).naive_local();
            let months = u32::try_from(steps).ok()?;
            resolve_local(tz, local.checked_add_months(Months::new(months))?)
        }
    }
}

fn approx_unit(unit: IntervalUnit) -> Duration {
    match unit {
        IntervalUnit::Minutes => Duration::minutes(1),
        IntervalUnit::Hours => Duration::hours(1),
        IntervalUnit::Days => Duration::days(1),
        IntervalUnit::Weeks => Duration::weeks(1),
        IntervalUnit::Months => Duration::days(31),
    }
}

/// First occurrence of a recurring schedule strictly after `after`.
pub fn next_recurring(
    tz: Tz,
    anchor: DateTime<Utc>,
    interval: u32,
    unit: IntervalUnit,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    if interval == 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be > 0".to_string(),
        ));
    }

    // Jump to just before `after`, then walk. Months are estimated at 31
    // days so the jump never passes an occurrence.
    let period = approx_unit(unit) * interval as i32;
    let elapsed = after - anchor;
    let mut k = if elapsed > Duration::zero() {
        let estimate = elapsed.num_seconds() / period.num_seconds().max(1) - 1;
        u32::try_from(estimate.max(1)).unwrap_or(u32::MAX)
    } else {
        1
    };

    for _ in 0..MAX_CATCH_UP_STEPS {
        let candidate = nth_occurrence(tz, anchor, interval, unit, k).ok_or_else(|| {
            SchedulerError::InvalidSchedule("recurring schedule overflowed".to_string())
        })?;
        if candidate > after {
            return Ok(candidate);
        }
        k = k.checked_add(1).ok_or_else(|| {
            SchedulerError::InvalidSchedule("recurring schedule overflowed".to_string())
        })?;
    }
    Err(SchedulerError::InvalidSchedule(format!(
        "no occurrence found within {MAX_CATCH_UP_STEPS} intervals"
    )))
}

/// First cron occurrence strictly after `after`, evaluated in `tz`.
pub fn next_cron(
    tz: Tz,
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let cron = parse_cron(expression)?;
    cron.find_next_occurrence(&after.with_timezone(&tz), false)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{expression}': {e}")))
}

/// The instant recurring occurrences are counted from.
fn recurring_anchor(schedule: &WorkflowSchedule) -> DateTime<Utc> {
    match &schedule.config {
        ScheduleConfig::Recurring {
            start_at: Some(start),
            ..
        } => *start,
        _ => schedule.created_at,
    }
}

/// Next due time after a fire at `now`. `None` for one-time schedules.
pub fn next_after_fire(
    schedule: &WorkflowSchedule,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SchedulerError> {
    let tz = parse_timezone(&schedule.timezone)?;
    match &schedule.config {
        ScheduleConfig::Once { .. } => Ok(None),
        ScheduleConfig::Recurring { interval, unit, .. } => {
            next_recurring(tz, recurring_anchor(schedule), *interval, *unit, now).map(Some)
        }
        ScheduleConfig::Cron { expression } => next_cron(tz, expression, now).map(Some),
    }
}

/// First due time of a newly created schedule.
pub fn initial_next_execution(
    config: &ScheduleConfig,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SchedulerError> {
    let tz = parse_timezone(timezone)?;
    match config {
        ScheduleConfig::Once { fire_at } => Ok(Some(*fire_at)),
        ScheduleConfig::Recurring {
            interval,
            unit,
            start_at,
        } => match start_at {
            Some(start) if *start > now => Ok(Some(*start)),
            Some(start) => next_recurring(tz, *start, *interval, *unit, now).map(Some),
            None => next_recurring(tz, now, *interval, *unit, now).map(Some),
        },
        ScheduleConfig::Cron { expression } => next_cron(tz, expression, now).map(Some),
    }
}

/// Build a validated, active schedule for `workflow`.
pub fn new_schedule(
    workflow: &Workflow,
    config: ScheduleConfig,
    timezone: &str,
    audience: Vec<Uuid>,
    max_executions: Option<u32>,
    now: DateTime<Utc>,
) -> Result<WorkflowSchedule, SchedulerError> {
    if audience.is_empty() {
        return Err(SchedulerError::InvalidSchedule(
            "schedule audience must name at least one contact".to_string(),
        ));
    }
    if max_executions == Some(0) {
        return Err(SchedulerError::InvalidSchedule(
            "max_executions must be > 0".to_string(),
        ));
    }
    let next_execution_at = initial_next_execution(&config, timezone, now)?;
    Ok(WorkflowSchedule {
        id: Uuid::now_v7(),
        workflow_id: workflow.id,
        organization_id: workflow.organization_id,
        config,
        timezone: timezone.to_string(),
        next_execution_at,
        max_executions,
        executions_count: 0,
        is_active: true,
        audience,
        trigger_node_id: None,
        last_executed_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// Point `schedule` at a specific trigger node of `workflow`.
pub fn with_trigger(
    mut schedule: WorkflowSchedule,
    workflow: &Workflow,
    trigger: &str,
) -> Result<WorkflowSchedule, SchedulerError> {
    let node_id = resolve_trigger(workflow, Some(trigger))
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
    schedule.trigger_node_id = Some(node_id);
    Ok(schedule)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// A per-item failure collected during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub id: Uuid,
    pub message: String,
}

/// Outcome of one `process_due_schedules` sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleSweep {
    /// Schedules claimed and fired.
    pub fired: usize,
    /// Executions created, in creation order.
    pub started: Vec<Uuid>,
    pub errors: Vec<ItemError>,
}

/// Fires due schedules.
pub struct Scheduler<R> {
    checkpoint: CheckpointManager<R>,
    batch_limit: u32,
}

impl<R: WorkflowRepository> Scheduler<R> {
    pub fn new(repo: Arc<R>, batch_limit: u32) -> Self {
        Self {
            checkpoint: CheckpointManager::new(repo),
            batch_limit,
        }
    }

    /// Fire every active schedule due at or before `now`.
    ///
    /// A failure on one schedule is recorded and the sweep moves on.
    pub async fn process_due_schedules(&self, now: DateTime<Utc>) -> ScheduleSweep {
        let mut sweep = ScheduleSweep::default();

        let due = match self
            .checkpoint
            .repo()
            .list_due_schedules(now, self.batch_limit)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "failed to list due schedules");
                sweep.errors.push(ItemError {
                    id: Uuid::nil(),
                    message: format!("list due schedules: {e}"),
                });
                return sweep;
            }
        };

        for schedule in due {
            let schedule_id = schedule.id;
            match self.fire(schedule, now, &mut sweep).await {
                Ok(true) => sweep.fired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(%schedule_id, error = %e, "schedule processing failed");
                    sweep.errors.push(ItemError {
                        id: schedule_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        if sweep.fired > 0 || !sweep.errors.is_empty() {
            tracing::info!(
                fired = sweep.fired,
                started = sweep.started.len(),
                errors = sweep.errors.len(),
                "due schedules processed"
            );
        }
        sweep
    }

    /// Claim and fire one schedule. Returns `false` when it was skipped or
    /// another processor claimed it first.
    async fn fire(
        &self,
        schedule: WorkflowSchedule,
        now: DateTime<Utc>,
        sweep: &mut ScheduleSweep,
    ) -> Result<bool, SchedulerError> {
        let repo = self.checkpoint.repo();
        let workflow = repo
            .get_workflow(&schedule.workflow_id)
            .await
            .map_err(|e| SchedulerError::Repository(e.to_string()))?;

        let workflow = match workflow {
            Some(w) if w.status == WorkflowStatus::Active => w,
            Some(w) if w.status == WorkflowStatus::Archived => {
                self.deactivate(&schedule, now, "workflow archived").await?;
                return Ok(false);
            }
            Some(w) => {
                tracing::debug!(
                    schedule_id = %schedule.id,
                    workflow_status = %w.status,
                    "workflow not active, schedule held"
                );
                return Ok(false);
            }
            None => {
                self.deactivate(&schedule, now, "workflow missing").await?;
                return Err(SchedulerError::WorkflowNotFound(schedule.workflow_id));
            }
        };

        if schedule.is_exhausted() {
            self.deactivate(&schedule, now, "max executions reached").await?;
            return Ok(false);
        }

        let next = match next_after_fire(&schedule, now) {
            Ok(next) => next,
            Err(e) => {
                self.deactivate(&schedule, now, "invalid configuration").await?;
                return Err(e);
            }
        };

        let expected = schedule.next_execution_at;
        let mut claimed = schedule;
        claimed.executions_count += 1;
        claimed.last_executed_at = Some(now);
        claimed.updated_at = now;
        claimed.next_execution_at = next;
        if next.is_none() || claimed.is_exhausted() {
            claimed.next_execution_at = None;
            claimed.is_active = false;
        }

        let won = repo
            .update_schedule(&claimed, expected)
            .await
            .map_err(|e| SchedulerError::Repository(e.to_string()))?;
        if !won {
            tracing::debug!(schedule_id = %claimed.id, "schedule already claimed by another tick");
            return Ok(false);
        }

        if claimed.audience.is_empty() {
            tracing::warn!(schedule_id = %claimed.id, "schedule fired with an empty audience");
        }
        for contact_id in &claimed.audience {
            match self
                .checkpoint
                .start_execution(&workflow, *contact_id, claimed.trigger_node_id.as_deref(), now)
                .await
            {
                Ok(execution) => sweep.started.push(execution.id),
                Err(e) => sweep.errors.push(ItemError {
                    id: claimed.id,
                    message: format!("start execution for contact {contact_id}: {e}"),
                }),
            }
        }

        tracing::info!(
            schedule_id = %claimed.id,
            workflow_id = %claimed.workflow_id,
            executions_count = claimed.executions_count,
            next_execution_at = ?claimed.next_execution_at,
            active = claimed.is_active,
            "schedule fired"
        );
        Ok(true)
    }

    async fn deactivate(
        &self,
        schedule: &WorkflowSchedule,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SchedulerError> {
        let mut inactive = schedule.clone();
        inactive.is_active = false;
        inactive.next_execution_at = None;
        inactive.updated_at = now;
        self.checkpoint
            .repo()
            .update_schedule(&inactive, schedule.next_execution_at)
            .await
            .map_err(|e| SchedulerError::Repository(e.to_string()))?;
        tracing::info!(schedule_id = %schedule.id, reason, "schedule deactivated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{InMemoryRepository, ts, workflow};
    use journey_types::execution::ExecutionStatus;
    use serde_json::json;

    fn ny() -> Tz {
        parse_timezone("America/New_York").unwrap()
    }

    // -------------------------------------------------------------------
    // normalize_cron
    // -------------------------------------------------------------------

    #[test]
    fn test_normalize_5field_prepends_seconds() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("30 */5 * * * *").unwrap(), "30 */5 * * * *");
    }

    #[test]
    fn test_normalize_phrases() {
        assert_eq!(normalize_cron("every minute").unwrap(), "0 * * * * *");
        assert_eq!(normalize_cron("Hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_cron("every 2 hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_cron("every 1 minute").unwrap(), "0 */1 * * * *");
        assert_eq!(normalize_cron("every day at 09:30").unwrap(), "0 30 9 * * *");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_cron("run whenever").is_err());
        assert!(normalize_cron("every 0 minutes").is_err());
        assert!(normalize_cron("every day at 25:00").is_err());
        assert!(normalize_cron("* * *").is_err());
    }

    // -------------------------------------------------------------------
    // Recurring arithmetic
    // -------------------------------------------------------------------

    #[test]
    fn test_daily_keeps_local_time_on_dst_day() {
        // 09:00 EDT on the spring-forward day.
        let fired = ts("2026-03-08T13:00:00Z");
        let next = next_recurring(ny(), fired, 1, IntervalUnit::Days, fired).unwrap();
        assert_eq!(next, ts("2026-03-09T13:00:00Z"));
        assert_eq!(next.with_timezone(&ny()).format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn test_daily_across_spring_forward_is_23_hours() {
        // 09:00 EST the day before the change.
        let fired = ts("2026-03-07T14:00:00Z");
        let next = next_recurring(ny(), fired, 1, IntervalUnit::Days, fired).unwrap();
        assert_eq!(next, ts("2026-03-08T13:00:00Z"));
        assert_eq!(next - fired, Duration::hours(23));
    }

    #[test]
    fn test_hours_add_elapsed_time_across_dst() {
        let fired = ts("2026-03-08T06:00:00Z"); // 01:00 EST
        let next = next_recurring(ny(), fired, 1, IntervalUnit::Hours, fired).unwrap();
        assert_eq!(next, ts("2026-03-08T07:00:00Z")); // 03:00 EDT
    }

    #[test]
    fn test_gap_time_shifts_forward_then_returns() {
        // Daily at 02:30 local; 2026-03-08 02:30 does not exist in New York.
        let anchor = ts("2026-03-07T07:30:00Z"); // 02:30 EST
        let on_gap = next_recurring(ny(), anchor, 1, IntervalUnit::Days, anchor).unwrap();
        assert_eq!(on_gap, ts("2026-03-08T07:30:00Z")); // 03:30 EDT
        let after = next_recurring(ny(), anchor, 1, IntervalUnit::Days, on_gap).unwrap();
        assert_eq!(after, ts("2026-03-09T06:30:00Z")); // 02:30 EDT again
    }

    #[test]
    fn test_ambiguous_time_takes_earliest() {
        let local = chrono::NaiveDate::from_ymd_opt(2026, 11, 1)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        assert_eq!(resolve_local(ny(), local), Some(ts("2026-11-01T05:30:00Z")));
    }

    #[test]
    fn test_monthly_clamps_without_drifting() {
        let tz = parse_timezone("UTC").unwrap();
        let anchor = ts("2026-01-31T10:00:00Z");
        let feb = next_recurring(tz, anchor, 1, IntervalUnit::Months, anchor).unwrap();
        assert_eq!(feb, ts("2026-02-28T10:00:00Z"));
        let mar = next_recurring(tz, anchor, 1, IntervalUnit::Months, feb).unwrap();
        assert_eq!(mar, ts("2026-03-31T10:00:00Z"));
    }

    #[test]
    fn test_missed_periods_are_skipped() {
        let tz = parse_timezone("UTC").unwrap();
        let anchor = ts("2026-01-01T00:00:00Z");
        let now = ts("2026-01-01T01:07:00Z");
        let next = next_recurring(tz, anchor, 15, IntervalUnit::Minutes, now).unwrap();
        assert_eq!(next, ts("2026-01-01T01:15:00Z"));

        let weekly = next_recurring(tz, anchor, 1, IntervalUnit::Weeks, ts("2026-03-01T00:00:00Z")).unwrap();
        assert_eq!(weekly, ts("2026-03-05T00:00:00Z"));
    }

    #[test]
    fn test_cron_evaluated_in_timezone() {
        let next = next_cron(ny(), "0 9 * * *", ts("2026-03-07T15:00:00Z")).unwrap();
        assert_eq!(next, ts("2026-03-08T13:00:00Z"));
        let phrase = next_cron(ny(), "every day at 09:00", ts("2026-03-08T13:00:00Z")).unwrap();
        assert_eq!(phrase, ts("2026-03-09T13:00:00Z"));
    }

    #[test]
    fn test_invalid_timezone() {
        let err = initial_next_execution(
            &ScheduleConfig::Cron { expression: "0 9 * * *".into() },
            "Mars/Olympus",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimezone(_)));
    }

    #[test]
    fn test_initial_next_for_recurring_start_in_future() {
        let now = ts("2026-01-01T00:00:00Z");
        let start = ts("2026-01-05T09:00:00Z");
        let config = ScheduleConfig::Recurring {
            interval: 1,
            unit: IntervalUnit::Days,
            start_at: Some(start),
        };
        assert_eq!(initial_next_execution(&config, "UTC", now).unwrap(), Some(start));
    }

    // -------------------------------------------------------------------
    // process_due_schedules
    // -------------------------------------------------------------------

    fn journey() -> Workflow {
        workflow(
            json!([
                {"id": "start", "type": "trigger"},
                {"id": "hello", "type": "message", "content": "hi"}
            ]),
            json!([{"source_node_id": "start", "target_node_id": "hello"}]),
        )
    }

    async fn setup(
        config: ScheduleConfig,
        audience: usize,
        max_executions: Option<u32>,
        created: DateTime<Utc>,
    ) -> (Arc<InMemoryRepository>, Workflow, WorkflowSchedule) {
        let repo = Arc::new(InMemoryRepository::default());
        let wf = journey();
        repo.save_workflow(&wf).await.unwrap();
        let contacts = (0..audience).map(|_| Uuid::now_v7()).collect();
        let schedule =
            new_schedule(&wf, config, "America/New_York", contacts, max_executions, created).unwrap();
        repo.create_schedule(&schedule).await.unwrap();
        (repo, wf, schedule)
    }

    #[tokio::test]
    async fn test_once_schedule_fires_once() {
        let fire_at = ts("2026-04-01T14:00:00Z");
        let (repo, _, schedule) =
            setup(ScheduleConfig::Once { fire_at }, 2, None, ts("2026-03-01T00:00:00Z")).await;
        let scheduler = Scheduler::new(repo.clone(), 100);

        let early = scheduler.process_due_schedules(fire_at - Duration::minutes(1)).await;
        assert_eq!(early.fired, 0);

        let sweep = scheduler.process_due_schedules(fire_at).await;
        assert_eq!(sweep.fired, 1);
        assert_eq!(sweep.started.len(), 2);
        assert!(sweep.errors.is_empty());

        let stored = repo.schedule(&schedule.id);
        assert!(!stored.is_active);
        assert_eq!(stored.next_execution_at, None);
        assert_eq!(stored.executions_count, 1);
        for id in &sweep.started {
            assert_eq!(repo.execution(id).status, ExecutionStatus::Pending);
        }

        let again = scheduler.process_due_schedules(fire_at + Duration::hours(1)).await;
        assert_eq!(again.fired, 0);
    }

    #[tokio::test]
    async fn test_recurring_schedule_advances_and_caps() {
        let start = ts("2026-03-07T14:00:00Z"); // 09:00 EST
        let config = ScheduleConfig::Recurring {
            interval: 1,
            unit: IntervalUnit::Days,
            start_at: Some(start),
        };
        let (repo, _, schedule) = setup(config, 1, Some(2), ts("2026-03-01T00:00:00Z")).await;
        let scheduler = Scheduler::new(repo.clone(), 100);

        let sweep = scheduler.process_due_schedules(start).await;
        assert_eq!(sweep.fired, 1);
        let stored = repo.schedule(&schedule.id);
        assert_eq!(stored.next_execution_at, Some(ts("2026-03-08T13:00:00Z")));
        assert_eq!(stored.executions_count, 1);
        assert!(stored.is_active);

        let sweep = scheduler.process_due_schedules(ts("2026-03-08T13:00:30Z")).await;
        assert_eq!(sweep.fired, 1);
        let stored = repo.schedule(&schedule.id);
        assert_eq!(stored.executions_count, 2);
        assert!(!stored.is_active);
        assert_eq!(stored.next_execution_at, None);
    }

    #[tokio::test]
    async fn test_paused_workflow_holds_schedule() {
        let fire_at = ts("2026-04-01T14:00:00Z");
        let (repo, wf, schedule) =
            setup(ScheduleConfig::Once { fire_at }, 1, None, ts("2026-03-01T00:00:00Z")).await;
        repo.set_workflow_status(&wf.id, WorkflowStatus::Paused).await.unwrap();
        let scheduler = Scheduler::new(repo.clone(), 100);

        let sweep = scheduler.process_due_schedules(fire_at).await;
        assert_eq!(sweep.fired, 0);
        assert!(repo.schedule(&schedule.id).is_active);

        repo.set_workflow_status(&wf.id, WorkflowStatus::Active).await.unwrap();
        let sweep = scheduler.process_due_schedules(fire_at + Duration::hours(1)).await;
        assert_eq!(sweep.fired, 1);
    }

    #[tokio::test]
    async fn test_held_schedules_do_not_starve_active_ones() {
        let held_at = ts("2026-04-01T10:00:00Z");
        let (repo, paused_wf, held) =
            setup(ScheduleConfig::Once { fire_at: held_at }, 1, None, ts("2026-03-01T00:00:00Z")).await;
        repo.set_workflow_status(&paused_wf.id, WorkflowStatus::Paused).await.unwrap();

        let mut active_wf = journey();
        active_wf.id = Uuid::now_v7();
        repo.save_workflow(&active_wf).await.unwrap();
        let fire_at = ts("2026-04-01T11:00:00Z");
        let active = new_schedule(
            &active_wf,
            ScheduleConfig::Once { fire_at },
            "UTC",
            vec![Uuid::now_v7()],
            None,
            ts("2026-03-01T00:00:00Z"),
        )
        .unwrap();
        repo.create_schedule(&active).await.unwrap();

        let scheduler = Scheduler::new(repo.clone(), 1);
        let sweep = scheduler.process_due_schedules(fire_at).await;
        assert_eq!(sweep.fired, 1);
        assert_eq!(repo.list_executions(&active_wf.id, 10).await.unwrap().len(), 1);
        assert!(!repo.schedule(&active.id).is_active);
        assert!(repo.schedule(&held.id).is_active);
    }

    #[tokio::test]
    async fn test_archived_workflow_deactivates_schedule() {
        let fire_at = ts("2026-04-01T14:00:00Z");
        let (repo, wf, schedule) =
            setup(ScheduleConfig::Once { fire_at }, 1, None, ts("2026-03-01T00:00:00Z")).await;
        repo.set_workflow_status(&wf.id, WorkflowStatus::Archived).await.unwrap();
        let sweep = Scheduler::new(repo.clone(), 100).process_due_schedules(fire_at).await;
        assert_eq!(sweep.fired, 0);
        assert!(!repo.schedule(&schedule.id).is_active);
    }

    #[tokio::test]
    async fn test_bad_schedule_does_not_block_others() {
        let fire_at = ts("2026-04-01T14:00:00Z");
        let (repo, wf, good) =
            setup(ScheduleConfig::Once { fire_at }, 1, None, ts("2026-03-01T00:00:00Z")).await;
        let mut broken = good.clone();
        broken.id = Uuid::now_v7();
        broken.config = ScheduleConfig::Cron { expression: "0 9 * * *".into() };
        broken.timezone = "Nowhere/City".into();
        broken.next_execution_at = Some(fire_at - Duration::minutes(5));
        repo.create_schedule(&broken).await.unwrap();

        let sweep = Scheduler::new(repo.clone(), 100).process_due_schedules(fire_at).await;
        assert_eq!(sweep.fired, 1);
        assert_eq!(sweep.errors.len(), 1);
        assert_eq!(sweep.errors[0].id, broken.id);
        assert!(!repo.schedule(&broken.id).is_active);
        assert_eq!(repo.list_executions(&wf.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sweeps_fire_once() {
        let fire_at = ts("2026-04-01T14:00:00Z");
        let (repo, wf, _) =
            setup(ScheduleConfig::Once { fire_at }, 3, None, ts("2026-03-01T00:00:00Z")).await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let scheduler = Scheduler::new(repo.clone(), 100);
            tasks.spawn(async move { scheduler.process_due_schedules(fire_at).await });
        }
        let mut fired = 0;
        while let Some(sweep) = tasks.join_next().await {
            fired += sweep.unwrap().fired;
        }
        assert_eq!(fired, 1);
        assert_eq!(repo.list_executions(&wf.id, 100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_starts_at_its_trigger() {
        let repo = Arc::new(InMemoryRepository::default());
        let wf = workflow(
            json!([
                {"id": "signup", "type": "trigger"},
                {"id": "welcome", "type": "message", "content": "welcome"},
                {"id": "weekly", "type": "trigger"},
                {"id": "digest", "type": "message", "content": "digest"}
            ]),
            json!([
                {"source_node_id": "signup", "target_node_id": "welcome"},
                {"source_node_id": "weekly", "target_node_id": "digest"}
            ]),
        );
        repo.save_workflow(&wf).await.unwrap();
        let fire_at = ts("2026-04-01T14:00:00Z");
        let schedule = new_schedule(
            &wf,
            ScheduleConfig::Once { fire_at },
            "UTC",
            vec![Uuid::now_v7()],
            None,
            ts("2026-03-01T00:00:00Z"),
        )
        .unwrap();
        let schedule = with_trigger(schedule, &wf, "weekly").unwrap();
        repo.create_schedule(&schedule).await.unwrap();

        let sweep = Scheduler::new(repo.clone(), 10).process_due_schedules(fire_at).await;
        assert_eq!(sweep.started.len(), 1);
        let exec = repo.execution(&sweep.started[0]);
        assert_eq!(exec.current_node_id.as_deref(), Some("weekly"));

        let err = with_trigger(schedule, &wf, "digest").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }

    #[test]
    fn test_new_schedule_requires_audience() {
        let wf = journey();
        let err = new_schedule(
            &wf,
            ScheduleConfig::Once { fire_at: Utc::now() },
            "UTC",
            Vec::new(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("audience"));
    }
}
