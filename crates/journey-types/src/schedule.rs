//! Schedule types: time-trigger bindings that start new executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-based trigger for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    /// Type-specific configuration, tagged by `type`.
    pub config: ScheduleConfig,
    /// IANA timezone name used for calendar arithmetic (e.g. "America/New_York").
    pub timezone: String,
    /// Next due time. `None` once the schedule can no longer fire.
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u32>,
    #[serde(default)]
    pub executions_count: u32,
    pub is_active: bool,
    /// Contacts that each get an execution when the schedule fires.
    #[serde(default)]
    pub audience: Vec<Uuid>,
    /// Trigger node the executions start from. `None` selects the
    /// workflow's first trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSchedule {
    pub fn schedule_type(&self) -> ScheduleType {
        self.config.schedule_type()
    }

    /// Whether the execution cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_executions
            .is_some_and(|max| self.executions_count >= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Recurring,
    Cron,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleType::Once => "once",
            ScheduleType::Recurring => "recurring",
            ScheduleType::Cron => "cron",
        };
        write!(f, "{s}")
    }
}

/// Schedule configuration payload.
///
/// ```yaml
/// type: recurring
/// interval: 1
/// unit: days
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Fire exactly once at `fire_at`.
    Once { fire_at: DateTime<Utc> },
    /// Fire every `interval` `unit`s, starting at `start_at` (or one interval
    /// after creation).
    Recurring {
        interval: u32,
        unit: IntervalUnit,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_at: Option<DateTime<Utc>>,
    },
    /// Fire on a cron expression (5-field or 6-field with seconds).
    Cron { expression: String },
}

impl ScheduleConfig {
    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            ScheduleConfig::Once { .. } => ScheduleType::Once,
            ScheduleConfig::Recurring { .. } => ScheduleType::Recurring,
            ScheduleConfig::Cron { .. } => ScheduleType::Cron,
        }
    }
}

/// Unit of a recurring interval.
///
/// Minutes and hours add elapsed time; days, weeks and months add calendar
/// time in the schedule's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl std::str::FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('s') {
            "minute" => Ok(IntervalUnit::Minutes),
            "hour" => Ok(IntervalUnit::Hours),
            "day" => Ok(IntervalUnit::Days),
            "week" => Ok(IntervalUnit::Weeks),
            "month" => Ok(IntervalUnit::Months),
            other => Err(format!("unknown interval unit: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_config_tagged_json() {
        let cfg = ScheduleConfig::Recurring {
            interval: 1,
            unit: IntervalUnit::Days,
            start_at: None,
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["type"], "recurring");
        assert_eq!(json["unit"], "days");
        assert!(json.get("start_at").is_none());
        assert_eq!(cfg.schedule_type(), ScheduleType::Recurring);

        let cron: ScheduleConfig =
            serde_json::from_str(r#"{"type":"cron","expression":"0 9 * * 1-5"}"#).unwrap();
        assert_eq!(cron.schedule_type(), ScheduleType::Cron);
    }

    #[test]
    fn test_interval_unit_parse_accepts_singular_and_plural() {
        assert_eq!("day".parse::<IntervalUnit>().unwrap(), IntervalUnit::Days);
        assert_eq!("hours".parse::<IntervalUnit>().unwrap(), IntervalUnit::Hours);
        assert!("fortnight".parse::<IntervalUnit>().is_err());
    }

    #[test]
    fn test_is_exhausted() {
        let now = Utc::now();
        let mut schedule = WorkflowSchedule {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            config: ScheduleConfig::Once { fire_at: now },
            timezone: "UTC".to_string(),
            next_execution_at: Some(now),
            max_executions: Some(2),
            executions_count: 1,
            is_active: true,
            audience: vec![],
            trigger_node_id: None,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!schedule.is_exhausted());
        schedule.executions_count = 2;
        assert!(schedule.is_exhausted());
        schedule.max_executions = None;
        assert!(!schedule.is_exhausted());
    }
}
