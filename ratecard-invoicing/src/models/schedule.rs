//! Recurring schedule model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How often a schedule produces an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing schedule for a regular client.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurringSchedule {
    pub schedule_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_due: NaiveDate,
    pub active: bool,
    pub template: String,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[sqlx(skip)]
    pub lines: Vec<ScheduleLine>,
}

/// Template line: which entry to bill and how much of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScheduleLine {
    pub schedule_id: Uuid,
    pub rate_entry_id: Uuid,
    pub quantity: Decimal,
    pub description: Option<String>,
    pub ordinal: i32,
}

/// Input for one template line.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleLineInput {
    pub rate_entry_id: Uuid,
    pub quantity: Decimal,
    pub description: Option<String>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSchedule {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub template: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<ScheduleLineInput>,
}

/// Move a schedule forward, applied only if `next_due` still equals
/// `expected_next_due`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleAdvance {
    pub schedule_id: Uuid,
    pub expected_next_due: NaiveDate,
    pub next_due: NaiveDate,
    pub active: bool,
}
