//! Date arithmetic and state for recurring schedules.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

use crate::models::{Frequency, RecurringSchedule, ScheduleAdvance};

/// Monthly and quarterly occurrences never land past this day of the month.
pub const MAX_MONTHLY_DAY: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Next occurrence is in the future.
    Pending,
    Due,
    /// Deactivated or past its end date.
    Exhausted,
}

/// Occurrence after `from`, or `None` if it would fall outside chrono's range.
pub fn next_occurrence(frequency: Frequency, from: NaiveDate) -> Option<NaiveDate> {
    match frequency {
        Frequency::Weekly => from.checked_add_days(Days::new(7)),
        Frequency::Biweekly => from.checked_add_days(Days::new(14)),
        Frequency::Monthly => add_months_clamped(from, 1),
        Frequency::Quarterly => add_months_clamped(from, 3),
        // Feb 29 becomes Feb 28 in non-leap years.
        Frequency::Yearly => from.checked_add_months(Months::new(12)),
    }
}

fn add_months_clamped(from: NaiveDate, months: u32) -> Option<NaiveDate> {
    let months0 = from.month0() + months;
    let year = from.year() + (months0 / 12) as i32;
    let month = months0 % 12 + 1;
    NaiveDate::from_ymd_opt(year, month, from.day().min(MAX_MONTHLY_DAY))
}

pub fn schedule_state(schedule: &RecurringSchedule, today: NaiveDate) -> ScheduleState {
    if !schedule.active || is_past_end(schedule.end_date, schedule.next_due) {
        ScheduleState::Exhausted
    } else if schedule.next_due <= today {
        ScheduleState::Due
    } else {
        ScheduleState::Pending
    }
}

fn is_past_end(end_date: Option<NaiveDate>, date: NaiveDate) -> bool {
    end_date.is_some_and(|end| date > end)
}

/// Advance applied after materializing the occurrence at `next_due`.
/// The schedule deactivates once the following occurrence passes its end date.
pub fn advance(schedule: &RecurringSchedule) -> ScheduleAdvance {
    let following = next_occurrence(schedule.frequency, schedule.next_due);
    let active = following.is_some_and(|next| !is_past_end(schedule.end_date, next));

    ScheduleAdvance {
        schedule_id: schedule.schedule_id,
        expected_next_due: schedule.next_due,
        next_due: following.unwrap_or(schedule.next_due),
        active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule(frequency: Frequency, next_due: NaiveDate, end_date: Option<NaiveDate>) -> RecurringSchedule {
        RecurringSchedule {
            schedule_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            frequency,
            start_date: next_due,
            end_date,
            next_due,
            active: true,
            template: "modern".to_string(),
            notes: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
            lines: vec![],
        }
    }

    #[test]
    fn weekly_and_biweekly_add_days() {
        assert_eq!(next_occurrence(Frequency::Weekly, date(2024, 12, 28)), Some(date(2025, 1, 4)));
        assert_eq!(next_occurrence(Frequency::Biweekly, date(2024, 2, 20)), Some(date(2024, 3, 5)));
    }

    #[test]
    fn monthly_clamps_day_to_28() {
        assert_eq!(next_occurrence(Frequency::Monthly, date(2024, 1, 31)), Some(date(2024, 2, 28)));
        assert_eq!(next_occurrence(Frequency::Monthly, date(2023, 1, 29)), Some(date(2023, 2, 28)));
        assert_eq!(next_occurrence(Frequency::Monthly, date(2024, 4, 15)), Some(date(2024, 5, 15)));
    }

    #[test]
    fn monthly_rolls_over_year() {
        assert_eq!(next_occurrence(Frequency::Monthly, date(2024, 12, 10)), Some(date(2025, 1, 10)));
        assert_eq!(next_occurrence(Frequency::Monthly, date(2024, 12, 31)), Some(date(2025, 1, 28)));
    }

    #[test]
    fn quarterly_adds_three_months() {
        assert_eq!(next_occurrence(Frequency::Quarterly, date(2024, 11, 30)), Some(date(2025, 2, 28)));
        assert_eq!(next_occurrence(Frequency::Quarterly, date(2024, 10, 5)), Some(date(2025, 1, 5)));
        assert_eq!(next_occurrence(Frequency::Quarterly, date(2024, 1, 5)), Some(date(2024, 4, 5)));
    }

    #[test]
    fn yearly_keeps_month_and_day() {
        assert_eq!(next_occurrence(Frequency::Yearly, date(2024, 7, 31)), Some(date(2025, 7, 31)));
        assert_eq!(next_occurrence(Frequency::Yearly, date(2024, 2, 29)), Some(date(2025, 2, 28)));
    }

    #[test]
    fn state_follows_dates_and_flag() {
        let today = date(2024, 5, 1);
        assert_eq!(schedule_state(&schedule(Frequency::Monthly, date(2024, 5, 1), None), today), ScheduleState::Due);
        assert_eq!(schedule_state(&schedule(Frequency::Monthly, date(2024, 4, 1), None), today), ScheduleState::Due);
        assert_eq!(schedule_state(&schedule(Frequency::Monthly, date(2024, 5, 2), None), today), ScheduleState::Pending);

        let ended = schedule(Frequency::Monthly, date(2024, 4, 1), Some(date(2024, 3, 31)));
        assert_eq!(schedule_state(&ended, today), ScheduleState::Exhausted);

        let mut inactive = schedule(Frequency::Monthly, date(2024, 4, 1), None);
        inactive.active = false;
        assert_eq!(schedule_state(&inactive, today), ScheduleState::Exhausted);
    }

    #[test]
    fn advance_moves_next_due_forward() {
        let s = schedule(Frequency::Monthly, date(2024, 1, 31), None);
        let adv = advance(&s);
        assert_eq!(adv.schedule_id, s.schedule_id);
        assert_eq!(adv.expected_next_due, date(2024, 1, 31));
        assert_eq!(adv.next_due, date(2024, 2, 28));
        assert!(adv.active);
    }

    #[test]
    fn advance_past_end_date_exhausts() {
        let s = schedule(Frequency::Weekly, date(2024, 3, 1), Some(date(2024, 3, 5)));
        let adv = advance(&s);
        assert_eq!(adv.next_due, date(2024, 3, 8));
        assert!(!adv.active);

        // Landing exactly on the end date keeps the schedule alive.
        let s = schedule(Frequency::Weekly, date(2024, 3, 1), Some(date(2024, 3, 8)));
        assert!(advance(&s).active);
    }
}
