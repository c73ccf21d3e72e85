use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::time::{hhmm, minutes_of_day, time_from_minutes};

pub const DEFAULT_SLOT_DURATION: i32 = 30;
pub const MIN_SLOT_DURATION: i32 = 10;
pub const MAX_SLOT_DURATION: i32 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn from_date(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "MONDAY",
            DayOfWeek::Tuesday => "TUESDAY",
            DayOfWeek::Wednesday => "WEDNESDAY",
            DayOfWeek::Thursday => "THURSDAY",
            DayOfWeek::Friday => "FRIDAY",
            DayOfWeek::Saturday => "SATURDAY",
            DayOfWeek::Sunday => "SUNDAY",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A doctor's working window on one weekday.
///
/// At most one active row exists per `(doctor_id, day_of_week)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub slot_duration: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Slot start times: from `start_time`, every `slot_duration` minutes,
    /// strictly before `end_time`. The window need not divide evenly.
    pub fn slot_times(&self) -> Vec<NaiveTime> {
        let step = self.slot_duration.max(1) as u32;
        let end = minutes_of_day(&self.end_time);

        (minutes_of_day(&self.start_time)..end)
            .step_by(step as usize)
            .filter_map(time_from_minutes)
            .collect()
    }

    /// Whether `time` falls in `[start_time, end_time)`.
    pub fn covers(&self, time: &NaiveTime) -> bool {
        *time >= self.start_time && *time < self.end_time
    }

    /// Whether `time` is reachable from `start_time` in whole slot steps.
    pub fn is_on_grid(&self, time: &NaiveTime) -> bool {
        let offset = minutes_of_day(time) as i64 - minutes_of_day(&self.start_time) as i64;
        offset >= 0 && offset % self.slot_duration.max(1) as i64 == 0
    }
}

fn default_slot_duration() -> i32 {
    DEFAULT_SLOT_DURATION
}

/// Desired state of one weekday, as submitted by an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    #[serde(alias = "dayOfWeek")]
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm", alias = "startTime")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm", alias = "endTime")]
    pub end_time: NaiveTime,
    #[serde(default = "default_slot_duration", alias = "slotDuration")]
    pub slot_duration: i32,
}

/// Result of diffing a desired schedule set against stored rows.
///
/// Applied by the store as one unit: every `upserts` weekday ends up with
/// exactly one active row, every `deactivate` weekday with none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulePlan {
    pub upserts: Vec<ScheduleEntry>,
    pub deactivate: Vec<DayOfWeek>,
}

impl SchedulePlan {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deactivate.is_empty()
    }
}
