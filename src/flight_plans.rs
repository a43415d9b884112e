use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinates::Point;
use crate::flight_times::DEFAULT_PLANNED_DURATION_MINUTES;

pub const MAX_FLIGHT_ID_LEN: usize = 50;
pub const MAX_SID_LEN: usize = 20;
pub const MAX_REG_NUMBER_LEN: usize = 50;
pub const MAX_DRONE_TYPE_LEN: usize = 50;

pub const DEFAULT_MIN_ALTITUDE: i32 = 0;
pub const DEFAULT_MAX_ALTITUDE: i32 = 100;
pub const DEFAULT_DRONE_TYPE: &str = "BLA";

/// Sentinel flight identifier meaning "unidentified aircraft"
pub const UNIDENTIFIED_FLIGHT_ID: &str = "ZZZZZ";

/// Cap a value at `max` characters, replacing the tail with `...` when it overflows.
pub fn truncate_with_ellipsis(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = value.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// One spreadsheet row, before any parsing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based sheet row, header included
    pub row_number: usize,
    pub plan_message: String,
    pub departure_message: String,
    pub arrival_message: String,
}

impl RawRecord {
    pub fn is_blank(&self) -> bool {
        self.plan_message.trim().is_empty()
            && self.departure_message.trim().is_empty()
            && self.arrival_message.trim().is_empty()
    }

    /// Audit blob stored alongside the plan
    pub fn audit_json(&self) -> serde_json::Value {
        serde_json::json!({
            "plan": self.plan_message,
            "departure": self.departure_message,
            "arrival": self.arrival_message,
        })
    }
}

/// Fields extracted from a plan message. Times are still UTC here.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFlightPlan {
    pub flight_id: String,
    pub sid: String,
    pub reg_number: String,
    pub planned_date: Option<NaiveDate>,
    pub departure_time_utc: Option<NaiveTime>,
    pub planned_duration: Duration,
    pub min_altitude: i32,
    pub max_altitude: i32,
    pub departure_point: Point,
    pub destination_point: Point,
    pub operator_info: String,
    pub drone_type: String,
    pub zone_code: String,
    pub purpose: String,
}

impl Default for ParsedFlightPlan {
    fn default() -> Self {
        Self {
            flight_id: String::new(),
            sid: String::new(),
            reg_number: String::new(),
            planned_date: None,
            departure_time_utc: None,
            planned_duration: Duration::minutes(DEFAULT_PLANNED_DURATION_MINUTES),
            min_altitude: DEFAULT_MIN_ALTITUDE,
            max_altitude: DEFAULT_MAX_ALTITUDE,
            departure_point: Point::ORIGIN,
            destination_point: Point::ORIGIN,
            operator_info: String::new(),
            drone_type: DEFAULT_DRONE_TYPE.to_string(),
            zone_code: String::new(),
            purpose: String::new(),
        }
    }
}

/// Actual departure/arrival data. Times are UTC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedActualFlight {
    pub departure_date: Option<NaiveDate>,
    pub departure_time: Option<NaiveTime>,
    pub departure_point: Option<Point>,
    pub arrival_date: Option<NaiveDate>,
    pub arrival_time: Option<NaiveTime>,
    pub arrival_point: Option<Point>,
}

impl ParsedActualFlight {
    pub fn has_departure_data(&self) -> bool {
        self.departure_date.is_some()
            || self.departure_time.is_some()
            || self.departure_point.is_some()
    }

    pub fn has_arrival_data(&self) -> bool {
        self.arrival_date.is_some() || self.arrival_time.is_some() || self.arrival_point.is_some()
    }

    pub fn status(&self) -> FlightStatus {
        if self.arrival_date.is_some() && self.arrival_time.is_some() {
            FlightStatus::Completed
        } else if self.departure_date.is_some() && self.departure_time.is_some() {
            FlightStatus::Departed
        } else {
            FlightStatus::Planned
        }
    }
}

/// A row that passed validation and parsing, ready for enrichment
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub raw: RawRecord,
    pub plan: ParsedFlightPlan,
    pub actual: Option<ParsedActualFlight>,
}

impl ParsedRow {
    pub fn row_number(&self) -> usize {
        self.raw.row_number
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightStatus {
    Planned,
    Departed,
    Completed,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Planned => "planned",
            FlightStatus::Departed => "departed",
            FlightStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert model for the flight_plans table. Times are regional.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::flight_plans)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewFlightPlan {
    pub id: Uuid,
    pub flight_id: String,
    pub sid: String,
    pub reg_number: String,
    pub planned_date: NaiveDate,
    pub planned_departure_time: NaiveTime,
    pub planned_duration_minutes: i32,
    pub min_altitude: i32,
    pub max_altitude: i32,
    pub departure_latitude: f64,
    pub departure_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub departure_region_id: Option<Uuid>,
    pub destination_region_id: Option<Uuid>,
    pub operator_id: Uuid,
    pub drone_type_id: Uuid,
    pub flight_zone_id: Option<Uuid>,
    pub purpose: String,
    pub raw_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert model for the actual_flights table. Times are regional.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::actual_flights)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewActualFlight {
    pub id: Uuid,
    pub flight_plan_id: Uuid,
    pub actual_departure_date: Option<NaiveDate>,
    pub actual_departure_time: Option<NaiveTime>,
    pub actual_departure_latitude: Option<f64>,
    pub actual_departure_longitude: Option<f64>,
    pub actual_arrival_date: Option<NaiveDate>,
    pub actual_arrival_time: Option<NaiveTime>,
    pub actual_arrival_latitude: Option<f64>,
    pub actual_arrival_longitude: Option<f64>,
    pub actual_duration_minutes: Option<i32>,
    pub flight_status: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("SHORT", 50), "SHORT");
        let long = "A".repeat(60);
        let truncated = truncate_with_ellipsis(&long, MAX_FLIGHT_ID_LEN);
        assert_eq!(truncated.len(), 50);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_with_ellipsis(&"1".repeat(25), MAX_SID_LEN).len(), 20);
    }

    #[test]
    fn test_status_prefers_completed() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 24);
        let time = NaiveTime::from_hms_opt(7, 0, 0);
        let actual = ParsedActualFlight {
            arrival_date: date,
            arrival_time: time,
            ..Default::default()
        };
        assert_eq!(actual.status(), FlightStatus::Completed);

        let actual = ParsedActualFlight {
            departure_date: date,
            departure_time: time,
            arrival_time: time,
            ..Default::default()
        };
        assert_eq!(actual.status(), FlightStatus::Departed);

        let actual = ParsedActualFlight {
            departure_time: time,
            ..Default::default()
        };
        assert_eq!(actual.status(), FlightStatus::Planned);
    }

    #[test]
    fn test_blank_record() {
        let raw = RawRecord {
            row_number: 2,
            plan_message: "  ".into(),
            ..Default::default()
        };
        assert!(raw.is_blank());
    }

    #[test]
    fn test_audit_json_keeps_all_messages() {
        let raw = RawRecord {
            row_number: 2,
            plan_message: "(SHR-ZZZZZ".into(),
            departure_message: "-TITLE IDEP".into(),
            arrival_message: "-TITLE IARR".into(),
        };
        let json = raw.audit_json();
        assert_eq!(json["plan"], "(SHR-ZZZZZ");
        assert_eq!(json["arrival"], "-TITLE IARR");
    }
}
