//! Field extraction from the three free-text message blocks of a row.
//!
//! The plan message (`SHR`) carries the flight plan; the departure and arrival
//! messages (`-TITLE`) carry what actually happened. Every field is extracted
//! independently, so a malformed field never prevents the others from being read.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::coordinates::{parse_coordinate, parse_coordinate_extended};
use crate::flight_plans::{
    MAX_DRONE_TYPE_LEN, MAX_FLIGHT_ID_LEN, MAX_REG_NUMBER_LEN, MAX_SID_LEN, ParsedActualFlight,
    ParsedFlightPlan, ParsedRow, RawRecord, UNIDENTIFIED_FLIGHT_ID, truncate_with_ellipsis,
};
use crate::flight_times::{parse_date, parse_time, planned_duration};

pub const PLAN_MARKER: &str = "SHR";
pub const ACTUAL_MARKER: &str = "-TITLE";

static FLIGHT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SHR-([A-Z0-9]+)").unwrap());
static SID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SID/(\d+)").unwrap());
static ZZZZ_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-ZZZZ(\d{4})").unwrap());
static ALTITUDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-M(\d{4})/M(\d{4})").unwrap());
static DEP_COORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DEP/(\d{4}[NS]\d{5}[EW])").unwrap());
static DEST_COORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DEST/(\d{4}[NS]\d{5}[EW])").unwrap());
static BARE_COORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4}[NS]\d{5}[EW])").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"DOF/(\d{6})").unwrap());
static OPERATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)OPR/(.+?)(?:REG/|TYP/|RMK/|SID/|$)").unwrap());
static REG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"REG/([^,\s]+)").unwrap());
static DRONE_TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"TYP/([A-Z]+)").unwrap());
static ZONE_RES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"/ZONA\s+([A-Z0-9,.\s]+?)/").unwrap(),
        Regex::new(r"ZONA\s+([A-Z0-9,.\s]+)").unwrap(),
        Regex::new(r"WR(\d+)").unwrap(),
    ]
});
static PURPOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)RMK/(.+?)(?:SID/|$)").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static DEP_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-ADD\s+(\d{6})").unwrap());
static DEP_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-ATD\s+(\d{4})").unwrap());
static DEP_COORD_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-ADEPZ\s+(\d{6}[NS]\d{7}[EW])").unwrap());
static ARR_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-ADA\s+(\d{6})").unwrap());
static ARR_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-ATA\s+(\d{4})").unwrap());
static ARR_COORD_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-ADARRZ\s+(\d{6}[NS]\d{7}[EW])").unwrap());

/// Why a row was not turned into a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRejection {
    MissingPlan,
    MissingDeparture,
    MissingArrival,
    InvalidPlanMarker,
    InvalidDepartureMarker,
    InvalidArrivalMarker,
    PlanUnusable,
    ChunkPanicked,
}

impl RowRejection {
    /// Rejections caused by an absent message rather than a malformed one
    pub fn is_missing_message(&self) -> bool {
        matches!(
            self,
            RowRejection::MissingPlan | RowRejection::MissingDeparture | RowRejection::MissingArrival
        )
    }
}

impl std::fmt::Display for RowRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowRejection::MissingPlan => write!(f, "plan message is missing"),
            RowRejection::MissingDeparture => write!(f, "departure message is missing"),
            RowRejection::MissingArrival => write!(f, "arrival message is missing"),
            RowRejection::InvalidPlanMarker => {
                write!(f, "plan message does not start with {}", PLAN_MARKER)
            }
            RowRejection::InvalidDepartureMarker => {
                write!(f, "departure message does not start with {}", ACTUAL_MARKER)
            }
            RowRejection::InvalidArrivalMarker => {
                write!(f, "arrival message does not start with {}", ACTUAL_MARKER)
            }
            RowRejection::PlanUnusable => write!(f, "no fields could be read from plan message"),
            RowRejection::ChunkPanicked => write!(f, "parser failed unexpectedly"),
        }
    }
}

/// Trim and drop the characters the export wraps messages in.
pub fn clean_message(text: &str) -> String {
    text.trim().replace(['(', ')', '"'], "")
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

pub fn has_plan_marker(text: &str) -> bool {
    clean_message(text).starts_with(PLAN_MARKER)
}

pub fn has_actual_marker(text: &str) -> bool {
    clean_message(text).starts_with(ACTUAL_MARKER)
}

fn first_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text).and_then(|caps| caps.get(1)).map(|m| m.as_str())
}

/// Extract a flight plan. `None` when the text is empty or not a single field matched.
pub fn parse_plan_message(text: &str) -> Option<ParsedFlightPlan> {
    let cleaned = clean_message(text);
    if cleaned.is_empty() {
        return None;
    }

    let mut plan = ParsedFlightPlan::default();
    let mut matched = false;

    if let Some(reg) = first_capture(&REG_RE, &cleaned) {
        plan.reg_number = truncate_with_ellipsis(reg.trim(), MAX_REG_NUMBER_LEN);
        matched = true;
    }

    if let Some(flight_id) = first_capture(&FLIGHT_ID_RE, &cleaned) {
        plan.flight_id = if flight_id == UNIDENTIFIED_FLIGHT_ID && !plan.reg_number.is_empty() {
            truncate_with_ellipsis(&plan.reg_number, MAX_FLIGHT_ID_LEN)
        } else {
            truncate_with_ellipsis(flight_id, MAX_FLIGHT_ID_LEN)
        };
        matched = true;
    }

    if let Some(sid) = first_capture(&SID_RE, &cleaned) {
        plan.sid = truncate_with_ellipsis(sid, MAX_SID_LEN);
        matched = true;
    }

    let times: Vec<&str> = ZZZZ_TIME_RE
        .captures_iter(&cleaned)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if let Some(first) = times.first() {
        plan.departure_time_utc = Some(parse_time(first));
        matched = true;
    }
    if let [start, end, ..] = times.as_slice() {
        plan.planned_duration = planned_duration(start, end);
    }

    if let Some(caps) = ALTITUDE_RE.captures(&cleaned) {
        plan.min_altitude = caps[1].parse().unwrap_or(plan.min_altitude);
        plan.max_altitude = caps[2].parse().unwrap_or(plan.max_altitude);
        matched = true;
    }

    let departure = first_capture(&DEP_COORD_RE, &cleaned);
    let destination = first_capture(&DEST_COORD_RE, &cleaned);
    match (departure, destination) {
        (dep, Some(dest)) => {
            if let Some(dep) = dep {
                plan.departure_point = parse_coordinate(dep);
            }
            plan.destination_point = parse_coordinate(dest);
            matched = true;
        }
        (dep, None) => {
            let bare = first_capture(&BARE_COORD_RE, &cleaned);
            if let Some(dep) = dep.or(bare) {
                plan.departure_point = parse_coordinate(dep);
                matched = true;
            }
            if let Some(bare) = bare {
                plan.destination_point = parse_coordinate(bare);
                matched = true;
            }
        }
    }

    if let Some(date) = first_capture(&DATE_RE, &cleaned) {
        plan.planned_date = parse_date(date);
        matched = true;
    }

    if let Some(operator) = first_capture(&OPERATOR_RE, &cleaned) {
        plan.operator_info = collapse_whitespace(operator);
        matched = true;
    }

    if let Some(drone_type) = first_capture(&DRONE_TYPE_RE, &cleaned) {
        plan.drone_type = truncate_with_ellipsis(drone_type, MAX_DRONE_TYPE_LEN);
        matched = true;
    }

    if let Some(zone) = ZONE_RES.iter().find_map(|re| first_capture(re, &cleaned)) {
        plan.zone_code = collapse_whitespace(zone);
        matched = true;
    }

    if let Some(purpose) = first_capture(&PURPOSE_RE, &cleaned) {
        plan.purpose = collapse_whitespace(purpose);
        matched = true;
    }

    matched.then_some(plan)
}

/// Extract actual departure/arrival data.
///
/// Never fails: absent or garbled fields are simply left empty. Returns `None` when
/// neither message yields anything.
pub fn parse_actual_messages(departure: &str, arrival: &str) -> Option<ParsedActualFlight> {
    let departure = clean_message(departure);
    let arrival = clean_message(arrival);

    let actual = ParsedActualFlight {
        departure_date: first_capture(&DEP_DATE_RE, &departure).and_then(parse_date),
        departure_time: first_capture(&DEP_TIME_RE, &departure).map(parse_time),
        departure_point: first_capture(&DEP_COORD_EXT_RE, &departure)
            .map(parse_coordinate_extended)
            .filter(|p| p.is_geocodable()),
        arrival_date: first_capture(&ARR_DATE_RE, &arrival).and_then(parse_date),
        arrival_time: first_capture(&ARR_TIME_RE, &arrival).map(parse_time),
        arrival_point: first_capture(&ARR_COORD_EXT_RE, &arrival)
            .map(parse_coordinate_extended)
            .filter(|p| p.is_geocodable()),
    };

    (actual.has_departure_data() || actual.has_arrival_data()).then_some(actual)
}

/// Validate and parse a whole row.
///
/// Checks run in a fixed order: presence of all three messages, then their markers,
/// then plan extraction. Rows without a flight identifier get `UNKNOWN_<stamp>_<row>`.
pub fn parse_record(raw: RawRecord, run_stamp: &str) -> Result<ParsedRow, RowRejection> {
    if raw.plan_message.trim().is_empty() {
        return Err(RowRejection::MissingPlan);
    }
    if raw.departure_message.trim().is_empty() {
        return Err(RowRejection::MissingDeparture);
    }
    if raw.arrival_message.trim().is_empty() {
        return Err(RowRejection::MissingArrival);
    }

    if !has_plan_marker(&raw.plan_message) {
        return Err(RowRejection::InvalidPlanMarker);
    }
    if !has_actual_marker(&raw.departure_message) {
        return Err(RowRejection::InvalidDepartureMarker);
    }
    if !has_actual_marker(&raw.arrival_message) {
        return Err(RowRejection::InvalidArrivalMarker);
    }

    let mut plan = parse_plan_message(&raw.plan_message).ok_or(RowRejection::PlanUnusable)?;
    if plan.flight_id.is_empty() {
        plan.flight_id = truncate_with_ellipsis(
            &format!("UNKNOWN_{}_{}", run_stamp, raw.row_number),
            MAX_FLIGHT_ID_LEN,
        );
    }
    let actual = parse_actual_messages(&raw.departure_message, &raw.arrival_message);

    Ok(ParsedRow { raw, plan, actual })
}
