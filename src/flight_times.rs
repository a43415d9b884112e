use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Planned duration used when the plan carries fewer than two time tokens
pub const DEFAULT_PLANNED_DURATION_MINUTES: i64 = 60;

fn split_hhmm(token: &str) -> Option<(u32, u32)> {
    if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours = token[..2].parse().ok()?;
    let minutes = token[2..].parse().ok()?;
    Some((hours, minutes))
}

/// `HHMM` to a time of day. Anything out of range collapses to midnight.
pub fn parse_time(token: &str) -> NaiveTime {
    split_hhmm(token.trim())
        .and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0))
        .unwrap_or(NaiveTime::MIN)
}

/// `YYMMDD` to a calendar date; two-digit years are 2000-based.
pub fn parse_date(token: &str) -> Option<NaiveDate> {
    let token = token.trim();
    if token.len() != 6 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = token[..2].parse().ok()?;
    let month: u32 = token[2..4].parse().ok()?;
    let day: u32 = token[4..].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Planned duration between two `HHMM` tokens.
///
/// Wraps past midnight when `end < start`, then clamps: non-positive spans become
/// one hour and anything above a day becomes exactly one day.
pub fn planned_duration(start: &str, end: &str) -> Duration {
    let (Some((sh, sm)), Some((eh, em))) = (split_hhmm(start.trim()), split_hhmm(end.trim()))
    else {
        return Duration::minutes(DEFAULT_PLANNED_DURATION_MINUTES);
    };

    let start_minutes = i64::from(sh) * 60 + i64::from(sm);
    let mut end_minutes = i64::from(eh) * 60 + i64::from(em);
    if end_minutes < start_minutes {
        end_minutes += MINUTES_PER_DAY;
    }

    let minutes = end_minutes - start_minutes;
    let minutes = if minutes <= 0 {
        DEFAULT_PLANNED_DURATION_MINUTES
    } else {
        minutes.min(MINUTES_PER_DAY)
    };
    Duration::minutes(minutes)
}

/// Elapsed time between actual departure and arrival.
///
/// An arrival before the departure is taken to be on the following day. Results
/// outside [1 min, 24 h] are discarded.
pub fn actual_duration(departure: NaiveDateTime, arrival: NaiveDateTime) -> Option<Duration> {
    let arrival = if arrival < departure {
        arrival + Duration::days(1)
    } else {
        arrival
    };

    let duration = arrival - departure;
    if duration >= Duration::minutes(1) && duration <= Duration::days(1) {
        Some(duration)
    } else {
        warn!(
            "Discarding implausible flight duration of {} minutes ({} -> {})",
            duration.num_minutes(),
            departure,
            arrival
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        parse_date(date).unwrap().and_time(parse_time(time))
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("0705"), NaiveTime::from_hms_opt(7, 5, 0).unwrap());
        assert_eq!(parse_time("2359"), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
    }

    #[test]
    fn test_parse_time_out_of_range_is_midnight() {
        assert_eq!(parse_time("2460"), NaiveTime::MIN);
        assert_eq!(parse_time("0960"), NaiveTime::MIN);
        assert_eq!(parse_time("12"), NaiveTime::MIN);
        assert_eq!(parse_time("ab12"), NaiveTime::MIN);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("250124"), NaiveDate::from_ymd_opt(2025, 1, 24));
        assert_eq!(parse_date("251324"), None);
        assert_eq!(parse_date("2501"), None);
    }

    #[test]
    fn test_duration_wraps_past_midnight() {
        assert_eq!(planned_duration("2330", "0130"), Duration::minutes(120));
    }

    #[test]
    fn test_duration_end_before_start_wraps_to_next_day() {
        // 07:00 next day minus 08:00 = 23h
        assert_eq!(planned_duration("0800", "0700"), Duration::minutes(23 * 60));
    }

    #[test]
    fn test_duration_zero_becomes_one_hour() {
        assert_eq!(planned_duration("0800", "0800"), Duration::minutes(60));
    }

    #[test]
    fn test_duration_regular() {
        assert_eq!(planned_duration("0600", "1030"), Duration::minutes(270));
    }

    #[test]
    fn test_duration_bad_tokens_default() {
        assert_eq!(planned_duration("xx", "0100"), Duration::minutes(60));
    }

    #[test]
    fn test_actual_duration_same_day() {
        let d = actual_duration(at("250124", "0700"), at("250124", "0930"));
        assert_eq!(d, Some(Duration::minutes(150)));
    }

    #[test]
    fn test_actual_duration_arrival_before_departure_wraps() {
        let d = actual_duration(at("250124", "2300"), at("250124", "0100"));
        assert_eq!(d, Some(Duration::minutes(120)));
    }

    #[test]
    fn test_actual_duration_over_a_day_is_discarded() {
        let d = actual_duration(at("250124", "0100"), at("250125", "0700"));
        assert_eq!(d, None);
    }

    #[test]
    fn test_actual_duration_zero_is_discarded() {
        let d = actual_duration(at("250124", "0100"), at("250124", "0100"));
        assert_eq!(d, None);
    }
}
