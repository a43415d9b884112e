use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `DDMM[NS]DDDMM[EW]`, as used in plan messages (e.g. `5525N03716E`)
static COORD_STANDARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})(\d{2})([NS])(\d{3})(\d{2})([EW])").unwrap());

/// `DDMMSS[NS]DDDMMSS[EW]`, as used in actual departure/arrival messages
static COORD_EXTENDED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2})(\d{2})(\d{2})([NS])(\d{3})(\d{2})(\d{2})([EW])").unwrap()
});

/// WGS84 point in decimal degrees.
///
/// `Point::ORIGIN` (0,0) doubles as the "could not parse" sentinel and must never be
/// handed to the region resolver; check [`Point::is_geocodable`] first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub const ORIGIN: Point = Point {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both axes are non-zero, i.e. the point is neither the origin
    /// sentinel nor a half-parsed value sitting on the equator/prime meridian.
    pub fn is_geocodable(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Key for memoizing lookups by exact coordinate
    pub fn cache_key(&self) -> (u64, u64) {
        (self.latitude.to_bits(), self.longitude.to_bits())
    }
}

impl Default for Point {
    fn default() -> Self {
        Point::ORIGIN
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

fn signed(value: f64, hemisphere: &str, negative: &str) -> f64 {
    if hemisphere == negative { -value } else { value }
}

fn capture_f64(caps: &regex::Captures<'_>, idx: usize) -> f64 {
    // The patterns only capture ASCII digits, so parsing cannot fail
    caps[idx].parse::<f64>().unwrap_or(0.0)
}

/// Parse a `DDMM[NS]DDDMM[EW]` token into decimal degrees.
///
/// Unparsable tokens yield [`Point::ORIGIN`] and a warning.
pub fn parse_coordinate(token: &str) -> Point {
    let token = token.trim();
    if token.is_empty() {
        return Point::ORIGIN;
    }

    match COORD_STANDARD_RE.captures(token) {
        Some(caps) => {
            let latitude = capture_f64(&caps, 1) + capture_f64(&caps, 2) / 60.0;
            let longitude = capture_f64(&caps, 4) + capture_f64(&caps, 5) / 60.0;
            Point::new(
                signed(latitude, &caps[3], "S"),
                signed(longitude, &caps[6], "W"),
            )
        }
        None => {
            warn!("Could not parse coordinate token '{}'", token);
            Point::ORIGIN
        }
    }
}

/// Parse a `DDMMSS[NS]DDDMMSS[EW]` token, falling back to the short form.
pub fn parse_coordinate_extended(token: &str) -> Point {
    let token = token.trim();
    match COORD_EXTENDED_RE.captures(token) {
        Some(caps) => {
            let latitude = capture_f64(&caps, 1)
                + capture_f64(&caps, 2) / 60.0
                + capture_f64(&caps, 3) / 3600.0;
            let longitude = capture_f64(&caps, 5)
                + capture_f64(&caps, 6) / 60.0
                + capture_f64(&caps, 7) / 3600.0;
            Point::new(
                signed(latitude, &caps[4], "S"),
                signed(longitude, &caps[8], "W"),
            )
        }
        None => parse_coordinate(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_north_east() {
        let point = parse_coordinate("5525N03716E");
        assert!((point.latitude - 55.4167).abs() < 1e-3);
        assert!((point.longitude - 37.2667).abs() < 1e-3);
    }

    #[test]
    fn test_parse_south_west_negates() {
        let point = parse_coordinate("5525S03716W");
        assert!((point.latitude + 55.4167).abs() < 1e-3);
        assert!((point.longitude + 37.2667).abs() < 1e-3);
    }

    #[test]
    fn test_unparsable_yields_origin() {
        assert_eq!(parse_coordinate("garbage"), Point::ORIGIN);
        assert_eq!(parse_coordinate(""), Point::ORIGIN);
        assert!(!parse_coordinate("55N37E").is_geocodable());
    }

    #[test]
    fn test_extended_with_seconds() {
        let point = parse_coordinate_extended("552530N0371630E");
        assert!((point.latitude - (55.0 + 25.0 / 60.0 + 30.0 / 3600.0)).abs() < 1e-6);
        assert!((point.longitude - (37.0 + 16.0 / 60.0 + 30.0 / 3600.0)).abs() < 1e-6);
    }

    #[test]
    fn test_extended_falls_back_to_short_form() {
        let point = parse_coordinate_extended("5525N03716E");
        assert!((point.latitude - 55.4167).abs() < 1e-3);
    }

    #[test]
    fn test_geocodable_requires_both_axes() {
        assert!(Point::new(55.0, 37.0).is_geocodable());
        assert!(!Point::new(55.0, 0.0).is_geocodable());
        assert!(!Point::ORIGIN.is_geocodable());
    }
}
