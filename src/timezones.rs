use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::reference_cache::ReferenceCache;
use crate::regions::RegionStore;

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Option<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    name.parse::<Tz>().ok()
}

/// Wall-clock time in `tz` for a UTC instant. The date moves with the offset.
pub fn to_regional(utc: NaiveDateTime, tz: Tz) -> NaiveDateTime {
    Utc.from_utc_datetime(&utc).with_timezone(&tz).naive_local()
}

/// Converts message times (UTC) to the local time of the region a flight belongs to.
pub struct TimezoneConverter {
    default_timezone: Tz,
    regions: Arc<dyn RegionStore>,
}

impl TimezoneConverter {
    pub fn new(default_timezone: Tz, regions: Arc<dyn RegionStore>) -> Self {
        Self {
            default_timezone,
            regions,
        }
    }

    /// Timezone for a region code.
    ///
    /// No code means the default. Codes missing from the cache are looked up once and
    /// the outcome (default included) is cached for the rest of the run.
    pub async fn timezone_for(&self, cache: &mut ReferenceCache, region_code: Option<&str>) -> Tz {
        let Some(code) = region_code else {
            return self.default_timezone;
        };
        if let Some(tz) = cache.timezone(code) {
            return tz;
        }

        let tz = match self.regions.find_by_code(code).await {
            Ok(Some(region)) => match parse_timezone(&region.timezone) {
                Some(tz) => tz,
                None => {
                    warn!(
                        "Region {} has unusable timezone '{}', using {}",
                        code, region.timezone, self.default_timezone
                    );
                    self.default_timezone
                }
            },
            Ok(None) => {
                debug!("Region {} not found, using {}", code, self.default_timezone);
                self.default_timezone
            }
            Err(e) => {
                warn!(
                    "Timezone lookup for region {} failed, using {}: {:#}",
                    code, self.default_timezone, e
                );
                self.default_timezone
            }
        };

        cache.insert_timezone(code, tz);
        tz
    }

    pub async fn to_regional(
        &self,
        cache: &mut ReferenceCache,
        utc: NaiveDateTime,
        region_code: Option<&str>,
    ) -> NaiveDateTime {
        let tz = self.timezone_for(cache, region_code).await;
        to_regional(utc, tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{BoundarySet, Region, RegionIndex};
    use chrono::{NaiveDate, NaiveTime};
    use geo::{LineString, MultiPolygon, Polygon};
    use uuid::Uuid;

    fn utc(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(time.0, time.1, 0).unwrap())
    }

    fn converter() -> TimezoneConverter {
        let mut index = RegionIndex::new();
        let shape = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(130.0, 40.0), (140.0, 40.0), (140.0, 50.0), (130.0, 40.0)]),
            vec![],
        )]);
        for (code, tz) in [("25", "Asia/Vladivostok"), ("99", "Not/AZone")] {
            let region = Region {
                id: Uuid::new_v4(),
                code: code.to_string(),
                name: code.to_string(),
                timezone: tz.to_string(),
            };
            index.add(BoundarySet::Land, region, shape.clone());
        }
        TimezoneConverter::new(chrono_tz::Europe::Moscow, Arc::new(index))
    }

    #[test]
    fn test_to_regional_crosses_midnight() {
        let local = to_regional(utc((2025, 1, 24), (22, 30)), chrono_tz::Europe::Moscow);
        assert_eq!(local, utc((2025, 1, 25), (1, 30)));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Asia/Yekaterinburg"), Some(chrono_tz::Asia::Yekaterinburg));
        assert_eq!(parse_timezone(""), None);
        assert_eq!(parse_timezone("Mars/Olympus"), None);
    }

    #[tokio::test]
    async fn test_no_region_uses_default() {
        let converter = converter();
        let mut cache = ReferenceCache::new();
        let local = converter
            .to_regional(&mut cache, utc((2025, 1, 24), (7, 0)), None)
            .await;
        assert_eq!(local, utc((2025, 1, 24), (10, 0)));
    }

    #[tokio::test]
    async fn test_cache_miss_looks_up_region_and_caches() {
        let converter = converter();
        let mut cache = ReferenceCache::new();
        let local = converter
            .to_regional(&mut cache, utc((2025, 1, 24), (20, 0)), Some("25"))
            .await;
        assert_eq!(local, utc((2025, 1, 25), (6, 0)));
        assert_eq!(cache.timezone("25"), Some(chrono_tz::Asia::Vladivostok));
    }

    #[tokio::test]
    async fn test_invalid_or_unknown_region_falls_back_and_is_cached() {
        let converter = converter();
        let mut cache = ReferenceCache::new();
        let tz = converter.timezone_for(&mut cache, Some("99")).await;
        assert_eq!(tz, chrono_tz::Europe::Moscow);
        let tz = converter.timezone_for(&mut cache, Some("00")).await;
        assert_eq!(tz, chrono_tz::Europe::Moscow);
        assert_eq!(cache.timezone("00"), Some(chrono_tz::Europe::Moscow));
    }
}
