use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const UNKNOWN_OPERATOR: &str = "Unknown operator";
pub const GENERIC_OPERATOR: &str = "UAS operator";
pub const UNKNOWN_ZONE: &str = "UNKNOWN";

const MAX_OPERATOR_NAME_LEN: usize = 500;
const MAX_OPERATOR_KEY_LEN: usize = 100;
const MAX_PHONE_LEN: usize = 20;
const MAX_ZONE_CODE_LEN: usize = 50;
const ZONE_CODE_EDGE_LEN: usize = 20;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?7?\d{10,11}").unwrap());
static BOILERPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ОПЕРАТОР|АДМИНИСТРАЦИЯ|РАЗРЕШЕНИЕ|ТЕЛ|TEL|OPERATOR)\b").unwrap()
});
static ORGANIZATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([А-ЯЁ\s]+(?:МВД|МЧС|АДМИНИСТРАЦИЯ|УПРАВЛЕНИЕ|СЛУЖБА)[А-ЯЁ\s]*)").unwrap()
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Organization category inferred from an operator description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    Police,
    Rescue,
    Administration,
    Department,
    Service,
    Other,
}

impl OrganizationType {
    /// Keyword groups in priority order; first group with a hit wins
    const KEYWORDS: [(OrganizationType, &'static [&'static str]); 5] = [
        (OrganizationType::Police, &["МВД", "ПОЛИЦ"]),
        (OrganizationType::Rescue, &["МЧС", "СПАСАТЕЛЬН"]),
        (OrganizationType::Administration, &["АДМИНИСТРАЦИЯ", "МУНИЦИПАЛЬН"]),
        (OrganizationType::Department, &["УПРАВЛЕНИЕ", "ДЕПАРТАМЕНТ"]),
        (OrganizationType::Service, &["СЛУЖБА"]),
    ];

    pub fn infer(description: &str) -> Self {
        let upper = description.to_uppercase();
        Self::KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| upper.contains(w)))
            .map(|(kind, _)| *kind)
            .unwrap_or(OrganizationType::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationType::Police => "police",
            OrganizationType::Rescue => "rescue",
            OrganizationType::Administration => "administration",
            OrganizationType::Department => "department",
            OrganizationType::Service => "service",
            OrganizationType::Other => "other",
        }
    }
}

impl std::fmt::Display for OrganizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Display name for an operator description.
///
/// Strips phone numbers and boilerplate words, collapses whitespace and trims
/// surrounding punctuation. Very short leftovers are replaced by an organization
/// name found at the start of the description, or a generic name.
pub fn normalize_operator_name(description: &str) -> String {
    let description = description.trim();
    if description.is_empty() {
        return UNKNOWN_OPERATOR.to_string();
    }

    let without_phones = PHONE_RE.replace_all(description, "");
    let without_words = BOILERPLATE_RE.replace_all(&without_phones, "");
    let collapsed = WHITESPACE_RE.replace_all(&without_words, " ");
    let name = collapsed.trim_matches(|c: char| matches!(c, '.' | ',' | '-') || c.is_whitespace());

    let name = if name.chars().count() < 3 {
        ORGANIZATION_RE
            .captures(description)
            .map(|caps| caps[1].trim().to_string())
            .filter(|org| !org.is_empty())
            .unwrap_or_else(|| GENERIC_OPERATOR.to_string())
    } else {
        name.to_string()
    };

    truncate_chars(&name, MAX_OPERATOR_NAME_LEN)
}

/// Cache key for an operator: lower-cased normalized name, capped
pub fn operator_key(name: &str) -> String {
    truncate_chars(&name.to_lowercase(), MAX_OPERATOR_KEY_LEN)
}

/// First phone number in the description, if any
pub fn extract_phone(description: &str) -> Option<String> {
    PHONE_RE
        .find(description)
        .map(|m| truncate_chars(m.as_str(), MAX_PHONE_LEN))
}

/// Normalized flight-zone code. Long codes keep their head and tail.
pub fn normalize_zone_code(code: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(code.trim(), " ").into_owned();
    if collapsed.is_empty() {
        return UNKNOWN_ZONE.to_string();
    }

    let chars: Vec<char> = collapsed.chars().collect();
    if chars.len() <= MAX_ZONE_CODE_LEN {
        return collapsed;
    }
    let head: String = chars[..ZONE_CODE_EDGE_LEN].iter().collect();
    let tail: String = chars[chars.len() - ZONE_CODE_EDGE_LEN..].iter().collect();
    format!("{}...{}", head.trim_end(), tail.trim_start())
}

pub fn drone_type_name(code: &str) -> String {
    match code {
        "BLA" => "Unmanned aircraft system".to_string(),
        "AER" => "Aerostat".to_string(),
        "UAV" => "Unmanned aerial vehicle".to_string(),
        other => format!("UAS type {}", other),
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::drone_operators)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Operator {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub organization_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::drone_operators)]
pub struct NewOperator {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub organization_type: String,
}

impl NewOperator {
    /// Build an operator from the free-text `OPR/` description
    pub fn from_description(description: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: normalize_operator_name(description),
            phone: extract_phone(description).unwrap_or_default(),
            organization_type: OrganizationType::infer(description).to_string(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::drone_types)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DroneType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::drone_types)]
pub struct NewDroneType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
}

impl NewDroneType {
    pub fn from_code(code: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: code.to_string(),
            name: drone_type_name(code),
            description: format!("Created automatically for type {}", code),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::flight_zones)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightZone {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::flight_zones)]
pub struct NewFlightZone {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

impl NewFlightZone {
    /// `code` must already be normalized
    pub fn from_code(code: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: code.to_string(),
            name: format!("Zone {}", code),
        }
    }
}

/// Persistent home of operators, drone types and flight zones.
///
/// The `get_or_create_*` methods return the id of the existing row when the natural
/// key is already taken, so concurrent runs converge on a single entity.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn load_operators(&self) -> Result<Vec<Operator>>;
    async fn load_drone_types(&self) -> Result<Vec<DroneType>>;
    async fn load_flight_zones(&self) -> Result<Vec<FlightZone>>;

    async fn get_or_create_operator(&self, operator: NewOperator) -> Result<Uuid>;
    async fn get_or_create_drone_type(&self, drone_type: NewDroneType) -> Result<Uuid>;
    async fn get_or_create_flight_zone(&self, zone: NewFlightZone) -> Result<Uuid>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_priority() {
        assert_eq!(
            OrganizationType::infer("ГУ МВД и МЧС"),
            OrganizationType::Police
        );
        assert_eq!(
            OrganizationType::infer("ГУ МЧС РОССИИ"),
            OrganizationType::Rescue
        );
        assert_eq!(
            OrganizationType::infer("муниципальное учреждение"),
            OrganizationType::Administration
        );
        assert_eq!(
            OrganizationType::infer("ДЕПАРТАМЕНТ ЛЕСНОГО ХОЗЯЙСТВА"),
            OrganizationType::Department
        );
        assert_eq!(
            OrganizationType::infer("АВИАЦИОННАЯ СЛУЖБА"),
            OrganizationType::Service
        );
        assert_eq!(OrganizationType::infer("ООО РОМАШКА"), OrganizationType::Other);
    }

    #[test]
    fn test_normalize_strips_phone_and_boilerplate() {
        let name = normalize_operator_name("ОПЕРАТОР ООО АЭРОСЪЕМКА ТЕЛ +79161234567");
        assert_eq!(name, "ООО АЭРОСЪЕМКА");
    }

    #[test]
    fn test_normalize_trims_punctuation() {
        assert_eq!(normalize_operator_name(" - ИП ИВАНОВ, "), "ИП ИВАНОВ");
    }

    #[test]
    fn test_normalize_short_leftover_uses_generic_name() {
        assert_eq!(normalize_operator_name("ТЕЛ 89161234567"), GENERIC_OPERATOR);
        assert_eq!(normalize_operator_name(""), UNKNOWN_OPERATOR);
    }

    #[test]
    fn test_extract_phone() {
        assert_eq!(
            extract_phone("ИП ИВАНОВ +79161234567 ДОП 89031234567").as_deref(),
            Some("+79161234567")
        );
        assert_eq!(extract_phone("ИП ИВАНОВ"), None);
    }

    #[test]
    fn test_operator_key_is_lowercase_and_capped() {
        assert_eq!(operator_key("ООО РОМАШКА"), "ооо ромашка");
        assert_eq!(operator_key(&"X".repeat(300)).chars().count(), 100);
    }

    #[test]
    fn test_zone_code_normalization() {
        assert_eq!(normalize_zone_code(""), UNKNOWN_ZONE);
        assert_eq!(normalize_zone_code(" R001,  R002 "), "R001, R002");
        let long = format!("{}{}", "A".repeat(40), "B".repeat(40));
        let code = normalize_zone_code(&long);
        assert_eq!(code, format!("{}...{}", "A".repeat(20), "B".repeat(20)));
        assert!(code.chars().count() <= 50);
    }

    #[test]
    fn test_drone_type_names() {
        assert_eq!(drone_type_name("AER"), "Aerostat");
        assert_eq!(drone_type_name("QUAD"), "UAS type QUAD");
    }
}
