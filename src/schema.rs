use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::models::{CanonicalRecord, RawRecord};

/// Alias tables for reconciling the column-name variants seen across upload
/// sources. Order matters: the first alias present in a record wins.
///
/// This is the single copy consumed by every pipeline; components never keep
/// their own mapping.
pub const DATETIME_ALIASES: &[&str] = &[
    "datetime",
    "DateTime",
    "date",
    "Date",
    "outcomeDateTime",
    "outcome_datetime",
    "timestamp",
];
pub const OUTCOME_TYPE_ALIASES: &[&str] = &["outcomeType", "Outcome Type", "outcome_type"];
pub const ANIMAL_TYPE_ALIASES: &[&str] = &["animalType", "Animal Type", "animal_type"];
pub const BREED_ALIASES: &[&str] = &["breed", "Breed"];
pub const SEX_ALIASES: &[&str] = &["sexUponOutcome", "Sex upon Outcome", "sex_upon_outcome"];
pub const AGE_ALIASES: &[&str] = &["ageUponOutcome", "Age upon Outcome", "age_upon_outcome"];
pub const ANIMAL_ID_ALIASES: &[&str] = &["animalId", "Animal ID", "animal_id", "_id"];

/// Sentinel for categorical fields with no recognizable source column.
pub const UNKNOWN: &str = "Unknown";

/// Best-effort mapping from an arbitrary source record to the canonical
/// shape. Total by contract: a missing or unparseable field yields its
/// default, never an error.
pub fn normalize(raw: &RawRecord) -> CanonicalRecord {
    normalize_at(raw, Utc::now())
}

pub fn normalize_at(raw: &RawRecord, now: DateTime<Utc>) -> CanonicalRecord {
    let datetime = first_present(raw, DATETIME_ALIASES)
        .and_then(|value| parse_timestamp(&value))
        .unwrap_or(now);

    CanonicalRecord {
        animal_id: first_present(raw, ANIMAL_ID_ALIASES),
        datetime,
        outcome_type: categorical(raw, OUTCOME_TYPE_ALIASES),
        animal_type: categorical(raw, ANIMAL_TYPE_ALIASES),
        breed: categorical(raw, BREED_ALIASES),
        sex_upon_outcome: categorical(raw, SEX_ALIASES),
        age_upon_outcome: categorical(raw, AGE_ALIASES),
    }
}

fn categorical(raw: &RawRecord, aliases: &[&str]) -> String {
    first_present(raw, aliases).unwrap_or_else(|| UNKNOWN.to_string())
}

/// First alias present in the record with a non-empty value.
pub(crate) fn first_present(raw: &RawRecord, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        match raw.get(*alias) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                return Some(s.trim().to_string());
            }
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Lenient timestamp parsing covering the formats observed in shelter
/// exports: RFC 3339, ISO date/datetime, and US-style "01/03/2015 04:13:00 PM".
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %I:%M:%S %p"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, format) {
            return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(pairs: &[(&str, serde_json::Value)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_record_yields_all_defaults() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let record = normalize_at(&RawRecord::new(), now);

        assert_eq!(record.datetime, now);
        assert_eq!(record.outcome_type, UNKNOWN);
        assert_eq!(record.animal_type, UNKNOWN);
        assert_eq!(record.breed, UNKNOWN);
        assert_eq!(record.sex_upon_outcome, UNKNOWN);
        assert_eq!(record.age_upon_outcome, UNKNOWN);
        assert_eq!(record.animal_id, None);
    }

    #[test]
    fn first_alias_present_wins() {
        let record = normalize(&raw(&[
            ("Outcome Type", json!("Transfer")),
            ("outcome_type", json!("Adoption")),
            ("Animal Type", json!("Dog")),
        ]));

        assert_eq!(record.outcome_type, "Transfer");
        assert_eq!(record.animal_type, "Dog");
    }

    #[test]
    fn blank_values_are_treated_as_missing() {
        let record = normalize(&raw(&[
            ("breed", json!("   ")),
            ("Breed", json!("Beagle Mix")),
        ]));

        assert_eq!(record.breed, "Beagle Mix");
    }

    #[test]
    fn parses_us_style_timestamps() {
        let record = normalize(&raw(&[("DateTime", json!("01/03/2015 04:13:00 PM"))]));

        assert_eq!(
            record.datetime,
            Utc.with_ymd_and_hms(2015, 1, 3, 16, 13, 0).unwrap()
        );
    }

    #[test]
    fn unparseable_timestamp_defaults_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap();
        let record = normalize_at(&raw(&[("datetime", json!("sometime last week"))]), now);

        assert_eq!(record.datetime, now);
    }

    #[test]
    fn iso_date_only_maps_to_midnight() {
        let record = normalize(&raw(&[("date", json!("2024-11-05"))]));

        assert_eq!(
            record.datetime,
            Utc.with_ymd_and_hms(2024, 11, 5, 0, 0, 0).unwrap()
        );
    }
}
