use std::collections::{HashMap, HashSet};

use chrono::Datelike;

use crate::models::{CanonicalRecord, FeatureRecord};

/// Breeds outside the per-batch top set collapse to this sentinel, capping
/// reduced-breed cardinality at TOP_BREEDS + 1.
pub const RARE_BREED: &str = "Rare_Breed";
pub const TOP_BREEDS: usize = 50;

/// Month-to-season mapping. Total: anything outside 3..=11 (including
/// out-of-range input) falls through to Winter.
pub fn season_for_month(month: u32) -> &'static str {
    match month {
        3..=5 => "Spring",
        6..=8 => "Summer",
        9..=11 => "Fall",
        _ => "Winter",
    }
}

/// Case-insensitive adoption check shared by the series builder (keep) and
/// the hotspot filter (drop).
pub fn is_adoption_outcome(outcome_type: &str) -> bool {
    outcome_type.to_ascii_lowercase().contains("adopt")
}

/// Derives the model-facing features for a batch.
///
/// Operates on the whole batch because breed reduction depends on the batch's
/// frequency distribution: the top set is recomputed per call, so the same
/// breed can map differently across batches.
pub fn derive_features(records: Vec<CanonicalRecord>) -> Vec<FeatureRecord> {
    let top = top_breeds(&records, TOP_BREEDS);

    records
        .into_iter()
        .map(|record| {
            let season = season_for_month(record.datetime.month());
            let reduced_breed = if top.contains(record.breed.as_str()) {
                record.breed.clone()
            } else {
                RARE_BREED.to_string()
            };
            FeatureRecord {
                record,
                season,
                reduced_breed,
            }
        })
        .collect()
}

fn top_breeds(records: &[CanonicalRecord], n: usize) -> HashSet<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.breed.as_str()).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // Count-descending, name ascending so ties rank deterministically.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(n)
        .map(|(breed, _)| breed.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(month: u32, breed: &str) -> CanonicalRecord {
        CanonicalRecord {
            animal_id: None,
            datetime: Utc.with_ymd_and_hms(2025, month, 10, 12, 0, 0).unwrap(),
            outcome_type: "Transfer".to_string(),
            animal_type: "Dog".to_string(),
            breed: breed.to_string(),
            sex_upon_outcome: "Intact Male".to_string(),
            age_upon_outcome: "2 years".to_string(),
        }
    }

    #[test]
    fn season_is_deterministic_over_all_months() {
        let expected = [
            (1, "Winter"),
            (2, "Winter"),
            (3, "Spring"),
            (4, "Spring"),
            (5, "Spring"),
            (6, "Summer"),
            (7, "Summer"),
            (8, "Summer"),
            (9, "Fall"),
            (10, "Fall"),
            (11, "Fall"),
            (12, "Winter"),
        ];
        for (month, season) in expected {
            assert_eq!(season_for_month(month), season, "month {month}");
        }
    }

    #[test]
    fn out_of_range_month_falls_through_to_winter() {
        assert_eq!(season_for_month(0), "Winter");
        assert_eq!(season_for_month(13), "Winter");
    }

    #[test]
    fn adoption_match_is_case_insensitive_substring() {
        assert!(is_adoption_outcome("Adoption"));
        assert!(is_adoption_outcome("Foster-to-ADOPT"));
        assert!(!is_adoption_outcome("Transfer"));
        assert!(!is_adoption_outcome("Euthanasia"));
    }

    #[test]
    fn reduced_breed_cardinality_stays_bounded() {
        // 120 distinct breeds, each appearing once: only 50 survive.
        let records: Vec<CanonicalRecord> =
            (0..120).map(|i| record(6, &format!("Breed {i:03}"))).collect();
        let features = derive_features(records);

        let distinct: HashSet<&str> = features
            .iter()
            .map(|f| f.reduced_breed.as_str())
            .collect();
        assert!(distinct.len() <= TOP_BREEDS + 1, "got {}", distinct.len());
        assert!(distinct.contains(RARE_BREED));
    }

    #[test]
    fn frequent_breeds_keep_their_identity() {
        let mut records: Vec<CanonicalRecord> =
            (0..60).map(|i| record(4, &format!("Rare {i}"))).collect();
        for _ in 0..10 {
            records.push(record(4, "Labrador Retriever Mix"));
        }

        let features = derive_features(records);
        let labs: Vec<&FeatureRecord> = features
            .iter()
            .filter(|f| f.record.breed == "Labrador Retriever Mix")
            .collect();
        assert!(labs.iter().all(|f| f.reduced_breed == "Labrador Retriever Mix"));
    }

    #[test]
    fn seasons_derive_from_record_month() {
        let features = derive_features(vec![record(4, "Beagle"), record(12, "Beagle")]);
        assert_eq!(features[0].season, "Spring");
        assert_eq!(features[1].season, "Winter");
    }
}
