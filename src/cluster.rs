use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::features::is_adoption_outcome;
use crate::models::{ClusterSummary, FeatureRecord};

pub const MIN_CLUSTER_ROWS: usize = 10;
pub const MAX_CLUSTERS: usize = 5;
pub const MIN_CLUSTERS: usize = 2;

const KMEANS_SEED: u64 = 42;
const KMEANS_RESTARTS: usize = 10;
const KMEANS_MAX_ITER: usize = 100;
const ELBOW_MAX_K: usize = 10;

/// Adaptive cluster count: one cluster per ten rows, never below 2 (a single
/// cluster is meaningless) or above 5 (categorical-only features fragment
/// badly past that).
pub fn cluster_count(rows: usize) -> usize {
    (rows / 10).clamp(MIN_CLUSTERS, MAX_CLUSTERS)
}

/// Partitions the hard-to-place subset (non-adoption outcomes) into
/// archetype clusters and summarizes their composition.
pub fn analyze(records: &[FeatureRecord]) -> Result<Vec<ClusterSummary>, PipelineError> {
    let (rows, matrix) = prepare_matrix(records)?;
    let k = cluster_count(rows.len());
    info!(rows = rows.len(), k, "running hotspot clustering");

    let (assignment, inertia) = kmeans_best(&matrix, k);
    debug!(inertia, "clustering converged");

    Ok(summarize(&rows, &assignment, k))
}

/// Offline analysis variant: inertia per candidate k, for elbow inspection.
/// Not part of the online path.
pub fn elbow_curve(records: &[FeatureRecord]) -> Result<Vec<(usize, f64)>, PipelineError> {
    let (rows, matrix) = prepare_matrix(records)?;
    let max_k = ELBOW_MAX_K.min(rows.len());

    Ok((MIN_CLUSTERS..=max_k)
        .map(|k| {
            let (_, inertia) = kmeans_best(&matrix, k);
            (k, inertia)
        })
        .collect())
}

fn prepare_matrix(
    records: &[FeatureRecord],
) -> Result<(Vec<&FeatureRecord>, Vec<Vec<f64>>), PipelineError> {
    let rows: Vec<&FeatureRecord> = records
        .iter()
        .filter(|r| !is_adoption_outcome(&r.record.outcome_type))
        .collect();
    if rows.len() < MIN_CLUSTER_ROWS {
        return Err(PipelineError::InsufficientData {
            stage: "clustering",
            have: rows.len(),
            need: MIN_CLUSTER_ROWS,
        });
    }

    let matrix = standardize(encode_one_hot(&rows)?);
    Ok((rows, matrix))
}

/// One-hot encodes the four categorical features, dropping the first level of
/// each category to avoid collinearity.
fn encode_one_hot(rows: &[&FeatureRecord]) -> Result<Vec<Vec<f64>>, PipelineError> {
    let getters: [fn(&FeatureRecord) -> &str; 4] = [
        |r| r.record.animal_type.as_str(),
        |r| r.reduced_breed.as_str(),
        |r| r.season,
        |r| r.record.sex_upon_outcome.as_str(),
    ];

    let mut columns: Vec<(usize, String)> = Vec::new();
    for (feature, getter) in getters.iter().enumerate() {
        let levels: BTreeSet<&str> = rows.iter().map(|&row| getter(row)).collect();
        for level in levels.into_iter().skip(1) {
            columns.push((feature, level.to_string()));
        }
    }
    if columns.is_empty() {
        return Err(PipelineError::NoFeatures);
    }

    let matrix = rows
        .iter()
        .map(|&row| {
            columns
                .iter()
                .map(|(feature, level)| {
                    if getters[*feature](row) == level {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();
    Ok(matrix)
}

/// Zero mean, unit variance per column. Mandatory before distance-based
/// clustering: unscaled indicators bias distances toward high-cardinality
/// categories.
fn standardize(mut matrix: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    let n = matrix.len();
    if n == 0 {
        return matrix;
    }
    let dims = matrix[0].len();

    for j in 0..dims {
        let mean = matrix.iter().map(|row| row[j]).sum::<f64>() / n as f64;
        let variance = matrix.iter().map(|row| (row[j] - mean).powi(2)).sum::<f64>() / n as f64;
        let std_dev = variance.sqrt();
        for row in &mut matrix {
            row[j] = if std_dev > f64::EPSILON {
                (row[j] - mean) / std_dev
            } else {
                0.0
            };
        }
    }
    matrix
}

/// Seeded k-means with multiple restarts, keeping the lowest-inertia run.
fn kmeans_best(data: &[Vec<f64>], k: usize) -> (Vec<usize>, f64) {
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut best = kmeans_once(data, k, &mut rng);
    for _ in 1..KMEANS_RESTARTS {
        let run = kmeans_once(data, k, &mut rng);
        if run.1 < best.1 {
            best = run;
        }
    }
    best
}

fn kmeans_once(data: &[Vec<f64>], k: usize, rng: &mut StdRng) -> (Vec<usize>, f64) {
    let dims = data[0].len();
    let mut centers: Vec<Vec<f64>> = rand::seq::index::sample(rng, data.len(), k)
        .into_iter()
        .map(|i| data[i].clone())
        .collect();
    let mut assignment = vec![0usize; data.len()];

    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (i, row) in data.iter().enumerate() {
            let nearest = nearest_center(row, &centers);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f64; dims]; k];
        let mut counts = vec![0usize; k];
        for (row, &cluster) in data.iter().zip(&assignment) {
            counts[cluster] += 1;
            for (j, value) in row.iter().enumerate() {
                sums[cluster][j] += value;
            }
        }
        let mut reseeded = false;
        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Re-seed an emptied cluster at the point farthest from its
                // current center, then keep iterating.
                if let Some((farthest, _)) = data
                    .iter()
                    .enumerate()
                    .map(|(i, row)| (i, squared_distance(row, &centers[assignment[i]])))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                {
                    centers[cluster] = data[farthest].clone();
                    reseeded = true;
                }
            } else {
                for j in 0..dims {
                    centers[cluster][j] = sums[cluster][j] / counts[cluster] as f64;
                }
            }
        }

        if !changed && !reseeded {
            break;
        }
    }

    let inertia = data
        .iter()
        .zip(&assignment)
        .map(|(row, &cluster)| squared_distance(row, &centers[cluster]))
        .sum();
    (assignment, inertia)
}

fn nearest_center(row: &[f64], centers: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let distance = squared_distance(row, center);
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn summarize(rows: &[&FeatureRecord], assignment: &[usize], k: usize) -> Vec<ClusterSummary> {
    let total = rows.len() as f64;
    let mut summaries = Vec::new();

    for cluster_id in 0..k {
        let members: Vec<&FeatureRecord> = rows
            .iter()
            .zip(assignment)
            .filter(|(_, &assigned)| assigned == cluster_id)
            .map(|(row, _)| *row)
            .collect();
        if members.is_empty() {
            continue;
        }

        summaries.push(ClusterSummary {
            cluster_id,
            count: members.len(),
            percentage: members.len() as f64 / total * 100.0,
            most_common_type: mode(members.iter().map(|r| r.record.animal_type.as_str())),
            most_common_breed: mode(members.iter().map(|r| r.reduced_breed.as_str())),
            most_common_season: mode(members.iter().map(|r| r.season)),
            representative_age: mode(members.iter().map(|r| r.record.age_upon_outcome.as_str())),
        });
    }
    summaries
}

/// Most frequent value, ties broken by first-encountered order.
pub(crate) fn mode<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some(entry) => entry.1 += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in &counts {
        if best.map_or(true, |(_, best_count)| *count > best_count) {
            best = Some((value, *count));
        }
    }
    best.map(|(value, _)| value.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CanonicalRecord;
    use chrono::{TimeZone, Utc};

    fn feature_record(
        outcome_type: &str,
        animal_type: &str,
        breed: &str,
        season: &'static str,
        sex: &str,
        age: &str,
    ) -> FeatureRecord {
        FeatureRecord {
            record: CanonicalRecord {
                animal_id: None,
                datetime: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
                outcome_type: outcome_type.to_string(),
                animal_type: animal_type.to_string(),
                breed: breed.to_string(),
                sex_upon_outcome: sex.to_string(),
                age_upon_outcome: age.to_string(),
            },
            season,
            reduced_breed: breed.to_string(),
        }
    }

    fn dog(outcome_type: &str) -> FeatureRecord {
        feature_record(outcome_type, "Dog", "Pit Bull Mix", "Summer", "Intact Male", "2 years")
    }

    fn cat(outcome_type: &str) -> FeatureRecord {
        feature_record(outcome_type, "Cat", "Domestic Shorthair", "Fall", "Intact Female", "1 year")
    }

    #[test]
    fn cluster_count_stays_in_bounds_and_grows_with_n() {
        let mut previous = 0;
        for n in 10..=200 {
            let k = cluster_count(n);
            assert!((MIN_CLUSTERS..=MAX_CLUSTERS).contains(&k), "n={n} k={k}");
            assert!(k >= previous, "k must be non-decreasing in n");
            previous = k;
        }
        assert_eq!(cluster_count(10), 2);
        assert_eq!(cluster_count(50), 5);
        assert_eq!(cluster_count(5_000), 5);
    }

    #[test]
    fn too_few_qualifying_rows_is_insufficient_data() {
        // Five non-adoption rows plus adopted ones that never qualify.
        let mut records: Vec<FeatureRecord> = (0..5).map(|_| dog("Transfer")).collect();
        records.extend((0..20).map(|_| cat("Adoption")));

        match analyze(&records) {
            Err(PipelineError::InsufficientData { have, need, .. }) => {
                assert_eq!(have, 5);
                assert_eq!(need, MIN_CLUSTER_ROWS);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn constant_features_encode_to_nothing() {
        // Every category has a single level, so drop-first removes them all.
        let records: Vec<FeatureRecord> = (0..12).map(|_| dog("Euthanasia")).collect();
        match analyze(&records) {
            Err(PipelineError::NoFeatures) => {}
            other => panic!("expected NoFeatures, got {other:?}"),
        }
    }

    #[test]
    fn two_archetypes_cluster_cleanly() {
        // 15 records over two distinct profiles: 5 adoptions are filtered
        // out, the remaining 10 split 5 transfers / 5 euthanasias.
        let mut records = Vec::new();
        records.extend((0..5).map(|_| dog("Adoption")));
        records.extend((0..5).map(|_| dog("Transfer")));
        records.extend((0..5).map(|_| cat("Euthanasia")));

        let clusters = analyze(&records).unwrap();
        assert_eq!(clusters.len(), 2);

        let total: usize = clusters.iter().map(|c| c.count).sum();
        assert_eq!(total, 10);
        let percentage: f64 = clusters.iter().map(|c| c.percentage).sum();
        assert!((percentage - 100.0).abs() < 0.01);

        // The two profiles are fully separated in feature space.
        for cluster in &clusters {
            assert_eq!(cluster.count, 5);
            assert!((cluster.percentage - 50.0).abs() < 0.01);
        }
        let types: Vec<&str> = clusters.iter().map(|c| c.most_common_type.as_str()).collect();
        assert!(types.contains(&"Dog"));
        assert!(types.contains(&"Cat"));
    }

    #[test]
    fn end_to_end_from_canonical_records() {
        // 15 outcomes over three distinct months, five per outcome type.
        // The ten non-adoption rows cluster with k=2.
        let mut canonical = Vec::new();
        for day in 1..=5 {
            canonical.push(CanonicalRecord {
                animal_id: Some(format!("A1{day:02}")),
                datetime: Utc.with_ymd_and_hms(2025, 1, day, 10, 0, 0).unwrap(),
                outcome_type: "Adoption".to_string(),
                animal_type: "Dog".to_string(),
                breed: "Labrador Retriever Mix".to_string(),
                sex_upon_outcome: "Neutered Male".to_string(),
                age_upon_outcome: "2 years".to_string(),
            });
            canonical.push(CanonicalRecord {
                animal_id: Some(format!("A4{day:02}")),
                datetime: Utc.with_ymd_and_hms(2025, 4, day, 10, 0, 0).unwrap(),
                outcome_type: "Transfer".to_string(),
                animal_type: "Dog".to_string(),
                breed: "Pit Bull Mix".to_string(),
                sex_upon_outcome: "Intact Male".to_string(),
                age_upon_outcome: "3 years".to_string(),
            });
            canonical.push(CanonicalRecord {
                animal_id: Some(format!("A7{day:02}")),
                datetime: Utc.with_ymd_and_hms(2025, 7, day, 10, 0, 0).unwrap(),
                outcome_type: "Euthanasia".to_string(),
                animal_type: "Cat".to_string(),
                breed: "Domestic Shorthair Mix".to_string(),
                sex_upon_outcome: "Intact Female".to_string(),
                age_upon_outcome: "8 years".to_string(),
            });
        }

        let records = crate::features::derive_features(canonical);
        let clusters = analyze(&records).unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.iter().map(|c| c.count).sum::<usize>(), 10);
        let percentage: f64 = clusters.iter().map(|c| c.percentage).sum();
        assert!((percentage - 100.0).abs() < 0.01);
        let seasons: Vec<&str> = clusters
            .iter()
            .map(|c| c.most_common_season.as_str())
            .collect();
        assert!(seasons.contains(&"Spring"));
        assert!(seasons.contains(&"Summer"));
    }

    #[test]
    fn clustering_is_reproducible() {
        let mut records = Vec::new();
        records.extend((0..8).map(|_| dog("Transfer")));
        records.extend((0..7).map(|_| cat("Euthanasia")));

        let first = analyze(&records).unwrap();
        let second = analyze(&records).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.count, b.count);
            assert_eq!(a.most_common_type, b.most_common_type);
        }
    }

    #[test]
    fn elbow_curve_covers_k_range() {
        let mut records = Vec::new();
        records.extend((0..12).map(|_| dog("Transfer")));
        records.extend((0..12).map(|_| cat("Euthanasia")));

        let curve = elbow_curve(&records).unwrap();
        assert_eq!(curve.first().map(|(k, _)| *k), Some(2));
        assert_eq!(curve.last().map(|(k, _)| *k), Some(10));
        assert!(curve.iter().all(|(_, inertia)| inertia.is_finite() && *inertia >= 0.0));
    }

    #[test]
    fn mode_breaks_ties_by_first_encountered() {
        assert_eq!(mode(["b", "a", "a", "b"]), "b");
        assert_eq!(mode(["x"]), "x");
        assert_eq!(mode(std::iter::empty::<&str>()), "Unknown");
    }
}
