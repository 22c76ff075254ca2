use std::path::Path;

use anyhow::Context;

use crate::models::{ClusterSummary, ForecastPoint};

/// Writes the forward forecast as the comma-separated table the dashboard
/// layer consumes: header row, one row per period.
pub fn write_forecast_csv(path: &Path, points: &[ForecastPoint]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    writer.write_record(["date", "predictedValue", "lowerBound", "upperBound"])?;
    for point in points {
        writer.write_record([
            point.date.to_string(),
            format!("{:.4}", point.predicted_value),
            format!("{:.4}", point.lower_bound),
            format!("{:.4}", point.upper_bound),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the cluster table, one row per cluster.
pub fn write_cluster_csv(path: &Path, clusters: &[ClusterSummary]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    writer.write_record([
        "clusterId",
        "count",
        "percentage",
        "mostCommonType",
        "mostCommonBreed",
        "mostCommonSeason",
        "representativeAge",
    ])?;
    for cluster in clusters {
        writer.write_record([
            cluster.cluster_id.to_string(),
            cluster.count.to_string(),
            format!("{:.2}", cluster.percentage),
            cluster.most_common_type.clone(),
            cluster.most_common_breed.clone(),
            cluster.most_common_season.clone(),
            cluster.representative_age.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{name}-{}.csv", uuid::Uuid::new_v4()))
    }

    #[test]
    fn forecast_csv_has_header_and_rows() {
        let path = temp_path("forecast");
        let points = vec![
            ForecastPoint {
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                predicted_value: 12.5,
                lower_bound: 8.0,
                upper_bound: 17.0,
            },
            ForecastPoint {
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                predicted_value: 13.0,
                lower_bound: 8.5,
                upper_bound: 17.5,
            },
        ];

        write_forecast_csv(&path, &points).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("date,predictedValue,lowerBound,upperBound")
        );
        assert_eq!(lines.count(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn cluster_csv_round_trips_summary_fields() {
        let path = temp_path("clusters");
        let clusters = vec![ClusterSummary {
            cluster_id: 0,
            count: 7,
            percentage: 70.0,
            most_common_type: "Dog".to_string(),
            most_common_breed: "Pit Bull Mix".to_string(),
            most_common_season: "Summer".to_string(),
            representative_age: "2 years".to_string(),
        }];

        write_cluster_csv(&path, &clusters).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("clusterId,count,percentage"));
        assert!(contents.contains("0,7,70.00,Dog,Pit Bull Mix,Summer,2 years"));

        std::fs::remove_file(&path).ok();
    }
}
