use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::RawRecord;
use crate::schema;

/// Which upload stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Intake,
    Outcome,
}

impl RecordKind {
    fn table(self) -> &'static str {
        match self {
            RecordKind::Intake => "shelter.intake_records",
            RecordKind::Outcome => "shelter.outcome_records",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Intake => "intake",
            RecordKind::Outcome => "outcome",
        }
    }
}

/// Read-mostly record store. Raw upload payloads are kept as JSONB so
/// heterogeneous source schemas survive ingestion untouched; the normalizer
/// reconciles them at read time.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    sample_threshold: i64,
}

impl Store {
    pub fn new(pool: PgPool, sample_threshold: i64) -> Self {
        Self {
            pool,
            sample_threshold,
        }
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS shelter")
            .execute(&self.pool)
            .await?;

        for table in ["shelter.intake_records", "shelter.outcome_records"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    payload JSONB NOT NULL,
                    source_key TEXT UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#
            ))
            .execute(&self.pool)
            .await?;

            let index = format!(
                "CREATE INDEX IF NOT EXISTS {}_created_at_idx ON {table} (created_at)",
                table.rsplit('.').next().unwrap_or("records")
            );
            sqlx::query(&index).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub async fn count(&self, kind: RecordKind) -> anyhow::Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", kind.table()))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Full fetch below the sampling threshold; a store-side random sample of
    /// threshold size above it, trading fidelity for bounded latency.
    pub async fn fetch(&self, kind: RecordKind) -> anyhow::Result<Vec<RawRecord>> {
        let total = self.count(kind).await?;
        let rows = if total > self.sample_threshold {
            info!(
                kind = kind.label(),
                total,
                sample = self.sample_threshold,
                "sampling large record set"
            );
            sqlx::query(&format!(
                "SELECT payload FROM {} ORDER BY random() LIMIT $1",
                kind.table()
            ))
            .bind(self.sample_threshold)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!("SELECT payload FROM {}", kind.table()))
                .fetch_all(&self.pool)
                .await?
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.get::<serde_json::Value, _>("payload") {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    /// Count of records created since `since`, across both streams. Used as
    /// the coarse freshness trigger for retraining.
    pub async fn count_recent(&self, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let mut total = 0i64;
        for kind in [RecordKind::Intake, RecordKind::Outcome] {
            let row = sqlx::query(&format!(
                "SELECT COUNT(*) AS n FROM {} WHERE created_at >= $1",
                kind.table()
            ))
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
            total += row.get::<i64, _>("n");
        }
        Ok(total)
    }

    /// Imports a CSV export with its original headers preserved as raw field
    /// names. Rows carrying an animal id and timestamp dedupe on re-import.
    pub async fn import_csv(&self, kind: RecordKind, csv_path: &Path) -> anyhow::Result<usize> {
        let mut reader = csv::Reader::from_path(csv_path)
            .with_context(|| format!("failed to open {}", csv_path.display()))?;
        let headers = reader.headers()?.clone();
        let mut inserted = 0usize;

        for result in reader.records() {
            let row = result?;
            let mut payload = RawRecord::new();
            for (header, value) in headers.iter().zip(row.iter()) {
                if !value.trim().is_empty() {
                    payload.insert(
                        header.to_string(),
                        serde_json::Value::String(value.to_string()),
                    );
                }
            }
            if payload.is_empty() {
                continue;
            }

            let source_key = source_key_for(&payload)
                .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

            let result = sqlx::query(&format!(
                r#"
                INSERT INTO {} (id, payload, source_key)
                VALUES ($1, $2, $3)
                ON CONFLICT (source_key) DO NOTHING
                "#,
                kind.table()
            ))
            .bind(Uuid::new_v4())
            .bind(serde_json::Value::Object(payload))
            .bind(source_key)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        info!(kind = kind.label(), inserted, "csv import complete");
        Ok(inserted)
    }

    /// Loads a small deterministic fixture set so the pipeline can be
    /// exercised without a real upload.
    pub async fn seed(&self) -> anyhow::Result<usize> {
        let outcomes = [
            ("seed-out-001", "A100", "2026-01-05 10:00:00", "Adoption", "Dog", "Labrador Retriever Mix", "Neutered Male", "2 years"),
            ("seed-out-002", "A101", "2026-01-08 14:30:00", "Adoption", "Cat", "Domestic Shorthair Mix", "Spayed Female", "1 year"),
            ("seed-out-003", "A102", "2026-01-12 09:15:00", "Transfer", "Dog", "Pit Bull Mix", "Intact Male", "3 years"),
            ("seed-out-004", "A103", "2026-01-16 16:45:00", "Transfer", "Dog", "Pit Bull Mix", "Intact Male", "2 years"),
            ("seed-out-005", "A104", "2026-01-20 11:00:00", "Euthanasia", "Cat", "Domestic Shorthair Mix", "Intact Female", "8 years"),
            ("seed-out-006", "A105", "2026-01-24 13:20:00", "Adoption", "Dog", "Beagle Mix", "Spayed Female", "4 months"),
            ("seed-out-007", "A106", "2026-01-28 15:10:00", "Transfer", "Cat", "Siamese Mix", "Intact Male", "5 years"),
            ("seed-out-008", "A107", "2026-02-02 10:40:00", "Return to Owner", "Dog", "German Shepherd Mix", "Neutered Male", "6 years"),
            ("seed-out-009", "A108", "2026-02-06 12:00:00", "Adoption", "Cat", "Domestic Medium Hair", "Spayed Female", "2 years"),
            ("seed-out-010", "A109", "2026-02-10 17:30:00", "Euthanasia", "Dog", "Pit Bull Mix", "Intact Male", "7 years"),
            ("seed-out-011", "A110", "2026-02-14 09:50:00", "Transfer", "Cat", "Domestic Shorthair Mix", "Intact Female", "3 years"),
            ("seed-out-012", "A111", "2026-02-18 14:15:00", "Adoption", "Dog", "Labrador Retriever Mix", "Spayed Female", "1 year"),
        ];
        let intakes = [
            ("seed-in-001", "A112", "2026-01-03 08:30:00", "Dog", "Pit Bull Mix"),
            ("seed-in-002", "A113", "2026-01-09 12:45:00", "Cat", "Domestic Shorthair Mix"),
            ("seed-in-003", "A114", "2026-01-15 10:10:00", "Dog", "Beagle Mix"),
            ("seed-in-004", "A115", "2026-01-22 15:00:00", "Cat", "Siamese Mix"),
            ("seed-in-005", "A116", "2026-02-04 11:30:00", "Dog", "German Shepherd Mix"),
            ("seed-in-006", "A117", "2026-02-12 16:20:00", "Cat", "Domestic Medium Hair"),
        ];

        let mut inserted = 0usize;
        for (source_key, animal_id, datetime, outcome_type, animal_type, breed, sex, age) in
            outcomes
        {
            let payload = serde_json::json!({
                "animalId": animal_id,
                "datetime": datetime,
                "outcomeType": outcome_type,
                "animalType": animal_type,
                "breed": breed,
                "sexUponOutcome": sex,
                "ageUponOutcome": age,
            });
            inserted += self
                .insert_seed(RecordKind::Outcome, source_key, payload)
                .await?;
        }
        for (source_key, animal_id, datetime, animal_type, breed) in intakes {
            let payload = serde_json::json!({
                "animalId": animal_id,
                "datetime": datetime,
                "animalType": animal_type,
                "breed": breed,
            });
            inserted += self
                .insert_seed(RecordKind::Intake, source_key, payload)
                .await?;
        }

        Ok(inserted)
    }

    async fn insert_seed(
        &self,
        kind: RecordKind,
        source_key: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<usize> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, payload, source_key)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_key) DO NOTHING
            "#,
            kind.table()
        ))
        .bind(Uuid::new_v4())
        .bind(payload)
        .bind(source_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Stable dedup key for re-imported rows: animal id plus timestamp when both
/// are present in the source.
fn source_key_for(payload: &RawRecord) -> Option<String> {
    let animal_id = schema::first_present(payload, schema::ANIMAL_ID_ALIASES)?;
    let datetime = schema::first_present(payload, schema::DATETIME_ALIASES)?;
    Some(format!("{animal_id}|{datetime}"))
}
