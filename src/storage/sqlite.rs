use chrono::{DateTime, SecondsFormat, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use std::path::Path;
use std::str::FromStr;

use crate::clock;
use crate::error::StorageError;
use crate::model::{Aggregator, FireRecord, PriceObservation, Quote, RecordOutcome};
use crate::rules::RuleId;
use crate::storage::{Ledger, PriceStore};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }

    /// Private in-memory database with migrations applied.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, Report<StorageError>> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .change_context(StorageError::Migration)?;
        // Every connection to :memory: is a separate database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .change_context(StorageError::Migration)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;
        Ok(Self { pool })
    }
}

impl PriceStore for SqliteStorage {
    fn append(
        &self,
        quote: &Quote,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<PriceObservation, Report<StorageError>>> {
        let observation = PriceObservation {
            value: quote.value,
            vendor: quote.vendor.clone(),
            observed_at: at,
        };
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO price_observations (value, vendor, observed_at) VALUES (?, ?, ?)",
            )
            .bind(observation.value)
            .bind(&observation.vendor)
            .bind(db_time(observation.observed_at))
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(observation)
        })
    }

    fn last_price(&self) -> BoxFuture<'_, Result<Option<f64>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<(f64,)> = sqlx::query_as(
                "SELECT value FROM price_observations \
                 ORDER BY observed_at DESC, id DESC \
                 LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;
            Ok(row.map(|(value,)| value))
        })
    }

    fn price_on_day(
        &self,
        day_key: &str,
        offset_minutes: i32,
        aggregator: Aggregator,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<StorageError>>> {
        let day_key = day_key.to_string();
        Box::pin(async move {
            let (start, end) = clock::day_bounds_utc(&day_key, offset_minutes)
                .ok_or_else(|| Report::new(StorageError::Query))
                .attach_with(|| format!("malformed day key: {day_key}"))?;

            let value = match aggregator {
                Aggregator::Max => {
                    let (max,): (Option<f64>,) = sqlx::query_as(
                        "SELECT MAX(value) FROM price_observations \
                         WHERE observed_at >= ? AND observed_at < ?",
                    )
                    .bind(db_time(start))
                    .bind(db_time(end))
                    .fetch_one(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
                    max
                }
                Aggregator::Latest => {
                    let row: Option<(f64,)> = sqlx::query_as(
                        "SELECT value FROM price_observations \
                         WHERE observed_at >= ? AND observed_at < ? \
                         ORDER BY observed_at DESC, id DESC \
                         LIMIT 1",
                    )
                    .bind(db_time(start))
                    .bind(db_time(end))
                    .fetch_optional(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
                    row.map(|(value,)| value)
                }
            };
            Ok(value)
        })
    }
}

impl Ledger for SqliteStorage {
    fn has_fired(
        &self,
        rule: RuleId,
        window_key: &str,
    ) -> BoxFuture<'_, Result<bool, Report<StorageError>>> {
        let window_key = window_key.to_string();
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM fire_records WHERE rule_id = ? AND window_key = ? LIMIT 1",
            )
            .bind(rule.as_str())
            .bind(&window_key)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;
            Ok(row.is_some())
        })
    }

    fn record_fire(
        &self,
        rule: RuleId,
        window_key: &str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RecordOutcome, Report<StorageError>>> {
        let window_key = window_key.to_string();
        Box::pin(async move {
            // The primary key decides; no read-then-write.
            let result = sqlx::query(
                "INSERT OR IGNORE INTO fire_records (rule_id, window_key, fired_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(rule.as_str())
            .bind(&window_key)
            .bind(db_time(at))
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("rule: {rule}, window: {window_key}"))?;

            if result.rows_affected() == 0 {
                Ok(RecordOutcome::AlreadyRecorded)
            } else {
                Ok(RecordOutcome::Recorded)
            }
        })
    }

    fn last_fire(
        &self,
        rules: &[RuleId],
    ) -> BoxFuture<'_, Result<Option<FireRecord>, Report<StorageError>>> {
        let rules = rules.to_vec();
        Box::pin(async move {
            if rules.is_empty() {
                return Ok(None);
            }

            let placeholders = vec!["?"; rules.len()].join(", ");
            let sql = format!(
                "SELECT rule_id, window_key, fired_at FROM fire_records \
                 WHERE rule_id IN ({placeholders}) \
                 ORDER BY fired_at DESC \
                 LIMIT 1"
            );
            let mut query = sqlx::query_as::<_, (String, String, String)>(&sql);
            for rule in &rules {
                query = query.bind(rule.as_str());
            }

            let row = query
                .fetch_optional(&self.pool)
                .await
                .change_context(StorageError::Query)?;

            row.map(|(rule_id, window_key, fired_at)| {
                Ok(FireRecord {
                    rule_id,
                    window_key,
                    fired_at: parse_db_time(&fired_at)?,
                })
            })
            .transpose()
        })
    }
}

/// Fixed-width UTC timestamp so that text order matches time order.
fn db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_db_time(value: &str) -> Result<DateTime<Utc>, Report<StorageError>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .change_context(StorageError::Query)
        .attach_with(|| format!("unreadable timestamp: {value}"))
}
