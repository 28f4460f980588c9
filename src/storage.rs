pub mod sqlite;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::{Aggregator, FireRecord, PriceObservation, Quote, RecordOutcome};
use crate::rules::RuleId;

/// Append-only price history.
pub trait PriceStore: Send + Sync {
    fn append(
        &self,
        quote: &Quote,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<PriceObservation, Report<StorageError>>>;

    /// Value of the most recent observation.
    fn last_price(&self) -> BoxFuture<'_, Result<Option<f64>, Report<StorageError>>>;

    /// Reference price for the local day `day_key` (`YYYY-MM-DD` under
    /// `offset_minutes`), or `None` if nothing was observed that day.
    fn price_on_day(
        &self,
        day_key: &str,
        offset_minutes: i32,
        aggregator: Aggregator,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<StorageError>>>;
}

/// Record of delivered notifications, unique per `(rule, window_key)`.
pub trait Ledger: Send + Sync {
    fn has_fired(
        &self,
        rule: RuleId,
        window_key: &str,
    ) -> BoxFuture<'_, Result<bool, Report<StorageError>>>;

    /// Atomically insert the fire. A second call for the same key reports
    /// `AlreadyRecorded` and leaves the first record untouched.
    fn record_fire(
        &self,
        rule: RuleId,
        window_key: &str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<RecordOutcome, Report<StorageError>>>;

    /// Most recent fire among `rules`.
    fn last_fire(
        &self,
        rules: &[RuleId],
    ) -> BoxFuture<'_, Result<Option<FireRecord>, Report<StorageError>>>;
}
