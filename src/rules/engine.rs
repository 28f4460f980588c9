use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::clock;
use crate::error::StorageError;
use crate::model::{Aggregator, Decision, MessageType, PendingFire, Reason, RecordOutcome};
use crate::rules::{RuleConfig, RuleId};
use crate::storage::{Ledger, PriceStore};

/// Decides, once per tick, whether the current price is worth a notification.
///
/// `evaluate` only reads. The fires it proposes are written by `commit`,
/// which the caller invokes after the message has been delivered.
pub struct RuleEngine {
    config: Arc<RuleConfig>,
    history: Arc<dyn PriceStore>,
    ledger: Arc<dyn Ledger>,
    call_timeout: Duration,
}

/// Composable rules that triggered this tick, in priority order.
#[derive(Default)]
struct Triggered {
    reasons: Vec<Reason>,
    pending: Vec<PendingFire>,
    classification: Option<MessageType>,
}

impl Triggered {
    fn push(&mut self, rule: RuleId, window_key: String, kind: MessageType, reasons: Vec<Reason>) {
        self.reasons.extend(reasons);
        self.pending.push(PendingFire { rule, window_key });
        self.classification.get_or_insert(kind);
    }
}

impl RuleEngine {
    pub fn new(
        config: Arc<RuleConfig>,
        history: Arc<dyn PriceStore>,
        ledger: Arc<dyn Ledger>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            config,
            history,
            ledger,
            call_timeout,
        }
    }

    pub async fn evaluate(
        &self,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Decision, Report<StorageError>> {
        let cfg = self.config.as_ref();
        let offset = cfg.timezone_offset_minutes;

        if !current_price.is_finite() || current_price <= 0.0 {
            warn!(price = current_price, "refusing to evaluate a non-positive price");
            return Ok(Decision::quiet());
        }

        let hour = clock::local_hour(now, offset);
        if !clock::in_active_window(now, offset, cfg.window_start_hour, cfg.window_end_hour) {
            debug!(hour, "outside notification window");
            return Ok(Decision::quiet());
        }

        if cfg.hourly_enabled {
            let hour_key = clock::hour_key(now, offset);
            if !self.has_fired(RuleId::Hourly, &hour_key).await? {
                return Ok(Decision::heartbeat(hour_key));
            }
        }

        let day_key = clock::day_key(now, offset);
        let mut triggered = Triggered::default();

        if cfg.daily_comparison_hours.contains(&hour) {
            let yesterday_key = clock::previous_day_key(now, offset);
            let yesterday = self
                .bounded(
                    "price_on_day",
                    self.history
                        .price_on_day(&yesterday_key, offset, Aggregator::Max),
                )
                .await?;
            let changed = yesterday.is_some_and(|reference| current_price != reference);
            if changed && !self.has_fired(RuleId::DailyComparison, &day_key).await? {
                triggered.push(
                    RuleId::DailyComparison,
                    day_key.clone(),
                    MessageType::DailyComparison,
                    vec![Reason::PriceChange],
                );
            }
        }

        let mut limits = Vec::new();
        if cfg.upper_limit.is_some_and(|upper| current_price > upper) {
            limits.push(Reason::AboveUpperLimit);
        }
        if cfg.lower_limit.is_some_and(|lower| current_price < lower) {
            limits.push(Reason::BelowLowerLimit);
        }
        let now_key = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        if !limits.is_empty() {
            triggered.push(
                RuleId::Threshold,
                now_key.clone(),
                MessageType::Threshold,
                limits,
            );
        }

        let last_price = if cfg.percent_change_enabled || cfg.price_increase_enabled {
            self.bounded("last_price", self.history.last_price()).await?
        } else {
            None
        };

        if let (true, Some(threshold), Some(last)) = (
            cfg.percent_change_enabled,
            cfg.percent_change_threshold,
            last_price.filter(|last| *last != 0.0),
        ) {
            let delta = (current_price - last) / last * 100.0;
            if delta.abs() >= threshold {
                triggered.push(
                    RuleId::PercentChange,
                    now_key,
                    MessageType::PercentChange,
                    vec![Reason::PercentChange(delta)],
                );
            }
        }

        let increased = last_price.is_some_and(|last| current_price > last);
        if cfg.price_increase_enabled
            && increased
            && !self.has_fired(RuleId::PriceIncrease, &day_key).await?
        {
            triggered.push(
                RuleId::PriceIncrease,
                day_key,
                MessageType::PriceIncrease,
                vec![Reason::PriceIncrease],
            );
        }

        let Some(message_type) = triggered.classification else {
            return Ok(Decision::quiet());
        };

        if self.cooling_down(now).await? {
            debug!(
                reasons = ?triggered.reasons,
                "notification suppressed by cooldown"
            );
            return Ok(Decision::suppressed(triggered.reasons));
        }

        Ok(Decision {
            fire: true,
            message_type,
            reasons: triggered.reasons,
            pending: triggered.pending,
        })
    }

    /// Record the fires proposed by `decision`.
    ///
    /// Call only after the notification was delivered. A key that another
    /// tick recorded first comes back as `AlreadyRecorded`.
    pub async fn commit(
        &self,
        decision: &Decision,
        at: DateTime<Utc>,
    ) -> Result<Vec<(RuleId, RecordOutcome)>, Report<StorageError>> {
        let mut outcomes = Vec::with_capacity(decision.pending.len());
        for fire in &decision.pending {
            let outcome = self
                .bounded(
                    "record_fire",
                    self.ledger.record_fire(fire.rule, &fire.window_key, at),
                )
                .await
                .attach_with(|| format!("rule: {}, window: {}", fire.rule, fire.window_key))?;
            if outcome == RecordOutcome::AlreadyRecorded {
                warn!(
                    rule = %fire.rule,
                    window = %fire.window_key,
                    "fire already recorded by an overlapping tick"
                );
            }
            outcomes.push((fire.rule, outcome));
        }
        Ok(outcomes)
    }

    async fn has_fired(&self, rule: RuleId, window_key: &str) -> Result<bool, Report<StorageError>> {
        self.bounded("has_fired", self.ledger.has_fired(rule, window_key))
            .await
    }

    async fn cooling_down(&self, now: DateTime<Utc>) -> Result<bool, Report<StorageError>> {
        let Some(minutes) = self.config.cooldown_minutes else {
            return Ok(false);
        };
        let last = self
            .bounded("last_fire", self.ledger.last_fire(&RuleId::COMPOSABLE))
            .await?;
        let cooldown = i64::try_from(minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX);
        Ok(last.is_some_and(|record| now - record.fired_at < cooldown))
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: BoxFuture<'_, Result<T, Report<StorageError>>>,
    ) -> Result<T, Report<StorageError>> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .change_context(StorageError::Timeout {
                operation: operation.into(),
            })?
    }
}
