mod clock;
mod config;
mod error;
mod model;
mod notifier;
mod rules;
mod source;
mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, NotifierKind};
use error::{DeliveryError, StorageError};
use model::Quote;
use notifier::telegram::TelegramNotifier;
use notifier::terminal::TerminalNotifier;
use notifier::{Notifier, compose_message};
use rules::RuleConfig;
use rules::engine::RuleEngine;
use source::PriceSource;
use source::http::HttpPriceSource;
use storage::PriceStore;
use storage::sqlite::SqliteStorage;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("price source error")]
    Source,
    #[display("notifier error")]
    Notifier,
}

#[derive(Parser)]
#[command(
    name = "price-sentinel",
    about = "Watches a price and notifies without repeating itself"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Observe the price once, notify if warranted, and exit
    Tick,
    /// Run a tick every few minutes until Ctrl-C
    Watch {
        #[arg(long, default_value_t = 15)]
        every_minutes: u64,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let rules = RuleConfig::from_env().change_context(AppError::Config)?;
    if rules.window_is_empty() {
        warn!(
            start = rules.window_start_hour,
            end = rules.window_end_hour,
            "notification window is empty; nothing will ever be sent"
        );
    }
    info!(?rules, "rule configuration loaded");

    let timeout = config.general.call_timeout();

    // ── Storage ───────────────────────────────────────────────────────────────
    let data_dir = &config.general.data_dir;
    let db_path = format!("{data_dir}/price-sentinel.db");
    let storage = Arc::new(
        SqliteStorage::open(Path::new(&db_path))
            .await
            .change_context(AppError::Storage)?,
    );

    // ── Collaborators ─────────────────────────────────────────────────────────
    let source = HttpPriceSource::new(&config.source, timeout).change_context(AppError::Source)?;
    let notifier = build_notifier(&config)?;
    let engine = RuleEngine::new(
        Arc::new(rules),
        Arc::clone(&storage) as Arc<dyn PriceStore>,
        Arc::clone(&storage) as Arc<dyn storage::Ledger>,
        timeout,
    );

    let ticker = Ticker {
        source: &source,
        history: storage.as_ref(),
        engine: &engine,
        notifier: notifier.as_ref(),
        timeout,
    };

    match cli.command.unwrap_or(Command::Tick) {
        Command::Tick => {
            ticker.tick(Utc::now()).await;
        }
        Command::Watch { every_minutes } => watch(&ticker, every_minutes).await?,
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_notifier(config: &AppConfig) -> Result<Box<dyn Notifier>, Report<AppError>> {
    match config.notifier.kind {
        NotifierKind::Terminal => Ok(Box::new(TerminalNotifier)),
        NotifierKind::Telegram => {
            let notifier = TelegramNotifier::from_env(config.general.call_timeout())
                .change_context(AppError::Notifier)?;
            Ok(Box::new(notifier))
        }
    }
}

async fn watch(ticker: &Ticker<'_>, every_minutes: u64) -> Result<(), Report<AppError>> {
    if every_minutes == 0 {
        return Err(Report::new(AppError::Config).attach("--every-minutes must be at least 1"));
    }

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl+c received, stopping after the current tick");
        }
        cancel_on_signal.cancel();
    });

    let period = Duration::from_secs(every_minutes.saturating_mul(60));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(every_minutes, "watching");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                ticker.tick(Utc::now()).await;
            }
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    SourceFailed,
    Aborted,
    Quiet,
    Suppressed,
    DeliveryFailed,
    Delivered,
}

/// One observation → decision → delivery → record pass.
struct Ticker<'a> {
    source: &'a dyn PriceSource,
    history: &'a dyn PriceStore,
    engine: &'a RuleEngine,
    notifier: &'a dyn Notifier,
    timeout: Duration,
}

impl Ticker<'_> {
    /// Never fails: every problem is logged and ends the tick without a
    /// notification or a ledger write.
    async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let quote = match self.source.fetch().await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(error = ?e, source = self.source.name(), "price fetch failed");
                return TickOutcome::SourceFailed;
            }
        };

        let evaluation = self.engine.evaluate(quote.value, now).await;

        // The observation is stored regardless of the decision, after the
        // engine has compared against the previous one.
        match self.append(&quote, now).await {
            Ok(observation) => info!(
                price = observation.value,
                vendor = %observation.vendor,
                "price stored"
            ),
            Err(e) => warn!(error = ?e, "failed to store price"),
        }

        let decision = match evaluation {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = ?e, "evaluation aborted; nothing sent");
                return TickOutcome::Aborted;
            }
        };

        if !decision.fire {
            if decision.reasons.is_empty() {
                debug!("no rule triggered");
                return TickOutcome::Quiet;
            }
            debug!(reasons = ?decision.reason_codes(), "held back by cooldown");
            return TickOutcome::Suppressed;
        }

        let message = compose_message(&quote, &decision);
        if let Err(e) = self.deliver(&message).await {
            error!(
                error = ?e,
                message_type = %decision.message_type,
                "delivery failed; will retry on a later tick"
            );
            return TickOutcome::DeliveryFailed;
        }
        info!(
            message_type = %decision.message_type,
            reasons = ?decision.reason_codes(),
            channel = self.notifier.channel(),
            "notification sent"
        );

        if let Err(e) = self.engine.commit(&decision, now).await {
            error!(
                error = ?e,
                "notification sent but not recorded; it may repeat on the next tick"
            );
        }
        TickOutcome::Delivered
    }

    async fn append(
        &self,
        quote: &Quote,
        now: DateTime<Utc>,
    ) -> Result<model::PriceObservation, Report<StorageError>> {
        tokio::time::timeout(self.timeout, self.history.append(quote, now))
            .await
            .change_context(StorageError::Timeout {
                operation: "append".into(),
            })?
    }

    async fn deliver(&self, message: &str) -> Result<(), Report<DeliveryError>> {
        tokio::time::timeout(self.timeout, self.notifier.send(message))
            .await
            .change_context(DeliveryError::Timeout {
                channel: self.notifier.channel().into(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use futures::future::BoxFuture;

    use crate::error::SourceError;
    use crate::rules::RuleId;
    use crate::storage::Ledger;

    struct FixedSource(Option<f64>);

    impl PriceSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self) -> BoxFuture<'_, Result<Quote, Report<SourceError>>> {
            Box::pin(async move {
                self.0
                    .map(|value| Quote {
                        value,
                        vendor: "Lemon".into(),
                    })
                    .ok_or_else(|| {
                        Report::new(SourceError::Request {
                            source_url: "fixed".into(),
                        })
                    })
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn channel(&self) -> &str {
            "recording"
        }

        fn send<'a>(
            &'a self,
            message: &'a str,
        ) -> BoxFuture<'a, Result<(), Report<DeliveryError>>> {
            Box::pin(async move {
                if self.fail {
                    return Err(Report::new(DeliveryError::Rejected {
                        channel: "recording".into(),
                    }));
                }
                self.sent.lock().unwrap().push(message.to_string());
                Ok(())
            })
        }
    }

    fn rules() -> RuleConfig {
        RuleConfig {
            timezone_offset_minutes: 0,
            window_start_hour: 8,
            window_end_hour: 22,
            hourly_enabled: true,
            daily_comparison_hours: BTreeSet::new(),
            upper_limit: Some(1200.0),
            lower_limit: None,
            percent_change_enabled: false,
            percent_change_threshold: None,
            price_increase_enabled: false,
            cooldown_minutes: Some(30),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap()
    }

    async fn setup() -> (Arc<SqliteStorage>, RuleEngine) {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let engine = RuleEngine::new(
            Arc::new(rules()),
            Arc::clone(&storage) as Arc<dyn PriceStore>,
            Arc::clone(&storage) as Arc<dyn Ledger>,
            Duration::from_secs(5),
        );
        (storage, engine)
    }

    #[tokio::test]
    async fn delivered_heartbeat_is_recorded_and_not_repeated() {
        let (storage, engine) = setup().await;
        let source = FixedSource(Some(1000.0));
        let notifier = RecordingNotifier::default();
        let ticker = Ticker {
            source: &source,
            history: storage.as_ref(),
            engine: &engine,
            notifier: &notifier,
            timeout: Duration::from_secs(5),
        };

        assert_eq!(ticker.tick(at(10, 0)).await, TickOutcome::Delivered);
        assert_eq!(ticker.tick(at(10, 15)).await, TickOutcome::Quiet);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Hourly price update"));
        assert!(storage.has_fired(RuleId::Hourly, "2024-03-10T10").await.unwrap());
        assert_eq!(storage.last_price().await.unwrap(), Some(1000.0));
    }

    #[tokio::test]
    async fn failed_delivery_records_nothing() {
        let (storage, engine) = setup().await;
        let source = FixedSource(Some(1000.0));
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let ticker = Ticker {
            source: &source,
            history: storage.as_ref(),
            engine: &engine,
            notifier: &notifier,
            timeout: Duration::from_secs(5),
        };

        assert_eq!(ticker.tick(at(10, 0)).await, TickOutcome::DeliveryFailed);
        assert!(!storage.has_fired(RuleId::Hourly, "2024-03-10T10").await.unwrap());
        // The observation itself is still kept.
        assert_eq!(storage.last_price().await.unwrap(), Some(1000.0));
    }

    #[tokio::test]
    async fn threshold_then_cooldown() {
        let (storage, engine) = setup().await;
        storage
            .record_fire(RuleId::Hourly, "2024-03-10T10", at(10, 0))
            .await
            .unwrap();
        let source = FixedSource(Some(1250.0));
        let notifier = RecordingNotifier::default();
        let ticker = Ticker {
            source: &source,
            history: storage.as_ref(),
            engine: &engine,
            notifier: &notifier,
            timeout: Duration::from_secs(5),
        };

        assert_eq!(ticker.tick(at(10, 5)).await, TickOutcome::Delivered);
        assert_eq!(ticker.tick(at(10, 20)).await, TickOutcome::Suppressed);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("above the upper limit"));
    }

    #[tokio::test]
    async fn source_failure_ends_tick_quietly() {
        let (storage, engine) = setup().await;
        let source = FixedSource(None);
        let notifier = RecordingNotifier::default();
        let ticker = Ticker {
            source: &source,
            history: storage.as_ref(),
            engine: &engine,
            notifier: &notifier,
            timeout: Duration::from_secs(5),
        };

        assert_eq!(ticker.tick(at(10, 0)).await, TickOutcome::SourceFailed);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(storage.last_price().await.unwrap(), None);
    }
}
