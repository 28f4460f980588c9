pub mod engine;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use error_stack::{Report, ResultExt};

use crate::error::ConfigError;

const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// Identity of a rule in the notification ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    Hourly,
    DailyComparison,
    Threshold,
    PercentChange,
    PriceIncrease,
}

impl RuleId {
    /// Rules that accumulate reasons and share the cooldown.
    pub const COMPOSABLE: [RuleId; 4] = [
        RuleId::DailyComparison,
        RuleId::Threshold,
        RuleId::PercentChange,
        RuleId::PriceIncrease,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::DailyComparison => "dailyComparison",
            Self::Threshold => "threshold",
            Self::PercentChange => "percentChange",
            Self::PriceIncrease => "priceIncrease",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule settings, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    pub timezone_offset_minutes: i32,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    pub hourly_enabled: bool,
    pub daily_comparison_hours: BTreeSet<u32>,
    pub upper_limit: Option<f64>,
    pub lower_limit: Option<f64>,
    pub percent_change_enabled: bool,
    pub percent_change_threshold: Option<f64>,
    pub price_increase_enabled: bool,
    pub cooldown_minutes: Option<u64>,
}

impl RuleConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, Report<ConfigError>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Report<ConfigError>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let timezone_offset_minutes: i32 = required(&get, "TIMEZONE_OFFSET")?;
        let window_start_hour: u32 = required(&get, "NOTIFICATION_START_TIME")?;
        let window_end_hour: u32 = required(&get, "NOTIFICATION_END_TIME")?;
        let hourly_enabled = flag(&get, "HOURLY_NOTIFICATION_ENABLED")?;
        let daily_comparison_hours = hour_list(&get, "PRICE_CHANGE_NOTIFICATION_TIMES")?;
        let upper_limit: Option<f64> = optional(&get, "UPPER_LIMIT")?;
        let lower_limit: Option<f64> = optional(&get, "LOWER_LIMIT")?;
        let percent_change_enabled = flag(&get, "PERCENTAGE_CHANGE_ENABLED")?;
        let percent_change_threshold: Option<f64> = optional(&get, "PERCENTAGE_CHANGE_THRESHOLD")?;
        let price_increase_enabled = flag(&get, "PRICE_INCREASE_NOTIFICATION_ENABLED")?;
        let cooldown_minutes: Option<u64> = optional(&get, "NOTIFICATION_COOLDOWN")?;

        if percent_change_enabled && percent_change_threshold.is_none() {
            return Err(Report::new(ConfigError::Missing {
                key: "PERCENTAGE_CHANGE_THRESHOLD".into(),
            })
            .attach("required when PERCENTAGE_CHANGE_ENABLED is true"));
        }

        let config = Self {
            timezone_offset_minutes,
            window_start_hour,
            window_end_hour,
            hourly_enabled,
            daily_comparison_hours,
            upper_limit,
            lower_limit,
            percent_change_enabled,
            percent_change_threshold,
            price_increase_enabled,
            cooldown_minutes,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Report<ConfigError>> {
        if self.timezone_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(invalid(format!(
                "TIMEZONE_OFFSET {} is outside ±{MAX_OFFSET_MINUTES} minutes",
                self.timezone_offset_minutes
            )));
        }
        if self.window_start_hour > 23 {
            return Err(invalid(format!(
                "NOTIFICATION_START_TIME {} is not an hour of day",
                self.window_start_hour
            )));
        }
        if self.window_end_hour > 24 {
            return Err(invalid(format!(
                "NOTIFICATION_END_TIME {} is not an hour of day",
                self.window_end_hour
            )));
        }
        for (key, value) in [
            ("UPPER_LIMIT", self.upper_limit),
            ("LOWER_LIMIT", self.lower_limit),
            ("PERCENTAGE_CHANGE_THRESHOLD", self.percent_change_threshold),
        ] {
            if let Some(v) = value.filter(|v| !v.is_finite() || *v < 0.0) {
                return Err(invalid(format!("{key} must be a non-negative number, got {v}")));
            }
        }
        Ok(())
    }

    /// A window with `start >= end` never opens.
    pub fn window_is_empty(&self) -> bool {
        self.window_start_hour >= self.window_end_hour
    }
}

fn invalid(field: String) -> Report<ConfigError> {
    Report::new(ConfigError::Validation { field })
}

fn optional<T, G>(get: &G, key: &str) -> Result<Option<T>, Report<ConfigError>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| invalid(format!("{key}: cannot parse \"{raw}\"")))
        })
        .transpose()
}

fn required<T, G>(get: &G, key: &str) -> Result<T, Report<ConfigError>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    optional(get, key)?.ok_or_else(|| Report::new(ConfigError::Missing { key: key.into() }))
}

fn flag<G>(get: &G, key: &str) -> Result<bool, Report<ConfigError>>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(false),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(invalid(format!("{key}: \"{other}\" is not a boolean"))),
    }
}

fn hour_list<G>(get: &G, key: &str) -> Result<BTreeSet<u32>, Report<ConfigError>>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(BTreeSet::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .ok()
                .filter(|hour| *hour < 24)
                .ok_or_else(|| invalid(format!("{key}: \"{part}\" is not an hour of day")))
        })
        .collect::<Result<BTreeSet<_>, _>>()
        .attach_with(|| format!("{key}={raw}"))
}
