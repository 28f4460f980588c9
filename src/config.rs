use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_price_pointer() -> String {
    "/price".into()
}

fn default_vendor() -> String {
    "unknown".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Upper bound for every storage, source and delivery call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl GeneralConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    /// JSON pointer to the price (a number, or localized text).
    #[serde(default = "default_price_pointer")]
    pub price_pointer: String,
    /// JSON pointer to the vendor name, if the document has one.
    pub vendor_pointer: Option<String>,
    /// Vendor label used when `vendor_pointer` is unset or yields nothing.
    #[serde(default = "default_vendor")]
    pub vendor: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Terminal,
    Telegram,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(&config.general)?;
    validate_source(&config.source)?;
    Ok(())
}

fn validate_general(general: &GeneralConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" must be one of {VALID_LOG_FORMATS:?}",
                general.log_format
            ),
        }));
    }
    if general.call_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.call_timeout_secs must be at least 1".into(),
        }));
    }
    Ok(())
}

fn validate_source(source: &SourceConfig) -> Result<(), Report<ConfigError>> {
    if !(source.url.starts_with("http://") || source.url.starts_with("https://")) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("source.url \"{}\" is not an http(s) URL", source.url),
        }));
    }
    for (name, pointer) in [
        ("source.price_pointer", Some(source.price_pointer.as_str())),
        ("source.vendor_pointer", source.vendor_pointer.as_deref()),
    ] {
        if let Some(p) = pointer.filter(|p| !p.is_empty() && !p.starts_with('/')) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("{name} \"{p}\" must be a JSON pointer starting with '/'"),
            }));
        }
    }
    Ok(())
}
