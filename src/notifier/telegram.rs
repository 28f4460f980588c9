use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeliveryError};
use crate::notifier::Notifier;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const CHANNEL: &str = "telegram";

/// Sends messages to one chat through the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(
        token: String,
        chat_id: String,
        timeout: Duration,
    ) -> Result<Self, Report<DeliveryError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(DeliveryError::Request {
                channel: CHANNEL.into(),
            })?;
        Ok(Self {
            client,
            token,
            chat_id,
        })
    }

    /// Credentials come from `BOT_TOKEN` and `CHAT_ID`.
    pub fn from_env(timeout: Duration) -> Result<Self, Report<ConfigError>> {
        let var = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Report::new(ConfigError::Missing { key: key.into() }))
        };
        let token = var("BOT_TOKEN")?;
        let chat_id = var("CHAT_ID")?;
        Self::new(token, chat_id, timeout).change_context(ConfigError::Validation {
            field: "telegram client".into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{TELEGRAM_API_URL}/bot{}/sendMessage", self.token)
    }
}

/// Map a Bot API reply onto a delivery result.
fn check_response(status: reqwest::StatusCode, body: &str) -> Result<(), Report<DeliveryError>> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    match parsed {
        Some(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
        Some(ApiResponse { description, .. }) => Err(Report::new(DeliveryError::Rejected {
            channel: CHANNEL.into(),
        })
        .attach(format!(
            "HTTP status: {status}, description: {}",
            description.as_deref().unwrap_or("none")
        ))),
        None => Err(Report::new(DeliveryError::Rejected {
            channel: CHANNEL.into(),
        })
        .attach(format!("HTTP status: {status}, unreadable body"))),
    }
}

impl Notifier for TelegramNotifier {
    fn channel(&self) -> &str {
        CHANNEL
    }

    fn send<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<(), Report<DeliveryError>>> {
        Box::pin(async move {
            // reqwest errors embed the URL, and the URL embeds the token.
            let response = self
                .client
                .post(self.endpoint())
                .json(&SendMessage {
                    chat_id: &self.chat_id,
                    text: message,
                })
                .send()
                .await
                .map_err(|e| {
                    Report::new(DeliveryError::Request {
                        channel: CHANNEL.into(),
                    })
                    .attach(format!("timeout: {}, connect: {}", e.is_timeout(), e.is_connect()))
                })?;

            let status = response.status();
            let body = response.text().await.map_err(|_| {
                Report::new(DeliveryError::Request {
                    channel: CHANNEL.into(),
                })
                .attach("failed to read response body")
            })?;

            check_response(status, &body)?;
            tracing::debug!(chat_id = %self.chat_id, "telegram message delivered");
            Ok(())
        })
    }
}
