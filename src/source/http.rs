use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::model::Quote;
use crate::source::{PriceSource, parse_price_text};

/// Reads the price from a JSON document served over HTTP.
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
    price_pointer: String,
    vendor_pointer: Option<String>,
    vendor: String,
}

impl HttpPriceSource {
    pub fn new(config: &SourceConfig, timeout: Duration) -> Result<Self, Report<SourceError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(SourceError::Request {
                source_url: config.url.clone(),
            })?;
        Ok(Self {
            client,
            url: config.url.clone(),
            price_pointer: config.price_pointer.clone(),
            vendor_pointer: config.vendor_pointer.clone(),
            vendor: config.vendor.clone(),
        })
    }

    fn request_error(&self) -> SourceError {
        SourceError::Request {
            source_url: self.url.clone(),
        }
    }

    fn parse_error(&self) -> SourceError {
        SourceError::Parse {
            source_url: self.url.clone(),
        }
    }

    fn extract_quote(&self, body: &Value) -> Result<Quote, Report<SourceError>> {
        let raw = body
            .pointer(&self.price_pointer)
            .ok_or_else(|| Report::new(self.parse_error()))
            .attach_with(|| format!("no value at {}", self.price_pointer))?;

        let value = match raw {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite() && *v > 0.0),
            Value::String(s) => parse_price_text(s),
            _ => None,
        }
        .ok_or_else(|| Report::new(self.parse_error()))
        .attach_with(|| format!("unusable price: {raw}"))?;

        let vendor = self
            .vendor_pointer
            .as_deref()
            .and_then(|pointer| body.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(self.vendor.as_str())
            .to_string();

        Ok(Quote { value, vendor })
    }
}

impl PriceSource for HttpPriceSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Quote, Report<SourceError>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .change_context(self.request_error())?;

            if !response.status().is_success() {
                return Err(Report::new(self.request_error())
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let body: Value = response
                .json()
                .await
                .change_context(self.parse_error())?;

            let quote = self.extract_quote(&body)?;
            debug!(url = %self.url, price = quote.value, vendor = %quote.vendor, "price fetched");
            Ok(quote)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(vendor_pointer: Option<&str>) -> HttpPriceSource {
        let config = SourceConfig {
            url: "https://example.invalid/usdt".into(),
            price_pointer: "/best/sell/price".into(),
            vendor_pointer: vendor_pointer.map(String::from),
            vendor: "unknown".into(),
        };
        HttpPriceSource::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn numeric_price_and_vendor_extracted() {
        let body = json!({ "best": { "sell": { "price": 1187.5, "exchange": "Lemon" } } });
        let quote = source(Some("/best/sell/exchange"))
            .extract_quote(&body)
            .unwrap();
        assert_eq!(
            quote,
            Quote {
                value: 1187.5,
                vendor: "Lemon".into()
            }
        );
    }

    #[test]
    fn localized_string_price_is_normalized() {
        let body = json!({ "best": { "sell": { "price": "$ 1.187,50" } } });
        let quote = source(None).extract_quote(&body).unwrap();
        assert_eq!(quote.value, 1187.5);
        assert_eq!(quote.vendor, "unknown");
    }

    #[test]
    fn blank_vendor_falls_back_to_configured_label() {
        let body = json!({ "best": { "sell": { "price": 10, "exchange": "  " } } });
        let quote = source(Some("/best/sell/exchange"))
            .extract_quote(&body)
            .unwrap();
        assert_eq!(quote.vendor, "unknown");
    }

    #[test]
    fn missing_or_invalid_price_is_parse_error() {
        let src = source(None);
        for body in [
            json!({}),
            json!({ "best": { "sell": { "price": null } } }),
            json!({ "best": { "sell": { "price": "sin datos" } } }),
            json!({ "best": { "sell": { "price": -3 } } }),
        ] {
            let err = src.extract_quote(&body).unwrap_err();
            assert!(matches!(err.current_context(), SourceError::Parse { .. }));
        }
    }

    /// Requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_unreachable_host() {
        let err = source(None).fetch().await.unwrap_err();
        assert!(matches!(err.current_context(), SourceError::Request { .. }));
    }
}
