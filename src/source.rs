pub mod http;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::SourceError;
use crate::model::Quote;

/// Where the observed price comes from.
pub trait PriceSource: Send + Sync {
    /// Human-readable origin, used in logs.
    fn name(&self) -> &str;

    fn fetch(&self) -> BoxFuture<'_, Result<Quote, Report<SourceError>>>;
}

/// Parse a price rendered for a Spanish-language locale.
///
/// Dots are thousands separators and the comma is the decimal point, so
/// `"$ 1.234,56"` is `1234.56`. The result is rounded to cents. Returns
/// `None` for anything that is not a finite positive amount.
pub fn parse_price_text(text: &str) -> Option<f64> {
    let normalized: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$' && *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let value: f64 = normalized.parse().ok()?;
    let rounded = (value * 100.0).round() / 100.0;
    (rounded.is_finite() && rounded > 0.0).then_some(rounded)
}
