pub mod telegram;
pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::DeliveryError;
use crate::model::{Decision, MessageType, Quote, Reason};

/// Sink for notifications.
pub trait Notifier: Send + Sync {
    /// Channel name used in logs and errors.
    fn channel(&self) -> &str;

    fn send<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<(), Report<DeliveryError>>>;
}

/// Render the message a fired decision is delivered as.
pub fn compose_message(quote: &Quote, decision: &Decision) -> String {
    let mut message = format!(
        "{}\nNew price: {:.2} at {}.",
        headline(decision.message_type),
        quote.value,
        quote.vendor
    );
    if !decision.reasons.is_empty() {
        message.push_str("\nReasons:");
        for reason in &decision.reasons {
            message.push_str("\n- ");
            message.push_str(&describe(reason));
        }
    }
    message
}

fn headline(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Hourly => "Hourly price update",
        MessageType::DailyComparison => "Price changed since yesterday",
        MessageType::Threshold => "Price outside the configured limits",
        MessageType::PercentChange => "Significant price movement",
        MessageType::PriceIncrease => "Price went up",
        MessageType::None => "Price update",
    }
}

fn describe(reason: &Reason) -> String {
    match reason {
        Reason::PriceChange => "differs from yesterday's high".into(),
        Reason::AboveUpperLimit => "above the upper limit".into(),
        Reason::BelowLowerLimit => "below the lower limit".into(),
        Reason::PercentChange(delta) => format!("moved {delta:+.2}% since the last reading"),
        Reason::PriceIncrease => "higher than the last reading".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> Quote {
        Quote {
            value: 1187.5,
            vendor: "Lemon".into(),
        }
    }

    #[test]
    fn heartbeat_message_has_no_reason_list() {
        let decision = Decision::heartbeat("2024-03-10T10".into());
        let message = compose_message(&quote(), &decision);
        assert_eq!(message, "Hourly price update\nNew price: 1187.50 at Lemon.");
    }

    #[test]
    fn composable_message_lists_every_reason() {
        let decision = Decision {
            fire: true,
            message_type: MessageType::Threshold,
            reasons: vec![Reason::AboveUpperLimit, Reason::PercentChange(-2.5)],
            pending: Vec::new(),
        };
        let message = compose_message(&quote(), &decision);
        assert_eq!(
            message,
            "Price outside the configured limits\n\
             New price: 1187.50 at Lemon.\n\
             Reasons:\n\
             - above the upper limit\n\
             - moved -2.50% since the last reading"
        );
    }
}
