use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::DeliveryError;
use crate::notifier::Notifier;

/// Delivers by writing the message to the log.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn channel(&self) -> &str {
        "terminal"
    }

    fn send<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<(), Report<DeliveryError>>> {
        Box::pin(async move {
            tracing::warn!(channel = self.channel(), "ALERT: {}", message);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_notifier_always_delivers() {
        let notifier = TerminalNotifier;
        notifier.send("Hourly price update").await.unwrap();
    }
}
