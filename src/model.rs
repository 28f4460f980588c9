use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::RuleId;

/// A price as reported by the source, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub value: f64,
    pub vendor: String,
}

/// A stored price. Ordered by `observed_at`; never mutated after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceObservation {
    pub value: f64,
    pub vendor: String,
    pub observed_at: DateTime<Utc>,
}

/// A fire that has been durably recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireRecord {
    pub rule_id: String,
    pub window_key: String,
    pub fired_at: DateTime<Utc>,
}

/// How a day's observations collapse into a single reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    Latest,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyRecorded,
}

/// Representative classification of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    None,
    Hourly,
    DailyComparison,
    Threshold,
    PercentChange,
    PriceIncrease,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hourly => "hourly",
            Self::DailyComparison => "dailyComparison",
            Self::Threshold => "threshold",
            Self::PercentChange => "percentChange",
            Self::PriceIncrease => "priceIncrease",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One itemized cause for a composable notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    PriceChange,
    AboveUpperLimit,
    BelowLowerLimit,
    /// Signed change versus the last stored price, in percent.
    PercentChange(f64),
    PriceIncrease,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceChange => f.write_str("priceChange"),
            Self::AboveUpperLimit => f.write_str("aboveUpperLimit"),
            Self::BelowLowerLimit => f.write_str("belowLowerLimit"),
            Self::PercentChange(delta) => write!(f, "percentChange:{delta:.2}"),
            Self::PriceIncrease => f.write_str("priceIncrease"),
        }
    }
}

/// A ledger entry to write once the notification has been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFire {
    pub rule: RuleId,
    pub window_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub fire: bool,
    pub message_type: MessageType,
    /// Empty for the hourly heartbeat. Kept on a cooldown-suppressed decision
    /// so the caller can log what was held back.
    pub reasons: Vec<Reason>,
    pub pending: Vec<PendingFire>,
}

impl Decision {
    pub fn quiet() -> Self {
        Self {
            fire: false,
            message_type: MessageType::None,
            reasons: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn suppressed(reasons: Vec<Reason>) -> Self {
        Self {
            reasons,
            ..Self::quiet()
        }
    }

    pub fn heartbeat(window_key: String) -> Self {
        Self {
            fire: true,
            message_type: MessageType::Hourly,
            reasons: Vec::new(),
            pending: vec![PendingFire {
                rule: RuleId::Hourly,
                window_key,
            }],
        }
    }

    pub fn reason_codes(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_change_reason_has_two_decimals() {
        assert_eq!(Reason::PercentChange(2.5).to_string(), "percentChange:2.50");
        assert_eq!(
            Reason::PercentChange(-3.14159).to_string(),
            "percentChange:-3.14"
        );
    }

    #[test]
    fn heartbeat_carries_no_reasons() {
        let decision = Decision::heartbeat("2024-03-10T10".into());
        assert!(decision.fire);
        assert_eq!(decision.message_type, MessageType::Hourly);
        assert!(decision.reasons.is_empty());
        assert_eq!(decision.pending.len(), 1);
    }

    #[test]
    fn suppressed_keeps_reasons_but_does_not_fire() {
        let decision = Decision::suppressed(vec![Reason::AboveUpperLimit]);
        assert!(!decision.fire);
        assert_eq!(decision.message_type, MessageType::None);
        assert!(decision.pending.is_empty());
        assert_eq!(decision.reason_codes(), vec!["aboveUpperLimit"]);
    }

    #[test]
    fn message_type_serializes_camel_case() {
        let json = serde_json::to_string(&MessageType::DailyComparison).unwrap();
        assert_eq!(json, "\"dailyComparison\"");
    }
}
