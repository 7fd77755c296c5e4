use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::money::Money;
use crate::period::BillingPeriod;
use crate::tracking::TrackingCode;

/// A payment notification email as delivered by the mail collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub message_id: Option<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    Received,
    Requested,
    Reminder,
    Cancelled,
    Unknown,
}

impl PaymentDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentDirection::Received => "received",
            PaymentDirection::Requested => "requested",
            PaymentDirection::Reminder => "reminder",
            PaymentDirection::Cancelled => "cancelled",
            PaymentDirection::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PaymentDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(PaymentDirection::Received),
            "requested" => Ok(PaymentDirection::Requested),
            "reminder" => Ok(PaymentDirection::Reminder),
            "cancelled" => Ok(PaymentDirection::Cancelled),
            "unknown" => Ok(PaymentDirection::Unknown),
            other => Err(CoreError::UnknownDirection(other.to_string())),
        }
    }
}

/// Structured form of a notification. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Idempotency key: identical source messages always produce the same id.
    pub external_id: String,
    pub direction: PaymentDirection,
    /// Set when the payer answered one of our requests ("paid your request").
    pub in_reply_to_request: bool,
    pub actor: Option<String>,
    pub amount: Option<Money>,
    pub note: Option<String>,
    pub tracking_code: Option<TrackingCode>,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::containing(self.occurred_at)
    }

    pub fn is_payment(&self) -> bool {
        self.direction == PaymentDirection::Received
    }

    pub fn is_parsed(&self) -> bool {
        self.direction != PaymentDirection::Unknown && self.amount.is_some()
    }
}
