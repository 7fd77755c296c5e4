use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::category::BillCategory;
use crate::error::CoreError;
use crate::money::Money;
use crate::period::BillingPeriod;
use crate::tracking::TrackingCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle: `Pending -> Sent -> Paid`, with `Foregone` reachable from the
/// two open states by manual action only. Paid and Foregone are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Sent,
    Paid,
    Foregone,
}

impl RequestStatus {
    pub fn is_open(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Sent)
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Sent)
                | (RequestStatus::Pending, RequestStatus::Paid)
                | (RequestStatus::Sent, RequestStatus::Paid)
                | (RequestStatus::Pending, RequestStatus::Foregone)
                | (RequestStatus::Sent, RequestStatus::Foregone)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Sent => "sent",
            RequestStatus::Paid => "paid",
            RequestStatus::Foregone => "foregone",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "sent" => Ok(RequestStatus::Sent),
            "paid" => Ok(RequestStatus::Paid),
            "foregone" => Ok(RequestStatus::Foregone),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Money owed by one recipient for one bill in one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutstandingRequest {
    pub id: RequestId,
    pub amount: Money,
    pub recipient: String,
    pub category: BillCategory,
    pub period: BillingPeriod,
    pub status: RequestStatus,
    pub tracking_code: TrackingCode,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Input for creating a request; the tracking code is derived, never supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub amount: Money,
    pub recipient: String,
    pub category: BillCategory,
    pub period: BillingPeriod,
}

impl NewRequest {
    pub fn tracking_code(&self) -> TrackingCode {
        TrackingCode::generate(self.period, self.category)
    }
}
