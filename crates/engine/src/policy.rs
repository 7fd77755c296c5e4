use rentledger_core::{Money, OutstandingRequest, PaymentEvent, PrimaryPayerConfig};

use crate::util::normalize_name;

/// Site-specific shortcut evaluated before generic matching. A policy that
/// recognizes an event decides its request outright.
///
/// Events a policy recognizes all compete for the same monthly request, so
/// batch callers must process them one at a time.
pub trait PolicyOverride: Send + Sync {
    fn name(&self) -> &str;

    fn recognizes(&self, event: &PaymentEvent) -> bool;

    fn select<'a>(
        &self,
        event: &PaymentEvent,
        open: &'a [OutstandingRequest],
    ) -> Option<&'a OutstandingRequest>;
}

/// Large payments from the primary payer on/after the cutover settle that
/// payer's request for the month the payment arrived in.
pub struct PrimaryPayerPolicy {
    aliases: Vec<String>,
    recipient: String,
    config: PrimaryPayerConfig,
}

impl PrimaryPayerPolicy {
    pub fn new(config: PrimaryPayerConfig) -> Self {
        Self {
            aliases: config.aliases.iter().map(|a| normalize_name(a)).collect(),
            recipient: normalize_name(&config.recipient),
            config,
        }
    }
}

impl PolicyOverride for PrimaryPayerPolicy {
    fn name(&self) -> &str {
        "primary_payer"
    }

    fn recognizes(&self, event: &PaymentEvent) -> bool {
        let Some(actor) = event.actor.as_deref() else {
            return false;
        };
        let Some(amount) = event.amount else {
            return false;
        };
        event.is_payment()
            && self.aliases.contains(&normalize_name(actor))
            && amount >= Money::from_cents(self.config.min_amount_cents)
            && event.occurred_at >= self.config.cutover
    }

    fn select<'a>(
        &self,
        event: &PaymentEvent,
        open: &'a [OutstandingRequest],
    ) -> Option<&'a OutstandingRequest> {
        let period = event.period();
        open.iter()
            .filter(|r| r.status.is_open())
            .filter(|r| r.category == self.config.category && r.period == period)
            .filter(|r| normalize_name(&r.recipient) == self.recipient)
            .max_by_key(|r| (r.created_at, r.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rentledger_core::{
        BillCategory, BillingPeriod, PaymentDirection, RequestId, RequestStatus, TrackingCode,
    };

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn policy() -> PrimaryPayerPolicy {
        PrimaryPayerPolicy::new(PrimaryPayerConfig {
            aliases: vec!["Jane Roe".to_string(), "J. Roe".to_string()],
            recipient: "Jane Roe".to_string(),
            category: BillCategory::Rent,
            min_amount_cents: 150_000,
            cutover: at(2025, 6, 1),
        })
    }

    fn event(actor: &str, cents: i64, when: DateTime<Utc>) -> PaymentEvent {
        PaymentEvent {
            external_id: "evt".to_string(),
            direction: PaymentDirection::Received,
            in_reply_to_request: false,
            actor: Some(actor.to_string()),
            amount: Some(Money::from_cents(cents)),
            note: None,
            tracking_code: None,
            occurred_at: when,
        }
    }

    fn rent(id: i64, recipient: &str, month: u32) -> OutstandingRequest {
        let period = BillingPeriod::new(2025, month).unwrap();
        OutstandingRequest {
            id: RequestId(id),
            amount: Money::from_cents(250_000),
            recipient: recipient.to_string(),
            category: BillCategory::Rent,
            period,
            status: RequestStatus::Sent,
            tracking_code: TrackingCode::generate(period, BillCategory::Rent),
            created_at: at(2025, month, 1),
            paid_at: None,
        }
    }

    #[test]
    fn recognizes_alias_above_threshold_after_cutover() {
        let p = policy();
        assert!(p.recognizes(&event("j. roe", 250_000, at(2025, 7, 2))));
        assert!(!p.recognizes(&event("Jane Roe", 100_000, at(2025, 7, 2))));
        assert!(!p.recognizes(&event("Jane Roe", 250_000, at(2025, 5, 30))));
        assert!(!p.recognizes(&event("Jon Doe", 250_000, at(2025, 7, 2))));
    }

    #[test]
    fn ignores_non_payments() {
        let mut e = event("Jane Roe", 250_000, at(2025, 7, 2));
        e.direction = PaymentDirection::Requested;
        assert!(!policy().recognizes(&e));
    }

    #[test]
    fn selects_request_for_event_month() {
        let open = vec![rent(1, "Jane Roe", 6), rent(2, "Jane Roe", 7), rent(3, "Jon Doe", 7)];
        let picked = policy().select(&event("Jane Roe", 250_000, at(2025, 7, 2)), &open);
        assert_eq!(picked.map(|r| r.id), Some(RequestId(2)));
    }
}
