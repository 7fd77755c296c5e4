use std::cmp::Ordering;

use rentledger_core::{
    BillCategory, EngineConfig, MatchFailure, MatchMethod, MatchResult, MatcherConfig, Money,
    OutstandingRequest, PaymentDirection, PaymentEvent, ScoredCandidate, UnresolvedCodePolicy,
};

use crate::policy::{PolicyOverride, PrimaryPayerPolicy};
use crate::util::{levenshtein_distance, normalize_name};

pub const AMOUNT_WEIGHT: f64 = 0.5;
pub const NAME_WEIGHT: f64 = 0.35;
pub const NOTE_WEIGHT: f64 = 0.15;

/// `1 - |candidate - event| / candidate`, clamped to [0, 1].
pub fn amount_score(candidate: Money, event: Money) -> f64 {
    let base = candidate.abs().to_f64();
    if base == 0.0 {
        return if event.is_zero() { 1.0 } else { 0.0 };
    }
    (1.0 - candidate.distance(event).to_f64() / base).clamp(0.0, 1.0)
}

/// Levenshtein similarity of two names, ignoring case and surrounding or
/// repeated whitespace. Empty names never match anything.
pub fn name_score(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - (levenshtein_distance(&a, &b) as f64 / max_len as f64)
}

pub fn note_score(note: Option<&str>, category: BillCategory) -> f64 {
    match note {
        Some(text) if category.is_mentioned_in(text) => 1.0,
        _ => 0.0,
    }
}

pub fn weighted_confidence(amount: f64, name: f64, note: f64) -> f64 {
    AMOUNT_WEIGHT * amount + NAME_WEIGHT * name + NOTE_WEIGHT * note
}

/// Pure matching of one payment event against a snapshot of open requests.
/// Never writes; see the storage crate's applier for side effects.
pub struct ReconciliationMatcher {
    config: MatcherConfig,
    policy: Option<Box<dyn PolicyOverride>>,
}

impl ReconciliationMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            policy: None,
        }
    }

    /// Builds the matcher and installs the primary payer policy when one is
    /// configured.
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        let matcher = Self::new(config.matcher.clone());
        match &config.policy {
            Some(policy) => matcher.with_policy(Box::new(PrimaryPayerPolicy::new(policy.clone()))),
            None => matcher,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn PolicyOverride>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Whether the installed policy claims this event. Claimed events must be
    /// matched and applied sequentially.
    pub fn policy_claims(&self, event: &PaymentEvent) -> bool {
        self.policy.as_ref().is_some_and(|p| p.recognizes(event))
    }

    pub fn match_event(&self, event: &PaymentEvent, requests: &[OutstandingRequest]) -> MatchResult {
        let event_id = event.external_id.as_str();

        if event.direction == PaymentDirection::Unknown {
            return MatchResult::unmatched(event_id, MatchFailure::Unparseable, Vec::new());
        }
        if !event.is_payment() {
            return MatchResult::unmatched(event_id, MatchFailure::NotAPayment, Vec::new());
        }
        let Some(amount) = event.amount else {
            return MatchResult::unmatched(event_id, MatchFailure::Unparseable, Vec::new());
        };

        let open: Vec<OutstandingRequest> = requests
            .iter()
            .filter(|r| r.status.is_open())
            .cloned()
            .collect();

        if let Some(policy) = self.policy.as_ref().filter(|p| p.recognizes(event)) {
            tracing::debug!(event_id, policy = policy.name(), "policy override claimed event");
            return match policy.select(event, &open) {
                Some(request) => MatchResult::matched(event_id, request.id, MatchMethod::Policy, 1.0),
                None => MatchResult::unmatched(event_id, MatchFailure::PolicyRequestMissing, Vec::new()),
            };
        }

        if let Some(code) = &event.tracking_code {
            let coded: Vec<&OutstandingRequest> =
                open.iter().filter(|r| &r.tracking_code == code).collect();
            let resolved = match coded.as_slice() {
                [only] => Some(*only),
                [] => None,
                // One code covers every tenant's share of a bill; the payer's
                // name picks between them.
                several => {
                    let actor = event.actor.as_deref().map(normalize_name);
                    let mut named = several
                        .iter()
                        .filter(|r| actor.as_deref() == Some(normalize_name(&r.recipient).as_str()));
                    match (named.next(), named.next()) {
                        (Some(r), None) => Some(*r),
                        _ => None,
                    }
                }
            };
            if let Some(request) = resolved {
                return MatchResult::matched(event_id, request.id, MatchMethod::Tracking, 1.0);
            }
            if coded.is_empty() {
                tracing::warn!(event_id, code = %code, "tracking code does not resolve to an open request");
                if self.config.unresolved_code == UnresolvedCodePolicy::FailFast {
                    return MatchResult::unmatched(
                        event_id,
                        MatchFailure::UnknownTrackingCode,
                        Vec::new(),
                    );
                }
            } else {
                tracing::debug!(event_id, code = %code, count = coded.len(), "tracking code is shared, falling back to fuzzy matching");
            }
        }

        let tolerance = self.config.amount_tolerance();
        let mut scored: Vec<(&OutstandingRequest, ScoredCandidate)> = open
            .iter()
            .filter(|r| r.amount.distance(amount) <= tolerance)
            .map(|r| (r, self.score(event, amount, r)))
            .collect();

        if scored.is_empty() {
            return MatchResult::unmatched(event_id, MatchFailure::NoCandidates, Vec::new());
        }

        // Highest confidence first; ties go to the most recently created request.
        scored.sort_by(|(ra, a), (rb, b)| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then(rb.created_at.cmp(&ra.created_at))
                .then(rb.id.cmp(&ra.id))
        });

        let (best_request, best) = scored[0];
        if best.confidence >= self.config.auto_match_threshold {
            return MatchResult::matched(event_id, best_request.id, MatchMethod::Fuzzy, best.confidence);
        }

        let top: Vec<ScoredCandidate> = scored
            .into_iter()
            .take(self.config.review_candidates)
            .map(|(_, c)| c)
            .collect();
        MatchResult::unmatched(event_id, MatchFailure::LowConfidence, top)
    }

    fn score(&self, event: &PaymentEvent, amount: Money, request: &OutstandingRequest) -> ScoredCandidate {
        let amount_score = amount_score(request.amount, amount);
        let name_score = event
            .actor
            .as_deref()
            .map_or(0.0, |actor| name_score(actor, &request.recipient));
        let note_score = note_score(event.note.as_deref(), request.category);
        ScoredCandidate {
            request_id: request.id,
            amount_score,
            name_score,
            note_score,
            confidence: weighted_confidence(amount_score, name_score, note_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use rentledger_core::{
        BillingPeriod, PrimaryPayerConfig, RequestId, RequestStatus, TrackingCode,
    };

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn request(id: i64, cents: i64, recipient: &str, category: BillCategory) -> OutstandingRequest {
        let period = BillingPeriod::new(2025, 7).unwrap();
        OutstandingRequest {
            id: RequestId(id),
            amount: Money::from_cents(cents),
            recipient: recipient.to_string(),
            category,
            period,
            status: RequestStatus::Pending,
            tracking_code: TrackingCode::generate(period, category),
            created_at: at(2025, 7, 1) + chrono::Duration::minutes(id),
            paid_at: None,
        }
    }

    fn payment(cents: i64, actor: &str) -> PaymentEvent {
        PaymentEvent {
            external_id: "evt-1".to_string(),
            direction: PaymentDirection::Received,
            in_reply_to_request: true,
            actor: Some(actor.to_string()),
            amount: Some(Money::from_cents(cents)),
            note: None,
            tracking_code: None,
            occurred_at: at(2025, 7, 10),
        }
    }

    fn matcher() -> ReconciliationMatcher {
        ReconciliationMatcher::new(MatcherConfig::default())
    }

    #[test]
    fn near_miss_is_routed_to_review() {
        let requests = vec![request(1, 17340, "John Doe", BillCategory::Electricity)];
        let result = matcher().match_event(&payment(17240, "Jon Doe"), &requests);

        assert!(!result.is_matched());
        assert_eq!(result.failure, Some(MatchFailure::LowConfidence));
        let top = result.candidates[0];
        assert!((top.amount_score - 0.994).abs() < 0.001);
        assert!((top.name_score - 0.875).abs() < 1e-9);
        assert_eq!(top.note_score, 0.0);
        assert!((top.confidence - 0.803).abs() < 0.001);
    }

    #[test]
    fn amount_and_name_alone_stay_below_threshold() {
        // 0.5 + 0.35 tops out at 0.85: without a note keyword a fuzzy match
        // always goes to review under the default threshold.
        let requests = vec![request(1, 17340, "John Doe", BillCategory::Electricity)];
        let result = matcher().match_event(&payment(17340, "John Doe"), &requests);
        assert_eq!(result.failure, Some(MatchFailure::LowConfidence));
        assert!((result.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn exact_amount_and_name_is_auto_matched() {
        let requests = vec![request(1, 17340, "John Doe", BillCategory::Electricity)];
        let mut event = payment(17340, "john doe");
        event.note = Some("electric for july".to_string());
        let result = matcher().match_event(&event, &requests);
        assert!(result.is_matched());
        assert_eq!(result.method, Some(MatchMethod::Fuzzy));
        assert_eq!(result.request_id, Some(RequestId(1)));
    }

    #[test]
    fn tracking_code_beats_poor_scores() {
        let requests = vec![request(1, 50_000, "Somebody Else", BillCategory::Water)];
        let mut event = payment(100, "Jon Doe");
        event.tracking_code = Some(requests[0].tracking_code.clone());

        let result = matcher().match_event(&event, &requests);
        assert_eq!(result.method, Some(MatchMethod::Tracking));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.request_id, Some(RequestId(1)));
    }

    #[test]
    fn shared_tracking_code_is_narrowed_by_payer_name() {
        let requests = vec![
            request(1, 5240, "John Doe", BillCategory::Water),
            request(2, 5240, "Jane Roe", BillCategory::Water),
        ];
        let mut event = payment(5240, "Jane Roe");
        event.tracking_code = Some(requests[0].tracking_code.clone());
        let result = matcher().match_event(&event, &requests);
        assert_eq!(result.method, Some(MatchMethod::Tracking));
        assert_eq!(result.request_id, Some(RequestId(2)));
    }

    #[test]
    fn unresolved_code_falls_back_to_fuzzy_by_default() {
        let requests = vec![request(1, 17340, "John Doe", BillCategory::Electricity)];
        let mut event = payment(17340, "John Doe");
        event.note = Some("electricity".to_string());
        let june = BillingPeriod::new(2025, 6).unwrap();
        event.tracking_code = Some(TrackingCode::generate(june, BillCategory::Gas));

        let result = matcher().match_event(&event, &requests);
        assert_eq!(result.method, Some(MatchMethod::Fuzzy));
    }

    #[test]
    fn unresolved_code_fails_fast_when_configured() {
        let config = MatcherConfig {
            unresolved_code: UnresolvedCodePolicy::FailFast,
            ..MatcherConfig::default()
        };
        let requests = vec![request(1, 17340, "John Doe", BillCategory::Electricity)];
        let mut event = payment(17340, "John Doe");
        let june = BillingPeriod::new(2025, 6).unwrap();
        event.tracking_code = Some(TrackingCode::generate(june, BillCategory::Gas));

        let result = ReconciliationMatcher::new(config).match_event(&event, &requests);
        assert_eq!(result.failure, Some(MatchFailure::UnknownTrackingCode));
    }

    #[test]
    fn nothing_within_tolerance_is_no_candidates() {
        let requests = vec![request(1, 17340, "John Doe", BillCategory::Electricity)];
        let result = matcher().match_event(&payment(17200, "John Doe"), &requests);
        assert_eq!(result.failure, Some(MatchFailure::NoCandidates));
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn paid_and_foregone_requests_are_not_candidates() {
        let mut paid = request(1, 17340, "John Doe", BillCategory::Electricity);
        paid.status = RequestStatus::Paid;
        let mut foregone = request(2, 17340, "John Doe", BillCategory::Electricity);
        foregone.status = RequestStatus::Foregone;
        let result = matcher().match_event(&payment(17340, "John Doe"), &[paid, foregone]);
        assert_eq!(result.failure, Some(MatchFailure::NoCandidates));
    }

    #[test]
    fn ties_go_to_most_recent_request() {
        let requests = vec![
            request(1, 5000, "John Doe", BillCategory::Gas),
            request(2, 5000, "John Doe", BillCategory::Gas),
        ];
        let mut event = payment(5000, "John Doe");
        event.note = Some("gas".to_string());
        let result = matcher().match_event(&event, &requests);
        assert_eq!(result.request_id, Some(RequestId(2)));
    }

    #[test]
    fn note_keyword_lifts_confidence() {
        let requests = vec![
            request(1, 5000, "John Doe", BillCategory::Gas),
            request(2, 5000, "John Doe", BillCategory::Water),
        ];
        let mut event = payment(5000, "John Doe");
        event.note = Some("water for july".to_string());
        let result = matcher().match_event(&event, &requests);
        assert_eq!(result.request_id, Some(RequestId(2)));
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn review_keeps_top_three_in_order() {
        let requests = vec![
            request(1, 10_000, "Al Smith", BillCategory::Gas),
            request(2, 10_000, "Bo Jones", BillCategory::Gas),
            request(3, 10_000, "Cy Young", BillCategory::Gas),
            request(4, 10_000, "Di Prince", BillCategory::Gas),
        ];
        let result = matcher().match_event(&payment(10_000, "Cy Yung"), &requests);
        assert_eq!(result.failure, Some(MatchFailure::LowConfidence));
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(result.candidates[0].request_id, RequestId(3));
        assert!(result
            .candidates
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn unknown_direction_is_unparseable() {
        let mut event = payment(5000, "John Doe");
        event.direction = PaymentDirection::Unknown;
        event.amount = None;
        let result = matcher().match_event(&event, &[]);
        assert_eq!(result.failure, Some(MatchFailure::Unparseable));
    }

    #[test]
    fn requests_and_reminders_are_not_payments() {
        let requests = vec![request(1, 5000, "John Doe", BillCategory::Gas)];
        for direction in [
            PaymentDirection::Requested,
            PaymentDirection::Reminder,
            PaymentDirection::Cancelled,
        ] {
            let mut event = payment(5000, "John Doe");
            event.direction = direction;
            let result = matcher().match_event(&event, &requests);
            assert_eq!(result.failure, Some(MatchFailure::NotAPayment));
        }
    }

    #[test]
    fn policy_override_bypasses_scoring() {
        let config = EngineConfig {
            policy: Some(PrimaryPayerConfig {
                aliases: vec!["Jane Roe".to_string()],
                recipient: "Jane Roe".to_string(),
                category: BillCategory::Rent,
                min_amount_cents: 150_000,
                cutover: at(2025, 6, 1),
            }),
            ..EngineConfig::default()
        };
        let matcher = ReconciliationMatcher::from_engine_config(&config);
        let requests = vec![request(5, 250_000, "Jane Roe", BillCategory::Rent)];

        // Far outside the amount tolerance, still claimed by the policy.
        let event = payment(200_000, "Jane Roe");
        assert!(matcher.policy_claims(&event));
        let result = matcher.match_event(&event, &requests);
        assert_eq!(result.method, Some(MatchMethod::Policy));
        assert_eq!(result.request_id, Some(RequestId(5)));

        let result = matcher.match_event(&event, &[]);
        assert_eq!(result.failure, Some(MatchFailure::PolicyRequestMissing));
    }

    #[test]
    fn name_score_edge_cases() {
        assert_eq!(name_score("  John Doe ", "john doe"), 1.0);
        assert_eq!(name_score("", "john"), 0.0);
        assert_eq!(name_score("   ", "   "), 0.0);
    }

    #[test]
    fn amount_score_is_clamped() {
        assert_eq!(amount_score(Money::from_cents(100), Money::from_cents(1000)), 0.0);
        assert_eq!(amount_score(Money::from_cents(100), Money::from_cents(100)), 1.0);
    }

    proptest! {
        #[test]
        fn name_score_is_symmetric(a in "[a-zA-Z ]{0,16}", b in "[a-zA-Z ]{0,16}") {
            prop_assert_eq!(name_score(&a, &b), name_score(&b, &a));
        }

        #[test]
        fn name_score_of_self_is_one(a in "[a-zA-Z]{1,16}") {
            prop_assert_eq!(name_score(&a, &a), 1.0);
        }

        #[test]
        fn confidence_is_monotone_in_each_component(
            a in 0.0f64..=1.0, n in 0.0f64..=1.0, t in 0.0f64..=1.0, bump in 0.0f64..=1.0,
        ) {
            let base = weighted_confidence(a, n, t);
            prop_assert!(weighted_confidence((a + bump).min(1.0), n, t) >= base);
            prop_assert!(weighted_confidence(a, (n + bump).min(1.0), t) >= base);
            prop_assert!(weighted_confidence(a, n, (t + bump).min(1.0)) >= base);
        }
    }
}
