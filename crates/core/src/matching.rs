use serde::{Deserialize, Serialize};
use std::fmt;

use crate::request::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Tracking,
    Fuzzy,
    Manual,
    Policy,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::Tracking => "tracking",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::Manual => "manual",
            MatchMethod::Policy => "policy",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event could not be matched automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFailure {
    NoCandidates,
    LowConfidence,
    /// No direction keyword or no amount could be read.
    Unparseable,
    /// Requests, reminders and cancellations carry no money.
    NotAPayment,
    /// A code was embedded but resolves to no open request.
    UnknownTrackingCode,
    /// The policy claimed the event but the payer has no open request.
    PolicyRequestMissing,
}

impl MatchFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchFailure::NoCandidates => "no_candidates",
            MatchFailure::LowConfidence => "low_confidence",
            MatchFailure::Unparseable => "unparseable",
            MatchFailure::NotAPayment => "not_a_payment",
            MatchFailure::UnknownTrackingCode => "unknown_tracking_code",
            MatchFailure::PolicyRequestMissing => "policy_request_missing",
        }
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub request_id: RequestId,
    pub amount_score: f64,
    pub name_score: f64,
    pub note_score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub event_id: String,
    pub request_id: Option<RequestId>,
    pub confidence: f64,
    pub method: Option<MatchMethod>,
    pub failure: Option<MatchFailure>,
    /// Best scored candidates, attached for manual resolution.
    pub candidates: Vec<ScoredCandidate>,
}

impl MatchResult {
    pub fn matched(
        event_id: &str,
        request_id: RequestId,
        method: MatchMethod,
        confidence: f64,
    ) -> Self {
        MatchResult {
            event_id: event_id.to_string(),
            request_id: Some(request_id),
            confidence: confidence.clamp(0.0, 1.0),
            method: Some(method),
            failure: None,
            candidates: Vec::new(),
        }
    }

    pub fn manual(event_id: &str, request_id: RequestId) -> Self {
        Self::matched(event_id, request_id, MatchMethod::Manual, 1.0)
    }

    pub fn unmatched(event_id: &str, failure: MatchFailure, candidates: Vec<ScoredCandidate>) -> Self {
        let confidence = candidates.first().map_or(0.0, |c| c.confidence);
        MatchResult {
            event_id: event_id.to_string(),
            request_id: None,
            confidence,
            method: None,
            failure: Some(failure),
            candidates,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.request_id.is_some() && self.failure.is_none()
    }
}
