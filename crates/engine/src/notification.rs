use regex::Regex;
use rentledger_core::{BillCategory, Money, Notification, PaymentDirection, PaymentEvent, TrackingCode};
use sha2::{Digest, Sha256};

/// Subject keywords in precedence order. "paid your" must be tested before
/// "paid you" since the latter is a prefix of the former.
const DIRECTION_KEYWORDS: [(&str, PaymentDirection, bool); 5] = [
    ("paid your", PaymentDirection::Received, true),
    ("paid you", PaymentDirection::Received, false),
    ("requested", PaymentDirection::Requested, false),
    ("reminder", PaymentDirection::Reminder, false),
    ("cancelled", PaymentDirection::Cancelled, false),
];

const AMOUNT: &str = r"(?P<amount>[\d,]+(?:\.\d{2})?)";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid regex")
}

/// Turns payment notification emails into [`PaymentEvent`]s.
///
/// Construct once and share; parsing is stateless.
pub struct NotificationParser {
    paid_your: Vec<Regex>,
    paid_you: Vec<Regex>,
    requested: Vec<Regex>,
    reminder: Vec<Regex>,
    cancelled: Vec<Regex>,
    body_amount: Regex,
    quoted_note: Regex,
    decorated_note: Regex,
    labelled_note: Regex,
}

impl Default for NotificationParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationParser {
    pub fn new() -> Self {
        Self {
            paid_your: vec![re(&format!(
                r"(?i)^(?P<actor>.+?) paid your \${AMOUNT}\s+request"
            ))],
            paid_you: vec![re(&format!(r"(?i)^(?P<actor>.+?) paid you \${AMOUNT}"))],
            requested: vec![
                re(&format!(r"(?i)^you requested \${AMOUNT} from (?P<actor>.+?)\s*$")),
                re(&format!(r"(?i)^(?P<actor>.+?) requested \${AMOUNT}")),
            ],
            reminder: vec![
                re(&format!(
                    r"(?i)^reminder[:\s-]+(?P<actor>.+?)(?:'s)? (?:request|reminder|payment) (?:for|of|about) \${AMOUNT}"
                )),
                re(&format!(
                    r"(?i)^reminder[:\s-]+you owe (?P<actor>.+?) \${AMOUNT}"
                )),
            ],
            cancelled: vec![
                re(&format!(
                    r"(?i)^you cancelled (?P<actor>.+?)'s \${AMOUNT} request"
                )),
                re(&format!(
                    r"(?i)^(?P<actor>.+?) cancelled (?:a|the|their|your) \${AMOUNT} request"
                )),
            ],
            body_amount: re(r"\$\s?(?P<amount>[\d,]+\.\d{2})"),
            quoted_note: re(r#"["\u{201C}](?P<note>[^"\u{201C}\u{201D}\n]{1,280})["\u{201D}]"#),
            decorated_note: re(r"(?m)^\s*[*_~=\-]{2,}\s*(?P<note>[^*_~=\-\n].*?)\s*[*_~=\-]{2,}\s*$"),
            labelled_note: re(r"(?mi)^\s*(?:note|memo)\s*[:\-]\s*(?P<note>.+?)\s*$"),
        }
    }

    pub fn parse(&self, notification: &Notification) -> PaymentEvent {
        let subject = notification.subject.trim();
        let body = notification.body.as_str();
        let external_id = idempotency_key(notification);

        let note = self.extract_note(body);
        let tracking_code = TrackingCode::extract(subject)
            .or_else(|| note.as_deref().and_then(TrackingCode::extract))
            .or_else(|| TrackingCode::extract(body));

        let Some((direction, in_reply_to_request)) = detect_direction(subject) else {
            tracing::info!(%external_id, "notification has no recognizable direction keyword");
            return PaymentEvent {
                external_id,
                direction: PaymentDirection::Unknown,
                in_reply_to_request: false,
                actor: None,
                amount: None,
                note,
                tracking_code,
                occurred_at: notification.received_at,
            };
        };

        let patterns = match (direction, in_reply_to_request) {
            (PaymentDirection::Received, true) => &self.paid_your,
            (PaymentDirection::Received, false) => &self.paid_you,
            (PaymentDirection::Requested, _) => &self.requested,
            (PaymentDirection::Reminder, _) => &self.reminder,
            (PaymentDirection::Cancelled, _) | (PaymentDirection::Unknown, _) => &self.cancelled,
        };

        let (actor, mut amount) = patterns
            .iter()
            .find_map(|re| re.captures(subject))
            .map(|caps| {
                let actor = caps
                    .name("actor")
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|a| !a.is_empty());
                let amount = caps.name("amount").and_then(|m| m.as_str().parse::<Money>().ok());
                (actor, amount)
            })
            .unwrap_or((None, None));

        if amount.is_none() {
            amount = self
                .body_amount
                .captures(body)
                .and_then(|caps| caps["amount"].parse::<Money>().ok());
            if amount.is_some() {
                tracing::debug!(%external_id, "amount taken from notification body");
            }
        }

        PaymentEvent {
            external_id,
            direction,
            in_reply_to_request,
            actor,
            amount,
            note,
            tracking_code,
            occurred_at: notification.received_at,
        }
    }

    /// Note candidates in order: a line breaking a bill down across two
    /// categories, a quoted note, then a decorated or labelled line.
    fn extract_note(&self, body: &str) -> Option<String> {
        if let Some(line) = body.lines().find(|line| mentions_two_categories(line)) {
            return Some(line.trim().to_string());
        }
        if let Some(caps) = self.quoted_note.captures(body) {
            return Some(caps["note"].trim().to_string());
        }
        self.decorated_note
            .captures(body)
            .or_else(|| self.labelled_note.captures(body))
            .map(|caps| caps["note"].trim().to_string())
            .filter(|note| !note.is_empty())
    }
}

fn detect_direction(subject: &str) -> Option<(PaymentDirection, bool)> {
    let lowered = subject.to_lowercase();
    DIRECTION_KEYWORDS
        .iter()
        .find(|(keyword, _, _)| lowered.contains(keyword))
        .map(|(_, direction, reply)| (*direction, *reply))
}

fn mentions_two_categories(line: &str) -> bool {
    BillCategory::ALL
        .iter()
        .filter(|c| c.is_mentioned_in(line))
        .take(2)
        .count()
        == 2
}

/// The provider's message id when present, otherwise a digest of the message
/// content so that re-delivering the same email yields the same key.
pub fn idempotency_key(notification: &Notification) -> String {
    if let Some(id) = notification
        .message_id
        .as_deref()
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>'))
        .filter(|id| !id.is_empty())
    {
        return id.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(notification.subject.as_bytes());
    hasher.update(b"\n");
    hasher.update(notification.body.as_bytes());
    hasher.update(b"\n");
    hasher.update(notification.received_at.to_rfc3339().as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn notification(subject: &str, body: &str) -> Notification {
        Notification {
            message_id: None,
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: Utc.with_ymd_and_hms(2025, 7, 5, 9, 30, 0).unwrap(),
        }
    }

    fn parse(subject: &str, body: &str) -> PaymentEvent {
        NotificationParser::new().parse(&notification(subject, body))
    }

    #[test]
    fn paid_your_request_is_a_reply() {
        let event = parse("Jon Doe paid your $172.40 request", "");
        assert_eq!(event.direction, PaymentDirection::Received);
        assert!(event.in_reply_to_request);
        assert_eq!(event.actor.as_deref(), Some("Jon Doe"));
        assert_eq!(event.amount, Some(Money::from_cents(17240)));
    }

    #[test]
    fn paid_you_is_unsolicited() {
        let event = parse("Jane Roe paid you $2,500.00", "");
        assert_eq!(event.direction, PaymentDirection::Received);
        assert!(!event.in_reply_to_request);
        assert_eq!(event.actor.as_deref(), Some("Jane Roe"));
        assert_eq!(event.amount, Some(Money::from_cents(250_000)));
    }

    #[test]
    fn oversized_amount_is_left_unparsed() {
        let event = parse("Jon Doe paid you $99,999,999,999,999,999,999.00", "");
        assert_eq!(event.direction, PaymentDirection::Received);
        assert_eq!(event.amount, None);
        assert!(!event.is_parsed());
    }

    #[test]
    fn paid_takes_precedence_over_requested() {
        let event = parse("Jon Doe paid your $40.00 request (requested Jul 1)", "");
        assert_eq!(event.direction, PaymentDirection::Received);
    }

    #[test]
    fn requested_in_both_phrasings() {
        let ours = parse("You requested $52.40 from Jon Doe", "");
        assert_eq!(ours.direction, PaymentDirection::Requested);
        assert_eq!(ours.actor.as_deref(), Some("Jon Doe"));
        assert_eq!(ours.amount, Some(Money::from_cents(5240)));

        let theirs = parse("Jon Doe requested $12.00", "");
        assert_eq!(theirs.direction, PaymentDirection::Requested);
        assert_eq!(theirs.actor.as_deref(), Some("Jon Doe"));
    }

    #[test]
    fn reminder_subject() {
        let event = parse("Reminder: Jon Doe's request for $52.40", "");
        assert_eq!(event.direction, PaymentDirection::Reminder);
        assert_eq!(event.actor.as_deref(), Some("Jon Doe"));
        assert_eq!(event.amount, Some(Money::from_cents(5240)));
    }

    #[test]
    fn cancelled_subject() {
        let event = parse("Jon Doe cancelled a $52.40 request", "");
        assert_eq!(event.direction, PaymentDirection::Cancelled);
        assert_eq!(event.actor.as_deref(), Some("Jon Doe"));
    }

    #[test]
    fn unknown_direction_has_no_amount() {
        let event = parse("Your monthly statement is ready", "Balance: $12.00");
        assert_eq!(event.direction, PaymentDirection::Unknown);
        assert_eq!(event.amount, None);
        assert!(!event.is_parsed());
    }

    #[test]
    fn falls_back_to_body_amount() {
        let event = parse("Jon Doe paid you", "Jon Doe paid you\n$ 88.10\nView transaction");
        assert_eq!(event.direction, PaymentDirection::Received);
        assert_eq!(event.actor, None);
        assert_eq!(event.amount, Some(Money::from_cents(8810)));
    }

    #[test]
    fn breakdown_note_beats_quoted_note() {
        let body = "Jon Doe paid you $172.40\n\"thanks!\"\nElectricity $120.00 + Water $52.40\n";
        let event = parse("Jon Doe paid you $172.40", body);
        assert_eq!(event.note.as_deref(), Some("Electricity $120.00 + Water $52.40"));
    }

    #[test]
    fn quoted_note_is_extracted() {
        let event = parse("Jon Doe paid you $40.00", "Jon Doe paid you\n\u{201C}july internet\u{201D}\n");
        assert_eq!(event.note.as_deref(), Some("july internet"));
    }

    #[test]
    fn decorated_note_is_extracted() {
        let event = parse("Jon Doe paid you $40.00", "Header\n** gas share **\nFooter");
        assert_eq!(event.note.as_deref(), Some("gas share"));
    }

    #[test]
    fn labelled_note_is_extracted() {
        let event = parse("Jon Doe paid you $40.00", "Note: trash pickup\n");
        assert_eq!(event.note.as_deref(), Some("trash pickup"));
    }

    #[test]
    fn tracking_code_is_found_in_note() {
        let body = "Jon Doe paid you\n\"2025-June-Water\"\n";
        let event = parse("Jon Doe paid your $52.40 request", body);
        assert_eq!(event.tracking_code.unwrap().as_str(), "2025-June-Water");
    }

    #[test]
    fn idempotency_key_prefers_message_id() {
        let mut n = notification("Jon Doe paid you $1.00", "");
        n.message_id = Some("<abc@mail.example>".to_string());
        assert_eq!(idempotency_key(&n), "abc@mail.example");
    }

    #[test]
    fn idempotency_key_is_stable_for_identical_content() {
        let a = notification("Jon Doe paid you $1.00", "body");
        let b = notification("Jon Doe paid you $1.00", "body");
        let c = notification("Jon Doe paid you $2.00", "body");
        assert_eq!(idempotency_key(&a), idempotency_key(&b));
        assert_ne!(idempotency_key(&a), idempotency_key(&c));
        assert!(idempotency_key(&a).starts_with("sha256:"));
    }
}
