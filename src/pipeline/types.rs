//! Shared types for the event-to-record pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

// ── Inbound event ───────────────────────────────────────────────────

/// One inbound message considered as a candidate application signal.
///
/// Produced by the mailbox boundary, immutable, never persisted as such —
/// only its id survives, inside a record's contributing list or a skip
/// entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Channel-native unique message id.
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Cleaned body excerpt.
    pub body: String,
    /// Thread identifier, when the message is part of a conversation.
    pub thread_id: Option<String>,
}

impl RawEvent {
    /// Sender domain, lowercased. Empty when the address has no `@`.
    pub fn sender_domain(&self) -> String {
        self.sender
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_end_matches('>').to_lowercase())
            .unwrap_or_default()
    }
}

// ── Classification output ───────────────────────────────────────────

/// Full-time vs internship, as guessed from the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationType {
    FullTime,
    Internship,
    Unknown,
}

impl ApplicationType {
    pub fn label(self) -> &'static str {
        match self {
            Self::FullTime => "Full-time",
            Self::Internship => "Internship",
            Self::Unknown => "Unknown",
        }
    }

    pub fn from_label(s: &str) -> Self {
        match s.trim() {
            "Full-time" => Self::FullTime,
            "Internship" => Self::Internship,
            _ => Self::Unknown,
        }
    }
}

/// Stage guess from classification: a lifecycle stage, or a verdict that
/// the message is not about a job application at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageGuess {
    Stage(Stage),
    NotAnApplication,
}

/// Structured candidate event produced by the classifier (or the rule
/// extractor). Ephemeral — consumed immediately by normalizer/matcher.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub company: Option<String>,
    pub role: Option<String>,
    pub application_type: ApplicationType,
    pub stage_guess: StageGuess,
    /// 0.0–1.0.
    pub confidence: f32,
    /// One-line note extracted from the message.
    pub notes: String,
}

// ── Skip reasons ────────────────────────────────────────────────────

/// Why an event was not turned into (or merged into) a record.
///
/// `is_permanent()` decides the durable lifecycle: permanent skips are
/// never re-examined; the rest are re-attempted on the next run.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Subject matched a structural reject phrase (job alerts, digests).
    RejectPhrase(String),
    /// Sender is a personal mail domain.
    PersonalDomain,
    /// Sender is a job-board/aggregator domain.
    JobBoardDomain,
    /// No application keyword in subject and not a recognized ATS sender.
    /// Heuristic — kept retry-eligible so future rule changes get a shot.
    NoApplicationSignal,
    /// An earlier message in the same thread was already folded in.
    DuplicateThread,
    /// Classifier judged the message not to be about an application.
    NotAnApplication,
    /// Classification confidence below the configured threshold.
    LowConfidence(f32),
    /// Classifier answered, but with output no parser could salvage.
    /// Re-asking a near-deterministic model yields the same output, so
    /// this is definitive.
    UnparseableResponse(String),
    /// Classification succeeded but a required field was absent.
    MissingField(&'static str),
    /// Transient classifier failure; retry on the next run.
    ClassifierUnavailable(String),
    /// The event's own store commit failed; nothing durable was written.
    CommitFailed(String),
}

impl SkipReason {
    /// True when the message should never be re-examined. Re-asking the
    /// same model the same question yields the same answer, so definitive
    /// classifier verdicts are permanent; transient failures and
    /// heuristic discards are not.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::RejectPhrase(_)
            | Self::PersonalDomain
            | Self::JobBoardDomain
            | Self::NotAnApplication
            | Self::LowConfidence(_)
            | Self::UnparseableResponse(_)
            | Self::MissingField(_) => true,
            Self::NoApplicationSignal
            | Self::DuplicateThread
            | Self::ClassifierUnavailable(_)
            | Self::CommitFailed(_) => false,
        }
    }

    /// Stable reason code for breakdown counters and the skips table.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RejectPhrase(_) => "reject_phrase",
            Self::PersonalDomain => "personal_domain",
            Self::JobBoardDomain => "job_board",
            Self::NoApplicationSignal => "no_application_signal",
            Self::DuplicateThread => "duplicate_thread",
            Self::NotAnApplication => "not_an_application",
            Self::LowConfidence(_) => "low_confidence",
            Self::UnparseableResponse(_) => "unparseable_response",
            Self::MissingField(_) => "missing_field",
            Self::ClassifierUnavailable(_) => "classifier_unavailable",
            Self::CommitFailed(_) => "commit_failed",
        }
    }

    /// Human-auditable detail (the matched phrase, the missing field,
    /// the confidence value).
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::RejectPhrase(phrase) => Some(phrase.clone()),
            Self::LowConfidence(c) => Some(format!("{c:.2}")),
            Self::MissingField(field) => Some((*field).to_string()),
            Self::UnparseableResponse(raw)
            | Self::ClassifierUnavailable(raw)
            | Self::CommitFailed(raw) => Some(raw.clone()),
            _ => None,
        }
    }
}

// ── Per-event outcome ───────────────────────────────────────────────

/// What the pipeline did with one event. Observed by the run ledger.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// A new application record was created.
    NewRecord { record_id: String },
    /// An existing record absorbed the event.
    Updated { record_id: String, stage_changed: bool },
    /// The event was discarded, with a recorded reason.
    Skipped(SkipReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_domain_extraction() {
        let mut event = RawEvent {
            id: "m1".into(),
            sender: "careers@google.com".into(),
            subject: "Thanks for applying".into(),
            received_at: Utc::now(),
            body: String::new(),
            thread_id: None,
        };
        assert_eq!(event.sender_domain(), "google.com");

        event.sender = "Recruiting Team <no-reply@Lever.co>".into();
        assert_eq!(event.sender_domain(), "lever.co");

        event.sender = "not-an-address".into();
        assert_eq!(event.sender_domain(), "");
    }

    #[test]
    fn structural_skips_are_permanent() {
        assert!(SkipReason::PersonalDomain.is_permanent());
        assert!(SkipReason::RejectPhrase("job alert".into()).is_permanent());
        assert!(SkipReason::NotAnApplication.is_permanent());
        assert!(SkipReason::LowConfidence(0.2).is_permanent());
        assert!(SkipReason::MissingField("company").is_permanent());
    }

    #[test]
    fn heuristic_and_transient_skips_retry() {
        assert!(!SkipReason::NoApplicationSignal.is_permanent());
        assert!(!SkipReason::DuplicateThread.is_permanent());
        assert!(!SkipReason::ClassifierUnavailable("503".into()).is_permanent());
        assert!(!SkipReason::CommitFailed("disk full".into()).is_permanent());
    }

    #[test]
    fn reason_detail_is_auditable() {
        assert_eq!(SkipReason::LowConfidence(0.337).detail().unwrap(), "0.34");
        assert_eq!(SkipReason::MissingField("role").detail().unwrap(), "role");
        assert!(SkipReason::PersonalDomain.detail().is_none());
    }

    #[test]
    fn application_type_labels_round_trip() {
        for t in [
            ApplicationType::FullTime,
            ApplicationType::Internship,
            ApplicationType::Unknown,
        ] {
            assert_eq!(ApplicationType::from_label(t.label()), t);
        }
    }
}
