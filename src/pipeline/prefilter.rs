//! Pre-classification rule engine — discard obvious junk before any
//! classifier call is paid for.
//!
//! Pure and deterministic: the same event and thread context always yield
//! the same verdict. Structural rejections (denylisted domains, alert
//! phrases) are permanent skips; the low-signal keyword heuristic stays
//! retry-eligible so a future rules change can reconsider those messages.

use std::collections::HashSet;

use tracing::debug;

use crate::pipeline::types::{RawEvent, SkipReason};

/// Pre-filter verdict for one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Keep,
    Discard(SkipReason),
}

/// Subject phrases that mark bulk job-alert/newsletter traffic.
const REJECT_PHRASES: &[&str] = &[
    "job alert",
    "jobs you might like",
    "recommended jobs",
    "newsletter",
    "digest",
    "viewed your profile",
    "connection request",
    "do you want to finish your application",
    "you have new application updates this week",
    "matched new opportunities",
    "found jobs",
    "mock interview",
];

/// Personal mail providers — real applications come from company or ATS
/// domains.
const PERSONAL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "aol.com",
];

/// Job boards and aggregators send alert traffic, not application status.
const JOB_BOARD_DOMAINS: &[&str] =
    &["linkedin.com", "indeed.com", "glassdoor.com", "ziprecruiter.com"];

/// Subject keywords that an application-related message is expected to
/// carry. A message with none of these, from an unrecognized domain, is a
/// low-signal discard.
const PASS_SUBJECTS: &[&str] = &[
    "applied",
    "application",
    "thanks for applying",
    "thank you for applying",
    "thank you for your interest",
    "thanks for your interest",
    "your interest",
    "thanks from",
    "follow-up",
    "update",
    "recruiting",
    "we received",
    "we've got your",
    "your application",
    "application is in",
    "application received",
    "interview",
    "offer",
    "unfortunately",
    "next steps",
    "confirmation",
    "confirmed",
    "careers",
    "position",
    "role",
    "candidate",
];

/// Applicant-tracking-system sender domains pass regardless of subject.
const ATS_DOMAINS: &[&str] = &[
    "greenhouse.io",
    "greenhouse-mail.io",
    "lever.co",
    "workday.com",
    "myworkday.com",
    "myworkdayjobs.com",
    "ashbyhq.com",
    "smartrecruiters.com",
    "jobvite.com",
    "icims.com",
    "jazz.co",
    "recruitee.com",
    "bamboohr.com",
    "rippling.com",
    "dover.com",
    "wellfound.com",
];

/// Deterministic pre-filter over sender domain, subject, and thread
/// context.
pub struct PreFilter {
    reject_phrases: Vec<String>,
    personal_domains: Vec<String>,
    job_board_domains: Vec<String>,
    pass_subjects: Vec<String>,
    ats_domains: Vec<String>,
}

impl Default for PreFilter {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl PreFilter {
    /// Pre-filter with the built-in rule set.
    pub fn default_rules() -> Self {
        Self {
            reject_phrases: REJECT_PHRASES.iter().map(|s| s.to_string()).collect(),
            personal_domains: PERSONAL_DOMAINS.iter().map(|s| s.to_string()).collect(),
            job_board_domains: JOB_BOARD_DOMAINS.iter().map(|s| s.to_string()).collect(),
            pass_subjects: PASS_SUBJECTS.iter().map(|s| s.to_string()).collect(),
            ats_domains: ATS_DOMAINS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Empty pre-filter that keeps everything (for tests).
    pub fn empty() -> Self {
        Self {
            reject_phrases: Vec::new(),
            personal_domains: Vec::new(),
            job_board_domains: Vec::new(),
            pass_subjects: Vec::new(),
            ats_domains: Vec::new(),
        }
    }

    /// Add a denylisted sender domain (structural, permanent skip).
    pub fn deny_domain(&mut self, domain: &str) {
        self.job_board_domains.push(domain.to_lowercase());
    }

    /// Evaluate one event. `folded_threads` holds thread ids that already
    /// contributed a record update in the current run.
    pub fn evaluate(&self, event: &RawEvent, folded_threads: &HashSet<String>) -> Verdict {
        let subject = event.subject.to_lowercase();
        let domain = event.sender_domain();

        for phrase in &self.reject_phrases {
            if subject.contains(phrase.as_str()) {
                debug!(id = %event.id, phrase = %phrase, "Pre-filter: reject phrase");
                return Verdict::Discard(SkipReason::RejectPhrase(phrase.clone()));
            }
        }

        if self.personal_domains.iter().any(|d| domain == *d) {
            debug!(id = %event.id, domain = %domain, "Pre-filter: personal domain");
            return Verdict::Discard(SkipReason::PersonalDomain);
        }

        if self
            .job_board_domains
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        {
            debug!(id = %event.id, domain = %domain, "Pre-filter: job board domain");
            return Verdict::Discard(SkipReason::JobBoardDomain);
        }

        if let Some(thread_id) = &event.thread_id {
            if folded_threads.contains(thread_id) {
                debug!(id = %event.id, thread = %thread_id, "Pre-filter: thread already folded");
                return Verdict::Discard(SkipReason::DuplicateThread);
            }
        }

        let subject_signal = self.pass_subjects.iter().any(|p| subject.contains(p.as_str()));
        let ats_sender = self.ats_domains.iter().any(|d| domain.contains(d.as_str()));
        if !self.pass_subjects.is_empty() && !subject_signal && !ats_sender {
            debug!(id = %event.id, subject = %event.subject, "Pre-filter: no application signal");
            return Verdict::Discard(SkipReason::NoApplicationSignal);
        }

        Verdict::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(sender: &str, subject: &str) -> RawEvent {
        RawEvent {
            id: "e1".into(),
            sender: sender.into(),
            subject: subject.into(),
            received_at: Utc::now(),
            body: String::new(),
            thread_id: None,
        }
    }

    fn no_threads() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn discards_personal_domain_chatter() {
        let filter = PreFilter::default_rules();
        let verdict = filter.evaluate(&event("friend@gmail.com", "Re: catching up"), &no_threads());
        assert_eq!(verdict, Verdict::Discard(SkipReason::PersonalDomain));
    }

    #[test]
    fn discards_job_alert_phrases() {
        let filter = PreFilter::default_rules();
        let verdict = filter.evaluate(
            &event("updates@somejobs.com", "Your weekly job alert: 12 new matches"),
            &no_threads(),
        );
        assert!(matches!(verdict, Verdict::Discard(SkipReason::RejectPhrase(_))));
    }

    #[test]
    fn discards_job_board_domains_including_subdomains() {
        let filter = PreFilter::default_rules();
        for sender in ["alerts@linkedin.com", "noreply@e.indeed.com"] {
            let verdict = filter.evaluate(&event(sender, "Your application"), &no_threads());
            assert_eq!(verdict, Verdict::Discard(SkipReason::JobBoardDomain), "{sender}");
        }
    }

    #[test]
    fn low_signal_subject_is_retryable_discard() {
        let filter = PreFilter::default_rules();
        let verdict = filter.evaluate(
            &event("news@randomcompany.com", "Quarterly product announcements"),
            &no_threads(),
        );
        assert_eq!(verdict, Verdict::Discard(SkipReason::NoApplicationSignal));
        if let Verdict::Discard(reason) = verdict {
            assert!(!reason.is_permanent());
        }
    }

    #[test]
    fn keeps_application_subject() {
        let filter = PreFilter::default_rules();
        let verdict = filter.evaluate(
            &event("careers@google.com", "Thank you for applying to Google"),
            &no_threads(),
        );
        assert_eq!(verdict, Verdict::Keep);
    }

    #[test]
    fn keeps_ats_sender_with_odd_subject() {
        let filter = PreFilter::default_rules();
        let verdict = filter.evaluate(
            &event("no-reply@acme.greenhouse.io", "Hello from Acme"),
            &no_threads(),
        );
        assert_eq!(verdict, Verdict::Keep);
    }

    #[test]
    fn skips_message_in_already_folded_thread() {
        let filter = PreFilter::default_rules();
        let mut e = event("careers@google.com", "Interview scheduled");
        e.thread_id = Some("thread-42".into());
        let folded: HashSet<String> = ["thread-42".to_string()].into_iter().collect();
        assert_eq!(
            filter.evaluate(&e, &folded),
            Verdict::Discard(SkipReason::DuplicateThread)
        );
        // Same event with no folded context passes
        assert_eq!(filter.evaluate(&e, &no_threads()), Verdict::Keep);
    }

    #[test]
    fn reject_phrase_beats_thread_heuristic() {
        // Permanent structural reason wins over the retryable thread skip
        let filter = PreFilter::default_rules();
        let mut e = event("alerts@somejobs.com", "Daily digest of roles");
        e.thread_id = Some("t1".into());
        let folded: HashSet<String> = ["t1".to_string()].into_iter().collect();
        assert!(matches!(
            filter.evaluate(&e, &folded),
            Verdict::Discard(SkipReason::RejectPhrase(_))
        ));
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = PreFilter::empty();
        let verdict = filter.evaluate(&event("noreply@gmail.com", "job alert"), &no_threads());
        assert_eq!(verdict, Verdict::Keep);
    }

    #[test]
    fn custom_denied_domain() {
        let mut filter = PreFilter::default_rules();
        filter.deny_domain("spamrecruiter.biz");
        let verdict = filter.evaluate(
            &event("hi@spamrecruiter.biz", "Your application update"),
            &no_threads(),
        );
        assert_eq!(verdict, Verdict::Discard(SkipReason::JobBoardDomain));
    }
}
