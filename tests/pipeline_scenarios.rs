//! End-to-end pipeline scenarios against an in-memory store.
//!
//! Each test builds a real `PipelineRunner` with a scripted classifier,
//! feeds it synthetic event batches, and asserts on the durable state:
//! records, skip sets, and run summaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use apptrack::classify::{Classifier, ParsedOutcome};
use apptrack::config::PipelineConfig;
use apptrack::error::ClassifyError;
use apptrack::pipeline::types::{ApplicationType, ClassificationResult, StageGuess};
use apptrack::pipeline::{PipelineRunner, PreFilter, RawEvent};
use apptrack::stage::Stage;
use apptrack::store::{LibSqlStore, Store};

/// Per-event scripted behavior for the mock classifier.
#[derive(Clone)]
enum Behavior {
    NotAnApplication,
    Transient,
    Accept {
        company: &'static str,
        role: &'static str,
        stage: Stage,
        confidence: f32,
    },
    AcceptWithoutRole {
        company: &'static str,
        confidence: f32,
    },
}

/// Scripted classifier: counts every call, answers by event id.
struct MockClassifier {
    calls: AtomicUsize,
    script: Mutex<HashMap<String, Behavior>>,
}

impl MockClassifier {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, event_id: &str, behavior: Behavior) {
        self.script
            .lock()
            .unwrap()
            .insert(event_id.to_string(), behavior);
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn classify(&self, event: &RawEvent) -> Result<ParsedOutcome, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .get(&event.id)
            .cloned()
            .unwrap_or(Behavior::NotAnApplication);
        match behavior {
            Behavior::NotAnApplication => Ok(ParsedOutcome::NotAnApplication),
            Behavior::Transient => Err(ClassifyError::Transient("connection reset".into())),
            Behavior::Accept {
                company,
                role,
                stage,
                confidence,
            } => Ok(ParsedOutcome::Classified(ClassificationResult {
                company: Some(company.to_string()),
                role: Some(role.to_string()),
                application_type: ApplicationType::FullTime,
                stage_guess: StageGuess::Stage(stage),
                confidence,
                notes: String::new(),
            })),
            Behavior::AcceptWithoutRole {
                company,
                confidence,
            } => Ok(ParsedOutcome::Classified(ClassificationResult {
                company: Some(company.to_string()),
                role: None,
                application_type: ApplicationType::FullTime,
                stage_guess: StageGuess::Stage(Stage::Applied),
                confidence,
                notes: String::new(),
            })),
        }
    }
}

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
}

fn event(id: &str, sender: &str, subject: &str, body: &str, received_at: DateTime<Utc>) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        received_at,
        body: body.to_string(),
        thread_id: None,
    }
}

struct Harness {
    store: Arc<LibSqlStore>,
    classifier: Arc<MockClassifier>,
    runner: PipelineRunner,
}

async fn harness(config: PipelineConfig) -> Harness {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let classifier = Arc::new(MockClassifier::new());
    let runner = PipelineRunner::new(
        store.clone() as Arc<dyn Store>,
        classifier.clone() as Arc<dyn Classifier>,
        PreFilter::default_rules(),
        config,
    );
    Harness {
        store,
        classifier,
        runner,
    }
}

/// A whole correspondence with one company collapses into a single
/// record that walks the stage machine forward and sticks at Rejected.
fn google_batch() -> Vec<RawEvent> {
    vec![
        event(
            "g1",
            "careers@google.com",
            "Your application for Software Engineer at Google",
            "We received your application and will be in touch.",
            ts(1, 9),
        ),
        event(
            "g2",
            "careers@google.com",
            "Your application for Software Engineer at Google",
            "Next step: complete your coding challenge within 7 days.",
            ts(3, 10),
        ),
        event(
            "g3",
            "careers@google.com",
            "Your application for Software Engineer at Google",
            "We would love to schedule a call with you next week.",
            ts(7, 11),
        ),
        event(
            "g4",
            "careers@google.com",
            "Your application for Software Engineer at Google",
            "Unfortunately we have decided to move forward with other candidates.",
            ts(12, 8),
        ),
    ]
}

#[tokio::test]
async fn correspondence_collapses_to_one_record() {
    let h = harness(PipelineConfig::default()).await;
    let summary = h.runner.run(google_batch()).await.unwrap();

    assert_eq!(summary.scanned, 4);
    assert_eq!(summary.new_records, 1);
    assert_eq!(summary.updated_records, 3);
    assert_eq!(summary.skipped, 0);

    let records = h.store.all_applications().await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.display_company, "Google");
    assert_eq!(record.stage, Stage::Rejected);
    assert_eq!(record.date_first_applied, ts(1, 9));
    assert_eq!(record.last_updated, ts(12, 8));
    assert_eq!(record.event_ids.len(), 4);

    // Everything was settled by rules; the classifier stayed idle.
    assert_eq!(h.classifier.call_count(), 0);
}

#[tokio::test]
async fn rerunning_the_same_batch_changes_nothing() {
    let h = harness(PipelineConfig::default()).await;
    h.runner.run(google_batch()).await.unwrap();
    let second = h.runner.run(google_batch()).await.unwrap();

    // Every id is already folded into the record, so nothing re-enters.
    assert_eq!(second.scanned, 0);
    assert_eq!(second.new_records, 0);
    assert_eq!(second.updated_records, 0);

    let records = h.store.all_applications().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_ids.len(), 4);
}

#[tokio::test]
async fn terminal_record_still_absorbs_later_events() {
    let h = harness(PipelineConfig::default()).await;
    let mut batch = google_batch();
    // A stray interview invite arriving after the rejection.
    batch.push(event(
        "g5",
        "careers@google.com",
        "Your application for Software Engineer at Google",
        "We would love to schedule a call about next steps.",
        ts(14, 9),
    ));
    let summary = h.runner.run(batch).await.unwrap();

    assert_eq!(summary.updated_records, 4);
    let records = h.store.all_applications().await.unwrap();
    assert_eq!(records.len(), 1);
    // Stage never leaves Rejected, but the event is still recorded.
    assert_eq!(records[0].stage, Stage::Rejected);
    assert!(records[0].event_ids.contains(&"g5".to_string()));
    assert_eq!(records[0].last_updated, ts(14, 9));
}

#[tokio::test]
async fn prefilter_discards_before_any_classifier_call() {
    let h = harness(PipelineConfig::default()).await;
    let batch = vec![
        event("p1", "friend@gmail.com", "Re: catching up", "lunch?", ts(1, 9)),
        event(
            "p2",
            "alerts@linkedin.com",
            "Your application update",
            "12 jobs for you",
            ts(1, 10),
        ),
    ];
    let summary = h.runner.run(batch).await.unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.skip_reasons.get("personal_domain"), Some(&1));
    assert_eq!(summary.skip_reasons.get("job_board"), Some(&1));
    assert_eq!(h.classifier.call_count(), 0);

    let permanent = h.store.permanent_skip_ids().await.unwrap();
    assert!(permanent.contains("p1") && permanent.contains("p2"));
}

#[tokio::test]
async fn permanent_skip_is_never_reclassified() {
    let h = harness(PipelineConfig::default()).await;
    // Shared-ATS sender with no company signal anywhere: rules pass on
    // it, so the classifier gets asked, and says it is not an application.
    let e = event(
        "s1",
        "no-reply@us.greenhouse-mail.io",
        "A quick note",
        "General announcement from the recruiting platform.",
        ts(2, 9),
    );

    let first = h.runner.run(vec![e.clone()]).await.unwrap();
    assert_eq!(first.skip_reasons.get("not_an_application"), Some(&1));
    assert_eq!(h.classifier.call_count(), 1);

    let second = h.runner.run(vec![e]).await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(h.classifier.call_count(), 1);
}

#[tokio::test]
async fn transient_failure_is_retried_next_run() {
    let h = harness(PipelineConfig::default()).await;
    let e = event(
        "t1",
        "no-reply@us.greenhouse-mail.io",
        "A note about your candidacy",
        "Hello! Quick update on things.",
        ts(2, 9),
    );

    h.classifier.set("t1", Behavior::Transient);
    let first = h.runner.run(vec![e.clone()]).await.unwrap();
    assert_eq!(first.skip_reasons.get("classifier_unavailable"), Some(&1));
    assert!(h.store.retry_skip_ids().await.unwrap().contains("t1"));
    assert!(h.store.all_applications().await.unwrap().is_empty());

    // Service recovers; the same message now lands as a record.
    h.classifier.set(
        "t1",
        Behavior::Accept {
            company: "Figma",
            role: "Product Designer",
            stage: Stage::Applied,
            confidence: 0.9,
        },
    );
    let second = h.runner.run(vec![e]).await.unwrap();
    assert_eq!(second.new_records, 1);
    assert_eq!(h.classifier.call_count(), 2);

    let records = h.store.all_applications().await.unwrap();
    assert_eq!(records[0].display_company, "Figma");
    assert_eq!(records[0].stage, Stage::Applied);
}

#[tokio::test]
async fn low_confidence_verdict_is_a_permanent_skip() {
    let h = harness(PipelineConfig::default()).await;
    let e = event(
        "l1",
        "no-reply@us.greenhouse-mail.io",
        "About your candidacy",
        "Vague recruiting-adjacent text.",
        ts(2, 9),
    );
    h.classifier.set(
        "l1",
        Behavior::Accept {
            company: "Maybe Corp",
            role: "Something",
            stage: Stage::Applied,
            confidence: 0.2,
        },
    );

    let summary = h.runner.run(vec![e]).await.unwrap();
    assert_eq!(summary.skip_reasons.get("low_confidence"), Some(&1));
    assert!(h.store.permanent_skip_ids().await.unwrap().contains("l1"));
    assert!(h.store.all_applications().await.unwrap().is_empty());
}

#[tokio::test]
async fn classifier_result_without_role_is_a_permanent_skip() {
    let h = harness(PipelineConfig::default()).await;
    let e = event(
        "r1",
        "no-reply@us.greenhouse-mail.io",
        "About your candidacy",
        "Update regarding next steps.",
        ts(2, 9),
    );
    h.classifier.set(
        "r1",
        Behavior::AcceptWithoutRole {
            company: "Figma",
            confidence: 0.9,
        },
    );

    let summary = h.runner.run(vec![e]).await.unwrap();
    assert_eq!(summary.new_records, 0);
    assert_eq!(summary.skip_reasons.get("missing_field"), Some(&1));
    assert!(h.store.permanent_skip_ids().await.unwrap().contains("r1"));
    assert!(h.store.all_applications().await.unwrap().is_empty());
}

/// Six classifier verdicts with inconsistent spellings of the same
/// company and role still fold into one record that ends Rejected.
#[tokio::test]
async fn mixed_spellings_collapse_through_the_classifier() {
    let h = harness(PipelineConfig::default()).await;
    let script: [(&str, &str, &str, Stage); 6] = [
        ("m1", "Google LLC", "SWE", Stage::Applied),
        ("m2", "Google", "Software Engineer Intern", Stage::OaAssessment),
        ("m3", "Google LLC", "Software Engineer Intern", Stage::PhoneScreen),
        ("m4", "Google", "SWE", Stage::Interviewed),
        ("m5", "Google LLC", "SWE", Stage::Offer),
        ("m6", "Google", "Software Engineer Intern", Stage::Rejected),
    ];
    let mut batch = Vec::new();
    for (i, (id, company, role, stage)) in script.into_iter().enumerate() {
        batch.push(event(
            id,
            "no-reply@us.greenhouse-mail.io",
            "About your candidacy",
            "Update regarding next steps.",
            ts(1 + i as u32, 9),
        ));
        h.classifier.set(
            id,
            Behavior::Accept {
                company,
                role,
                stage,
                confidence: 0.9,
            },
        );
    }

    let summary = h.runner.run(batch).await.unwrap();
    assert_eq!(summary.new_records, 1);
    assert_eq!(summary.updated_records, 5);
    assert_eq!(h.classifier.call_count(), 6);

    let records = h.store.all_applications().await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.display_company, "Google");
    assert_eq!(record.stage, Stage::Rejected);
    assert_eq!(record.event_ids.len(), 6);
    assert_eq!(record.date_first_applied, ts(1, 9));
    assert_eq!(record.last_updated, ts(6, 9));
}

#[tokio::test]
async fn quota_exhaustion_defers_without_recording() {
    let config = PipelineConfig {
        daily_quota: 0,
        ..PipelineConfig::default()
    };
    let h = harness(config).await;
    let e = event(
        "q1",
        "no-reply@us.greenhouse-mail.io",
        "Your candidacy",
        "Hello there.",
        ts(2, 9),
    );

    let summary = h.runner.run(vec![e]).await.unwrap();
    assert_eq!(summary.skip_reasons.get("classifier_unavailable"), Some(&1));
    assert_eq!(h.classifier.call_count(), 0);
    // Deferred, not durably skipped: the id is in neither skip set.
    assert!(!h.store.retry_skip_ids().await.unwrap().contains("q1"));
    assert!(!h.store.permanent_skip_ids().await.unwrap().contains("q1"));
}

#[tokio::test]
async fn role_noise_tokens_normalize_to_the_same_record() {
    let h = harness(PipelineConfig::default()).await;
    let batch = vec![
        event(
            "f1",
            "careers@stripe.com",
            "Your application for Software Engineer at Stripe",
            "We received your application.",
            ts(1, 9),
        ),
        // "Intern" is a noise token, so both events share a role key.
        event(
            "f2",
            "careers@stripe.com",
            "Your application for Software Engineer Intern at Stripe",
            "Please schedule a call with our recruiting team.",
            ts(4, 9),
        ),
    ];
    let summary = h.runner.run(batch).await.unwrap();

    assert_eq!(summary.new_records, 1);
    assert_eq!(summary.updated_records, 1);
    let records = h.store.all_applications().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stage, Stage::InterviewScheduled);
}

#[tokio::test]
async fn different_companies_stay_separate() {
    let h = harness(PipelineConfig::default()).await;
    let batch = vec![
        event(
            "c1",
            "careers@google.com",
            "Your application for Software Engineer at Google",
            "We received your application.",
            ts(1, 9),
        ),
        event(
            "c2",
            "careers@meta.com",
            "Your application for Software Engineer at Meta",
            "We received your application.",
            ts(1, 10),
        ),
    ];
    let summary = h.runner.run(batch).await.unwrap();

    assert_eq!(summary.new_records, 2);
    assert_eq!(h.store.all_applications().await.unwrap().len(), 2);
}

#[tokio::test]
async fn run_summaries_are_appended() {
    let h = harness(PipelineConfig::default()).await;
    h.runner.run(google_batch()).await.unwrap();
    h.runner.run(vec![]).await.unwrap();

    let runs = h.store.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    // Most recent first.
    assert_eq!(runs[0].scanned, 0);
    assert_eq!(runs[1].scanned, 4);
}
