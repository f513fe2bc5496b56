//! Pipeline orchestration: pre-filter, classify, merge, commit.
//!
//! Classification fans out with bounded concurrency, but record
//! application runs strictly in event order through a single funnel so
//! two events for the same application can never race. Every event's
//! outcome is committed on its own; one bad event never poisons a run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::{StreamExt, stream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{Classifier, ParsedOutcome};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::ledger::RunLedger;
use crate::mailbox::Mailbox;
use crate::matcher::{self, MatchOutcome};
use crate::normalize;
use crate::pipeline::extract;
use crate::pipeline::prefilter::{PreFilter, Verdict};
use crate::pipeline::types::{
    ClassificationResult, EventOutcome, RawEvent, SkipReason, StageGuess,
};
use crate::stage::{Stage, Transition};
use crate::store::{ApplicationRecord, RunSummary, SkipEntry, Store};

pub struct PipelineRunner {
    store: Arc<dyn Store>,
    classifier: Arc<dyn Classifier>,
    prefilter: PreFilter,
    config: PipelineConfig,
}

/// An event that survived the pre-filter, with its classification either
/// already settled by rules or still owed to the classifier.
enum Prepared {
    Ready(RawEvent, ClassificationResult),
    NeedsClassifier(RawEvent),
}

impl Prepared {
    fn event(&self) -> &RawEvent {
        match self {
            Prepared::Ready(event, _) | Prepared::NeedsClassifier(event) => event,
        }
    }
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn Store>,
        classifier: Arc<dyn Classifier>,
        prefilter: PreFilter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            prefilter,
            config,
        }
    }

    /// Fetch the scan window from `mailbox` and process it.
    ///
    /// An empty database gets the long initial window; every later run
    /// only looks back a few days.
    pub async fn run_once(&self, mailbox: &dyn Mailbox) -> Result<RunSummary, Error> {
        let first_run = self.store.all_applications().await?.is_empty();
        let days = if first_run {
            self.config.initial_scan_days
        } else {
            self.config.daily_scan_days
        };
        let since = Utc::now() - Duration::days(days);
        info!(since = %since, first_run, "Fetching mailbox window");

        let events = mailbox
            .fetch_since(since)
            .await
            .map_err(crate::error::Error::Fetch)?;
        self.run(events).await
    }

    /// Process one batch of events and persist the run summary.
    pub async fn run(&self, events: Vec<RawEvent>) -> Result<RunSummary, Error> {
        let mut ledger = RunLedger::start();

        // Durable exclusion sets, loaded once up front.
        let permanent = self.store.permanent_skip_ids().await?;
        let merged = self.store.merged_event_ids().await?;

        let mut events: Vec<RawEvent> = events
            .into_iter()
            .filter(|e| !permanent.contains(&e.id) && !merged.contains(&e.id))
            .collect();
        // Deterministic order: oldest first, message id breaking ties.
        events.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        info!(count = events.len(), "Events entering pipeline");

        // Phase 1: pre-filter and rule extraction, in order. Thread ids
        // kept earlier in this batch fold their follow-ups out; those
        // come back next run once the first message has merged.
        let mut prepared: Vec<Prepared> = Vec::new();
        let mut folded_threads: HashSet<String> = HashSet::new();
        for event in events {
            ledger.scanned();
            match self.prefilter.evaluate(&event, &folded_threads) {
                Verdict::Discard(reason) => {
                    debug!(message_id = %event.id, reason = reason.code(), "Pre-filter discard");
                    self.commit_skip(&event.id, &reason).await;
                    ledger.skip(&reason);
                }
                Verdict::Keep => {
                    if let Some(thread_id) = &event.thread_id {
                        folded_threads.insert(thread_id.clone());
                    }
                    match extract::try_extract(&event) {
                        Some(result) => prepared.push(Prepared::Ready(event, result)),
                        None => prepared.push(Prepared::NeedsClassifier(event)),
                    }
                }
            }
        }

        // Phase 2: bounded-concurrency classification for whatever the
        // rules could not settle, capped by the daily quota. Events past
        // the cap are left unrecorded and retried next run.
        let needs: Vec<usize> = prepared
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, Prepared::NeedsClassifier(_)))
            .map(|(i, _)| i)
            .collect();

        let used = self.store.classifier_calls_today().await?;
        let budget = self.config.daily_quota.saturating_sub(used) as usize;
        if needs.len() > budget {
            warn!(
                needed = needs.len(),
                budget,
                used,
                "Daily classifier quota reached, deferring the tail"
            );
        }
        let (within, deferred) = needs.split_at(needs.len().min(budget));

        let store = &self.store;
        let classifier = &self.classifier;
        let outcomes: Vec<(usize, Result<ParsedOutcome, crate::error::ClassifyError>)> =
            stream::iter(within.iter().copied())
                .map(|i| {
                    let event = prepared[i].event();
                    async move {
                        if let Err(e) = store.increment_classifier_calls().await {
                            warn!(error = %e, "Failed to count classifier call");
                        }
                        let out = classifier.classify(event).await;
                        (i, out)
                    }
                })
                .buffered(self.config.max_concurrent_classify.max(1))
                .collect()
                .await;
        let mut classified: HashMap<usize, Result<ParsedOutcome, crate::error::ClassifyError>> =
            outcomes.into_iter().collect();
        let deferred: HashSet<usize> = deferred.iter().copied().collect();

        // Phase 3: sequential apply. In-memory record list mirrors the
        // store so matching sees this run's own writes.
        let mut records = self.store.all_applications().await?;
        for (i, item) in prepared.into_iter().enumerate() {
            let (event, result) = match item {
                Prepared::Ready(event, result) => (event, result),
                Prepared::NeedsClassifier(event) => {
                    if deferred.contains(&i) {
                        ledger.skip(&SkipReason::ClassifierUnavailable(
                            "daily quota exhausted".into(),
                        ));
                        continue;
                    }
                    match classified.remove(&i) {
                        Some(Ok(ParsedOutcome::Classified(result))) => (event, result),
                        Some(Ok(ParsedOutcome::NotAnApplication)) => {
                            let reason = SkipReason::NotAnApplication;
                            self.commit_skip(&event.id, &reason).await;
                            ledger.skip(&reason);
                            continue;
                        }
                        Some(Ok(ParsedOutcome::Malformed(snippet))) => {
                            let reason = SkipReason::UnparseableResponse(snippet);
                            self.commit_skip(&event.id, &reason).await;
                            ledger.skip(&reason);
                            continue;
                        }
                        Some(Err(e)) => {
                            let reason = SkipReason::ClassifierUnavailable(e.to_string());
                            self.commit_skip(&event.id, &reason).await;
                            ledger.skip(&reason);
                            continue;
                        }
                        None => continue,
                    }
                }
            };

            let outcome = self.apply(&mut records, &event, result).await;
            if let EventOutcome::Skipped(reason) = &outcome {
                self.commit_skip(&event.id, reason).await;
            }
            ledger.record(&outcome);
        }

        let summary = ledger.finish();
        info!(
            scanned = summary.scanned,
            new = summary.new_records,
            updated = summary.updated_records,
            skipped = summary.skipped,
            "Run complete"
        );
        self.store.append_run(&summary).await?;
        Ok(summary)
    }

    /// Merge one classified event into the record set. Store writes are
    /// committed here; a failed write skips only this event.
    async fn apply(
        &self,
        records: &mut Vec<ApplicationRecord>,
        event: &RawEvent,
        result: ClassificationResult,
    ) -> EventOutcome {
        let incoming_stage = match result.stage_guess {
            StageGuess::Stage(s) => s,
            StageGuess::NotAnApplication => {
                return EventOutcome::Skipped(SkipReason::NotAnApplication);
            }
        };
        if result.confidence < self.config.confidence_threshold {
            return EventOutcome::Skipped(SkipReason::LowConfidence(result.confidence));
        }
        let company = match result.company.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => return EventOutcome::Skipped(SkipReason::MissingField("company")),
        };
        // Rule extraction supplies "Unknown Role" itself; here a missing
        // role means the classifier could not read the message.
        let role = match result.role.as_deref() {
            Some(r) if !r.trim().is_empty() => r,
            _ => return EventOutcome::Skipped(SkipReason::MissingField("role")),
        };

        let company_key = normalize::company_key(company);
        let role_key = normalize::role_key(role);

        match matcher::find_match(records, &company_key, &role_key) {
            MatchOutcome::Exact(found) | MatchOutcome::Fuzzy(found, _) => {
                let id = found.id.clone();
                self.merge_into(records, &id, event, incoming_stage, &result.notes)
                    .await
            }
            MatchOutcome::NoMatch | MatchOutcome::Ambiguous => {
                let record = ApplicationRecord {
                    id: Uuid::new_v4().to_string(),
                    company_key,
                    role_key,
                    display_company: normalize::display_company(company),
                    display_role: role.trim().to_string(),
                    stage: incoming_stage,
                    application_type: result.application_type,
                    date_first_applied: event.received_at,
                    last_updated: event.received_at,
                    notes: result.notes.clone(),
                    event_ids: vec![event.id.clone()],
                };
                if let Err(e) = self.store.insert_application(&record).await {
                    warn!(message_id = %event.id, error = %e, "Insert failed");
                    return EventOutcome::Skipped(SkipReason::CommitFailed(e.to_string()));
                }
                info!(
                    record_id = %record.id,
                    company = %record.display_company,
                    role = %record.display_role,
                    stage = %record.stage,
                    "New application tracked"
                );
                let id = record.id.clone();
                records.push(record);
                EventOutcome::NewRecord { record_id: id }
            }
        }
    }

    async fn merge_into(
        &self,
        records: &mut [ApplicationRecord],
        record_id: &str,
        event: &RawEvent,
        incoming_stage: Stage,
        note: &str,
    ) -> EventOutcome {
        let record = match records.iter_mut().find(|r| r.id == record_id) {
            Some(r) => r,
            None => {
                return EventOutcome::Skipped(SkipReason::CommitFailed(format!(
                    "record {record_id} vanished mid-run"
                )));
            }
        };

        let (new_stage, stage_changed) = match Stage::apply(record.stage, incoming_stage) {
            Transition::Advance(s) => (s, s != record.stage),
            Transition::Hold => (record.stage, false),
        };
        // Terminal records still absorb the event and its notes.
        let new_notes = join_notes(&record.notes, note);
        let new_updated = record.last_updated.max(event.received_at);

        if let Err(e) = self
            .store
            .update_application(&record.id, new_stage, &new_notes, new_updated)
            .await
        {
            warn!(message_id = %event.id, record_id = %record.id, error = %e, "Update failed");
            return EventOutcome::Skipped(SkipReason::CommitFailed(e.to_string()));
        }
        if let Err(e) = self
            .store
            .append_event(&record.id, &event.id, event.received_at)
            .await
        {
            warn!(message_id = %event.id, record_id = %record.id, error = %e, "Event append failed");
            return EventOutcome::Skipped(SkipReason::CommitFailed(e.to_string()));
        }

        if stage_changed {
            info!(
                record_id = %record.id,
                company = %record.display_company,
                from = %record.stage,
                to = %new_stage,
                "Stage advanced"
            );
        } else {
            debug!(record_id = %record.id, stage = %record.stage, "Event folded, stage held");
        }

        record.stage = new_stage;
        record.notes = new_notes;
        record.last_updated = new_updated;
        record.event_ids.push(event.id.clone());

        EventOutcome::Updated {
            record_id: record.id.clone(),
            stage_changed,
        }
    }

    /// Persist a skip decision. Failing to record a skip is logged and
    /// tolerated; the event simply comes back next run.
    async fn commit_skip(&self, message_id: &str, reason: &SkipReason) {
        let entry = SkipEntry {
            message_id: message_id.to_string(),
            reason: reason.code().to_string(),
            detail: reason.detail(),
            permanent: reason.is_permanent(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_skip(&entry).await {
            warn!(message_id, error = %e, "Failed to record skip");
        }
    }
}

fn join_notes(existing: &str, incoming: &str) -> String {
    let incoming = incoming.trim();
    if incoming.is_empty() || existing.contains(incoming) {
        return existing.to_string();
    }
    if existing.is_empty() {
        return incoming.to_string();
    }
    format!("{existing}\n{incoming}")
}
