//! Per-run accounting. One [`RunLedger`] lives for the duration of a
//! pipeline run and folds every event outcome into counters; `finish`
//! turns it into the [`RunSummary`] row the store appends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::pipeline::types::{EventOutcome, SkipReason};
use crate::store::traits::RunSummary;

#[derive(Debug)]
pub struct RunLedger {
    started_at: DateTime<Utc>,
    scanned: u64,
    new_records: u64,
    updated_records: u64,
    skipped: u64,
    skip_reasons: BTreeMap<String, u64>,
}

impl RunLedger {
    pub fn start() -> Self {
        Self::start_at(Utc::now())
    }

    pub fn start_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            scanned: 0,
            new_records: 0,
            updated_records: 0,
            skipped: 0,
            skip_reasons: BTreeMap::new(),
        }
    }

    /// Count an event that entered the pipeline this run.
    pub fn scanned(&mut self) {
        self.scanned += 1;
    }

    pub fn record(&mut self, outcome: &EventOutcome) {
        match outcome {
            EventOutcome::NewRecord { .. } => self.new_records += 1,
            EventOutcome::Updated { .. } => self.updated_records += 1,
            EventOutcome::Skipped(reason) => self.skip(reason),
        }
    }

    pub fn skip(&mut self, reason: &SkipReason) {
        self.skipped += 1;
        *self
            .skip_reasons
            .entry(reason.code().to_string())
            .or_insert(0) += 1;
    }

    pub fn finish(self) -> RunSummary {
        RunSummary {
            started_at: self.started_at,
            scanned: self.scanned,
            new_records: self.new_records,
            updated_records: self.updated_records,
            skipped: self.skipped,
            skip_reasons: self.skip_reasons,
        }
    }
}
