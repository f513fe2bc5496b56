//! Application-event processing pipeline.
//!
//! Every inbound message flows through:
//! 1. `Mailbox::fetch_since()` — source-specific I/O
//! 2. `PreFilter::evaluate()` — fast pattern matching (no classifier)
//! 3. `extract::try_extract()` — rule-based extraction for known senders
//! 4. `Classifier::classify()` — model-backed extraction for the rest
//! 5. Match, stage machine, store commit — one event at a time
//!
//! Skips are durable: a permanently skipped message is never looked at
//! again, a retry-eligible one comes back next run.

pub mod clean;
pub mod extract;
pub mod prefilter;
pub mod runner;
pub mod types;

pub use prefilter::{PreFilter, Verdict};
pub use runner::PipelineRunner;
pub use types::{ClassificationResult, EventOutcome, RawEvent, SkipReason, StageGuess};
