//! Message ingestion. The pipeline only ever sees [`RawEvent`]s; where
//! they come from is behind the [`Mailbox`] trait so tests can feed
//! synthetic batches.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mail_parser::MessageParser;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::FetchError;
use crate::pipeline::clean::clean_body;
use crate::pipeline::types::RawEvent;

/// Source of raw application events.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// All messages received at or after `since`. Order is not
    /// guaranteed; the pipeline sorts before processing.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>, FetchError>;
}

/// Local maildir-style mailbox: a directory of `.eml` files, optionally
/// split into `new/` and `cur/` subdirectories.
pub struct MaildirMailbox {
    root: PathBuf,
}

impl MaildirMailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn message_dirs(&self) -> Vec<PathBuf> {
        let new = self.root.join("new");
        let cur = self.root.join("cur");
        if new.is_dir() || cur.is_dir() {
            [new, cur].into_iter().filter(|d| d.is_dir()).collect()
        } else {
            vec![self.root.clone()]
        }
    }
}

#[async_trait]
impl Mailbox for MaildirMailbox {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawEvent>, FetchError> {
        let mut events = Vec::new();
        let mut unreadable = 0_u32;

        for dir in self.message_dirs() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }

                let raw = match std::fs::read(&path) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Unreadable message file, skipping");
                        unreadable += 1;
                        continue;
                    }
                };

                match parse_message(&raw, &path) {
                    Some(event) => {
                        if event.received_at >= since {
                            events.push(event);
                        }
                    }
                    None => {
                        warn!(path = %path.display(), "Unparseable message file, skipping");
                        unreadable += 1;
                    }
                }
            }
        }

        debug!(
            count = events.len(),
            unreadable,
            since = %since,
            "Mailbox scan complete"
        );
        Ok(events)
    }
}

/// Parse one raw RFC 822 message into a [`RawEvent`].
///
/// Messages without a Message-ID get a synthetic one derived from the
/// file name, so the skip set stays stable across runs.
fn parse_message(raw: &[u8], path: &Path) -> Option<RawEvent> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())?;

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(|s| format!("file-{s}"))
        })
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    // to_timestamp folds the header's timezone offset into the epoch
    // value, so senders in different offsets sort correctly.
    let received_at = parsed
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single())
        .unwrap_or_else(Utc::now);

    let thread_id = parsed.in_reply_to().as_text().map(|s| s.to_string());

    let body = parsed
        .body_text(0)
        .map(|t| clean_body(&t))
        .or_else(|| parsed.body_html(0).map(|h| clean_body(&h)))
        .unwrap_or_default();

    Some(RawEvent {
        id,
        sender,
        subject,
        received_at,
        body,
        thread_id,
    })
}
