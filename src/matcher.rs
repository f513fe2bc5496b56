//! Deduplication matcher: decides whether a classified event belongs to
//! an existing application record or starts a new one.
//!
//! Matching runs over canonical keys only (see [`crate::normalize`]); the
//! display forms stored on a record never participate.

use std::collections::HashSet;

use tracing::debug;

use crate::store::traits::ApplicationRecord;

/// Minimum combined score for a fuzzy candidate to count as a match.
pub const FUZZY_THRESHOLD: f32 = 0.75;

/// Company-key score when one key contains the other rather than
/// matching exactly ("stripe" vs "stripe payments").
const COMPANY_CONTAINMENT_SCORE: f32 = 0.9;

/// Shortest company key eligible for containment matching; below this,
/// substring hits are noise.
const MIN_CONTAINMENT_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome<'a> {
    /// Both canonical keys matched exactly.
    Exact(&'a ApplicationRecord),
    /// Best fuzzy candidate at or above [`FUZZY_THRESHOLD`].
    Fuzzy(&'a ApplicationRecord, f32),
    /// Two or more candidates tied on score and recency. The caller
    /// creates a new record rather than guessing.
    Ambiguous,
    NoMatch,
}

/// Find the record a `(company_key, role_key)` pair should merge into.
///
/// Exact key equality wins outright. Otherwise every record whose
/// company key is compatible is scored, and the best candidate above
/// the threshold is returned; ties on both score and `last_updated`
/// are reported as [`MatchOutcome::Ambiguous`].
pub fn find_match<'a>(
    records: &'a [ApplicationRecord],
    company_key: &str,
    role_key: &str,
) -> MatchOutcome<'a> {
    if let Some(record) = records
        .iter()
        .find(|r| r.company_key == company_key && r.role_key == role_key)
    {
        return MatchOutcome::Exact(record);
    }

    let mut candidates: Vec<(&ApplicationRecord, f32)> = Vec::new();
    for record in records {
        let score = fuzzy_score(record, company_key, role_key);
        if score >= FUZZY_THRESHOLD {
            candidates.push((record, score));
        }
    }

    if candidates.is_empty() {
        return MatchOutcome::NoMatch;
    }

    // Highest score first, most recently updated breaking score ties.
    candidates.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_updated.cmp(&a.last_updated))
    });

    if candidates.len() > 1 {
        let (first, s1) = candidates[0];
        let (second, s2) = candidates[1];
        if s1 == s2 && first.last_updated == second.last_updated {
            debug!(
                company_key,
                role_key,
                score = s1,
                "ambiguous fuzzy match, refusing to pick"
            );
            return MatchOutcome::Ambiguous;
        }
    }

    let (best, score) = candidates[0];
    MatchOutcome::Fuzzy(best, score)
}

/// Combined similarity of a record against an incoming key pair, in
/// `0.0..=1.0`. Zero when the company keys are incompatible.
pub fn fuzzy_score(record: &ApplicationRecord, company_key: &str, role_key: &str) -> f32 {
    let company = company_similarity(&record.company_key, company_key);
    if company == 0.0 {
        return 0.0;
    }
    let role = if record.role_key == role_key {
        1.0
    } else {
        token_overlap(&record.role_key, role_key)
    };
    company * role
}

fn company_similarity(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    if a.len() >= MIN_CONTAINMENT_LEN
        && b.len() >= MIN_CONTAINMENT_LEN
        && (a.contains(b) || b.contains(a))
    {
        return COMPANY_CONTAINMENT_SCORE;
    }
    0.0
}

/// Jaccard overlap of whitespace-delimited role-key tokens.
fn token_overlap(a: &str, b: &str) -> f32 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    shared as f32 / union as f32
}
