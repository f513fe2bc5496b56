//! Canonicalization of free-text company and role strings.
//!
//! The canonical keys are used only for matching; the first human-readable
//! form seen is what a record displays. Both functions are total and stable:
//! the same input always yields the same key, independent of call order.

use std::sync::LazyLock;

use regex::Regex;

/// Legal-entity suffixes stripped from company names.
static LEGAL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s+(llc|l\.l\.c\.?|inc\.?|incorporated|corp\.?|corporation|ltd\.?|limited|co\.?|plc|llp|lp)\b",
    )
    .expect("legal suffix pattern")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Punctuation that separates role tokens.
static ROLE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/_,.–—()|]+").expect("role separator pattern"));

/// Known company aliases: canonical match key → display name.
/// Applied after suffix stripping and case-folding.
const COMPANY_ALIASES: &[(&str, &str)] = &[
    ("google", "Google"),
    ("alphabet", "Google"),
    ("meta platforms", "Meta"),
    ("meta", "Meta"),
    ("facebook", "Meta"),
    ("amazon com services", "Amazon"),
    ("amazon", "Amazon"),
    ("amazon web services", "AWS"),
    ("aws", "AWS"),
    ("microsoft", "Microsoft"),
    ("apple", "Apple"),
    ("jpmorgan chase", "JPMorgan"),
    ("j p morgan", "JPMorgan"),
    ("jpmorgan", "JPMorgan"),
    ("goldman sachs", "Goldman Sachs"),
    ("international business machines", "IBM"),
    ("ibm", "IBM"),
];

/// Role abbreviations expanded before noise stripping.
const ROLE_SYNONYMS: &[(&str, &str)] = &[
    ("swe", "software engineer"),
    ("sde", "software engineer"),
    ("software developer", "software engineer"),
    ("ml", "machine learning"),
    ("ai", "artificial intelligence"),
    ("pm", "product manager"),
    ("product management", "product manager"),
    ("fullstack", "full stack"),
    ("full-stack", "full stack"),
    ("frontend", "front end"),
    ("front-end", "front end"),
    ("backend", "back end"),
    ("back-end", "back end"),
];

/// Tokens that carry no matching signal: employment type, seniority,
/// location modality, level numerals.
const ROLE_NOISE: &[&str] = &[
    "intern",
    "internship",
    "co-op",
    "coop",
    "full-time",
    "fulltime",
    "part-time",
    "parttime",
    "remote",
    "hybrid",
    "onsite",
    "contract",
    "contractor",
    "i",
    "ii",
    "iii",
    "iv",
    "sr",
    "jr",
    "senior",
    "junior",
    "associate",
    "lead",
    "staff",
    "principal",
    "new",
    "grad",
    "summer",
    "fall",
    "winter",
    "spring",
];

/// Strip legal suffixes and collapse whitespace/punctuation.
fn clean_company(raw: &str) -> String {
    let stripped = LEGAL_SUFFIX.replace_all(raw.trim(), "");
    let depunct: String = stripped
        .chars()
        .map(|c| if c == ',' || c == '.' || c == ';' { ' ' } else { c })
        .collect();
    WHITESPACE.replace_all(depunct.trim(), " ").into_owned()
}

/// Human-readable company form: alias display name when known, otherwise
/// the cleaned string title-cased.
pub fn display_company(raw: &str) -> String {
    let cleaned = clean_company(raw);
    let key = cleaned.to_lowercase();
    for (alias, display) in COMPANY_ALIASES {
        if key == *alias {
            return (*display).to_string();
        }
    }
    title_case(&cleaned)
}

/// Canonical company match key.
pub fn company_key(raw: &str) -> String {
    display_company(raw).to_lowercase()
}

/// Canonical role match key: case-folded, abbreviations expanded, noise
/// tokens removed. Falls back to the case-folded input when stripping
/// would leave nothing (an all-noise title like "Intern" must not match
/// every other all-noise title's remainder).
pub fn role_key(raw: &str) -> String {
    let lowered = ROLE_SEPARATORS
        .replace_all(&raw.to_lowercase(), " ")
        .into_owned();
    let collapsed = WHITESPACE.replace_all(lowered.trim(), " ").into_owned();

    let mut expanded = format!(" {collapsed} ");
    for (abbrev, full) in ROLE_SYNONYMS {
        expanded = expanded.replace(&format!(" {abbrev} "), &format!(" {full} "));
    }

    let kept: Vec<&str> = expanded
        .split_whitespace()
        .filter(|token| !ROLE_NOISE.contains(token) && !token.chars().all(|c| c.is_ascii_digit()))
        .collect();

    if kept.is_empty() {
        collapsed
    } else {
        kept.join(" ")
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
