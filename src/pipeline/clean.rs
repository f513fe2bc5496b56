//! Email body cleaning — strip HTML, quoted replies, and footers before
//! a body excerpt goes anywhere near a prompt. Cuts token usage sharply
//! on typical ATS mail.

use std::sync::LazyLock;

use regex::Regex;

/// Word budget for the cleaned excerpt.
const MAX_BODY_WORDS: usize = 400;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));
static QUOTE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^On .+ wrote:?$").expect("quote header pattern"));
static FOOTER_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(unsubscribe|privacy policy|terms of service|all rights reserved|manage your email preferences)\s*$")
        .expect("footer pattern")
});

/// Clean a raw message body into an excerpt suitable for classification.
pub fn clean_body(body: &str) -> String {
    let mut text = HTML_TAG.replace_all(body, " ").into_owned();
    for (entity, replacement) in [("&nbsp;", " "), ("&amp;", "&"), ("&lt;", "<"), ("&gt;", ">")] {
        text = text.replace(entity, replacement);
    }

    let mut cleaned: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Quoted reply content
        if line.starts_with('>') || line.starts_with('|') {
            continue;
        }
        // Everything after a quote header is the prior thread
        if QUOTE_HEADER.is_match(line) {
            break;
        }
        if line.len() < 100 && FOOTER_ONLY.is_match(line) {
            continue;
        }
        cleaned.push(line);
    }

    let joined = cleaned.join("\n");
    let words: Vec<&str> = joined.split_whitespace().collect();
    if words.len() > MAX_BODY_WORDS {
        format!("{}\n[truncated]", words[..MAX_BODY_WORDS].join(" "))
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_tags_and_entities() {
        let body = "<div><p>Thank you for applying to <b>Acme &amp; Co</b>.</p></div>";
        let cleaned = clean_body(body);
        assert!(!cleaned.contains('<'));
        assert!(cleaned.contains("Acme & Co"));
    }

    #[test]
    fn drops_quoted_reply() {
        let body = "Thanks, we received your application.\n> Hi, I applied last week\n> just checking in";
        let cleaned = clean_body(body);
        assert!(cleaned.contains("received your application"));
        assert!(!cleaned.contains("checking in"));
    }

    #[test]
    fn stops_at_quote_header() {
        let body = "We'd like to schedule an interview.\nOn Mon, Jan 5, 2026 Alice wrote:\nOriginal message here";
        let cleaned = clean_body(body);
        assert!(cleaned.contains("schedule an interview"));
        assert!(!cleaned.contains("Original message"));
    }

    #[test]
    fn drops_footer_only_lines() {
        let body = "Your application is in review.\nUnsubscribe\nPrivacy Policy";
        let cleaned = clean_body(body);
        assert!(cleaned.contains("in review"));
        assert!(!cleaned.to_lowercase().contains("unsubscribe"));
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "word ".repeat(1000);
        let cleaned = clean_body(&body);
        assert!(cleaned.ends_with("[truncated]"));
        assert!(cleaned.split_whitespace().count() <= MAX_BODY_WORDS + 1);
    }

    #[test]
    fn empty_body_is_fine() {
        assert_eq!(clean_body(""), "");
    }
}
