//! Prompt construction and response parsing for the classifier adapter.
//!
//! The wire contract with the model is deliberately tight: a single JSON
//! object with fixed fields, or the bare word `null` for anything that is
//! not a real application response. Models still wrap output in markdown
//! fences or prose, so extraction tolerates both.

use serde::Deserialize;
use tracing::warn;

use crate::pipeline::types::{ApplicationType, ClassificationResult, RawEvent, StageGuess};
use crate::stage::Stage;

/// Outcome of parsing one classifier response.
#[derive(Debug, Clone)]
pub enum ParsedOutcome {
    /// The model judged the message not to be an application response.
    NotAnApplication,
    /// Output that no amount of salvage could turn into the contract.
    /// Definitive — near-deterministic models repeat themselves.
    Malformed(String),
    /// A structured candidate event. Company/role may still be absent;
    /// the pipeline applies its completeness and confidence policy.
    Classified(ClassificationResult),
}

/// Fixed extraction instruction sent as the head of every prompt.
pub fn system_prompt() -> String {
    format!(
        "Extract job application data from the email. Return ONLY this JSON or the word null:\n\
         {{\"company\":\"Name\",\"role\":\"Title\",\"stage\":\"{}\",\"notes\":\"one line\",\
         \"confidence\":0.0,\"is_internship\":true}}\n\
         Rules:\n\
         - stage must be exactly one of the listed labels\n\
         - confidence is 0.0-1.0 for how sure you are this is a real application response\n\
         - If the email is not about a job application the sender made, return null. No other text.",
        Stage::all().map(|s| s.label()).join("|"),
    )
}

/// Per-event prompt body: sender, subject, and the cleaned excerpt.
pub fn user_prompt(event: &RawEvent) -> String {
    format!(
        "From: {}\nSubject: {}\n\nBody:\n{}",
        event.sender, event.subject, event.body
    )
}

/// Wire shape of the model's JSON answer.
#[derive(Debug, Deserialize)]
struct WireClassification {
    #[serde(default)]
    company: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    stage: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    is_internship: bool,
}

/// Parse raw model output into a `ParsedOutcome`. Total — malformed
/// output is reported, never an error.
pub fn parse_response(raw: &str) -> ParsedOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return ParsedOutcome::NotAnApplication;
    }

    let Some(json) = extract_json_object(trimmed) else {
        warn!(raw = %snippet(trimmed), "Classifier output contained no JSON object");
        return ParsedOutcome::Malformed(snippet(trimmed));
    };

    let wire: WireClassification = match serde_json::from_str(&json) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(error = %e, raw = %snippet(&json), "Classifier JSON did not deserialize");
            return ParsedOutcome::Malformed(snippet(&json));
        }
    };

    let stage = match wire.stage.parse::<Stage>() {
        Ok(stage) => stage,
        Err(_) => {
            warn!(stage = %wire.stage, "Classifier returned an unknown stage label");
            return ParsedOutcome::Malformed(format!("unknown stage '{}'", wire.stage));
        }
    };

    let none_if_empty = |s: String| {
        let s = s.trim().to_string();
        if s.is_empty() { None } else { Some(s) }
    };

    ParsedOutcome::Classified(ClassificationResult {
        company: none_if_empty(wire.company),
        role: none_if_empty(wire.role),
        application_type: if wire.is_internship {
            ApplicationType::Internship
        } else {
            ApplicationType::FullTime
        },
        stage_guess: StageGuess::Stage(stage),
        // Models that omit the field are trusted — the original wire
        // contract carried no confidence channel at all.
        confidence: wire.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
        notes: wire.notes.trim().to_string(),
    })
}

/// Extract the first balanced JSON object, tolerating markdown fences
/// and surrounding prose.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn snippet(s: &str) -> String {
    s.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_every_stage_label() {
        let prompt = system_prompt();
        for stage in Stage::all() {
            assert!(prompt.contains(stage.label()), "missing {}", stage.label());
        }
        assert!(prompt.contains("null"));
    }

    #[test]
    fn parses_plain_json() {
        let raw = r#"{"company":"Google","role":"Software Engineer","stage":"Applied","notes":"confirmation","confidence":0.95,"is_internship":false}"#;
        let ParsedOutcome::Classified(result) = parse_response(raw) else {
            panic!("expected Classified");
        };
        assert_eq!(result.company.as_deref(), Some("Google"));
        assert_eq!(result.stage_guess, StageGuess::Stage(Stage::Applied));
        assert!((result.confidence - 0.95).abs() < 0.01);
        assert_eq!(result.application_type, ApplicationType::FullTime);
    }

    #[test]
    fn parses_markdown_wrapped_json() {
        let raw = "Here you go:\n```json\n{\"company\":\"Stripe\",\"role\":\"SWE\",\"stage\":\"Offer\"}\n```";
        let ParsedOutcome::Classified(result) = parse_response(raw) else {
            panic!("expected Classified");
        };
        assert_eq!(result.company.as_deref(), Some("Stripe"));
        assert_eq!(result.stage_guess, StageGuess::Stage(Stage::Offer));
    }

    #[test]
    fn null_means_not_an_application() {
        assert!(matches!(parse_response("null"), ParsedOutcome::NotAnApplication));
        assert!(matches!(parse_response("  NULL \n"), ParsedOutcome::NotAnApplication));
        assert!(matches!(parse_response(""), ParsedOutcome::NotAnApplication));
    }

    #[test]
    fn missing_confidence_is_trusted() {
        let raw = r#"{"company":"Meta","role":"Data Scientist","stage":"In Review"}"#;
        let ParsedOutcome::Classified(result) = parse_response(raw) else {
            panic!("expected Classified");
        };
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn confidence_is_clamped() {
        let raw = r#"{"company":"X","role":"Y","stage":"Applied","confidence":3.5}"#;
        let ParsedOutcome::Classified(result) = parse_response(raw) else {
            panic!("expected Classified");
        };
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_fields_become_none() {
        let raw = r#"{"company":"","role":"  ","stage":"Applied"}"#;
        let ParsedOutcome::Classified(result) = parse_response(raw) else {
            panic!("expected Classified");
        };
        assert!(result.company.is_none());
        assert!(result.role.is_none());
    }

    #[test]
    fn unknown_stage_is_malformed() {
        let raw = r#"{"company":"X","role":"Y","stage":"Ghosted"}"#;
        assert!(matches!(parse_response(raw), ParsedOutcome::Malformed(_)));
    }

    #[test]
    fn prose_without_json_is_malformed() {
        let raw = "I think this is probably a rejection email from Acme.";
        assert!(matches!(parse_response(raw), ParsedOutcome::Malformed(_)));
    }

    #[test]
    fn balanced_brace_extraction_handles_nesting_and_strings() {
        let raw = r#"analysis: {"company":"A{B}","role":"R","stage":"Applied","notes":"has } brace"} trailing"#;
        let ParsedOutcome::Classified(result) = parse_response(raw) else {
            panic!("expected Classified");
        };
        assert_eq!(result.company.as_deref(), Some("A{B}"));
        assert_eq!(result.notes, "has } brace");
    }
}
