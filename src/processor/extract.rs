//! Entity extraction from raw message text.
//!
//! Every function here is pure and total: missing values come back as
//! `None` or empty collections, never as errors.

use std::sync::OnceLock;

use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;

use super::compose::{directive_phrases, split_subject_body};
use super::datetime::resolve_datetime;
use crate::types::Entities;

/// Canonical style names and the keyword families that request them.
pub const STYLE_FAMILIES: &[(&str, &[&str])] = &[
    ("formal", &["formal", "formally", "professional", "professionally"]),
    ("casual", &["casual", "casually", "informal", "friendly"]),
    ("concise", &["concise", "concisely", "brief", "briefly", "succinct", "shorter"]),
    (
        "bullet_summary",
        &["bullet", "bullets", "bulleted", "bullet points", "summary", "summarize", "summarise"],
    ),
];

/// Verbs worth surfacing to downstream consumers.
pub const ACTION_VERBS: &[&str] = &[
    "schedule", "book", "invite", "cancel", "reschedule", "postpone", "move", "update", "send",
    "draft", "compose", "write", "email", "reply", "confirm", "review", "remind",
];

fn re_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn re_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z]+").unwrap())
}

fn re_style_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let mut words: Vec<&str> = STYLE_FAMILIES
            .iter()
            .flat_map(|(_, keywords)| keywords.iter().copied())
            .collect();
        // Longest first so "bullet points" wins over "bullet".
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));
        let alternation = words
            .iter()
            .map(|w| regex::escape(w).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
    })
}

fn re_spoken_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b([a-z0-9][a-z0-9._%+-]*)\s+(?:at|@)\s+([a-z0-9-]+(?:\s+(?:dot|\.)\s+[a-z0-9-]+)+)\b",
        )
        .unwrap()
    })
}

fn re_spoken_dot() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+(?:dot|\.)\s+").unwrap())
}

/// Extract all entities from one message, relative to `now`.
pub fn extract_entities(text: &str, now: DateTime<Tz>) -> Entities {
    let datetime = resolve_datetime(text, now);
    let (subject, body) = split_subject_body(text);

    Entities {
        emails: extract_emails(text),
        datetime_text: if datetime.is_none() {
            Some(text.to_string())
        } else {
            None
        },
        datetime,
        action_verbs: extract_action_verbs(text),
        subject,
        body,
        styles: detect_styles(text),
    }
}

/// `local@domain.tld` tokens in order of appearance. Duplicates are kept.
pub fn extract_emails(text: &str) -> Vec<String> {
    re_email()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .collect()
}

/// Known action verbs present in the text, first-seen order, deduplicated.
pub fn extract_action_verbs(text: &str) -> Vec<String> {
    let mut verbs: Vec<String> = Vec::new();
    for word in re_word().find_iter(text) {
        let lower = word.as_str().to_lowercase();
        if ACTION_VERBS.contains(&lower.as_str()) && !verbs.contains(&lower) {
            verbs.push(lower);
        }
    }
    verbs
}

/// Requested style names in first-seen order, deduplicated. Only style
/// words inside a directive ("make it formal", "in bullet points") count.
pub fn detect_styles(text: &str) -> Vec<String> {
    let mut styles: Vec<String> = Vec::new();
    for phrase in directive_phrases(text) {
        for m in re_style_keyword().find_iter(phrase) {
            let Some(style) = canonical_style(m.as_str()) else {
                continue;
            };
            if !styles.iter().any(|s| s == style) {
                styles.push(style.to_string());
            }
        }
    }
    styles
}

/// Map one style keyword (any case, any inner whitespace) to its canonical name.
pub fn canonical_style(keyword: &str) -> Option<&'static str> {
    let normalized = keyword
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    STYLE_FAMILIES
        .iter()
        .find(|(_, keywords)| keywords.contains(&normalized.as_str()))
        .map(|(name, _)| *name)
}

/// Rewrite dictated addresses ("alice at example dot com") into literal
/// ones. Applied to voice transcripts before extraction.
pub fn reconstruct_spoken_emails(text: &str) -> String {
    re_spoken_email()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let domain = re_spoken_dot().replace_all(&caps[2], ".");
            format!("{}@{}", &caps[1], domain).to_lowercase()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Tz> {
        chrono_tz::UTC.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_emails_in_order_with_duplicates() {
        let emails = extract_emails("cc bob@x.com, alice@example.org and bob@x.com.");
        assert_eq!(emails, vec!["bob@x.com", "alice@example.org", "bob@x.com"]);
    }

    #[test]
    fn test_styles_first_seen_dedup() {
        let styles = detect_styles("make it concise, then formal. Also more concise, as bullet points");
        assert_eq!(styles, vec!["concise", "formal", "bullet_summary"]);
    }

    #[test]
    fn test_informal_is_casual_not_formal() {
        assert_eq!(detect_styles("keep it informal"), vec!["casual"]);
    }

    #[test]
    fn test_action_verbs() {
        let verbs = extract_action_verbs("Please send and then SEND again, schedule it");
        assert_eq!(verbs, vec!["send", "schedule"]);
    }

    #[test]
    fn test_spoken_email_reconstruction() {
        let text = reconstruct_spoken_emails("email Alice at Example dot co dot uk about lunch");
        assert_eq!(text, "email alice@example.co.uk about lunch");
    }

    #[test]
    fn test_spoken_reconstruction_needs_dot() {
        let text = "meet me at office tomorrow";
        assert_eq!(reconstruct_spoken_emails(text), text);
    }

    #[test]
    fn test_extract_entities_schedule_without_time() {
        let text = "Schedule meeting with alice@example.com tomorrow";
        let entities = extract_entities(text, now());
        assert_eq!(entities.emails, vec!["alice@example.com"]);
        assert!(entities.datetime.is_none());
        assert_eq!(entities.datetime_text.as_deref(), Some(text));
        assert_eq!(entities.action_verbs, vec!["schedule"]);
    }

    #[test]
    fn test_extract_entities_email_parts() {
        let text = "send email to bob@x.com subject: Q3 numbers\nPlease review the deck. make it formal.";
        let entities = extract_entities(text, now());
        assert_eq!(entities.subject.as_deref(), Some("Q3 numbers"));
        assert_eq!(entities.body.as_deref(), Some("Please review the deck."));
        assert_eq!(entities.styles, vec!["formal"]);
        assert!(entities.datetime.is_none());
    }

    #[test]
    fn test_style_words_in_content_are_not_directives() {
        let text = "send email to bob@x.com subject: Q3 summary\nThe numbers are attached. Thanks for the friendly reminder.";
        let entities = extract_entities(text, now());
        assert!(entities.styles.is_empty(), "{:?}", entities.styles);
        assert_eq!(entities.subject.as_deref(), Some("Q3 summary"));
    }

    #[test]
    fn test_directive_forms() {
        assert_eq!(detect_styles("write a brief note to the team"), vec!["concise"]);
        assert_eq!(detect_styles("say hi in a friendly tone"), vec!["casual"]);
        assert_eq!(detect_styles("list the risks in bullet points"), vec!["bullet_summary"]);
        assert!(detect_styles("the summary is formal and brief").is_empty());
    }

    #[test]
    fn test_canonical_style_normalizes_whitespace() {
        assert_eq!(canonical_style("Bullet\n points"), Some("bullet_summary"));
        assert_eq!(canonical_style("shouty"), None);
    }
}
