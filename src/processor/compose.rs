//! Email composition rules: subject/body split and body sanitization.
//!
//! Subject rules run in order (first hit wins):
//!   1. `subject_label` — `subject:` / `sub:`; ends at newline, `body:` or sentence end
//!   2. `about_phrase` — "about <phrase>" / "regarding <phrase>", subject only
//!
//! Body sanitization runs after the split, before a draft is built:
//!   1. strip the "please send an email to ... subject: ..." command prefix
//!   2. strip any echo of the subject line
//!   3. strip trailing style directives ("make it formal.")
//!   4. strip stray `to: ...` lines
//!   5. fall back to the subject when nothing is left

use std::sync::OnceLock;

use regex::Regex;

/// A named subject rule: returns the subject and an optional body candidate.
pub type SubjectRule = fn(&str) -> Option<(String, Option<String>)>;

/// Subject rules in precedence order.
pub const SUBJECT_RULES: &[(&str, SubjectRule)] =
    &[("subject_label", subject_label), ("about_phrase", about_phrase)];

const STYLE_WORD: &str = r"(?:formal|formally|professional|professionally|casual|casually|informal|friendly|concise|concisely|brief|briefly|short|shorter|succinct|bullet[\s-]+points?|bullets?|bulleted|summary|summari[sz]ed?)";
const STYLE_MOD: &str = r"(?:more\s+|less\s+|very\s+|a\s+bit\s+(?:more\s+)?|in\s+(?:a\s+)?|as\s+(?:a\s+)?|into\s+(?:a\s+)?)?";

fn style_chain() -> String {
    format!(
        r"{STYLE_MOD}{STYLE_WORD}(?:\s*,?\s*(?:and\s+|then\s+|&\s*)?{STYLE_MOD}{STYLE_WORD})*(?:\s+(?:tone|style|format|version|points?|list))?"
    )
}

fn re_subject_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:subject|sub)\s*:\s*").unwrap())
}

fn re_body_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bbody\s*:").unwrap())
}

fn re_leading_body_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:\s*body\s*:\s*)+").unwrap())
}

fn re_sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?](?:\s|$)").unwrap())
}

fn re_about() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:about|regarding)\s+([^.!?\n]+)").unwrap())
}

fn re_leading_punct() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\s:;,.\-–—]+").unwrap())
}

fn re_directives() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let chain = style_chain();
        vec![
            // "... make it formal and concise."
            Regex::new(&format!(
                r"(?i)(?P<lead>^|[\s,;.!?])\s*(?:and\s+|then\s+|also\s+|but\s+)?(?:please\s+)?(?:make|keep|write|rewrite|turn|format|put)\s+(?:(?:it|this|that|the\s+(?:email|mail|message|body|draft))\s+)?{chain}\s*(?:please)?\s*[.!]*\s*$"
            ))
            .unwrap(),
            // "... in a casual tone."
            Regex::new(&format!(
                r"(?i)(?P<lead>^|[\s,;.!?])\s*(?:and\s+)?(?:please\s+)?(?:in|with|using)\s+(?:a\s+)?{chain}\s+(?:tone|style|format|points?|list)\s*[.!]*\s*$"
            ))
            .unwrap(),
        ]
    })
}

fn re_directive_phrase() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let chain = style_chain();
        Regex::new(&format!(
            r"(?i)\b(?:(?:make|keep|write|rewrite|turn|format|put)\s+(?:(?:it|this|that|the\s+(?:email|mail|message|body|draft))\s+)?(?P<verb>{chain})|(?:in|with|using)\s+(?:a\s+)?(?P<tone>{chain})\s+(?:tone|style|format|points?|list)\b|(?:in|as|into)\s+(?P<list>bullet[\s-]+points?|bullets)\b|an?\s+(?P<adj>{chain})\s+(?:e-?mail|mail|message|note|reply|version)\b)"
        ))
        .unwrap()
    })
}

/// The style words of every directive phrase in `text`, in order:
/// "make it formal" yields "formal", "in a casual tone" yields "casual".
/// Style words outside a directive ("thanks for the friendly reminder")
/// are not returned.
pub fn directive_phrases(text: &str) -> Vec<&str> {
    re_directive_phrase()
        .captures_iter(text)
        .filter_map(|caps| {
            ["verb", "tone", "list", "adj"]
                .iter()
                .find_map(|name| caps.name(name))
                .map(|m| m.as_str())
        })
        .collect()
}

fn re_command_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let recipient = r"(?:[^\s,]+@[^\s,]+|[A-Za-z]+)";
        Regex::new(&format!(
            r"(?i)^\s*(?:(?:hey|hi|ok|okay|please|kindly|can\s+you|could\s+you|would\s+you)[\s,]+)*(?:send|draft|compose|write|shoot)\s+(?:an?\s+|the\s+)?(?:quick\s+)?(?:e-?mail|mail|message|note)\b(?:\s+(?:to|for)\s+{recipient}(?:\s*(?:,|and)\s*{recipient})*)?(?:\s+(?:about|regarding)\b[^\n.!?]*[.!?]?)?(?:\s*(?:subject|sub)\s*:[^\n]*)?(?:\s+(?:saying|that\s+says|to\s+say|telling\s+(?:him|her|them)))?"
        ))
        .unwrap()
    })
}

fn re_subject_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*(?:subject|sub)\s*:.*(?:\n|$)").unwrap())
}

fn re_to_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*to\s*:.*(?:\n|$)").unwrap())
}

fn re_blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Split text into `(subject, body)` using the first matching subject rule.
pub fn split_subject_body(text: &str) -> (Option<String>, Option<String>) {
    for (name, rule) in SUBJECT_RULES {
        if let Some((subject, body)) = rule(text) {
            log::debug!("subject rule '{}' matched", name);
            let body = body.map(|b| clean_body(&b)).filter(|b| !b.is_empty());
            return (Some(subject), body);
        }
    }
    (None, None)
}

/// `subject: Q3 numbers\nbody...` or inline `subject: Q3 numbers. body...`
pub fn subject_label(text: &str) -> Option<(String, Option<String>)> {
    let marker = re_subject_label().find(text)?;
    let tail = &text[marker.end()..];

    let (subject, rest) = if let Some(idx) = tail.find('\n') {
        (&tail[..idx], Some(&tail[idx + 1..]))
    } else if let Some(label) = re_body_label().find(tail) {
        (&tail[..label.start()], Some(&tail[label.end()..]))
    } else if let Some(end) = re_sentence_end().find(tail) {
        (&tail[..end.start()], Some(&tail[end.start() + 1..]))
    } else {
        (tail, None)
    };

    let subject = strip_style_directives(subject)
        .trim_end_matches(&['.', '!', '?', ',', ';'][..])
        .trim()
        .to_string();
    if subject.is_empty() {
        return None;
    }
    Some((subject, rest.map(str::to_string)))
}

/// "send an email to bob about the budget review" → subject "The budget review".
pub fn about_phrase(text: &str) -> Option<(String, Option<String>)> {
    let caps = re_about().captures(text)?;
    let subject = strip_style_directives(&caps[1]);
    let subject = subject.trim().trim_end_matches(',').trim();
    if subject.is_empty() {
        return None;
    }
    Some((capitalize_first(subject), None))
}

/// Tidy a body candidate: leading punctuation, a duplicated `body:` label,
/// trailing style directives.
pub fn clean_body(body: &str) -> String {
    let body = re_leading_punct().replace(body, "");
    let body = re_leading_body_label().replace(&body, "");
    strip_style_directives(&body)
}

/// Remove trailing style directive phrases ("make it formal.", "in a casual tone").
pub fn strip_style_directives(text: &str) -> String {
    let mut current = text.trim_end().to_string();
    loop {
        let mut changed = false;
        for re in re_directives() {
            let next = re.replace(&current, "${lead}");
            let next = next.trim_end_matches(|c: char| c.is_whitespace() || c == ',' || c == ';');
            if next.len() != current.len() {
                current = next.to_string();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    current.trim().to_string()
}

/// Secondary pass before drafting. Never returns an empty body: when
/// everything is stripped the subject stands in.
pub fn sanitize_body(candidate: &str, subject: &str) -> String {
    let mut body = re_command_prefix().replace(candidate, "").into_owned();
    body = re_subject_line().replace_all(&body, "").into_owned();

    let trimmed = re_leading_punct().replace(&body, "").into_owned();
    body = match strip_prefix_ignore_case(&trimmed, subject) {
        Some(rest) => rest.to_string(),
        None => trimmed,
    };

    body = strip_style_directives(&body);
    body = re_to_line().replace_all(&body, "").into_owned();
    body = re_leading_punct().replace(&body, "").into_owned();
    body = re_blank_runs().replace_all(&body, "\n\n").trim().to_string();

    if body.is_empty() {
        return subject.trim().to_string();
    }
    capitalize_first(&body)
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim();
    if prefix.is_empty() || text.len() < prefix.len() || !text.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = text.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) {
        Some(rest)
    } else {
        None
    }
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_phrases_skip_content_words() {
        let text = "Thanks for the friendly reminder. Please make it concise and formal. Say it in a casual tone.";
        assert_eq!(directive_phrases(text), vec!["concise and formal", "casual"]);
        assert_eq!(
            directive_phrases("keep it brief, in a casual tone"),
            vec!["brief, in a casual tone"]
        );
        assert!(directive_phrases("Q3 summary attached").is_empty());
    }

    #[test]
    fn test_subject_on_its_own_line() {
        let (subject, body) = split_subject_body("email bob@x.com\nSubject: Launch plan\nWe go live Monday.");
        assert_eq!(subject.as_deref(), Some("Launch plan"));
        assert_eq!(body.as_deref(), Some("We go live Monday."));
    }

    #[test]
    fn test_inline_subject_with_body_label() {
        let (subject, body) =
            split_subject_body("send email to bob@x.com sub: Lunch body: body: see you at noon");
        assert_eq!(subject.as_deref(), Some("Lunch"));
        assert_eq!(body.as_deref(), Some("see you at noon"));
    }

    #[test]
    fn test_inline_subject_ends_at_sentence() {
        let (subject, body) = split_subject_body(
            "send email to bob@x.com subject: Q3 report. Please review the v1.2 numbers. make it formal and concise.",
        );
        assert_eq!(subject.as_deref(), Some("Q3 report"));
        assert_eq!(body.as_deref(), Some("Please review the v1.2 numbers."));
    }

    #[test]
    fn test_subject_without_body() {
        let (subject, body) = split_subject_body("send email to bob@x.com subject: Lunch tomorrow");
        assert_eq!(subject.as_deref(), Some("Lunch tomorrow"));
        assert!(body.is_none());
    }

    #[test]
    fn test_about_phrase_subject() {
        let (subject, body) =
            split_subject_body("send an email to bob@x.com about the budget review and make it formal");
        assert_eq!(subject.as_deref(), Some("The budget review"));
        assert!(body.is_none());
    }

    #[test]
    fn test_no_subject() {
        assert_eq!(split_subject_body("hello there"), (None, None));
    }

    #[test]
    fn test_strip_style_directives_variants() {
        assert_eq!(strip_style_directives("See you soon. make it formal."), "See you soon.");
        assert_eq!(strip_style_directives("See you soon, in a casual tone"), "See you soon");
        assert_eq!(
            strip_style_directives("Numbers attached. Please make it more concise then bullet points!"),
            "Numbers attached."
        );
        assert_eq!(strip_style_directives("Keep the friendly vibe."), "Keep the friendly vibe.");
    }

    #[test]
    fn test_sanitize_strips_command_prefix_and_subject() {
        let body = sanitize_body(
            "please send an email to bob@x.com subject: Lunch\nLunch\nsee you at noon",
            "Lunch",
        );
        assert_eq!(body, "See you at noon");
    }

    #[test]
    fn test_sanitize_strips_to_lines_and_directives() {
        let body = sanitize_body("To: bob@x.com\nThe deck is ready. make it casual", "Deck");
        assert_eq!(body, "The deck is ready.");
    }

    #[test]
    fn test_sanitize_saying_clause() {
        let body = sanitize_body("send an email to bob@x.com saying the report is ready", "Update");
        assert_eq!(body, "The report is ready");
    }

    #[test]
    fn test_sanitize_empty_falls_back_to_subject() {
        let body = sanitize_body("send email to bob@x.com subject: Lunch tomorrow", "Lunch tomorrow");
        assert_eq!(body, "Lunch tomorrow");
    }
}
