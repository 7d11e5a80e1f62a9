//! Deterministic style rewrites for drafted email text.
//!
//! Every transform is idempotent and leaves email addresses and URLs
//! untouched: word-level substitutions only run on the text between them.

use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const DEFAULT_SIGNATURE: &str = "Echo Agent";

/// A named rewrite. Unknown names never reach this type; see [`Style::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Formal,
    Casual,
    Concise,
    BulletSummary,
}

impl Style {
    /// Resolve a style name. `bullet` is an alias of `bullet_summary`.
    pub fn parse(name: &str) -> Option<Style> {
        match name.trim().to_lowercase().as_str() {
            "formal" => Some(Style::Formal),
            "casual" => Some(Style::Casual),
            "concise" => Some(Style::Concise),
            "bullet" | "bullet_summary" => Some(Style::BulletSummary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Style::Formal => "formal",
            Style::Casual => "casual",
            Style::Concise => "concise",
            Style::BulletSummary => "bullet_summary",
        }
    }
}

const CONTRACTIONS: &[(&str, &str)] = &[
    ("can't", "cannot"),
    ("won't", "will not"),
    ("don't", "do not"),
    ("doesn't", "does not"),
    ("didn't", "did not"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("wasn't", "was not"),
    ("weren't", "were not"),
    ("haven't", "have not"),
    ("hasn't", "has not"),
    ("shouldn't", "should not"),
    ("wouldn't", "would not"),
    ("couldn't", "could not"),
    ("i'm", "I am"),
    ("i'll", "I will"),
    ("i've", "I have"),
    ("i'd", "I would"),
    ("it's", "it is"),
    ("that's", "that is"),
    ("there's", "there is"),
    ("we're", "we are"),
    ("we'll", "we will"),
    ("you're", "you are"),
    ("you'll", "you will"),
    ("they're", "they are"),
    ("let's", "let us"),
];

const FILLER_PHRASES: &[&str] = &[
    "at this point in time",
    "in order to",
    "I believe",
    "I think",
    "it seems",
    "kind of",
    "sort of",
    "basically",
    "actually",
    "really",
    "just",
    "very",
];

const FORMAL_GREETINGS: &[&str] = &["dear", "hello", "hi"];
const CASUAL_GREETINGS: &[&str] = &["hey", "hi", "hiya", "hello", "yo"];
const FORMAL_CLOSINGS: &[&str] = &["kind regards", "regards", "sincerely"];

fn re_protected() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:https?://\S+|www\.\S+|[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})")
            .unwrap()
    })
}

fn re_contraction() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = CONTRACTIONS
            .iter()
            .map(|(c, _)| regex::escape(c).replace('\'', "['’]"))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
    })
}

fn re_affirmative() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:okay|ok|yeah)\b").unwrap())
}

fn re_filler() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = FILLER_PHRASES
            .iter()
            .map(|p| regex::escape(p).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
    })
}

fn re_formal_closing_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)(?:\A|\n)[ \t]*(?:(?:kind|best|warm)\s+regards|regards|(?:yours\s+)?sincerely|yours\s+truly)\b.*\z",
        )
        .unwrap()
    })
}

fn re_action_cue() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:is|are|will|need|please|can|should|review|send|schedule|update|confirm)\b",
        )
        .unwrap()
    })
}

fn re_sentence_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([.!?])\s+").unwrap())
}

fn re_inline_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap())
}

fn re_space_before_punct() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" +([,;:!?])").unwrap())
}

fn re_blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Applies styles. Holds the signature used by the formal closing.
#[derive(Debug, Clone)]
pub struct StyleRewriter {
    signature: String,
}

impl Default for StyleRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE)
    }
}

impl StyleRewriter {
    pub fn new(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let signature = if signature.trim().is_empty() {
            DEFAULT_SIGNATURE.to_string()
        } else {
            signature.trim().to_string()
        };
        Self { signature }
    }

    /// Rewrite `text` in the named style. Unknown names return the input unchanged.
    pub fn rewrite(&self, text: &str, style: &str) -> String {
        match Style::parse(style) {
            Some(style) => self.apply(text, style),
            None => {
                log::debug!("unknown style '{}', leaving text unchanged", style);
                text.to_string()
            }
        }
    }

    pub fn apply(&self, text: &str, style: Style) -> String {
        match style {
            Style::Formal => self.formalize(text),
            Style::Casual => casualize(text),
            Style::Concise => make_concise(text),
            Style::BulletSummary => bulletize(text),
        }
    }

    /// Chain styles left to right over the evolving text.
    pub fn apply_styles<S: AsRef<str>>(&self, text: &str, styles: &[S]) -> String {
        styles
            .iter()
            .fold(text.to_string(), |acc, style| self.rewrite(&acc, style.as_ref()))
    }

    fn formalize(&self, text: &str) -> String {
        // An existing closing block (and the signature under it) is kept verbatim.
        let text = text.trim();
        let (body, closing) = match re_formal_closing_block().find(text) {
            Some(m) => (&text[..m.start()], text[m.start()..].trim()),
            None => (text, ""),
        };
        let mut t = map_unprotected(body, |segment| {
            let expanded = re_contraction().replace_all(segment, |caps: &Captures<'_>| {
                expand_contraction(&caps[0])
            });
            re_affirmative().replace_all(&expanded, "Yes").into_owned()
        });

        if !opens_with(&t, FORMAL_GREETINGS) {
            t = format!("Hello,\n\n{t}");
        }
        if !closing.is_empty() {
            t = format!("{}\n\n{}", t.trim_end(), closing);
        } else {
            let lower = t.to_lowercase();
            if !FORMAL_CLOSINGS.iter().any(|c| lower.contains(c)) {
                t = format!("{}\n\nKind regards,\n{}", t.trim_end(), self.signature);
            }
        }
        tidy(&t)
    }
}

/// Rewrite with the default signature.
pub fn rewrite(text: &str, style: &str) -> String {
    StyleRewriter::default().rewrite(text, style)
}

fn casualize(text: &str) -> String {
    let mut t = text.trim().to_string();
    if !opens_with(&t, CASUAL_GREETINGS) {
        t = format!("Hey, {t}");
    }
    t = re_formal_closing_block().replace(&t, "").into_owned();
    let lower = t.to_lowercase();
    if !lower.contains("cheers") && !lower.contains("thanks") {
        t = format!("{}\n\nThanks!", t.trim_end());
    }
    tidy(&t)
}

fn make_concise(text: &str) -> String {
    let mut current = tidy(text);
    // Removing one filler can join the halves of another ("kind just of").
    loop {
        let next = tidy(&map_unprotected(&current, |segment| {
            re_filler().replace_all(segment, "").into_owned()
        }));
        if next == current {
            return current;
        }
        current = next;
    }
}

fn bulletize(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let split = re_sentence_break().replace_all(text.trim(), "$1\n");
    let bullets: Vec<String> = split
        .lines()
        .map(strip_bullet)
        .filter(|s| !s.is_empty() && re_action_cue().is_match(s))
        .map(|s| format!("- {}", s.trim_end_matches(&['.', ' '][..])))
        .collect();

    if bullets.is_empty() {
        return format!("- {}", strip_bullet(text));
    }
    bullets.join("\n")
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    if line == "-" {
        return "";
    }
    line.strip_prefix("- ").unwrap_or(line).trim()
}

fn expand_contraction(matched: &str) -> String {
    let key = matched.replace('’', "'").to_lowercase();
    let Some((_, expansion)) = CONTRACTIONS.iter().find(|(c, _)| *c == key) else {
        return matched.to_string();
    };
    if matched.starts_with(|c: char| c.is_uppercase()) {
        capitalize(expansion)
    } else {
        expansion.to_string()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// First word, stripped of punctuation, is one of `greetings`.
fn opens_with(text: &str, greetings: &[&str]) -> bool {
    text.split_whitespace()
        .next()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .is_some_and(|w| greetings.contains(&w.as_str()))
}

/// Run `f` over the stretches of text between email addresses and URLs.
fn map_unprotected(text: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in re_protected().find_iter(text) {
        out.push_str(&f(&text[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&f(&text[last..]));
    out
}

/// Collapse inline whitespace, trim lines, cap blank runs at one empty line.
fn tidy(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let line = re_inline_space().replace_all(line.trim(), " ");
            re_space_before_punct().replace_all(&line, "$1").into_owned()
        })
        .collect();
    re_blank_runs()
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}
