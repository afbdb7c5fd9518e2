//! Extraction of structure from free-text participant responses.
//!
//! Participants are prompted to self-report confidence and to list
//! suggestions and concerns under labeled sections, but replies are
//! free text and the prompts are advisory. Extraction therefore has an
//! explicit path (the reply followed the format) and a heuristic path
//! (it did not), and never fails.

use std::sync::OnceLock;

use regex::Regex;

const HEURISTIC_BASE: i32 = 70;
const HEURISTIC_MIN: i32 = 50;
const HEURISTIC_MAX: i32 = 95;

/// Words suggesting the author is sure of the answer.
const CERTAINTY_WORDS: &[&str] = &[
    "definitely",
    "certainly",
    "clearly",
    "undoubtedly",
    "absolutely",
    "without question",
];

/// Words suggesting hedging.
const UNCERTAINTY_WORDS: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "might",
    "unsure",
    "not sure",
    "unclear",
    "it depends",
];

fn confidence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)confidence:\s*(\d{1,3})\s*%").expect("fixed confidence pattern")
    })
}

fn leading_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("fixed number pattern"))
}

/// Extract a 0-100 confidence value from a reply.
///
/// An explicit `Confidence: NN%` marker wins and is clamped to 100.
/// Otherwise confidence is inferred from wording: start at 70, add 5
/// per certainty word, subtract 5 per uncertainty word, clamp to
/// [50, 95] so an inferred value never claims the extremes.
pub fn extract_confidence(content: &str) -> u8 {
    if let Some(caps) = confidence_pattern().captures(content) {
        if let Ok(value) = caps[1].parse::<u32>() {
            return value.min(100) as u8;
        }
    }

    let lowered = content.to_lowercase();
    let mut score = HEURISTIC_BASE;
    for word in CERTAINTY_WORDS {
        if lowered.contains(word) {
            score += 5;
        }
    }
    for word in UNCERTAINTY_WORDS {
        if lowered.contains(word) {
            score -= 5;
        }
    }
    score.clamp(HEURISTIC_MIN, HEURISTIC_MAX) as u8
}

/// Extract bulleted items beneath a labeled section header.
///
/// Scans line by line: a line equal to (or starting with) the label,
/// case-insensitively, opens the section; subsequent `- ` or `* `
/// bullets are collected; any non-bullet line closes it.
pub fn extract_section(content: &str, label: &str) -> Vec<String> {
    let label_lower = label.to_lowercase();
    let mut items = Vec::new();
    let mut in_section = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.to_lowercase().starts_with(&label_lower) {
            in_section = true;
            continue;
        }
        if in_section {
            if let Some(item) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
            {
                if !item.is_empty() {
                    items.push(item.to_string());
                }
            } else if !trimmed.is_empty() {
                in_section = false;
            }
        }
    }
    items
}

/// Extract improvement suggestions from a reply.
pub fn extract_suggestions(content: &str) -> Vec<String> {
    extract_section(content, "suggestions:")
}

/// Extract concerns from a reply.
pub fn extract_concerns(content: &str) -> Vec<String> {
    extract_section(content, "concerns:")
}

/// Parse a peer-vote reply into a 1-10 score.
///
/// Takes the first number in the reply, clamped to [1, 10]. Replies
/// with no number at all yield `None` and the vote is dropped.
pub fn parse_vote(content: &str) -> Option<f64> {
    let caps = leading_number_pattern().captures(content)?;
    let value: f64 = caps[1].parse().ok()?;
    Some(value.clamp(1.0, 10.0))
}
