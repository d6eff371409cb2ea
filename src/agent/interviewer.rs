//! Human-in-the-loop question contract consumed by the pipeline's
//! `wait.human` handler. original_source's equivalent is a protocol with
//! a single `ask` method; there's no teacher analogue (km-tools has no
//! human-gate concept), so this is grounded directly on original_source,
//! expressed as an `async_trait` interface in the teacher's idiom.

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Choice {
    /// Accelerator key parsed from the edge label, e.g. `"y"` from `"[Y] Yes"`.
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct MultipleChoiceQuestion {
    pub prompt: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterviewerAnswer {
    Answered(String),
    TimedOut,
    Skipped,
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask_multiple_choice(&self, question: MultipleChoiceQuestion, timeout: Option<Duration>) -> InterviewerAnswer;
}

/// Non-interactive interviewer for dry runs and tests: always times out.
pub struct NullInterviewer;

#[async_trait]
impl Interviewer for NullInterviewer {
    async fn ask_multiple_choice(&self, _question: MultipleChoiceQuestion, _timeout: Option<Duration>) -> InterviewerAnswer {
        InterviewerAnswer::TimedOut
    }
}

/// Parses an edge label's accelerator key: `[K] label`, `K) label`,
/// `K - label`, or the first character of the label as a fallback.
pub fn parse_accelerator(label: &str) -> (String, String) {
    let trimmed = label.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            let key = rest[..close].trim().to_string();
            let remainder = rest[close + 1..].trim().to_string();
            return (key, remainder);
        }
    }
    if let Some(idx) = trimmed.find(") ") {
        let (key, rest) = trimmed.split_at(idx);
        return (key.trim().to_string(), rest[2..].trim().to_string());
    }
    if let Some(idx) = trimmed.find(" - ") {
        let (key, rest) = trimmed.split_at(idx);
        return (key.trim().to_string(), rest[3..].trim().to_string());
    }
    let key = trimmed.chars().next().map(|c| c.to_string()).unwrap_or_default();
    (key, trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracket_accelerator() {
        assert_eq!(parse_accelerator("[Y] Yes, ship it"), ("Y".to_string(), "Yes, ship it".to_string()));
    }

    #[test]
    fn parses_paren_accelerator() {
        assert_eq!(parse_accelerator("Y) Yes"), ("Y".to_string(), "Yes".to_string()));
    }

    #[test]
    fn parses_dash_accelerator() {
        assert_eq!(parse_accelerator("Y - Yes"), ("Y".to_string(), "Yes".to_string()));
    }

    #[test]
    fn falls_back_to_first_char() {
        assert_eq!(parse_accelerator("Retry"), ("R".to_string(), "Retry".to_string()));
    }
}
