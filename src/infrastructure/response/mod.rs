use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<think>[\s\S]*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<reasoning>[\s\S]*?</reasoning>").unwrap());

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static CODE_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:sql)?\s*\n?(.*?)\n?```").unwrap());

static LIST_MARKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+\s*[.):-]|[-*•]|Q\d*[.:])\s*").unwrap());

const SQL_LEADING_KEYWORDS: [&str; 3] = ["SELECT", "WITH", "SHOW"];

/// Cleans LLM response by removing reasoning tags some models emit
pub fn clean_llm_response(response: &str) -> String {
    let mut cleaned = THINK_TAG_PATTERN.replace_all(response, "").to_string();
    cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = cleaned.trim().to_string();
    MULTIPLE_NEWLINES_PATTERN
        .replace_all(&cleaned, "\n\n")
        .to_string()
}

/// Pulls a single SQL statement out of a model reply.
///
/// Takes the body of the first fenced block if there is one, drops any prose
/// before the first line that opens with SELECT, WITH or SHOW, and normalizes
/// the tail to exactly one `;`.
pub fn extract_sql(response: &str) -> String {
    let cleaned = clean_llm_response(response);
    let mut text = cleaned.trim().to_string();

    if let Some(body) = CODE_FENCE_PATTERN
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
    {
        text = body;
    }

    text = text.trim_matches('`').trim().to_string();

    let lines: Vec<&str> = text.lines().collect();
    if let Some(start) = lines.iter().position(|line| {
        let upper = line.trim().to_uppercase();
        SQL_LEADING_KEYWORDS.iter().any(|kw| upper.starts_with(kw))
    }) {
        text = lines[start..].join("\n");
    }

    format!("{};", text.trim_end().trim_end_matches(';').trim())
}

/// Splits a follow-up suggestion reply into clean questions.
pub fn parse_follow_ups(response: &str, min_len: usize, limit: usize) -> Vec<String> {
    clean_llm_response(response)
        .lines()
        .map(|line| LIST_MARKER_PATTERN.replace(line, "").trim().to_string())
        .map(|line| line.trim_matches('"').trim().to_string())
        .filter(|line| line.chars().count() >= min_len)
        .take(limit)
        .collect()
}
