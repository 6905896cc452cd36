//! Read-only guard for model-generated SQL.
//!
//! Two independent checks run on every statement:
//! - generation time: whole-text, whole-word scan for mutating keywords plus
//!   the leading-keyword rule (`validate_generated_sql`)
//! - execution time: a lexical scan that ignores string literals, quoted
//!   identifiers and comments, with a wider keyword list, and a
//!   single-statement rule (`validate_executable_sql`)
//!
//! Neither is a SQL parser; both reject rather than repair.

use crate::infrastructure::db::SqlDialect;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Keywords refused when the model hands back SQL.
pub const GENERATION_BLOCKED_KEYWORDS: [&str; 11] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE", "REPLACE", "RENAME",
    "GRANT", "REVOKE",
];

/// Keywords refused right before execution.
pub const EXECUTION_BLOCKED_KEYWORDS: [&str; 18] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE", "REPLACE", "RENAME",
    "GRANT", "REVOKE", "LOCK", "UNLOCK", "CALL", "EXEC", "EXECUTE", "SET", "LOAD",
];

pub const ALLOWED_LEADING_KEYWORDS: [&str; 3] = ["SELECT", "WITH", "SHOW"];

pub const BLOCKED_QUERY_MESSAGE: &str = "Query blocked: Only SELECT queries are allowed for safety.";

static GENERATION_KEYWORD_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    GENERATION_BLOCKED_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"\b{}\b", kw)).unwrap()))
        .collect()
});

/// Validation result with detailed error information
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
        }
    }

    pub fn add_error(&mut self, code: &str, message: &str, field: Option<&str>) {
        self.is_valid = false;
        self.errors.push(ValidationError {
            code: code.to_string(),
            message: message.to_string(),
            field: field.map(|f| f.to_string()),
        });
    }

    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.message.as_str())
    }

    fn invalid(code: &str, message: &str, field: Option<&str>) -> Self {
        let mut result = Self::valid();
        result.add_error(code, message, field);
        result
    }
}

/// Generation-side check. Keyword hits anywhere in the text count,
/// including inside string literals.
pub fn validate_generated_sql(sql: &str) -> ValidationResult {
    let upper = sql.to_uppercase();

    for (keyword, pattern) in GENERATION_KEYWORD_PATTERNS.iter() {
        if pattern.is_match(&upper) {
            return ValidationResult::invalid(
                "FORBIDDEN_STATEMENT",
                &format!("Blocked: SQL contains '{}' which is not allowed.", keyword),
                Some(keyword),
            );
        }
    }

    if !starts_with_allowed_keyword(&upper) {
        return ValidationResult::invalid(
            "INVALID_STATEMENT",
            "Only SELECT/WITH/SHOW queries are allowed.",
            None,
        );
    }

    ValidationResult::valid()
}

fn starts_with_allowed_keyword(upper: &str) -> bool {
    let first_word: String = upper
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    ALLOWED_LEADING_KEYWORDS.contains(&first_word.as_str())
}

/// Execution-side check over the lexical token stream.
///
/// The statement is lexed once per quoting convention the engine may be
/// running with, and every lexing has to pass. An unclosed literal only
/// counts under the server default; under the other conventions the tail is
/// a syntax error and the tokens before it are still checked.
pub fn validate_executable_sql(sql: &str, dialect: SqlDialect) -> ValidationResult {
    let mut result = ValidationResult::valid();
    for (pass, lexing) in Lexing::candidates(dialect).into_iter().enumerate() {
        check_scan(&SqlScan::new(sql, lexing), pass == 0, &mut result);
        if !result.is_valid {
            break;
        }
    }
    result
}

fn check_scan(scan: &SqlScan, reject_unterminated: bool, result: &mut ValidationResult) {
    if scan.unterminated && reject_unterminated {
        result.add_error(
            "UNTERMINATED_TOKEN",
            "Unterminated literal or comment",
            None,
        );
    }

    match scan.first_word() {
        Some(word) if ALLOWED_LEADING_KEYWORDS.contains(&word) => {}
        Some(word) => result.add_error(
            "INVALID_STATEMENT",
            &format!("Statement must start with SELECT, WITH or SHOW (found {})", word),
            Some(word),
        ),
        None => result.add_error("EMPTY_STATEMENT", "No SQL statement found", None),
    }

    for keyword in EXECUTION_BLOCKED_KEYWORDS {
        if scan.contains_word(keyword) {
            result.add_error(
                "FORBIDDEN_STATEMENT",
                &format!("Query contains forbidden keyword: {}", keyword),
                Some(keyword),
            );
        }
    }

    if scan.statement_count() > 1 {
        result.add_error(
            "MULTIPLE_STATEMENTS",
            "Only a single statement may be executed",
            None,
        );
    }
}

/// Strips trailing terminators and appends a row cap unless the statement
/// already has a LIMIT or is a SHOW.
pub fn apply_row_limit(sql: &str, limit: u32, dialect: SqlDialect) -> String {
    let mut trimmed = sql.trim();
    while let Some(rest) = trimmed.strip_suffix(';') {
        trimmed = rest.trim_end();
    }

    let scan = SqlScan::new(trimmed, Lexing::server_default(dialect));
    if scan.contains_word("LIMIT") || scan.first_word() == Some("SHOW") {
        return trimmed.to_string();
    }

    let separator = if scan.ends_in_line_comment { "\n" } else { " " };
    format!("{}{}LIMIT {}", trimmed, separator, limit)
}

/// Quoting rules for one pass over a statement.
#[derive(Debug, Clone, Copy)]
struct Lexing {
    dialect: SqlDialect,
    /// `\` escapes the next character inside `'` literals (and `"` on MySQL).
    backslash_escapes: bool,
}

impl Lexing {
    fn server_default(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            backslash_escapes: dialect == SqlDialect::MySql,
        }
    }

    /// MySQL's NO_BACKSLASH_ESCAPES and PostgreSQL's
    /// standard_conforming_strings flip the backslash rule per server.
    fn candidates(dialect: SqlDialect) -> Vec<Self> {
        let default = Self::server_default(dialect);
        match dialect {
            SqlDialect::Sqlite => vec![default],
            SqlDialect::MySql | SqlDialect::Postgres => vec![
                default,
                Self {
                    backslash_escapes: !default.backslash_escapes,
                    ..default
                },
            ],
        }
    }

    fn is(&self, dialect: SqlDialect) -> bool {
        self.dialect == dialect
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Semicolon,
}

/// Token stream of a statement with literals, quoted identifiers and
/// comments removed. Words are upper-cased.
struct SqlScan {
    tokens: Vec<Token>,
    ends_in_line_comment: bool,
    unterminated: bool,
}

impl SqlScan {
    fn new(sql: &str, lexing: Lexing) -> Self {
        let chars: Vec<char> = sql.chars().collect();
        let mut tokens = Vec::new();
        let mut ends_in_line_comment = false;
        let mut i = 0;

        let skipped = loop {
            if i >= chars.len() {
                break Some(i);
            }
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            ends_in_line_comment = false;

            let end = match c {
                '\'' => skip_quoted(&chars, i, c, lexing.backslash_escapes),
                '"' => skip_quoted(
                    &chars,
                    i,
                    c,
                    lexing.backslash_escapes && lexing.is(SqlDialect::MySql),
                ),
                '`' => skip_quoted(&chars, i, c, false),
                '[' if lexing.is(SqlDialect::Sqlite) => skip_until(&chars, i + 1, ']'),
                '$' if lexing.is(SqlDialect::Postgres) => match dollar_tag(&chars, i) {
                    Some(tag) => skip_dollar_quoted(&chars, i, &tag),
                    None => Some(i + 1),
                },
                '-' if next == Some('-') && dashes_open_comment(&chars, i, lexing) => {
                    ends_in_line_comment = true;
                    Some(skip_line(&chars, i))
                }
                '#' if lexing.is(SqlDialect::MySql) => {
                    ends_in_line_comment = true;
                    Some(skip_line(&chars, i))
                }
                // MySQL runs the body of `/*! ... */`, so scan it as code.
                '/' if next == Some('*')
                    && chars.get(i + 2) == Some(&'!')
                    && lexing.is(SqlDialect::MySql) =>
                {
                    let mut j = i + 3;
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    Some(j)
                }
                '/' if next == Some('*') => {
                    skip_block_comment(&chars, i, lexing.is(SqlDialect::Postgres))
                }
                ';' => {
                    tokens.push(Token::Semicolon);
                    Some(i + 1)
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut j = i;
                    while j < chars.len()
                        && (chars[j].is_ascii_alphanumeric() || chars[j] == '_' || chars[j] == '$')
                    {
                        j += 1;
                    }
                    let word: String = chars[i..j].iter().collect();
                    // PostgreSQL E'...' literals always honour backslash escapes.
                    if lexing.is(SqlDialect::Postgres)
                        && word.eq_ignore_ascii_case("e")
                        && chars.get(j) == Some(&'\'')
                    {
                        skip_quoted(&chars, j, '\'', true)
                    } else {
                        tokens.push(Token::Word(word.to_ascii_uppercase()));
                        Some(j)
                    }
                }
                c if c.is_ascii_digit() => {
                    // Numeric literals like 1e10 must not yield the word "E10".
                    let mut j = i;
                    while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '.')
                    {
                        j += 1;
                    }
                    Some(j)
                }
                _ => Some(i + 1),
            };

            match end {
                Some(end) => i = end,
                None => break None,
            }
        };

        Self {
            tokens,
            ends_in_line_comment,
            unterminated: skipped.is_none(),
        }
    }

    fn first_word(&self) -> Option<&str> {
        match self.tokens.iter().find(|t| **t != Token::Semicolon) {
            Some(Token::Word(word)) => Some(word.as_str()),
            _ => None,
        }
    }

    fn contains_word(&self, keyword: &str) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Word(word) if word == keyword))
    }

    /// Number of non-empty statements separated by `;`.
    fn statement_count(&self) -> usize {
        let mut count = 0;
        let mut in_statement = false;
        for token in &self.tokens {
            match token {
                Token::Word(_) if !in_statement => {
                    in_statement = true;
                    count += 1;
                }
                Token::Semicolon => in_statement = false,
                _ => {}
            }
        }
        count
    }
}

/// Returns the index just past the closing quote, or `None` when the
/// literal never closes. Doubled quotes stay inside the literal.
fn skip_quoted(
    chars: &[char],
    start: usize,
    quote: char,
    backslash_escapes: bool,
) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && backslash_escapes {
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

fn skip_until(chars: &[char], from: usize, close: char) -> Option<usize> {
    chars[from.min(chars.len())..]
        .iter()
        .position(|c| *c == close)
        .map(|offset| from + offset + 1)
}

/// `$$` or `$tag$` at `start`; `$1` placeholders are not tags.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut i = start + 1;
    if let Some(c) = chars.get(i) {
        if !(c.is_alphabetic() || *c == '_' || *c == '$') {
            return None;
        }
    }
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if chars.get(i) == Some(&'$') {
        Some(chars[start..=i].iter().collect())
    } else {
        None
    }
}

fn skip_dollar_quoted(chars: &[char], start: usize, tag: &str) -> Option<usize> {
    let tag: Vec<char> = tag.chars().collect();
    let body = start + tag.len();
    (body..chars.len())
        .find(|&i| chars[i..].starts_with(&tag))
        .map(|i| i + tag.len())
}

/// MySQL only treats `--` as a comment when whitespace or a control
/// character follows; `SELECT 1--1` is arithmetic there.
fn dashes_open_comment(chars: &[char], start: usize, lexing: Lexing) -> bool {
    if !lexing.is(SqlDialect::MySql) {
        return true;
    }
    chars
        .get(start + 2)
        .map_or(true, |c| c.is_whitespace() || c.is_control())
}

fn skip_line(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

/// PostgreSQL block comments nest; MySQL and SQLite close at the first `*/`.
fn skip_block_comment(chars: &[char], start: usize, nested: bool) -> Option<usize> {
    let mut depth = 1;
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(i);
            }
            continue;
        }
        if nested && chars[i] == '/' && chars[i + 1] == '*' {
            depth += 1;
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}
