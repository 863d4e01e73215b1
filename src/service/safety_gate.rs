//! Policy filter applied to every SQL string immediately before it runs.
//!
//! The rule engine is authoritative and always consulted first. When an
//! oracle is attached it acts as a second opinion: it can only tighten a
//! verdict, never loosen one, and anything it says that does not parse is
//! treated as unsafe.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::Oracle;

const FORBIDDEN: [&str; 4] = ["DROP", "ALTER", "TRUNCATE", "CREATE"];

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn returns_rows(&self) -> bool {
        matches!(self, Self::Select)
    }
}

/// `{safe, reason}`; produced fresh per execution and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub safe: bool,
    pub reason: String,
    #[serde(skip)]
    pub kind: Option<StatementKind>,
}

impl Verdict {
    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: reason.into(),
            kind: None,
        }
    }

    fn safe(kind: StatementKind, reason: impl Into<String>) -> Self {
        Self {
            safe: true,
            reason: reason.into(),
            kind: Some(kind),
        }
    }
}

#[derive(Clone)]
pub struct SafetyGate {
    oracle: Option<Arc<dyn Oracle>>,
    timeout: Duration,
}

impl SafetyGate {
    /// Rule engine only.
    pub fn rules_only() -> Self {
        Self {
            oracle: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_oracle(oracle: Arc<dyn Oracle>, timeout: Duration) -> Self {
        Self {
            oracle: Some(oracle),
            timeout,
        }
    }

    pub async fn classify(&self, sql: &str) -> Verdict {
        let verdict = check_rules(sql);
        if !verdict.safe {
            debug!(reason = %verdict.reason, "rule engine rejected statement");
            return verdict;
        }
        let Some(oracle) = self.oracle.as_ref() else {
            return verdict;
        };

        let second = match tokio::time::timeout(self.timeout, oracle.classify(sql)).await {
            Ok(Ok(text)) => parse_verdict(&text),
            Ok(Err(e)) => {
                warn!(error = %e, "oracle classifier failed; failing closed");
                Verdict::unsafe_because("Validator failed")
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "oracle classifier timed out; failing closed");
                Verdict::unsafe_because("Validator timed out")
            }
        };

        if second.safe {
            Verdict {
                safe: true,
                reason: second.reason,
                kind: verdict.kind,
            }
        } else {
            second
        }
    }
}

/// Deterministic policy check.
///
/// Forbidden keywords are matched against the raw text, literals and
/// comments included. Statement shape (kind, `;`, `WHERE`) is read only
/// from the executable code left after [`mask_sql`].
pub fn check_rules(sql: &str) -> Verdict {
    let raw_upper = sql.to_uppercase();
    if let Some(word) = words(&raw_upper).find(|w| FORBIDDEN.contains(w)) {
        return Verdict::unsafe_because(format!("{word} statements are not allowed"));
    }

    let code = match mask_sql(sql) {
        Ok(code) => code,
        Err(reason) => return Verdict::unsafe_because(reason),
    };
    let statement = code.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if statement.is_empty() {
        return Verdict::unsafe_because("Empty statement");
    }
    if statement.contains(';') {
        return Verdict::unsafe_because("Multiple statements are not allowed");
    }

    let upper = statement.to_uppercase();
    let keywords: Vec<&str> = words(&upper).collect();

    let Some(kind) = keywords.first().and_then(|w| StatementKind::from_keyword(w)) else {
        return Verdict::unsafe_because(
            "Only SELECT, INSERT, UPDATE or DELETE statements are allowed",
        );
    };

    match kind {
        StatementKind::Update | StatementKind::Delete if !keywords.contains(&"WHERE") => {
            let verb = if kind == StatementKind::Update {
                "UPDATE"
            } else {
                "DELETE"
            };
            Verdict::unsafe_because(format!("{verb} without a WHERE clause affects every row"))
        }
        StatementKind::Select => Verdict::safe(kind, "Read-only SELECT"),
        StatementKind::Insert => Verdict::safe(kind, "INSERT of new rows"),
        StatementKind::Update => Verdict::safe(kind, "UPDATE scoped by WHERE"),
        StatementKind::Delete => Verdict::safe(kind, "DELETE scoped by WHERE"),
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

#[derive(Deserialize)]
struct RawVerdict {
    safe: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the oracle's free-form answer. Anything that is not a well-formed
/// `{"safe": bool, ...}` object is unsafe.
pub fn parse_verdict(text: &str) -> Verdict {
    if text.trim().is_empty() {
        return Verdict::unsafe_because("Empty response");
    }

    if let Some(m) = JSON_OBJECT.find(text) {
        let chunk = m
            .as_str()
            .replace(['\n', '\r', '\t'], " ")
            .replace('\'', "\"");
        let chunk = TRAILING_COMMA.replace_all(&chunk, "}");
        match serde_json::from_str::<RawVerdict>(&chunk) {
            Ok(raw) => {
                let reason = raw
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| {
                        let fallback = if raw.safe { "Approved" } else { "Rejected" };
                        fallback.to_string()
                    });
                return Verdict {
                    safe: raw.safe,
                    reason,
                    kind: None,
                };
            }
            Err(e) => debug!(error = %e, "verdict JSON did not parse"),
        }
    }

    Verdict::unsafe_because("Validator could not produce valid JSON.")
}

/// Blank out quoted spans and comments, keeping only executable code.
///
/// Quotes are `'`, `"` and `` ` ``, with a doubled delimiter as the only
/// escape. Constructs the tenant engines read differently are refused:
/// backslashes inside quotes, `#` comments, MySQL `/*! */` executable
/// comments and `--` not followed by whitespace.
fn mask_sql(sql: &str) -> Result<String, &'static str> {
    let mut code = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                loop {
                    match chars.next() {
                        None => return Err("Unterminated quoted text"),
                        Some('\\') => return Err("Backslash escapes are not allowed"),
                        Some(c) if c == ch => {
                            if chars.peek() == Some(&ch) {
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        Some(_) => {}
                    }
                }
                code.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                match chars.peek() {
                    None => {}
                    Some(c) if c.is_whitespace() => {}
                    Some(_) => return Err("Ambiguous `--` sequence"),
                }
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
                code.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                if matches!(chars.peek(), Some('!') | Some('+')) {
                    return Err("Executable comments are not allowed");
                }
                let mut prev = ' ';
                let mut closed = false;
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        closed = true;
                        break;
                    }
                    prev = ch;
                }
                if !closed {
                    return Err("Unterminated comment");
                }
                code.push(' ');
            }
            '#' => return Err("`#` comments are not allowed"),
            _ => code.push(ch),
        }
    }

    Ok(code)
}
