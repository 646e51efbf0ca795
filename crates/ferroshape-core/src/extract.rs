//! JSON payload extraction from free-form model output.
//!
//! Reasoning-style prompts ask the model to think out loud and then emit a
//! fenced ```` ```json ```` block. [`extract`] locates the first such block and
//! strips the comments models like to leave inside it. The JSON prompt styles
//! use [`extract_braced`] instead.

use std::sync::OnceLock;

use regex::Regex;

const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

/// Outcome of fence extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractResult {
    /// Cleaned block content, possibly empty.
    Found(String),
    FenceMissing,
    FenceUnterminated,
}

impl ExtractResult {
    pub fn found(&self) -> Option<&str> {
        match self {
            Self::Found(text) => Some(text),
            Self::FenceMissing | Self::FenceUnterminated => None,
        }
    }
}

/// Extracts the first ```` ```json ```` block, comments and blank lines removed.
pub fn extract(text: &str) -> ExtractResult {
    let Some(open) = text.find(FENCE_OPEN) else {
        return ExtractResult::FenceMissing;
    };

    let mut body_start = open + FENCE_OPEN.len();
    let rest = &text[body_start..];
    if rest.starts_with("\r\n") {
        body_start += 2;
    } else if rest.starts_with('\n') {
        body_start += 1;
    }

    let Some(close) = text[body_start..].find(FENCE_CLOSE) else {
        return ExtractResult::FenceUnterminated;
    };

    ExtractResult::Found(strip_comments(&text[body_start..body_start + close]))
}

/// Removes `//`, `#` and `%` line comments and `/* */` block comments, then
/// drops blank lines. Markers inside string literals are left alone.
pub fn strip_comments(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            stripped.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' || c == '\n' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                stripped.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
            }
            '/' if chars.peek() == Some(&'/') => skip_line(&mut chars),
            '#' | '%' => skip_line(&mut chars),
            _ => stripped.push(c),
        }
    }

    stripped
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(&next) = chars.peek() {
        if next == '\n' {
            break;
        }
        chars.next();
    }
}

fn braced_span() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static pattern compiles"))
}

/// Greedy span from the first `{` to the last `}`.
pub fn extract_braced(text: &str) -> Option<&str> {
    braced_span().find(text).map(|span| span.as_str())
}
