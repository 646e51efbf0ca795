//! Partial-tolerant JSON parsing for streamed model output.
//!
//! A streamed response is a JSON document cut off at an arbitrary byte.
//! [`parse`] returns the best value derivable from such a prefix:
//!
//! | Truncated input | Result |
//! |-----------------|--------|
//! | `{"name": "Jo` | `{"name": "Jo"}` |
//! | `{"a": 1, "b` | `{"a": 1}` |
//! | `{"a": [1, 2,` | `{"a": [1, 2]}` |
//! | `{"a": tr` | `{}` |
//! | `{"a": -` | `{}` |
//!
//! Input that is malformed rather than merely truncated is an error carrying
//! the byte offset of the first offending character.

use serde_json::{Map, Number, Value};

/// Malformed (not merely truncated) input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed JSON at byte {offset}: {message}")]
pub struct PartialJsonError {
    pub offset: usize,
    pub message: String,
}

/// Parses a possibly truncated JSON document.
pub fn parse(text: &str) -> Result<Value, PartialJsonError> {
    let mut parser = Parser { text, pos: 0 };

    parser.skip_whitespace();
    if parser.at_end() {
        return Err(parser.error("no JSON value in input"));
    }

    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing characters"));
    }

    value.ok_or_else(|| PartialJsonError {
        offset: 0,
        message: "input ends before any value is complete".to_string(),
    })
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> PartialJsonError {
        PartialJsonError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// `Ok(None)` means the input ended before the value became usable.
    fn parse_value(&mut self) -> Result<Option<Value>, PartialJsonError> {
        match self.peek() {
            None => Ok(None),
            Some(b'{') => self.parse_object().map(Some),
            Some(b'[') => self.parse_array().map(Some),
            Some(b'"') => self.parse_string().map(|(text, _)| Some(Value::String(text))),
            Some(b't') => self.parse_literal("true", Value::Bool(true)),
            Some(b'f') => self.parse_literal("false", Value::Bool(false)),
            Some(b'n') => self.parse_literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.parse_number(),
            Some(other) => Err(self.error(format!("unexpected character '{}'", other as char))),
        }
    }

    fn parse_object(&mut self) -> Result<Value, PartialJsonError> {
        self.pos += 1;
        let mut object = Map::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b'"') => {}
                Some(_) => return Err(self.error("expected a string key")),
            }

            let (key, complete) = self.parse_string()?;
            if !complete {
                break;
            }

            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(b':') => self.pos += 1,
                Some(_) => return Err(self.error("expected ':' after object key")),
            }

            self.skip_whitespace();
            match self.parse_value()? {
                Some(value) => {
                    object.insert(key, value);
                }
                None => break,
            }

            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.error("expected ',' or '}' in object")),
            }
        }

        Ok(Value::Object(object))
    }

    fn parse_array(&mut self) -> Result<Value, PartialJsonError> {
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
            }

            match self.parse_value()? {
                Some(value) => items.push(value),
                None => break,
            }

            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.error("expected ',' or ']' in array")),
            }
        }

        Ok(Value::Array(items))
    }

    /// Returns the decoded text and whether the closing quote was seen.
    fn parse_string(&mut self) -> Result<(String, bool), PartialJsonError> {
        self.pos += 1;
        let mut decoded = String::new();

        while let Some(c) = self.text[self.pos..].chars().next() {
            match c {
                '"' => {
                    self.pos += 1;
                    return Ok((decoded, true));
                }
                '\\' => {
                    let escape_start = self.pos;
                    self.pos += 1;
                    let Some(escape) = self.peek() else {
                        return Ok((decoded, false));
                    };
                    self.pos += 1;
                    match escape {
                        b'"' => decoded.push('"'),
                        b'\\' => decoded.push('\\'),
                        b'/' => decoded.push('/'),
                        b'b' => decoded.push('\u{0008}'),
                        b'f' => decoded.push('\u{000C}'),
                        b'n' => decoded.push('\n'),
                        b'r' => decoded.push('\r'),
                        b't' => decoded.push('\t'),
                        b'u' => match self.parse_unicode_escape()? {
                            Some(ch) => decoded.push(ch),
                            None => return Ok((decoded, false)),
                        },
                        _ => {
                            self.pos = escape_start;
                            return Err(self.error("invalid escape sequence"));
                        }
                    }
                }
                _ => {
                    decoded.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }

        Ok((decoded, false))
    }

    /// Decodes the digits after `\u`. `Ok(None)` when the input ends inside the escape.
    fn parse_unicode_escape(&mut self) -> Result<Option<char>, PartialJsonError> {
        let Some(high) = self.read_hex4()? else {
            return Ok(None);
        };

        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high)
                .map(Some)
                .ok_or_else(|| self.error("invalid unicode escape"));
        }

        match &self.text.as_bytes()[self.pos..] {
            [b'\\', b'u', ..] => self.pos += 2,
            [] | [b'\\'] => {
                self.pos = self.text.len();
                return Ok(None);
            }
            _ => return Err(self.error("unpaired surrogate in unicode escape")),
        }
        let Some(low) = self.read_hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Err(self.error("invalid low surrogate in unicode escape"));
        }

        let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        char::from_u32(combined)
            .map(Some)
            .ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn read_hex4(&mut self) -> Result<Option<u32>, PartialJsonError> {
        let available = &self.text.as_bytes()[self.pos..];
        let digits = available.iter().take(4).take_while(|b| b.is_ascii_hexdigit()).count();

        if digits < 4 {
            if digits == available.len() {
                self.pos = self.text.len();
                return Ok(None);
            }
            self.pos += digits;
            return Err(self.error("expected four hex digits in unicode escape"));
        }

        let hex = &self.text[self.pos..self.pos + 4];
        self.pos += 4;
        u32::from_str_radix(hex, 16)
            .map(Some)
            .map_err(|_| self.error("expected four hex digits in unicode escape"))
    }

    fn parse_literal(&mut self, word: &str, value: Value) -> Result<Option<Value>, PartialJsonError> {
        let rest = &self.text[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            return Ok(Some(value));
        }
        if word.starts_with(rest) {
            self.pos = self.text.len();
            return Ok(None);
        }
        Err(self.error(format!("invalid literal, expected '{word}'")))
    }

    fn parse_number(&mut self) -> Result<Option<Value>, PartialJsonError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }

        let token = &self.text[start..self.pos];
        match serde_json::from_str::<Number>(token) {
            Ok(number) => Ok(Some(Value::Number(number))),
            Err(_) if self.at_end() => Ok(None),
            Err(_) => {
                self.pos = start;
                Err(self.error(format!("invalid number '{token}'")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_documents_match_serde_json() {
        let documents = [
            r#"{"name": "Ada", "age": 36, "tags": ["x", "y"], "ok": true, "none": null}"#,
            r#"[1, -2.5, 3e2, {"nested": {"deep": []}}]"#,
            r#""esc \" \\ \/ \n é 😀""#,
            "  {\"dup\": 1, \"dup\": 2}  ",
        ];

        for document in documents {
            let expected: Value = serde_json::from_str(document).expect("valid fixture");
            assert_eq!(parse(document).expect(document), expected);
        }
    }

    #[test]
    fn closes_truncated_structures() {
        let cases = [
            (r#"{"name": "Jo"#, json!({"name": "Jo"})),
            (r#"{"a": 1, "b"#, json!({"a": 1})),
            (r#"{"a": 1, "b":"#, json!({"a": 1})),
            (r#"{"a": 1,"#, json!({"a": 1})),
            (r#"{"a": [1, 2,"#, json!({"a": [1, 2]})),
            (r#"{"a": tr"#, json!({})),
            (r#"{"a": nul"#, json!({})),
            (r#"{"a": -"#, json!({})),
            (r#"{"a": 1."#, json!({})),
            (r#"{"a": 1e"#, json!({})),
            (r#"{"a": 12"#, json!({"a": 12})),
            (r#"{"a": "x\"#, json!({"a": "x"})),
            (r#"{"a": "x\u00"#, json!({"a": "x"})),
            (r#"{"a": {"b": {"c": "#, json!({"a": {"b": {}}})),
        ];

        for (input, expected) in cases {
            assert_eq!(parse(input).expect(input), expected, "input: {input}");
        }
    }

    #[test]
    fn every_prefix_of_an_object_parses() {
        let document = r#"{"name": "Zoë", "age": 30, "friends": ["a", "b"], "pet": {"kind": null, "ok": false}}"#;
        for (end, _) in document.char_indices().skip(1) {
            let prefix = &document[..end];
            assert!(parse(prefix).is_ok(), "prefix failed: {prefix}");
        }
        assert_eq!(
            parse(document).expect("complete"),
            serde_json::from_str::<Value>(document).expect("fixture")
        );
    }

    #[test]
    fn surrogate_pairs_after_high_half() {
        assert_eq!(parse(r#"{"a": "\uD83D\uDE00"}"#).expect("pair"), json!({"a": "😀"}));
        assert_eq!(parse(r#"{"a": "x\uD83D"#).expect("cut after high"), json!({"a": "x"}));
        assert_eq!(parse(r#"{"a": "x\uD83D\"#).expect("cut in escape"), json!({"a": "x"}));

        for input in [r#"{"a": "\uD800é"}"#, r#"{"a": "\uD800x"}"#, r#"{"a": "\uD800\n"}"#] {
            let error = parse(input).expect_err(input);
            assert!(error.message.contains("unpaired surrogate"), "{input}: {}", error.message);
        }
    }

    #[test]
    fn malformed_input_reports_offset() {
        let error = parse(r#"{"a" 1}"#).expect_err("missing colon");
        assert_eq!(error.offset, 5);

        let error = parse(r#"{"a": 1} x"#).expect_err("trailing garbage");
        assert_eq!(error.offset, 9);

        assert!(parse(r#"{"a": tx}"#).is_err());
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
        assert!(parse("-").is_err());
    }
}
