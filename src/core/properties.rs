//! Codec for the `properties` header.
//!
//! The transport carries the framework's message properties (delivery info,
//! body encoding, delivery tag, ...) as one serialized header value. Two
//! formats are understood:
//!
//! * [`PropertiesFormat::Json`]: plain JSON (default).
//! * [`PropertiesFormat::Literal`]: the literal dialect written by older
//!   producers: `{'key': u'value', 'n': 2, 'ok': True}`. Only mappings,
//!   sequences, tuples, quoted strings, numbers, `True`, `False` and `None`
//!   are accepted.
//!
//! A value that does not parse is an error for that message; there is no
//! fallback to an empty mapping.

use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::core::error::TransportError;

/// Deepest container nesting the literal parser accepts, same as serde_json.
const MAX_DEPTH: usize = 128;

/// Serialization used for the embedded `properties` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertiesFormat {
    #[default]
    Json,
    Literal,
}

/// Parse a `properties` header value.
pub fn decode(format: PropertiesFormat, raw: &str) -> Result<Value, TransportError> {
    match format {
        PropertiesFormat::Json => serde_json::from_str(raw)
            .map_err(|e| TransportError::malformed_properties(e.to_string())),
        PropertiesFormat::Literal => LiteralParser::new(raw).parse_document(),
    }
}

/// Serialize properties for the `properties` header.
pub fn encode(format: PropertiesFormat, value: &Value) -> String {
    match format {
        PropertiesFormat::Json => value.to_string(),
        PropertiesFormat::Literal => {
            let mut out = String::new();
            write_literal(value, &mut out);
            out
        }
    }
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_quoted(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted(key, out);
                out.push_str(": ");
                write_literal(item, out);
            }
            out.push('}');
        }
    }
}

fn write_quoted(s: &str, out: &mut String) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
}

/// Recursive-descent parser for the literal dialect.
struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn parse_document(mut self) -> Result<Value, TransportError> {
        let value = self.parse_value()?;
        self.skip_ws();
        if self.pos != self.src.len() {
            return Err(self.error("trailing characters"));
        }
        Ok(value)
    }

    fn error(&self, what: &str) -> TransportError {
        TransportError::malformed_properties(format!("{what} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), TransportError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{want}'"))),
        }
    }

    fn parse_value(&mut self) -> Result<Value, TransportError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.nested(Self::parse_mapping),
            Some('[') => self.nested(|p| p.parse_sequence('[', ']')),
            Some('(') => self.nested(|p| p.parse_sequence('(', ')')),
            Some('\'') | Some('"') => self.parse_string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() || c == '.' => {
                self.parse_number()
            }
            Some(c) if c.is_ascii_alphabetic() => self.parse_word(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Value, TransportError>,
    ) -> Result<Value, TransportError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn parse_mapping(&mut self) -> Result<Value, TransportError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Value::Object(map));
            }
            let key = match self.parse_value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => (if b { "True" } else { "False" }).to_owned(),
                _ => return Err(self.error("unsupported mapping key")),
            };
            self.skip_ws();
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn parse_sequence(&mut self, open: char, close: char) -> Result<Value, TransportError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(Value::Array(items));
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(items)),
                _ => return Err(self.error(&format!("expected ',' or '{close}'"))),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, TransportError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected string")),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.parse_escape()?),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_escape(&mut self) -> Result<char, TransportError> {
        let c = match self.bump() {
            Some('\\') => '\\',
            Some('\'') => '\'',
            Some('"') => '"',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('0') => '\0',
            Some('x') => self.parse_hex_escape(2)?,
            Some('u') => self.parse_hex_escape(4)?,
            Some('U') => self.parse_hex_escape(8)?,
            _ => return Err(self.error("invalid escape sequence")),
        };
        Ok(c)
    }

    fn parse_hex_escape(&mut self, digits: usize) -> Result<char, TransportError> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(self.error("invalid escape sequence"));
        }
        let code =
            u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid escape sequence"))?;
        let c = char::from_u32(code).ok_or_else(|| self.error("invalid code point"))?;
        self.pos = end;
        Ok(c)
    }

    fn parse_number(&mut self) -> Result<Value, TransportError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' | 'e' | 'E' => is_float = true,
                '-' | '+' if is_float => {}
                _ => break,
            }
            self.bump();
        }
        let text = &self.src[start..self.pos];
        // integers written by older producers may carry a long suffix
        if !is_float && matches!(self.peek(), Some('L' | 'l')) {
            self.bump();
        }

        if is_float {
            let f: f64 = text.parse().map_err(|_| self.error("invalid number"))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| self.error("non-finite number"))
        } else {
            let digits = text.trim_start_matches('+');
            if let Ok(i) = digits.parse::<i64>() {
                return Ok(Value::Number(i.into()));
            }
            if let Ok(u) = digits.parse::<u64>() {
                return Ok(Value::Number(u.into()));
            }
            // wider than 64 bits: keep the magnitude as a float
            let f: f64 = digits.parse().map_err(|_| self.error("invalid integer"))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| self.error("invalid integer"))
        }
    }

    fn parse_word(&mut self) -> Result<Value, TransportError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        let word = &self.src[start..self.pos];
        match word {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            // string prefixes: u'..', b'..'
            "u" | "U" | "b" | "B" if matches!(self.peek(), Some('\'' | '"')) => {
                self.parse_string().map(Value::String)
            }
            _ => {
                self.pos = start;
                Err(self.error(&format!("unsupported literal '{word}'")))
            }
        }
    }
}
