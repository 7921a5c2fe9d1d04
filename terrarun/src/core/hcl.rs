//! Reader and writer for the literal subset of HCL found in variable files.
//!
//! Variable files (`*.tfvars`) and variable declarations (`variables.tf`) only
//! use literals: strings, numbers, booleans, `null`, lists and maps, plus
//! labelled blocks in declarations. Anything that is not a literal (type
//! constraints, references, function calls, strings holding live `${...}` or
//! `%{...}` template sequences) is kept verbatim as [`Value::Raw`] so it can
//! be written back unchanged. Escaped `$${` and `%%{` decode to literal text.

use std::collections::BTreeMap;

use serde_json::json;
use thiserror::Error;

/// A parsed HCL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
    /// Expression text that is not a literal, stored as written.
    Raw(String),
}

impl Value {
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert to JSON for display. Raw expressions become strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::String(s) | Value::Raw(s) => json!(s),
            Value::List(items) => items.iter().map(Value::to_json).collect(),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.to_string(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<&BTreeMap<String, String>> for Value {
    fn from(value: &BTreeMap<String, String>) -> Self {
        Value::Map(
            value
                .iter()
                .map(|(key, val)| (key.clone(), Value::String(val.clone())))
                .collect(),
        )
    }
}

/// Insertion-ordered map of attributes.
///
/// Order is kept so rewritten files stay diffable against their source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    entries: Vec<(String, Value)>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace `key`. A replaced entry keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Value) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Map {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// A labelled block such as `variable "NAME" { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Attribute(String, Value),
    Block(Block),
}

/// Sequence of attributes and blocks, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub items: Vec<Item>,
}

impl Body {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.items.iter().find_map(|item| match item {
            Item::Attribute(k, v) if k == key => Some(v),
            _ => None,
        })
    }

    pub fn blocks<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.items.iter().filter_map(move |item| match item {
            Item::Block(block) if block.kind == kind => Some(block),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parse a file body made of attributes and blocks.
pub fn parse_body(src: &str) -> Result<Body, ParseError> {
    Parser::new(src, true).body(false)
}

/// Parse a file that may only contain attributes (a variable file).
pub fn parse_attributes(src: &str) -> Result<Map, ParseError> {
    let body = Parser::new(src, false).body(false)?;
    Ok(body
        .items
        .into_iter()
        .filter_map(|item| match item {
            Item::Attribute(key, value) => Some((key, value)),
            Item::Block(_) => None,
        })
        .collect())
}

/// Serialize attributes as HCL, one `key = value` per line.
///
/// Nested maps become brace-delimited blocks indented two spaces per level.
pub fn to_text(map: &Map) -> String {
    write_entries(map, 0)
}

/// Serialize a single value. `indent_level` only affects nested maps.
pub fn value_to_text(value: &Value, indent_level: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::String(s) => quote(s),
        Value::Raw(raw) => raw.clone(),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(inline_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Map(map) if map.is_empty() => "{}".to_string(),
        Value::Map(map) => {
            let indent = "  ".repeat(indent_level);
            format!("{{\n{}\n{indent}}}", write_entries(map, indent_level + 1))
        }
    }
}

/// Quote a string literal, escaping backslashes, quotes and control characters.
///
/// `${` and `%{` are doubled so the text can never start a template sequence.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Render a map key, quoting it when it is not a bare identifier.
pub fn key_to_text(key: &str) -> String {
    let mut chars = key.chars();
    let bare = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare { key.to_string() } else { quote(key) }
}

fn write_entries(map: &Map, indent_level: usize) -> String {
    let indent = "  ".repeat(indent_level);
    map.iter()
        .map(|(key, value)| {
            format!(
                "{indent}{} = {}",
                key_to_text(key),
                value_to_text(value, indent_level)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline_value(value: &Value) -> String {
    match value {
        Value::Map(map) if !map.is_empty() => {
            let entries: Vec<String> = map
                .iter()
                .map(|(key, val)| format!("{} = {}", key_to_text(key), inline_value(val)))
                .collect();
            format!("{{ {} }}", entries.join(", "))
        }
        other => value_to_text(other, 0),
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    allow_blocks: bool,
}

impl Parser {
    fn new(src: &str, allow_blocks: bool) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            allow_blocks,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let consumed = &self.chars[..self.pos.min(self.chars.len())];
        let line = consumed.iter().filter(|&&c| c == '\n').count() + 1;
        let column = consumed.iter().rev().take_while(|&&c| c != '\n').count() + 1;
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    /// Skip spaces and comments; newlines too when `newlines` is set.
    fn skip_trivia(&mut self, newlines: bool) -> Result<(), ParseError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.pos += 1;
                }
                '\n' if newlines => {
                    self.pos += 1;
                }
                '#' => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.pos += 1;
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn body(&mut self, nested: bool) -> Result<Body, ParseError> {
        let mut body = Body::default();
        loop {
            self.skip_trivia(true)?;
            match self.peek() {
                None if nested => return Err(self.error("unexpected end of input, expected '}'")),
                None => return Ok(body),
                Some('}') if nested => {
                    self.pos += 1;
                    return Ok(body);
                }
                Some(_) => {}
            }

            let key = self.key()?;
            self.skip_trivia(false)?;
            if self.peek() == Some('=') {
                self.pos += 1;
                let value = self.value()?;
                self.end_of_item(nested)?;
                body.items.push(Item::Attribute(key, value));
                continue;
            }

            if !self.allow_blocks {
                return Err(self.error(format!("unexpected block `{key}` in variable file")));
            }
            let mut labels = Vec::new();
            while let Some(c) = self.peek() {
                if c == '{' {
                    break;
                }
                labels.push(self.key()?);
                self.skip_trivia(false)?;
            }
            if self.bump() != Some('{') {
                return Err(self.error(format!("expected '=' or block after `{key}`")));
            }
            let inner = self.body(true)?;
            body.items.push(Item::Block(Block {
                kind: key,
                labels,
                body: inner,
            }));
        }
    }

    fn end_of_item(&mut self, nested: bool) -> Result<(), ParseError> {
        self.skip_trivia(false)?;
        match self.peek() {
            None | Some('\n') => Ok(()),
            Some('}') if nested => Ok(()),
            Some(c) => Err(self.error(format!("unexpected '{c}' after value"))),
        }
    }

    fn key(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some('"') => self.string().map(|(text, _)| text),
            Some(c) if is_ident_start(c) => Ok(self.ident()),
            Some(c) => Err(self.error(format!("unexpected '{c}', expected identifier"))),
            None => Err(self.error("unexpected end of input, expected identifier")),
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        self.skip_trivia(false)?;
        match self.peek() {
            Some('"') => {
                let start = self.pos;
                let (text, templated) = self.string()?;
                if templated {
                    Ok(Value::Raw(self.chars[start..self.pos].iter().collect()))
                } else {
                    Ok(Value::String(text))
                }
            }
            Some('<') if self.peek_at(1) == Some('<') => {
                let start = self.pos;
                let text = self.heredoc()?;
                match literal_template_text(&text) {
                    Some(text) => Ok(Value::String(text)),
                    None => Ok(Value::Raw(self.chars[start..self.pos].iter().collect())),
                }
            }
            Some('[') => self.list(),
            Some('{') => self.map(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some('-') if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => self.number(),
            Some(c) if is_ident_start(c) => {
                let start = self.pos;
                let word = self.ident();
                let continues = matches!(self.peek(), Some('.' | '(' | '['));
                match word.as_str() {
                    "true" if !continues => Ok(Value::Bool(true)),
                    "false" if !continues => Ok(Value::Bool(false)),
                    "null" if !continues => Ok(Value::Null),
                    _ => {
                        self.pos = start;
                        self.raw()
                    }
                }
            }
            Some('\n') | None => Err(self.error("expected a value")),
            Some(_) => self.raw(),
        }
    }

    /// Parse a quoted string. The flag is set when it holds a live template
    /// sequence, which is then copied into the text undecoded.
    fn string(&mut self) -> Result<(String, bool), ParseError> {
        self.pos += 1;
        let mut out = String::new();
        let mut templated = false;
        loop {
            let Some(c) = self.peek().filter(|&c| c != '\n') else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match c {
                '"' => return Ok((out, templated)),
                '\\' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                        let decoded = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| self.error(format!("invalid unicode escape \\u{hex}")))?;
                        out.push(decoded);
                    }
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(self.error("unterminated string")),
                },
                '$' | '%' if self.peek() == Some(c) && self.peek_at(1) == Some('{') => {
                    out.push(c);
                    out.push('{');
                    self.pos += 2;
                }
                '$' | '%' if self.peek() == Some('{') => {
                    templated = true;
                    out.push(c);
                    self.interpolation(&mut out)?;
                }
                other => out.push(other),
            }
        }
    }

    /// Copy a `${...}` or `%{...}` sequence verbatim, including nested strings.
    fn interpolation(&mut self, out: &mut String) -> Result<(), ParseError> {
        let mut depth = 0usize;
        let mut in_string = false;
        while let Some(c) = self.bump() {
            out.push(c);
            if in_string {
                match c {
                    '\\' => {
                        if let Some(next) = self.bump() {
                            out.push(next);
                        }
                    }
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                '\n' => break,
                _ => {}
            }
        }
        Err(self.error("unterminated interpolation"))
    }

    fn heredoc(&mut self) -> Result<String, ParseError> {
        self.pos += 2;
        let indented = self.peek() == Some('-');
        if indented {
            self.pos += 1;
        }
        let tag = self.ident();
        if tag.is_empty() {
            return Err(self.error("expected heredoc identifier"));
        }
        self.skip_trivia(false)?;
        if self.bump() != Some('\n') {
            return Err(self.error("expected newline after heredoc identifier"));
        }

        let mut lines = Vec::new();
        loop {
            if self.peek().is_none() {
                return Err(self.error(format!("unterminated heredoc `{tag}`")));
            }
            let start = self.pos;
            while matches!(self.peek(), Some(c) if c != '\n') {
                self.pos += 1;
            }
            let line: String = self.chars[start..self.pos].iter().collect();
            if line.trim() == tag {
                break;
            }
            self.pos += 1;
            lines.push(line);
        }

        if indented {
            let margin = lines
                .iter()
                .filter(|l| !l.trim().is_empty())
                .map(|l| leading_blanks(l))
                .min()
                .unwrap_or(0);
            for line in &mut lines {
                let cut = margin.min(leading_blanks(line));
                line.drain(..cut);
            }
        }

        let mut text = lines.join("\n");
        text.push('\n');
        Ok(text)
    }

    fn list(&mut self) -> Result<Value, ParseError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia(true)?;
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Value::List(items));
            }
            items.push(self.value()?);
            self.skip_trivia(true)?;
            match self.bump() {
                Some(',') => {}
                Some(']') => return Ok(Value::List(items)),
                Some(c) => return Err(self.error(format!("unexpected '{c}', expected ',' or ']'"))),
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn map(&mut self) -> Result<Value, ParseError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_trivia(true)?;
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Map(map));
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                None => return Err(self.error("unterminated map")),
                Some(_) => {}
            }
            let key = self.key()?;
            self.skip_trivia(false)?;
            match self.bump() {
                Some('=' | ':') => {}
                _ => return Err(self.error(format!("expected '=' after map key `{key}`"))),
            }
            let value = self.value()?;
            map.insert(key, value);
        }
    }

    fn number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    if matches!(self.peek_at(1), Some('+' | '-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if !is_float && let Ok(int) = text.parse::<i64>() {
            return Ok(Value::Int(int));
        }
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| self.error(format!("invalid number `{text}`")))
    }

    /// Capture a non-literal expression up to the end of the item.
    fn raw(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth == 0 => break,
                ')' | ']' | '}' => depth -= 1,
                '\n' | ',' | '#' if depth == 0 => break,
                '/' if depth == 0 && self.peek_at(1) == Some('/') => break,
                '"' => {
                    self.string()?;
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let text = text.trim_end().to_string();
        if text.is_empty() {
            return Err(self.error("expected a value"));
        }
        Ok(Value::Raw(text))
    }
}

/// Byte length of the leading spaces and tabs. Only ASCII blanks count, so
/// the result is always a char boundary.
fn leading_blanks(line: &str) -> usize {
    line.bytes().take_while(|b| matches!(b, b' ' | b'\t')).count()
}

/// Decode `$${` and `%%{` escapes in heredoc text. `None` when the text holds
/// a live template sequence.
fn literal_template_text(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '$' | '%') {
            if chars.get(i + 1) == Some(&'{') {
                return None;
            }
            if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&'{') {
                out.push(c);
                out.push('{');
                i += 3;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    Some(out)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
