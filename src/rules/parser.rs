//! Rule file parsing: a small tokenizer and recursive-descent parser that
//! compile condition lines into an explicit AST, instead of re-deriving
//! regexes on every evaluation.
//!
//! Grammar (line-oriented, keywords case-insensitive):
//!
//! ```text
//! meta:
//!   id = "auth-failure-burst"
//!   severity = "HIGH"
//! events:
//!   $severity = "ERROR"
//!   ($jsonPayload.error_code = "INVALID_PASSWORD") or ($message contains "auth")
//!   $resource_type in (cloudsql_database, "gce_instance")
//!   $message matches /timeout after \d+ms/
//! condition:
//!   $e
//! ```

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::warn;

use crate::rules::{Rule, RuleMeta, RuleParseError};

/// Dot-separated path walked through nested JSON maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Resolve against a document; any absent segment yields None.
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.0 {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0.join("."))
    }
}

/// One compiled condition. A missing field path makes the condition
/// false, never an error.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Case-insensitive string equality.
    Eq { path: FieldPath, value: String },
    /// Case-insensitive substring.
    Contains { path: FieldPath, value: String },
    /// Case-insensitive regex search. `pattern` is None when the regex
    /// failed to compile; the condition then always evaluates false.
    Matches {
        path: FieldPath,
        pattern: Option<Regex>,
        raw: String,
    },
    /// Exact membership.
    In { path: FieldPath, values: Vec<String> },
    /// OR-group: true if any sub-condition is true.
    Any(Vec<Condition>),
}

impl Condition {
    pub fn evaluate(&self, doc: &Value) -> bool {
        match self {
            Condition::Eq { path, value } => match path.resolve(doc) {
                Some(v) => value_as_string(v).eq_ignore_ascii_case(value),
                None => false,
            },
            Condition::Contains { path, value } => match path.resolve(doc) {
                Some(v) => value_as_string(v)
                    .to_lowercase()
                    .contains(&value.to_lowercase()),
                None => false,
            },
            Condition::Matches { path, pattern, .. } => match (path.resolve(doc), pattern) {
                (Some(v), Some(re)) => re.is_match(&value_as_string(v)),
                _ => false,
            },
            Condition::In { path, values } => match path.resolve(doc) {
                Some(v) => values.contains(&value_as_string(v)),
                None => false,
            },
            Condition::Any(subs) => subs.iter().any(|c| c.evaluate(doc)),
        }
    }
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a full rule file. A malformed condition line fails the whole
/// rule; the engine logs and skips it, keeping the rest of the rule set.
pub fn parse_rule_text(content: &str) -> Result<Rule, RuleParseError> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Meta,
        Events,
        Condition,
    }

    let mut section = Section::None;
    let mut meta = RuleMeta::new();
    let mut events = Vec::new();
    let mut condition = Vec::new();

    for (line_no, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Tolerate YARA-style wrappers around the blocks.
        if line == "{" || line == "}" || line.to_ascii_lowercase().starts_with("rule ") {
            continue;
        }

        match line.to_ascii_lowercase().as_str() {
            "meta:" => {
                section = Section::Meta;
                continue;
            }
            "events:" => {
                section = Section::Events;
                continue;
            }
            "condition:" | "match:" => {
                section = Section::Condition;
                continue;
            }
            _ => {}
        }

        match section {
            Section::Meta => {
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"');
                    if !key.is_empty() {
                        meta.insert(key.to_string(), value.to_string());
                    }
                }
            }
            Section::Events => {
                let cond = parse_condition_line(line).ok_or_else(|| RuleParseError::BadCondition {
                    line: line_no + 1,
                    text: line.to_string(),
                })?;
                events.push(cond);
            }
            Section::Condition => condition.push(line.to_string()),
            Section::None => {}
        }
    }

    if events.is_empty() {
        return Err(RuleParseError::NoEvents);
    }

    Ok(Rule {
        meta,
        events,
        condition,
    })
}

/// Parse one condition line: either a single condition or an OR-group
/// `(cond) or (cond) or ...`.
pub fn parse_condition_line(line: &str) -> Option<Condition> {
    let tokens = tokenize(line)?;
    let mut parser = TokenStream::new(&tokens);
    let cond = parser.parse_or_expr()?;
    if parser.peek().is_some() {
        return None; // trailing junk
    }
    Some(cond)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// `$field.path`
    Path(Vec<String>),
    /// `"quoted"` literal
    Str(String),
    /// `/regex/` literal
    Regex(String),
    /// bare word: keyword or unquoted value
    Word(String),
    Eq,
    LParen,
    RParen,
    Comma,
}

fn tokenize(line: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '"' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '"' {
                    end += 1;
                }
                if end >= chars.len() {
                    return None; // unterminated string
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '/' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && !(chars[end] == '/' && chars[end - 1] != '\\') {
                    end += 1;
                }
                if end >= chars.len() {
                    return None; // unterminated regex
                }
                tokens.push(Token::Regex(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len()
                    && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '.')
                {
                    end += 1;
                }
                if end == start {
                    return None;
                }
                let path: String = chars[start..end].iter().collect();
                tokens.push(Token::Path(path.split('.').map(str::to_string).collect()));
                i = end;
            }
            _ => {
                let start = i;
                let mut end = i;
                while end < chars.len()
                    && !matches!(chars[end], ' ' | '\t' | '(' | ')' | ',' | '=' | '"')
                {
                    end += 1;
                }
                tokens.push(Token::Word(chars[start..end].iter().collect()));
                i = end;
            }
        }
    }

    Some(tokens)
}

struct TokenStream<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenStream<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(kw) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    /// or_expr := primary ("or" primary)*
    fn parse_or_expr(&mut self) -> Option<Condition> {
        let first = self.parse_primary()?;
        let mut subs = vec![first];
        while self.eat_keyword("or") {
            subs.push(self.parse_primary()?);
        }
        if subs.len() == 1 {
            Some(subs.pop().unwrap())
        } else {
            Some(Condition::Any(subs))
        }
    }

    /// primary := "(" simple ")" | simple
    fn parse_primary(&mut self) -> Option<Condition> {
        if self.eat(&Token::LParen) {
            let cond = self.parse_simple()?;
            if !self.eat(&Token::RParen) {
                return None;
            }
            Some(cond)
        } else {
            self.parse_simple()
        }
    }

    /// simple := path ("=" value | "contains" value | "matches" regex
    ///               | "in" "(" value ("," value)* ")")
    fn parse_simple(&mut self) -> Option<Condition> {
        let path = match self.next()? {
            Token::Path(segments) => FieldPath::new(segments.clone()),
            _ => return None,
        };

        if self.eat(&Token::Eq) {
            let value = self.parse_value()?;
            return Some(Condition::Eq { path, value });
        }
        if self.eat_keyword("contains") {
            let value = self.parse_value()?;
            return Some(Condition::Contains { path, value });
        }
        if self.eat_keyword("matches") {
            let raw = match self.next()? {
                Token::Regex(r) => r.clone(),
                _ => return None,
            };
            let pattern = match RegexBuilder::new(&raw).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %raw, "invalid rule regex, condition will never match: {e}");
                    None
                }
            };
            return Some(Condition::Matches { path, pattern, raw });
        }
        if self.eat_keyword("in") {
            if !self.eat(&Token::LParen) {
                return None;
            }
            let mut values = vec![self.parse_value()?];
            while self.eat(&Token::Comma) {
                values.push(self.parse_value()?);
            }
            if !self.eat(&Token::RParen) {
                return None;
            }
            return Some(Condition::In { path, values });
        }

        None
    }

    fn parse_value(&mut self) -> Option<String> {
        match self.next()? {
            Token::Str(s) => Some(s.clone()),
            Token::Word(w) => Some(w.trim_matches('\'').to_string()),
            _ => None,
        }
    }
}
