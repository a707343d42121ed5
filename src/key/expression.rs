//! Key expressions evaluated against the arguments of a wrapped call
//!
//! The default [`TemplateEvaluator`] understands a small expression language:
//!
//! - `#name` binds a call argument, `#name.field` and `#name[0]` walk into it
//! - `'text'` is a string literal (`''` escapes a quote)
//! - integer and `true`/`false` literals
//! - `a + b` adds two integers and concatenates anything else
//!
//! ```rust
//! use ouroboros_cache::key::{CallContext, KeyEvaluator, TemplateEvaluator};
//! use serde_json::json;
//!
//! let ctx = CallContext::new()
//!     .with("id", 42)
//!     .with("user", json!({ "name": "ada" }));
//!
//! let evaluator = TemplateEvaluator::new();
//! assert_eq!(evaluator.evaluate("#id", &ctx).unwrap(), "42");
//! assert_eq!(evaluator.evaluate("'u-' + #user.name", &ctx).unwrap(), "u-ada");
//! ```

use crate::error::{CacheError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Argument bindings of an intercepted call, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    bindings: BTreeMap<String, Value>,
}

impl CallContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter to a value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Bind a parameter to any serializable value
    pub fn with_serialized<T: Serialize>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.bindings.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Look up a bound parameter
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Evaluates a key expression to the dynamic part of a cache key
pub trait KeyEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &CallContext) -> Result<String>;
}

/// Default evaluator for the `#param.field + 'literal'` expression language
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEvaluator;

impl TemplateEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl KeyEvaluator for TemplateEvaluator {
    fn evaluate(&self, expression: &str, context: &CallContext) -> Result<String> {
        let parsed = Parser::new(expression).parse()?;
        let value = parsed.eval(expression, context)?;
        render(expression, &value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Variable { name: String, path: Vec<Segment> },
    Literal(Value),
    Plus(Vec<Expr>),
}

impl Expr {
    fn eval(&self, source: &str, context: &CallContext) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable { name, path } => {
                let mut current = context.get(name).ok_or_else(|| {
                    CacheError::key_evaluation(source, format!("unknown variable '#{}'", name))
                })?;
                for segment in path {
                    current = match segment {
                        Segment::Field(field) => current.get(field.as_str()),
                        Segment::Index(index) => current.get(*index),
                    }
                    .ok_or_else(|| {
                        CacheError::key_evaluation(
                            source,
                            format!("'#{}' has no {}", name, describe(segment)),
                        )
                    })?;
                }
                Ok(current.clone())
            }
            Expr::Plus(operands) => {
                let mut acc: Option<Value> = None;
                for operand in operands {
                    let value = operand.eval(source, context)?;
                    acc = Some(match acc {
                        None => value,
                        Some(left) => plus(source, &left, &value)?,
                    });
                }
                acc.ok_or_else(|| CacheError::key_evaluation(source, "empty expression"))
            }
        }
    }
}

fn describe(segment: &Segment) -> String {
    match segment {
        Segment::Field(field) => format!("field '{}'", field),
        Segment::Index(index) => format!("element [{}]", index),
    }
}

fn plus(source: &str, left: &Value, right: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    Ok(Value::String(format!(
        "{}{}",
        render(source, left)?,
        render(source, right)?
    )))
}

fn render(source: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(CacheError::key_evaluation(source, "expression evaluated to null")),
        Value::Array(_) | Value::Object(_) => Err(CacheError::key_evaluation(
            source,
            "expression did not evaluate to a scalar",
        )),
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Expr> {
        let mut operands = vec![self.term()?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('+') => {
                    self.pos += 1;
                    operands.push(self.term()?);
                }
                Some(c) => return Err(self.error(format!("unexpected '{}'", c))),
            }
        }

        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(Expr::Plus(operands))
        }
    }

    fn term(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        match self.peek() {
            Some('#') => {
                self.pos += 1;
                let name = self.identifier()?;
                let path = self.path()?;
                Ok(Expr::Variable { name, path })
            }
            Some('\'') => self.string_literal(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.integer_literal(),
            Some(c) if c.is_alphabetic() => match self.identifier()?.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                other => Err(self.error(format!("unknown identifier '{}'", other))),
            },
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn path(&mut self) -> Result<Vec<Segment>> {
        let mut path = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    path.push(Segment::Field(self.identifier()?));
                }
                Some('[') => {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                    }
                    let digits: String = self.chars[start..self.pos].iter().collect();
                    if self.peek() != Some(']') || digits.is_empty() {
                        return Err(self.error("malformed index"));
                    }
                    self.pos += 1;
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| self.error("index out of range"))?;
                    path.push(Segment::Index(index));
                }
                _ => return Ok(path),
            }
        }
    }

    fn identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }
        if start == self.pos || self.chars[start].is_ascii_digit() {
            return Err(self.error("expected identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn string_literal(&mut self) -> Result<Expr> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal")),
                Some('\'') => {
                    self.pos += 1;
                    if self.peek() == Some('\'') {
                        text.push('\'');
                        self.pos += 1;
                    } else {
                        return Ok(Expr::Literal(Value::String(text)));
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn integer_literal(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<i64>()
            .map(|n| Expr::Literal(Value::from(n)))
            .map_err(|_| self.error(format!("invalid integer '{}'", text)))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, reason: impl Into<String>) -> CacheError {
        CacheError::key_evaluation(
            self.source,
            format!("{} at position {}", reason.into(), self.pos),
        )
    }
}
