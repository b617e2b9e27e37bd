//! Step condition expressions.
//!
//! A deliberately small language: namespace paths, literals, `==` / `!=`,
//! `&&` / `and`, `||` / `or`, `!` / `not` and parentheses. Conditions are
//! parsed once at load time into a [`Condition`] AST and evaluated against a
//! [`Scope`] at readiness time. Paths that do not resolve evaluate to null.

use serde_json::Value;
use thiserror::Error;

use super::context::{Scope, parse_path};

/// Errors from parsing a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("empty expression")]
    Empty,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(Value),
    Path(String),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Eq(Box<Condition>, Box<Condition>),
    Ne(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Parse a condition. A single surrounding `{{ ... }}` is ignored.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let trimmed = source.trim();
        let inner = trimmed
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .filter(|s| !s.contains("{{"))
            .unwrap_or(trimmed);

        let tokens = tokenize(inner)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExpressionError::UnexpectedToken(tok.to_string())),
        }
    }

    /// Evaluate to a JSON value.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Value {
        match self {
            Condition::Literal(v) => v.clone(),
            Condition::Path(p) => scope.lookup(p).unwrap_or(Value::Null),
            Condition::Not(e) => Value::Bool(!truthy(&e.evaluate(scope))),
            Condition::And(a, b) => Value::Bool(truthy(&a.evaluate(scope)) && truthy(&b.evaluate(scope))),
            Condition::Or(a, b) => Value::Bool(truthy(&a.evaluate(scope)) || truthy(&b.evaluate(scope))),
            Condition::Eq(a, b) => Value::Bool(loose_eq(&a.evaluate(scope), &b.evaluate(scope))),
            Condition::Ne(a, b) => Value::Bool(!loose_eq(&a.evaluate(scope), &b.evaluate(scope))),
        }
    }

    /// Evaluate and coerce to a boolean.
    pub fn is_true(&self, scope: &Scope<'_>) -> bool {
        truthy(&self.evaluate(scope))
    }

    /// Every path referenced by the expression.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Literal(_) => {}
            Condition::Path(p) => out.push(p),
            Condition::Not(e) => e.collect_paths(out),
            Condition::And(a, b) | Condition::Or(a, b) | Condition::Eq(a, b) | Condition::Ne(a, b) => {
                a.collect_paths(out);
                b.collect_paths(out);
            }
        }
    }
}

/// Coerce a JSON value to boolean: false, null, 0, "" are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// JSON equality where numbers compare by value (`1 == 1.0`).
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Literal(Value),
    And,
    Or,
    Not,
    Eq,
    Ne,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Path(p) => f.write_str(p),
            Token::Literal(v) => write!(f, "{v}"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::Eq => f.write_str("=="),
            Token::Ne => f.write_str("!="),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']' | '$')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExpressionError::UnterminatedString),
                        Some('\\') if chars.get(i + 1).is_some() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(word_token(word)?);
            }
            other => return Err(ExpressionError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

fn word_token(word: String) -> Result<Token, ExpressionError> {
    Ok(match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "null" => Token::Literal(Value::Null),
        _ => {
            if let Ok(n) = word.parse::<i64>() {
                Token::Literal(Value::from(n))
            } else if let Some(n) = word
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                Token::Literal(Value::Number(n))
            } else {
                let path = word.strip_prefix('$').unwrap_or(&word);
                if parse_path(path).is_none() {
                    return Err(ExpressionError::InvalidPath(word));
                }
                Token::Path(path.to_string())
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Parser (recursive descent)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<Condition, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ExpressionError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Condition, ExpressionError> {
        let left = self.parse_unary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                Ok(Condition::Eq(Box::new(left), Box::new(self.parse_unary()?)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                Ok(Condition::Ne(Box::new(left), Box::new(self.parse_unary()?)))
            }
            _ => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> Result<Condition, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Condition::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, ExpressionError> {
        match self.next() {
            Some(Token::Literal(v)) => Ok(Condition::Literal(v)),
            Some(Token::Path(p)) => Ok(Condition::Path(p)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(ExpressionError::UnexpectedToken(tok.to_string())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(tok) => Err(ExpressionError::UnexpectedToken(tok.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{Map, json};
    use uuid::Uuid;

    use super::*;
    use crate::playbook::context::ExecutionContext;

    fn ctx() -> ExecutionContext {
        let inputs = json!({ "env": "prod", "dry_run": false, "limit": 5 })
            .as_object()
            .cloned()
            .unwrap();
        let mut ctx = ExecutionContext::new("p", Uuid::nil(), inputs, Map::new(), HashMap::new());
        ctx.set_step_outputs(
            "check",
            json!({ "status": "open", "items": [] }).as_object().cloned().unwrap(),
        );
        ctx
    }

    fn eval(src: &str) -> bool {
        let ctx = ctx();
        Condition::parse(src).unwrap().is_true(&Scope::new(&ctx))
    }

    #[test]
    fn equality_and_literals() {
        assert!(eval("input.env == 'prod'"));
        assert!(eval("input.env != \"dev\""));
        assert!(eval("input.limit == 5.0"));
        assert!(eval("step.check.status == 'open'"));
        assert!(!eval("input.dry_run"));
    }

    #[test]
    fn boolean_operators_and_precedence() {
        assert!(eval("input.env == 'prod' && !input.dry_run"));
        assert!(eval("input.dry_run or input.limit == 5"));
        assert!(eval("not (input.dry_run || input.env == 'dev')"));
        // && binds tighter than ||
        assert!(eval("true || false && false"));
        assert!(!eval("(true || false) && false"));
    }

    #[test]
    fn missing_paths_are_null() {
        assert!(!eval("step.nope.value"));
        assert!(eval("step.nope.value == null"));
    }

    #[test]
    fn template_wrapper_is_stripped() {
        assert!(eval("{{ input.env == 'prod' }}"));
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!("false")));
    }

    #[test]
    fn collects_paths() {
        let cond = Condition::parse("step.a.ok && (previous.b.outputs.x != 1 || input.y)").unwrap();
        assert_eq!(cond.paths(), vec!["step.a.ok", "previous.b.outputs.x", "input.y"]);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(Condition::parse(""), Err(ExpressionError::Empty)));
        assert!(matches!(Condition::parse("a ==="), Err(_)));
        assert!(matches!(Condition::parse("(a"), Err(ExpressionError::UnexpectedEnd)));
        assert!(matches!(Condition::parse("'open"), Err(ExpressionError::UnterminatedString)));
        assert!(matches!(Condition::parse("a > b"), Err(ExpressionError::UnexpectedChar { ch: '>', .. })));
        assert!(matches!(Condition::parse("a b"), Err(ExpressionError::UnexpectedToken(_))));
    }
}
