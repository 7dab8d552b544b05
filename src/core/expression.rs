//! Workflow expressions: `if:` conditions and `${{ }}` substitution
//!
//! The language is deliberately small:
//!
//! ```text
//! expr    := or
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | compare
//! compare := primary (('==' | '!=') primary)?
//! primary := 'string' | true | false | ident | call | '(' expr ')'
//! call    := name '(' (expr (',' expr)*)? ')'
//! ```
//!
//! Identifiers are dotted paths such as `github.ref` or
//! `matrix.python-version`, resolved through an [`ExpressionScope`].

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Resolves identifiers and status functions during evaluation
pub trait ExpressionScope {
    /// Value of a dotted identifier, `None` if unknown
    fn lookup(&self, path: &str) -> Option<String>;

    /// Whether every dependency succeeded (`success()`)
    fn upstream_succeeded(&self) -> bool {
        true
    }
}

/// Evaluation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Value::Str(s) => s,
            Value::Bool(b) => b.to_string(),
        }
    }

    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (a, b) => a.clone().into_string().eq_ignore_ascii_case(&b.clone().into_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Not,
    And,
    Or,
    Eq,
    Ne,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
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
            '\'' => {
                // '' escapes a quote, as in workflow expressions
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExpressionError::UnterminatedString),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(ExpressionError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                Ok(Expr::Eq(Box::new(left), Box::new(self.parse_primary()?)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                Ok(Expr::Ne(Box::new(left), Box::new(self.parse_primary()?)))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    check_call(&name, args.len())?;
                    return Ok(Expr::Call(name, args));
                }
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    n if n.starts_with(|c: char| c.is_ascii_digit()) => {
                        Ok(Expr::Literal(Value::Str(name)))
                    }
                    _ => Ok(Expr::Ident(name)),
                }
            }
            Some(t) => Err(ExpressionError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn check_call(name: &str, got: usize) -> Result<(), ExpressionError> {
    let expected = match name {
        "startsWith" | "endsWith" | "contains" => 2,
        "success" | "always" => 0,
        _ => return Err(ExpressionError::UnknownFunction(name.to_string())),
    };
    if got != expected {
        return Err(ExpressionError::Arity {
            name: name.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

/// Strip an optional `${{ ... }}` wrapper
fn unwrap_template(source: &str) -> &str {
    let trimmed = source.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(unwrap_template(source))?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.next() {
            None => Ok(expr),
            Some(t) => Err(ExpressionError::UnexpectedToken(format!("{:?}", t))),
        }
    }

    pub fn evaluate(&self, scope: &dyn ExpressionScope) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Ident(path) => Value::Str(scope.lookup(path).unwrap_or_default()),
            Expr::Not(inner) => Value::Bool(!inner.evaluate(scope).truthy()),
            Expr::And(a, b) => Value::Bool(a.evaluate(scope).truthy() && b.evaluate(scope).truthy()),
            Expr::Or(a, b) => Value::Bool(a.evaluate(scope).truthy() || b.evaluate(scope).truthy()),
            Expr::Eq(a, b) => Value::Bool(a.evaluate(scope).loose_eq(&b.evaluate(scope))),
            Expr::Ne(a, b) => Value::Bool(!a.evaluate(scope).loose_eq(&b.evaluate(scope))),
            Expr::Call(name, args) => {
                let strings: Vec<String> = args
                    .iter()
                    .map(|a| a.evaluate(scope).into_string().to_lowercase())
                    .collect();
                let result = match name.as_str() {
                    "startsWith" => strings[0].starts_with(&strings[1]),
                    "endsWith" => strings[0].ends_with(&strings[1]),
                    "contains" => strings[0].contains(&strings[1]),
                    "success" => scope.upstream_succeeded(),
                    "always" => true,
                    _ => false,
                };
                Value::Bool(result)
            }
        }
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").expect("template regex is valid"))
}

/// Replace every `${{ expr }}` in `template` with its evaluated value
///
/// Expressions that fail to parse are left in place verbatim.
pub fn render(template: &str, scope: &dyn ExpressionScope) -> String {
    template_regex()
        .replace_all(template, |caps: &regex::Captures| match Expr::parse(&caps[1]) {
            Ok(expr) => expr.evaluate(scope).into_string(),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

/// Check every `${{ }}` in `template` parses
pub fn check_template(template: &str) -> Result<(), ExpressionError> {
    for caps in template_regex().captures_iter(template) {
        Expr::parse(&caps[1])?;
    }
    Ok(())
}
