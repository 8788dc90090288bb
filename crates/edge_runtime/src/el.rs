//! Expression language for stage configurations.
//!
//! A small language evaluated against an explicit record context:
//!
//! ```text
//! ${record:value('/temperature') > 30 && !record:nullOrMissing('/site')}
//! ```
//!
//! Literals (strings in single or double quotes, integers, decimals, `true`,
//! `false`, `null`), the `default` sentinel, bare parameter names, function
//! calls, comparisons (`==` `!=` `<` `<=` `>` `>=`, also `eq` `ne` `lt` `le`
//! `gt` `ge`), logical operators (`&&` `||` `!`, also `and` `or` `not`) and
//! parentheses. The `${...}` wrapper is optional; text around `${...}` parts
//! makes the expression a string template.

use crate::params::Parameters;
use edge_record::{Field, FieldType, FieldValue, Record, RecordError};
use logos::Logos;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElError {
    #[error("invalid expression '{expression}' at position {position}: {reason}")]
    Parse {
        expression: String,
        position: usize,
        reason: String,
    },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("function '{0}' needs a record")]
    NoRecord(String),

    #[error("cannot use {value} as {expected}")]
    Type {
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ElValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Composite or otherwise non-scalar field returned by `record:value`.
    Field(Field),
    /// The `default` sentinel of lane predicates.
    Default,
}

impl ElValue {
    pub fn from_json(json: &JsonValue) -> ElValue {
        match json {
            JsonValue::Null => ElValue::Null,
            JsonValue::Bool(b) => ElValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => ElValue::Int(i),
                None => ElValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => ElValue::Str(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => ElValue::Field(Field::from_json(json)),
        }
    }

    pub fn from_field(field: &Field) -> ElValue {
        let Some(value) = field.value() else {
            return ElValue::Null;
        };
        match value {
            FieldValue::Boolean(b) => ElValue::Bool(*b),
            FieldValue::Integer(_)
            | FieldValue::Long(_)
            | FieldValue::Short(_)
            | FieldValue::Byte(_)
            | FieldValue::Datetime(_)
            | FieldValue::Time(_) => field.as_i64().map(ElValue::Int).unwrap_or(ElValue::Null),
            FieldValue::Float(_) | FieldValue::Double(_) | FieldValue::Decimal(_) => {
                field.as_f64().map(ElValue::Float).unwrap_or(ElValue::Null)
            }
            FieldValue::String(s) => ElValue::Str(s.clone()),
            FieldValue::Date(_) | FieldValue::ZonedDatetime(_) => field
                .as_string()
                .map(ElValue::Str)
                .unwrap_or(ElValue::Null),
            FieldValue::ByteArray(_)
            | FieldValue::List(_)
            | FieldValue::Map(_)
            | FieldValue::ListMap(_) => ElValue::Field(field.clone()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            ElValue::Null => JsonValue::Null,
            ElValue::Bool(b) => JsonValue::Bool(*b),
            ElValue::Int(i) => JsonValue::from(*i),
            ElValue::Float(f) => JsonValue::from(*f),
            ElValue::Str(s) => JsonValue::String(s.clone()),
            ElValue::Field(field) => field.to_json(),
            ElValue::Default => JsonValue::String("default".to_string()),
        }
    }

    pub fn to_field(&self) -> Field {
        match self {
            ElValue::Null | ElValue::Default => Field::null(FieldType::String),
            ElValue::Bool(b) => Field::boolean(*b),
            ElValue::Int(i) => Field::long(*i),
            ElValue::Float(f) => Field::double(*f),
            ElValue::Str(s) => Field::string(s.clone()),
            ElValue::Field(field) => field.clone(),
        }
    }

    /// Text used when the value is spliced into a template.
    pub fn render(&self) -> String {
        match self {
            ElValue::Null => String::new(),
            ElValue::Bool(b) => b.to_string(),
            ElValue::Int(i) => i.to_string(),
            ElValue::Float(f) => f.to_string(),
            ElValue::Str(s) => s.clone(),
            ElValue::Field(field) => field.to_json().to_string(),
            ElValue::Default => "default".to_string(),
        }
    }

    pub fn truthy(&self) -> Result<bool, ElError> {
        match self {
            ElValue::Bool(b) => Ok(*b),
            ElValue::Null => Ok(false),
            ElValue::Int(i) => Ok(*i != 0),
            ElValue::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            ElValue::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            ElValue::Field(field) if field.field_type() == FieldType::Boolean => {
                Ok(field.as_bool()?)
            }
            other => Err(ElError::Type {
                value: other.to_string(),
                expected: "boolean",
            }),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            ElValue::Int(i) => Some(*i as f64),
            ElValue::Float(f) => Some(*f),
            ElValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ElValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElValue::Str(s) => write!(f, "'{}'", s),
            ElValue::Null => f.write_str("null"),
            other => f.write_str(&other.render()),
        }
    }
}

// ============================================================================
// Evaluation context
// ============================================================================

/// Everything an evaluation may look at. There is no ambient state: the
/// record (if any) and the parameters are passed in explicitly.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    record: Option<&'a Record>,
    parameters: &'a Parameters,
}

impl<'a> EvalContext<'a> {
    pub fn new(parameters: &'a Parameters) -> Self {
        Self {
            record: None,
            parameters,
        }
    }

    pub fn with_record(mut self, record: &'a Record) -> Self {
        self.record = Some(record);
        self
    }

    fn record(&self, function: &str) -> Result<&'a Record, ElError> {
        self.record
            .ok_or_else(|| ElError::NoRecord(function.to_string()))
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Token {
    #[regex(r#"'([^'\\]|\\.)*'"#, unescape)]
    #[regex(r#""([^"\\]|\\.)*""#, unescape)]
    Str(String),
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_:.\-]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[token("==", |_| CmpOp::Eq)]
    #[token("eq", |_| CmpOp::Eq)]
    #[token("!=", |_| CmpOp::Ne)]
    #[token("ne", |_| CmpOp::Ne)]
    #[token("<", |_| CmpOp::Lt)]
    #[token("lt", |_| CmpOp::Lt)]
    #[token("<=", |_| CmpOp::Le)]
    #[token("le", |_| CmpOp::Le)]
    #[token(">", |_| CmpOp::Gt)]
    #[token("gt", |_| CmpOp::Gt)]
    #[token(">=", |_| CmpOp::Ge)]
    #[token("ge", |_| CmpOp::Ge)]
    Cmp(CmpOp),
    #[token("&&")]
    #[token("and")]
    And,
    #[token("||")]
    #[token("or")]
    Or,
    #[token("!")]
    #[token("not")]
    Not,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
}

/// Drops the quotes; a backslash keeps the character after it verbatim.
fn unescape(lex: &mut logos::Lexer<'_, Token>) -> String {
    let slice = lex.slice();
    let mut out = String::with_capacity(slice.len());
    let mut chars = slice[1..slice.len() - 1].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Names what the lexer choked on, from the text it could not match.
fn lex_error_reason(slice: &str) -> String {
    let unsigned = slice.strip_prefix('-').unwrap_or(slice);
    match slice.chars().next() {
        Some('\'' | '"') => "unclosed string literal".to_string(),
        _ if unsigned.starts_with(|c: char| c.is_ascii_digit()) => {
            if unsigned.contains('.') {
                "invalid decimal literal".to_string()
            } else {
                "integer literal out of range".to_string()
            }
        }
        Some(c) => format!("unexpected character '{}'", c),
        None => "unexpected end of expression".to_string(),
    }
}

/// Tokens of `source` with their byte position inside `full`; `source`
/// starts at byte `base` of `full`.
fn tokenize(full: &str, base: usize, source: &str) -> Result<Vec<(usize, Token)>, ElError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        let position = base + lexer.span().start;
        match token {
            Ok(token) => tokens.push((position, token)),
            Err(()) => {
                return Err(ElError::Parse {
                    expression: full.to_string(),
                    position,
                    reason: lex_error_reason(lexer.slice()),
                })
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(ElValue),
    Param(String),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn references_record(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Param(_) => false,
            Expr::Call { name, args } => {
                is_record_function(name) || args.iter().any(Expr::references_record)
            }
            Expr::Not(inner) => inner.references_record(),
            Expr::And(l, r) | Expr::Or(l, r) | Expr::Compare(_, l, r) => {
                l.references_record() || r.references_record()
            }
        }
    }
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    full: &'a str,
    end: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> ElError {
        let position = self
            .tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.end);
        ElError::Parse {
            expression: self.full.to_string(),
            position,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ElError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn parse_all(mut self) -> Result<Expr, ElError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_or()?;
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected token"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ElError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ElError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ElError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ElError> {
        let left = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ElError> {
        let Some(token) = self.advance() else {
            self.pos -= 1;
            return Err(self.error("unexpected end of expression"));
        };
        match token {
            Token::Str(s) => Ok(Expr::Literal(ElValue::Str(s))),
            Token::Int(i) => Ok(Expr::Literal(ElValue::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(ElValue::Float(f))),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(ElValue::Bool(true))),
                "false" => Ok(Expr::Literal(ElValue::Bool(false))),
                "null" => Ok(Expr::Literal(ElValue::Null)),
                "default" => Ok(Expr::Literal(ElValue::Default)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Param(name)),
            },
            _ => {
                self.pos -= 1;
                Err(self.error("expected a value"))
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ElError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected ',' or ')'"));
                }
            }
        }
    }
}

fn parse_expr(full: &str, base: usize, source: &str) -> Result<Expr, ElError> {
    let tokens = tokenize(full, base, source)?;
    Parser {
        tokens,
        pos: 0,
        full,
        end: base + source.len(),
    }
    .parse_all()
}

// ============================================================================
// Expression
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Expr),
}

/// A parsed expression or string template.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    parts: Vec<Part>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, ElError> {
        let parts = if source.contains("${") {
            split_template(source)?
        } else {
            let trimmed_start = source.len() - source.trim_start().len();
            vec![Part::Expr(parse_expr(source, trimmed_start, source.trim())?)]
        };
        Ok(Expression {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True for the bare `default` sentinel.
    pub fn is_default(&self) -> bool {
        matches!(self.parts.as_slice(), [Part::Expr(Expr::Literal(ElValue::Default))])
    }

    /// True when evaluation needs a record.
    pub fn references_record(&self) -> bool {
        self.parts.iter().any(|part| match part {
            Part::Text(_) => false,
            Part::Expr(expr) => expr.references_record(),
        })
    }

    /// A single `${...}` (or bare) expression yields its typed value; a
    /// template with surrounding text yields the concatenated string.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<ElValue, ElError> {
        if let [Part::Expr(expr)] = self.parts.as_slice() {
            return eval(expr, ctx);
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&eval(expr, ctx)?.render()),
            }
        }
        Ok(ElValue::Str(out))
    }

    pub fn evaluate_bool(&self, ctx: &EvalContext<'_>) -> Result<bool, ElError> {
        self.evaluate(ctx)?.truthy()
    }
}

fn split_template(source: &str) -> Result<Vec<Part>, ElError> {
    let mut parts = Vec::new();
    let mut rest_start = 0;
    while let Some(found) = source[rest_start..].find("${") {
        let open = rest_start + found;
        if open > rest_start {
            parts.push(Part::Text(source[rest_start..open].to_string()));
        }
        let body_start = open + 2;
        let close = find_closing_brace(source, body_start).ok_or_else(|| ElError::Parse {
            expression: source.to_string(),
            position: open,
            reason: "unclosed '${'".to_string(),
        })?;
        parts.push(Part::Expr(parse_expr(
            source,
            body_start,
            &source[body_start..close],
        )?));
        rest_start = close + 1;
    }
    if rest_start < source.len() {
        parts.push(Part::Text(source[rest_start..].to_string()));
    }
    Ok(parts)
}

/// Byte index of the `}` closing a `${` body, skipping quoted strings.
fn find_closing_brace(source: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in source[from..].char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '}' => return Some(from + i),
            None => {}
        }
    }
    None
}

// ============================================================================
// Evaluation
// ============================================================================

fn is_record_function(name: &str) -> bool {
    name.starts_with("record:") || matches!(name, "value" | "null-or-missing")
}

fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Result<ElValue, ElError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Param(name) => ctx
            .parameters
            .get(name)
            .map(ElValue::from_json)
            .ok_or_else(|| ElError::UnknownParameter(name.clone())),
        Expr::Not(inner) => Ok(ElValue::Bool(!eval(inner, ctx)?.truthy()?)),
        Expr::And(left, right) => {
            let result = eval(left, ctx)?.truthy()? && eval(right, ctx)?.truthy()?;
            Ok(ElValue::Bool(result))
        }
        Expr::Or(left, right) => {
            let result = eval(left, ctx)?.truthy()? || eval(right, ctx)?.truthy()?;
            Ok(ElValue::Bool(result))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, ctx)?;
            let right = eval(right, ctx)?;
            compare(*op, &left, &right).map(ElValue::Bool)
        }
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values, ctx)
        }
    }
}

fn compare(op: CmpOp, left: &ElValue, right: &ElValue) -> Result<bool, ElError> {
    for value in [left, right] {
        if *value == ElValue::Default {
            return Err(ElError::Type {
                value: "default".to_string(),
                expected: "comparable value",
            });
        }
    }
    let ordering = match (left, right) {
        (ElValue::Null, ElValue::Null) => Some(Ordering::Equal),
        (ElValue::Null, _) | (_, ElValue::Null) => None,
        (ElValue::Int(a), ElValue::Int(b)) => Some(a.cmp(b)),
        (ElValue::Str(a), ElValue::Str(b)) => Some(a.cmp(b)),
        (ElValue::Bool(a), ElValue::Bool(b)) => Some(a.cmp(b)),
        (ElValue::Bool(a), ElValue::Str(s)) | (ElValue::Str(s), ElValue::Bool(a)) => {
            let b = s.eq_ignore_ascii_case("true");
            (b || s.eq_ignore_ascii_case("false")).then(|| a.cmp(&b))
        }
        (ElValue::Field(a), ElValue::Field(b)) => (a == b).then_some(Ordering::Equal),
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(left.render().cmp(&right.render())),
        },
    };
    Ok(match op {
        CmpOp::Eq => ordering == Some(Ordering::Equal),
        CmpOp::Ne => ordering != Some(Ordering::Equal),
        CmpOp::Lt => ordering == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    })
}

fn arity(name: &str, args: &[ElValue], expected: usize) -> Result<(), ElError> {
    if args.len() != expected {
        return Err(ElError::Arity {
            function: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn text(value: &ElValue) -> String {
    value.render()
}

fn call(name: &str, args: &[ElValue], ctx: &EvalContext<'_>) -> Result<ElValue, ElError> {
    match name {
        "record:value" | "value" => {
            arity(name, args, 1)?;
            let record = ctx.record(name)?;
            Ok(record
                .get(&text(&args[0]))?
                .map(ElValue::from_field)
                .unwrap_or(ElValue::Null))
        }
        "record:valueOrDefault" => {
            arity(name, args, 2)?;
            let record = ctx.record(name)?;
            match record.get(&text(&args[0]))? {
                Some(field) if !field.is_null() => Ok(ElValue::from_field(field)),
                _ => Ok(args[1].clone()),
            }
        }
        "record:exists" => {
            arity(name, args, 1)?;
            Ok(ElValue::Bool(ctx.record(name)?.has(&text(&args[0]))?))
        }
        "record:nullOrMissing" | "null-or-missing" => {
            arity(name, args, 1)?;
            let field = ctx.record(name)?.get(&text(&args[0]))?;
            Ok(ElValue::Bool(field.map_or(true, Field::is_null)))
        }
        "record:type" => {
            arity(name, args, 1)?;
            Ok(ctx
                .record(name)?
                .get(&text(&args[0]))?
                .map(|f| ElValue::Str(f.field_type().as_str().to_string()))
                .unwrap_or(ElValue::Null))
        }
        "record:attribute" => {
            arity(name, args, 1)?;
            Ok(ctx
                .record(name)?
                .header()
                .attribute(&text(&args[0]))
                .map(|v| ElValue::Str(v.to_string()))
                .unwrap_or(ElValue::Null))
        }
        "record:id" => {
            arity(name, args, 0)?;
            Ok(ElValue::Str(ctx.record(name)?.header().source_id().to_string()))
        }
        "str:contains" => {
            arity(name, args, 2)?;
            Ok(ElValue::Bool(text(&args[0]).contains(&text(&args[1]))))
        }
        "str:startsWith" => {
            arity(name, args, 2)?;
            Ok(ElValue::Bool(text(&args[0]).starts_with(&text(&args[1]))))
        }
        "str:endsWith" => {
            arity(name, args, 2)?;
            Ok(ElValue::Bool(text(&args[0]).ends_with(&text(&args[1]))))
        }
        "str:toUpper" => {
            arity(name, args, 1)?;
            Ok(ElValue::Str(text(&args[0]).to_uppercase()))
        }
        "str:toLower" => {
            arity(name, args, 1)?;
            Ok(ElValue::Str(text(&args[0]).to_lowercase()))
        }
        "str:trim" => {
            arity(name, args, 1)?;
            Ok(ElValue::Str(text(&args[0]).trim().to_string()))
        }
        "str:length" => {
            arity(name, args, 1)?;
            Ok(ElValue::Int(text(&args[0]).chars().count() as i64))
        }
        "str:concat" => Ok(ElValue::Str(args.iter().map(text).collect())),
        "time:now" => {
            arity(name, args, 0)?;
            Ok(ElValue::Int(edge_protocol::now_millis()))
        }
        _ => Err(ElError::UnknownFunction(name.to_string())),
    }
}
