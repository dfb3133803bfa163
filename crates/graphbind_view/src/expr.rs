//! Inline binding expressions
//!
//! Backtick spans in a binding string hold a small expression language:
//! literals, scope paths, `!`, unary `-`, arithmetic, comparisons, loose and
//! strict equality, `&&`, `||`, the conditional operator and parentheses.
//! Evaluation follows the usual dynamic-language conversions and reads every
//! entity attribute through the tracked accessor.

use std::cmp::Ordering;

use graphbind_model::{ReadTracker, Value};

use crate::scope::{DEFAULT_SCOPE, Scope, resolve_tracked};

// ─────────────────────────────────────────────────────────────────────────────
// AST
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted path. The first segment names a scope, or an attribute of the
    /// default scope when no such scope exists
    Path(Vec<String>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64, bool),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: [&str; 21] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
    "?", ":", "(", ")", ",",
];

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{text}' at {start}"))?;
            tokens.push(Token::Number(number, !text.contains('.')));
        } else if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            let mut text = String::new();
            loop {
                match chars.get(i) {
                    None => return Err(format!("unterminated string at {start}")),
                    Some(&q) if q == c => break,
                    Some('\\') => {
                        i += 1;
                        match chars.get(i) {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(&other) => text.push(other),
                            None => return Err(format!("unterminated string at {start}")),
                        }
                    }
                    Some(&other) => text.push(other),
                }
                i += 1;
            }
            i += 1;
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                return Err(format!("unexpected '{c}' at {i}"));
            };
            i += op.chars().count();
            tokens.push(Token::Op(*op));
        }
    }
    Ok(tokens)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

/// Parse an expression
pub fn parse(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.conditional()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected {token:?}")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_any(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(o)) if ops.contains(o) => {
                let op = *o;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn conditional(&mut self) -> Result<Expr, String> {
        let test = self.or()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let then = self.conditional()?;
        if !self.eat(":") {
            return Err("expected ':' in conditional".to_string());
        }
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional(Box::new(test), Box::new(then), Box::new(otherwise)))
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.eat("||") {
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            left = Expr::And(Box::new(left), Box::new(self.equality()?));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let mut left = self.comparison()?;
        while let Some(op) = self.eat_any(&["===", "!==", "==", "!="]) {
            let op = match op {
                "===" => BinaryOp::StrictEq,
                "!==" => BinaryOp::StrictNe,
                "==" => BinaryOp::Eq,
                _ => BinaryOp::Ne,
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.comparison()?));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.additive()?;
        while let Some(op) = self.eat_any(&["<=", ">=", "<", ">"]) {
            let op = match op {
                "<=" => BinaryOp::Le,
                ">=" => BinaryOp::Ge,
                "<" => BinaryOp::Lt,
                _ => BinaryOp::Gt,
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.additive()?));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        while let Some(op) = self.eat_any(&["+", "-"]) {
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            left = Expr::Binary(op, Box::new(left), Box::new(self.multiplicative()?));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat_any(&["*", "/", "%"]) {
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat("+") {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err("unexpected end of expression".to_string());
        };
        self.pos += 1;
        match token {
            Token::Number(n, true) if n.abs() < i64::MAX as f64 => Ok(Expr::Literal(Value::Int(n as i64))),
            Token::Number(n, _) => Ok(Expr::Literal(Value::Float(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => path(&name)?,
            }),
            Token::Op("(") => {
                let inner = self.conditional()?;
                if !self.eat(")") {
                    return Err("expected ')'".to_string());
                }
                Ok(inner)
            }
            Token::Op(op) => Err(format!("unexpected '{op}'")),
        }
    }
}

fn path(name: &str) -> Result<Expr, String> {
    let mut segments: Vec<String> = name.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(format!("invalid path '{name}'"));
    }
    if segments[0] == "this" {
        segments.remove(0);
    }
    Ok(Expr::Path(segments))
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────────────────────────────────────

impl Expr {
    /// Evaluate against a scope, recording entity reads on `tracker`
    pub fn eval(&self, scope: &Scope, tracker: &ReadTracker) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Path(segments) => eval_path(segments, scope, tracker),
            Expr::Not(inner) => Value::Bool(!inner.eval(scope, tracker).is_truthy()),
            Expr::Neg(inner) => number(-to_number(&inner.eval(scope, tracker))),
            Expr::And(left, right) => {
                let left = left.eval(scope, tracker);
                if left.is_truthy() { right.eval(scope, tracker) } else { left }
            }
            Expr::Or(left, right) => {
                let left = left.eval(scope, tracker);
                if left.is_truthy() { left } else { right.eval(scope, tracker) }
            }
            Expr::Conditional(test, then, otherwise) => {
                if test.eval(scope, tracker).is_truthy() {
                    then.eval(scope, tracker)
                } else {
                    otherwise.eval(scope, tracker)
                }
            }
            Expr::Binary(op, left, right) => {
                binary(*op, &left.eval(scope, tracker), &right.eval(scope, tracker))
            }
        }
    }
}

fn eval_path(segments: &[String], scope: &Scope, tracker: &ReadTracker) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return scope.get(DEFAULT_SCOPE).cloned().unwrap_or_default();
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
    match scope.get(first) {
        Some(root) => resolve_tracked(root.clone(), &rest, tracker),
        None => {
            let all: Vec<&str> = segments.iter().map(String::as_str).collect();
            let root = scope.get(DEFAULT_SCOPE).cloned().unwrap_or_default();
            resolve_tracked(root, &all, tracker)
        }
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Date(d) => d.timestamp_millis() as f64,
        _ => f64::NAN,
    }
}

/// Integral results stay integers
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => false,
        _ if is_numeric(left) || is_numeric(right) => to_number(left) == to_number(right),
        _ => false,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => Value::String(format!(
                "{}{}",
                left.to_display_string(),
                right.to_display_string()
            )),
            _ => number(to_number(left) + to_number(right)),
        },
        BinaryOp::Sub => number(to_number(left) - to_number(right)),
        BinaryOp::Mul => number(to_number(left) * to_number(right)),
        BinaryOp::Div => number(to_number(left) / to_number(right)),
        BinaryOp::Rem => number(to_number(left) % to_number(right)),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(left == right),
        BinaryOp::StrictNe => Value::Bool(left != right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}
