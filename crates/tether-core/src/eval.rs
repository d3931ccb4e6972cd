//! # Basic Evaluator
//!
//! A small expression language for breakpoint conditions, logpoints and
//! client evaluation requests, for hosts that have no evaluator of their own.
//!
//! ## Supported syntax
//!
//! - literals: integers, floats, `'single'` / `"double"` quoted strings,
//!   `True`, `False`, `None`
//! - names, looked up in the frame's locals and then its globals
//! - arithmetic: `+ - * / // %` and unary `-` / `+`
//! - comparisons, chainable: `== != < <= > >= is is not in not in`
//! - boolean logic with short-circuiting: `and or not`
//! - parentheses
//!
//! Expressions longer than [`MAX_TOKENS`] tokens or nesting deeper than
//! [`MAX_NESTING`] levels are rejected as syntax errors before evaluation.

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::port::{Deadline, Evaluator};
use crate::types::{Frame, Value};

/// Longest accepted expression, in tokens.
pub const MAX_TOKENS: usize = 1024;

/// Deepest accepted nesting of parentheses and prefix operators.
pub const MAX_NESTING: usize = 64;

/// Evaluator for the built-in expression language.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

impl BasicEvaluator
{
    /// Create an evaluator.
    #[must_use]
    pub const fn new() -> Self
    {
        Self
    }
}

impl Evaluator for BasicEvaluator
{
    fn evaluate(&self, expression: &str, frame: &Frame, deadline: Deadline) -> Result<Value, EvalError>
    {
        let tokens = tokenize(expression)?;
        if tokens.len() > MAX_TOKENS {
            return Err(EvalError::Syntax(format!("expression longer than {MAX_TOKENS} tokens")));
        }
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let expr = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(EvalError::Syntax(format!("unexpected {token:?}")));
        }
        Interpreter { frame, deadline }.eval(&expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token
{
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 13] = ["//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "="];

fn tokenize(source: &str) -> Result<Vec<Token>, EvalError>
{
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            let token = if text.contains(['.', 'e', 'E']) {
                text.parse().map(Token::Float)
                    .map_err(|_| EvalError::Syntax(format!("invalid number '{text}'")))?
            } else {
                text.parse().map(Token::Int).map_err(|_| EvalError::Syntax(format!("invalid number '{text}'")))?
            };
            tokens.push(token);
        } else if c == '\'' || c == '"' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(EvalError::Syntax("unterminated string".to_string())),
                    Some(&q) if q == c => break,
                    Some('\\') => {
                        let escaped = chars.get(i + 1).copied().ok_or_else(|| EvalError::Syntax("unterminated string".to_string()))?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            i += 1;
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(*op))
                .ok_or_else(|| EvalError::Syntax(format!("unexpected character '{c}'")))?;
            if *op == "=" {
                return Err(EvalError::Syntax("assignment is not allowed".to_string()));
            }
            tokens.push(Token::Op(*op));
            i += op.len();
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compare
{
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith
{
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone)]
enum Expr
{
    Literal(Value),
    Name(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Arith(Arith, Box<Expr>, Box<Expr>),
    Chain(Box<Expr>, Vec<(Compare, Expr)>),
}

struct Parser
{
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser
{
    fn peek(&self) -> Option<&Token>
    {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token>
    {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool
    {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn at_keyword_pair(&self, first: &str, second: &str) -> bool
    {
        self.at_keyword(first) && matches!(self.tokens.get(self.pos + 1), Some(Token::Name(name)) if name == second)
    }

    fn at_op(&self, op: &str) -> bool
    {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError>
    {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::Syntax(format!("expression nests deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> Result<Expr, EvalError>
    {
        let mut left = self.and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError>
    {
        let mut left = self.not()?;
        while self.at_keyword("and") {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, EvalError>
    {
        if self.at_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.nested(Self::not)?)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<Compare>
    {
        let op = if self.at_keyword_pair("is", "not") {
            self.pos += 1;
            Compare::IsNot
        } else if self.at_keyword_pair("not", "in") {
            self.pos += 1;
            Compare::NotIn
        } else if self.at_keyword("is") {
            Compare::Is
        } else if self.at_keyword("in") {
            Compare::In
        } else {
            match self.peek() {
                Some(Token::Op("==")) => Compare::Eq,
                Some(Token::Op("!=")) => Compare::Ne,
                Some(Token::Op("<")) => Compare::Lt,
                Some(Token::Op("<=")) => Compare::Le,
                Some(Token::Op(">")) => Compare::Gt,
                Some(Token::Op(">=")) => Compare::Ge,
                _ => return None,
            }
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, EvalError>
    {
        let first = self.sum()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Chain(Box::new(first), rest))
        }
    }

    fn sum(&mut self) -> Result<Expr, EvalError>
    {
        let mut left = self.term()?;
        loop {
            let op = if self.at_op("+") {
                Arith::Add
            } else if self.at_op("-") {
                Arith::Sub
            } else {
                return Ok(left);
            };
            self.pos += 1;
            left = Expr::Arith(op, Box::new(left), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Expr, EvalError>
    {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("*")) => Arith::Mul,
                Some(Token::Op("/")) => Arith::Div,
                Some(Token::Op("//")) => Arith::FloorDiv,
                Some(Token::Op("%")) => Arith::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Arith(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError>
    {
        if self.at_op("-") {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        if self.at_op("+") {
            self.pos += 1;
            return self.nested(Self::unary);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError>
    {
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Name(name)) => Ok(match name.as_str() {
                "True" => Expr::Literal(Value::Bool(true)),
                "False" => Expr::Literal(Value::Bool(false)),
                "None" => Expr::Literal(Value::None),
                _ => Expr::Name(name),
            }),
            Some(Token::LParen) => {
                let inner = self.nested(Self::expression)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EvalError::Syntax("expected ')'".to_string())),
                }
            }
            Some(token) => Err(EvalError::Syntax(format!("unexpected {token:?}"))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num
{
    Int(i64),
    Float(f64),
}

impl Num
{
    fn of(value: &Value) -> Option<Self>
    {
        match value {
            Value::Bool(b) => Some(Self::Int(i64::from(*b))),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    const fn as_f64(self) -> f64
    {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

struct Interpreter<'a>
{
    frame: &'a Frame,
    deadline: Deadline,
}

impl Interpreter<'_>
{
    fn eval(&self, expr: &Expr) -> Result<Value, EvalError>
    {
        self.deadline.check()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.frame.lookup(name).cloned().ok_or_else(|| EvalError::NameNotFound(name.clone())),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EvalError::Type(format!("bad operand type for unary -: '{}'", other.type_name()))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() { self.eval(right) } else { Ok(left) }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() { Ok(left) } else { self.eval(right) }
            }
            Expr::Arith(op, left, right) => arith(*op, &self.eval(left)?, &self.eval(right)?),
            Expr::Chain(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, operand) in rest {
                    let right = self.eval(operand)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
        }
    }
}

fn type_error(op: &str, left: &Value, right: &Value) -> EvalError
{
    EvalError::Type(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn arith(op: Arith, left: &Value, right: &Value) -> Result<Value, EvalError>
{
    if let (Arith::Add, Value::Str(a), Value::Str(b)) = (op, left, right) {
        return Ok(Value::Str(format!("{a}{b}")));
    }
    let symbol = match op {
        Arith::Add => "+",
        Arith::Sub => "-",
        Arith::Mul => "*",
        Arith::Div => "/",
        Arith::FloorDiv => "//",
        Arith::Mod => "%",
    };
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(type_error(symbol, left, right));
    };
    match (op, a, b) {
        (Arith::Div, _, _) => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(a.as_f64() / divisor))
        }
        (_, Num::Int(x), Num::Int(y)) => {
            let result = match op {
                Arith::Add => x.checked_add(y),
                Arith::Sub => x.checked_sub(y),
                Arith::Mul => x.checked_mul(y),
                Arith::FloorDiv | Arith::Mod => {
                    if y == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    let (quotient, remainder) = (x.checked_div(y).ok_or(EvalError::Overflow)?, x % y);
                    let adjust = remainder != 0 && ((remainder < 0) != (y < 0));
                    if op == Arith::FloorDiv {
                        Some(if adjust { quotient - 1 } else { quotient })
                    } else {
                        Some(if adjust { remainder + y } else { remainder })
                    }
                }
                Arith::Div => None,
            };
            result.map(Value::Int).ok_or(EvalError::Overflow)
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let result = match op {
                Arith::Add => x + y,
                Arith::Sub => x - y,
                Arith::Mul => x * y,
                Arith::FloorDiv | Arith::Mod if y == 0.0 => return Err(EvalError::DivisionByZero),
                Arith::FloorDiv => (x / y).floor(),
                Arith::Mod => x - y * (x / y).floor(),
                Arith::Div => x / y,
            };
            Ok(Value::Float(result))
        }
    }
}

fn equal(left: &Value, right: &Value) -> bool
{
    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering>
{
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (Num::of(left)?, Num::of(right)?) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        },
    }
}

fn compare(op: Compare, left: &Value, right: &Value) -> Result<bool, EvalError>
{
    let ordered = |symbol: &str, accept: fn(Ordering) -> bool| {
        order(left, right).map(accept).ok_or_else(|| type_error(symbol, left, right))
    };
    match op {
        Compare::Eq => Ok(equal(left, right)),
        Compare::Ne => Ok(!equal(left, right)),
        Compare::Is => Ok(left == right),
        Compare::IsNot => Ok(left != right),
        Compare::Lt => ordered("<", Ordering::is_lt),
        Compare::Le => ordered("<=", Ordering::is_le),
        Compare::Gt => ordered(">", Ordering::is_gt),
        Compare::Ge => ordered(">=", Ordering::is_ge),
        Compare::In | Compare::NotIn => match (left, right) {
            (Value::Str(needle), Value::Str(haystack)) => Ok(haystack.contains(needle.as_str()) == (op == Compare::In)),
            _ => Err(type_error("in", left, right)),
        },
    }
}
