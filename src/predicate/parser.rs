//! Predicate syntax tree, recursive-descent parser and minified printer.
//!
//! ```text
//! closure  := '|' params? '|' expr ';'?
//! expr     := and ('||' and)*
//! and      := cmp ('&&' cmp)*
//! cmp      := unary (('=='|'!='|'<'|'<='|'>'|'>=') unary)*
//! unary    := '!' unary | postfix
//! postfix  := primary ('.' ident ('(' args? ')')?)*
//! primary  := string | number | true | false | null | ident | '(' expr ')'
//! ```

use super::{
    PredicateError,
    lexer::{Spanned, Token, quote},
};
use std::fmt::{self, Write};

/// Context fields a predicate may bind as parameters.
pub const CONTEXT_FIELDS: [&str; 3] = ["route", "options", "routes"];

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    StartsWith,
    EndsWith,
    Contains,
    Len,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "starts_with" => Some(Self::StartsWith),
            "ends_with" => Some(Self::EndsWith),
            "contains" => Some(Self::Contains),
            "len" => Some(Self::Len),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Contains => "contains",
            Self::Len => "len",
        }
    }

    pub const fn arity(self) -> usize {
        match self {
            Self::Len => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    const fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            _ => 3,
        }
    }
}

const PREC_UNARY: u8 = 4;
const PREC_POSTFIX: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    Field(Box<Expr>, String),
    Call {
        target: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

impl Expr {
    const fn precedence(&self) -> u8 {
        match self {
            Self::Binary(_, op, _) => op.precedence(),
            Self::Not(_) => PREC_UNARY,
            Self::Field(..) | Self::Call { .. } => PREC_POSTFIX,
            Self::Literal(_) | Self::Var(_) => u8::MAX,
        }
    }

    /// Every variable referenced by this expression.
    fn visit_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Var(name) => out.push(name),
            Self::Field(target, _) | Self::Not(target) => target.visit_vars(out),
            Self::Call { target, args, .. } => {
                target.visit_vars(out);
                args.iter().for_each(|a| a.visit_vars(out));
            }
            Self::Binary(lhs, _, rhs) => {
                lhs.visit_vars(out);
                rhs.visit_vars(out);
            }
        }
    }

    /// Print with the fewest parentheses that keep the tree intact.
    fn write_min(&self, out: &mut String, min_prec: u8) -> fmt::Result {
        let wrap = self.precedence() < min_prec;
        if wrap {
            out.push('(');
        }
        match self {
            Self::Literal(Literal::Str(s)) => out.push_str(&quote(s)),
            Self::Literal(Literal::Num(n)) => write!(out, "{n}")?,
            Self::Literal(Literal::Bool(b)) => write!(out, "{b}")?,
            Self::Literal(Literal::Null) => out.push_str("null"),
            Self::Var(name) => out.push_str(name),
            Self::Field(target, name) => {
                target.write_min(out, PREC_POSTFIX)?;
                write!(out, ".{name}")?;
            }
            Self::Call { target, method, args } => {
                target.write_min(out, PREC_POSTFIX)?;
                write!(out, ".{}(", method.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    arg.write_min(out, 0)?;
                }
                out.push(')');
            }
            Self::Not(inner) => {
                out.push('!');
                inner.write_min(out, PREC_UNARY)?;
            }
            Self::Binary(lhs, op, rhs) => {
                let prec = op.precedence();
                lhs.write_min(out, prec)?;
                out.push_str(op.symbol());
                rhs.write_min(out, prec + 1)?;
            }
        }
        if wrap {
            out.push(')');
        }
        Ok(())
    }
}

/// A parsed, validated closure: `|params| body`.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Expr,
}

impl Closure {
    /// Canonical compact source, without a trailing `;`.
    pub fn minify(&self) -> String {
        let mut out = format!("|{}|", self.params.join(","));
        // writing into a String cannot fail
        let _ = self.body.write_min(&mut out, 0);
        out
    }
}

/// Token-stream parser. The runtime loader drives it directly so a
/// closure embedded in a larger document is parsed in place.
pub struct Parser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    end_offset: usize,
}

impl<'t> Parser<'t> {
    pub const fn new(tokens: &'t [Spanned], pos: usize, end_offset: usize) -> Self {
        Self { tokens, pos, end_offset }
    }

    pub const fn pos(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end_offset, |s| s.offset)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), PredicateError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn error(&self, expected: &'static str) -> PredicateError {
        match self.peek() {
            Some(found) => PredicateError::Expected {
                expected,
                found: found.describe(),
                offset: self.offset(),
            },
            None => PredicateError::UnexpectedEnd(expected),
        }
    }

    /// Parse `|params| body;?` and check that the body only uses its
    /// parameters.
    pub fn parse_closure(&mut self) -> Result<Closure, PredicateError> {
        let mut params: Vec<String> = Vec::new();

        // `||` lexes as one token: an empty parameter list
        let empty = self.eat(&Token::OrOr);
        if !empty {
            self.expect(&Token::Pipe, "`|` opening the parameter list")?;
        }

        if !empty && !self.eat(&Token::Pipe) {
            loop {
                let name = match self.peek() {
                    Some(Token::Ident(name)) => name.clone(),
                    _ => return Err(self.error("a parameter name")),
                };
                self.pos += 1;
                if !CONTEXT_FIELDS.contains(&name.as_str()) {
                    return Err(PredicateError::UnknownParam(name));
                }
                if params.contains(&name) {
                    return Err(PredicateError::DuplicateParam(name));
                }
                params.push(name);

                if self.eat(&Token::Pipe) {
                    break;
                }
                self.expect(&Token::Comma, "`,` or `|`")?;
            }
        }

        let body = self.parse_expr()?;
        self.eat(&Token::Semicolon);

        let mut vars = Vec::new();
        body.visit_vars(&mut vars);
        if let Some(captured) = vars.into_iter().find(|v| !params.iter().any(|p| p == v)) {
            return Err(PredicateError::CapturedVariable(captured.to_string()));
        }

        Ok(Closure { params, body })
    }

    fn parse_expr(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_cmp()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, PredicateError> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, PredicateError> {
        let mut expr = self.parse_primary()?;
        while self.eat(&Token::Dot) {
            let name = match self.peek() {
                Some(Token::Ident(name)) => name.clone(),
                _ => return Err(self.error("a field or method name after `.`")),
            };
            self.pos += 1;

            if !self.eat(&Token::LParen) {
                expr = Expr::Field(Box::new(expr), name);
                continue;
            }

            let method = Method::from_name(&name).ok_or(PredicateError::UnknownMethod(name))?;
            let mut args = Vec::new();
            if !self.eat(&Token::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(&Token::Comma, "`,` or `)`")?;
                }
            }
            if args.len() != method.arity() {
                return Err(PredicateError::Arity {
                    method: method.name(),
                    expected: method.arity(),
                    got: args.len(),
                });
            }
            expr = Expr::Call { target: Box::new(expr), method, args };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, PredicateError> {
        let offset = self.offset();
        let expr = match self.peek() {
            Some(Token::Str(s)) => Expr::Literal(Literal::Str(s.clone())),
            Some(Token::Num(raw)) => {
                let n = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| PredicateError::InvalidNumber { raw: raw.clone(), offset })?;
                Expr::Literal(Literal::Num(n))
            }
            Some(Token::Ident(id)) => match id.as_str() {
                "true" => Expr::Literal(Literal::Bool(true)),
                "false" => Expr::Literal(Literal::Bool(false)),
                "null" => Expr::Literal(Literal::Null),
                _ => Expr::Var(id.clone()),
            },
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "`)`")?;
                return Ok(inner);
            }
            _ => return Err(self.error("an expression")),
        };
        self.pos += 1;
        Ok(expr)
    }
}
