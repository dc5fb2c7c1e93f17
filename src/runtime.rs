//! Runtime configuration handed from the build to the serving process.
//!
//! The path → options registry is printed as literal text:
//!
//! ```text
//! {"/sitemap.xml": {"path": '/sitemap.xml', "gzip": true, "filter": |route|route.url!='/admin', ...}}
//! ```
//!
//! Mapping keys are double-quoted, strings single-quoted, filters appear as
//! their minified closure source and absent values as `null`. The loader
//! reads the same text back with the predicate tokenizer, parsing closures in
//! place, so a filter only ever crosses the boundary as source.

use crate::{
    predicate::{
        FN_KEY, Predicate, PredicateError,
        lexer::{Spanned, Token, quote, quote_key, tokenize},
        parser::Parser,
    },
    routes::Route,
    sitemap::ResolvedNode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::{
    collections::BTreeMap,
    fmt::Write,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

/// File name of the runtime config inside `<build_dir>/dist`.
pub const RUNTIME_FILE: &str = "sitemap-runtime.json";

/// A value that could not be printed. `key` is the option path, such as
/// `/sitemap.xml.sitemaps[0].filter`.
#[derive(Debug, Error)]
#[error("cannot serialize option `{key}`: {reason}")]
pub struct SerializeError {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("malformed runtime options")]
    Syntax(#[from] PredicateError),

    #[error("runtime options must be a mapping of path to options")]
    NotAMapping,

    #[error("invalid runtime options for `{key}`")]
    Entry {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to access runtime config {0}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid runtime config file")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Serializer
// ============================================================================

/// Print every registered entry. An entry that fails is left out and
/// reported; the rest are still printed.
pub fn serialize_registry(registry: &BTreeMap<String, Arc<ResolvedNode>>) -> (String, Vec<SerializeError>) {
    let mut entries = Vec::with_capacity(registry.len());
    let mut errors = Vec::new();

    for (path, node) in registry {
        let printed = serde_json::to_value(node.as_ref())
            .map_err(|e| SerializeError { key: path.clone(), reason: e.to_string() })
            .and_then(|value| serialize_value(&value, path));
        match printed {
            Ok(text) => entries.push(format!("{}: {text}", quote_key(path))),
            Err(e) => errors.push(e),
        }
    }

    (format!("{{{}}}", entries.join(", ")), errors)
}

/// Print one value; `key` names it in errors.
pub fn serialize_value(value: &Value, key: &str) -> Result<String, SerializeError> {
    let mut out = String::new();
    write_value(&mut out, value, key)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value, key: &str) -> Result<(), SerializeError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => out.push_str(&quote(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, &format!("{key}[{i}]"))?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            if let Some(source) = function_source(map) {
                // re-parse so only text that loads back is ever written
                let predicate = Predicate::parse(source)
                    .map_err(|e| SerializeError { key: key.to_string(), reason: e.to_string() })?;
                out.push_str(predicate.source());
                return Ok(());
            }
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quote_key(k));
                out.push_str(": ");
                write_value(out, v, &format!("{key}.{k}"))?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// `{"$fn": source}` is how a predicate looks as a JSON value.
fn function_source(map: &Map<String, Value>) -> Option<&str> {
    match (map.len(), map.get(FN_KEY)) {
        (1, Some(Value::String(source))) => Some(source),
        _ => None,
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Parse serializer output into a JSON value. Closures become
/// `{"$fn": source}`.
pub fn parse_text(text: &str) -> Result<Value, PredicateError> {
    let tokens = tokenize(text)?;
    let mut loader = Loader { tokens: &tokens, pos: 0, end: text.len() };
    let value = loader.value()?;
    if let Some(rest) = tokens.get(loader.pos) {
        return Err(PredicateError::Trailing(rest.offset));
    }
    Ok(value)
}

/// Load the registry printed by [`serialize_registry`].
pub fn load_registry(text: &str) -> Result<BTreeMap<String, ResolvedNode>, RuntimeError> {
    let Value::Object(map) = parse_text(text)? else {
        return Err(RuntimeError::NotAMapping);
    };
    map.into_iter()
        .map(|(key, value)| match serde_json::from_value(value) {
            Ok(node) => Ok((key, node)),
            Err(source) => Err(RuntimeError::Entry { key, source }),
        })
        .collect()
}

struct Loader<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    end: usize,
}

impl Loader<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |s| s.offset)
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

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<Value, PredicateError> {
        let offset = self.offset();
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("a value"));
        };

        match token {
            Token::LBrace => self.mapping(),
            Token::LBracket => self.sequence(),
            Token::Pipe | Token::OrOr => {
                let mut parser = Parser::new(self.tokens, self.pos, self.end);
                let closure = parser.parse_closure()?;
                self.pos = parser.pos();
                let mut map = Map::new();
                map.insert(FN_KEY.into(), Value::String(closure.minify()));
                Ok(Value::Object(map))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Value::String(s))
            }
            Token::Num(raw) => {
                self.pos += 1;
                parse_number(&raw).map(Value::Number).ok_or(PredicateError::InvalidNumber { raw, offset })
            }
            Token::Ident(ident) => {
                let value = match ident.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => return Err(self.error("a value")),
                };
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error("a value")),
        }
    }

    fn mapping(&mut self) -> Result<Value, PredicateError> {
        self.pos += 1;
        let mut map = Map::new();
        if self.eat(&Token::RBrace) {
            return Ok(Value::Object(map));
        }
        loop {
            let key = match self.peek() {
                Some(Token::Str(key)) => key.clone(),
                _ => return Err(self.error("a quoted key")),
            };
            self.pos += 1;
            if !self.eat(&Token::Colon) {
                return Err(self.error("`:`"));
            }
            let value = self.value()?;
            map.insert(key, value);

            if self.eat(&Token::RBrace) {
                return Ok(Value::Object(map));
            }
            if !self.eat(&Token::Comma) {
                return Err(self.error("`,` or `}`"));
            }
        }
    }

    fn sequence(&mut self) -> Result<Value, PredicateError> {
        self.pos += 1;
        let mut items = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(Value::Array(items));
        }
        loop {
            items.push(self.value()?);
            if self.eat(&Token::RBracket) {
                return Ok(Value::Array(items));
            }
            if !self.eat(&Token::Comma) {
                return Err(self.error("`,` or `]`"));
            }
        }
    }
}

fn parse_number(raw: &str) -> Option<Number> {
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n.into());
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n.into());
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64)
}

// ============================================================================
// Runtime config file
// ============================================================================

/// What the serving process needs: the printed registry and the routes
/// known when it was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub options: String,
    pub static_routes: Vec<Route>,
}

impl RuntimeConfig {
    pub fn path(build_dir: &Path) -> PathBuf {
        build_dir.join("dist").join(RUNTIME_FILE)
    }

    /// `Ok(None)` when no build has written the file yet.
    pub fn read(build_dir: &Path) -> Result<Option<Self>, RuntimeError> {
        let path = Self::path(build_dir);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read(&path).map_err(|e| RuntimeError::Io(path, e))?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    pub fn write(&self, build_dir: &Path) -> Result<PathBuf, RuntimeError> {
        let path = Self::path(build_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RuntimeError::Io(parent.to_path_buf(), e))?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json).map_err(|e| RuntimeError::Io(path.clone(), e))?;
        Ok(path)
    }

    pub fn registry(&self) -> Result<BTreeMap<String, ResolvedNode>, RuntimeError> {
        load_registry(&self.options)
    }
}
