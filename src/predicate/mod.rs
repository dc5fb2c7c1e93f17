//! Route filter predicates.
//!
//! A predicate is a small closure over the sitemap context:
//!
//! ```text
//! |route, options| !route.path.starts_with('/admin') && options.gzip
//! ```
//!
//! It may bind only `route`, `options` and `routes`. Anything else the body
//! names would be a value captured from an outer scope, which cannot survive
//! serialization into the runtime config, so it is rejected when parsed.
//! Every predicate keeps its canonical minified source; that text is what
//! gets serialized and compared.

mod eval;
pub mod lexer;
pub mod parser;

use parser::{Closure, Parser};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub use eval::type_name;

/// Key used when a predicate is embedded in a JSON document.
pub const FN_KEY: &str = "$fn";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),

    #[error("expected {expected}, found {found} at offset {offset}")]
    Expected {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("invalid number `{raw}` at offset {offset}")]
    InvalidNumber { raw: String, offset: usize },

    #[error("unexpected trailing input at offset {0}")]
    Trailing(usize),

    #[error("unknown parameter `{0}` (expected one of: route, options, routes)")]
    UnknownParam(String),

    #[error("parameter `{0}` is declared twice")]
    DuplicateParam(String),

    #[error("`{0}` is captured from an outer scope and can't be serialized")]
    CapturedVariable(String),

    #[error("unknown method `{0}` (expected one of: starts_with, ends_with, contains, len)")]
    UnknownMethod(String),

    #[error("`{method}` takes {expected} argument(s), got {got}")]
    Arity {
        method: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("filter must return a boolean, got {0}")]
    NotBoolean(String),
}

/// A parsed route filter.
#[derive(Clone)]
pub struct Predicate {
    closure: Closure,
    source: String,
}

impl Predicate {
    /// Parse a standalone predicate. The whole input must be consumed.
    pub fn parse(src: &str) -> Result<Self, PredicateError> {
        let tokens = lexer::tokenize(src)?;
        let mut parser = Parser::new(&tokens, 0, src.len());
        let closure = parser.parse_closure()?;
        if let Some(rest) = tokens.get(parser.pos()) {
            return Err(PredicateError::Trailing(rest.offset));
        }
        Ok(Self::from_closure(closure))
    }

    pub(crate) fn from_closure(closure: Closure) -> Self {
        let source = closure.minify();
        Self { closure, source }
    }

    /// Canonical minified source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one route. The result must be a boolean.
    pub fn test(&self, route: &Value, options: &Value, routes: &Value) -> Result<bool, PredicateError> {
        let scope = eval::Scope { route, options, routes };
        let value = eval::eval(&self.closure.body, &scope)?;
        value
            .as_bool()
            .ok_or_else(|| PredicateError::NotBoolean(type_name(&value).to_string()))
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.source).finish()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Predicate {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Serialized as `{"$fn": "<minified source>"}` so a predicate stays
/// distinguishable from a plain string value.
impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(FN_KEY, &self.source)?;
        map.end()
    }
}

/// Accepts either a bare source string (as written in `sitemap.toml`) or
/// the `{"$fn": ...}` form produced by [`Serialize`].
impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PredicateVisitor;

        impl<'de> Visitor<'de> for PredicateVisitor {
            type Value = Predicate;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a predicate source string or a {\"$fn\": ...} map")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Predicate, E> {
                Predicate::parse(v).map_err(E::custom)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Predicate, A::Error> {
                let mut source: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    if key != FN_KEY {
                        return Err(de::Error::unknown_field(&key, &[FN_KEY]));
                    }
                    source = Some(map.next_value()?);
                }
                let source = source.ok_or_else(|| de::Error::missing_field(FN_KEY))?;
                Predicate::parse(&source).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(PredicateVisitor)
    }
}
