//! Predicate evaluation over JSON-shaped context values.

use super::{
    PredicateError,
    parser::{BinOp, Expr, Literal, Method},
};
use serde_json::Value;
use std::borrow::Cow;

/// The values a predicate can see.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub route: &'a Value,
    pub options: &'a Value,
    pub routes: &'a Value,
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Result<&'a Value, PredicateError> {
        match name {
            "route" => Ok(self.route),
            "options" => Ok(self.options),
            "routes" => Ok(self.routes),
            other => Err(PredicateError::CapturedVariable(other.to_string())),
        }
    }
}

pub fn eval<'a>(expr: &Expr, scope: &Scope<'a>) -> Result<Cow<'a, Value>, PredicateError> {
    match expr {
        Expr::Literal(lit) => Ok(Cow::Owned(literal_value(lit))),
        Expr::Var(name) => scope.lookup(name).map(Cow::Borrowed),
        Expr::Field(target, name) => {
            let target = eval(target, scope)?;
            field(target, name)
        }
        Expr::Call { target, method, args } => {
            let target = eval(target, scope)?;
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(&target, *method, &args).map(Cow::Owned)
        }
        Expr::Not(inner) => {
            let value = eval(inner, scope)?;
            Ok(Cow::Owned(Value::Bool(!as_bool(&value, "!")?)))
        }
        Expr::Binary(lhs, BinOp::And, rhs) => {
            let result = as_bool(eval(lhs, scope)?.as_ref(), "&&")? && as_bool(eval(rhs, scope)?.as_ref(), "&&")?;
            Ok(Cow::Owned(Value::Bool(result)))
        }
        Expr::Binary(lhs, BinOp::Or, rhs) => {
            let result = as_bool(eval(lhs, scope)?.as_ref(), "||")? || as_bool(eval(rhs, scope)?.as_ref(), "||")?;
            Ok(Cow::Owned(Value::Bool(result)))
        }
        Expr::Binary(lhs, op, rhs) => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            compare(&lhs, *op, &rhs).map(|b| Cow::Owned(Value::Bool(b)))
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Num(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Missing fields read as `null`; reading a field of a non-object fails.
fn field<'a>(target: Cow<'a, Value>, name: &str) -> Result<Cow<'a, Value>, PredicateError> {
    match target {
        Cow::Borrowed(Value::Object(map)) => Ok(map.get(name).map_or(Cow::Owned(Value::Null), Cow::Borrowed)),
        Cow::Owned(Value::Object(mut map)) => Ok(Cow::Owned(map.remove(name).unwrap_or(Value::Null))),
        other => Err(PredicateError::Type(format!(
            "cannot read field `{name}` of {}",
            type_name(&other)
        ))),
    }
}

fn call(target: &Value, method: Method, args: &[Cow<'_, Value>]) -> Result<Value, PredicateError> {
    match (method, target) {
        (Method::Len, Value::String(s)) => Ok(Value::from(s.chars().count())),
        (Method::Len, Value::Array(items)) => Ok(Value::from(items.len())),
        (Method::Contains, Value::Array(items)) => {
            Ok(Value::Bool(items.iter().any(|item| values_equal(item, &args[0]))))
        }
        (Method::StartsWith | Method::EndsWith | Method::Contains, Value::String(s)) => {
            let Value::String(needle) = args[0].as_ref() else {
                return Err(PredicateError::Type(format!(
                    "`{}` expects a string argument, got {}",
                    method.name(),
                    type_name(&args[0])
                )));
            };
            let result = match method {
                Method::StartsWith => s.starts_with(needle.as_str()),
                Method::EndsWith => s.ends_with(needle.as_str()),
                _ => s.contains(needle.as_str()),
            };
            Ok(Value::Bool(result))
        }
        (method, other) => Err(PredicateError::Type(format!(
            "`{}` is not available on {}",
            method.name(),
            type_name(other)
        ))),
    }
}

fn compare(lhs: &Value, op: BinOp, rhs: &Value) -> Result<bool, PredicateError> {
    match op {
        BinOp::Eq => return Ok(values_equal(lhs, rhs)),
        BinOp::Ne => return Ok(!values_equal(lhs, rhs)),
        _ => {}
    }

    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
    .ok_or_else(|| {
        PredicateError::Type(format!(
            "cannot order {} against {}",
            type_name(lhs),
            type_name(rhs)
        ))
    })?;

    Ok(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

/// Structural equality, with numbers compared by value (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_bool(value: &Value, op: &str) -> Result<bool, PredicateError> {
    value.as_bool().ok_or_else(|| {
        PredicateError::Type(format!("`{op}` expects a boolean, got {}", type_name(value)))
    })
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{lexer::tokenize, parser::Parser};
    use serde_json::json;

    fn run(src: &str, route: Value) -> Result<Value, PredicateError> {
        let tokens = tokenize(src)?;
        let closure = Parser::new(&tokens, 0, src.len()).parse_closure()?;
        let options = json!({ "path": "/sitemap.xml", "gzip": true });
        let routes = json!([{ "url": "/" }, { "url": "/about" }]);
        let scope = Scope { route: &route, options: &options, routes: &routes };
        eval(&closure.body, &scope).map(Cow::into_owned)
    }

    #[test]
    fn test_string_methods() {
        let route = json!({ "url": "/blog/post", "path": "/blog/post", "name": "blog-post" });
        assert_eq!(run("|route| route.path.starts_with('/blog')", route.clone()).unwrap(), json!(true));
        assert_eq!(run("|route| route.name.ends_with('post')", route.clone()).unwrap(), json!(true));
        assert_eq!(run("|route| route.url.contains('admin')", route.clone()).unwrap(), json!(false));
        assert_eq!(run("|route| route.name.len()", route).unwrap(), json!(9));
    }

    #[test]
    fn test_context_fields() {
        let route = json!({ "url": "/" });
        assert_eq!(run("|options| options.gzip", route.clone()).unwrap(), json!(true));
        assert_eq!(run("|routes| routes.len() == 2", route).unwrap(), json!(true));
    }

    #[test]
    fn test_missing_field_is_null() {
        let route = json!({ "url": "/" });
        assert_eq!(run("|route| route.lastmod == null", route).unwrap(), json!(true));
    }

    #[test]
    fn test_number_equality_by_value() {
        let route = json!({ "url": "/", "priority": 1 });
        assert_eq!(run("|route| route.priority == 1.0", route).unwrap(), json!(true));
    }

    #[test]
    fn test_ordering() {
        let route = json!({ "url": "/b" });
        assert_eq!(run("|route| route.url > '/a'", route.clone()).unwrap(), json!(true));
        assert_eq!(run("|route| route.url.len() <= 1", route).unwrap(), json!(false));
    }

    #[test]
    fn test_short_circuit() {
        // the right side would be a type error if evaluated
        let route = json!({ "url": "/" });
        assert_eq!(run("|route| false && route.url", route.clone()).unwrap(), json!(false));
        assert_eq!(run("|route| true || route.url", route).unwrap(), json!(true));
    }

    #[test]
    fn test_type_errors() {
        let route = json!({ "url": "/" });
        assert!(matches!(run("|route| !route.url", route.clone()), Err(PredicateError::Type(_))));
        assert!(matches!(run("|route| route.url.name", route.clone()), Err(PredicateError::Type(_))));
        assert!(matches!(run("|route| route.url < 3", route), Err(PredicateError::Type(_))));
    }

    #[test]
    fn test_array_contains() {
        let route = json!({ "url": "/", "tags": ["a", "b"] });
        assert_eq!(run("|route| route.tags.contains('b')", route).unwrap(), json!(true));
    }
}
