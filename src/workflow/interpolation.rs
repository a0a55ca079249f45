//! Step Interpolation
//!
//! Resolves `{{expression}}` placeholders against live run bindings.
//!
//! Expressions are paths: a root name followed by `.key`, `['key']`,
//! `["key"]` or `[index]` accessors, e.g. `output.summary`,
//! `output['lint results'].count` or plain `file`. A bare root name is
//! looked up in the output mapping first.
//!
//! Interpolation never fails: a placeholder whose expression cannot be
//! evaluated is logged and left in place unchanged.

use std::collections::HashMap;

use log::error;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("constant regex pattern is valid"));

/// Source of values for placeholder evaluation.
pub trait Bindings {
    /// Returns the value bound to a root name.
    fn binding(&self, name: &str) -> Option<Value>;
}

impl Bindings for HashMap<String, Value> {
    fn binding(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Extra bindings layered over a base set; the layer wins.
pub struct Layered<'a> {
    base: &'a dyn Bindings,
    layer: HashMap<String, Value>,
}

impl<'a> Layered<'a> {
    pub fn new(base: &'a dyn Bindings) -> Self {
        Self {
            base,
            layer: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.layer.insert(name.into(), value);
        self
    }
}

impl Bindings for Layered<'_> {
    fn binding(&self, name: &str) -> Option<Value> {
        self.layer
            .get(name)
            .cloned()
            .or_else(|| self.base.binding(name))
    }
}

/// Why an expression could not be evaluated.
#[derive(Debug, Error, PartialEq)]
pub enum InterpolationError {
    #[error("invalid expression syntax near '{0}'")]
    Syntax(String),

    #[error("undefined variable '{0}'")]
    Undefined(String),

    #[error("no key or index '{0}'")]
    MissingKey(String),
}

#[derive(Debug, PartialEq)]
enum Accessor {
    Key(String),
    Index(usize),
}

/// Replaces every `{{expression}}` in `text` with its evaluated value.
pub fn interpolate(text: &str, bindings: &dyn Bindings) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }

    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let expression = caps[1].trim();
            match evaluate(expression, bindings) {
                Ok(value) => value_to_text(&value),
                Err(e) => {
                    error!(
                        "Error interpolating {{{{{}}}}}: {}. This variable is not defined in the workflow context. Please define it before using it in a step name.",
                        expression, e
                    );
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Evaluates a single expression against `bindings`.
pub fn evaluate(expression: &str, bindings: &dyn Bindings) -> Result<Value, InterpolationError> {
    let (root, accessors) = parse_expression(expression)?;

    let mut current = bindings
        .binding(&root)
        .or_else(|| {
            // Bare names fall back to the output mapping
            bindings
                .binding("output")
                .and_then(|output| output.get(&root).cloned())
        })
        .ok_or_else(|| InterpolationError::Undefined(root.clone()))?;

    for accessor in accessors {
        current = match (&accessor, &current) {
            (Accessor::Key(key), Value::Object(map)) => map.get(key).cloned(),
            (Accessor::Index(i), Value::Array(items)) => items.get(*i).cloned(),
            _ => None,
        }
        .ok_or_else(|| match accessor {
            Accessor::Key(key) => InterpolationError::MissingKey(key),
            Accessor::Index(i) => InterpolationError::MissingKey(i.to_string()),
        })?;
    }

    Ok(current)
}

/// String form of a value as it appears in interpolated text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_expression(expression: &str) -> Result<(String, Vec<Accessor>), InterpolationError> {
    let syntax = |rest: &str| InterpolationError::Syntax(rest.to_string());

    let root_len = expression
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(expression.len());
    if root_len == 0 {
        return Err(syntax(expression));
    }
    let root = expression[..root_len].to_string();

    let mut accessors = Vec::new();
    let mut rest = &expression[root_len..];

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let len = after_dot
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(after_dot.len());
            let key = after_dot[..len].trim();
            if key.is_empty() {
                return Err(syntax(rest));
            }
            accessors.push(Accessor::Key(key.to_string()));
            rest = &after_dot[len..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket.find(']').ok_or_else(|| syntax(rest))?;
            let inner = after_bracket[..close].trim();
            let quoted = ['\'', '"']
                .iter()
                .find_map(|q| inner.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)));
            match quoted {
                Some(key) => accessors.push(Accessor::Key(key.to_string())),
                None => {
                    let index = inner.parse::<usize>().map_err(|_| syntax(inner))?;
                    accessors.push(Accessor::Index(index));
                }
            }
            rest = &after_bracket[close + 1..];
        } else {
            return Err(syntax(rest));
        }
    }

    Ok((root, accessors))
}
