// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;

/// Default prefix for Courier environment variables.
pub const DEFAULT_PREFIX: &str = "COURIER";

/// Separator between nesting levels: `COURIER_DISPATCH__DEFAULT_TIMEOUT_SECONDS`.
pub const NESTING_SEPARATOR: &str = "__";

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load all matching environment variables, prefix stripped and lowercased
    pub fn load(&self) -> HashMap<String, String> {
        self.filter(env::vars())
    }

    /// Same as [`load`](Self::load) over an explicit variable set
    pub fn filter<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| {
                let key = match self.prefix {
                    Some(ref prefix) => key
                        .strip_prefix(prefix.as_str())?
                        .strip_prefix('_')?
                        .to_string(),
                    None => key,
                };
                Some((key.to_lowercase(), value))
            })
            .collect()
    }

    /// Load matching variables as a nested JSON object
    pub fn load_nested(&self) -> Value {
        self.nested_from(env::vars())
    }

    /// Same as [`load_nested`](Self::load_nested) over an explicit variable set
    pub fn nested_from<I>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (String, String)>,
    {
        nest(self.filter(vars))
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = if let Some(ref prefix) = self.prefix {
            format!("{}_{}", prefix, key.to_uppercase())
        } else {
            key.to_uppercase()
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }
}

/// Build a nested object from `a__b=value` pairs, typing scalar values.
pub(crate) fn nest<I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut root = Map::new();

    for (key, raw) in pairs {
        let path: Vec<String> = key
            .to_lowercase()
            .split(NESTING_SEPARATOR)
            .map(str::to_string)
            .collect();
        insert_path(&mut root, &path, scalar(&raw));
    }

    Value::Object(root)
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let [head, rest @ ..] = path else {
        return;
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }

    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(child) = child {
        insert_path(child, rest, value);
    }
}

// "5" -> 5, "true" -> true, anything else stays a string
fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}
