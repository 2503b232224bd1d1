// Command template rendering and static placeholder checks

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Parameter values supplied for a single tool call.
pub type Parameters = serde_json::Map<String, Value>;

/// `{#if name}...{/if}`, non-greedy and spanning newlines.
static CONDITIONAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{#if\s+(\w+)\}(.*?)\{/if\}").expect("conditional pattern is valid")
});

/// `{name}` where name is a bare identifier.
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Renders command templates into shell command lines.
///
/// Two constructs are understood:
/// - `{name}` is replaced by the parameter's string form (`null` renders empty).
///   Placeholders without a matching parameter are left as written.
/// - `{#if name}...{/if}` keeps its body when the parameter is truthy and drops
///   it otherwise. Blocks do not nest and are resolved before placeholders, so
///   a block body may itself contain placeholders.
///
/// No shell escaping is applied. Callers that pass untrusted values are
/// responsible for quoting them.
pub struct CommandTemplate;

impl CommandTemplate {
    /// Render a template with the given parameters
    pub fn render(template: &str, parameters: &Parameters) -> String {
        let resolved = CONDITIONAL_PATTERN.replace_all(template, |caps: &Captures| {
            let included = parameters.get(&caps[1]).is_some_and(is_truthy);
            if included {
                caps[2].to_string()
            } else {
                String::new()
            }
        });

        let mut result = resolved.into_owned();
        for (name, value) in parameters {
            let placeholder = format!("{{{}}}", name);
            if result.contains(&placeholder) {
                result = result.replace(&placeholder, &value_to_string(value));
            }
        }

        result
    }

    /// Check that every required name appears as a `{name}` placeholder.
    ///
    /// Conditional block syntax is not counted as a placeholder. Placeholders
    /// beyond the required set are allowed.
    pub fn validate<I, S>(template: &str, required: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let placeholders = Self::extract_placeholders(template);
        required
            .into_iter()
            .all(|name| placeholders.contains(name.as_ref()))
    }

    /// Extract the distinct `{name}` placeholders from a raw template
    pub fn extract_placeholders(template: &str) -> BTreeSet<String> {
        PLACEHOLDER_PATTERN
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Extract the parameter names referenced by `{#if name}` blocks
    pub fn extract_conditionals(template: &str) -> BTreeSet<String> {
        CONDITIONAL_PATTERN
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

/// Truthiness used by conditional blocks.
///
/// `null`, `false`, zero, the empty string and empty arrays or objects are
/// falsy. Everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// String form substituted for a placeholder.
///
/// Strings go in verbatim and `null` as nothing. Booleans render as `True` or
/// `False`, lists as `[1, 'a']` and objects as `{'k': None}`.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => {
            let mut out = String::new();
            write_display(&mut out, other);
            out
        }
    }
}

fn write_display(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_quoted(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_display(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted(out, key);
                out.push_str(": ");
                write_display(out, item);
            }
            out.push('}');
        }
    }
}

/// Quote a nested string, preferring single quotes.
fn write_quoted(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}
