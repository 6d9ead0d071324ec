//! `${scope:variable|default}` resolution.
//!
//! A string value is a placeholder when it starts with `${` and ends with
//! `}`. The only scope is `env`: the variable is looked up in the process
//! environment; on a miss the default text is parsed as a JSON fragment
//! (plain string when it is not valid JSON). `|` present but empty means
//! the empty string, no `|` means `null`. Backslash escapes inside the
//! variable/default region are honoured, so `\|` is a literal pipe.
//!
//! Resolution runs over ingress property trees after schema adjustment,
//! replacing matching string values in place.

use crate::error::Error;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderScope {
    Env,
}

impl PlaceholderScope {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "env" => Some(PlaceholderScope::Env),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Placeholder {
    pub scope: PlaceholderScope,
    pub variable: String,
    /// Raw default text after `|`; `None` when no `|` was present.
    pub default_text: Option<String>,
}

/// Quick syntactic check. An escaped opener (`\${…}`) contains the
/// backslash in the string itself and therefore does not match.
pub fn is_placeholder(input: &str) -> bool {
    input.starts_with("${") && input.ends_with('}') && input.len() > 3
}

/// Remove one level of backslash escaping.
fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut escape = false;
    for ch in input.chars() {
        if ch == '\\' && !escape {
            escape = true;
            continue;
        }
        out.push(ch);
        escape = false;
    }
    out
}

/// Index of the first unescaped `|`, if any.
fn split_default(content: &str) -> Option<usize> {
    let mut escape = false;
    for (i, ch) in content.char_indices() {
        match ch {
            '\\' if !escape => escape = true,
            '|' if !escape => return Some(i),
            _ => escape = false,
        }
    }
    None
}

impl Placeholder {
    /// Parse `input`. Returns `Ok(None)` when the string is not a
    /// placeholder at all; a malformed placeholder is an error.
    pub fn parse(input: &str) -> Result<Option<Placeholder>, Error> {
        if !is_placeholder(input) {
            return Ok(None);
        }

        let content = &input[2..input.len() - 1];

        let scope_end = content.find(':').ok_or_else(|| {
            Error::invalid_argument(format!("placeholder '{input}' has no scope delimiter"))
        })?;
        let scope_name = &content[..scope_end];
        let scope = PlaceholderScope::from_name(scope_name).ok_or_else(|| {
            Error::generic(format!("unsupported placeholder scope '{scope_name}'"))
        })?;

        let rest = &content[scope_end + 1..];
        let (variable, default_text) = match split_default(rest) {
            Some(pipe) => (
                unescape(&rest[..pipe]),
                Some(unescape(&rest[pipe + 1..])),
            ),
            None => (unescape(rest), None),
        };

        if variable.is_empty() {
            return Err(Error::invalid_argument(format!(
                "placeholder '{input}' has an empty variable"
            )));
        }

        Ok(Some(Placeholder { scope, variable, default_text }))
    }

    /// Resolve to a value. Env hit → string value of the variable; miss →
    /// the default parsed as a JSON fragment, or `null` without a default.
    pub fn resolve(&self) -> Result<Value, Error> {
        match self.scope {
            PlaceholderScope::Env => match std::env::var(&self.variable) {
                Ok(v) => Ok(Value::String(v)),
                Err(_) => match &self.default_text {
                    None => Ok(Value::Null),
                    Some(text) if text.is_empty() => Ok(Value::String(String::new())),
                    Some(text) => Ok(Value::from_json_str(text)
                        .unwrap_or_else(|_| Value::String(text.clone()))),
                },
            },
        }
    }
}

/// Walk a property tree and substitute every placeholder string in place.
pub fn resolve_tree(value: &mut Value) -> Result<(), Error> {
    match value {
        Value::String(s) => {
            if let Some(ph) = Placeholder::parse(s)? {
                *value = ph.resolve()?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                resolve_tree(item)?;
            }
            Ok(())
        }
        Value::Object(kv) => {
            for (_, child) in kv {
                resolve_tree(child)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global; each test uses a unique name.

    #[test]
    fn detects_placeholders() {
        assert!(is_placeholder("${env:HOME}"));
        assert!(!is_placeholder("\\${env:HOME}"));
        assert!(!is_placeholder("prefix ${env:HOME}"));
        assert!(!is_placeholder("${}"));
    }

    #[test]
    fn env_hit_substitutes_the_variable() {
        unsafe { std::env::set_var("WEFT_PH_HIT", "from-env") };
        let ph = Placeholder::parse("${env:WEFT_PH_HIT|fallback}")
            .unwrap()
            .unwrap();
        assert_eq!(ph.resolve().unwrap(), Value::from("from-env"));
    }

    #[test]
    fn env_miss_uses_json_fragment_default() {
        let ph = Placeholder::parse("${env:WEFT_PH_MISS_NUM|42}").unwrap().unwrap();
        assert_eq!(ph.resolve().unwrap(), Value::Uint64(42));

        let ph = Placeholder::parse("${env:WEFT_PH_MISS_STR|plain text}")
            .unwrap()
            .unwrap();
        assert_eq!(ph.resolve().unwrap(), Value::from("plain text"));
    }

    #[test]
    fn env_miss_empty_default_is_empty_string() {
        let ph = Placeholder::parse("${env:WEFT_PH_MISS_EMPTY|}").unwrap().unwrap();
        assert_eq!(ph.resolve().unwrap(), Value::String(String::new()));
    }

    #[test]
    fn env_miss_without_default_is_null() {
        let ph = Placeholder::parse("${env:WEFT_PH_MISS_NONE}").unwrap().unwrap();
        assert_eq!(ph.resolve().unwrap(), Value::Null);
    }

    #[test]
    fn escaped_pipe_is_a_literal_default() {
        let ph = Placeholder::parse(r"${env:WEFT_PH_MISS_PIPE|\|}").unwrap().unwrap();
        assert_eq!(ph.variable, "WEFT_PH_MISS_PIPE");
        assert_eq!(ph.resolve().unwrap(), Value::from("|"));
    }

    #[test]
    fn escaped_pipe_in_variable_does_not_split() {
        let ph = Placeholder::parse(r"${env:A\|B|d}").unwrap().unwrap();
        assert_eq!(ph.variable, "A|B");
        assert_eq!(ph.default_text.as_deref(), Some("d"));
    }

    #[test]
    fn unknown_scope_is_an_error() {
        assert!(Placeholder::parse("${file:X}").is_err());
    }

    #[test]
    fn resolve_tree_replaces_nested_strings() {
        unsafe { std::env::set_var("WEFT_PH_TREE", "resolved") };
        let mut v = Value::from_json_str(
            r#"{"a":"${env:WEFT_PH_TREE}","b":["${env:WEFT_PH_TREE_MISS|7}","plain"]}"#,
        )
        .unwrap();
        resolve_tree(&mut v).unwrap();
        assert_eq!(v.peek_from_path("a").unwrap(), &Value::from("resolved"));
        assert_eq!(v.peek_from_path("b[0]").unwrap(), &Value::Uint64(7));
        assert_eq!(v.peek_from_path("b[1]").unwrap(), &Value::from("plain"));
    }

    #[test]
    fn escaped_placeholder_left_untouched() {
        let mut v = Value::from("\\${env:X}");
        resolve_tree(&mut v).unwrap();
        assert_eq!(v, Value::from("\\${env:X}"));
    }
}
