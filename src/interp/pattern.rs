use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::StrataError;
use crate::value::Value;

const MATCH_EXPR: &str = r"\$\{([^}]+)\}|\$(\w+)";

static PARTIAL_MATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(MATCH_EXPR).expect("reference pattern compiles"));

static WHOLE_MATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^(?:{})$", MATCH_EXPR)).expect("reference pattern compiles")
});

/// Replaces `${name}` / `$name` references in `text` using `lookup`.
///
/// When the whole string is exactly one reference, the looked-up value is
/// returned as-is, preserving its native type. Otherwise every reference is
/// replaced by its stringified value and the result is a string.
pub(crate) fn substitute<F>(text: &str, mut lookup: F) -> Result<Value, StrataError>
where
    F: FnMut(&str) -> Result<Value, StrataError>,
{
    if let Some(caps) = WHOLE_MATCH.captures(text) {
        if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
            return lookup(name.as_str());
        }
    }

    let mut result = String::new();
    let mut tail = 0;
    for caps in PARTIAL_MATCH.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        result.push_str(&text[tail..whole.start()]);
        match caps.get(1).or_else(|| caps.get(2)) {
            Some(name) => {
                let value = lookup(name.as_str())?;
                result.push_str(&value.to_string());
            }
            None => result.push_str(whole.as_str()),
        }
        tail = whole.end();
    }
    result.push_str(&text[tail..]);
    Ok(Value::String(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(value: Value) -> impl FnMut(&str) -> Result<Value, StrataError> {
        move |_| Ok(value.clone())
    }

    #[test]
    fn whole_match_returns_value_untouched() {
        let out = substitute("${n}", fixed(Value::Integer(42))).unwrap();
        assert_eq!(out, Value::Integer(42));
    }

    #[test]
    fn partial_match_stringifies() {
        let out = substitute("v${n}x", fixed(Value::Integer(42))).unwrap();
        assert_eq!(out, Value::String("v42x".into()));
    }

    #[test]
    fn bare_reference_stops_at_non_word_characters() {
        let out = substitute("$name/tail", fixed(Value::String("sub".into()))).unwrap();
        assert_eq!(out, Value::String("sub/tail".into()));
    }

    #[test]
    fn text_without_references_is_untouched() {
        let out = substitute("plain text", |name| {
            panic!("unexpected lookup of '{}'", name)
        })
        .unwrap();
        assert_eq!(out, Value::String("plain text".into()));
    }

    #[test]
    fn braced_names_may_contain_punctuation() {
        let out = substitute("${some.var-name}", fixed(Value::Bool(true))).unwrap();
        assert_eq!(out, Value::Bool(true));
    }

    #[test]
    fn multiple_references_all_replaced() {
        let mut calls = Vec::new();
        let out = substitute("${a}-$b-${c}", |name| {
            calls.push(name.to_string());
            Ok(Value::String(name.to_uppercase()))
        })
        .unwrap();
        assert_eq!(out, Value::String("A-B-C".into()));
        assert_eq!(calls, vec!["a", "b", "c"]);
    }

    #[test]
    fn lookup_failure_propagates() {
        let err = substitute("x${gone}y", |name| Err(StrataError::undefined(name))).unwrap_err();
        assert_eq!(err, StrataError::undefined("gone"));
    }
}
