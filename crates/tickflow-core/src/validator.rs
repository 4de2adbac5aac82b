//! Composable predicates over inbound message text.
//!
//! A [`Validator`] classifies a message by its textual payload. Handlers
//! registered with the multiplexer each carry one; dispatch evaluates it
//! against every inbound frame.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// Externally supplied predicate for [`Validator::Custom`].
///
/// A custom predicate may fail; the failure propagates out of
/// [`Validator::check`] instead of being treated as a non-match.
pub trait CustomPredicate: Send + Sync {
    fn check(&self, message: &str) -> CoreResult<bool>;
}

impl<F> CustomPredicate for F
where
    F: Fn(&str) -> CoreResult<bool> + Send + Sync,
{
    fn check(&self, message: &str) -> CoreResult<bool> {
        self(message)
    }
}

/// Message predicate, immutable once constructed.
#[derive(Clone, Default)]
pub enum Validator {
    /// Always matches. Used as a wildcard/default handler.
    #[default]
    None,
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Regex(Regex),
    Not(Box<Validator>),
    All(Vec<Validator>),
    Any(Vec<Validator>),
    Custom(Arc<dyn CustomPredicate>),
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::None => write!(f, "Validator::None"),
            Validator::StartsWith(s) => f.debug_tuple("Validator::StartsWith").field(s).finish(),
            Validator::EndsWith(s) => f.debug_tuple("Validator::EndsWith").field(s).finish(),
            Validator::Contains(s) => f.debug_tuple("Validator::Contains").field(s).finish(),
            Validator::Regex(r) => f.debug_tuple("Validator::Regex").field(r).finish(),
            Validator::Not(v) => f.debug_tuple("Validator::Not").field(v).finish(),
            Validator::All(v) => f.debug_tuple("Validator::All").field(v).finish(),
            Validator::Any(v) => f.debug_tuple("Validator::Any").field(v).finish(),
            Validator::Custom(_) => write!(f, "Validator::Custom(<opaque>)"),
        }
    }
}

impl Validator {
    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Validator::StartsWith(prefix.into())
    }

    pub fn ends_with(suffix: impl Into<String>) -> Self {
        Validator::EndsWith(suffix.into())
    }

    pub fn contains(substring: impl Into<String>) -> Self {
        Validator::Contains(substring.into())
    }

    /// Build a regex validator. An invalid pattern surfaces as
    /// [`CoreError::Validation`] at construction time, not at check time.
    pub fn regex(pattern: &str) -> CoreResult<Self> {
        Ok(Validator::Regex(Regex::new(pattern)?))
    }

    pub fn negate(validator: Validator) -> Self {
        Validator::Not(Box::new(validator))
    }

    pub fn all(validators: Vec<Validator>) -> Self {
        Validator::All(validators)
    }

    pub fn any(validators: Vec<Validator>) -> Self {
        Validator::Any(validators)
    }

    pub fn custom(predicate: Arc<dyn CustomPredicate>) -> Self {
        Validator::Custom(predicate)
    }

    /// Adds another validator to this one.
    ///
    /// Appends to an existing `All`/`Any` list; any other variant is
    /// wrapped together with the new validator in an `All`.
    pub fn add(&mut self, validator: Validator) {
        match self {
            Validator::All(validators) => validators.push(validator),
            Validator::Any(validators) => validators.push(validator),
            _ => {
                let current = std::mem::take(self);
                *self = Validator::All(vec![current, validator]);
            }
        }
    }

    /// Evaluate the predicate against a message's text.
    ///
    /// Pure for every variant except `Custom`, whose failure is
    /// propagated. `All` short-circuits on the first false, `Any` on the
    /// first true; `Regex` matches anywhere in the text; the string
    /// variants are exact substring tests with no trimming or case
    /// folding.
    pub fn check(&self, message: &str) -> CoreResult<bool> {
        match self {
            Validator::None => Ok(true),
            Validator::StartsWith(prefix) => Ok(message.starts_with(prefix)),
            Validator::EndsWith(suffix) => Ok(message.ends_with(suffix)),
            Validator::Contains(substring) => Ok(message.contains(substring)),
            Validator::Regex(regex) => Ok(regex.is_match(message)),
            Validator::Not(validator) => Ok(!validator.check(message)?),
            Validator::All(validators) => {
                for v in validators {
                    if !v.check(message)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Validator::Any(validators) => {
                for v in validators {
                    if v.check(message)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Validator::Custom(predicate) => predicate.check(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_matches_everything() {
        assert!(Validator::None.check("").unwrap());
        assert!(Validator::None.check("anything at all").unwrap());
    }

    #[test]
    fn substring_variants_are_exact() {
        assert!(Validator::starts_with("Hello")
            .check("Hello World")
            .unwrap());
        assert!(!Validator::starts_with("Hello").check("hi World").unwrap());
        assert!(Validator::ends_with("World").check("Hello World").unwrap());
        assert!(!Validator::ends_with("World").check("World peace").unwrap());
        assert!(Validator::contains("lo Wo").check("Hello World").unwrap());
        assert!(!Validator::contains("LO WO").check("Hello World").unwrap());
    }

    #[test]
    fn regex_matches_substrings() {
        let v = Validator::regex(r"[A-Z]\w+").unwrap();
        assert!(v.check("Hello").unwrap());
        assert!(!v.check("hello").unwrap());
        // A match anywhere counts, full-string anchoring is not implied.
        assert!(v.check("say Hello there").unwrap());
    }

    #[test]
    fn invalid_regex_fails_at_construction() {
        let err = Validator::regex("(unclosed").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn not_negates() {
        let v = Validator::contains("x");
        let n = Validator::negate(v.clone());
        for msg in ["x marks the spot", "no match here"] {
            assert_eq!(n.check(msg).unwrap(), !v.check(msg).unwrap());
        }
    }

    #[test]
    fn empty_all_is_true_empty_any_is_false() {
        assert!(Validator::all(vec![]).check("m").unwrap());
        assert!(!Validator::any(vec![]).check("m").unwrap());
    }

    #[test]
    fn singleton_all_behaves_like_inner() {
        let inner = Validator::starts_with("42");
        let all = Validator::all(vec![inner.clone()]);
        for msg in ["42[\"ping\"]", "3"] {
            assert_eq!(all.check(msg).unwrap(), inner.check(msg).unwrap());
        }
    }

    fn failing_predicate() -> Validator {
        Validator::custom(Arc::new(|_: &str| -> CoreResult<bool> {
            Err(CoreError::Validation("boom".into()))
        }))
    }

    #[test]
    fn any_short_circuits_before_failing_custom() {
        let v = Validator::any(vec![Validator::None, failing_predicate()]);
        assert!(v.check("m").unwrap());
    }

    #[test]
    fn custom_failure_propagates() {
        let failing = failing_predicate();
        assert!(failing.check("m").is_err());
        // Inside All the failure is not silently treated as false.
        let all = Validator::all(vec![Validator::None, failing]);
        assert!(all.check("m").is_err());
    }

    #[test]
    fn add_wraps_and_appends() {
        let mut v = Validator::contains("a");
        v.add(Validator::contains("b"));
        assert!(matches!(&v, Validator::All(list) if list.len() == 2));
        v.add(Validator::contains("c"));
        assert!(matches!(&v, Validator::All(list) if list.len() == 3));
        assert!(v.check("abc").unwrap());
        assert!(!v.check("ab").unwrap());
    }
}
