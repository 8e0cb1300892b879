//! Topic grammar, wildcard matching, and directory-name sanitization.
//!
//! A topic is one or more dot-separated terms. Concrete terms are
//! `[A-Za-z0-9-]+`. Subscription patterns may additionally use `=` (exactly
//! one term) or `+` (one or more consecutive terms) as a whole term.
//! Published topics must be concrete.

use regex::Regex;

use crate::{FifomqError, Result};

/// Single-term wildcard: matches exactly one term.
pub const WILDCARD_ONE: &str = "=";
/// Multi-term wildcard: matches one or more consecutive terms.
pub const WILDCARD_MANY: &str = "+";

fn is_concrete_term(term: &str) -> bool {
    !term.is_empty()
        && term
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn split_terms(topic: &str) -> Result<Vec<&str>> {
    if topic.is_empty() {
        return Err(FifomqError::InvalidTopic("topic is empty".into()));
    }
    let terms: Vec<&str> = topic.split('.').collect();
    if terms.iter().any(|t| t.is_empty()) {
        return Err(FifomqError::InvalidTopic(format!(
            "'{topic}' has an empty term (leading, trailing, or adjacent dot)"
        )));
    }
    Ok(terms)
}

/// Validates a concrete topic for publishing.
///
/// Accepts only `[A-Za-z0-9-]+` terms joined by single dots; wildcards are
/// rejected.
pub fn validate_publish_topic(topic: &str) -> Result<()> {
    for term in split_terms(topic)? {
        if !is_concrete_term(term) {
            return Err(FifomqError::InvalidTopic(format!(
                "'{topic}': term '{term}' is not in [a-zA-Z0-9-]"
            )));
        }
    }
    Ok(())
}

/// Validates a subscription pattern.
///
/// Like [`validate_publish_topic`], but whole-term `=` and `+` wildcards are
/// allowed.
pub fn validate_subscribe_topic(topic: &str) -> Result<()> {
    for term in split_terms(topic)? {
        if term == WILDCARD_ONE || term == WILDCARD_MANY || is_concrete_term(term) {
            continue;
        }
        return Err(FifomqError::InvalidTopic(format!(
            "'{topic}': term '{term}' is not in [a-zA-Z0-9-] and not a whole-term wildcard"
        )));
    }
    Ok(())
}

/// Compiled predicate over concrete topics for one subscription pattern.
///
/// The pattern is translated to an anchored regular expression: `=` becomes
/// `[^.]+`, `+` becomes `[^.]+(?:\.[^.]+)*`, and literal terms match
/// themselves. Compiled once per channel (subscribers) or per cache entry
/// (publishers).
#[derive(Debug, Clone)]
pub struct TopicMatcher {
    pattern: String,
    regex: Regex,
}

impl TopicMatcher {
    /// Validates `pattern` and compiles it into a matcher.
    pub fn compile(pattern: &str) -> Result<Self> {
        validate_subscribe_topic(pattern)?;
        let mut expr = String::with_capacity(pattern.len() + 16);
        expr.push('^');
        for (i, term) in pattern.split('.').enumerate() {
            if i > 0 {
                expr.push_str(r"\.");
            }
            match term {
                WILDCARD_ONE => expr.push_str("[^.]+"),
                WILDCARD_MANY => expr.push_str(r"[^.]+(?:\.[^.]+)*"),
                // Concrete terms are [A-Za-z0-9-]+, nothing to escape.
                literal => expr.push_str(literal),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr)
            .map_err(|e| FifomqError::InvalidTopic(format!("'{pattern}': {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The raw pattern this matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the concrete `topic` is accepted by this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

/// Maps a subscription pattern to a filename-safe directory-name prefix.
///
/// `=` becomes `_e`, `+` becomes `_p`; any other character outside the topic
/// alphabet becomes `_`. Deterministic but not reversible; publishers recover
/// the raw pattern from the `pattern` sidecar file instead.
pub fn sanitize_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '=' => out.push_str("_e"),
            '+' => out.push_str("_p"),
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}
