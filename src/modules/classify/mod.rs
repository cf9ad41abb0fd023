//! Error taxonomy and data-driven classification.
//!
//! The rotation layer only ever consumes an [`ErrorKind`] produced upstream.
//! [`ErrorClassifier`] is the upstream half: a status table plus an ordered
//! regex rule list mapping transport/server error text onto the taxonomy, so
//! platform-specific wording lives in data instead of code.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classified request failure consumed by the rotation decision matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target answered 429 or equivalent throttle text.
    RateLimit,
    /// Verification challenge or checkpoint was raised.
    Challenge,
    /// Transport-level failure, the proxy is the usual suspect.
    Network,
    /// Session is dead; the target wants credentials again.
    Login,
    /// Valid, final answer (missing or private resource).
    NotFound,
    /// Anything the rules did not match.
    Unknown,
}

impl ErrorKind {
    /// Every kind the decision matrix must cover.
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::RateLimit,
        ErrorKind::Challenge,
        ErrorKind::Network,
        ErrorKind::Login,
        ErrorKind::NotFound,
        ErrorKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Challenge => "challenge",
            ErrorKind::Network => "network",
            ErrorKind::Login => "login",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule: first matching pattern wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub pattern: String,
    pub kind: ErrorKind,
}

/// Error building a classifier from user-supplied rules.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid rule pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("invalid rule document: {0}")]
    InvalidRules(#[from] serde_json::Error),
}

static DEFAULT_RULES: Lazy<Vec<(Regex, ErrorKind)>> = Lazy::new(|| {
    let table: &[(&str, ErrorKind)] = &[
        (r"rate.?limit|too many requests|please wait", ErrorKind::RateLimit),
        (r"challenge|checkpoint|captcha|verification", ErrorKind::Challenge),
        (
            r"timed? ?out|connection|dns|proxy|socket|tls|unreachable",
            ErrorKind::Network,
        ),
        (
            r"login.?required|session.{0,8}(expired|invalid)|unauthorized|csrf",
            ErrorKind::Login,
        ),
        (r"not found|no longer available|private account", ErrorKind::NotFound),
    ];
    table
        .iter()
        .map(|(pattern, kind)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|_| Regex::new("$^").unwrap());
            (regex, *kind)
        })
        .collect()
});

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimit),
        401 => Some(ErrorKind::Login),
        404 | 410 => Some(ErrorKind::NotFound),
        _ => None,
    }
}

/// Maps raw error evidence onto the [`ErrorKind`] taxonomy.
///
/// Status codes are checked first, then the rule list in order. The defaults
/// mirror common throttle/challenge wording; callers targeting a specific
/// platform should load their own table.
#[derive(Debug)]
pub struct ErrorClassifier {
    rules: Vec<(Regex, ErrorKind)>,
}

impl ErrorClassifier {
    /// Classifier with the built-in rule table.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// Classifier from an explicit, ordered rule list.
    pub fn from_rules(rules: &[ClassifierRule]) -> Result<Self, ClassifierError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()?;
            compiled.push((regex, rule.kind));
        }
        Ok(Self { rules: compiled })
    }

    /// Classifier from a JSON array of `{"pattern", "kind"}` objects.
    pub fn from_json(json: &str) -> Result<Self, ClassifierError> {
        let rules: Vec<ClassifierRule> = serde_json::from_str(json)?;
        Self::from_rules(&rules)
    }

    pub fn classify(&self, status: Option<u16>, detail: &str) -> ErrorKind {
        if let Some(kind) = status.and_then(kind_for_status) {
            return kind;
        }
        for (regex, kind) in &self.rules {
            if regex.is_match(detail) {
                return *kind;
            }
        }
        ErrorKind::Unknown
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_beats_text() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify(Some(429), "connection reset"),
            ErrorKind::RateLimit
        );
        assert_eq!(classifier.classify(Some(404), ""), ErrorKind::NotFound);
    }

    #[test]
    fn default_rules_cover_common_wording() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify(None, "Please wait a few minutes"),
            ErrorKind::RateLimit
        );
        assert_eq!(
            classifier.classify(None, "checkpoint_required"),
            ErrorKind::Challenge
        );
        assert_eq!(
            classifier.classify(Some(500), "proxy CONNECT aborted"),
            ErrorKind::Network
        );
        assert_eq!(
            classifier.classify(None, "login_required"),
            ErrorKind::Login
        );
        assert_eq!(classifier.classify(None, "weird new failure"), ErrorKind::Unknown);
    }

    #[test]
    fn custom_table_overrides_defaults() {
        let classifier = ErrorClassifier::from_json(
            r#"[{"pattern": "spam detected", "kind": "challenge"}]"#,
        )
        .unwrap();
        assert_eq!(
            classifier.classify(None, "SPAM DETECTED by origin"),
            ErrorKind::Challenge
        );
        // Built-ins are gone once a custom table is supplied.
        assert_eq!(
            classifier.classify(None, "rate limit exceeded"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn rejects_bad_patterns() {
        let rules = [ClassifierRule {
            pattern: "(".into(),
            kind: ErrorKind::Network,
        }];
        assert!(matches!(
            ErrorClassifier::from_rules(&rules),
            Err(ClassifierError::InvalidPattern(_))
        ));
    }
}
