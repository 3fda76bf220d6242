//! Policy Gate: which images may run on this node.
//!
//! Patterns are globs over the image reference (`*` matches within one path
//! segment, `**` across segments, `?` one character) or, with a `regex:`
//! prefix, anchored regular expressions.

use regex::Regex;
use tracing::warn;

use crate::config::ConfigError;

#[derive(Debug, Clone)]
struct AllowPattern {
    source: String,
    regex: Regex,
}

/// Stateless allow-list check.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    patterns: Vec<AllowPattern>,
}

impl PolicyGate {
    /// Build a gate from configured patterns.
    ///
    /// An empty list allows every image and logs a warning saying so.
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let gate = Self::compile(patterns)?;
        if gate.allows_everything() {
            warn!("No allowed_algorithms configured, every image will be allowed to run");
        }
        Ok(gate)
    }

    /// Compile patterns without logging.
    pub(crate) fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Ok(AllowPattern {
                    source: p.clone(),
                    regex: compile_pattern(p)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { patterns })
    }

    /// Returns true if `image` may run.
    pub fn is_allowed(&self, image: &str) -> bool {
        self.allows_everything() || self.patterns.iter().any(|p| p.regex.is_match(image))
    }

    pub fn allows_everything(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The configured patterns, as written.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.trim().is_empty() {
        return Err(invalid("empty pattern".to_string()));
    }

    let source = match pattern.strip_prefix("regex:") {
        Some(expr) => format!("^(?:{})$", expr),
        None => glob_to_regex(pattern),
    };
    Regex::new(&source).map_err(|e| invalid(e.to_string()))
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}
