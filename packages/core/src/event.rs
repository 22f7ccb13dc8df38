//! Event names and compiled event filters.
//!
//! Event names are colon-separated segments, each one or more letters, digits,
//! `.` or `-`. Filters use the same grammar with two whole-segment wildcards:
//! `*` matches exactly one segment and `**` matches one or more. A filter may
//! not contain two adjacent `**` segments.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

/// Namespace under which user events are dispatched.
pub const USER_NAMESPACE: &str = "user";

const SEGMENT: &str = r"[A-Za-z0-9.\-]+";

lazy_static! {
    static ref EVENT_NAME: Regex = Regex::new(&format!("^{SEGMENT}(:{SEGMENT})*$"))
        .expect("event name pattern is valid");
    static ref FILTER_SEGMENT: Regex =
        Regex::new(&format!(r"^(\*\*|\*|{SEGMENT})$")).expect("filter pattern is valid");
}

/// Check that `event` is a well-formed event name.
pub fn validate_event(event: &str) -> Result<()> {
    if EVENT_NAME.is_match(event) {
        Ok(())
    } else {
        Err(Error::InvalidEventName(event.to_string()))
    }
}

/// Prefix `event` (or a filter pattern) with the user namespace.
pub fn user_event(event: &str) -> String {
    format!("{USER_NAMESPACE}:{event}")
}

/// A filter compiled once into a matcher.
#[derive(Clone)]
pub struct Filter {
    pattern: String,
    matcher: Regex,
}

impl Filter {
    /// Compile a filter pattern.
    pub fn compile(pattern: &str) -> Result<Self> {
        let invalid = || Error::InvalidFilter(pattern.to_string());

        let mut expr = String::from("^");
        let mut previous_globstar = false;
        for (i, segment) in pattern.split(':').enumerate() {
            if !FILTER_SEGMENT.is_match(segment) {
                return Err(invalid());
            }
            if i > 0 {
                expr.push(':');
            }
            match segment {
                "**" => {
                    if previous_globstar {
                        return Err(invalid());
                    }
                    previous_globstar = true;
                    expr.push_str(&format!("{SEGMENT}(?::{SEGMENT})*"));
                }
                "*" => {
                    previous_globstar = false;
                    expr.push_str(SEGMENT);
                }
                literal => {
                    previous_globstar = false;
                    expr.push_str(&regex::escape(literal));
                }
            }
        }
        expr.push('$');

        let matcher = Regex::new(&expr).map_err(|_| invalid())?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, event: &str) -> bool {
        self.matcher.is_match(event)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filter").field(&self.pattern).finish()
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        assert!(validate_event("x.y").is_ok());
        assert!(validate_event("a:b:c").is_ok());
        assert!(validate_event("data-ready:v1.2").is_ok());
        for bad in ["", ":", "a:", ":a", "a::b", "a b", "a*", "a_b"] {
            assert!(
                matches!(validate_event(bad), Err(Error::InvalidEventName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn literal_filter_matches_exactly() {
        let f = Filter::compile("x.y").unwrap();
        assert!(f.matches("x.y"));
        assert!(!f.matches("xzy"));
        assert!(!f.matches("x.y:z"));
    }

    #[test]
    fn star_matches_one_segment() {
        let f = Filter::compile("a:*").unwrap();
        assert!(f.matches("a:b"));
        assert!(!f.matches("a"));
        assert!(!f.matches("a:b:c"));
    }

    #[test]
    fn globstar_matches_one_or_more_segments() {
        let f = Filter::compile("a:**:b").unwrap();
        assert!(f.matches("a:q:b"));
        assert!(f.matches("a:q:r:b"));
        assert!(!f.matches("a:b"));
        assert!(!f.matches("a:q:r:c"));

        let all = Filter::compile("**").unwrap();
        assert!(all.matches("anything"));
        assert!(all.matches("any:thing"));
    }

    #[test]
    fn adjacent_globstars_rejected() {
        assert!(matches!(
            Filter::compile("a:**:**"),
            Err(Error::InvalidFilter(_))
        ));
        assert!(Filter::compile("**:*:**").is_ok());
    }

    #[test]
    fn malformed_filters_rejected() {
        for bad in ["", "a::b", "a:b*", "***", "a:", "a b"] {
            assert!(
                matches!(Filter::compile(bad), Err(Error::InvalidFilter(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn user_namespace_prefix() {
        assert_eq!(user_event("ready"), "user:ready");
        let f = Filter::compile(&user_event("*")).unwrap();
        assert!(f.matches("user:ready"));
        assert!(!f.matches("system:ready"));
    }
}
