//! Dot-segmented enclosure names.
//!
//! An enclosure name is a non-empty sequence of segments separated by `.`.
//! Each segment is one or more ASCII letters, digits, `_` or `-`. The name
//! minus its last segment is the parent.

use crate::error::{Error, Result};

/// Segment separator for enclosure names.
pub const SEPARATOR: char = '.';

/// Validate an enclosure name.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName(name.to_string()));
    }
    for segment in name.split(SEPARATOR) {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidName(name.to_string()));
        }
    }
    Ok(())
}

/// The parent of `name`, or `None` for a root enclosure.
pub fn parent(name: &str) -> Option<&str> {
    name.rfind(SEPARATOR).map(|idx| &name[..idx])
}

/// Number of segments in `name`.
pub fn depth(name: &str) -> usize {
    name.split(SEPARATOR).count()
}

/// True if `descendant` lies strictly below `ancestor`.
pub fn is_descendant(descendant: &str, ancestor: &str) -> bool {
    descendant.len() > ancestor.len()
        && descendant.starts_with(ancestor)
        && descendant[ancestor.len()..].starts_with(SEPARATOR)
}

/// True if either name lies strictly below the other.
pub fn is_related(a: &str, b: &str) -> bool {
    is_descendant(a, b) || is_descendant(b, a)
}

/// All strict ancestors of `name`, nearest first.
pub fn ancestors(name: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent(name), |n| parent(n))
}

/// Move `name` from under `from` to under `to`, keeping its relative sub-path.
///
/// Returns `None` if `name` is not `from` or one of its descendants.
pub fn rebase(name: &str, from: &str, to: &str) -> Option<String> {
    if name == from {
        Some(to.to_string())
    } else if is_descendant(name, from) {
        Some(format!("{}{}", to, &name[from.len()..]))
    } else {
        None
    }
}
