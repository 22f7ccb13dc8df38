//! Install ordering for sets of dependencies that import each other.

use std::collections::BTreeSet;

use crate::dependency::Dependency;
use crate::error::{Error, Result};

/// Order `dependencies` so that every dependency comes after the ones it imports.
///
/// `installed` reports whether a name is already available in the target
/// enclosure. Each pass places every remaining dependency whose imports all
/// resolve to installed or already-placed names; dependencies placed in the
/// same pass are ordered by name. A pass that places nothing fails with
/// [`Error::UnresolvedDependencies`].
pub fn sort<F>(dependencies: Vec<Dependency>, installed: F) -> Result<Vec<Dependency>>
where
    F: Fn(&str) -> bool,
{
    let mut seen = BTreeSet::new();
    for dep in &dependencies {
        if !seen.insert(dep.name().to_string()) {
            return Err(Error::DuplicateDependency(dep.name().to_string()));
        }
    }

    let mut remaining = dependencies;
    remaining.sort_by(|a, b| a.name().cmp(b.name()));

    let mut placed_names: BTreeSet<String> = BTreeSet::new();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|dep| {
            dep.targets()
                .into_iter()
                .all(|target| placed_names.contains(target) || installed(target))
        });

        if ready.is_empty() {
            let pending: Vec<String> = blocked.iter().map(|d| d.name().to_string()).collect();
            let missing: BTreeSet<String> = blocked
                .iter()
                .flat_map(|d| d.targets())
                .filter(|t| !seen.contains(*t) && !installed(*t))
                .map(str::to_string)
                .collect();
            return Err(Error::UnresolvedDependencies {
                pending,
                missing: missing.into_iter().collect(),
            });
        }

        placed_names.extend(ready.iter().map(|d| d.name().to_string()));
        ordered.extend(ready);
        remaining = blocked;
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;

    fn dep(name: &str, imports: &[&str]) -> Dependency {
        let imports = imports
            .iter()
            .map(|t| (format!("_{t}"), t.to_string()))
            .collect();
        Dependency::new(name, "return null;", imports).unwrap()
    }

    fn names(deps: &[Dependency]) -> Vec<&str> {
        deps.iter().map(Dependency::name).collect()
    }

    #[test]
    fn imported_comes_first() {
        let sorted = sort(vec![dep("A", &["B"]), dep("B", &[])], |_| false).unwrap();
        assert_eq!(names(&sorted), vec!["B", "A"]);
    }

    #[test]
    fn unresolved_names_missing_target() {
        let err = sort(vec![dep("A", &["B"])], |_| false).unwrap_err();
        assert_eq!(
            err,
            Error::UnresolvedDependencies {
                pending: vec!["A".into()],
                missing: vec!["B".into()],
            }
        );
    }

    #[test]
    fn installed_names_satisfy_imports() {
        let sorted = sort(vec![dep("A", &["B"])], |n| n == "B").unwrap();
        assert_eq!(names(&sorted), vec!["A"]);
    }

    #[test]
    fn cycle_is_unresolved_without_missing() {
        let err = sort(vec![dep("A", &["B"]), dep("B", &["A"])], |_| false).unwrap_err();
        match err {
            Error::UnresolvedDependencies { pending, missing } => {
                assert_eq!(pending, vec!["A", "B"]);
                assert!(missing.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn simultaneously_ready_are_ordered_by_name() {
        let sorted = sort(
            vec![
                dep("top", &["left", "right"]),
                dep("right", &["base"]),
                dep("left", &["base"]),
                dep("base", &[]),
            ],
            |_| false,
        )
        .unwrap();
        assert_eq!(names(&sorted), vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = sort(vec![dep("A", &[]), dep("A", &[])], |_| false).unwrap_err();
        assert_eq!(err, Error::DuplicateDependency("A".into()));
    }

    #[test]
    fn shared_import_counts_once() {
        let imports = btree! {
            "x".to_string() => "B".to_string(),
            "y".to_string() => "B".to_string(),
        };
        let a = Dependency::new("A", "return x + y;", imports).unwrap();
        let sorted = sort(vec![a, dep("B", &[])], |_| false).unwrap();
        assert_eq!(names(&sorted), vec!["B", "A"]);
    }
}
