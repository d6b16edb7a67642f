// src/core/envlist.rs

use crate::core::errors::ConfigResult;
use crate::core::factor_parser;
use crate::models::{EnvironmentId, EnvlistPattern, PatternToken};
use std::collections::HashSet;

/// Expands one pattern into its environment ids.
///
/// This is a left-to-right cartesian product: the leftmost group varies
/// slowest and the rightmost fastest, like nested loops. Literal tokens are
/// copied into every name.
pub fn expand(pattern: &EnvlistPattern) -> Vec<EnvironmentId> {
    let mut names: Vec<String> = vec![String::new()];
    for token in &pattern.tokens {
        match token {
            PatternToken::Literal(text) => {
                for name in &mut names {
                    name.push_str(text);
                }
            }
            PatternToken::Group(group) => {
                let mut next = Vec::with_capacity(names.len() * group.len());
                for prefix in &names {
                    for tag in group.tags() {
                        next.push(format!("{}{}", prefix, tag));
                    }
                }
                names = next;
            }
        }
    }
    names.into_iter().map(EnvironmentId::new).collect()
}

/// Parses and expands a whole `envlist` value.
///
/// Each entry is parsed on its own, expansions are concatenated in source
/// order and repeated ids are dropped, keeping the first occurrence.
pub fn expand_envlist(value: &str) -> ConfigResult<Vec<EnvironmentId>> {
    let mut ids = Vec::new();
    for entry in factor_parser::split_envlist(value) {
        let pattern = factor_parser::parse_pattern(&entry)?;
        log::trace!(
            "Envlist entry '{}' expands to {} environment(s).",
            pattern.source,
            pattern.expansion_size()
        );
        ids.extend(expand(&pattern));
    }
    Ok(dedup_keep_first(ids))
}

/// Removes repeated ids, keeping the first occurrence of each name.
pub fn dedup_keep_first(ids: impl IntoIterator<Item = EnvironmentId>) -> Vec<EnvironmentId> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.name().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::factor_parser::parse_pattern;

    fn names(ids: &[EnvironmentId]) -> Vec<&str> {
        ids.iter().map(EnvironmentId::name).collect()
    }

    #[test]
    fn test_two_groups_expand_rightmost_fastest() {
        let ids = expand(&parse_pattern("{py27,py35}-{alldeps,nodeps}").unwrap());
        assert_eq!(
            names(&ids),
            vec!["py27-alldeps", "py27-nodeps", "py35-alldeps", "py35-nodeps"]
        );
    }

    #[test]
    fn test_count_is_product_of_group_sizes() {
        let pattern = parse_pattern("{py27,py33,py34,py35}-{alldeps,nodeps}-{withcov,nocov}-posix").unwrap();
        let ids = expand(&pattern);
        assert_eq!(ids.len(), 4 * 2 * 2);
        assert_eq!(ids.len(), pattern.expansion_size());
        assert_eq!(dedup_keep_first(ids.clone()).len(), ids.len());
    }

    #[test]
    fn test_factor_set_holds_tags_and_literal_tokens() {
        let ids = expand(&parse_pattern("{py27,py35}-coverage-posix").unwrap());
        let first = ids.first().unwrap();
        assert_eq!(first.name(), "py27-coverage-posix");
        assert_eq!(first.factors(), ["py27", "coverage", "posix"]);
    }

    #[test]
    fn test_literal_glued_group_forms_one_factor() {
        let ids = expand(&parse_pattern("py{27,35}-cov").unwrap());
        assert_eq!(names(&ids), vec!["py27-cov", "py35-cov"]);
        assert!(ids.iter().all(|id| id.has_factor("cov")));
        assert!(ids.first().unwrap().has_factor("py27"));
    }

    #[test]
    fn test_expand_envlist_concatenates_and_dedups() {
        let value = "lint\n{py27,py35}-{alldeps,nodeps}\npy27-alldeps, docs, lint";
        let ids = expand_envlist(value).unwrap();
        assert_eq!(
            names(&ids),
            vec!["lint", "py27-alldeps", "py27-nodeps", "py35-alldeps", "py35-nodeps", "docs"]
        );
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let value = "{a,b,c}-{x,y}\n{c,a}-y";
        let first = expand_envlist(value).unwrap();
        for _ in 0..5 {
            assert_eq!(expand_envlist(value).unwrap(), first);
        }
    }

    #[test]
    fn test_malformed_entry_fails_the_whole_envlist() {
        assert!(expand_envlist("lint\n{py27,py35-x").is_err());
    }
}
