// src/core/factor_parser.rs

use crate::core::errors::{ConfigError, ConfigResult};
use crate::models::{EnvlistPattern, FactorGroup, PatternToken};

/// Splits an `envlist` value into independent pattern entries.
///
/// Entries are separated by newlines and by commas outside braces, so both
/// `lint, {py27,py35}-x` and one-entry-per-line layouts work. Source order is kept.
pub fn split_envlist(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    for line in value.lines() {
        let mut depth = 0usize;
        let mut current = String::new();
        for ch in line.chars() {
            match ch {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    push_entry(&mut entries, &current);
                    current.clear();
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        push_entry(&mut entries, &current);
    }
    entries
}

fn push_entry(entries: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        entries.push(trimmed.to_string());
    }
}

/// Tokenizes one pattern entry into literal segments and factor groups.
///
/// Fails with `MalformedPattern` on unbalanced or nested braces, empty groups,
/// empty or duplicate alternatives, alternatives containing `-`, whitespace,
/// and two groups with no literal text between them (`{a,b}{c,d}`).
pub fn parse_pattern(source: &str) -> ConfigResult<EnvlistPattern> {
    let pattern = source.trim();
    if pattern.is_empty() {
        return Err(ConfigError::malformed_pattern(source, "empty pattern"));
    }
    if pattern.chars().any(char::is_whitespace) {
        return Err(ConfigError::malformed_pattern(pattern, "whitespace is not allowed"));
    }

    let mut tokens: Vec<PatternToken> = Vec::new();
    let mut literal = String::new();
    let mut group: Option<String> = None;

    for ch in pattern.chars() {
        match (ch, group.is_some()) {
            ('{', true) => {
                return Err(ConfigError::malformed_pattern(pattern, "nested '{' is not supported"));
            }
            ('{', false) => {
                if literal.is_empty() {
                    if let Some(PatternToken::Group(_)) = tokens.last() {
                        return Err(ConfigError::malformed_pattern(
                            pattern,
                            "adjacent factor groups need a separator between them",
                        ));
                    }
                } else {
                    tokens.push(PatternToken::Literal(std::mem::take(&mut literal)));
                }
                group = Some(String::new());
            }
            ('}', true) => {
                let content = group.take().unwrap_or_default();
                tokens.push(PatternToken::Group(parse_group(pattern, &content)?));
            }
            ('}', false) => {
                return Err(ConfigError::malformed_pattern(pattern, "unbalanced '}'"));
            }
            (',', false) => {
                return Err(ConfigError::malformed_pattern(pattern, "',' outside of a factor group"));
            }
            (_, true) => {
                if let Some(buf) = group.as_mut() {
                    buf.push(ch);
                }
            }
            (_, false) => literal.push(ch),
        }
    }

    if group.is_some() {
        return Err(ConfigError::malformed_pattern(pattern, "unclosed '{'"));
    }
    if !literal.is_empty() {
        tokens.push(PatternToken::Literal(literal));
    }

    Ok(EnvlistPattern {
        source: pattern.to_string(),
        tokens,
    })
}

fn parse_group(pattern: &str, content: &str) -> ConfigResult<FactorGroup> {
    if content.is_empty() {
        return Err(ConfigError::malformed_pattern(pattern, "empty factor group '{}'"));
    }
    let mut tags: Vec<String> = Vec::new();
    for tag in content.split(',') {
        if tag.is_empty() {
            return Err(ConfigError::malformed_pattern(
                pattern,
                format!("empty alternative in '{{{}}}'", content),
            ));
        }
        // Each alternative is one factor; a dash would split it into two.
        if tag.contains('-') {
            return Err(ConfigError::malformed_pattern(
                pattern,
                format!("'-' inside factor '{}' of '{{{}}}'", tag, content),
            ));
        }
        if tags.iter().any(|t| t == tag) {
            return Err(ConfigError::malformed_pattern(
                pattern,
                format!("duplicate factor '{}' in '{{{}}}'", tag, content),
            ));
        }
        tags.push(tag.to_string());
    }
    Ok(FactorGroup::new(tags))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(tags: &[&str]) -> PatternToken {
        PatternToken::Group(FactorGroup::new(tags.iter().map(|t| t.to_string()).collect()))
    }

    #[test]
    fn test_parses_groups_and_literals_in_order() {
        let pattern = parse_pattern("{py27,py35}-{alldeps,nodeps}-posix").unwrap();
        assert_eq!(
            pattern.tokens,
            vec![
                group(&["py27", "py35"]),
                PatternToken::Literal("-".to_string()),
                group(&["alldeps", "nodeps"]),
                PatternToken::Literal("-posix".to_string()),
            ]
        );
        assert_eq!(pattern.expansion_size(), 4);
    }

    #[test]
    fn test_plain_name_is_a_single_literal() {
        let pattern = parse_pattern("  lint ").unwrap();
        assert_eq!(pattern.source, "lint");
        assert_eq!(pattern.tokens, vec![PatternToken::Literal("lint".to_string())]);
        assert_eq!(pattern.expansion_size(), 1);
    }

    #[test]
    fn test_literal_glued_to_group_is_allowed() {
        let pattern = parse_pattern("py{27,35}-cov").unwrap();
        assert_eq!(pattern.tokens.len(), 3);
        assert_eq!(pattern.expansion_size(), 2);
    }

    #[test]
    fn test_malformed_patterns_are_rejected() {
        for bad in [
            "{py27,py35",
            "py27}",
            "{}",
            "{py27,,py35}",
            "{py27,py27}",
            "{a,{b,c}}",
            "{a,b}{c,d}",
            "{py27-x,py35}-a",
            "a,b",
            "py27 lint",
            "",
        ] {
            let result = parse_pattern(bad);
            assert!(
                matches!(result, Err(ConfigError::MalformedPattern { .. })),
                "pattern {:?} should be malformed, got {:?}",
                bad,
                result
            );
        }
    }

    #[test]
    fn test_dashed_alternative_is_rejected_with_reason() {
        let err = parse_pattern("{py27-x,py35}-a").unwrap_err();
        assert!(
            matches!(err, ConfigError::MalformedPattern { ref reason, .. } if reason.contains("py27-x")),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_split_envlist_on_lines_and_top_level_commas() {
        let value = "lint, pyflakes\n{py27,py35}-{alldeps,nodeps}\n\n  docs ,";
        assert_eq!(
            split_envlist(value),
            vec!["lint", "pyflakes", "{py27,py35}-{alldeps,nodeps}", "docs"]
        );
    }
}
