// src/core/matcher.rs

//! Conditional key matching.
//!
//! A value line may be guarded by a key such as `withcov,coverage: coverage run X`.
//! The key is a dash-joined sequence of group specs; it matches an environment
//! when every group spec has at least one alternative satisfied by the
//! environment's factor set (AND across specs, OR within a spec).

use crate::core::errors::{ConfigError, ConfigResult};
use crate::models::{ConditionalKey, EnvironmentId, FactorTest, Fragment, GroupSpec};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // `KEY: value`, where KEY only uses factor characters and the colon is followed by whitespace.
    static ref CONDITIONAL_LINE_RE: Regex =
        Regex::new(r"^([A-Za-z0-9_.{}!,*\-]+):\s+(.*)$").expect("valid conditional line regex");
}

/// Parses a conditional key like `py27,py35-!nodeps` or `{alldeps,withcov}`.
pub fn parse_key(key: &str) -> ConfigResult<ConditionalKey> {
    let key = key.trim();
    if key == "*" {
        return Ok(ConditionalKey::Global);
    }
    if key.is_empty() {
        return Err(ConfigError::malformed_pattern(key, "empty conditional key"));
    }

    let mut groups = Vec::new();
    for part in split_top_level_dashes(key) {
        let content = match part.strip_prefix('{') {
            Some(inner) => inner
                .strip_suffix('}')
                .ok_or_else(|| ConfigError::malformed_pattern(key, "unbalanced '{' in key"))?,
            None => part,
        };
        if content.contains(['{', '}']) {
            return Err(ConfigError::malformed_pattern(key, "misplaced brace in key"));
        }
        if content.contains('-') {
            return Err(ConfigError::malformed_pattern(key, "'-' is not allowed inside braces"));
        }
        groups.push(parse_group_spec(key, content)?);
    }
    Ok(ConditionalKey::Factors(groups))
}

fn split_top_level_dashes(key: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in key.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '-' if depth == 0 => {
                parts.push(key.get(start..i).unwrap_or(""));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(key.get(start..).unwrap_or(""));
    parts
}

fn parse_group_spec(key: &str, content: &str) -> ConfigResult<GroupSpec> {
    let mut alternatives = Vec::new();
    for alt in content.split(',') {
        let alt = alt.trim();
        let test = match alt.strip_prefix('!') {
            Some(tag) => FactorTest::Absent(tag.to_string()),
            None => FactorTest::Present(alt.to_string()),
        };
        match &test {
            FactorTest::Present(tag) | FactorTest::Absent(tag) if tag.is_empty() || tag.contains(['!', '*']) => {
                return Err(ConfigError::malformed_pattern(
                    key,
                    format!("invalid factor '{}' in key", alt),
                ));
            }
            _ => alternatives.push(test),
        }
    }
    Ok(GroupSpec { alternatives })
}

/// Splits a setting value into fragments, one per non-empty line.
/// Lines without a conditional prefix become global fragments.
pub fn parse_fragments(value: &str) -> ConfigResult<Vec<Fragment>> {
    let mut fragments = Vec::new();
    for (index, line) in value.lines().map(str::trim).filter(|l| !l.is_empty()).enumerate() {
        let fragment = match CONDITIONAL_LINE_RE.captures(line) {
            Some(caps) => {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let rest = caps.get(2).map_or("", |m| m.as_str());
                Fragment {
                    key: parse_key(key)?,
                    value: rest.trim().to_string(),
                    index,
                }
            }
            None => Fragment {
                key: ConditionalKey::Global,
                value: line.to_string(),
                index,
            },
        };
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// True if `key` applies to `env`. Matching is done against the factor set,
/// so the order of group specs is irrelevant and tags never match by substring.
pub fn matches(key: &ConditionalKey, env: &EnvironmentId) -> bool {
    match key {
        ConditionalKey::Global => true,
        ConditionalKey::Factors(groups) => groups.iter().all(|group| {
            group.alternatives.iter().any(|alt| match alt {
                FactorTest::Present(tag) => env.has_factor(tag),
                FactorTest::Absent(tag) => !env.has_factor(tag),
            })
        }),
    }
}

/// Collects the values of all matching fragments, in declaration order.
/// Values are concatenated, never deduplicated.
pub fn select_list(fragments: &[Fragment], env: &EnvironmentId) -> Vec<String> {
    fragments
        .iter()
        .filter(|f| {
            let hit = matches(&f.key, env);
            log::trace!("  [{}] line {} matches: {}", env, f.index, hit);
            hit
        })
        .map(|f| f.value.clone())
        .collect()
}

/// How equally specific scalar candidates are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarPolicy {
    /// Different values at the top specificity are an error.
    DetectConflicts,
    /// The later declaration wins. Used inside exact-name override sections.
    LaterWins,
}

/// Two equally specific candidates disagreeing on a scalar value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarConflict {
    pub first: String,
    pub second: String,
}

/// Picks the value of a scalar setting for `env`.
///
/// Unconditional lines form one candidate (joined with a space) of
/// specificity zero. The candidate with the most group specs wins. Ties are
/// compared explicitly: under `DetectConflicts`, two different values are
/// reported instead of silently keeping one of them.
pub fn select_scalar(
    fragments: &[Fragment],
    env: &EnvironmentId,
    policy: ScalarPolicy,
) -> Result<Option<String>, ScalarConflict> {
    let global: Vec<&str> = fragments
        .iter()
        .filter(|f| f.key == ConditionalKey::Global)
        .map(|f| f.value.as_str())
        .collect();

    let mut candidates: Vec<(usize, String)> = Vec::new();
    if !global.is_empty() {
        candidates.push((0, global.join(" ")));
    }
    candidates.extend(
        fragments
            .iter()
            .filter(|f| f.key != ConditionalKey::Global && matches(&f.key, env))
            .map(|f| (f.key.specificity(), f.value.clone())),
    );

    let Some(top) = candidates.iter().map(|(s, _)| *s).max() else {
        return Ok(None);
    };
    let mut winners = candidates.into_iter().filter(|(s, _)| *s == top).map(|(_, v)| v);

    match policy {
        ScalarPolicy::LaterWins => Ok(winners.last()),
        ScalarPolicy::DetectConflicts => {
            let Some(first) = winners.next() else {
                return Ok(None);
            };
            for other in winners {
                if other != first {
                    return Err(ScalarConflict { first, second: other });
                }
            }
            Ok(Some(first))
        }
    }
}
