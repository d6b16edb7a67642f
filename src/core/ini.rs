// src/core/ini.rs

//! Reader for the sectioned `key = value` configuration text.
//!
//! Values can span several physical lines: any line starting with whitespace
//! continues the previous key. Lines whose first non-blank character is `;` or
//! `#` are comments, also inside a continued value.

use crate::core::errors::{ConfigError, ConfigResult};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref KEY_RE: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid key regex");
}

/// A single `key = value` assignment. Continuation lines are joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniEntry {
    pub key: String,
    pub value: String,
    /// 1-based line of the key.
    pub line: usize,
}

/// A `[name]` section with its assignments in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    pub line: usize,
    entries: Vec<IniEntry>,
}

impl IniSection {
    fn new(name: &str, line: usize) -> Self {
        Self {
            name: name.to_string(),
            line,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&IniEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn entries(&self) -> &[IniEntry] {
        &self.entries
    }

    /// Inserts an entry; a repeated key replaces the earlier value in place.
    fn upsert(&mut self, entry: IniEntry) -> usize {
        if let Some(pos) = self.entries.iter().position(|e| e.key == entry.key) {
            log::debug!(
                "Key '{}' in [{}] redefined at line {}; the later value wins.",
                entry.key,
                self.name,
                entry.line
            );
            if let Some(existing) = self.entries.get_mut(pos) {
                *existing = entry;
            }
            pos
        } else {
            self.entries.push(entry);
            self.entries.len() - 1
        }
    }
}

/// The parsed configuration text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    /// Shortcut for `section(name)?.get(key)?.value`.
    pub fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.get(key))
            .map(|e| e.value.as_str())
    }

    fn section_index(&mut self, name: &str, line: usize) -> usize {
        if let Some(pos) = self.sections.iter().position(|s| s.name == name) {
            log::debug!("Section [{}] reopened at line {}; merging.", name, line);
            pos
        } else {
            self.sections.push(IniSection::new(name, line));
            self.sections.len() - 1
        }
    }
}

/// Parses configuration text into sections.
pub fn parse(text: &str) -> ConfigResult<IniDocument> {
    let mut doc = IniDocument::default();
    let mut current_section: Option<usize> = None;
    // (section index, entry index) of the key that continuation lines extend.
    let mut current_entry: Option<(usize, usize)> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
            continue;
        }

        if raw_line.starts_with(char::is_whitespace) {
            let (s, e) = current_entry.ok_or_else(|| malformed(line_no, "continuation line without a key"))?;
            if let Some(entry) = doc.sections.get_mut(s).and_then(|sec| sec.entries.get_mut(e)) {
                if !entry.value.is_empty() {
                    entry.value.push('\n');
                }
                entry.value.push_str(trimmed);
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or_else(|| malformed(line_no, "unterminated section header"))?
                .trim();
            if name.is_empty() {
                return Err(malformed(line_no, "empty section name"));
            }
            current_section = Some(doc.section_index(name, line_no));
            current_entry = None;
            continue;
        }

        let section_idx =
            current_section.ok_or_else(|| malformed(line_no, "assignment before any section header"))?;
        let (key, value) = split_assignment(trimmed)
            .ok_or_else(|| malformed(line_no, format!("expected 'key = value', found '{}'", trimmed)))?;

        let section = doc
            .sections
            .get_mut(section_idx)
            .ok_or_else(|| malformed(line_no, "internal section index out of range"))?;
        let entry_idx = section.upsert(IniEntry {
            key: key.to_string(),
            value: value.to_string(),
            line: line_no,
        });
        current_entry = Some((section_idx, entry_idx));
    }

    Ok(doc)
}

/// Splits at the first `=` or `:`, validating the key.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let sep = line.find(['=', ':'])?;
    let key = line.get(..sep)?.trim();
    let value = line.get(sep + 1..)?.trim();
    if KEY_RE.is_match(key) {
        Some((key, value))
    } else {
        None
    }
}

fn malformed(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::MalformedConfig {
        line,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
; leading comment
[tox]
envlist = lint, {py27,py35}-{alldeps,nodeps}
skip_missing_interpreters : True

[testenv]
deps =
    # a comment inside the value
    alldeps: pyopenssl
    coverage
commands =
    coverage erase
    coverage run -p {envbindir}/trial {posargs:twisted}
"#;

    #[test]
    fn test_parses_sections_keys_and_both_separators() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.sections().len(), 2);
        assert_eq!(
            doc.value("tox", "envlist"),
            Some("lint, {py27,py35}-{alldeps,nodeps}")
        );
        assert_eq!(doc.value("tox", "skip_missing_interpreters"), Some("True"));
    }

    #[test]
    fn test_continuation_lines_are_joined_and_comments_skipped() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.value("testenv", "deps"), Some("alldeps: pyopenssl\ncoverage"));
        let commands = doc.section("testenv").unwrap().get("commands").unwrap();
        assert_eq!(commands.line, 12);
        assert_eq!(commands.value.lines().count(), 2);
    }

    #[test]
    fn test_value_keeps_later_separators() {
        let doc = parse("[testenv]\nsetenv = FOO=bar\ncommands: python -c 'a:b'\n").unwrap();
        assert_eq!(doc.value("testenv", "setenv"), Some("FOO=bar"));
        assert_eq!(doc.value("testenv", "commands"), Some("python -c 'a:b'"));
    }

    #[test]
    fn test_repeated_key_and_section_later_wins() {
        let doc = parse("[a]\nx = 1\n[b]\ny = 2\n[a]\nx = 3\nz = 4\n").unwrap();
        assert_eq!(doc.sections().len(), 2);
        assert_eq!(doc.value("a", "x"), Some("3"));
        assert_eq!(doc.value("a", "z"), Some("4"));
        assert_eq!(doc.section("a").unwrap().entries().len(), 2);
    }

    #[test]
    fn test_errors_report_the_offending_line() {
        let err = parse("x = 1\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MalformedConfig {
                line: 1,
                message: "assignment before any section header".to_string()
            }
        );

        let err = parse("[a]\nx = 1\n[broken\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedConfig { line: 3, .. }));

        let err = parse("[a]\n  orphan\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedConfig { line: 2, .. }));

        let err = parse("[a]\njust some words\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedConfig { line: 2, .. }));
    }
}
