// src/core/config_resolver.rs

use crate::constants::{BASE_SECTION, DEFAULT_WORKDIR, GLOBAL_SECTION, MAX_REFERENCE_DEPTH};
use crate::core::errors::{ConfigError, ConfigResult};
use crate::core::ini::{IniDocument, IniEntry};
use crate::core::matcher::{self, ScalarConflict, ScalarPolicy};
use crate::models::{EnvBinding, EnvironmentId, Fragment, ResolvedEnvironment, Setting, SettingKind};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // `{[section]key}`: a textual reference to another setting.
    static ref REFERENCE_RE: Regex =
        Regex::new(r"\{\[([^\]\{\}]+)\]([A-Za-z0-9_.\-]+)\}").expect("valid reference regex");
    // `py27` -> python2.7, `py3` -> python3
    static ref PY_FACTOR_RE: Regex = Regex::new(r"^py(\d)(\d+)?$").expect("valid python factor regex");
}

/// Settings from the global `[tox]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixSettings {
    /// The raw `envlist` value, or empty.
    pub envlist: String,
    /// The raw `toxworkdir` value; may hold placeholders.
    pub toxworkdir: String,
    pub skip_missing_interpreters: bool,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            envlist: String::new(),
            toxworkdir: format!("{{toxinidir}}{{/}}{}", DEFAULT_WORKDIR),
            skip_missing_interpreters: false,
        }
    }
}

/// Reads the `[tox]` section. Unknown keys are ignored.
pub fn resolve_matrix_settings(doc: &IniDocument) -> ConfigResult<MatrixSettings> {
    let mut settings = MatrixSettings::default();
    let Some(section) = doc.section(GLOBAL_SECTION) else {
        log::debug!("No [{}] section; using defaults.", GLOBAL_SECTION);
        return Ok(settings);
    };
    for entry in section.entries() {
        match entry.key.as_str() {
            "envlist" => settings.envlist = entry.value.clone(),
            "toxworkdir" => settings.toxworkdir = entry.value.clone(),
            "skip_missing_interpreters" => {
                settings.skip_missing_interpreters =
                    parse_bool(&entry.value).ok_or_else(|| ConfigError::InvalidFlag {
                        env: GLOBAL_SECTION.to_string(),
                        setting: entry.key.clone(),
                        value: entry.value.clone(),
                    })?;
            }
            other => log::debug!("Ignoring unknown key '{}' in [{}].", other, GLOBAL_SECTION),
        }
    }
    Ok(settings)
}

/// Where a raw setting value came from.
struct RawSetting<'d> {
    entry: &'d IniEntry,
    section: &'d str,
    policy: ScalarPolicy,
}

/// Merges the base section, matching conditional lines and an optional
/// exact-name override section into a `ResolvedEnvironment`.
///
/// Holds only a shared borrow of the parsed document, so several resolvers
/// can run at once.
#[derive(Debug, Clone, Copy)]
pub struct SettingsResolver<'d> {
    doc: &'d IniDocument,
}

impl<'d> SettingsResolver<'d> {
    pub fn new(doc: &'d IniDocument) -> Self {
        Self { doc }
    }

    /// Resolves every setting for `env`.
    ///
    /// `override_section` names the `[testenv:...]` section for this exact
    /// environment, if any. A key set there replaces the base value wholesale.
    pub fn resolve(
        &self,
        env: &EnvironmentId,
        override_section: Option<&str>,
    ) -> ConfigResult<ResolvedEnvironment> {
        log::debug!(
            "Resolving environment '{}' (factors: {:?}, override: {:?})",
            env,
            env.factors(),
            override_section
        );

        let mut resolved = ResolvedEnvironment {
            name: env.name().to_string(),
            factors: env.factors().to_vec(),
            description: String::new(),
            basepython: None,
            deps: Vec::new(),
            extras: Vec::new(),
            setenv: Vec::new(),
            passenv: Vec::new(),
            commands: Vec::new(),
            changedir: "{toxinidir}".to_string(),
            envdir: "{toxworkdir}{/}{envname}".to_string(),
            ignore_errors: false,
            ignore_outcome: false,
            skip_install: false,
            usedevelop: false,
        };

        for setting in Setting::ALL {
            let Some(raw) = self.raw_setting(setting, override_section) else {
                continue;
            };
            let fragments = self.fragments_for(setting, &raw)?;
            match setting.kind() {
                SettingKind::List => {
                    let values = matcher::select_list(&fragments, env);
                    self.apply_list(&mut resolved, setting, values, raw.entry)?;
                }
                SettingKind::Scalar | SettingKind::Flag => {
                    let picked = matcher::select_scalar(&fragments, env, raw.policy)
                        .map_err(|conflict| conflict_error(env, setting, conflict))?;
                    if let Some(value) = picked {
                        self.apply_scalar(&mut resolved, setting, value)?;
                    }
                }
            }
        }

        if resolved.basepython.is_none() {
            resolved.basepython = default_basepython(env);
        }

        Ok(resolved)
    }

    fn raw_setting(&self, setting: Setting, override_section: Option<&str>) -> Option<RawSetting<'d>> {
        let key = setting.key();
        if let Some(section) = override_section.and_then(|name| self.doc.section(name))
            && let Some(entry) = section.get(key)
        {
            return Some(RawSetting {
                entry,
                section: &section.name,
                policy: ScalarPolicy::LaterWins,
            });
        }
        self.doc.section(BASE_SECTION).and_then(|section| {
            section.get(key).map(|entry| RawSetting {
                entry,
                section: &section.name,
                policy: ScalarPolicy::DetectConflicts,
            })
        })
    }

    fn fragments_for(&self, setting: Setting, raw: &RawSetting<'_>) -> ConfigResult<Vec<Fragment>> {
        let mut stack = vec![format!("[{}]{}", raw.section, raw.entry.key)];
        let mut text = self.expand_references(&raw.entry.value, &mut stack)?;
        if setting == Setting::Commands {
            text = join_backslash_continuations(&text);
        }
        matcher::parse_fragments(&text).map_err(|e| match e {
            ConfigError::MalformedPattern { pattern, reason } => {
                let offending = text
                    .lines()
                    .map(str::trim)
                    .find(|line| line.starts_with(pattern.as_str()))
                    .unwrap_or(pattern.as_str());
                ConfigError::MalformedPattern {
                    reason: format!(
                        "{} in '{}' of [{}] (line {}): {}",
                        reason, raw.entry.key, raw.section, raw.entry.line, offending
                    ),
                    pattern,
                }
            }
            other => other,
        })
    }

    /// Replaces `{[section]key}` references with the referenced raw value.
    /// The inserted text is expanded again, so references may nest; cycles fail.
    pub fn expand_references(&self, value: &str, stack: &mut Vec<String>) -> ConfigResult<String> {
        if !REFERENCE_RE.is_match(value) {
            return Ok(value.to_string());
        }
        if stack.len() > MAX_REFERENCE_DEPTH {
            return Err(ConfigError::CircularReference {
                cycle_path: stack.join(" -> "),
            });
        }

        let mut out = String::with_capacity(value.len());
        let mut last = 0;
        for caps in REFERENCE_RE.captures_iter(value) {
            let (Some(full), Some(section), Some(key)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            out.push_str(value.get(last..full.start()).unwrap_or(""));

            let (section, key) = (section.as_str().trim(), key.as_str());
            let label = format!("[{}]{}", section, key);
            if stack.contains(&label) {
                return Err(ConfigError::CircularReference {
                    cycle_path: format!("{} -> {}", stack.join(" -> "), label),
                });
            }
            let referenced = self.doc.value(section, key).ok_or_else(|| ConfigError::UnknownReference {
                section: section.to_string(),
                key: key.to_string(),
            })?;

            stack.push(label);
            let expanded = self.expand_references(referenced, stack)?;
            stack.pop();

            out.push_str(&expanded);
            last = full.end();
        }
        out.push_str(value.get(last..).unwrap_or(""));
        Ok(out)
    }

    fn apply_list(
        &self,
        resolved: &mut ResolvedEnvironment,
        setting: Setting,
        values: Vec<String>,
        entry: &IniEntry,
    ) -> ConfigResult<()> {
        match setting {
            Setting::Deps => resolved.deps = values,
            Setting::Commands => resolved.commands = values,
            Setting::Extras => resolved.extras = split_names(&values),
            Setting::PassEnv => resolved.passenv = split_names(&values),
            Setting::SetEnv => resolved.setenv = parse_setenv(&values, entry)?,
            _ => {}
        }
        Ok(())
    }

    fn apply_scalar(
        &self,
        resolved: &mut ResolvedEnvironment,
        setting: Setting,
        value: String,
    ) -> ConfigResult<()> {
        let env_name = resolved.name.clone();
        let flag = |value: &str| {
            parse_bool(value).ok_or_else(|| ConfigError::InvalidFlag {
                env: env_name.clone(),
                setting: setting.key().to_string(),
                value: value.to_string(),
            })
        };
        match setting {
            Setting::BasePython => resolved.basepython = Some(value),
            Setting::Description => resolved.description = value,
            Setting::ChangeDir => resolved.changedir = value,
            Setting::EnvDir => resolved.envdir = value,
            Setting::IgnoreErrors => resolved.ignore_errors = flag(&value)?,
            Setting::IgnoreOutcome => resolved.ignore_outcome = flag(&value)?,
            Setting::SkipInstall => resolved.skip_install = flag(&value)?,
            Setting::UseDevelop => resolved.usedevelop = flag(&value)?,
            _ => {}
        }
        Ok(())
    }
}

fn conflict_error(env: &EnvironmentId, setting: Setting, conflict: ScalarConflict) -> ConfigError {
    ConfigError::ConflictingScalarAssignment {
        env: env.name().to_string(),
        setting: setting.key().to_string(),
        first: conflict.first,
        second: conflict.second,
    }
}

/// Derives the interpreter from factors: `py27` -> `python2.7`, `py3` -> `python3`.
pub fn default_basepython(env: &EnvironmentId) -> Option<String> {
    env.factors().iter().find_map(|factor| {
        if matches!(factor.as_str(), "pypy" | "pypy3" | "jython") {
            return Some(factor.clone());
        }
        let caps = PY_FACTOR_RE.captures(factor)?;
        let major = caps.get(1)?.as_str();
        Some(match caps.get(2) {
            Some(minor) => format!("python{}.{}", major, minor.as_str()),
            None => format!("python{}", major),
        })
    })
}

/// Accepts the usual spellings of booleans.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Joins command lines that end with `\` to the following line.
fn join_backslash_continuations(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for line in text.lines() {
        let mut current = match pending.take() {
            Some(mut prefix) => {
                prefix.push(' ');
                prefix.push_str(line.trim());
                prefix
            }
            None => line.to_string(),
        };
        if let Some(stripped) = current.trim_end().strip_suffix('\\') {
            current = stripped.trim_end().to_string();
            pending = Some(current);
        } else {
            out.push(current);
        }
    }
    if let Some(rest) = pending {
        out.push(rest);
    }
    out.join("\n")
}

/// Splits each value on whitespace and commas (for `passenv` and `extras`).
fn split_names(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `NAME=value` lines. A repeated name keeps its first position and takes the later value.
fn parse_setenv(values: &[String], entry: &IniEntry) -> ConfigResult<Vec<EnvBinding>> {
    let mut bindings: Vec<EnvBinding> = Vec::new();
    for line in values {
        let (name, value) = line.split_once('=').ok_or_else(|| ConfigError::MalformedConfig {
            line: entry.line,
            message: format!("setenv entry '{}' is not of the form NAME=value", line),
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::MalformedConfig {
                line: entry.line,
                message: format!("setenv entry '{}' has an empty name", line),
            });
        }
        let value = value.trim().to_string();
        match bindings.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.value = value,
            None => bindings.push(EnvBinding {
                name: name.to_string(),
                value,
            }),
        }
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ini;

    const CONFIG: &str = r#"
[tox]
envlist = lint, {py27,py35}-{alldeps,nodeps}-{withcov,nocov}
toxworkdir = build/
skip_missing_interpreters = True
minversion = 2.4

[testenv]
description = run the test suite
    with trial
deps =
    alldeps: pyopenssl
    withcov: coverage
    mock
extras =
    alldeps: tls, conch
setenv =
    COVERAGE_FILE = {toxinidir}/.coverage
    withcov: COVERAGE_PROCESS_START = {toxinidir}/.coveragerc
    nocov: COVERAGE_FILE = /dev/null
passenv = CI TRAVIS*, CODECOV_TOKEN
commands =
    withcov: coverage erase
    {envbindir}/trial \
        --reporter={env:TRIAL_REPORTER:verbose} {posargs:twisted}
    withcov: coverage report

[testenv:lint]
deps = pyflakes
    {[testenv]deps}
commands = pyflakes {posargs:src}
basepython = python3.6
"#;

    fn resolve(name: &str, override_section: Option<&str>) -> ConfigResult<ResolvedEnvironment> {
        let doc = ini::parse(CONFIG).unwrap();
        SettingsResolver::new(&doc).resolve(&EnvironmentId::new(name), override_section)
    }

    #[test]
    fn test_matrix_settings_from_tox_section() {
        let doc = ini::parse(CONFIG).unwrap();
        let settings = resolve_matrix_settings(&doc).unwrap();
        assert_eq!(settings.toxworkdir, "build/");
        assert!(settings.skip_missing_interpreters);
        assert!(settings.envlist.starts_with("lint"));

        let defaults = resolve_matrix_settings(&ini::parse("[testenv]\n").unwrap()).unwrap();
        assert_eq!(defaults, MatrixSettings::default());
    }

    #[test]
    fn test_list_settings_follow_factor_conditions() {
        let env = resolve("py27-alldeps-withcov", None).unwrap();
        assert_eq!(env.deps, vec!["pyopenssl", "coverage", "mock"]);
        assert_eq!(env.extras, vec!["tls", "conch"]);
        assert_eq!(env.passenv, vec!["CI", "TRAVIS*", "CODECOV_TOKEN"]);
        assert_eq!(
            env.commands,
            vec![
                "coverage erase",
                "{envbindir}/trial --reporter={env:TRIAL_REPORTER:verbose} {posargs:twisted}",
                "coverage report",
            ]
        );

        let env = resolve("py35-nodeps-nocov", None).unwrap();
        assert_eq!(env.deps, vec!["mock"]);
        assert!(env.extras.is_empty());
        assert_eq!(env.commands.len(), 1);
    }

    #[test]
    fn test_setenv_is_additive_and_later_same_name_wins() {
        let env = resolve("py27-alldeps-withcov", None).unwrap();
        let names: Vec<_> = env.setenv.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["COVERAGE_FILE", "COVERAGE_PROCESS_START"]);

        let env = resolve("py27-alldeps-nocov", None).unwrap();
        assert_eq!(
            env.setenv,
            vec![EnvBinding {
                name: "COVERAGE_FILE".to_string(),
                value: "/dev/null".to_string()
            }]
        );
    }

    #[test]
    fn test_override_section_replaces_wholesale() {
        let env = resolve("lint", Some("testenv:lint")).unwrap();
        // The referenced base deps are re-filtered for `lint`: only the unconditional line survives.
        assert_eq!(env.deps, vec!["pyflakes", "mock"]);
        assert_eq!(env.commands, vec!["pyflakes {posargs:src}"]);
        assert_eq!(env.basepython.as_deref(), Some("python3.6"));
        // Keys the override does not set still come from [testenv].
        assert_eq!(env.description, "run the test suite with trial");
    }

    #[test]
    fn test_defaults_and_derived_basepython() {
        let env = resolve("py27-nodeps-nocov", None).unwrap();
        assert_eq!(env.basepython.as_deref(), Some("python2.7"));
        assert_eq!(env.changedir, "{toxinidir}");
        assert_eq!(env.envdir, "{toxworkdir}{/}{envname}");
        assert!(!env.ignore_errors);

        assert_eq!(default_basepython(&EnvironmentId::new("py3-x")).as_deref(), Some("python3"));
        assert_eq!(default_basepython(&EnvironmentId::new("pypy-x")).as_deref(), Some("pypy"));
        assert_eq!(default_basepython(&EnvironmentId::new("docs")), None);
    }

    #[test]
    fn test_conflicting_scalar_in_base_is_an_error() {
        let doc = ini::parse("[testenv]\nbasepython =\n    py27: python2.7\n    posix: python3\n").unwrap();
        let err = SettingsResolver::new(&doc)
            .resolve(&EnvironmentId::new("py27-posix"), None)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ConflictingScalarAssignment {
                env: "py27-posix".to_string(),
                setting: "basepython".to_string(),
                first: "python2.7".to_string(),
                second: "python3".to_string(),
            }
        );
        // An exact-name override settles it.
        let doc = ini::parse(
            "[testenv]\nbasepython =\n    py27: python2.7\n    posix: python3\n[testenv:py27-posix]\nbasepython = python2.7\n",
        )
        .unwrap();
        let env = SettingsResolver::new(&doc)
            .resolve(&EnvironmentId::new("py27-posix"), Some("testenv:py27-posix"))
            .unwrap();
        assert_eq!(env.basepython.as_deref(), Some("python2.7"));
    }

    #[test]
    fn test_flags_are_parsed_and_validated() {
        let doc = ini::parse("[testenv]\nignore_errors = py27: yes\nusedevelop = On\n").unwrap();
        let env = SettingsResolver::new(&doc).resolve(&EnvironmentId::new("py27"), None).unwrap();
        assert!(env.ignore_errors);
        assert!(env.usedevelop);

        let doc = ini::parse("[testenv]\nskip_install = maybe\n").unwrap();
        let err = SettingsResolver::new(&doc).resolve(&EnvironmentId::new("py27"), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFlag { .. }));
    }

    #[test]
    fn test_reference_errors() {
        let doc = ini::parse("[testenv]\ndeps = {[missing]deps}\n").unwrap();
        let err = SettingsResolver::new(&doc).resolve(&EnvironmentId::new("x"), None).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownReference { .. }));

        let doc = ini::parse("[a]\nx = {[b]y}\n[b]\ny = {[a]x}\n[testenv]\ndeps = {[a]x}\n").unwrap();
        let err = SettingsResolver::new(&doc).resolve(&EnvironmentId::new("x"), None).unwrap_err();
        assert!(matches!(err, ConfigError::CircularReference { .. }));
    }

    #[test]
    fn test_malformed_key_names_setting_and_line() {
        let doc = ini::parse("[testenv]\ndeps =\n    mock\n    a--b: foo\n").unwrap();
        let err = SettingsResolver::new(&doc).resolve(&EnvironmentId::new("a-b"), None).unwrap_err();
        assert!(
            matches!(
                &err,
                ConfigError::MalformedPattern { pattern, reason }
                    if pattern == "a--b"
                        && reason.contains("'deps' of [testenv] (line 2)")
                        && reason.ends_with("a--b: foo")
            ),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_malformed_setenv_line() {
        let doc = ini::parse("[testenv]\nsetenv =\n    JUSTANAME\n").unwrap();
        let err = SettingsResolver::new(&doc).resolve(&EnvironmentId::new("x"), None).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedConfig { line: 2, .. }));
    }
}
