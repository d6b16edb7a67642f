// src/core/workspace.rs

//! The entry point for everything that needs a parsed configuration.
//!
//! A `Workspace` parses the file once and keeps the document, the global
//! matrix settings and the universe of known environments. Resolution and
//! plan building borrow it immutably.

use crate::constants::{OVERRIDE_SECTION_PREFIX, SELECT_ALL_KEYWORD};
use crate::core::config_resolver::{self, MatrixSettings, SettingsResolver};
use crate::core::envlist;
use crate::core::errors::{ConfigError, ConfigResult};
use crate::core::factor_parser;
use crate::core::ini::{self, IniDocument};
use crate::core::interpolator::SubstitutionContext;
use crate::core::plan_builder;
use crate::models::{EnvironmentId, ExecutionPlan, ResolvedEnvironment};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Which environments an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The envlist, or every known environment when there is no envlist.
    Default,
    /// Every known environment.
    All,
    /// An explicit subset; entries may use brace patterns.
    Names(Vec<String>),
}

impl Selection {
    /// Parses a `-e` value or the selection variable: `ALL`, or a comma list.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return Self::Default;
        }
        if value == SELECT_ALL_KEYWORD {
            return Self::All;
        }
        Self::Names(factor_parser::split_envlist(value))
    }
}

/// The outcome of resolving one selected environment.
pub type EnvResolution = (EnvironmentId, ConfigResult<ResolvedEnvironment>);

#[derive(Debug)]
pub struct Workspace {
    toxinidir: PathBuf,
    doc: IniDocument,
    matrix: MatrixSettings,
    envlist: Vec<EnvironmentId>,
    universe: Vec<EnvironmentId>,
    /// Environment name -> the `[testenv:...]` section overriding it.
    overrides: HashMap<String, String>,
}

impl Workspace {
    /// Reads and parses a configuration file. `toxinidir` is the file's directory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let io_error = |e: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let text = fs::read_to_string(path).map_err(io_error)?;
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let toxinidir = dunce::canonicalize(parent).map_err(io_error)?;
        log::debug!("Loading '{}' (toxinidir: '{}')", path.display(), toxinidir.display());
        Self::parse(&text, toxinidir)
    }

    /// Parses configuration text directly.
    pub fn parse(text: &str, toxinidir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let doc = ini::parse(text)?;
        let matrix = config_resolver::resolve_matrix_settings(&doc)?;
        let envlist = envlist::expand_envlist(&matrix.envlist)?;

        let mut overrides: HashMap<String, String> = HashMap::new();
        let mut declared = Vec::new();
        for section in doc.sections() {
            let Some(pattern) = section.name.strip_prefix(OVERRIDE_SECTION_PREFIX) else {
                continue;
            };
            let pattern = factor_parser::parse_pattern(pattern.trim()).map_err(|e| match e {
                ConfigError::MalformedPattern { pattern, reason } => ConfigError::MalformedConfig {
                    line: section.line,
                    message: format!("section name '{}' is not a valid pattern: {}", pattern, reason),
                },
                other => other,
            })?;
            for id in envlist::expand(&pattern) {
                if let Some(previous) = overrides.get(id.name()) {
                    log::warn!(
                        "Environment '{}' is configured by both [{}] and [{}]; using [{}].",
                        id,
                        previous,
                        section.name,
                        previous
                    );
                    continue;
                }
                overrides.insert(id.name().to_string(), section.name.clone());
                declared.push(id);
            }
        }

        let universe = envlist::dedup_keep_first(envlist.iter().cloned().chain(declared));
        log::debug!(
            "{} environment(s) in envlist, {} known in total",
            envlist.len(),
            universe.len()
        );

        Ok(Self {
            toxinidir: toxinidir.into(),
            doc,
            matrix,
            envlist,
            universe,
            overrides,
        })
    }

    pub fn toxinidir(&self) -> &Path {
        &self.toxinidir
    }

    pub fn matrix(&self) -> &MatrixSettings {
        &self.matrix
    }

    /// The expanded envlist, in expansion order.
    pub fn envlist(&self) -> &[EnvironmentId] {
        &self.envlist
    }

    /// Every known environment: the envlist followed by environments only
    /// declared through their own `[testenv:...]` section.
    pub fn environments(&self) -> &[EnvironmentId] {
        &self.universe
    }

    /// The override section of an environment, if it has one.
    pub fn override_section(&self, name: &str) -> Option<&str> {
        self.overrides.get(name).map(String::as_str)
    }

    /// Turns a selection into concrete ids. Unknown names are an error.
    pub fn select(&self, selection: &Selection) -> ConfigResult<Vec<EnvironmentId>> {
        match selection {
            Selection::Default if !self.envlist.is_empty() => Ok(self.envlist.clone()),
            Selection::Default | Selection::All => Ok(self.universe.clone()),
            Selection::Names(entries) => {
                let known: HashSet<&str> = self.universe.iter().map(EnvironmentId::name).collect();
                let mut ids = Vec::new();
                for entry in entries {
                    for id in envlist::expand(&factor_parser::parse_pattern(entry)?) {
                        if !known.contains(id.name()) {
                            return Err(ConfigError::UnknownEnvironment {
                                name: id.name().to_string(),
                                known: self.known_names(),
                            });
                        }
                        ids.push(id);
                    }
                }
                Ok(envlist::dedup_keep_first(ids))
            }
        }
    }

    fn known_names(&self) -> String {
        self.universe.iter().map(EnvironmentId::name).collect::<Vec<_>>().join(", ")
    }

    /// Resolves the settings of one environment.
    pub fn resolve(&self, id: &EnvironmentId) -> ConfigResult<ResolvedEnvironment> {
        SettingsResolver::new(&self.doc).resolve(id, self.override_section(id.name()))
    }

    /// Resolves every selected environment before anything runs.
    ///
    /// With `strict`, the first error is returned. Otherwise each environment
    /// carries its own result, so one broken environment does not hide the others.
    pub fn resolve_selection(&self, ids: &[EnvironmentId], strict: bool) -> ConfigResult<Vec<EnvResolution>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let resolved = self.resolve(id);
            if strict && let Err(e) = resolved {
                return Err(e);
            }
            results.push((id.clone(), resolved));
        }
        Ok(results)
    }

    /// Builds the run-wide substitution context for this workspace.
    pub fn substitution_context(
        &self,
        environ: HashMap<String, String>,
        posargs: Vec<String>,
    ) -> ConfigResult<SubstitutionContext> {
        SubstitutionContext::new(self.toxinidir.clone(), environ, posargs).with_workdir(&self.matrix.toxworkdir)
    }

    pub fn plan(&self, env: &ResolvedEnvironment, ctx: &SubstitutionContext) -> ConfigResult<ExecutionPlan> {
        plan_builder::build_plan(env, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_CONFIG_FILENAME;
    use tempfile::tempdir;

    const TWISTED: &str = r#"
[tox]
minversion = 2.4
skip_missing_interpreters = True
toxworkdir = build/
envlist =
    lint, pyflakes, apidocs, narrativedocs, newsfragment
    {py27,py33,py34,py35,py36,pypy}-{withcov,nocov}-{posix,alldeps}
    py27-alldeps-nocov-windows

[testenv]
deps =
    alldeps: pyopenssl
    withcov: coverage
    {withcov,nocov}: mock
extras =
    alldeps: all_non_platform
    windows: windows_platform
setenv =
    withcov: COVERAGE_PROCESS_START = {toxinidir}/.coveragerc
commands =
    python --version
    withcov: coverage erase
    {withcov,nocov}: {envbindir}/trial --reporter={env:TRIAL_REPORTER:verbose} {posargs:twisted}
    withcov: coverage combine

[testenv:lint]
deps = pyflakes
commands = pyflakes {posargs:src/twisted}
basepython = python3.6

[testenv:{apidocs,narrativedocs}]
changedir = docs
commands = sphinx-build -b html . {envtmpdir}/html

[testenv:newsfragment]
commands = python bin/admin/check-newsfragment
"#;

    fn workspace() -> Workspace {
        Workspace::parse(TWISTED, "/src/twisted").unwrap()
    }

    #[test]
    fn test_envlist_expands_in_declaration_order() {
        let ws = workspace();
        let names: Vec<&str> = ws.envlist().iter().map(EnvironmentId::name).collect();
        assert_eq!(names.len(), 5 + 6 * 2 * 2 + 1);
        assert_eq!(&names[..6], ["lint", "pyflakes", "apidocs", "narrativedocs", "newsfragment", "py27-withcov-posix"]);
        assert_eq!(names[6], "py27-withcov-alldeps");
        assert_eq!(names[7], "py27-nocov-posix");
        assert_eq!(names.last(), Some(&"py27-alldeps-nocov-windows"));
    }

    #[test]
    fn test_section_patterns_extend_overrides() {
        let ws = workspace();
        assert_eq!(ws.override_section("apidocs"), Some("testenv:{apidocs,narrativedocs}"));
        assert_eq!(ws.override_section("narrativedocs"), Some("testenv:{apidocs,narrativedocs}"));
        assert_eq!(ws.override_section("py27-withcov-posix"), None);

        let docs = ws.resolve(&EnvironmentId::new("narrativedocs")).unwrap();
        assert_eq!(docs.changedir, "docs");
    }

    #[test]
    fn test_section_only_environments_join_the_universe() {
        let ws = Workspace::parse("[tox]\nenvlist = py27\n[testenv:docs]\ncommands = make\n", "/p").unwrap();
        let names: Vec<&str> = ws.environments().iter().map(EnvironmentId::name).collect();
        assert_eq!(names, vec!["py27", "docs"]);
        assert_eq!(ws.select(&Selection::Default).unwrap().len(), 1);
        assert_eq!(ws.select(&Selection::All).unwrap().len(), 2);
    }

    #[test]
    fn test_select_validates_names() {
        let ws = workspace();
        let ids = ws.select(&Selection::parse("lint,py{27,35}-withcov-posix")).unwrap();
        let names: Vec<&str> = ids.iter().map(EnvironmentId::name).collect();
        assert_eq!(names, vec!["lint", "py27-withcov-posix", "py35-withcov-posix"]);

        let err = ws.select(&Selection::parse("py99")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnvironment { ref name, .. } if name == "py99"));
        assert_eq!(Selection::parse("ALL"), Selection::All);
        assert_eq!(Selection::parse("  "), Selection::Default);
    }

    #[test]
    fn test_end_to_end_plan_for_a_matrix_environment() {
        let ws = workspace();
        let id = EnvironmentId::new("py27-withcov-posix");
        let env = ws.resolve(&id).unwrap();
        assert_eq!(env.deps, vec!["coverage", "mock"]);
        assert_eq!(env.basepython.as_deref(), Some("python2.7"));

        let ctx = ws
            .substitution_context(HashMap::new(), vec!["twisted.test.test_paths".to_string()])
            .unwrap();
        let plan = ws.plan(&env, &ctx).unwrap();
        let programs: Vec<&str> = plan.commands.iter().map(|c| c.argv[0].as_str()).collect();
        assert_eq!(programs[0], "python");
        assert_eq!(programs[1], "coverage");
        assert!(programs[2].ends_with("trial"));
        assert_eq!(plan.commands[2].argv.last().map(String::as_str), Some("twisted.test.test_paths"));
        assert_eq!(plan.envdir, PathBuf::from("/src/twisted/build/").join("py27-withcov-posix"));
        assert_eq!(
            plan.bindings.get("COVERAGE_PROCESS_START").map(String::as_str),
            Some("/src/twisted/.coveragerc")
        );
    }

    #[test]
    fn test_windows_environment_gets_platform_extras() {
        let ws = workspace();
        let env = ws.resolve(&EnvironmentId::new("py27-alldeps-nocov-windows")).unwrap();
        assert_eq!(env.extras, vec!["all_non_platform", "windows_platform"]);
        assert!(env.setenv.is_empty());
    }

    #[test]
    fn test_resolve_selection_strict_and_lenient() {
        let text = "[tox]\nenvlist = a, b-c\n[testenv]\nbasepython =\n    b: python2\n    c: python3\n";
        let ws = Workspace::parse(text, "/p").unwrap();
        let ids = ws.select(&Selection::Default).unwrap();

        let lenient = ws.resolve_selection(&ids, false).unwrap();
        assert_eq!(lenient.len(), 2);
        assert!(lenient[0].1.is_ok());
        assert!(matches!(lenient[1].1, Err(ConfigError::ConflictingScalarAssignment { .. })));

        assert!(ws.resolve_selection(&ids, true).is_err());
    }

    #[test]
    fn test_malformed_envlist_or_section_name_fails_loading() {
        assert!(matches!(
            Workspace::parse("[tox]\nenvlist = {py27,py35\n", "/p"),
            Err(ConfigError::MalformedPattern { .. })
        ));
        assert!(matches!(
            Workspace::parse("[testenv:{a,b]\n", "/p"),
            Err(ConfigError::MalformedConfig { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_from_disk_sets_toxinidir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(&path, TWISTED).unwrap();
        let ws = Workspace::load(&path).unwrap();
        assert_eq!(ws.toxinidir(), dunce::canonicalize(dir.path()).unwrap());
        assert!(ws.matrix().skip_missing_interpreters);

        let missing = Workspace::load(&dir.path().join("nope.ini")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
