// src/core/interpolator.rs

//! Placeholder substitution.
//!
//! Expansion is a single left-to-right pass. Text produced by a substitution
//! (an environment variable's value, a positional argument) is copied into the
//! output as-is and never scanned again. Defaults written in the configuration
//! (`{posargs:{toxinidir}/tests}`) are source text and are expanded.

use crate::core::errors::{ConfigError, ConfigResult};
use crate::models::{BuiltIn, Placeholder, ResolvedEnvironment};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

lazy_static! {
    static ref PYTHON_VERSION_RE: Regex =
        Regex::new(r"^python(\d+\.\d+)$").expect("valid python version regex");
}

/// Parses the inside of a `{...}` token. Returns `None` for anything that is
/// not a known placeholder.
pub fn parse_placeholder(token: &str) -> Option<Placeholder> {
    if token == "posargs" {
        return Some(Placeholder::PosArgs { default: None });
    }
    if let Some(default) = token.strip_prefix("posargs:") {
        return Some(Placeholder::PosArgs {
            default: Some(default.to_string()),
        });
    }
    if let Some(rest) = token.strip_prefix("env:") {
        let (name, default) = match rest.split_once(':') {
            Some((name, default)) => (name, Some(default.to_string())),
            None => (rest, None),
        };
        if name.is_empty() {
            return None;
        }
        return Some(Placeholder::Env {
            name: name.to_string(),
            default,
        });
    }
    let builtin = match token {
        "toxinidir" => BuiltIn::ToxIniDir,
        "toxworkdir" => BuiltIn::ToxWorkDir,
        "homedir" => BuiltIn::HomeDir,
        "envname" => BuiltIn::EnvName,
        "envdir" => BuiltIn::EnvDir,
        "envbindir" => BuiltIn::EnvBinDir,
        "envpython" => BuiltIn::EnvPython,
        "envsitepackagesdir" => BuiltIn::EnvSitePackagesDir,
        "envtmpdir" => BuiltIn::EnvTmpDir,
        "envlogdir" => BuiltIn::EnvLogDir,
        ":" => BuiltIn::PathListSeparator,
        "/" => BuiltIn::PathSeparator,
        _ => return None,
    };
    Some(Placeholder::BuiltIn(builtin))
}

/// The run-wide inputs placeholders are resolved against.
///
/// Built once per invocation and shared read-only by every environment.
#[derive(Debug, Clone)]
pub struct SubstitutionContext {
    toxinidir: PathBuf,
    toxworkdir: Option<PathBuf>,
    homedir: Option<PathBuf>,
    environ: HashMap<String, String>,
    posargs: Vec<String>,
}

impl SubstitutionContext {
    /// `environ` is a snapshot of the external process environment.
    pub fn new(toxinidir: impl Into<PathBuf>, environ: HashMap<String, String>, posargs: Vec<String>) -> Self {
        Self {
            toxinidir: toxinidir.into(),
            toxworkdir: None,
            homedir: dirs::home_dir(),
            environ,
            posargs,
        }
    }

    /// Resolves the raw `toxworkdir` setting. Relative results are taken relative to `toxinidir`.
    pub fn with_workdir(mut self, raw: &str) -> ConfigResult<Self> {
        let expanded = Interpolator::new(&self).expand(raw)?;
        let workdir = absolutize(&self.toxinidir, &expanded);
        log::debug!("toxworkdir resolved to '{}'", workdir.display());
        self.toxworkdir = Some(workdir);
        Ok(self)
    }

    pub fn with_homedir(mut self, homedir: Option<PathBuf>) -> Self {
        self.homedir = homedir;
        self
    }

    pub fn toxinidir(&self) -> &Path {
        &self.toxinidir
    }

    pub fn toxworkdir(&self) -> Option<&Path> {
        self.toxworkdir.as_deref()
    }

    pub fn environ(&self) -> &HashMap<String, String> {
        &self.environ
    }

    pub fn posargs(&self) -> &[String] {
        &self.posargs
    }
}

/// Per-environment directories derived from `envdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvPaths {
    pub envname: String,
    pub envdir: PathBuf,
    /// `X.Y` taken from a `pythonX.Y` basepython, used for site-packages.
    pub python_version: Option<String>,
}

impl EnvPaths {
    /// Expands the environment's `envdir` (which may only use run-wide placeholders and `{envname}`).
    pub fn resolve(ctx: &SubstitutionContext, env: &ResolvedEnvironment) -> ConfigResult<Self> {
        let raw = Interpolator::new(ctx).with_envname(&env.name).expand(&env.envdir)?;
        let python_version = env
            .basepython
            .as_deref()
            .and_then(|bp| PYTHON_VERSION_RE.captures(bp))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        Ok(Self {
            envname: env.name.clone(),
            envdir: absolutize(ctx.toxinidir(), &raw),
            python_version,
        })
    }

    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.envdir.join("Scripts")
        } else {
            self.envdir.join("bin")
        }
    }

    pub fn python(&self) -> PathBuf {
        self.bin_dir().join(if cfg!(windows) { "python.exe" } else { "python" })
    }

    pub fn site_packages(&self) -> PathBuf {
        if cfg!(windows) {
            return self.envdir.join("Lib").join("site-packages");
        }
        match &self.python_version {
            Some(version) => self
                .envdir
                .join("lib")
                .join(format!("python{}", version))
                .join("site-packages"),
            None => self.envdir.join("lib").join("site-packages"),
        }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.envdir.join("tmp")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.envdir.join("log")
    }
}

/// Expands placeholders in configuration strings.
///
/// Which built-ins are available depends on what it was given: run-wide
/// paths always, `{envname}` after `with_envname`, and every `env*` directory
/// after `for_environment`. `{env:NAME}` consults the binding layer (earlier
/// `setenv` entries) before the external environment.
///
/// Positional arguments are joined with spaces. With `with_posargs_quoting`
/// they are shell-quoted instead, for text that is split into argv afterwards.
#[derive(Debug, Clone, Copy)]
pub struct Interpolator<'a> {
    ctx: &'a SubstitutionContext,
    envname: Option<&'a str>,
    paths: Option<&'a EnvPaths>,
    layer: Option<&'a BTreeMap<String, String>>,
    quote_posargs: bool,
}

impl<'a> Interpolator<'a> {
    pub fn new(ctx: &'a SubstitutionContext) -> Self {
        Self {
            ctx,
            envname: None,
            paths: None,
            layer: None,
            quote_posargs: false,
        }
    }

    pub fn with_envname(mut self, envname: &'a str) -> Self {
        self.envname = Some(envname);
        self
    }

    pub fn for_environment(mut self, paths: &'a EnvPaths) -> Self {
        self.envname = Some(&paths.envname);
        self.paths = Some(paths);
        self
    }

    pub fn with_layer(mut self, layer: &'a BTreeMap<String, String>) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn with_posargs_quoting(mut self, quote: bool) -> Self {
        self.quote_posargs = quote;
        self
    }

    /// Expands every placeholder in `text` in one pass.
    pub fn expand(&self, text: &str) -> ConfigResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.char_indices().peekable();

        while let Some((i, ch)) = chars.next() {
            match ch {
                '\\' => match chars.peek() {
                    Some(&(_, next @ ('{' | '}'))) => {
                        out.push(next);
                        chars.next();
                    }
                    _ => out.push('\\'),
                },
                '{' => {
                    let close = find_closing(text, i).ok_or_else(|| ConfigError::UnresolvedPlaceholder {
                        token: text.get(i + 1..).unwrap_or("").to_string(),
                        text: text.to_string(),
                    })?;
                    let token = text.get(i + 1..close).unwrap_or("");
                    out.push_str(&self.resolve_token(token, text)?);
                    // Skip past the closing brace.
                    while let Some(&(j, _)) = chars.peek() {
                        if j > close {
                            break;
                        }
                        chars.next();
                    }
                }
                _ => out.push(ch),
            }
        }
        Ok(out)
    }

    fn resolve_token(&self, token: &str, text: &str) -> ConfigResult<String> {
        let unresolved = || ConfigError::UnresolvedPlaceholder {
            token: token.to_string(),
            text: text.to_string(),
        };
        match parse_placeholder(token).ok_or_else(unresolved)? {
            Placeholder::PosArgs { default } => {
                if !self.ctx.posargs.is_empty() && !self.quote_posargs {
                    return Ok(self.ctx.posargs.join(" "));
                }
                if !self.ctx.posargs.is_empty() {
                    return shlex::try_join(self.ctx.posargs.iter().map(String::as_str)).map_err(|_| {
                        ConfigError::MalformedCommand {
                            env: self.envname.unwrap_or_default().to_string(),
                            command: "positional arguments contain a NUL byte".to_string(),
                        }
                    });
                }
                default.map_or_else(|| Ok(String::new()), |d| self.expand(&d))
            }
            Placeholder::Env { name, default } => {
                let found = self
                    .layer
                    .and_then(|layer| layer.get(&name))
                    .or_else(|| self.ctx.environ.get(&name));
                match (found, default) {
                    (Some(value), _) => Ok(value.clone()),
                    (None, Some(default)) => self.expand(&default),
                    (None, None) => {
                        log::warn!("Environment variable '{}' is not set; substituting an empty string.", name);
                        Ok(String::new())
                    }
                }
            }
            Placeholder::BuiltIn(builtin) => self.resolve_builtin(builtin).ok_or_else(unresolved),
        }
    }

    fn resolve_builtin(&self, builtin: BuiltIn) -> Option<String> {
        let value = match builtin {
            BuiltIn::ToxIniDir => path_string(&self.ctx.toxinidir),
            BuiltIn::ToxWorkDir => path_string(self.ctx.toxworkdir.as_deref()?),
            BuiltIn::HomeDir => self.ctx.homedir.as_deref().map(path_string).unwrap_or_default(),
            BuiltIn::EnvName => self.envname?.to_string(),
            BuiltIn::EnvDir => path_string(&self.paths?.envdir),
            BuiltIn::EnvBinDir => path_string(&self.paths?.bin_dir()),
            BuiltIn::EnvPython => path_string(&self.paths?.python()),
            BuiltIn::EnvSitePackagesDir => path_string(&self.paths?.site_packages()),
            BuiltIn::EnvTmpDir => path_string(&self.paths?.tmp_dir()),
            BuiltIn::EnvLogDir => path_string(&self.paths?.log_dir()),
            BuiltIn::PathListSeparator => (if cfg!(windows) { ";" } else { ":" }).to_string(),
            BuiltIn::PathSeparator => std::path::MAIN_SEPARATOR.to_string(),
        };
        Some(value)
    }
}

/// Index of the `}` closing the `{` at `open`, honouring nesting and `\{`/`\}` escapes.
fn find_closing(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, ch) in text.get(open..)?.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn path_string(path: &Path) -> String {
    dunce::simplified(path).to_string_lossy().into_owned()
}

/// Joins relative paths onto `base`.
pub fn absolutize(base: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() { path } else { base.join(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(environ: &[(&str, &str)], posargs: &[&str]) -> SubstitutionContext {
        SubstitutionContext::new(
            "/work/proj",
            environ.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            posargs.iter().map(|s| s.to_string()).collect(),
        )
        .with_homedir(Some(PathBuf::from("/home/dev")))
        .with_workdir("{toxinidir}/build")
        .unwrap()
    }

    fn env_paths() -> EnvPaths {
        EnvPaths {
            envname: "py27-alldeps".to_string(),
            envdir: PathBuf::from("/work/proj/build/py27-alldeps"),
            python_version: Some("2.7".to_string()),
        }
    }

    #[test]
    fn test_env_placeholder_prefers_value_over_default() {
        let c = ctx(&[("FOO", "external")], &[]);
        let interp = Interpolator::new(&c);
        assert_eq!(interp.expand("{env:FOO:bar}").unwrap(), "external");
        assert_eq!(interp.expand("{env:MISSING:bar}").unwrap(), "bar");
        assert_eq!(interp.expand("[{env:MISSING:}]").unwrap(), "[]");
        assert_eq!(interp.expand("{env:MISSING}").unwrap(), "");
        assert_eq!(interp.expand("{env:URL:http://localhost:8080}").unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_layer_is_consulted_before_external_environment() {
        let c = ctx(&[("COVERAGE_FILE", "outer")], &[]);
        let mut layer = BTreeMap::new();
        layer.insert("COVERAGE_FILE".to_string(), "inner".to_string());
        let interp = Interpolator::new(&c).with_layer(&layer);
        assert_eq!(interp.expand("{env:COVERAGE_FILE}").unwrap(), "inner");
    }

    #[test]
    fn test_posargs_default_and_quoting() {
        let none = ctx(&[], &[]);
        assert_eq!(
            Interpolator::new(&none).expand("trial {posargs:twisted}").unwrap(),
            "trial twisted"
        );
        assert_eq!(Interpolator::new(&none).expand("trial {posargs}").unwrap(), "trial ");

        let given = ctx(&[], &["twisted.test", "a b"]);
        assert_eq!(
            Interpolator::new(&given)
                .with_posargs_quoting(true)
                .expand("trial {posargs:twisted}")
                .unwrap(),
            "trial twisted.test 'a b'"
        );
        assert_eq!(
            Interpolator::new(&given).expand("{posargs:tests}").unwrap(),
            "twisted.test a b"
        );
    }

    #[test]
    fn test_defaults_may_hold_placeholders() {
        let c = ctx(&[], &[]);
        assert_eq!(
            Interpolator::new(&c).expand("{posargs:{toxinidir}/tests}").unwrap(),
            "/work/proj/tests"
        );
        assert_eq!(
            Interpolator::new(&c).expand("{env:REPORTER:{env:FALLBACK:verbose}}").unwrap(),
            "verbose"
        );
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let c = ctx(&[("TRICKY", "{toxinidir}")], &["{envname}"]);
        let interp = Interpolator::new(&c);
        assert_eq!(interp.expand("{env:TRICKY}").unwrap(), "{toxinidir}");
        assert_eq!(interp.expand("{posargs}").unwrap(), "{envname}");
        assert_eq!(interp.with_posargs_quoting(true).expand("{posargs}").unwrap(), "'{envname}'");
    }

    #[test]
    fn test_builtins_for_an_environment() {
        let c = ctx(&[], &[]);
        let paths = env_paths();
        let interp = Interpolator::new(&c).for_environment(&paths);
        assert_eq!(interp.expand("{toxworkdir}").unwrap(), "/work/proj/build");
        assert_eq!(interp.expand("{envname}").unwrap(), "py27-alldeps");
        assert_eq!(interp.expand("{homedir}").unwrap(), "/home/dev");
        if cfg!(unix) {
            assert_eq!(interp.expand("{envbindir}/trial").unwrap(), "/work/proj/build/py27-alldeps/bin/trial");
            assert_eq!(
                interp.expand("{envsitepackagesdir}").unwrap(),
                "/work/proj/build/py27-alldeps/lib/python2.7/site-packages"
            );
            assert_eq!(interp.expand("a{:}b{/}c").unwrap(), "a:b/c");
        }
    }

    #[test]
    fn test_env_builtins_need_an_environment() {
        let c = ctx(&[], &[]);
        let err = Interpolator::new(&c).expand("{envbindir}/trial").unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedPlaceholder { ref token, .. } if token == "envbindir"));
    }

    #[test]
    fn test_unknown_and_unbalanced_tokens_fail() {
        let c = ctx(&[], &[]);
        let interp = Interpolator::new(&c);
        assert!(matches!(
            interp.expand("{distdir}/x"),
            Err(ConfigError::UnresolvedPlaceholder { ref token, .. }) if token == "distdir"
        ));
        assert!(matches!(interp.expand("python -c 'print({})'"), Err(ConfigError::UnresolvedPlaceholder { .. })));
        assert!(matches!(interp.expand("{toxinidir"), Err(ConfigError::UnresolvedPlaceholder { .. })));
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let c = ctx(&[], &[]);
        assert_eq!(
            Interpolator::new(&c).expand(r"python -c 'print(\{\})' \n").unwrap(),
            r"python -c 'print({})' \n"
        );
    }

    #[test]
    fn test_envpaths_resolve_default_envdir() {
        let c = ctx(&[], &[]);
        let env = ResolvedEnvironment {
            name: "lint".to_string(),
            factors: vec!["lint".to_string()],
            description: String::new(),
            basepython: Some("python3.6".to_string()),
            deps: vec![],
            extras: vec![],
            setenv: vec![],
            passenv: vec![],
            commands: vec![],
            changedir: "{toxinidir}".to_string(),
            envdir: "{toxworkdir}{/}{envname}".to_string(),
            ignore_errors: false,
            ignore_outcome: false,
            skip_install: false,
            usedevelop: false,
        };
        let paths = EnvPaths::resolve(&c, &env).unwrap();
        assert_eq!(paths.envdir, PathBuf::from("/work/proj/build").join("lint"));
        assert_eq!(paths.python_version.as_deref(), Some("3.6"));
    }

    #[test]
    fn test_relative_workdir_is_relative_to_toxinidir() {
        let c = SubstitutionContext::new("/work/proj", HashMap::new(), vec![])
            .with_workdir("build/")
            .unwrap();
        assert_eq!(c.toxworkdir(), Some(Path::new("/work/proj/build/")));
    }
}
