// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// --- FACTOR GRAMMAR MODELS ---

/// An ordered set of alternative factor tags, e.g. `{py27,py35}`.
/// Built only by the factor parser, which guarantees it is non-empty and
/// that its tags are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorGroup {
    tags: Vec<String>,
}

impl FactorGroup {
    pub(crate) fn new(tags: Vec<String>) -> Self {
        Self { tags }
    }

    /// The alternatives, in declaration order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Number of alternatives in the group.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always false for groups produced by the parser.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// One token of an envlist pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    /// Text copied verbatim into every expanded name (usually contains `-`).
    Literal(String),
    /// A brace group contributing one alternative per expanded name.
    Group(FactorGroup),
}

/// A parsed envlist entry such as `{py27,py35}-{alldeps,nodeps}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvlistPattern {
    /// The entry exactly as written, for error messages.
    pub source: String,
    pub tokens: Vec<PatternToken>,
}

impl EnvlistPattern {
    /// The number of ids this pattern expands to (product of group sizes).
    pub fn expansion_size(&self) -> usize {
        self.tokens
            .iter()
            .map(|token| match token {
                PatternToken::Literal(_) => 1,
                PatternToken::Group(group) => group.len(),
            })
            .product()
    }
}

/// A concrete environment name together with its factor set.
///
/// The factor set is the set of dash-separated components of the name. For
/// patterns whose groups are separated by `-` this is exactly the chosen tags
/// plus the literal-only tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId {
    name: String,
    factors: Vec<String>,
}

impl EnvironmentId {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut factors: Vec<String> = Vec::new();
        for part in name.split('-').filter(|p| !p.is_empty()) {
            if !factors.iter().any(|f| f == part) {
                factors.push(part.to_string());
            }
        }
        Self { name, factors }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The factor set, in order of first appearance in the name.
    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    /// Set membership test; never a substring search.
    pub fn has_factor(&self, tag: &str) -> bool {
        self.factors.iter().any(|f| f == tag)
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// --- CONDITIONAL KEY MODELS ---

/// A single alternative inside a `GroupSpec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactorTest {
    /// Satisfied when the tag is in the factor set.
    Present(String),
    /// `!tag`: satisfied when the tag is NOT in the factor set.
    Absent(String),
}

/// A comma-separated OR-set of factor tests, e.g. `withcov,coverage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub alternatives: Vec<FactorTest>,
}

/// The condition guarding a configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalKey {
    /// No condition, or the explicit `*` key. Matches every environment.
    Global,
    /// Dash-joined group specs; all of them must be satisfied.
    Factors(Vec<GroupSpec>),
}

impl ConditionalKey {
    /// The number of group specs; used to rank competing scalar assignments.
    pub fn specificity(&self) -> usize {
        match self {
            Self::Global => 0,
            Self::Factors(groups) => groups.len(),
        }
    }
}

/// One value line of a setting, with the condition that guards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub key: ConditionalKey,
    pub value: String,
    /// Position of the line within its setting, in declaration order.
    pub index: usize,
}

// --- SETTINGS MODELS ---

/// How the values of a setting are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// Matching lines are concatenated in declaration order.
    List,
    /// A single value; the most specific match wins.
    Scalar,
    /// A scalar interpreted as a boolean.
    Flag,
}

/// Every per-environment setting understood by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    Deps,
    Extras,
    Commands,
    SetEnv,
    PassEnv,
    BasePython,
    Description,
    ChangeDir,
    EnvDir,
    IgnoreErrors,
    IgnoreOutcome,
    SkipInstall,
    UseDevelop,
}

impl Setting {
    /// All settings, in the order they are resolved.
    pub const ALL: [Self; 13] = [
        Self::Deps,
        Self::Extras,
        Self::Commands,
        Self::SetEnv,
        Self::PassEnv,
        Self::BasePython,
        Self::Description,
        Self::ChangeDir,
        Self::EnvDir,
        Self::IgnoreErrors,
        Self::IgnoreOutcome,
        Self::SkipInstall,
        Self::UseDevelop,
    ];

    /// The key used in the configuration file.
    pub fn key(self) -> &'static str {
        match self {
            Self::Deps => "deps",
            Self::Extras => "extras",
            Self::Commands => "commands",
            Self::SetEnv => "setenv",
            Self::PassEnv => "passenv",
            Self::BasePython => "basepython",
            Self::Description => "description",
            Self::ChangeDir => "changedir",
            Self::EnvDir => "envdir",
            Self::IgnoreErrors => "ignore_errors",
            Self::IgnoreOutcome => "ignore_outcome",
            Self::SkipInstall => "skip_install",
            Self::UseDevelop => "usedevelop",
        }
    }

    pub fn kind(self) -> SettingKind {
        match self {
            Self::Deps | Self::Extras | Self::Commands | Self::SetEnv | Self::PassEnv => {
                SettingKind::List
            }
            Self::BasePython | Self::Description | Self::ChangeDir | Self::EnvDir => {
                SettingKind::Scalar
            }
            Self::IgnoreErrors | Self::IgnoreOutcome | Self::SkipInstall | Self::UseDevelop => {
                SettingKind::Flag
            }
        }
    }
}

/// A `NAME=value` entry of `setenv`. The value keeps its placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: String,
}

/// The final, merged configuration of one environment.
/// Placeholders are still unexpanded; the plan builder substitutes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
    pub name: String,
    pub factors: Vec<String>,
    pub description: String,
    pub basepython: Option<String>,
    pub deps: Vec<String>,
    pub extras: Vec<String>,
    pub setenv: Vec<EnvBinding>,
    pub passenv: Vec<String>,
    pub commands: Vec<String>,
    pub changedir: String,
    pub envdir: String,
    pub ignore_errors: bool,
    pub ignore_outcome: bool,
    pub skip_install: bool,
    pub usedevelop: bool,
}

// --- PLACEHOLDER MODELS ---

/// Placeholders resolved from static paths and the environment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltIn {
    ToxIniDir,
    ToxWorkDir,
    HomeDir,
    EnvName,
    EnvDir,
    EnvBinDir,
    EnvPython,
    EnvSitePackagesDir,
    EnvTmpDir,
    EnvLogDir,
    /// `{:}`, the separator used in `PATH`-like lists.
    PathListSeparator,
    /// `{/}`, the platform path separator.
    PathSeparator,
}

/// A parsed `{...}` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    BuiltIn(BuiltIn),
    /// `{env:NAME}` or `{env:NAME:default}`.
    Env { name: String, default: Option<String> },
    /// `{posargs}` or `{posargs:default}`.
    PosArgs { default: Option<String> },
}

// --- EXECUTION PLAN MODELS ---

/// A single command, fully substituted and tokenized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCommand {
    pub argv: Vec<String>,
    /// The substituted command line, for display.
    pub display: String,
    /// Set by a leading `-`: a non-zero exit does not fail the environment.
    pub ignore_exit: bool,
}

/// The ordered, inert list of commands for one environment.
/// Plans share no state, so each can be run or cancelled on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub env_name: String,
    pub cwd: PathBuf,
    pub envdir: PathBuf,
    /// The interpreter the environment is built for, if known.
    pub interpreter: Option<String>,
    pub bindings: BTreeMap<String, String>,
    /// Substituted dependency specs, for an installer collaborator.
    pub deps: Vec<String>,
    pub commands: Vec<PlannedCommand>,
    /// Keep running after a failed command instead of stopping.
    pub ignore_errors: bool,
    /// Report failures as warnings only.
    pub ignore_outcome: bool,
    pub fingerprint: String,
}
