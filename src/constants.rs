// src/constants.rs

/// The configuration file searched for when no explicit path is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "tox.ini";

/// The section holding global matrix settings (`envlist`, `toxworkdir`, ...).
pub const GLOBAL_SECTION: &str = "tox";

/// The base section whose settings apply to every environment.
pub const BASE_SECTION: &str = "testenv";

/// The prefix of per-environment override sections (`[testenv:lint]`).
pub const OVERRIDE_SECTION_PREFIX: &str = "testenv:";

/// The work directory used when `toxworkdir` is not configured, relative to `toxinidir`.
pub const DEFAULT_WORKDIR: &str = ".tox";

/// The name of the user settings file (inside the user config dir).
pub const SETTINGS_FILENAME: &str = "settings.toml";

/// The name of the directory holding envmatrix user configuration.
pub const APP_DIR_NAME: &str = "envmatrix";

/// The name of the per-environment state record written after a run (inside `envdir`).
pub const STATE_FILENAME: &str = ".envmatrix-state.bin";

/// Environment variable selecting environments when `-e` is not given.
pub const SELECTION_ENV_VAR: &str = "ENVMATRIX_ENV";

/// The selection keyword meaning "every known environment".
pub const SELECT_ALL_KEYWORD: &str = "ALL";

/// Maximum nesting of `{[section]key}` references before giving up.
pub const MAX_REFERENCE_DEPTH: usize = 16;

/// Variables passed from the outer environment into every command environment.
pub const DEFAULT_PASSENV: &[&str] = &[
    "PATH",
    "LANG",
    "LANGUAGE",
    "LD_LIBRARY_PATH",
    "TMPDIR",
    "HOME",
    "PIP_INDEX_URL",
    "PIP_EXTRA_INDEX_URL",
];

/// Additional variables passed through on Windows.
pub const WINDOWS_PASSENV: &[&str] = &["SYSTEMROOT", "COMSPEC", "PATHEXT", "TEMP", "TMP"];

/// Exit code for a command (test) failure.
pub const EXIT_TEST_FAILURE: i32 = 1;

/// Exit code for a configuration (resolution) failure.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code used when the run was interrupted.
pub const EXIT_INTERRUPTED: i32 = 130;
