//! Loading [`JobConfig`] from `clash.toml` and the environment.
//!
//! `OrthoConfig` merges the defaults, the configuration file, and environment
//! variables named after the fields, in that order of precedence. The file is
//! either given explicitly or located with the discovery search order
//! (`CLASH_CONFIG_PATH`, then the usual per-user and per-project locations).
//! The merged configuration is validated before it is returned.

use std::ffi::OsString;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use tracing::debug;

use super::{ConfigError, JobConfig};

const APP_NAME: &str = "clash";
const CONFIG_PATH_FLAG: &str = "--config-path";
/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "CLASH_CONFIG_PATH";
/// Configuration file name searched for during discovery.
pub const CONFIG_FILE_NAME: &str = "clash.toml";

impl JobConfig {
    /// Loads the configuration stored at `path`, layers the environment on
    /// top, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the file is missing or invalid or
    /// an environment value has the wrong type, and
    /// [`ConfigError::MissingField`] when validation fails.
    pub fn load_from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        let config = Self::load_validated(explicit_path_args(path))?;
        debug!(path = %path, "loaded job configuration");
        Ok(config)
    }

    /// Loads configuration without parsing CLI arguments. Values merge the
    /// defaults, the discovered `clash.toml` (if any), and the environment.
    ///
    /// # Errors
    ///
    /// See [`JobConfig::load_from_path`].
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_validated([OsString::from(APP_NAME)])
    }

    fn load_validated<const N: usize>(args: [OsString; N]) -> Result<Self, ConfigError> {
        let config =
            Self::load_from_iter(args).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn explicit_path_args(path: &Utf8Path) -> [OsString; 3] {
    [
        OsString::from(APP_NAME),
        OsString::from(CONFIG_PATH_FLAG),
        OsString::from(path.as_str()),
    ]
}
