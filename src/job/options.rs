//! Per-run options layered on top of the job script.

use std::collections::BTreeMap;

use super::JobError;

/// Extra inputs for a single `run`: environment, artifact uploads, and
/// bucket mounts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Environment variables exported to the job container.
    pub env_vars: BTreeMap<String, String>,
    /// Container directories whose contents are copied to a bucket after the
    /// script finishes, keyed by directory.
    pub gcs_target: BTreeMap<String, String>,
    /// Buckets mounted into the container before the script starts, keyed
    /// by bucket name with the mount path as value.
    pub gcs_mounts: BTreeMap<String, String>,
}

impl RunOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Uploads everything under `directory` to `bucket` once the script exits.
    #[must_use]
    pub fn gcs_target(mut self, directory: impl Into<String>, bucket: impl Into<String>) -> Self {
        self.gcs_target.insert(directory.into(), bucket.into());
        self
    }

    /// Mounts `bucket` at `path` inside the container.
    #[must_use]
    pub fn gcs_mount(mut self, bucket: impl Into<String>, path: impl Into<String>) -> Self {
        self.gcs_mounts.insert(bucket.into(), path.into());
        self
    }

    /// Returns `true` when bucket mounts require a privileged container.
    #[must_use]
    pub fn needs_privileged(&self) -> bool {
        !self.gcs_mounts.is_empty()
    }

    /// Rejects values that cannot be expressed in the container env file or
    /// the runner script.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidRunOptions`] describing the first offending
    /// entry.
    pub fn validate(&self) -> Result<(), JobError> {
        for (key, value) in &self.env_vars {
            if !is_env_name(key) {
                return Err(invalid(format!(
                    "environment variable name {key:?} must match [A-Za-z_][A-Za-z0-9_]*"
                )));
            }
            if has_line_break(value) {
                return Err(invalid(format!(
                    "environment variable {key} must not contain line breaks"
                )));
            }
        }
        for (directory, bucket) in &self.gcs_target {
            require_absolute("artifact directory", directory)?;
            require_bucket(bucket)?;
        }
        for (bucket, path) in &self.gcs_mounts {
            require_bucket(bucket)?;
            require_absolute("mount path", path)?;
        }
        Ok(())
    }
}

fn invalid(message: String) -> JobError {
    JobError::InvalidRunOptions(message)
}

fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

fn has_line_break(value: &str) -> bool {
    value.chars().any(|ch| matches!(ch, '\n' | '\r' | '\u{0000}'))
}

fn require_absolute(label: &str, path: &str) -> Result<(), JobError> {
    if !path.starts_with('/') || path.chars().any(char::is_control) {
        return Err(invalid(format!("{label} {path:?} must be an absolute path")));
    }
    Ok(())
}

fn require_bucket(bucket: &str) -> Result<(), JobError> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.'));
    if !valid {
        return Err(invalid(format!("bucket name {bucket:?} is not valid")));
    }
    Ok(())
}
