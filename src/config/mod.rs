//! Job configuration: defaults, builder, and validation.
//!
//! Values come from `clash.toml` with environment variables layered on top,
//! merged by `OrthoConfig` (see [`loader`]). A [`JobConfig`] is immutable
//! once a job has been constructed from it.

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

pub use loader::{CONFIG_ENV_VAR, CONFIG_FILE_NAME};

/// Default OAuth scopes granted to the job's service account.
pub const DEFAULT_SCOPES: [&str; 6] = [
    "https://www.googleapis.com/auth/bigquery",
    "https://www.googleapis.com/auth/compute",
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/monitoring",
    "https://www.googleapis.com/auth/pubsub",
];

/// Boot disk image reference resolved through an image family.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DiskImage {
    /// Project that publishes the image family.
    pub project: String,
    /// Image family name; the newest image in the family is used.
    pub family: String,
}

impl Default for DiskImage {
    fn default() -> Self {
        Self {
            project: String::from("gce-uefi-images"),
            family: String::from("cos-stable"),
        }
    }
}

/// Settings shared by every job launched from one configuration.
///
/// Each field can be overridden by the environment variable of the same name
/// in upper case (`MACHINE_TYPE`, `PREEMPTIBLE`, ...); nested fields use a
/// double underscore (`DISK_IMAGE__FAMILY`). Missing values fall back to
/// [`JobConfig::default`].
#[derive(Clone, Debug, Deserialize, Eq, OrthoConfig, PartialEq)]
#[ortho_config(discovery(
    app_name = "clash",
    env_var = "CLASH_CONFIG_PATH",
    config_file_name = "clash.toml",
    dotfile_name = ".clash.toml",
    project_file_name = "clash.toml"
))]
#[serde(default)]
pub struct JobConfig {
    /// Project that owns the instance, topics, subscriptions, and sinks.
    pub project_id: String,
    /// Container image that runs the job script.
    pub image: String,
    /// Compute zone for the instance.
    pub zone: String,
    /// Region containing `subnetwork`.
    pub region: String,
    /// Subnetwork the instance attaches to.
    pub subnetwork: String,
    /// Machine type (for example `n1-standard-1`).
    pub machine_type: String,
    /// Boot disk image family.
    #[ortho_config(skip_cli)]
    pub disk_image: DiskImage,
    /// Whether the job container runs privileged.
    #[ortho_config(skip_cli)]
    pub privileged: bool,
    /// Whether the instance is preemptible.
    #[ortho_config(skip_cli)]
    pub preemptible: bool,
    /// OAuth scopes granted to the instance's service account.
    #[ortho_config(skip_cli, merge_strategy = "replace")]
    pub scopes: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            project_id: String::from("yourproject-foobar"),
            image: String::from("google/cloud-sdk"),
            zone: String::from("europe-west1-b"),
            region: String::from("europe-west1"),
            subnetwork: String::from("default-europe-west1"),
            machine_type: String::from("n1-standard-1"),
            disk_image: DiskImage::default(),
            privileged: false,
            preemptible: false,
            scopes: DEFAULT_SCOPES.iter().map(|scope| (*scope).to_owned()).collect(),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: Option<&'static str>,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: Option<&'static str>,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl JobConfig {
    /// Starts a builder seeded with the default configuration.
    #[must_use]
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder::new()
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if !value.trim().is_empty() {
            return Ok(());
        }
        let message = metadata.env_var.map_or_else(
            || {
                format!(
                    "missing {}: add {} to {CONFIG_FILE_NAME}",
                    metadata.description, metadata.toml_key
                )
            },
            |env_var| {
                format!(
                    "missing {}: set {env_var} or add {} to {CONFIG_FILE_NAME}",
                    metadata.description, metadata.toml_key
                )
            },
        );
        Err(ConfigError::MissingField(message))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                self.project_id.as_str(),
                FieldMetadata::new("project ID", Some("PROJECT_ID"), "project_id"),
            ),
            (
                self.image.as_str(),
                FieldMetadata::new("container image", Some("IMAGE"), "image"),
            ),
            (
                self.zone.as_str(),
                FieldMetadata::new("compute zone", Some("ZONE"), "zone"),
            ),
            (
                self.region.as_str(),
                FieldMetadata::new("compute region", Some("REGION"), "region"),
            ),
            (
                self.subnetwork.as_str(),
                FieldMetadata::new("subnetwork", Some("SUBNETWORK"), "subnetwork"),
            ),
            (
                self.machine_type.as_str(),
                FieldMetadata::new("machine type", Some("MACHINE_TYPE"), "machine_type"),
            ),
            (
                self.disk_image.project.as_str(),
                FieldMetadata::new("disk image project", None, "disk_image.project"),
            ),
            (
                self.disk_image.family.as_str(),
                FieldMetadata::new("disk image family", None, "disk_image.family"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        Ok(())
    }
}

/// Builder for [`JobConfig`] starting from the defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

macro_rules! string_setter {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(mut self, value: impl Into<String>) -> Self {
            self.config.$name = value.into();
            self
        }
    };
}

impl JobConfigBuilder {
    /// Creates a builder holding the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    string_setter!(
        /// Sets the project identifier.
        project_id
    );
    string_setter!(
        /// Sets the container image.
        image
    );
    string_setter!(
        /// Sets the compute zone.
        zone
    );
    string_setter!(
        /// Sets the compute region.
        region
    );
    string_setter!(
        /// Sets the subnetwork.
        subnetwork
    );
    string_setter!(
        /// Sets the machine type.
        machine_type
    );

    /// Sets the boot disk image family.
    #[must_use]
    pub fn disk_image(mut self, project: impl Into<String>, family: impl Into<String>) -> Self {
        self.config.disk_image = DiskImage {
            project: project.into(),
            family: family.into(),
        };
        self
    }

    /// Sets whether the container runs privileged.
    #[must_use]
    pub const fn privileged(mut self, value: bool) -> Self {
        self.config.privileged = value;
        self
    }

    /// Sets whether the instance is preemptible.
    #[must_use]
    pub const fn preemptible(mut self, value: bool) -> Self {
        self.config.preemptible = value;
        self
    }

    /// Replaces the OAuth scope list.
    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Builds and validates the configuration, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn build(self) -> Result<JobConfig, ConfigError> {
        let mut config = self.config;
        for field in [
            &mut config.project_id,
            &mut config.image,
            &mut config.zone,
            &mut config.region,
            &mut config.subnetwork,
            &mut config.machine_type,
        ] {
            *field = field.trim().to_owned();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader: unreadable or invalid
    /// files, and environment values of the wrong type.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
