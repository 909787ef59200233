//! Tests for loading `clash.toml` with environment overrides.

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clash::JobConfig;
use clash::config::{CONFIG_ENV_VAR, ConfigError};
use clash::test_support::EnvGuard;
use rstest::rstest;
use tempfile::TempDir;

const CONFIG_TOML: &str = r#"
project_id = "yourproject-foobar"
image = "eu.gcr.io/yourproject-foobar/foobar:latest"
zone = "europe-west1-b"
region = "europe-west1"
subnetwork = "default-europe-west1"
machine_type = "n1-standard-1"
preemptible = true

[disk_image]
project = "gce-uefi-images"
family = "cos-stable"
"#;

fn write_config(contents: &str) -> (TempDir, Utf8PathBuf) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write("clash.toml", contents)
        .unwrap_or_else(|err| panic!("write config: {err}"));
    let path = root.join("clash.toml");
    (tmp, path)
}

/// Environment variables merged over the configuration file.
const FIELD_VARS: [&str; 12] = [
    "PROJECT_ID",
    "IMAGE",
    "ZONE",
    "REGION",
    "SUBNETWORK",
    "MACHINE_TYPE",
    "PRIVILEGED",
    "PREEMPTIBLE",
    "SCOPES",
    "DISK_IMAGE__PROJECT",
    "DISK_IMAGE__FAMILY",
    "CLASH_CONFIG_PATH",
];

/// Clears every field variable, then applies `set`.
fn override_env<'a>(set: &[(&'a str, &'a str)]) -> Vec<(&'a str, Option<&'a str>)> {
    FIELD_VARS
        .iter()
        .map(|key| {
            let value = set
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| *value);
            (*key, value)
        })
        .collect()
}

#[rstest]
#[tokio::test]
async fn environment_overrides_file_values() {
    let (_tmp, path) = write_config(CONFIG_TOML);
    let _guard = EnvGuard::set_vars(&override_env(&[("MACHINE_TYPE", "strongmachine")])).await;

    let config = JobConfig::load_from_path(&path)
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(config.machine_type, "strongmachine");
    assert_eq!(config.image, "eu.gcr.io/yourproject-foobar/foobar:latest");
    assert!(config.preemptible);
}

#[rstest]
#[tokio::test]
async fn file_values_apply_without_overrides() {
    let (_tmp, path) = write_config(CONFIG_TOML);
    let _guard = EnvGuard::set_vars(&override_env(&[])).await;

    let config = JobConfig::load_from_path(&path)
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(config.machine_type, "n1-standard-1");
    assert_eq!(config.disk_image.family, "cos-stable");
    assert!(!config.privileged);
}

#[rstest]
#[tokio::test]
async fn missing_keys_fall_back_to_defaults() {
    let (_tmp, path) = write_config("machine_type = \"e2-small\"\n");
    let _guard = EnvGuard::set_vars(&override_env(&[])).await;

    let config = JobConfig::load_from_path(&path)
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(
        config,
        JobConfig {
            machine_type: String::from("e2-small"),
            ..JobConfig::default()
        }
    );
}

#[rstest]
#[tokio::test]
async fn discovery_honours_explicit_path_variable() {
    let (_tmp, path) = write_config("zone = \"us-central1-a\"\nregion = \"us-central1\"\n");
    let mut vars = override_env(&[]);
    vars.push((CONFIG_ENV_VAR, Some(path.as_str())));
    let _guard = EnvGuard::set_vars(&vars).await;

    let config = JobConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(config.zone, "us-central1-a");
    assert_eq!(config.region, "us-central1");
}

#[rstest]
#[case("PRIVILEGED", "maybe")]
#[case("PREEMPTIBLE", "2")]
#[tokio::test]
async fn malformed_flag_overrides_are_rejected(#[case] env_var: &str, #[case] value: &str) {
    let (_tmp, path) = write_config(CONFIG_TOML);
    let _guard = EnvGuard::set_vars(&override_env(&[(env_var, value)])).await;

    let err = JobConfig::load_from_path(&path).expect_err("override should be rejected");

    assert!(
        matches!(err, ConfigError::Parse(_)),
        "{env_var}={value} should fail to parse, got {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn unparseable_file_is_rejected() {
    let (_tmp, path) = write_config("machine_type = [\n");
    let _guard = EnvGuard::set_vars(&override_env(&[])).await;

    let err = JobConfig::load_from_path(&path).expect_err("parse should fail");

    assert!(matches!(err, ConfigError::Parse(_)), "expected Parse, got {err:?}");
}

#[rstest]
#[tokio::test]
async fn nested_environment_keys_override_disk_image() {
    let (_tmp, path) = write_config(CONFIG_TOML);
    let _guard =
        EnvGuard::set_vars(&override_env(&[("DISK_IMAGE__FAMILY", "cos-beta")])).await;

    let config = JobConfig::load_from_path(&path)
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(config.disk_image.family, "cos-beta");
    assert_eq!(config.disk_image.project, "gce-uefi-images");
}

#[rstest]
#[tokio::test]
async fn file_scopes_replace_the_defaults() {
    let (_tmp, path) = write_config("scopes = [\"https://www.googleapis.com/auth/pubsub\"]\n");
    let _guard = EnvGuard::set_vars(&override_env(&[])).await;

    let config = JobConfig::load_from_path(&path)
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(config.scopes, ["https://www.googleapis.com/auth/pubsub"]);
}

#[rstest]
#[tokio::test]
async fn blank_override_fails_validation() {
    let (_tmp, path) = write_config(CONFIG_TOML);
    let _guard = EnvGuard::set_vars(&override_env(&[("PROJECT_ID", "  ")])).await;

    let err = JobConfig::load_from_path(&path).expect_err("blank project should fail");

    assert!(err.to_string().contains("PROJECT_ID"), "error: {err}");
}
