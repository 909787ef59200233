//! Cloud-init document that turns a fresh instance into a job runner.
//!
//! The document creates the operator account and writes three files: the
//! runner script, the job script, and the container env file. The runner
//! executes the job script in the configured container, uploads artifacts,
//! publishes the exit status to the job's status topic, and deletes the
//! instance it runs on.
//!
//! Scalars are emitted as JSON strings, which YAML accepts as double-quoted
//! scalars, so arbitrary script text never disturbs block indentation.

use std::borrow::Cow;

use shell_escape::unix::escape;

use crate::config::JobConfig;
use crate::job::RunOptions;

/// Account cloud-init creates on the instance.
pub const OPERATOR_ACCOUNT: &str = "clash";

/// Directory on the instance holding the generated files.
pub const WORK_DIR: &str = "/var/lib/clash";

/// Image used for `gcloud`/`gsutil` calls made by the runner.
pub const CLOUD_SDK_IMAGE: &str = "google/cloud-sdk:slim";

const RUNNER_FILE: &str = "clash-runner.sh";
const SCRIPT_FILE: &str = "script.sh";
const ENV_FILE: &str = "env";
const CONTAINER_MOUNT: &str = "/clash";

/// Inputs for the cloud-init document of one job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudInitConfig {
    vm_name: String,
    script: String,
    image: String,
    zone: String,
    privileged: bool,
    options: RunOptions,
}

impl CloudInitConfig {
    /// Describes a job named `vm_name` running `script` with the settings in
    /// `config`.
    #[must_use]
    pub fn new(vm_name: impl Into<String>, script: impl Into<String>, config: &JobConfig) -> Self {
        Self {
            vm_name: vm_name.into(),
            script: script.into(),
            image: config.image.clone(),
            zone: config.zone.clone(),
            privileged: config.privileged,
            options: RunOptions::default(),
        }
    }

    /// Attaches per-run options.
    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Name of the instance (and status topic) this document targets.
    #[must_use]
    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    /// Renders the `#cloud-config` document.
    #[must_use]
    pub fn render(&self) -> String {
        let files = [
            (RUNNER_FILE, "0755", self.runner_script()),
            (SCRIPT_FILE, "0644", self.script.clone()),
            (ENV_FILE, "0644", self.env_file()),
        ];

        let mut doc = String::from("#cloud-config\n\nusers:\n");
        doc.push_str(&format!("- name: {}\n", quote(OPERATOR_ACCOUNT)));
        doc.push_str("  uid: 2000\n  groups: [\"docker\"]\n\nwrite_files:\n");
        for (name, permissions, content) in &files {
            doc.push_str(&format!("- path: {}\n", quote(&format!("{WORK_DIR}/{name}"))));
            doc.push_str(&format!("  permissions: {}\n", quote(permissions)));
            doc.push_str("  owner: \"root\"\n");
            doc.push_str(&format!("  content: {}\n", quote(content)));
        }
        doc.push_str("\nruncmd:\n");
        doc.push_str(&format!(
            "- [\"bash\", {}]\n",
            quote(&format!("{WORK_DIR}/{RUNNER_FILE}"))
        ));
        doc
    }

    /// Renders the env file passed to `docker run --env-file`.
    #[must_use]
    pub fn env_file(&self) -> String {
        self.options
            .env_vars
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }

    /// Renders the runner script executed by cloud-init.
    #[must_use]
    pub fn runner_script(&self) -> String {
        let mut script = String::from("#!/bin/bash\nset -u\n\n");
        script.push_str(&format!("readonly JOB_NAME={}\n", sh(&self.vm_name)));
        script.push_str(&format!("readonly ZONE={}\n", sh(&self.zone)));
        script.push_str(&format!("readonly WORK_DIR={}\n", sh(WORK_DIR)));
        script.push_str(&format!(
            "readonly CLOUD_SDK_IMAGE={}\n",
            sh(CLOUD_SDK_IMAGE)
        ));
        script.push_str("\ncloud_sdk() {\n  docker run --rm \"$@\"\n}\n\n");

        for index in 0..self.options.gcs_target.len() {
            script.push_str(&format!("mkdir -p \"$WORK_DIR/artifacts/{index}\"\n"));
        }

        script.push_str(&self.container_command());
        script.push_str("STATUS=$?\n\n");

        for (index, (directory, bucket)) in self.options.gcs_target.iter().enumerate() {
            script.push_str(&upload_command(index, directory, bucket));
        }

        script.push_str(concat!(
            "cloud_sdk \"$CLOUD_SDK_IMAGE\" gcloud pubsub topics publish \"$JOB_NAME\" ",
            "--message \"{\\\"status\\\": $STATUS}\"\n",
            "cloud_sdk \"$CLOUD_SDK_IMAGE\" gcloud compute instances delete \"$JOB_NAME\" ",
            "--zone \"$ZONE\" --quiet\n",
        ));
        script
    }

    fn container_command(&self) -> String {
        let mut command = String::from(
            "docker run --name \"$JOB_NAME\" --log-driver=gcplogs --log-opt gcp-meta-name=\"$JOB_NAME\" \\\n",
        );
        command.push_str(&format!(
            "  --env-file \"$WORK_DIR/{ENV_FILE}\" -v \"$WORK_DIR:{CONTAINER_MOUNT}:ro\" \\\n"
        ));
        if self.privileged || self.options.needs_privileged() {
            command.push_str("  --privileged \\\n");
        }
        for (index, directory) in self.options.gcs_target.keys().enumerate() {
            command.push_str(&format!(
                "  -v \"$WORK_DIR/artifacts/{index}\":{} \\\n",
                sh(directory)
            ));
        }

        let mut entrypoint = String::new();
        for (bucket, path) in &self.options.gcs_mounts {
            entrypoint.push_str(&format!(
                "mkdir -p {path} && gcsfuse --implicit-dirs {bucket} {path} && ",
                path = sh(path),
                bucket = sh(bucket)
            ));
        }
        entrypoint.push_str(&format!("bash {CONTAINER_MOUNT}/{SCRIPT_FILE}"));

        command.push_str(&format!(
            "  {} bash -c {}\n",
            sh(&self.image),
            sh(&entrypoint)
        ));
        command
    }
}

fn upload_command(index: usize, directory: &str, bucket: &str) -> String {
    let host_dir = format!("\"$WORK_DIR/artifacts/{index}\"");
    let copy = format!("gsutil cp -r {}/* gs://{bucket}", sh(directory));
    format!(
        concat!(
            "if [ -n \"$(ls -A {host_dir} 2>/dev/null)\" ]; then\n",
            "  cloud_sdk -v {host_dir}:{directory} \"$CLOUD_SDK_IMAGE\" bash -c {copy}\n",
            "else\n",
            "  echo {missing}\n",
            "fi\n\n",
        ),
        host_dir = host_dir,
        directory = sh(directory),
        copy = sh(&copy),
        missing = sh(&format!("No artifacts found in {directory}")),
    )
}

fn sh(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn config() -> JobConfig {
        JobConfig::builder()
            .image("test-cloudsdk:latest")
            .build()
            .unwrap_or_else(|err| panic!("config fixture should build: {err}"))
    }

    #[rstest]
    fn document_declares_operator_account(config: JobConfig) {
        let doc = CloudInitConfig::new("myname", "echo hi", &config).render();

        assert!(doc.starts_with("#cloud-config\n"));
        assert!(doc.contains("- name: \"clash\""), "doc: {doc}");
    }

    #[rstest]
    fn files_are_written_in_runner_script_env_order(config: JobConfig) {
        let doc = CloudInitConfig::new("job-1", "echo hi", &config).render();

        let runner = doc.find("clash-runner.sh\"").unwrap_or(usize::MAX);
        let script = doc.find("script.sh\"").unwrap_or(usize::MAX);
        let env = doc.find("/var/lib/clash/env\"").unwrap_or(usize::MAX);
        assert!(runner < script && script < env, "unexpected order: {doc}");
    }

    #[rstest]
    fn multiline_scripts_are_quoted_scalars(config: JobConfig) {
        let script = "echo 'hello'\nif [ \"$x\" = true ]; then\n  echo 'world'\nfi\n";
        let doc = CloudInitConfig::new("job-1", script, &config).render();

        assert!(doc.contains(&quote(script)), "doc: {doc}");
        assert!(!doc.contains("\n  echo 'world'"), "script must not leak raw lines");
    }

    #[rstest]
    fn runner_publishes_status_and_deletes_instance(config: JobConfig) {
        let runner = CloudInitConfig::new("clash-job-123", "exit 1", &config).runner_script();

        assert!(runner.contains("readonly JOB_NAME=clash-job-123"));
        assert!(runner.contains("gcloud pubsub topics publish \"$JOB_NAME\""));
        assert!(runner.contains("{\\\"status\\\": $STATUS}"));
        assert!(runner.contains("gcloud compute instances delete \"$JOB_NAME\" --zone \"$ZONE\""));
        assert!(runner.contains("test-cloudsdk:latest"));
    }

    #[rstest]
    fn container_flags_end_in_line_continuations(config: JobConfig) {
        let runner = CloudInitConfig::new("job-1", "true", &config)
            .with_options(RunOptions::new().gcs_target("/out", "bucket"))
            .runner_script();

        assert!(runner.contains("\"$WORK_DIR:/clash:ro\" \\\n"), "runner: {runner}");
        assert!(runner.contains(":/out \\\n  test-cloudsdk:latest bash -c"), "runner: {runner}");
        assert!(runner.contains("mkdir -p \"$WORK_DIR/artifacts/0\"\n"), "runner: {runner}");
    }

    #[rstest]
    fn env_vars_render_as_env_file(config: JobConfig) {
        let init = CloudInitConfig::new("job", "echo \"$MESSAGE\"", &config)
            .with_options(RunOptions::new().env_var("MESSAGE", "foobar").env_var("A", "b"));

        assert_eq!(init.env_file(), "A=b\nMESSAGE=foobar\n");
    }

    #[rstest]
    fn targets_upload_with_gsutil(config: JobConfig) {
        let init = CloudInitConfig::new("job", "touch /tmp/artifacts/foo", &config)
            .with_options(RunOptions::new().gcs_target("/tmp/artifacts", "mybucket"));
        let runner = init.runner_script();

        assert!(runner.contains("gsutil cp -r /tmp/artifacts/* gs://mybucket"), "runner: {runner}");
        assert!(runner.contains("No artifacts found in /tmp/artifacts"), "runner: {runner}");
        assert!(runner.contains("\"$WORK_DIR/artifacts/0\":/tmp/artifacts"), "runner: {runner}");
    }

    #[rstest]
    fn mounts_use_gcsfuse_and_force_privileged(config: JobConfig) {
        let init = CloudInitConfig::new("job", "ls /mnt/static", &config)
            .with_options(RunOptions::new().gcs_mount("mybucket", "/mnt/static"));
        let runner = init.runner_script();

        assert!(runner.contains("gcsfuse --implicit-dirs mybucket /mnt/static"), "runner: {runner}");
        assert!(runner.contains("--privileged"), "runner: {runner}");
    }

    #[rstest]
    fn unprivileged_by_default(config: JobConfig) {
        let runner = CloudInitConfig::new("job", "true", &config).runner_script();
        assert!(!runner.contains("--privileged"));
    }
}
