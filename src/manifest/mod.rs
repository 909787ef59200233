//! Compute instance manifests.
//!
//! [`MachineConfig`] turns a job configuration and its cloud-init document
//! into the request body for an instance insert. Building a manifest is pure:
//! the boot image is referenced through its family URL and resolved by the
//! compute service at insert time.

use serde::{Deserialize, Serialize};

use crate::config::JobConfig;

pub mod cloud_init;

pub use cloud_init::CloudInitConfig;

/// Metadata key carrying the cloud-init document.
pub const USER_DATA_KEY: &str = "user-data";

/// Service account attached to the instance.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

const COMPUTE_BETA: &str = "https://www.googleapis.com/compute/beta";
const COMPUTE_V1: &str = "https://www.googleapis.com/compute/v1";

/// Returns the fully qualified machine type URL for `machine_type`.
#[must_use]
pub fn machine_type_url(project: &str, zone: &str, machine_type: &str) -> String {
    format!("{COMPUTE_BETA}/projects/{project}/zones/{zone}/machineTypes/{machine_type}")
}

/// Returns the fully qualified subnetwork URL.
#[must_use]
pub fn subnetwork_url(project: &str, region: &str, subnetwork: &str) -> String {
    format!("{COMPUTE_V1}/projects/{project}/regions/{region}/subnetworks/{subnetwork}")
}

/// Returns the image family reference used as the boot disk source.
#[must_use]
pub fn image_family_url(project: &str, family: &str) -> String {
    format!("projects/{project}/global/images/family/{family}")
}

/// Instance insert request body.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceManifest {
    /// Instance name; equal to the job name.
    pub name: String,
    /// Fully qualified machine type URL.
    pub machine_type: String,
    /// Attached disks; the first is the boot disk.
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces.
    pub network_interfaces: Vec<NetworkInterface>,
    /// Instance metadata.
    pub metadata: Metadata,
    /// Service accounts available to the instance.
    pub service_accounts: Vec<ServiceAccount>,
    /// Scheduling policy.
    pub scheduling: Scheduling,
}

impl InstanceManifest {
    /// Returns the cloud-init document stored under [`USER_DATA_KEY`].
    #[must_use]
    pub fn user_data(&self) -> Option<&str> {
        self.metadata
            .items
            .iter()
            .find(|item| item.key == USER_DATA_KEY)
            .map(|item| item.value.as_str())
    }
}

/// Disk attached to the instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Whether this is the boot disk.
    pub boot: bool,
    /// Whether the disk is deleted together with the instance.
    pub auto_delete: bool,
    /// Parameters for creating the disk.
    pub initialize_params: InitializeParams,
}

/// Source for a newly created disk.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Image (or image family) reference.
    pub source_image: String,
}

/// Network interface of the instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Fully qualified subnetwork URL.
    pub subnetwork: String,
    /// External access configuration.
    pub access_configs: Vec<AccessConfig>,
}

/// External NAT configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessConfig {
    /// Access type, always `ONE_TO_ONE_NAT`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Display name.
    pub name: String,
}

/// Instance metadata entries.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Metadata {
    /// Key/value pairs.
    pub items: Vec<MetadataItem>,
}

/// Single metadata entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MetadataItem {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
}

/// Service account attached to the instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceAccount {
    /// Account email, or `default`.
    pub email: String,
    /// OAuth scopes granted.
    pub scopes: Vec<String>,
}

/// Scheduling policy.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    /// Whether the instance may be preempted.
    pub preemptible: bool,
    /// Whether the instance restarts after a crash.
    pub automatic_restart: bool,
    /// Maintenance behaviour: `MIGRATE` or `TERMINATE`.
    pub on_host_maintenance: String,
}

impl Scheduling {
    /// Preemptible instances may not restart or migrate.
    fn for_preemptible(preemptible: bool) -> Self {
        if preemptible {
            Self {
                preemptible,
                automatic_restart: false,
                on_host_maintenance: String::from("TERMINATE"),
            }
        } else {
            Self {
                preemptible,
                automatic_restart: true,
                on_host_maintenance: String::from("MIGRATE"),
            }
        }
    }
}

/// Everything needed to describe one job instance.
#[derive(Clone, Debug)]
pub struct MachineConfig<'a> {
    vm_name: String,
    cloud_init: &'a CloudInitConfig,
    config: &'a JobConfig,
}

impl<'a> MachineConfig<'a> {
    /// Describes the instance `vm_name` booting with `cloud_init`.
    #[must_use]
    pub fn new(vm_name: impl Into<String>, cloud_init: &'a CloudInitConfig, config: &'a JobConfig) -> Self {
        Self {
            vm_name: vm_name.into(),
            cloud_init,
            config,
        }
    }

    /// Builds the instance insert body.
    #[must_use]
    pub fn to_manifest(&self) -> InstanceManifest {
        let config = self.config;
        InstanceManifest {
            name: self.vm_name.clone(),
            machine_type: machine_type_url(&config.project_id, &config.zone, &config.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                initialize_params: InitializeParams {
                    source_image: image_family_url(
                        &config.disk_image.project,
                        &config.disk_image.family,
                    ),
                },
            }],
            network_interfaces: vec![NetworkInterface {
                subnetwork: subnetwork_url(&config.project_id, &config.region, &config.subnetwork),
                access_configs: vec![AccessConfig {
                    kind: String::from("ONE_TO_ONE_NAT"),
                    name: String::from("External NAT"),
                }],
            }],
            metadata: Metadata {
                items: vec![MetadataItem {
                    key: String::from(USER_DATA_KEY),
                    value: self.cloud_init.render(),
                }],
            },
            service_accounts: vec![ServiceAccount {
                email: String::from(DEFAULT_SERVICE_ACCOUNT),
                scopes: config.scopes.clone(),
            }],
            scheduling: Scheduling::for_preemptible(config.preemptible),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn manifest_serialises_with_camel_case_keys() {
        let config = JobConfig::default();
        let init = CloudInitConfig::new("myname", "echo hi", &config);
        let manifest = MachineConfig::new("myname", &init, &config).to_manifest();

        let json = serde_json::to_value(&manifest)
            .unwrap_or_else(|err| panic!("manifest should serialise: {err}"));
        assert_eq!(json["machineType"], machine_type_url("yourproject-foobar", "europe-west1-b", "n1-standard-1"));
        assert_eq!(json["networkInterfaces"][0]["accessConfigs"][0]["type"], "ONE_TO_ONE_NAT");
        assert_eq!(json["metadata"]["items"][0]["key"], USER_DATA_KEY);
        assert_eq!(json["serviceAccounts"][0]["email"], "default");
        assert_eq!(
            json["disks"][0]["initializeParams"]["sourceImage"],
            "projects/gce-uefi-images/global/images/family/cos-stable"
        );
    }

    #[rstest]
    #[case(false, true, "MIGRATE")]
    #[case(true, false, "TERMINATE")]
    fn scheduling_follows_preemptibility(
        #[case] preemptible: bool,
        #[case] restart: bool,
        #[case] maintenance: &str,
    ) {
        let config = JobConfig::builder()
            .preemptible(preemptible)
            .build()
            .unwrap_or_else(|err| panic!("config should build: {err}"));
        let init = CloudInitConfig::new("job", "true", &config);
        let manifest = MachineConfig::new("job", &init, &config).to_manifest();

        assert_eq!(manifest.scheduling.preemptible, preemptible);
        assert_eq!(manifest.scheduling.automatic_restart, restart);
        assert_eq!(manifest.scheduling.on_host_maintenance, maintenance);
    }

    #[rstest]
    fn user_data_holds_rendered_cloud_init() {
        let config = JobConfig::default();
        let init = CloudInitConfig::new("job", "echo hi", &config);
        let manifest = MachineConfig::new("job", &init, &config).to_manifest();

        assert_eq!(manifest.user_data(), Some(init.render().as_str()));
    }
}
