//! SPIFFE Workload API injector
//!
//! Runs for every gated pod regardless of mode: mounts the SPIRE agent's
//! Workload API socket into every standard container via the SPIFFE CSI
//! driver and points `SPIFFE_ENDPOINT_SOCKET` at it. This is the baseline
//! capability everything else builds on - the helper and proxy sidecars
//! consume the same socket through the same volume.

use k8s_openapi::api::core::v1::{CSIVolumeSource, EnvVar, Pod, Volume, VolumeMount};
use tracing::info;

use crate::error::Error;
use crate::presence::{ensure_env_var, ensure_volume, ensure_volume_mount, has_volume};

use super::Inject;

/// Name of the shared Workload API volume
pub const WORKLOAD_API_VOLUME: &str = "spiffe-workload-api";

/// Mount path of the Workload API volume in every container
pub const WORKLOAD_API_MOUNT_PATH: &str = "/spiffe-workload-api";

/// CSI driver backing the Workload API volume
pub const WORKLOAD_API_CSI_DRIVER: &str = "csi.spiffe.io";

/// Environment variable consumed by SPIFFE-aware SDKs
pub const WORKLOAD_API_SOCKET_ENV: &str = "SPIFFE_ENDPOINT_SOCKET";

/// Socket URI exported through [`WORKLOAD_API_SOCKET_ENV`]
pub const WORKLOAD_API_SOCKET_URI: &str = "unix:///spiffe-workload-api/spire-agent.sock";

/// Plain filesystem path of the agent socket, for processes that take a path
pub const WORKLOAD_API_SOCKET_PATH: &str = "/spiffe-workload-api/spire-agent.sock";

/// The Workload API volume definition
pub fn workload_api_volume() -> Volume {
    Volume {
        name: WORKLOAD_API_VOLUME.to_string(),
        csi: Some(CSIVolumeSource {
            driver: WORKLOAD_API_CSI_DRIVER.to_string(),
            read_only: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The read-only mount of the Workload API volume
pub fn workload_api_mount() -> VolumeMount {
    VolumeMount {
        name: WORKLOAD_API_VOLUME.to_string(),
        mount_path: WORKLOAD_API_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// The socket env var pointed at the agent socket
pub fn workload_api_env_var() -> EnvVar {
    EnvVar {
        name: WORKLOAD_API_SOCKET_ENV.to_string(),
        value: Some(WORKLOAD_API_SOCKET_URI.to_string()),
        ..Default::default()
    }
}

/// Injector mounting the Workload API into every standard container
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkloadApiInjector;

impl Inject for WorkloadApiInjector {
    fn apply(&self, pod: &mut Pod) -> Result<(), Error> {
        let spec = pod
            .spec
            .as_mut()
            .ok_or_else(|| Error::decode("pod has no spec"))?;

        if !has_volume(spec, WORKLOAD_API_VOLUME) {
            info!(volume = WORKLOAD_API_VOLUME, "adding SPIFFE CSI volume");
            ensure_volume(spec, workload_api_volume());
        }

        for container in &mut spec.containers {
            ensure_volume_mount(container, workload_api_mount());
            ensure_env_var(container, workload_api_env_var());
        }

        Ok(())
    }
}
