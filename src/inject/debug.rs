//! Debug UI sidecar injector
//!
//! Opt-in via the debug annotation: appends a small read-only UI container
//! that displays the certificates the workload received over the Workload
//! API. Display only - the UI never issues or rotates anything.

use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod};
use tracing::info;

use crate::config::InjectorConfig;
use crate::error::Error;
use crate::presence::{ensure_sidecar, ensure_volume_mount};

use super::workload::workload_api_mount;
use super::Inject;

/// Name of the debug UI sidecar container
pub const DEBUG_UI_CONTAINER_NAME: &str = "spiffe-debug-ui";

/// Port the debug UI listens on
pub const DEBUG_UI_PORT: i32 = 8000;

/// Injector for the debug UI sidecar
pub struct DebugUiInjector<'a> {
    config: &'a InjectorConfig,
}

impl<'a> DebugUiInjector<'a> {
    /// Create the injector
    pub fn new(config: &'a InjectorConfig) -> Self {
        Self { config }
    }
}

impl Inject for DebugUiInjector<'_> {
    fn apply(&self, pod: &mut Pod) -> Result<(), Error> {
        let spec = pod
            .spec
            .as_mut()
            .ok_or_else(|| Error::decode("pod has no spec"))?;

        let mut sidecar = Container {
            name: DEBUG_UI_CONTAINER_NAME.to_string(),
            image: Some(self.config.debug_ui_image.clone()),
            image_pull_policy: Some("Always".to_string()),
            ports: Some(vec![ContainerPort {
                container_port: DEBUG_UI_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        };
        ensure_volume_mount(&mut sidecar, workload_api_mount());

        if ensure_sidecar(&mut spec.containers, sidecar) {
            info!(container = DEBUG_UI_CONTAINER_NAME, "adding debug UI sidecar");
        }

        Ok(())
    }
}
