//! Credential-renewal sidecar injector (`helper` mode)
//!
//! Injects a spiffe-helper sidecar that fetches SVIDs over the Workload API
//! and keeps them renewed on disk for the workload to read. The helper's
//! config file is produced by a template renderer here and delivered through
//! an init container: the rendered text travels in an environment variable,
//! and the init container's only job is to write it to the config volume and
//! exit 0.

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, HTTPGetAction, Pod, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use minijinja::Environment;
use serde::Serialize;
use tracing::info;

use crate::config::InjectorConfig;
use crate::error::Error;
use crate::presence::{ensure_sidecar, ensure_volume, prepend_init_container};

use super::workload::{workload_api_mount, WORKLOAD_API_SOCKET_PATH};
use super::Inject;

/// emptyDir volume holding the rendered helper config
pub const HELPER_CONFIG_VOLUME: &str = "spiffe-helper-config";

/// Mount path of the helper config volume
pub const HELPER_CONFIG_MOUNT_PATH: &str = "/etc/spiffe-helper";

/// File name of the helper config inside the config volume
pub const HELPER_CONFIG_FILE: &str = "helper.conf";

/// Environment variable carrying the rendered config into the init container
pub const HELPER_CONFIG_ENV: &str = "SPIFFE_HELPER_CONFIG";

/// emptyDir volume the helper writes SVIDs into
pub const HELPER_SVID_VOLUME: &str = "spiffe-helper-svids";

/// Mount path of the SVID output volume
pub const HELPER_SVID_DIR: &str = "/spiffe-svids";

/// Name of the helper sidecar container
pub const HELPER_SIDECAR_NAME: &str = "spiffe-helper";

/// Name of the config-writing init container
pub const HELPER_INIT_NAME: &str = "spiffe-helper-init";

/// Port of the helper's health-check listener
pub const HELPER_HEALTH_PORT: i32 = 8081;

const HELPER_READINESS_PATH: &str = "/ready";
const HELPER_LIVENESS_PATH: &str = "/live";

/// spiffe-helper configuration template
///
/// The intermediate-bundle block is emitted only when requested; everything
/// else is fixed so identical params render byte-identical output.
const HELPER_CONFIG_TEMPLATE: &str = r#"agent_address = "{{ agent_address }}"
include_federated_domains = true
{% if include_intermediate_bundle %}add_intermediates_to_bundle = true
{% endif %}cmd = ""
cmd_args = ""
cert_dir = "{{ cert_dir }}"
renew_signal = ""
svid_file_name = "tls.crt"
svid_key_file_name = "tls.key"
svid_bundle_file_name = "ca.pem"
jwt_bundle_file_name = "cert.jwt"
jwt_svids = [{jwt_audience="aud", jwt_svid_file_name="jwt_svid.token"}]
daemon_mode = true
health_checks.listener_enabled = true
"#;

/// Parameters for the helper config renderer
///
/// Empty paths fall back to the fixed defaults (agent socket path, SVID
/// output directory).
#[derive(Clone, Debug, Default, Serialize)]
pub struct HelperConfigParams {
    /// Filesystem path of the agent socket
    pub agent_address: String,
    /// Directory the helper writes certificates into
    pub cert_dir: String,
    /// Emit the intermediate-CA bundle block
    pub include_intermediate_bundle: bool,
}

/// Render the helper config from typed parameters
///
/// Deterministic for identical input. A template error here is a defect in
/// the webhook, never a property of the inbound pod.
pub fn render_helper_config(params: &HelperConfigParams) -> Result<String, Error> {
    let mut params = params.clone();
    if params.agent_address.is_empty() {
        params.agent_address = WORKLOAD_API_SOCKET_PATH.to_string();
    }
    if params.cert_dir.is_empty() {
        params.cert_dir = HELPER_SVID_DIR.to_string();
    }

    let mut env = Environment::new();
    env.add_template("helper-config", HELPER_CONFIG_TEMPLATE)
        .map_err(|e| Error::render(format!("helper config template failed to parse: {e}")))?;

    let template = env
        .get_template("helper-config")
        .map_err(|e| Error::render(format!("helper config template missing: {e}")))?;
    template
        .render(&params)
        .map_err(|e| Error::render(format!("helper config template failed to render: {e}")))
}

/// Injector for the spiffe-helper sidecar
pub struct HelperInjector<'a> {
    config: &'a InjectorConfig,
    include_intermediate_bundle: bool,
}

impl<'a> HelperInjector<'a> {
    /// Create the injector
    pub fn new(config: &'a InjectorConfig, include_intermediate_bundle: bool) -> Self {
        Self {
            config,
            include_intermediate_bundle,
        }
    }

    fn init_container(&self, rendered_config: String) -> Container {
        let config_path = format!("{HELPER_CONFIG_MOUNT_PATH}/{HELPER_CONFIG_FILE}");
        // $$ survives Kubernetes env-var expansion as a literal $, so the
        // shell sees ${SPIFFE_HELPER_CONFIG}.
        let write_cmd = format!(
            "mkdir -p {HELPER_CONFIG_MOUNT_PATH} && printf '%s' \"$${{{HELPER_CONFIG_ENV}}}\" > {config_path}"
        );

        Container {
            name: HELPER_INIT_NAME.to_string(),
            image: Some(self.config.init_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            args: Some(vec![write_cmd]),
            env: Some(vec![EnvVar {
                name: HELPER_CONFIG_ENV.to_string(),
                value: Some(rendered_config),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![VolumeMount {
                name: HELPER_CONFIG_VOLUME.to_string(),
                mount_path: HELPER_CONFIG_MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn sidecar_container(&self) -> Container {
        let http_probe = |path: &str| HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(HELPER_HEALTH_PORT),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        };

        Container {
            name: HELPER_SIDECAR_NAME.to_string(),
            image: Some(self.config.helper_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: Some(vec![
                "-config".to_string(),
                format!("{HELPER_CONFIG_MOUNT_PATH}/{HELPER_CONFIG_FILE}"),
            ]),
            startup_probe: Some(Probe {
                http_get: Some(http_probe(HELPER_READINESS_PATH)),
                initial_delay_seconds: Some(5),
                period_seconds: Some(5),
                failure_threshold: Some(10),
                success_threshold: Some(1),
                timeout_seconds: Some(2),
                ..Default::default()
            }),
            liveness_probe: Some(Probe {
                http_get: Some(http_probe(HELPER_LIVENESS_PATH)),
                initial_delay_seconds: Some(60),
                period_seconds: Some(15),
                failure_threshold: Some(3),
                success_threshold: Some(1),
                timeout_seconds: Some(5),
                ..Default::default()
            }),
            readiness_probe: Some(Probe {
                http_get: Some(http_probe(HELPER_READINESS_PATH)),
                initial_delay_seconds: Some(15),
                period_seconds: Some(10),
                failure_threshold: Some(3),
                success_threshold: Some(1),
                timeout_seconds: Some(5),
                ..Default::default()
            }),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: HELPER_CONFIG_VOLUME.to_string(),
                    mount_path: HELPER_CONFIG_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                },
                VolumeMount {
                    name: HELPER_SVID_VOLUME.to_string(),
                    mount_path: HELPER_SVID_DIR.to_string(),
                    ..Default::default()
                },
                workload_api_mount(),
            ]),
            ..Default::default()
        }
    }
}

impl Inject for HelperInjector<'_> {
    fn apply(&self, pod: &mut Pod) -> Result<(), Error> {
        let rendered = render_helper_config(&HelperConfigParams {
            include_intermediate_bundle: self.include_intermediate_bundle,
            ..Default::default()
        })?;

        let init_container = self.init_container(rendered);
        let sidecar = self.sidecar_container();

        let spec = pod
            .spec
            .as_mut()
            .ok_or_else(|| Error::decode("pod has no spec"))?;

        for name in [HELPER_CONFIG_VOLUME, HELPER_SVID_VOLUME] {
            ensure_volume(
                spec,
                Volume {
                    name: name.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
            );
        }

        // Must run before the workload's own init containers so the config
        // file exists by the time anything else starts.
        if prepend_init_container(spec, init_container) {
            info!(init_container = HELPER_INIT_NAME, "adding helper config init container");
        }

        if ensure_sidecar(&mut spec.containers, sidecar) {
            info!(container = HELPER_SIDECAR_NAME, "adding spiffe-helper sidecar");
        }

        Ok(())
    }
}
