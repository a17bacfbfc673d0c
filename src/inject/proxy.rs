//! Transparent proxy sidecar injector (`proxy` mode)
//!
//! Injects an Envoy sidecar bootstrapped against the in-cluster agent's
//! aggregated discovery service, plus an init container that writes the
//! bootstrap file and installs nftables rules redirecting DNS and loopback
//! TCP traffic into the proxy. The redirection rules skip Envoy's own uid
//! and listening ports so the proxy's outbound traffic cannot loop back
//! into itself.
//!
//! The bootstrap document is built from typed structs and serialized with
//! serde_json: struct field order is fixed, so repeated renders with the
//! same parameters are byte-identical. That matters because the document is
//! embedded in an env var and diffed across admission events.

use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, Pod, SecurityContext,
    Volume, VolumeMount,
};
use minijinja::Environment;
use serde::Serialize;
use tracing::info;

use crate::config::InjectorConfig;
use crate::error::Error;
use crate::presence::{ensure_sidecar, ensure_volume, prepend_init_container};

use super::workload::workload_api_mount;
use super::Inject;

/// Name of the Envoy sidecar container
pub const PROXY_SIDECAR_NAME: &str = "envoy-sidecar";

/// emptyDir volume holding the Envoy bootstrap file
pub const PROXY_CONFIG_VOLUME: &str = "envoy-bootstrap";

/// Mount path of the bootstrap volume
pub const PROXY_CONFIG_MOUNT_PATH: &str = "/etc/envoy";

/// Bootstrap file name inside the bootstrap volume
pub const PROXY_CONFIG_FILE: &str = "envoy.json";

/// Environment variable carrying the bootstrap document into the init container
pub const PROXY_CONFIG_ENV: &str = "ENVOY_BOOTSTRAP";

/// Name of the bootstrap-writing init container
pub const PROXY_INIT_NAME: &str = "envoy-bootstrap-init";

/// Envoy's main listener port
pub const PROXY_PORT: u32 = 10000;

/// Envoy's admin port, excluded from redirection
pub const PROXY_ADMIN_PORT: u32 = 9901;

/// Uid Envoy runs as; traffic owned by it bypasses redirection
pub const PROXY_UID: i64 = 1337;

/// Port of Envoy's DNS proxy listener
pub const DNS_PROXY_PORT: u32 = 15053;

/// In-cluster service name of the agent's aggregated discovery service
pub const AGENT_ADS_SERVICE: &str = "spiffe-agent.spiffe-system.svc.cluster.local";

/// Port of the agent's aggregated discovery service
pub const AGENT_ADS_PORT: u32 = 18001;

const XDS_CLUSTER_NAME: &str = "xds_cluster";

/// nftables script installed by the init container
///
/// Written to a file and applied with `nft -f` so the rule set is atomic.
const REDIRECT_SCRIPT_TEMPLATE: &str = r#"if ! command -v nft > /dev/null 2>&1; then
    echo "nftables (nft) is not installed"
    exit 1
fi

cat <<EOF > /tmp/dns_redirect.nft
table inet envoy_proxy {
    chain envoy_output {
        type nat hook output priority dstnat; policy accept;

        # Skip the proxy's own traffic
        meta skuid == {{ proxy_uid }} return

        # DNS redirection
        udp dport 53 counter redirect to :{{ dns_port }} comment "DNS UDP to proxy"
        tcp dport 53 counter redirect to :{{ dns_port }} comment "DNS TCP to proxy"

        # Skip traffic already bound for the proxy's own ports
        tcp dport {{ proxy_port }} return
        tcp dport {{ admin_port }} return

        # Redirect loopback TCP traffic
        ip daddr 127.0.0.1/8 tcp dport 1-65535 counter redirect to :{{ proxy_port }} comment "Loopback IPv4 to proxy"
        ip6 daddr ::1/128 tcp dport 1-65535 counter redirect to :{{ proxy_port }} comment "Loopback IPv6 to proxy"
    }
}
EOF

nft -f /tmp/dns_redirect.nft
echo "DNS and loopback redirection rules applied"
"#;

#[derive(Serialize)]
struct RedirectScriptParams {
    proxy_uid: i64,
    proxy_port: u32,
    admin_port: u32,
    dns_port: u32,
}

/// Render the traffic-redirection script
pub fn render_redirect_script() -> Result<String, Error> {
    let mut env = Environment::new();
    env.add_template("redirect-script", REDIRECT_SCRIPT_TEMPLATE)
        .map_err(|e| Error::render(format!("redirect script template failed to parse: {e}")))?;

    let template = env
        .get_template("redirect-script")
        .map_err(|e| Error::render(format!("redirect script template missing: {e}")))?;
    template
        .render(&RedirectScriptParams {
            proxy_uid: PROXY_UID,
            proxy_port: PROXY_PORT,
            admin_port: PROXY_ADMIN_PORT,
            dns_port: DNS_PROXY_PORT,
        })
        .map_err(|e| Error::render(format!("redirect script template failed to render: {e}")))
}

// =============================================================================
// Envoy bootstrap document
// =============================================================================

/// Parameters for the proxy bootstrap renderer
///
/// Empty fields fall back to the documented defaults.
#[derive(Clone, Debug, Default)]
pub struct ProxyBootstrapParams {
    /// Envoy node id
    pub node_id: String,
    /// Envoy service-cluster name
    pub cluster_name: String,
    /// Admin interface bind address
    pub admin_address: String,
    /// Admin interface port (0 = default)
    pub admin_port: u32,
}

#[derive(Serialize)]
struct EnvoyBootstrap {
    node: EnvoyNode,
    admin: EnvoyAdmin,
    dynamic_resources: DynamicResources,
    static_resources: StaticResources,
}

#[derive(Serialize)]
struct EnvoyNode {
    id: String,
    cluster: String,
}

#[derive(Serialize)]
struct EnvoyAdmin {
    address: EnvoyAddress,
}

#[derive(Serialize)]
struct EnvoyAddress {
    socket_address: SocketAddress,
}

#[derive(Serialize)]
struct SocketAddress {
    address: String,
    port_value: u32,
}

#[derive(Serialize)]
struct DynamicResources {
    ads_config: AdsConfig,
    cds_config: AdsSubscription,
    lds_config: AdsSubscription,
}

#[derive(Serialize)]
struct AdsConfig {
    api_type: &'static str,
    transport_api_version: &'static str,
    grpc_services: Vec<GrpcService>,
    set_node_on_first_message_only: bool,
}

#[derive(Serialize)]
struct GrpcService {
    envoy_grpc: EnvoyGrpc,
}

#[derive(Serialize)]
struct EnvoyGrpc {
    cluster_name: &'static str,
}

#[derive(Serialize)]
struct AdsSubscription {
    resource_api_version: &'static str,
    ads: Empty,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct StaticResources {
    clusters: Vec<EnvoyCluster>,
}

#[derive(Serialize)]
struct EnvoyCluster {
    name: &'static str,
    #[serde(rename = "type")]
    type_: &'static str,
    connect_timeout: &'static str,
    typed_extension_protocol_options: ProtocolOptions,
    load_assignment: LoadAssignment,
}

#[derive(Serialize)]
struct ProtocolOptions {
    #[serde(rename = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions")]
    http: HttpProtocolOptions,
}

#[derive(Serialize)]
struct HttpProtocolOptions {
    #[serde(rename = "@type")]
    type_url: &'static str,
    explicit_http_config: ExplicitHttpConfig,
}

#[derive(Serialize)]
struct ExplicitHttpConfig {
    http2_protocol_options: Empty,
}

#[derive(Serialize)]
struct LoadAssignment {
    cluster_name: &'static str,
    endpoints: Vec<LocalityEndpoints>,
}

#[derive(Serialize)]
struct LocalityEndpoints {
    lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Serialize)]
struct LbEndpoint {
    endpoint: Endpoint,
}

#[derive(Serialize)]
struct Endpoint {
    address: EnvoyAddress,
}

/// Render the Envoy bootstrap document as canonical JSON
///
/// The document describes the node identity, the admin endpoint, ADS-driven
/// dynamic resources, and the single static cluster needed to reach the
/// agent's discovery service.
pub fn render_proxy_bootstrap(params: &ProxyBootstrapParams) -> Result<String, Error> {
    let node_id = non_empty(&params.node_id, "node");
    let cluster_name = non_empty(&params.cluster_name, "cluster");
    let admin_address = non_empty(&params.admin_address, "127.0.0.1");
    let admin_port = if params.admin_port == 0 {
        PROXY_ADMIN_PORT
    } else {
        params.admin_port
    };

    let bootstrap = EnvoyBootstrap {
        node: EnvoyNode {
            id: node_id,
            cluster: cluster_name,
        },
        admin: EnvoyAdmin {
            address: EnvoyAddress {
                socket_address: SocketAddress {
                    address: admin_address,
                    port_value: admin_port,
                },
            },
        },
        dynamic_resources: DynamicResources {
            ads_config: AdsConfig {
                api_type: "GRPC",
                transport_api_version: "V3",
                grpc_services: vec![GrpcService {
                    envoy_grpc: EnvoyGrpc {
                        cluster_name: XDS_CLUSTER_NAME,
                    },
                }],
                set_node_on_first_message_only: true,
            },
            cds_config: AdsSubscription {
                resource_api_version: "V3",
                ads: Empty {},
            },
            lds_config: AdsSubscription {
                resource_api_version: "V3",
                ads: Empty {},
            },
        },
        static_resources: StaticResources {
            clusters: vec![EnvoyCluster {
                name: XDS_CLUSTER_NAME,
                type_: "LOGICAL_DNS",
                connect_timeout: "5s",
                typed_extension_protocol_options: ProtocolOptions {
                    http: HttpProtocolOptions {
                        type_url: "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                        explicit_http_config: ExplicitHttpConfig {
                            http2_protocol_options: Empty {},
                        },
                    },
                },
                load_assignment: LoadAssignment {
                    cluster_name: XDS_CLUSTER_NAME,
                    endpoints: vec![LocalityEndpoints {
                        lb_endpoints: vec![LbEndpoint {
                            endpoint: Endpoint {
                                address: EnvoyAddress {
                                    socket_address: SocketAddress {
                                        address: AGENT_ADS_SERVICE.to_string(),
                                        port_value: AGENT_ADS_PORT,
                                    },
                                },
                            },
                        }],
                    }],
                },
            }],
        },
    };

    serde_json::to_string_pretty(&bootstrap).map_err(Error::from)
}

fn non_empty(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

// =============================================================================
// Injector
// =============================================================================

/// Injector for the transparent Envoy proxy sidecar
pub struct ProxyInjector<'a> {
    config: &'a InjectorConfig,
}

impl<'a> ProxyInjector<'a> {
    /// Create the injector
    pub fn new(config: &'a InjectorConfig) -> Self {
        Self { config }
    }

    fn init_container(&self, bootstrap: String, redirect_script: &str) -> Container {
        let config_path = format!("{PROXY_CONFIG_MOUNT_PATH}/{PROXY_CONFIG_FILE}");
        let write_cmd = format!(
            "mkdir -p {PROXY_CONFIG_MOUNT_PATH} && printf '%s' \"$${{{PROXY_CONFIG_ENV}}}\" > {config_path}"
        );
        let cmd = format!("set -e\n{write_cmd}\n{redirect_script}");

        Container {
            name: PROXY_INIT_NAME.to_string(),
            image: Some(self.config.init_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            args: Some(vec![cmd]),
            env: Some(vec![EnvVar {
                name: PROXY_CONFIG_ENV.to_string(),
                value: Some(bootstrap),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![VolumeMount {
                name: PROXY_CONFIG_VOLUME.to_string(),
                mount_path: PROXY_CONFIG_MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
            // Root with NET_ADMIN/NET_RAW is required to install the
            // nftables rules; the long-running sidecar drops all of this.
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_ADMIN".to_string(), "NET_RAW".to_string()]),
                    ..Default::default()
                }),
                run_as_user: Some(0),
                run_as_non_root: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn sidecar_container(&self) -> Container {
        Container {
            name: PROXY_SIDECAR_NAME.to_string(),
            image: Some(self.config.proxy_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(vec!["envoy".to_string()]),
            args: Some(vec![
                "-c".to_string(),
                format!("{PROXY_CONFIG_MOUNT_PATH}/{PROXY_CONFIG_FILE}"),
            ]),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: PROXY_CONFIG_VOLUME.to_string(),
                    mount_path: PROXY_CONFIG_MOUNT_PATH.to_string(),
                    ..Default::default()
                },
                workload_api_mount(),
            ]),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                run_as_user: Some(PROXY_UID),
                run_as_group: Some(PROXY_UID),
                run_as_non_root: Some(true),
                privileged: Some(false),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ports: Some(vec![ContainerPort {
                container_port: PROXY_PORT as i32,
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

impl Inject for ProxyInjector<'_> {
    fn apply(&self, pod: &mut Pod) -> Result<(), Error> {
        let bootstrap = render_proxy_bootstrap(&ProxyBootstrapParams::default())?;
        let redirect_script = render_redirect_script()?;

        let init_container = self.init_container(bootstrap, &redirect_script);
        let sidecar = self.sidecar_container();

        let spec = pod
            .spec
            .as_mut()
            .ok_or_else(|| Error::decode("pod has no spec"))?;

        ensure_volume(
            spec,
            Volume {
                name: PROXY_CONFIG_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        );

        if prepend_init_container(spec, init_container) {
            info!(init_container = PROXY_INIT_NAME, "adding proxy bootstrap init container");
        }

        if ensure_sidecar(&mut spec.containers, sidecar) {
            info!(container = PROXY_SIDECAR_NAME, "adding Envoy proxy sidecar");
        }

        Ok(())
    }
}
