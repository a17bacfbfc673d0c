//! Injected image configuration
//!
//! Image references for the injected containers. Each has a compiled-in
//! default and an environment-variable override so deployments can pin
//! mirrored or air-gapped registries without a rebuild.

/// Default spiffe-helper sidecar image
pub const DEFAULT_HELPER_IMAGE: &str = "ghcr.io/spiffe/spiffe-helper:0.10.0";

/// Default image for config-writing init containers
pub const DEFAULT_INIT_IMAGE: &str = "cgr.dev/chainguard/busybox:latest";

/// Default Envoy proxy sidecar image
pub const DEFAULT_PROXY_IMAGE: &str = "docker.io/istio/proxyv2:1.26.4";

/// Default debug UI sidecar image
pub const DEFAULT_DEBUG_UI_IMAGE: &str = "ghcr.io/spiffe-inject/debug-ui:latest";

/// Environment variable overriding the helper sidecar image
pub const ENV_HELPER_IMAGE: &str = "SPIFFE_INJECT_HELPER_IMAGE";

/// Environment variable overriding the init container image
pub const ENV_INIT_IMAGE: &str = "SPIFFE_INJECT_INIT_IMAGE";

/// Environment variable overriding the proxy sidecar image
pub const ENV_PROXY_IMAGE: &str = "SPIFFE_INJECT_PROXY_IMAGE";

/// Environment variable overriding the debug UI sidecar image
pub const ENV_DEBUG_UI_IMAGE: &str = "SPIFFE_INJECT_DEBUG_UI_IMAGE";

/// Image references used by the injectors
///
/// Immutable after startup; shared read-only across concurrent admission
/// requests.
#[derive(Clone, Debug)]
pub struct InjectorConfig {
    /// spiffe-helper sidecar image
    pub helper_image: String,
    /// Image for the config-writing init containers
    pub init_image: String,
    /// Envoy proxy sidecar image
    pub proxy_image: String,
    /// Debug UI sidecar image
    pub debug_ui_image: String,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            helper_image: DEFAULT_HELPER_IMAGE.to_string(),
            init_image: DEFAULT_INIT_IMAGE.to_string(),
            proxy_image: DEFAULT_PROXY_IMAGE.to_string(),
            debug_ui_image: DEFAULT_DEBUG_UI_IMAGE.to_string(),
        }
    }
}

impl InjectorConfig {
    /// Build the config from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let or_default = |var: &str, default: &str| {
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        };

        Self {
            helper_image: or_default(ENV_HELPER_IMAGE, DEFAULT_HELPER_IMAGE),
            init_image: or_default(ENV_INIT_IMAGE, DEFAULT_INIT_IMAGE),
            proxy_image: or_default(ENV_PROXY_IMAGE, DEFAULT_PROXY_IMAGE),
            debug_ui_image: or_default(ENV_DEBUG_UI_IMAGE, DEFAULT_DEBUG_UI_IMAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_pinned_images() {
        let config = InjectorConfig::default();
        assert_eq!(config.helper_image, DEFAULT_HELPER_IMAGE);
        assert_eq!(config.init_image, DEFAULT_INIT_IMAGE);
        assert_eq!(config.proxy_image, DEFAULT_PROXY_IMAGE);
        assert_eq!(config.debug_ui_image, DEFAULT_DEBUG_UI_IMAGE);
    }
}
