//! Annotation surface and opt-in gate
//!
//! All mutation is gated on pod annotations. The gate is deliberately
//! strict: the enable annotation must be present with the exact string
//! `"true"` - no boolean parsing, no case folding. Pods without the
//! annotation (the overwhelming majority of admission traffic) short-circuit
//! to an allowed-unchanged response with zero mutation.

use k8s_openapi::api::core::v1::Pod;

/// Gates all mutation; must be exactly `"true"`
pub const ENABLED_ANNOTATION: &str = "spiffe-inject.io/enabled";

/// Comma-separated capability tokens (`helper`, `proxy`)
pub const MODE_ANNOTATION: &str = "spiffe-inject.io/mode";

/// Injects the debug UI sidecar when exactly `"true"`
pub const DEBUG_ANNOTATION: &str = "spiffe-inject.io/debug";

/// Toggles the intermediate-bundle block in the helper config
pub const INCLUDE_INTERMEDIATE_ANNOTATION: &str =
    "spiffe-inject.io/include-intermediate-bundle";

/// Parsed view of the injection-related pod annotations
///
/// Construction never fails: unknown mode tokens are kept verbatim here and
/// rejected later by [`crate::inject::Capability::parse_modes`], so that the
/// denial message can enumerate exactly what the user wrote.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnnotationGate {
    /// Whether injection is enabled at all
    pub enabled: bool,
    /// Raw mode tokens, trimmed, empties dropped, declaration order kept
    pub mode_tokens: Vec<String>,
    /// Whether the debug UI sidecar was requested
    pub debug: bool,
    /// Whether the helper config should include intermediate CAs in the bundle
    pub include_intermediate_bundle: bool,
}

impl AnnotationGate {
    /// Read the gate from a pod's annotations
    pub fn from_pod(pod: &Pod) -> Self {
        let annotations = pod.metadata.annotations.as_ref();
        let value = |key: &str| annotations.and_then(|a| a.get(key)).map(String::as_str);

        Self {
            enabled: value(ENABLED_ANNOTATION) == Some("true"),
            mode_tokens: value(MODE_ANNOTATION).map(split_modes).unwrap_or_default(),
            debug: value(DEBUG_ANNOTATION) == Some("true"),
            include_intermediate_bundle: value(INCLUDE_INTERMEDIATE_ANNOTATION) == Some("true"),
        }
    }
}

/// Split a mode annotation value into trimmed, non-empty tokens
fn split_modes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
