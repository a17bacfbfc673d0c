//! Mutation engine
//!
//! Single-pass orchestration of one admission event: annotation gate →
//! Workload API injection → mode validation → capability injectors →
//! JSON patch against the original serialization.
//!
//! The engine never touches the inbound object - all mutation happens on a
//! clone, and the only externally visible output is the patch. A request
//! either produces an outcome or an error; there is no partially-mutated
//! middle ground.

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use crate::annotations::{AnnotationGate, ENABLED_ANNOTATION};
use crate::config::InjectorConfig;
use crate::error::Error;
use crate::inject::{debug::DebugUiInjector, workload::WorkloadApiInjector, Capability, Inject};

/// Result of one mutation pass
#[derive(Debug)]
pub enum MutationOutcome {
    /// Allowed without modification
    Unchanged {
        /// Why nothing was changed (gate disabled, or already mutated)
        reason: &'static str,
    },
    /// Allowed with a patch transforming the original object
    Patched(json_patch::Patch),
    /// Denied; the pod object is untouched
    Denied {
        /// Actionable message naming the offending annotation value
        reason: String,
    },
}

/// The mutation engine
///
/// Stateless across requests: holds only immutable configuration, so a
/// single instance is shared by all concurrent admission handlers.
#[derive(Clone, Debug, Default)]
pub struct MutationEngine {
    config: InjectorConfig,
}

impl MutationEngine {
    /// Create an engine with the given injector configuration
    pub fn new(config: InjectorConfig) -> Self {
        Self { config }
    }

    /// Run one mutation pass over the inbound pod
    ///
    /// Errors map to admission response classes: `Decode` to bad-request,
    /// everything else to an internal error. Denials are an `Ok` outcome -
    /// they are the engine working as intended, not a failure.
    pub fn mutate(&self, pod: &Pod) -> Result<MutationOutcome, Error> {
        let gate = AnnotationGate::from_pod(pod);

        if !gate.enabled {
            debug!(
                annotation = ENABLED_ANNOTATION,
                "injection not requested, allowing unchanged"
            );
            return Ok(MutationOutcome::Unchanged {
                reason: "injection not requested",
            });
        }

        let original = serde_json::to_value(pod)?;
        let mut mutated = pod.clone();

        // Baseline capability, independent of mode: every gated pod gets
        // the Workload API socket.
        WorkloadApiInjector.apply(&mut mutated)?;

        // Validate the mode list before any capability-specific injection.
        // A denial discards the working copy, leaving the pod untouched.
        let capabilities = match Capability::parse_modes(&gate.mode_tokens) {
            Ok(capabilities) => capabilities,
            Err(Error::Validation(reason)) => {
                info!(%reason, "denying admission");
                return Ok(MutationOutcome::Denied { reason });
            }
            Err(e) => return Err(e),
        };

        for capability in &capabilities {
            debug!(mode = capability.token(), "applying capability injector");
            capability
                .injector(&self.config, &gate)
                .apply(&mut mutated)?;
        }

        if gate.debug {
            DebugUiInjector::new(&self.config).apply(&mut mutated)?;
        }

        let mutated_value = serde_json::to_value(&mutated)?;
        let patch = json_patch::diff(&original, &mutated_value);

        if patch.0.is_empty() {
            return Ok(MutationOutcome::Unchanged {
                reason: "pod already carries all requested injections",
            });
        }

        info!(
            modes = ?capabilities.iter().map(|c| c.token()).collect::<Vec<_>>(),
            patch_ops = patch.0.len(),
            "mutation complete"
        );
        Ok(MutationOutcome::Patched(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{DEBUG_ANNOTATION, MODE_ANNOTATION};
    use crate::inject::debug::DEBUG_UI_CONTAINER_NAME;
    use crate::inject::helper::{HELPER_INIT_NAME, HELPER_SIDECAR_NAME};
    use crate::inject::proxy::PROXY_SIDECAR_NAME;
    use crate::inject::workload::{WORKLOAD_API_SOCKET_ENV, WORKLOAD_API_VOLUME};
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_pod(annotations: &[(&str, &str)], containers: &[&str]) -> Pod {
        let annotations: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn apply_patch(pod: &Pod, patch: &json_patch::Patch) -> Pod {
        let mut value = serde_json::to_value(pod).unwrap();
        json_patch::patch(&mut value, &patch.0).unwrap();
        serde_json::from_value(value).unwrap()
    }

    fn engine() -> MutationEngine {
        MutationEngine::default()
    }

    #[test]
    fn disabled_gate_is_a_noop() {
        // Mode annotations alone must not trigger anything.
        let pod = make_pod(&[(MODE_ANNOTATION, "helper")], &["app"]);
        let outcome = engine().mutate(&pod).unwrap();
        assert!(matches!(outcome, MutationOutcome::Unchanged { .. }));
    }

    #[test]
    fn non_exact_enable_values_are_disabled() {
        for value in ["True", "false", "yes", ""] {
            let pod = make_pod(&[(ENABLED_ANNOTATION, value)], &["app"]);
            let outcome = engine().mutate(&pod).unwrap();
            assert!(
                matches!(outcome, MutationOutcome::Unchanged { .. }),
                "value {value:?} must not enable mutation"
            );
        }
    }

    /// Scenario A: enabled, no mode - one new volume, every container gains
    /// one mount and one env var, container counts otherwise unchanged.
    #[test]
    fn enabled_without_mode_injects_workload_api_only() {
        let pod = make_pod(&[(ENABLED_ANNOTATION, "true")], &["app", "logger"]);
        let MutationOutcome::Patched(patch) = engine().mutate(&pod).unwrap() else {
            panic!("expected a patch");
        };

        let mutated = apply_patch(&pod, &patch);
        let spec = mutated.spec.unwrap();

        assert_eq!(spec.volumes.as_ref().unwrap().len(), 1);
        assert_eq!(spec.volumes.as_ref().unwrap()[0].name, WORKLOAD_API_VOLUME);
        assert_eq!(spec.containers.len(), 2, "no containers added");
        assert!(spec.init_containers.is_none(), "no init containers added");

        for container in &spec.containers {
            assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 1);
            assert_eq!(container.env.as_ref().unwrap().len(), 1);
            assert_eq!(container.env.as_ref().unwrap()[0].name, WORKLOAD_API_SOCKET_ENV);
        }
    }

    /// Scenario B: repeated tokens deduplicate.
    #[test]
    fn duplicate_mode_tokens_equal_single_token() {
        let once = make_pod(
            &[(ENABLED_ANNOTATION, "true"), (MODE_ANNOTATION, "helper")],
            &["app"],
        );
        let twice = make_pod(
            &[(ENABLED_ANNOTATION, "true"), (MODE_ANNOTATION, "helper,helper")],
            &["app"],
        );

        let MutationOutcome::Patched(patch_once) = engine().mutate(&once).unwrap() else {
            panic!("expected a patch");
        };
        let MutationOutcome::Patched(patch_twice) = engine().mutate(&twice).unwrap() else {
            panic!("expected a patch");
        };

        assert_eq!(
            serde_json::to_value(apply_patch(&once, &patch_once).spec).unwrap(),
            serde_json::to_value(apply_patch(&twice, &patch_twice).spec).unwrap()
        );
    }

    /// Scenario C: an invalid token denies the whole request.
    #[test]
    fn invalid_mode_token_denies() {
        let pod = make_pod(
            &[(ENABLED_ANNOTATION, "true"), (MODE_ANNOTATION, "helper,bogus")],
            &["app"],
        );

        let MutationOutcome::Denied { reason } = engine().mutate(&pod).unwrap() else {
            panic!("expected denial");
        };
        assert!(reason.contains("bogus"), "denial must name the token: {reason}");
    }

    #[test]
    fn helper_mode_injects_sidecar_and_first_init_container() {
        let mut pod = make_pod(
            &[(ENABLED_ANNOTATION, "true"), (MODE_ANNOTATION, "helper")],
            &["app"],
        );
        pod.spec.as_mut().unwrap().init_containers = Some(vec![Container {
            name: "user-migrations".to_string(),
            ..Default::default()
        }]);

        let MutationOutcome::Patched(patch) = engine().mutate(&pod).unwrap() else {
            panic!("expected a patch");
        };
        let spec = apply_patch(&pod, &patch).spec.unwrap();

        let init = spec.init_containers.unwrap();
        assert_eq!(init[0].name, HELPER_INIT_NAME, "helper init must run first");
        assert_eq!(init[1].name, "user-migrations");
        assert!(spec.containers.iter().any(|c| c.name == HELPER_SIDECAR_NAME));
    }

    #[test]
    fn both_modes_compose() {
        let pod = make_pod(
            &[(ENABLED_ANNOTATION, "true"), (MODE_ANNOTATION, "helper,proxy")],
            &["app"],
        );
        let MutationOutcome::Patched(patch) = engine().mutate(&pod).unwrap() else {
            panic!("expected a patch");
        };
        let spec = apply_patch(&pod, &patch).spec.unwrap();

        assert!(spec.containers.iter().any(|c| c.name == HELPER_SIDECAR_NAME));
        assert!(spec.containers.iter().any(|c| c.name == PROXY_SIDECAR_NAME));
        assert_eq!(spec.init_containers.unwrap().len(), 2);
    }

    #[test]
    fn debug_annotation_adds_ui_sidecar() {
        let pod = make_pod(
            &[(ENABLED_ANNOTATION, "true"), (DEBUG_ANNOTATION, "true")],
            &["app"],
        );
        let MutationOutcome::Patched(patch) = engine().mutate(&pod).unwrap() else {
            panic!("expected a patch");
        };
        let spec = apply_patch(&pod, &patch).spec.unwrap();
        assert!(spec
            .containers
            .iter()
            .any(|c| c.name == DEBUG_UI_CONTAINER_NAME));
    }

    /// Idempotence: mutating the patched object again yields no patch.
    #[test]
    fn second_pass_is_unchanged_for_every_mode_combination() {
        for mode in [None, Some("helper"), Some("proxy"), Some("helper,proxy")] {
            let mut annotations = vec![(ENABLED_ANNOTATION, "true"), (DEBUG_ANNOTATION, "true")];
            if let Some(mode) = mode {
                annotations.push((MODE_ANNOTATION, mode));
            }
            let pod = make_pod(&annotations, &["app", "logger"]);

            let MutationOutcome::Patched(patch) = engine().mutate(&pod).unwrap() else {
                panic!("expected a patch for mode {mode:?}");
            };
            let mutated = apply_patch(&pod, &patch);

            let outcome = engine().mutate(&mutated).unwrap();
            assert!(
                matches!(outcome, MutationOutcome::Unchanged { .. }),
                "second pass for mode {mode:?} must be a no-op"
            );
        }
    }

    /// No-duplicate invariant over the full mutation output.
    #[test]
    fn mutated_pod_has_no_duplicate_names() {
        fn assert_unique(names: Vec<&str>, what: &str) {
            let mut sorted = names.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), names.len(), "duplicate {what}: {names:?}");
        }

        let pod = make_pod(
            &[
                (ENABLED_ANNOTATION, "true"),
                (MODE_ANNOTATION, "helper,proxy,helper"),
                (DEBUG_ANNOTATION, "true"),
            ],
            &["app"],
        );
        let MutationOutcome::Patched(patch) = engine().mutate(&pod).unwrap() else {
            panic!("expected a patch");
        };
        let spec = apply_patch(&pod, &patch).spec.unwrap();

        assert_unique(
            spec.volumes.as_deref().unwrap_or_default().iter().map(|v| v.name.as_str()).collect(),
            "volumes",
        );
        assert_unique(
            spec.containers.iter().map(|c| c.name.as_str()).collect(),
            "containers",
        );
        assert_unique(
            spec.init_containers
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|c| c.name.as_str())
                .collect(),
            "init containers",
        );
        for container in spec.containers.iter().chain(spec.init_containers.as_deref().unwrap_or_default()) {
            assert_unique(
                container
                    .volume_mounts
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect(),
                "volume mounts",
            );
        }
    }

    #[test]
    fn pod_without_spec_is_a_decode_error() {
        let mut pod = make_pod(&[(ENABLED_ANNOTATION, "true")], &[]);
        pod.spec = None;
        let err = engine().mutate(&pod).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
