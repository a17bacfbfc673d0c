//! Capability injectors
//!
//! Each injectable capability is a variant of the closed [`Capability`] enum
//! and owns one [`Inject`] implementation. Mode validation, injection, and
//! config rendering are all dispatched from the same variant, so adding a
//! capability cannot wire one without the others.
//!
//! Injectors are idempotent: every resource they add goes through the
//! presence checks in [`crate::presence`], so applying an injector to a pod
//! that already carries its resources changes nothing.

pub mod debug;
pub mod helper;
pub mod proxy;
pub mod workload;

use k8s_openapi::api::core::v1::Pod;

use crate::annotations::{AnnotationGate, MODE_ANNOTATION};
use crate::config::InjectorConfig;
use crate::error::Error;

/// Common contract for all capability injectors
///
/// `apply` mutates the pod in place and must be idempotent. Any error is
/// fatal to the whole admission request; injectors never leave a partial
/// mutation visible to the caller because the orchestrator works on a
/// discarded copy.
pub trait Inject {
    /// Apply this capability's mutations to the pod
    fn apply(&self, pod: &mut Pod) -> Result<(), Error>;
}

/// An injectable capability, selected via the mode annotation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Credential-renewal sidecar (spiffe-helper)
    Helper,
    /// Transparent Envoy proxy sidecar
    Proxy,
}

impl Capability {
    /// All recognized capabilities, in documentation order
    pub const ALL: [Capability; 2] = [Capability::Helper, Capability::Proxy];

    /// The annotation token selecting this capability
    pub fn token(&self) -> &'static str {
        match self {
            Capability::Helper => "helper",
            Capability::Proxy => "proxy",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }

    /// Parse mode tokens into a deduplicated capability list
    ///
    /// Order follows first declaration. Any unrecognized token fails the
    /// whole request (fail-closed): the error enumerates every invalid
    /// token and the allowed set so the user can correct the annotation.
    pub fn parse_modes(tokens: &[String]) -> Result<Vec<Capability>, Error> {
        let mut capabilities = Vec::new();
        let mut invalid = Vec::new();

        for token in tokens {
            match Capability::from_token(token) {
                Some(capability) => {
                    if !capabilities.contains(&capability) {
                        capabilities.push(capability);
                    }
                }
                None => {
                    if !invalid.contains(token) {
                        invalid.push(token.clone());
                    }
                }
            }
        }

        if !invalid.is_empty() {
            let allowed: Vec<&str> = Self::ALL.iter().map(|c| c.token()).collect();
            return Err(Error::validation(format!(
                "invalid mode token(s) {invalid:?} in annotation {MODE_ANNOTATION}; \
                 allowed values are {allowed:?}"
            )));
        }

        Ok(capabilities)
    }

    /// The injector owned by this capability
    pub fn injector<'a>(
        &self,
        config: &'a InjectorConfig,
        gate: &AnnotationGate,
    ) -> Box<dyn Inject + 'a> {
        match self {
            Capability::Helper => Box::new(helper::HelperInjector::new(
                config,
                gate.include_intermediate_bundle,
            )),
            Capability::Proxy => Box::new(proxy::ProxyInjector::new(config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn parse_modes_accepts_known_tokens() {
        let modes = Capability::parse_modes(&tokens(&["helper", "proxy"])).unwrap();
        assert_eq!(modes, vec![Capability::Helper, Capability::Proxy]);
    }

    #[test]
    fn parse_modes_deduplicates_preserving_order() {
        let modes = Capability::parse_modes(&tokens(&["proxy", "helper", "proxy"])).unwrap();
        assert_eq!(modes, vec![Capability::Proxy, Capability::Helper]);
    }

    #[test]
    fn parse_modes_empty_is_empty() {
        assert!(Capability::parse_modes(&[]).unwrap().is_empty());
    }

    #[test]
    fn parse_modes_rejects_unknown_tokens() {
        let err = Capability::parse_modes(&tokens(&["helper", "bogus"])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bogus"), "message must name the bad token: {msg}");
        assert!(msg.contains("helper") && msg.contains("proxy"), "message must list the allowed set: {msg}");
        assert!(msg.contains(MODE_ANNOTATION), "message must name the annotation: {msg}");
    }

    #[test]
    fn parse_modes_is_fail_closed_not_fail_partial() {
        // One bad token invalidates the whole request even when valid
        // tokens are present.
        assert!(Capability::parse_modes(&tokens(&["helper", "sidecar", "proxy"])).is_err());
    }

    #[test]
    fn capability_tokens_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(Capability::from_token(capability.token()), Some(capability));
        }
        assert_eq!(Capability::from_token("HELPER"), None);
    }
}
