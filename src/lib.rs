//! spiffe-inject - mutating admission webhook for SPIFFE workload identity
//!
//! spiffe-inject intercepts pod CREATE/UPDATE admission requests and rewrites
//! the pod spec so that workloads receive a SPIFFE identity (X.509/JWT SVIDs
//! delivered by a SPIRE agent) without the workload's own code being
//! identity-aware.
//!
//! Opt-in is annotation-driven: a pod annotated with
//! `spiffe-inject.io/enabled: "true"` gets the SPIFFE Workload API socket
//! mounted into every container; additional capabilities (a credential-renewal
//! sidecar, a transparent Envoy proxy sidecar) are selected through the
//! `spiffe-inject.io/mode` annotation.
//!
//! # Modules
//!
//! - [`annotations`] - Annotation keys and the opt-in gate
//! - [`presence`] - Idempotent upserts over pod spec collections
//! - [`config`] - Injected image configuration
//! - [`inject`] - Capability injectors and config renderers
//! - [`mutate`] - The mutation engine (gate → injectors → JSON patch)
//! - [`webhook`] - Admission webhook HTTP surface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod annotations;
pub mod config;
pub mod error;
pub mod inject;
pub mod mutate;
pub mod presence;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
