//! Pod mutation handler
//!
//! Converts the admission review envelope into a request, runs the mutation
//! engine, and maps the outcome back onto an `AdmissionResponse`:
//!
//! - gate disabled / already mutated → allowed, no patch
//! - mutation needed → allowed, with patch
//! - invalid mode annotation → denied, with an actionable message
//! - decode failure → invalid (bad request)
//! - render/serialization failure → denied with an opaque message, logged
//!   with full context here - internal failures must never silently skip
//!   injection.

use std::sync::Arc;

use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::mutate::MutationOutcome;

use super::WebhookState;

/// Handle mutating admission review for pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<Pod> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(mutate_pod(&state, &req).into_review())
}

/// Process a single pod mutation request
fn mutate_pod(state: &WebhookState, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let uid = request.uid.clone();

    let pod = match &request.object {
        Some(pod) => pod,
        None => {
            debug!(uid = %uid, "no pod object in request, allowing unchanged");
            return AdmissionResponse::from(request);
        }
    };

    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let name = pod.metadata.name.as_deref().unwrap_or_default();

    match state.engine.mutate(pod) {
        Ok(MutationOutcome::Unchanged { reason }) => {
            debug!(uid = %uid, namespace, name, reason, "allowing unchanged");
            AdmissionResponse::from(request)
        }
        Ok(MutationOutcome::Denied { reason }) => {
            warn!(uid = %uid, namespace, name, %reason, "denying admission");
            AdmissionResponse::from(request).deny(reason)
        }
        Ok(MutationOutcome::Patched(patch)) => {
            info!(uid = %uid, namespace, name, patch_ops = patch.0.len(), "applying patch");
            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %uid, namespace, name, error = %e, "failed to serialize patch");
                    AdmissionResponse::from(request)
                        .deny("internal error during identity injection")
                }
            }
        }
        Err(Error::Decode(msg)) => {
            warn!(uid = %uid, namespace, name, %msg, "malformed pod object");
            AdmissionResponse::invalid(msg)
        }
        Err(e) => {
            // Render/serialization failures are webhook defects: log the
            // details, surface an opaque denial.
            error!(uid = %uid, namespace, name, error = %e, "mutation failed");
            AdmissionResponse::from(request).deny("internal error during identity injection")
        }
    }
}
