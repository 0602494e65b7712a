//! Injector admission: wraps the decision engine and the patch builder into
//! `AdmissionResponse`s. Transport agnostic; callers own the HTTP layer.

#![forbid(unsafe_code)]

use std::time::Instant;

use injector_core::{PatchDocument, PatchError, WorkloadKind};
use injector_policy::{DecisionEngine, InjectionDecision, InjectionTarget, NamespacePolicy, PolicyError, SkipReason, TargetError};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

mod patch;

pub use patch::{build_patch, to_json_patch};

#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error("encoding admitted object: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid {kind}: {source}")]
    Target { kind: WorkloadKind, #[source] source: TargetError },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("building patch: {0}")]
    Patch(#[from] PatchError),
    #[error("converting patch: {0}")]
    Convert(#[source] serde_json::Error),
    #[error("attaching patch: {0}")]
    Attach(String),
}

/// What happened to an admitted object.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Nothing to mutate, e.g. a DELETE.
    NoObject,
    Skipped(SkipReason),
    Patched(PatchDocument),
}

#[derive(Debug, Clone)]
pub struct Injector {
    engine: DecisionEngine,
}

impl Injector {
    pub fn new(engine: DecisionEngine) -> Self { Self { engine } }

    /// Full round trip on a review document.
    pub fn review(&self, review: AdmissionReview<DynamicObject>, namespace: Option<&NamespacePolicy>) -> AdmissionReview<DynamicObject> {
        let req: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "unparsable admission review");
                counter!("injector_admissions_total", 1u64, "result" => "invalid");
                return AdmissionResponse::invalid(e.to_string()).into_review();
            }
        };
        self.admit(&req, namespace).into_review()
    }

    /// Never fails: errors become denials so the API server retries instead
    /// of admitting an unmeshed workload.
    pub fn admit(&self, req: &AdmissionRequest<DynamicObject>, namespace: Option<&NamespacePolicy>) -> AdmissionResponse {
        let started = Instant::now();
        let resp = match self.try_admit(req, namespace).and_then(|a| Self::respond(req, a)) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(uid = %req.uid, kind = %req.kind.kind, name = %req.name, error = %e, "denying admission");
                counter!("injector_admissions_total", 1u64, "result" => "denied");
                AdmissionResponse::from(req).deny(e.to_string())
            }
        };
        histogram!("injector_admit_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        resp
    }

    fn respond(req: &AdmissionRequest<DynamicObject>, admission: Admission) -> Result<AdmissionResponse, AdmitError> {
        match admission {
            Admission::NoObject => {
                counter!("injector_admissions_total", 1u64, "result" => "skipped");
                Ok(AdmissionResponse::from(req))
            }
            Admission::Skipped(reason) => {
                info!(uid = %req.uid, kind = %req.kind.kind, name = %req.name, %reason, "admitting unchanged");
                counter!("injector_admissions_total", 1u64, "result" => "skipped");
                Ok(AdmissionResponse::from(req))
            }
            Admission::Patched(doc) => {
                let ops = doc.len() as u64;
                let patch = to_json_patch(&doc).map_err(AdmitError::Convert)?;
                let resp = AdmissionResponse::from(req).with_patch(patch).map_err(|e| AdmitError::Attach(e.to_string()))?;
                info!(uid = %req.uid, kind = %req.kind.kind, name = %req.name, ops, "admitting with patch");
                counter!("injector_admissions_total", 1u64, "result" => "patched");
                counter!("injector_patch_ops_total", ops);
                Ok(resp)
            }
        }
    }

    /// Decide and build, without touching the response types.
    pub fn try_admit(&self, req: &AdmissionRequest<DynamicObject>, namespace: Option<&NamespacePolicy>) -> Result<Admission, AdmitError> {
        let Some(obj) = req.object.as_ref() else {
            debug!(uid = %req.uid, operation = ?req.operation, "no object in request");
            return Ok(Admission::NoObject);
        };
        let kind = match WorkloadKind::from_group_kind(&req.kind.group, &req.kind.kind) {
            Some(k) if req.kind.version == "v1" => k,
            _ => {
                let gvk = if req.kind.group.is_empty() {
                    format!("{}/{}", req.kind.version, req.kind.kind)
                } else {
                    format!("{}/{}/{}", req.kind.group, req.kind.version, req.kind.kind)
                };
                return Ok(Admission::Skipped(SkipReason::UnsupportedKind(gvk)));
            }
        };

        let raw = serde_json::to_value(obj).map_err(AdmitError::Encode)?;
        let target = InjectionTarget::from_value(kind, &raw)
            .map_err(|source| AdmitError::Target { kind, source })?
            .in_namespace(req.namespace.as_deref());

        match self.engine.decide(&target, namespace)? {
            InjectionDecision::Skip(reason) => Ok(Admission::Skipped(reason)),
            InjectionDecision::Inject(assets) => Ok(Admission::Patched(build_patch(&target, &assets)?)),
        }
    }
}
