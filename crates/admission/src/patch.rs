use std::collections::BTreeMap;

use injector_core::{PatchBuilder, PatchDocument, PatchError, PathResolver, WorkloadKind};
use injector_policy::{InjectionTarget, SidecarAssets};

fn merged(existing: &BTreeMap<String, String>, ours: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = existing.clone();
    out.extend(ours.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// Assemble the injection patch for `target`.
///
/// Label and annotation ops replace the whole map, so existing entries are
/// merged in first; on a key clash the injected value wins.
pub fn build_patch(target: &InjectionTarget, assets: &SidecarAssets) -> Result<PatchDocument, PatchError> {
    let mut b = PatchBuilder::new(target.kind());
    b.add_container(&assets.sidecar)?;

    if PathResolver::needs_root(target.init_containers()) {
        b.add_init_container_root()?;
    }
    b.add_init_container(&assets.init)?;

    if !assets.volumes.is_empty() {
        if PathResolver::needs_root(target.volumes()) {
            b.add_volume_root()?;
        }
        for v in &assets.volumes {
            b.add_volume(v)?;
        }
    }

    b.add_pod_labels(&merged(target.pod_labels(), &assets.pod_labels))?;
    if target.kind() == WorkloadKind::Deployment {
        b.add_deployment_labels(&merged(target.deployment_labels(), &assets.deployment_labels))?;
    }
    b.add_pod_annotations(&merged(target.pod_annotations(), &assets.pod_annotations))?;
    Ok(b.build())
}

/// Re-encode as the `json_patch` type `AdmissionResponse::with_patch` takes.
pub fn to_json_patch(doc: &PatchDocument) -> Result<json_patch::Patch, serde_json::Error> {
    serde_json::to_value(doc).and_then(serde_json::from_value)
}
