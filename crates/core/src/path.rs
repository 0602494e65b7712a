use std::fmt;

use serde::{Deserialize, Serialize};

/// Object kinds the injector knows how to patch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    Deployment,
}

impl WorkloadKind {
    /// Match an admission request's `(group, kind)`; `None` for anything else.
    pub fn from_group_kind(group: &str, kind: &str) -> Option<Self> {
        match (group, kind) {
            ("", "Pod") => Some(Self::Pod),
            ("apps", "Deployment") => Some(Self::Deployment),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Pod => "Pod", Self::Deployment => "Deployment" })
    }
}

struct Paths {
    container: &'static str,
    init_container_root: &'static str,
    init_container: &'static str,
    volume_root: &'static str,
    volume: &'static str,
    pod_labels: &'static str,
    pod_annotations: &'static str,
    deployment_labels: Option<&'static str>,
}

const POD_PATHS: Paths = Paths {
    container: "/spec/containers/-",
    init_container_root: "/spec/initContainers",
    init_container: "/spec/initContainers/-",
    volume_root: "/spec/volumes",
    volume: "/spec/volumes/-",
    pod_labels: "/metadata/labels",
    pod_annotations: "/metadata/annotations",
    deployment_labels: None,
};

const DEPLOYMENT_PATHS: Paths = Paths {
    container: "/spec/template/spec/containers/-",
    init_container_root: "/spec/template/spec/initContainers",
    init_container: "/spec/template/spec/initContainers/-",
    volume_root: "/spec/template/spec/volumes",
    volume: "/spec/template/spec/volumes/-",
    pod_labels: "/spec/template/metadata/labels",
    pod_annotations: "/spec/template/metadata/annotations",
    deployment_labels: Some("/metadata/labels"),
};

/// Maps a mutation intent to its JSON pointer for a given workload kind.
///
/// Containers always append: Kubernetes validation guarantees a non-empty
/// `containers` array, so there is no root-creation path for it. Init
/// containers and volumes use a root path (set to `[]`) followed by appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResolver {
    kind: WorkloadKind,
}

impl PathResolver {
    pub fn new(kind: WorkloadKind) -> Self { Self { kind } }

    pub fn kind(&self) -> WorkloadKind { self.kind }

    fn paths(&self) -> &'static Paths {
        match self.kind {
            WorkloadKind::Pod => &POD_PATHS,
            WorkloadKind::Deployment => &DEPLOYMENT_PATHS,
        }
    }

    pub fn container(&self) -> &'static str { self.paths().container }
    pub fn init_container_root(&self) -> &'static str { self.paths().init_container_root }
    pub fn init_container(&self) -> &'static str { self.paths().init_container }
    pub fn volume_root(&self) -> &'static str { self.paths().volume_root }
    pub fn volume(&self) -> &'static str { self.paths().volume }
    pub fn pod_labels(&self) -> &'static str { self.paths().pod_labels }
    pub fn pod_annotations(&self) -> &'static str { self.paths().pod_annotations }

    /// `None` for bare Pods.
    pub fn deployment_labels(&self) -> Option<&'static str> { self.paths().deployment_labels }

    /// A root-creation op is needed only when the array is absent. An existing
    /// empty array is appended to directly; re-creating it would clobber siblings.
    pub fn needs_root<T>(existing: Option<&[T]>) -> bool { existing.is_none() }
}
