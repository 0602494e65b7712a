use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as Json;

use crate::{PatchDocument, PatchError, PatchOperation, PathResolver, WorkloadKind};

/// Append-only accumulator of injection patch operations.
///
/// Callers invoke the `add_*` methods in this order, each at most once except
/// `add_volume`: container, init-container root (only when the target has no
/// `initContainers`), init container, volume root (only when the target has no
/// `volumes`), volumes, pod labels, deployment labels, pod annotations.
/// Skipping a required root produces a patch the API server rejects; the
/// builder does not check, since it cannot see the target.
///
/// Label and annotation maps replace the whole map at their path, so they must
/// already contain any entries the object had.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    paths: PathResolver,
    ops: Vec<PatchOperation>,
}

impl PatchBuilder {
    pub fn new(kind: WorkloadKind) -> Self {
        Self { paths: PathResolver::new(kind), ops: Vec::new() }
    }

    fn push<T: Serialize + ?Sized>(&mut self, path: &'static str, value: &T) -> Result<(), PatchError> {
        self.ops.push(PatchOperation::add(path, value)?);
        Ok(())
    }

    fn push_root(&mut self, path: &'static str) -> Result<(), PatchError> {
        self.push(path, &Json::Array(Vec::new()))
    }

    pub fn add_container<T: Serialize + ?Sized>(&mut self, container: &T) -> Result<(), PatchError> {
        self.push(self.paths.container(), container)
    }

    pub fn add_init_container_root(&mut self) -> Result<(), PatchError> {
        self.push_root(self.paths.init_container_root())
    }

    pub fn add_init_container<T: Serialize + ?Sized>(&mut self, container: &T) -> Result<(), PatchError> {
        self.push(self.paths.init_container(), container)
    }

    pub fn add_volume_root(&mut self) -> Result<(), PatchError> {
        self.push_root(self.paths.volume_root())
    }

    pub fn add_volume<T: Serialize + ?Sized>(&mut self, volume: &T) -> Result<(), PatchError> {
        self.push(self.paths.volume(), volume)
    }

    pub fn add_pod_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), PatchError> {
        self.push(self.paths.pod_labels(), labels)
    }

    /// Fails with `NoDeploymentLevel` for Pods.
    pub fn add_deployment_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), PatchError> {
        let path = self.paths.deployment_labels().ok_or(PatchError::NoDeploymentLevel(self.paths.kind()))?;
        self.push(path, labels)
    }

    pub fn add_pod_annotations(&mut self, annotations: &BTreeMap<String, String>) -> Result<(), PatchError> {
        self.push(self.paths.pod_annotations(), annotations)
    }

    pub fn len(&self) -> usize { self.ops.len() }
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    /// Finish the document. Consumes the builder, so nothing can be appended after.
    pub fn build(self) -> PatchDocument { PatchDocument::from_ops(self.ops) }
}
