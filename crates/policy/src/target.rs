//! Read-only views of the admitted object and its namespace.

use std::collections::BTreeMap;

use injector_core::WorkloadKind;
use k8s_openapi::api::core::v1::{Container, Namespace, PodSpec, PodTemplateSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::annotations::InjectMode;

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("object missing {0}")]
    Missing(&'static str),
    #[error("decoding {field}: {source}")]
    Decode { field: &'static str, #[source] source: serde_json::Error },
    #[error("pod spec has no containers")]
    NoContainers,
}

fn decode<T: DeserializeOwned>(v: &Json, field: &'static str) -> Result<T, TargetError> {
    T::deserialize(v).map_err(|source| TargetError::Decode { field, source })
}

fn decode_meta(v: Option<&Json>, field: &'static str) -> Result<ObjectMeta, TargetError> {
    match v {
        Some(Json::Null) | None => Ok(ObjectMeta::default()),
        Some(v) => decode(v, field),
    }
}

/// The fields of a Pod or Deployment that injection reads.
///
/// `init_containers` and `volumes` keep the absent/empty distinction: `None`
/// means the array does not exist and a root-creation op is required.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionTarget {
    kind: WorkloadKind,
    name: Option<String>,
    namespace: Option<String>,
    containers: Vec<Container>,
    init_containers: Option<Vec<Container>>,
    volumes: Option<Vec<Volume>>,
    pod_labels: BTreeMap<String, String>,
    pod_annotations: BTreeMap<String, String>,
    deployment_labels: BTreeMap<String, String>,
    host_network: bool,
}

impl InjectionTarget {
    /// Parse the raw object (as carried in an admission request).
    pub fn from_value(kind: WorkloadKind, obj: &Json) -> Result<Self, TargetError> {
        if !obj.is_object() { return Err(TargetError::Missing("object body")); }
        let meta = decode_meta(obj.get("metadata"), "metadata")?;
        let (pod_meta, spec, deployment_labels) = match kind {
            WorkloadKind::Pod => {
                let spec = obj.get("spec").filter(|s| !s.is_null()).ok_or(TargetError::Missing("spec"))?;
                let spec: PodSpec = decode(spec, "spec")?;
                (meta.clone(), spec, BTreeMap::new())
            }
            WorkloadKind::Deployment => {
                let tpl = obj.pointer("/spec/template").filter(|s| !s.is_null()).ok_or(TargetError::Missing("spec.template"))?;
                let tpl: PodTemplateSpec = decode(tpl, "spec.template")?;
                let spec = tpl.spec.ok_or(TargetError::Missing("spec.template.spec"))?;
                (tpl.metadata.unwrap_or_default(), spec, meta.labels.clone().unwrap_or_default())
            }
        };
        if spec.containers.is_empty() { return Err(TargetError::NoContainers); }
        Ok(Self {
            kind,
            name: meta.name.clone().or_else(|| meta.generate_name.clone().map(|g| g.trim_end_matches('-').to_string())),
            namespace: meta.namespace.clone(),
            containers: spec.containers,
            init_containers: spec.init_containers,
            volumes: spec.volumes,
            pod_labels: pod_meta.labels.unwrap_or_default(),
            pod_annotations: pod_meta.annotations.unwrap_or_default(),
            deployment_labels,
            host_network: spec.host_network.unwrap_or(false),
        })
    }

    /// Fill the namespace from the request when the object omits it.
    pub fn in_namespace(mut self, namespace: Option<&str>) -> Self {
        if self.namespace.is_none() { self.namespace = namespace.map(str::to_string); }
        self
    }

    pub fn kind(&self) -> WorkloadKind { self.kind }
    pub fn name(&self) -> Option<&str> { self.name.as_deref() }
    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }
    pub fn containers(&self) -> &[Container] { &self.containers }
    pub fn init_containers(&self) -> Option<&[Container]> { self.init_containers.as_deref() }
    pub fn volumes(&self) -> Option<&[Volume]> { self.volumes.as_deref() }
    pub fn pod_labels(&self) -> &BTreeMap<String, String> { &self.pod_labels }
    pub fn pod_annotations(&self) -> &BTreeMap<String, String> { &self.pod_annotations }
    pub fn deployment_labels(&self) -> &BTreeMap<String, String> { &self.deployment_labels }
    pub fn host_network(&self) -> bool { self.host_network }

    /// True when a regular or init container already uses `name`.
    pub fn has_container_named(&self, name: &str) -> bool {
        self.containers.iter().chain(self.init_containers.iter().flatten()).any(|c| c.name == name)
    }

    pub fn inject_mode(&self) -> InjectMode { InjectMode::from_annotations(&self.pod_annotations) }
}

/// Namespace metadata the caller supplies alongside the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacePolicy {
    name: String,
    annotations: BTreeMap<String, String>,
}

impl NamespacePolicy {
    pub fn new(name: impl Into<String>, annotations: BTreeMap<String, String>) -> Self {
        Self { name: name.into(), annotations }
    }

    pub fn from_namespace(ns: &Namespace) -> Self {
        Self::new(ns.metadata.name.clone().unwrap_or_default(), ns.metadata.annotations.clone().unwrap_or_default())
    }

    /// Accepts a raw Namespace object.
    pub fn from_value(v: &Json) -> Result<Self, TargetError> {
        let meta = decode_meta(v.get("metadata"), "metadata")?;
        let name = meta.name.ok_or(TargetError::Missing("metadata.name"))?;
        Ok(Self::new(name, meta.annotations.unwrap_or_default()))
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn annotations(&self) -> &BTreeMap<String, String> { &self.annotations }
    pub fn inject_mode(&self) -> InjectMode { InjectMode::from_annotations(&self.annotations) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pod_without_optional_arrays() {
        let obj = json!({
            "metadata": {"name": "web", "labels": {"app": "web"}},
            "spec": {"containers": [{"name": "app", "image": "nginx"}], "initContainers": null}
        });
        let t = InjectionTarget::from_value(WorkloadKind::Pod, &obj).unwrap().in_namespace(Some("prod"));
        assert_eq!(t.name(), Some("web"));
        assert_eq!(t.namespace(), Some("prod"));
        assert!(t.init_containers().is_none());
        assert!(t.volumes().is_none());
        assert_eq!(t.pod_labels().get("app").map(String::as_str), Some("web"));
        assert!(t.deployment_labels().is_empty());
        assert!(!t.host_network());
    }

    #[test]
    fn deployment_reads_template_and_top_level_labels() {
        let obj = json!({
            "metadata": {"name": "api", "namespace": "shop", "labels": {"tier": "backend"}},
            "spec": {"template": {
                "metadata": {"annotations": {"linkerd.io/inject": "enabled"}},
                "spec": {"containers": [{"name": "api"}], "volumes": [], "hostNetwork": true}
            }}
        });
        let t = InjectionTarget::from_value(WorkloadKind::Deployment, &obj).unwrap().in_namespace(Some("other"));
        assert_eq!(t.namespace(), Some("shop"));
        assert_eq!(t.volumes().map(|v| v.len()), Some(0));
        assert_eq!(t.deployment_labels().get("tier").map(String::as_str), Some("backend"));
        assert!(t.pod_labels().is_empty());
        assert_eq!(t.inject_mode(), InjectMode::Enabled);
        assert!(t.host_network());
    }

    #[test]
    fn generate_name_stands_in_for_name() {
        let obj = json!({"metadata": {"generateName": "web-7d9f-"}, "spec": {"containers": [{"name": "app"}]}});
        let t = InjectionTarget::from_value(WorkloadKind::Pod, &obj).unwrap();
        assert_eq!(t.name(), Some("web-7d9f"));
    }

    #[test]
    fn malformed_objects_are_errors() {
        let e = InjectionTarget::from_value(WorkloadKind::Pod, &json!({"metadata": {}})).unwrap_err();
        assert!(matches!(e, TargetError::Missing("spec")));

        let e = InjectionTarget::from_value(WorkloadKind::Pod, &json!({"spec": {"containers": []}})).unwrap_err();
        assert!(matches!(e, TargetError::NoContainers));

        let e = InjectionTarget::from_value(WorkloadKind::Pod, &json!({"spec": {"containers": "nope"}})).unwrap_err();
        assert!(e.to_string().starts_with("decoding spec"), "e={}", e);

        let e = InjectionTarget::from_value(WorkloadKind::Deployment, &json!({"spec": {"template": {}}})).unwrap_err();
        assert!(matches!(e, TargetError::Missing("spec.template.spec")));

        assert!(InjectionTarget::from_value(WorkloadKind::Pod, &json!("pod")).is_err());
    }

    #[test]
    fn reserved_names_match_init_containers_too() {
        let obj = json!({"spec": {"containers": [{"name": "app"}], "initContainers": [{"name": "linkerd-init"}]}});
        let t = InjectionTarget::from_value(WorkloadKind::Pod, &obj).unwrap();
        assert!(t.has_container_named("linkerd-init"));
        assert!(!t.has_container_named("linkerd-proxy"));
    }

    #[test]
    fn namespace_policy_from_raw_object() {
        let ns = NamespacePolicy::from_value(&json!({"metadata": {"name": "shop", "annotations": {"linkerd.io/inject": "disabled"}}})).unwrap();
        assert_eq!(ns.name(), "shop");
        assert_eq!(ns.inject_mode(), InjectMode::Disabled);
        assert!(NamespacePolicy::from_value(&json!({"metadata": {}})).is_err());
    }
}
