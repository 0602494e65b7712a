//! Sidecar spec generation: turns the config snapshot plus per-workload
//! overrides into the containers, volumes and metadata to inject.

use std::collections::BTreeMap;
use std::sync::Arc;

use injector_core::WorkloadKind;
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    ObjectFieldSelector, Probe, ResourceRequirements, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::annotations::*;
use crate::assets::SidecarAssets;
use crate::config::InjectConfig;
use crate::overrides::{join_ports, Overrides, PortRange, ProxySettings, ResourceSettings};
use crate::target::{InjectionTarget, NamespacePolicy};

const TRUST_ANCHORS_MOUNT_PATH: &str = "/var/linkerd-io/trust-anchors";
const SECRETS_MOUNT_PATH: &str = "/var/linkerd-io/identity";

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("invalid annotation {key}={value:?}: {reason}")]
    InvalidAnnotation { key: String, value: String, reason: String },
    #[error("{0}")]
    Unavailable(String),
}

/// What a generator gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct GenerateContext<'a> {
    pub target: &'a InjectionTarget,
    pub namespace: Option<&'a NamespacePolicy>,
}

impl<'a> GenerateContext<'a> {
    pub fn overrides(&self) -> Overrides<'a> {
        Overrides::new(self.target.pod_annotations(), self.namespace.map(|n| n.annotations()))
    }
}

/// Producer of sidecar assets. Implementations must be pure with respect to
/// shared state: requests run in parallel against the same generator.
pub trait SpecGenerator: Send + Sync {
    fn generate(&self, ctx: &GenerateContext<'_>) -> Result<SidecarAssets, GenerateError>;
}

/// Renders assets from an `InjectConfig` snapshot.
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    config: Arc<InjectConfig>,
}

impl TemplateGenerator {
    pub fn new(config: Arc<InjectConfig>) -> Self { Self { config } }

    fn env(name: &str, value: impl Into<String>) -> EnvVar {
        EnvVar { name: name.to_string(), value: Some(value.into()), ..Default::default() }
    }

    fn resources(r: &ResourceSettings) -> Option<ResourceRequirements> {
        if r.is_empty() { return None; }
        let pick = |cpu: &Option<String>, mem: &Option<String>| {
            let mut m = BTreeMap::new();
            if let Some(c) = cpu { m.insert("cpu".to_string(), Quantity(c.clone())); }
            if let Some(v) = mem { m.insert("memory".to_string(), Quantity(v.clone())); }
            if m.is_empty() { None } else { Some(m) }
        };
        Some(ResourceRequirements {
            requests: pick(&r.cpu_request, &r.memory_request),
            limits: pick(&r.cpu_limit, &r.memory_limit),
            ..Default::default()
        })
    }

    fn metrics_probe(&self, initial_delay: i32) -> Probe {
        Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/metrics".into()),
                port: IntOrString::Int(self.config.proxy.metrics_port.into()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(initial_delay),
            ..Default::default()
        }
    }

    fn proxy_container(&self, s: &ProxySettings) -> Container {
        let p = &self.config.proxy;
        let mut env = vec![
            Self::env("LINKERD2_PROXY_LOG", s.log_level.clone()),
            Self::env("LINKERD2_PROXY_CONTROL_URL", self.config.control_url()),
            Self::env("LINKERD2_PROXY_CONTROL_LISTENER", format!("tcp://0.0.0.0:{}", p.control_port)),
            Self::env("LINKERD2_PROXY_METRICS_LISTENER", format!("tcp://0.0.0.0:{}", p.metrics_port)),
            Self::env("LINKERD2_PROXY_OUTBOUND_LISTENER", format!("tcp://127.0.0.1:{}", p.outbound_port)),
            Self::env("LINKERD2_PROXY_INBOUND_LISTENER", format!("tcp://0.0.0.0:{}", p.inbound_port)),
            EnvVar {
                name: "LINKERD2_PROXY_POD_NAMESPACE".into(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector { field_path: "metadata.namespace".into(), ..Default::default() }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];
        let mut mounts = None;
        if self.config.identity.enabled {
            env.push(Self::env("LINKERD2_PROXY_TLS_TRUST_ANCHORS", format!("{}/trust-anchors.pem", TRUST_ANCHORS_MOUNT_PATH)));
            env.push(Self::env("LINKERD2_PROXY_TLS_CERT", format!("{}/certificate.crt", SECRETS_MOUNT_PATH)));
            env.push(Self::env("LINKERD2_PROXY_TLS_PRIVATE_KEY", format!("{}/private-key.p8", SECRETS_MOUNT_PATH)));
            mounts = Some(vec![
                VolumeMount { name: TRUST_ANCHORS_VOLUME_NAME.into(), mount_path: TRUST_ANCHORS_MOUNT_PATH.into(), read_only: Some(true), ..Default::default() },
                VolumeMount { name: SECRETS_VOLUME_NAME.into(), mount_path: SECRETS_MOUNT_PATH.into(), read_only: Some(true), ..Default::default() },
            ]);
        }
        Container {
            name: PROXY_CONTAINER_NAME.into(),
            image: Some(format!("{}:{}", s.proxy_image, s.proxy_version)),
            image_pull_policy: Some(p.image_pull_policy.clone()),
            security_context: Some(SecurityContext { run_as_user: Some(s.uid), ..Default::default() }),
            ports: Some(vec![
                ContainerPort { name: Some("linkerd-proxy".into()), container_port: p.inbound_port.into(), ..Default::default() },
                ContainerPort { name: Some("linkerd-metrics".into()), container_port: p.metrics_port.into(), ..Default::default() },
            ]),
            env: Some(env),
            resources: Self::resources(&s.resources),
            liveness_probe: Some(self.metrics_probe(10)),
            readiness_probe: Some(self.metrics_probe(10)),
            volume_mounts: mounts,
            termination_message_policy: Some("FallbackToLogsOnError".into()),
            ..Default::default()
        }
    }

    fn init_container(&self, s: &ProxySettings) -> Container {
        let p = &self.config.proxy;
        // The proxy's own control and metrics ports are never redirected.
        let mut inbound_skip: Vec<PortRange> = [p.control_port, p.metrics_port].iter().map(|&x| PortRange { lo: x, hi: x }).collect();
        inbound_skip.extend(s.skip_inbound_ports.iter().copied());
        let mut args = vec![
            "--incoming-proxy-port".to_string(), p.inbound_port.to_string(),
            "--outgoing-proxy-port".to_string(), p.outbound_port.to_string(),
            "--proxy-uid".to_string(), s.uid.to_string(),
            "--inbound-ports-to-ignore".to_string(), join_ports(&inbound_skip),
        ];
        if !s.skip_outbound_ports.is_empty() {
            args.push("--outbound-ports-to-ignore".into());
            args.push(join_ports(&s.skip_outbound_ports));
        }
        Container {
            name: INIT_CONTAINER_NAME.into(),
            image: Some(format!("{}:{}", s.init_image, s.init_version)),
            image_pull_policy: Some(p.image_pull_policy.clone()),
            args: Some(args),
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities { add: Some(vec!["NET_ADMIN".into()]), ..Default::default() }),
                privileged: Some(false),
                ..Default::default()
            }),
            termination_message_policy: Some("FallbackToLogsOnError".into()),
            ..Default::default()
        }
    }

    fn volumes(&self, target: &InjectionTarget) -> Vec<Volume> {
        if !self.config.identity.enabled { return Vec::new(); }
        let owner = target.name().unwrap_or("unknown");
        let kind = target.kind().to_string().to_lowercase();
        vec![
            Volume {
                name: TRUST_ANCHORS_VOLUME_NAME.into(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(self.config.identity.trust_anchors_config_map.clone()),
                    optional: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: SECRETS_VOLUME_NAME.into(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(format!("{}-{}-{}", owner, kind, SECRETS_VOLUME_NAME)),
                    optional: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]
    }
}

impl SpecGenerator for TemplateGenerator {
    fn generate(&self, ctx: &GenerateContext<'_>) -> Result<SidecarAssets, GenerateError> {
        let settings = ctx.overrides().resolve(&self.config)?;
        let ns_label = || BTreeMap::from([(CONTROLLER_NS_LABEL.to_string(), self.config.controller_namespace.clone())]);

        let mut pod_labels = ns_label();
        let mut deployment_labels = BTreeMap::new();
        if ctx.target.kind() == WorkloadKind::Deployment {
            if let Some(name) = ctx.target.name() {
                pod_labels.insert(PROXY_DEPLOYMENT_LABEL.to_string(), name.to_string());
            }
            deployment_labels = ns_label();
        }
        let pod_annotations = BTreeMap::from([
            (CREATED_BY_ANNOTATION.to_string(), self.config.created_by.clone()),
            (PROXY_VERSION_ANNOTATION.to_string(), settings.proxy_version.clone()),
        ]);

        Ok(SidecarAssets {
            sidecar: self.proxy_container(&settings),
            init: self.init_container(&settings),
            volumes: self.volumes(ctx.target),
            pod_labels,
            deployment_labels,
            pod_annotations,
        })
    }
}
