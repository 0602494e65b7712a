//! Well-known names: reserved containers, control annotations, mesh labels.

use std::collections::BTreeMap;

pub const PROXY_CONTAINER_NAME: &str = "linkerd-proxy";
pub const INIT_CONTAINER_NAME: &str = "linkerd-init";
pub const TRUST_ANCHORS_VOLUME_NAME: &str = "linkerd-trust-anchors";
pub const SECRETS_VOLUME_NAME: &str = "linkerd-secrets";

pub const INJECT_ANNOTATION: &str = "linkerd.io/inject";
pub const INJECT_ENABLED: &str = "enabled";
pub const INJECT_DISABLED: &str = "disabled";

pub const CONTROLLER_NS_LABEL: &str = "linkerd.io/control-plane-ns";
pub const PROXY_DEPLOYMENT_LABEL: &str = "linkerd.io/proxy-deployment";
pub const CREATED_BY_ANNOTATION: &str = "linkerd.io/created-by";
pub const PROXY_VERSION_ANNOTATION: &str = "linkerd.io/proxy-version";

// Per-workload overrides; object annotations win over namespace annotations.
pub const PROXY_IMAGE_ANNOTATION: &str = "config.linkerd.io/proxy-image";
pub const PROXY_VERSION_OVERRIDE_ANNOTATION: &str = "config.linkerd.io/proxy-version";
pub const INIT_IMAGE_ANNOTATION: &str = "config.linkerd.io/init-image";
pub const PROXY_UID_ANNOTATION: &str = "config.linkerd.io/proxy-uid";
pub const PROXY_LOG_LEVEL_ANNOTATION: &str = "config.linkerd.io/proxy-log-level";
pub const PROXY_CPU_REQUEST_ANNOTATION: &str = "config.linkerd.io/proxy-cpu-request";
pub const PROXY_CPU_LIMIT_ANNOTATION: &str = "config.linkerd.io/proxy-cpu-limit";
pub const PROXY_MEMORY_REQUEST_ANNOTATION: &str = "config.linkerd.io/proxy-memory-request";
pub const PROXY_MEMORY_LIMIT_ANNOTATION: &str = "config.linkerd.io/proxy-memory-limit";
pub const SKIP_INBOUND_PORTS_ANNOTATION: &str = "config.linkerd.io/skip-inbound-ports";
pub const SKIP_OUTBOUND_PORTS_ANNOTATION: &str = "config.linkerd.io/skip-outbound-ports";

/// Value of the `linkerd.io/inject` annotation on an object or namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectMode {
    Enabled,
    Disabled,
    /// Absent or unrecognized.
    Unset,
}

impl InjectMode {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        match annotations.get(INJECT_ANNOTATION).map(|s| s.trim()) {
            Some(v) if v.eq_ignore_ascii_case(INJECT_ENABLED) => Self::Enabled,
            Some(v) if v.eq_ignore_ascii_case(INJECT_DISABLED) => Self::Disabled,
            _ => Self::Unset,
        }
    }
}
