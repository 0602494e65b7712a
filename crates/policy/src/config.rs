//! Injector configuration snapshot. Loaded once, then shared read-only as `Arc<InjectConfig>`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::overrides::is_quantity;

fn max_config_bytes() -> usize {
    std::env::var("INJECTOR_MAX_CONFIG_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("reading config {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("parsing config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct InjectConfig {
    /// Namespace the control plane runs in; stamped on injected workloads.
    pub controller_namespace: String,
    pub created_by: String,
    /// Namespaces never injected, whatever their annotations say.
    pub ignored_namespaces: Vec<String>,
    pub proxy: ProxyConfig,
    pub proxy_init: ProxyInitConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    pub image: String,
    pub version: String,
    pub image_pull_policy: String,
    pub uid: i64,
    pub log_level: String,
    pub inbound_port: u16,
    pub outbound_port: u16,
    pub control_port: u16,
    pub metrics_port: u16,
    /// Defaults to the proxy-api service in the controller namespace.
    pub control_url: Option<String>,
    pub resources: ResourceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceConfig {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyInitConfig {
    pub image: String,
    /// Falls back to the proxy version.
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityConfig {
    pub enabled: bool,
    pub trust_anchors_config_map: String,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            controller_namespace: "linkerd".into(),
            created_by: "linkerd/proxy-injector v18.8.4".into(),
            ignored_namespaces: vec!["kube-system".into(), "kube-public".into()],
            proxy: ProxyConfig::default(),
            proxy_init: ProxyInitConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            image: "gcr.io/linkerd-io/proxy".into(),
            version: "v18.8.4".into(),
            image_pull_policy: "IfNotPresent".into(),
            uid: 2102,
            log_level: "warn,linkerd2_proxy=info".into(),
            inbound_port: 4143,
            outbound_port: 4140,
            control_port: 4190,
            metrics_port: 4191,
            control_url: None,
            resources: ResourceConfig::default(),
        }
    }
}

impl Default for ProxyInitConfig {
    fn default() -> Self {
        Self { image: "gcr.io/linkerd-io/proxy-init".into(), version: None }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { enabled: true, trust_anchors_config_map: "linkerd-ca-bundle".into() }
    }
}

impl InjectConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let limit = max_config_bytes();
        if yaml.len() > limit { return Err(ConfigError::TooLarge(limit)); }
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn control_url(&self) -> String {
        match &self.proxy.control_url {
            Some(url) => url.clone(),
            None => format!("tcp://proxy-api.{}.svc.cluster.local:8086", self.controller_namespace),
        }
    }

    pub fn init_version(&self) -> &str {
        self.proxy_init.version.as_deref().unwrap_or(&self.proxy.version)
    }

    pub fn is_ignored_namespace(&self, ns: &str) -> bool {
        self.ignored_namespaces.iter().any(|n| n == ns)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |m: String| Err(ConfigError::Invalid(m));
        if self.controller_namespace.is_empty() { return invalid("controllerNamespace must be set".into()); }
        if self.proxy.image.is_empty() || self.proxy_init.image.is_empty() {
            return invalid("proxy.image and proxyInit.image must be set".into());
        }
        if self.proxy.version.is_empty() { return invalid("proxy.version must be set".into()); }
        let p = &self.proxy;
        let ports = [("inboundPort", p.inbound_port), ("outboundPort", p.outbound_port), ("controlPort", p.control_port), ("metricsPort", p.metrics_port)];
        for (i, (name, port)) in ports.iter().enumerate() {
            if *port == 0 { return invalid(format!("proxy.{} must be non-zero", name)); }
            if let Some((other, _)) = ports[..i].iter().find(|(_, q)| q == port) {
                return invalid(format!("proxy.{} and proxy.{} share port {}", other, name, port));
            }
        }
        let r = &p.resources;
        for (name, q) in [("cpuRequest", &r.cpu_request), ("cpuLimit", &r.cpu_limit), ("memoryRequest", &r.memory_request), ("memoryLimit", &r.memory_limit)] {
            if let Some(q) = q {
                if !is_quantity(q) { return invalid(format!("proxy.resources.{}: {:?} is not a quantity", name, q)); }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        InjectConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = InjectConfig::from_yaml_str("controllerNamespace: mesh\nproxy:\n  version: v2.0.0\n").unwrap();
        assert_eq!(cfg.controller_namespace, "mesh");
        assert_eq!(cfg.proxy.version, "v2.0.0");
        assert_eq!(cfg.proxy.inbound_port, 4143);
        assert_eq!(cfg.init_version(), "v2.0.0");
        assert_eq!(cfg.control_url(), "tcp://proxy-api.mesh.svc.cluster.local:8086");
        assert!(cfg.identity.enabled);
    }

    #[test]
    fn yaml_round_trips() {
        let cfg = InjectConfig::default();
        let back = InjectConfig::from_yaml_str(&cfg.to_yaml_string().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn invalid_configs_are_friendly() {
        let e = InjectConfig::from_yaml_str("proxy:\n  metricsPort: 4190\n").unwrap_err().to_string();
        assert!(e.contains("controlPort and proxy.metricsPort"), "e={}", e);

        let e = InjectConfig::from_yaml_str("proxy:\n  resources:\n    cpuLimit: lots\n").unwrap_err().to_string();
        assert!(e.contains("cpuLimit"), "e={}", e);

        let e = InjectConfig::from_yaml_str("controllerNamespace: [").unwrap_err();
        assert!(matches!(e, ConfigError::Parse(_)));
    }

    #[test]
    fn oversized_yaml_is_rejected_before_parsing() {
        let yaml = "a: ".to_string() + &"x".repeat(1_000_001);
        let e = InjectConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(e, ConfigError::TooLarge(1_000_000)), "e={}", e);
    }
}
