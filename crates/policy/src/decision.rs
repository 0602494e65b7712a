use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info};

use crate::annotations::{InjectMode, INIT_CONTAINER_NAME, PROXY_CONTAINER_NAME};
use crate::assets::SidecarAssets;
use crate::config::InjectConfig;
use crate::generator::{GenerateContext, GenerateError, SpecGenerator, TemplateGenerator};
use crate::target::{InjectionTarget, NamespacePolicy};

/// Why an object is admitted unchanged. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyInjected,
    ExplicitlyDisabled,
    NotOptedIn,
    IgnoredNamespace(String),
    HostNetwork,
    UnsupportedKind(String),
}

impl SkipReason {
    /// Low-cardinality label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::AlreadyInjected => "already_injected",
            Self::ExplicitlyDisabled => "explicitly_disabled",
            Self::NotOptedIn => "not_opted_in",
            Self::IgnoredNamespace(_) => "ignored_namespace",
            Self::HostNetwork => "host_network",
            Self::UnsupportedKind(_) => "unsupported_kind",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInjected => f.write_str("already injected"),
            Self::ExplicitlyDisabled => f.write_str("explicitly disabled"),
            Self::NotOptedIn => f.write_str("not opted in"),
            Self::IgnoredNamespace(ns) => write!(f, "namespace {} is ignored", ns),
            Self::HostNetwork => f.write_str("host network"),
            Self::UnsupportedKind(k) => write!(f, "unsupported kind: {}", k),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InjectionDecision {
    Skip(SkipReason),
    Inject(Box<SidecarAssets>),
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("generating sidecar spec: {0}")]
    Generate(#[from] GenerateError),
}

/// Decides, once per request, whether and what to inject.
///
/// Holds only immutable snapshots, so one engine serves concurrent requests.
#[derive(Clone)]
pub struct DecisionEngine {
    config: Arc<InjectConfig>,
    generator: Arc<dyn SpecGenerator>,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl DecisionEngine {
    pub fn new(config: Arc<InjectConfig>, generator: Arc<dyn SpecGenerator>) -> Self {
        Self { config, generator }
    }

    /// Engine backed by the built-in `TemplateGenerator`.
    pub fn from_config(config: Arc<InjectConfig>) -> Self {
        let generator = Arc::new(TemplateGenerator::new(Arc::clone(&config)));
        Self::new(config, generator)
    }

    /// Policy rules, first match wins. Explicit disable on either level beats
    /// an enable on the other; an object enable beats an unset namespace.
    pub fn skip_reason(&self, target: &InjectionTarget, namespace: Option<&NamespacePolicy>) -> Option<SkipReason> {
        if target.has_container_named(PROXY_CONTAINER_NAME) || target.has_container_named(INIT_CONTAINER_NAME) {
            return Some(SkipReason::AlreadyInjected);
        }
        let object_mode = target.inject_mode();
        let ns_mode = namespace.map(|n| n.inject_mode()).unwrap_or(InjectMode::Unset);
        if object_mode == InjectMode::Disabled || ns_mode == InjectMode::Disabled {
            return Some(SkipReason::ExplicitlyDisabled);
        }
        if object_mode != InjectMode::Enabled && ns_mode != InjectMode::Enabled {
            return Some(SkipReason::NotOptedIn);
        }
        let ns_name = namespace.map(|n| n.name()).or(target.namespace());
        if let Some(ns) = ns_name.filter(|ns| self.config.is_ignored_namespace(ns)) {
            return Some(SkipReason::IgnoredNamespace(ns.to_string()));
        }
        if target.host_network() {
            return Some(SkipReason::HostNetwork);
        }
        None
    }

    pub fn decide(&self, target: &InjectionTarget, namespace: Option<&NamespacePolicy>) -> Result<InjectionDecision, PolicyError> {
        if let Some(reason) = self.skip_reason(target, namespace) {
            debug!(kind = %target.kind(), name = ?target.name(), %reason, "skipping injection");
            counter!("injector_decisions_total", 1u64, "outcome" => reason.as_label());
            return Ok(InjectionDecision::Skip(reason));
        }
        let ctx = GenerateContext { target, namespace };
        match self.generator.generate(&ctx) {
            Ok(assets) => {
                info!(kind = %target.kind(), name = ?target.name(), ns = ?target.namespace(), "injecting proxy");
                counter!("injector_decisions_total", 1u64, "outcome" => "inject");
                Ok(InjectionDecision::Inject(Box::new(assets)))
            }
            Err(e) => {
                counter!("injector_decisions_total", 1u64, "outcome" => "generate_error");
                Err(e.into())
            }
        }
    }
}
