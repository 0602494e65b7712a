#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use injector_core::WorkloadKind;
use injector_policy::annotations::{INJECT_ANNOTATION, PROXY_CONTAINER_NAME};
use injector_policy::{
    DecisionEngine, GenerateContext, GenerateError, InjectConfig, InjectionDecision, InjectionTarget, NamespacePolicy,
    PolicyError, SidecarAssets, SkipReason, SpecGenerator,
};
use serde_json::{json, Value};

fn engine() -> DecisionEngine {
    DecisionEngine::from_config(Arc::new(InjectConfig::default()))
}

fn deployment(pod_annotations: Value, containers: Value) -> InjectionTarget {
    let obj = json!({
        "metadata": {"name": "web", "namespace": "shop"},
        "spec": {"template": {
            "metadata": {"annotations": pod_annotations},
            "spec": {"containers": containers}
        }}
    });
    InjectionTarget::from_value(WorkloadKind::Deployment, &obj).unwrap()
}

fn ns(name: &str, inject: Option<&str>) -> NamespacePolicy {
    let mut a = BTreeMap::new();
    if let Some(v) = inject { a.insert(INJECT_ANNOTATION.to_string(), v.to_string()); }
    NamespacePolicy::new(name, a)
}

fn skip(d: InjectionDecision) -> SkipReason {
    match d {
        InjectionDecision::Skip(r) => r,
        other => panic!("expected skip, got {:?}", other),
    }
}

#[test]
fn already_injected_wins_over_everything() {
    let t = deployment(json!({INJECT_ANNOTATION: "enabled"}), json!([{"name": "app"}, {"name": PROXY_CONTAINER_NAME}]));
    let d = engine().decide(&t, Some(&ns("shop", Some("enabled")))).unwrap();
    assert_eq!(skip(d), SkipReason::AlreadyInjected);

    let t = deployment(json!({INJECT_ANNOTATION: "disabled"}), json!([{"name": PROXY_CONTAINER_NAME}]));
    assert_eq!(skip(engine().decide(&t, None).unwrap()), SkipReason::AlreadyInjected);
}

#[test]
fn no_annotations_anywhere_is_not_opted_in() {
    let t = deployment(json!({}), json!([{"name": "app"}]));
    let r = skip(engine().decide(&t, Some(&ns("shop", None))).unwrap());
    assert_eq!(r, SkipReason::NotOptedIn);
    assert_eq!(r.to_string(), "not opted in");
    assert_eq!(skip(engine().decide(&t, None).unwrap()), SkipReason::NotOptedIn);
}

#[test]
fn disable_on_either_level_wins() {
    let t = deployment(json!({INJECT_ANNOTATION: "enabled"}), json!([{"name": "app"}]));
    assert_eq!(skip(engine().decide(&t, Some(&ns("shop", Some("disabled")))).unwrap()), SkipReason::ExplicitlyDisabled);

    let t = deployment(json!({INJECT_ANNOTATION: "disabled"}), json!([{"name": "app"}]));
    assert_eq!(skip(engine().decide(&t, Some(&ns("shop", Some("enabled")))).unwrap()), SkipReason::ExplicitlyDisabled);
}

#[test]
fn enable_on_either_level_injects() {
    let e = engine();
    let t = deployment(json!({INJECT_ANNOTATION: "enabled"}), json!([{"name": "app"}]));
    assert!(matches!(e.decide(&t, None).unwrap(), InjectionDecision::Inject(_)));

    let t = deployment(json!({}), json!([{"name": "app"}]));
    match e.decide(&t, Some(&ns("shop", Some("enabled")))).unwrap() {
        InjectionDecision::Inject(a) => {
            assert_eq!(a.sidecar.name, PROXY_CONTAINER_NAME);
            assert!(!a.deployment_labels.is_empty());
        }
        other => panic!("expected inject, got {:?}", other),
    }
}

#[test]
fn ignored_namespaces_and_host_network_skip() {
    let t = deployment(json!({INJECT_ANNOTATION: "enabled"}), json!([{"name": "app"}]));
    let r = skip(engine().decide(&t, Some(&ns("kube-system", None))).unwrap());
    assert_eq!(r, SkipReason::IgnoredNamespace("kube-system".into()));

    let obj = json!({
        "metadata": {"name": "agent", "annotations": {INJECT_ANNOTATION: "enabled"}},
        "spec": {"hostNetwork": true, "containers": [{"name": "agent"}]}
    });
    let t = InjectionTarget::from_value(WorkloadKind::Pod, &obj).unwrap();
    assert_eq!(skip(engine().decide(&t, None).unwrap()), SkipReason::HostNetwork);
}

struct Failing;

impl SpecGenerator for Failing {
    fn generate(&self, _: &GenerateContext<'_>) -> Result<SidecarAssets, GenerateError> {
        Err(GenerateError::Unavailable("template store offline".into()))
    }
}

#[test]
fn generator_failure_is_an_error_not_a_skip() {
    let e = DecisionEngine::new(Arc::new(InjectConfig::default()), Arc::new(Failing));
    let t = deployment(json!({INJECT_ANNOTATION: "enabled"}), json!([{"name": "app"}]));
    let err = e.decide(&t, None).unwrap_err();
    assert!(matches!(err, PolicyError::Generate(GenerateError::Unavailable(_))));
    assert!(err.to_string().contains("template store offline"));

    // Skips never reach the generator.
    let t = deployment(json!({}), json!([{"name": "app"}]));
    assert_eq!(skip(e.decide(&t, None).unwrap()), SkipReason::NotOptedIn);
}
