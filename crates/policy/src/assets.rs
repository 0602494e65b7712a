use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Volume};
use serde::{Deserialize, Serialize};

/// Ready-to-insert values produced by a `SpecGenerator`.
///
/// The patch layer only serializes these; it never looks inside.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarAssets {
    pub sidecar: Container,
    pub init: Container,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,
    /// Empty for bare Pods.
    #[serde(default)]
    pub deployment_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub pod_annotations: BTreeMap<String, String>,
}
