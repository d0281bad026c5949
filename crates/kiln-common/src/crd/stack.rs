//! ClusterStack CRD: the build and run base images builders are produced on

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{get_condition, Condition, CONDITION_READY};

/// ClusterStack spec
///
/// Example:
/// ```yaml
/// apiVersion: kiln.dev/v1alpha1
/// kind: ClusterStack
/// metadata:
///   name: jammy
/// spec:
///   id: io.buildpacks.stacks.jammy
///   buildImage:
///     image: paketobuildpacks/build-jammy-base
///   runImage:
///     image: paketobuildpacks/run-jammy-base
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "ClusterStack",
    status = "ClusterStackStatus",
    printcolumn = r#"{"name":"Id","type":"string","jsonPath":".spec.id"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStackSpec {
    /// Stack id
    pub id: String,
    /// Image builders run buildpacks on
    pub build_image: StackImage,
    /// Image applications run on
    pub run_image: StackImage,
}

/// A stack image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StackImage {
    /// Image reference
    pub image: String,
}

/// A stack image resolved to a digest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStackImage {
    /// Digest-pinned reference
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,
    /// Reference as written in the spec
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

/// ClusterStack status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStackStatus {
    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Generation last processed by the stack controller
    #[serde(default)]
    pub observed_generation: i64,
    /// Stack id read from the images
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Resolved build image
    #[serde(default)]
    pub build_image: ResolvedStackImage,
    /// Resolved run image
    #[serde(default)]
    pub run_image: ResolvedStackImage,
    /// Mixins provided by both images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mixins: Vec<String>,
    /// User id builds run as
    #[serde(default)]
    pub user_id: i64,
    /// Group id builds run as
    #[serde(default)]
    pub group_id: i64,
}

impl ClusterStack {
    /// Whether the stack reports `Ready=True`
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| get_condition(&s.conditions, CONDITION_READY))
            .is_some_and(Condition::is_true)
    }
}
