//! Build CRD: a single build attempt of an application image

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BuildStack, BuildpackMetadata, Condition, LocalObjectReference};

/// Annotation recording why a build was triggered
pub const BUILD_REASON_ANNOTATION: &str = "build.kiln.dev/reason";

/// Annotation marking that another build is needed once this one finishes
pub const BUILD_NEEDED_ANNOTATION: &str = "build.kiln.dev/additional-build-needed";

/// Annotation carrying JSON-encoded compatibility bindings
pub const COMPATIBILITY_BINDINGS_ANNOTATION: &str = "build.kiln.dev/compatibility-bindings";

/// Label carrying the generation of the image that created the build
pub const IMAGE_GENERATION_LABEL: &str = "image.kiln.dev/image-generation";

/// Trigger reason: build configuration changed
pub const BUILD_REASON_CONFIG: &str = "CONFIG";
/// Trigger reason: source revision changed
pub const BUILD_REASON_COMMIT: &str = "COMMIT";
/// Trigger reason: resolved buildpacks changed
pub const BUILD_REASON_BUILDPACK: &str = "BUILDPACK";
/// Trigger reason: stack changed, the build is a rebase
pub const BUILD_REASON_STACK: &str = "STACK";
/// Trigger reason: manually requested
pub const BUILD_REASON_TRIGGER: &str = "TRIGGER";

/// Build spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "Build",
    namespaced,
    status = "BuildStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Tags the resulting image is pushed to; the first is canonical
    #[serde(default)]
    pub tags: Vec<String>,

    /// Builder image the build runs with
    #[serde(default)]
    pub builder: BuildBuilderSpec,

    /// Service account providing registry credentials
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,

    /// Result of the previous successful build, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build: Option<LastBuild>,
}

/// Builder image reference as seen by a build
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildBuilderSpec {
    /// Builder image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Secrets for pulling the builder image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Record of the previous successful build
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastBuild {
    /// Image the previous build produced
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Stack id the previous build ran on
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack_id: String,
}

/// Build status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    /// Conditions (`Succeeded`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation last processed by the build controller
    #[serde(default)]
    pub observed_generation: i64,

    /// Stack the image was built on
    #[serde(default)]
    pub stack: BuildStack,

    /// Buildpacks that contributed to the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_metadata: Vec<BuildpackMetadata>,

    /// Digest-pinned reference of the produced image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,

    /// Pod executing the build
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,
}

/// A service binding injected into a build for compatibility with older platforms
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Binding name
    pub name: String,

    /// ConfigMap holding binding metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_ref: Option<LocalObjectReference>,

    /// Secret holding binding credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}
