//! ClusterStore CRD: a cluster-wide catalogue of buildpacks
//!
//! A store lists buildpackage images; its status records every buildpack
//! those images provide, which builders resolve their `order` against.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// ClusterStore spec
///
/// Example:
/// ```yaml
/// apiVersion: kiln.dev/v1alpha1
/// kind: ClusterStore
/// metadata:
///   name: default
/// spec:
///   sources:
///   - image: gcr.io/paketo-buildpacks/go
///   - image: gcr.io/paketo-buildpacks/nodejs
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "ClusterStore",
    status = "ClusterStoreStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStoreSpec {
    /// Buildpackage images providing buildpacks
    #[serde(default)]
    pub sources: Vec<StoreImage>,
}

/// A buildpackage image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct StoreImage {
    /// Image reference
    pub image: String,
}

/// A buildpack made available by a store
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreBuildpack {
    /// Buildpack id
    pub id: String,
    /// Buildpack version
    pub version: String,
    /// Layer diff id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff_id: String,
    /// Layer digest
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    /// Layer size in bytes
    #[serde(default)]
    pub size: i64,
    /// Image this buildpack was read from
    #[serde(default)]
    pub store_image: StoreImage,
    /// Buildpack homepage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Buildpack API version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api: String,
    /// Stack ids this buildpack supports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<String>,
}

/// ClusterStore status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStoreStatus {
    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Generation last processed by the store controller
    #[serde(default)]
    pub observed_generation: i64,
    /// Buildpacks read from the source images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<StoreBuildpack>,
}

impl ClusterStore {
    /// Buildpacks listed in status (empty before the first observation)
    pub fn buildpacks(&self) -> &[StoreBuildpack] {
        self.status
            .as_ref()
            .map(|s| s.buildpacks.as_slice())
            .unwrap_or_default()
    }
}
