//! Builder and ClusterBuilder CRDs
//!
//! Both kinds describe the same thing, a builder image composed from a stack
//! and an ordered selection of buildpacks from a store. They differ only in
//! scope and in how the pushing service account is named: a `Builder` names
//! an account in its own namespace, a `ClusterBuilder` names one anywhere.

use kube::api::Api;
use kube::{Client, CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    set_condition, BuildStack, BuildpackMetadata, Condition, ConditionStatus, ObjectReference,
    ServiceAccountRef, CONDITION_READY,
};

/// Kind tag of a namespace-local builder
pub const BUILDER_KIND: &str = "Builder";

/// Kind tag of a cluster-global builder
pub const CLUSTER_BUILDER_KIND: &str = "ClusterBuilder";

/// Kind a builder's `store` reference must carry (or leave empty)
pub const CLUSTER_STORE_KIND: &str = "ClusterStore";

/// Kind a builder's `stack` reference must carry (or leave empty)
pub const CLUSTER_STACK_KIND: &str = "ClusterStack";

/// Desired composition of a builder image, shared by both builder kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderSpec {
    /// Registry tag the builder image is pushed to
    pub tag: String,

    /// Stack the builder is produced on
    pub stack: ObjectReference,

    /// Store the buildpacks are resolved from
    pub store: ObjectReference,

    /// Ordered buildpack groups; detection tries them in turn
    #[serde(default)]
    pub order: Vec<OrderEntry>,
}

/// One detection group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OrderEntry {
    /// Buildpacks in this group
    #[serde(default)]
    pub group: Vec<BuildpackRef>,
}

/// A buildpack selected by id and optional version
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BuildpackRef {
    /// Buildpack id
    pub id: String,

    /// Pinned version; the store's first listing is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Whether detection may skip this buildpack
    #[serde(default)]
    pub optional: bool,
}

/// Observed state of a builder, shared by both builder kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderStatus {
    /// Conditions (`Ready`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation this status was computed from
    #[serde(default)]
    pub observed_generation: i64,

    /// Buildpacks baked into the latest image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builder_metadata: Vec<BuildpackMetadata>,

    /// Stack the latest image was produced on
    #[serde(default)]
    pub stack: BuildStack,

    /// Digest-pinned reference of the latest builder image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,

    /// Stack generation the latest image was produced from
    #[serde(default)]
    pub observed_stack_generation: i64,

    /// Store generation the latest image was produced from
    #[serde(default)]
    pub observed_store_generation: i64,
}

/// Result of materializing a builder image
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuilderRecord {
    /// Digest-pinned builder image
    pub image: String,
    /// Stack the image was produced on
    pub stack: BuildStack,
    /// Buildpacks baked into the image
    pub buildpacks: Vec<BuildpackMetadata>,
    /// Generation of the stack used
    pub observed_stack_generation: i64,
    /// Generation of the store used
    pub observed_store_generation: i64,
}

impl BuilderStatus {
    /// Replace the recorded result with `record` and mark the builder ready
    pub fn apply_record(&mut self, record: BuilderRecord) {
        self.builder_metadata = record.buildpacks;
        self.stack = record.stack;
        self.latest_image = record.image;
        self.observed_stack_generation = record.observed_stack_generation;
        self.observed_store_generation = record.observed_store_generation;
        set_condition(
            &mut self.conditions,
            Condition::new(CONDITION_READY, ConditionStatus::True, "", ""),
        );
    }

    /// Mark the builder not ready, keeping the last good image
    pub fn apply_create_error(&mut self, message: impl Into<String>) {
        set_condition(
            &mut self.conditions,
            Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                "ReconcileFailed",
                message,
            ),
        );
    }
}

/// ClusterBuilder: a builder visible to every namespace
///
/// Example:
/// ```yaml
/// apiVersion: kiln.dev/v1alpha1
/// kind: ClusterBuilder
/// metadata:
///   name: default
/// spec:
///   tag: registry.example.com/builders/default
///   stack:
///     kind: ClusterStack
///     name: jammy
///   store:
///     kind: ClusterStore
///     name: default
///   serviceAccountRef:
///     namespace: kiln
///     name: builder-push
///   order:
///   - group:
///     - id: paketo-buildpacks/go
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "ClusterBuilder",
    status = "BuilderStatus",
    printcolumn = r#"{"name":"LatestImage","type":"string","jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuilderSpec {
    /// Builder composition
    #[serde(flatten)]
    pub builder: BuilderSpec,

    /// Account whose pull secrets grant push access to `tag`
    pub service_account_ref: ServiceAccountRef,
}

/// Builder: a builder scoped to one namespace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "Builder",
    namespaced,
    status = "BuilderStatus",
    printcolumn = r#"{"name":"LatestImage","type":"string","jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedBuilderSpec {
    /// Builder composition
    #[serde(flatten)]
    pub builder: BuilderSpec,

    /// Service account in the builder's namespace
    #[serde(default = "default_service_account")]
    pub service_account: String,
}

fn default_service_account() -> String {
    "default".to_string()
}

/// Behavior shared by both builder kinds, so one reconciler serves either
pub trait BuilderResource:
    Resource<DynamicType = ()> + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Kind tag of this resource
    const KIND: &'static str;

    /// Desired composition
    fn builder_spec(&self) -> &BuilderSpec;

    /// Account whose credentials are used to push the image
    fn service_account(&self) -> ServiceAccountRef;

    /// Observed state, if any has been written
    fn builder_status(&self) -> Option<&BuilderStatus>;

    /// Observed state, created empty when absent
    fn builder_status_mut(&mut self) -> &mut BuilderStatus;

    /// API handle for this kind; `namespace` is ignored for cluster-scoped kinds
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

impl BuilderResource for ClusterBuilder {
    const KIND: &'static str = CLUSTER_BUILDER_KIND;

    fn builder_spec(&self) -> &BuilderSpec {
        &self.spec.builder
    }

    fn service_account(&self) -> ServiceAccountRef {
        self.spec.service_account_ref.clone()
    }

    fn builder_status(&self) -> Option<&BuilderStatus> {
        self.status.as_ref()
    }

    fn builder_status_mut(&mut self) -> &mut BuilderStatus {
        self.status.get_or_insert_with(BuilderStatus::default)
    }

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

impl BuilderResource for Builder {
    const KIND: &'static str = BUILDER_KIND;

    fn builder_spec(&self) -> &BuilderSpec {
        &self.spec.builder
    }

    fn service_account(&self) -> ServiceAccountRef {
        ServiceAccountRef {
            namespace: self.namespace().unwrap_or_default(),
            name: self.spec.service_account.clone(),
        }
    }

    fn builder_status(&self) -> Option<&BuilderStatus> {
        self.status.as_ref()
    }

    fn builder_status_mut(&mut self) -> &mut BuilderStatus {
        self.status.get_or_insert_with(BuilderStatus::default)
    }

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::get_condition;

    fn record(version: &str) -> BuilderRecord {
        BuilderRecord {
            image: "registry.example.com/builder@sha256:abc".to_string(),
            stack: BuildStack {
                run_image: "registry.example.com/run@sha256:def".to_string(),
                id: "io.buildpacks.stacks.jammy".to_string(),
            },
            buildpacks: vec![BuildpackMetadata::new("paketo-buildpacks/go", version)],
            observed_stack_generation: 3,
            observed_store_generation: 7,
        }
    }

    #[test]
    fn both_kinds_share_the_kiln_group() {
        assert_eq!(Builder::group(&()), crate::KILN_GROUP);
        assert_eq!(ClusterBuilder::group(&()), crate::KILN_GROUP);
        assert_eq!(ClusterBuilder::kind(&()), CLUSTER_BUILDER_KIND);
        assert_eq!(Builder::kind(&()), BUILDER_KIND);
    }

    #[test]
    fn record_replaces_prior_result() {
        let mut status = BuilderStatus::default();
        status.apply_record(record("1.0.0"));
        status.apply_record(record("1.1.0"));

        assert_eq!(status.builder_metadata.len(), 1);
        assert_eq!(status.builder_metadata[0].version, "1.1.0");
        assert_eq!(status.observed_store_generation, 7);
        assert!(get_condition(&status.conditions, CONDITION_READY)
            .unwrap()
            .is_true());
    }

    #[test]
    fn create_error_keeps_last_image() {
        let mut status = BuilderStatus::default();
        status.apply_record(record("1.0.0"));
        status.apply_create_error("buildpack paketo-buildpacks/go not found");

        let ready = get_condition(&status.conditions, CONDITION_READY).unwrap();
        assert!(ready.is_false());
        assert_eq!(ready.message, "buildpack paketo-buildpacks/go not found");
        assert_eq!(status.latest_image, "registry.example.com/builder@sha256:abc");
    }

    #[test]
    fn namespaced_builder_uses_its_own_namespace_for_account() {
        let mut builder = Builder::new(
            "go",
            NamespacedBuilderSpec {
                builder: BuilderSpec::default(),
                service_account: "pusher".to_string(),
            },
        );
        builder.metadata.namespace = Some("team-a".to_string());

        let sa = builder.service_account();
        assert_eq!(sa.to_string(), "team-a/pusher");
    }

    #[test]
    fn spec_flattens_into_resource_body() {
        let json = serde_json::json!({
            "tag": "registry.example.com/builder",
            "stack": {"kind": "ClusterStack", "name": "jammy"},
            "store": {"name": "default"},
            "serviceAccountRef": {"namespace": "kiln", "name": "pusher"},
            "order": [{"group": [{"id": "paketo-buildpacks/go"}]}]
        });
        let spec: ClusterBuilderSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.builder.stack.name, "jammy");
        assert_eq!(spec.builder.store.kind, "");
        assert_eq!(spec.builder.order[0].group[0].version, None);
        assert_eq!(spec.service_account_ref.namespace, "kiln");
    }

    #[test]
    fn builder_defaults_to_default_account() {
        let json = serde_json::json!({
            "tag": "registry.example.com/builder",
            "stack": {"name": "jammy"},
            "store": {"name": "default"}
        });
        let spec: NamespacedBuilderSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.service_account, "default");
    }
}
