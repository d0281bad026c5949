//! Custom Resource Definitions for Kiln
//!
//! This module contains the resources the builder reconciler reads and writes.

mod build;
mod builder;
mod stack;
mod store;
mod types;

pub use build::{
    Binding, Build, BuildBuilderSpec, BuildSpec, BuildStatus, LastBuild, BUILD_NEEDED_ANNOTATION,
    BUILD_REASON_ANNOTATION, BUILD_REASON_BUILDPACK, BUILD_REASON_COMMIT, BUILD_REASON_CONFIG,
    BUILD_REASON_STACK, BUILD_REASON_TRIGGER, COMPATIBILITY_BINDINGS_ANNOTATION,
    IMAGE_GENERATION_LABEL,
};
pub use builder::{
    Builder, BuilderRecord, BuilderResource, BuilderSpec, BuilderStatus, BuildpackRef,
    ClusterBuilder, ClusterBuilderSpec, NamespacedBuilderSpec, OrderEntry, BUILDER_KIND,
    CLUSTER_BUILDER_KIND, CLUSTER_STACK_KIND, CLUSTER_STORE_KIND,
};
pub use stack::{ClusterStack, ClusterStackSpec, ClusterStackStatus, ResolvedStackImage, StackImage};
pub use store::{ClusterStore, ClusterStoreSpec, ClusterStoreStatus, StoreBuildpack, StoreImage};
pub use types::{
    get_condition, includes_buildpack, set_condition, BuildStack, BuildpackMetadata, Condition,
    ConditionStatus, LocalObjectReference, ObjectReference, ServiceAccountRef, CONDITION_READY,
    CONDITION_SUCCEEDED,
};
