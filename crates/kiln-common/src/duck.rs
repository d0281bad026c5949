//! Duck lookup over the two builder kinds
//!
//! Consumers that only need a builder's identity and observed state resolve a
//! `{kind, name}` reference through [`DuckBuilderNamespaceLister::get`] and
//! receive a [`DuckBuilder`], whichever kind backs it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{
    get_condition, BuildBuilderSpec, BuildStack, Builder, BuilderStatus, BuildpackMetadata,
    ClusterBuilder, LocalObjectReference, ObjectReference, BUILDER_KIND, CLUSTER_BUILDER_KIND,
    CONDITION_READY,
};
use crate::identity::ObjectKey;
use crate::informer::{Handler, Informer, Lister};
use crate::{Error, Result};

/// The builder kinds a duck reference may name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuilderKind {
    /// Namespace-local `Builder`
    Builder,
    /// Cluster-global `ClusterBuilder`
    ClusterBuilder,
}

impl BuilderKind {
    /// Kind tag as it appears in references
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builder => BUILDER_KIND,
            Self::ClusterBuilder => CLUSTER_BUILDER_KIND,
        }
    }
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuilderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            BUILDER_KIND => Ok(Self::Builder),
            CLUSTER_BUILDER_KIND => Ok(Self::ClusterBuilder),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// Spec fields every builder kind can answer for
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DuckBuilderSpec {
    /// Secrets for pulling the builder image
    ///
    /// Neither `Builder` nor `ClusterBuilder` carries pull secrets, so this is
    /// empty for both and builds pull the builder image with their own
    /// service account's credentials.
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Kind-independent view of a builder
#[derive(Clone, Debug, PartialEq)]
pub struct DuckBuilder {
    /// Concrete kind backing this view
    pub kind: BuilderKind,
    /// Object metadata
    pub metadata: ObjectMeta,
    /// Shared spec fields
    pub spec: DuckBuilderSpec,
    /// Observed state
    pub status: BuilderStatus,
}

impl DuckBuilder {
    /// Whether the builder reports `Ready=True` and has produced an image
    pub fn ready(&self) -> bool {
        !self.status.latest_image.is_empty()
            && get_condition(&self.status.conditions, CONDITION_READY)
                .is_some_and(|c| c.is_true())
    }

    /// Builder image reference as a build consumes it
    pub fn build_builder_spec(&self) -> BuildBuilderSpec {
        BuildBuilderSpec {
            image: self.status.latest_image.clone(),
            image_pull_secrets: self.spec.image_pull_secrets.clone(),
        }
    }

    /// Buildpacks baked into the latest image
    pub fn buildpack_metadata(&self) -> &[BuildpackMetadata] {
        &self.status.builder_metadata
    }

    /// Stack the latest image was produced on
    pub fn stack(&self) -> &BuildStack {
        &self.status.stack
    }

    /// Run image builds on this builder use
    pub fn run_image(&self) -> &str {
        &self.status.stack.run_image
    }
}

impl From<Builder> for DuckBuilder {
    fn from(builder: Builder) -> Self {
        Self {
            kind: BuilderKind::Builder,
            metadata: builder.metadata,
            spec: DuckBuilderSpec::default(),
            status: builder.status.unwrap_or_default(),
        }
    }
}

impl From<ClusterBuilder> for DuckBuilder {
    fn from(builder: ClusterBuilder) -> Self {
        Self {
            kind: BuilderKind::ClusterBuilder,
            metadata: builder.metadata,
            spec: DuckBuilderSpec::default(),
            status: builder.status.unwrap_or_default(),
        }
    }
}

/// Both builder informers, subscribed to as one
#[derive(Clone)]
pub struct DuckBuilderInformer {
    builders: Arc<Informer<Builder>>,
    cluster_builders: Arc<Informer<ClusterBuilder>>,
}

impl DuckBuilderInformer {
    /// Wrap the informers of both builder kinds
    pub fn new(
        builders: Arc<Informer<Builder>>,
        cluster_builders: Arc<Informer<ClusterBuilder>>,
    ) -> Self {
        Self {
            builders,
            cluster_builders,
        }
    }

    /// Register `handler` for changes to either kind
    pub fn add_event_handler(&self, handler: Handler) {
        self.builders.add_event_handler(handler.clone());
        self.cluster_builders.add_event_handler(handler);
    }

    /// Lister over both kinds
    pub fn lister(&self) -> DuckBuilderLister {
        DuckBuilderLister {
            builders: self.builders.lister(),
            cluster_builders: self.cluster_builders.lister(),
        }
    }
}

/// Lister over both builder kinds
#[derive(Clone)]
pub struct DuckBuilderLister {
    builders: Lister<Builder>,
    cluster_builders: Lister<ClusterBuilder>,
}

impl DuckBuilderLister {
    /// Scope lookups to the namespace namespace-local builders are read from
    pub fn namespace(&self, namespace: impl Into<String>) -> DuckBuilderNamespaceLister<'_> {
        DuckBuilderNamespaceLister {
            lister: self,
            namespace: namespace.into(),
        }
    }
}

/// Lister over both builder kinds, scoped to one namespace
pub struct DuckBuilderNamespaceLister<'a> {
    lister: &'a DuckBuilderLister,
    namespace: String,
}

impl DuckBuilderNamespaceLister<'_> {
    /// Resolve `reference` through the accessor of the kind it names
    pub fn get(&self, reference: &ObjectReference) -> Result<DuckBuilder> {
        match reference.kind.parse::<BuilderKind>()? {
            BuilderKind::Builder => self
                .lister
                .builders
                .get(&ObjectKey::namespaced(&self.namespace, &reference.name))
                .map(DuckBuilder::from),
            BuilderKind::ClusterBuilder => self
                .lister
                .cluster_builders
                .get(&ObjectKey::cluster(&reference.name))
                .map(DuckBuilder::from),
        }
    }
}
