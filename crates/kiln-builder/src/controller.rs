//! Builder reconciliation
//!
//! One reconciler serves both `Builder` and `ClusterBuilder`. A pass:
//!
//! 1. reads the builder from the cache (gone means deleted, nothing to do)
//! 2. tracks and reads its store and stack
//! 3. waits for the stack to be ready
//! 4. resolves push credentials from the builder's service account
//! 5. asks the [`BuilderCreator`] to materialize the builder image
//! 6. records the result (or the materialization error) in status
//! 7. writes status only if it differs from what the cache holds
//!
//! Missing dependencies, unready stacks, credential failures and write
//! conflicts are transient and retried with backoff without touching status.
//! Malformed references and materialization failures are recorded on the
//! builder and returned as [`Error::Permanent`].

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use kiln_common::crd::{
    BuilderRecord, BuilderResource, BuilderSpec, ClusterStack, ClusterStore, ObjectReference,
    CLUSTER_STACK_KIND, CLUSTER_STORE_KIND,
};
use kiln_common::identity::{ObjectIdentity, ObjectKey};
use kiln_common::informer::Lister;
use kiln_common::tracker::Tracker;
use kiln_common::{Error, Result};

use crate::keychain::{Keychain, KeychainFactory, ServiceAccountKeychainFactory};
use crate::repository::{store_repository_factory, BuildpackRepository, RepositoryFactory};
use crate::status::{KubeStatusClient, StatusClient};

/// Materializes a builder image from a stack and resolved buildpacks
///
/// This is the only step of a pass that talks to registries.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuilderCreator: Send + Sync {
    /// Build and push the builder image described by `spec`
    async fn create_builder(
        &self,
        keychain: &Keychain,
        repository: Arc<dyn BuildpackRepository>,
        stack: &ClusterStack,
        spec: &BuilderSpec,
    ) -> Result<BuilderRecord>;
}

/// Shared state for reconciling one builder kind
pub struct Context<K: BuilderResource> {
    /// Cache of the reconciled kind
    pub builders: Lister<K>,
    /// Cache of stores
    pub stores: Lister<ClusterStore>,
    /// Cache of stacks
    pub stacks: Lister<ClusterStack>,
    /// Re-enqueues builders when their store or stack changes
    pub tracker: Arc<Tracker>,
    /// Resolves push credentials
    pub keychains: Arc<dyn KeychainFactory>,
    /// Produces the buildpack view of a store
    pub repositories: RepositoryFactory,
    /// Materializes builder images
    pub creator: Arc<dyn BuilderCreator>,
    /// Persists status
    pub status: Arc<dyn StatusClient<K>>,
}

impl<K> Context<K>
where
    K: BuilderResource + DeserializeOwned,
{
    /// Context backed by the API server for credentials and status writes
    pub fn new(
        client: Client,
        builders: Lister<K>,
        stores: Lister<ClusterStore>,
        stacks: Lister<ClusterStack>,
        tracker: Arc<Tracker>,
        creator: Arc<dyn BuilderCreator>,
    ) -> Self {
        Self {
            builders,
            stores,
            stacks,
            tracker,
            keychains: Arc::new(ServiceAccountKeychainFactory::new(client.clone())),
            repositories: store_repository_factory(),
            creator,
            status: Arc::new(KubeStatusClient::new(client)),
        }
    }
}

/// Reconcile the builder stored under `key`
#[instrument(skip_all, fields(kind = K::KIND, builder = %key))]
pub async fn reconcile<K: BuilderResource>(key: &ObjectKey, ctx: &Context<K>) -> Result<()> {
    let original = match ctx.builders.get(key) {
        Ok(builder) => builder,
        Err(e) if e.is_not_found() => {
            debug!("builder no longer exists");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut desired = original.clone();
    match reconcile_builder(key, &original, ctx).await {
        Ok(record) => {
            info!(image = %record.image, "builder image up to date");
            desired.builder_status_mut().apply_record(record);
            update_status(&original, desired, ctx).await
        }
        Err(e) if e.is_permanent_cause() => {
            warn!(error = %e, "builder reconciliation failed permanently");
            desired.builder_status_mut().apply_create_error(e.to_string());
            update_status(&original, desired, ctx).await?;
            Err(Error::permanent(e))
        }
        Err(e) => {
            debug!(error = %e, "builder reconciliation will be retried");
            Err(e)
        }
    }
}

async fn reconcile_builder<K: BuilderResource>(
    key: &ObjectKey,
    builder: &K,
    ctx: &Context<K>,
) -> Result<BuilderRecord> {
    let spec = builder.builder_spec();

    // Tracked before lookup so a dependency that appears later re-triggers us
    let store_ref = dependency::<ClusterStore>(&spec.store, CLUSTER_STORE_KIND)?;
    let stack_ref = dependency::<ClusterStack>(&spec.stack, CLUSTER_STACK_KIND)?;
    ctx.tracker.track(&store_ref, key.clone())?;
    ctx.tracker.track(&stack_ref, key.clone())?;

    let store = ctx.stores.get(&ObjectKey::cluster(&spec.store.name))?;
    let stack = ctx.stacks.get(&ObjectKey::cluster(&spec.stack.name))?;

    if !stack.is_ready() {
        return Err(Error::not_ready(format!(
            "stack {} is not ready",
            stack.name_any()
        )));
    }

    let keychain = ctx.keychains.keychain_for(&builder.service_account()).await?;

    let repository = (ctx.repositories)(&store);
    let mut record = ctx
        .creator
        .create_builder(&keychain, repository, &stack, spec)
        .await
        .map_err(|e| {
            if e.is_permanent_cause() {
                e
            } else {
                Error::materialize(e.to_string())
            }
        })?;

    record.observed_stack_generation = stack.metadata.generation.unwrap_or_default();
    record.observed_store_generation = store.metadata.generation.unwrap_or_default();
    Ok(record)
}

/// Identity of a cluster-scoped dependency, rejecting references of another kind
///
/// A namespace on the reference is ignored, matching how the dependency is
/// looked up and how its change notifications identify it.
fn dependency<D>(reference: &ObjectReference, expected_kind: &str) -> Result<ObjectIdentity>
where
    D: kube::Resource<DynamicType = ()>,
{
    if !reference.kind.is_empty() && reference.kind != expected_kind {
        return Err(Error::validation(format!(
            "{} {:?} must reference a {expected_kind}",
            reference.kind, reference.name
        )));
    }
    let mut identity = ObjectIdentity::from_reference::<D>(reference);
    identity.namespace = None;
    Ok(identity)
}

async fn update_status<K: BuilderResource>(
    original: &K,
    mut desired: K,
    ctx: &Context<K>,
) -> Result<()> {
    let generation = desired.meta().generation.unwrap_or_default();
    desired.builder_status_mut().observed_generation = generation;

    if original.builder_status() == desired.builder_status() {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    ctx.status.update_status(&desired).await?;
    debug!(observed_generation = generation, "status updated");
    Ok(())
}
