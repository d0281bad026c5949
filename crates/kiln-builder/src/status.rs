//! Status persistence for builder resources

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;

use kiln_common::crd::BuilderResource;
use kiln_common::{Error, Result, FIELD_MANAGER};

/// Writes a resource's status subresource
#[async_trait]
pub trait StatusClient<K>: Send + Sync {
    /// Persist `resource`'s status
    ///
    /// Rejected with [`Error::Conflict`] when the resource changed since it was read.
    async fn update_status(&self, resource: &K) -> Result<()>;
}

/// Merge-patches the status subresource, guarded by the read resourceVersion
pub struct KubeStatusClient<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStatusClient<K> {
    /// Create a status client writing through `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> StatusClient<K> for KubeStatusClient<K>
where
    K: BuilderResource + DeserializeOwned,
{
    async fn update_status(&self, resource: &K) -> Result<()> {
        let name = resource.name_any();
        let api = K::api(self.client.clone(), resource.namespace().as_deref());

        // A resourceVersion in the patch makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource.resource_version() },
            "status": resource.builder_status(),
        });

        match api
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::conflict(K::KIND, name)),
            Err(e) => Err(e.into()),
        }
    }
}
