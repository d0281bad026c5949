//! Buildpack lookup over a ClusterStore

use std::sync::Arc;

use kiln_common::crd::{ClusterStore, StoreBuildpack};
use kiln_common::{Error, Result};
use kube::ResourceExt;

/// Source of buildpacks a builder's order is resolved against
pub trait BuildpackRepository: Send + Sync {
    /// Find a buildpack by id, pinned to `version` when given
    fn find(&self, id: &str, version: Option<&str>) -> Result<StoreBuildpack>;
}

/// Builds the repository view of a store for one reconcile pass
pub type RepositoryFactory = Arc<dyn Fn(&ClusterStore) -> Arc<dyn BuildpackRepository> + Send + Sync>;

/// Factory producing a [`StoreRepository`] for each store
pub fn store_repository_factory() -> RepositoryFactory {
    Arc::new(|store: &ClusterStore| {
        Arc::new(StoreRepository::new(store)) as Arc<dyn BuildpackRepository>
    })
}

/// Repository over the buildpacks a store reports in its status
#[derive(Clone, Debug)]
pub struct StoreRepository {
    store: String,
    buildpacks: Vec<StoreBuildpack>,
}

impl StoreRepository {
    /// Snapshot the buildpacks of `store`
    pub fn new(store: &ClusterStore) -> Self {
        Self {
            store: store.name_any(),
            buildpacks: store.buildpacks().to_vec(),
        }
    }
}

impl BuildpackRepository for StoreRepository {
    /// Without a version, the first listed entry for `id` wins
    fn find(&self, id: &str, version: Option<&str>) -> Result<StoreBuildpack> {
        self.buildpacks
            .iter()
            .find(|bp| bp.id == id && version.is_none_or(|v| bp.version == v))
            .cloned()
            .ok_or_else(|| {
                let wanted = match version {
                    Some(v) => format!("{id}@{v}"),
                    None => id.to_string(),
                };
                Error::materialize(format!(
                    "could not find buildpack {wanted} in store {}",
                    self.store
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::crd::{ClusterStoreSpec, ClusterStoreStatus};

    fn store() -> ClusterStore {
        let bp = |id: &str, version: &str| StoreBuildpack {
            id: id.to_string(),
            version: version.to_string(),
            ..Default::default()
        };
        let mut store = ClusterStore::new("default", ClusterStoreSpec::default());
        store.status = Some(ClusterStoreStatus {
            buildpacks: vec![
                bp("paketo-buildpacks/go", "2.0.0"),
                bp("paketo-buildpacks/go", "1.0.0"),
                bp("paketo-buildpacks/node", "3.0.0"),
            ],
            ..Default::default()
        });
        store
    }

    #[test]
    fn pinned_version_is_matched_exactly() {
        let repo = StoreRepository::new(&store());
        let found = repo.find("paketo-buildpacks/go", Some("1.0.0")).unwrap();
        assert_eq!(found.version, "1.0.0");
    }

    #[test]
    fn unpinned_lookup_takes_first_listed() {
        let repo = StoreRepository::new(&store());
        let found = repo.find("paketo-buildpacks/go", None).unwrap();
        assert_eq!(found.version, "2.0.0");
    }

    #[test]
    fn missing_buildpack_is_a_materialize_error() {
        let repo = (store_repository_factory())(&store());
        let err = repo.find("paketo-buildpacks/go", Some("9.9.9")).unwrap_err();
        assert!(err.is_permanent_cause());
        assert_eq!(
            err.to_string(),
            "could not find buildpack paketo-buildpacks/go@9.9.9 in store default"
        );
    }

    #[test]
    fn store_without_status_is_empty() {
        let repo = StoreRepository::new(&ClusterStore::new("empty", ClusterStoreSpec::default()));
        assert!(repo.find("paketo-buildpacks/go", None).is_err());
    }
}
