//! Wiring that drives the builder reconciler
//!
//! Owns the informers for the reconciled kind and its dependencies, routes
//! their notifications into a [`WorkQueue`], and runs worker tasks that pull
//! keys and reconcile them until cancelled.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join3;
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiln_common::config::ControllerConfig;
use kiln_common::crd::{BuilderResource, ClusterStack, ClusterStore};
use kiln_common::identity::ObjectKey;
use kiln_common::informer::{cached_keys, Informer, Lister, Notification};
use kiln_common::queue::WorkQueue;
use kiln_common::tracker::Tracker;
use kiln_common::Result;

use crate::controller::{reconcile, BuilderCreator, Context};

/// Run the reconciler for `K` until `cancel` fires
///
/// Returns once every worker has stopped. A pass in flight at cancellation is
/// abandoned.
pub async fn run<K>(
    client: Client,
    config: ControllerConfig,
    creator: Arc<dyn BuilderCreator>,
    cancel: CancellationToken,
) -> Result<()>
where
    K: BuilderResource + DeserializeOwned,
{
    config.validate()?;
    info!(kind = K::KIND, workers = config.workers, "Starting builder controller");

    let builders = Arc::new(Informer::<K>::new());
    let stores = Arc::new(Informer::<ClusterStore>::new());
    let stacks = Arc::new(Informer::<ClusterStack>::new());
    let queue = WorkQueue::<ObjectKey>::new(config.rate_limit());

    let q = queue.clone();
    builders.add_event_handler(Arc::new(move |n: &Notification| q.add(n.key())));

    let q = queue.clone();
    let tracker = Arc::new(Tracker::new(
        Arc::new(move |key: ObjectKey| q.add(key)),
        config.tracker_lease(),
    ));
    let t = tracker.clone();
    stores.add_event_handler(Arc::new(move |n: &Notification| t.on_changed(&n.object)));
    let t = tracker.clone();
    stacks.add_event_handler(Arc::new(move |n: &Notification| t.on_changed(&n.object)));

    let watch = watcher::Config::default().timeout(config.watch_timeout_secs);
    let mut background = vec![
        spawn_informer(builders.clone(), K::api(client.clone(), None), watch.clone(), cancel.clone()),
        spawn_informer(stores.clone(), Api::all(client.clone()), watch.clone(), cancel.clone()),
        spawn_informer(stacks.clone(), Api::all(client.clone()), watch, cancel.clone()),
    ];

    tokio::select! {
        _ = cancel.cancelled() => {
            info!(kind = K::KIND, "Cancelled before caches synced");
            return Ok(());
        }
        _ = join3(builders.wait_for_sync(), stores.wait_for_sync(), stacks.wait_for_sync()) => {
            info!(kind = K::KIND, "Caches synced");
        }
    }

    background.push(spawn_resync(
        builders.lister(),
        queue.clone(),
        config.resync_period(),
        cancel.clone(),
    ));

    let ctx = Arc::new(Context::new(
        client,
        builders.lister(),
        stores.lister(),
        stacks.lister(),
        tracker,
        creator,
    ));

    let workers: Vec<_> = (0..config.workers)
        .map(|worker| {
            let queue = queue.clone();
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while process_next_item(&queue, &ctx, &cancel).await {}
                debug!(worker, "Worker stopped");
            })
        })
        .collect();

    cancel.cancelled().await;
    info!(kind = K::KIND, "Shutting down builder controller");
    queue.shut_down();

    for handle in workers.into_iter().chain(background) {
        if let Err(e) = handle.await {
            warn!(error = %e, "Controller task ended abnormally");
        }
    }

    info!(kind = K::KIND, "Builder controller stopped");
    Ok(())
}

fn spawn_informer<R>(
    informer: Arc<Informer<R>>,
    api: Api<R>,
    watch: watcher::Config,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = informer.run(api, watch) => {}
        }
    })
}

/// Periodically re-enqueue every cached builder
fn spawn_resync<K>(
    lister: Lister<K>,
    queue: WorkQueue<ObjectKey>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: BuilderResource,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let keys = cached_keys(&lister);
                    debug!(kind = K::KIND, count = keys.len(), "Resyncing builders");
                    for key in keys {
                        queue.add(key);
                    }
                }
            }
        }
    })
}

/// Take one key off the queue and reconcile it
///
/// Returns `false` once the queue has shut down.
pub async fn process_next_item<K: BuilderResource>(
    queue: &WorkQueue<ObjectKey>,
    ctx: &Context<K>,
    cancel: &CancellationToken,
) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = reconcile(&key, ctx) => Some(result),
    };

    match result {
        Some(result) => handle_outcome(queue, &key, result),
        None => debug!(builder = %key, "Reconcile abandoned on shutdown"),
    }
    queue.done(&key);
    true
}

fn handle_outcome(queue: &WorkQueue<ObjectKey>, key: &ObjectKey, result: Result<()>) {
    match result {
        Ok(()) => queue.forget(key),
        Err(e) if e.is_permanent() => {
            warn!(builder = %key, error = %e, "Reconcile failed, waiting for the next change");
            queue.forget(key);
        }
        Err(e) => {
            warn!(
                builder = %key,
                error = %e,
                attempt = queue.num_requeues(key) + 1,
                "Reconcile failed, requeueing with backoff"
            );
            queue.add_rate_limited(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockBuilderCreator;
    use crate::keychain::MockKeychainFactory;
    use crate::repository::store_repository_factory;
    use crate::status::StatusClient;
    use async_trait::async_trait;
    use kiln_common::crd::{
        BuilderSpec, ClusterBuilder, ClusterBuilderSpec, ObjectReference, CLUSTER_STACK_KIND,
    };
    use kiln_common::queue::RateLimit;
    use kube::runtime::watcher::Event;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStatusClient {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl StatusClient<ClusterBuilder> for CountingStatusClient {
        async fn update_status(&self, _resource: &ClusterBuilder) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn context(builders: &Informer<ClusterBuilder>) -> Context<ClusterBuilder> {
        Context {
            builders: builders.lister(),
            stores: Informer::<ClusterStore>::new().lister(),
            stacks: Informer::<ClusterStack>::new().lister(),
            tracker: Arc::new(Tracker::new(Arc::new(|_: ObjectKey| {}), Duration::from_secs(60))),
            keychains: Arc::new(MockKeychainFactory::new()),
            repositories: store_repository_factory(),
            creator: Arc::new(MockBuilderCreator::new()),
            status: Arc::new(CountingStatusClient::default()),
        }
    }

    fn builder(stack_kind: &str) -> ClusterBuilder {
        ClusterBuilder::new(
            "default",
            ClusterBuilderSpec {
                builder: BuilderSpec {
                    tag: "registry.example.com/builder".to_string(),
                    stack: ObjectReference::new(stack_kind, "jammy"),
                    store: ObjectReference::new("ClusterStore", "default"),
                    order: vec![],
                },
                service_account_ref: Default::default(),
            },
        )
    }

    fn queue() -> WorkQueue<ObjectKey> {
        WorkQueue::new(RateLimit {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_builder_is_forgotten() {
        let builders = Informer::<ClusterBuilder>::new();
        let ctx = context(&builders);
        let queue = queue();
        let key = ObjectKey::cluster("default");
        queue.add(key.clone());

        assert!(process_next_item(&queue, &ctx, &CancellationToken::new()).await);
        assert_eq!(queue.num_requeues(&key), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_requeued_with_backoff() {
        let builders = Informer::<ClusterBuilder>::new();
        builders.apply(&Event::Apply(builder(CLUSTER_STACK_KIND)));
        let ctx = context(&builders);
        let queue = queue();
        let key = ObjectKey::cluster("default");
        queue.add(key.clone());

        // Store and stack are missing from the cache
        assert!(process_next_item(&queue, &ctx, &CancellationToken::new()).await);
        assert_eq!(queue.num_requeues(&key), 1);
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_forgotten() {
        let builders = Informer::<ClusterBuilder>::new();
        builders.apply(&Event::Apply(builder("ConfigMap")));
        let ctx = context(&builders);
        let queue = queue();
        let key = ObjectKey::cluster("default");
        queue.add_rate_limited(key.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.num_requeues(&key), 1);

        assert!(process_next_item(&queue, &ctx, &CancellationToken::new()).await);
        assert_eq!(queue.num_requeues(&key), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn shut_down_queue_stops_the_worker() {
        let builders = Informer::<ClusterBuilder>::new();
        let ctx = context(&builders);
        let queue = queue();
        queue.shut_down();

        assert!(!process_next_item(&queue, &ctx, &CancellationToken::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pass_releases_the_key() {
        let builders = Informer::<ClusterBuilder>::new();
        let ctx = context(&builders);
        let queue = queue();
        let key = ObjectKey::cluster("default");
        queue.add(key.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(process_next_item(&queue, &ctx, &cancel).await);
        assert_eq!(queue.num_requeues(&key), 0);

        // Released, so a new add queues it again
        queue.add(key.clone());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_requeues_cached_builders() {
        let builders = Informer::<ClusterBuilder>::new();
        builders.apply(&Event::Apply(builder(CLUSTER_STACK_KIND)));
        let queue = queue();
        let cancel = CancellationToken::new();

        let handle = spawn_resync(
            builders.lister(),
            queue.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
