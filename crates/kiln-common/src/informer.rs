//! Resource cache: a watched, read-mostly mirror of one resource kind
//!
//! An [`Informer`] owns the single writer of a reflector store and fans out
//! change notifications to registered handlers. Reconcilers read through a
//! [`Lister`], which hands back owned copies so a fetched object can be
//! mutated without touching what other workers see.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Resource;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::identity::{ObjectIdentity, ObjectKey};
use crate::{Error, Result};

/// What happened to a cached object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    /// First seen
    Added,
    /// Seen before and applied again
    Updated,
    /// Removed, either by a delete event or by absence from a relist
    Deleted,
}

/// A change observed by an informer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// What happened
    pub kind: NotificationKind,
    /// Which object it happened to
    pub object: ObjectIdentity,
}

impl Notification {
    /// Reconcile key of the changed object
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.object.namespace.clone(),
            name: self.object.name.clone(),
        }
    }
}

/// Callback invoked for every notification
///
/// Handlers run on the watch task and must not block.
pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Single-writer cache of one resource kind with change notifications
pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Mutex<Writer<K>>,
    store: Store<K>,
    handlers: RwLock<Vec<Handler>>,
    /// Objects cached when a relist began, drained as the relist re-reports them
    relisting: Mutex<Option<Vec<Arc<K>>>>,
    synced: watch::Sender<bool>,
}

impl<K> Default for Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Create an empty, unsynced informer
    pub fn new() -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        let (synced, _) = watch::channel(false);
        Self {
            writer: Mutex::new(writer),
            store,
            handlers: RwLock::new(Vec::new()),
            relisting: Mutex::new(None),
            synced,
        }
    }

    /// Register a handler for every subsequent notification
    pub fn add_event_handler(&self, handler: Handler) {
        self.handlers.write().push(handler);
    }

    /// Reader over the cache
    pub fn lister(&self) -> Lister<K> {
        Lister {
            store: self.store.clone(),
        }
    }

    /// Whether the first full listing has been applied
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the first full listing has been applied
    pub async fn wait_for_sync(&self) {
        let mut rx = self.synced.subscribe();
        // Sender is owned by self, so the channel cannot close while we wait
        let _ = rx.wait_for(|synced| *synced).await;
    }

    /// Apply one watch event to the cache and notify handlers
    pub fn apply(&self, event: &Event<K>) {
        let notifications = {
            let mut writer = self.writer.lock();
            let notifications = self.diff(event);
            writer.apply_watcher_event(event);
            notifications
        };

        if matches!(event, Event::InitDone) && !self.has_synced() {
            self.synced.send_replace(true);
            debug!(kind = %K::kind(&()), objects = self.store.state().len(), "cache synced");
        }

        if notifications.is_empty() {
            return;
        }
        let handlers = self.handlers.read().clone();
        for notification in &notifications {
            for handler in &handlers {
                handler(notification);
            }
        }
    }

    /// Notifications an event produces against the cache as it is now
    fn diff(&self, event: &Event<K>) -> Vec<Notification> {
        match event {
            Event::Apply(obj) => vec![self.applied(obj)],
            Event::Delete(obj) => vec![Notification {
                kind: NotificationKind::Deleted,
                object: ObjectIdentity::of(obj),
            }],
            Event::Init => {
                *self.relisting.lock() = Some(self.store.state());
                Vec::new()
            }
            Event::InitApply(obj) => {
                if let Some(previous) = self.relisting.lock().as_mut() {
                    let seen = ObjectRef::from_obj(obj);
                    previous.retain(|p| ObjectRef::from_obj(p.as_ref()) != seen);
                }
                vec![self.applied(obj)]
            }
            Event::InitDone => self
                .relisting
                .lock()
                .take()
                .unwrap_or_default()
                .iter()
                .map(|gone| Notification {
                    kind: NotificationKind::Deleted,
                    object: ObjectIdentity::of(gone.as_ref()),
                })
                .collect(),
        }
    }

    fn applied(&self, obj: &K) -> Notification {
        let kind = if self.store.get(&ObjectRef::from_obj(obj)).is_some() {
            NotificationKind::Updated
        } else {
            NotificationKind::Added
        };
        Notification {
            kind,
            object: ObjectIdentity::of(obj),
        }
    }
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Watch `api` and apply events until the stream ends
    ///
    /// Watch errors are logged and retried with the watcher's default backoff.
    pub async fn run(&self, api: Api<K>, config: watcher::Config) {
        info!(kind = %K::kind(&()), "Starting informer");
        let mut stream = watcher::watcher(api, config).default_backoff().boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.apply(&event),
                Err(e) => warn!(kind = %K::kind(&()), error = %e, "watch error, backing off"),
            }
        }

        info!(kind = %K::kind(&()), "Informer stopped");
    }
}

/// Read-only view of an informer's cache
#[derive(Clone)]
pub struct Lister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
}

impl<K> Lister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Owned copy of the object stored under `key`
    pub fn get(&self, key: &ObjectKey) -> Result<K> {
        let mut obj_ref = ObjectRef::new(&key.name);
        if let Some(ns) = &key.namespace {
            obj_ref = obj_ref.within(ns);
        }
        self.store
            .get(&obj_ref)
            .map(|shared| shared.as_ref().clone())
            .ok_or_else(|| Error::not_found(K::kind(&()), key.to_string()))
    }

    /// Owned copies of every cached object
    pub fn list(&self) -> Vec<K> {
        self.store
            .state()
            .iter()
            .map(|shared| shared.as_ref().clone())
            .collect()
    }
}

/// Keys of every object in a lister, mostly useful for resync
pub fn cached_keys<K>(lister: &Lister<K>) -> HashSet<ObjectKey>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    lister.list().iter().map(ObjectKey::of).collect()
}
