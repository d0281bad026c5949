//! Dependency tracker: re-trigger reconcilers when referenced resources change
//!
//! Reconcilers only watch their own kind. When a builder reads a stack, it
//! records the relation here; when the stack's informer later reports a
//! change, every builder that recently read it is enqueued again.
//!
//! Relations carry a lease. A relation that is not refreshed within the lease
//! is skipped and dropped the next time its resource changes, so references a
//! builder no longer makes stop re-triggering it without a sweeper task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::identity::{ObjectIdentity, ObjectKey};
use crate::{Error, Result};

/// Callback that queues a reconcile key; must not block
pub type EnqueueFn = Arc<dyn Fn(ObjectKey) + Send + Sync>;

/// Registry of "resource X is read by reconcile key Y" relations
pub struct Tracker {
    lease: Duration,
    enqueue: EnqueueFn,
    dependents: DashMap<ObjectIdentity, HashMap<ObjectKey, Instant>>,
}

impl Tracker {
    /// Create a tracker whose relations expire after `lease`
    pub fn new(enqueue: EnqueueFn, lease: Duration) -> Self {
        Self {
            lease,
            enqueue,
            dependents: DashMap::new(),
        }
    }

    /// Record that `dependent` must be re-enqueued when `reference` changes
    ///
    /// Tracking the same pair again only refreshes the lease.
    pub fn track(&self, reference: &ObjectIdentity, dependent: ObjectKey) -> Result<()> {
        if reference.kind.is_empty() {
            return Err(Error::validation(format!(
                "tracked reference {:?} has no kind",
                reference.name
            )));
        }
        if reference.name.is_empty() {
            return Err(Error::validation(format!(
                "tracked {} reference has no name",
                reference.kind
            )));
        }

        let expires = Instant::now() + self.lease;
        trace!(reference = %reference, dependent = %dependent, "tracking");
        self.dependents
            .entry(reference.clone())
            .or_default()
            .insert(dependent, expires);
        Ok(())
    }

    /// Enqueue every dependent of `changed` whose lease is still live
    pub fn on_changed(&self, changed: &ObjectIdentity) {
        let live: Vec<ObjectKey> = {
            let Some(mut entry) = self.dependents.get_mut(changed) else {
                return;
            };
            let now = Instant::now();
            entry.retain(|_, expires| *expires > now);
            let live = entry.keys().cloned().collect();
            if entry.is_empty() {
                drop(entry);
                self.dependents.remove_if(changed, |_, deps| deps.is_empty());
            }
            live
        };

        for key in live {
            trace!(changed = %changed, dependent = %key, "re-enqueueing dependent");
            (self.enqueue)(key);
        }
    }

    /// Number of references with at least one recorded dependent
    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}
