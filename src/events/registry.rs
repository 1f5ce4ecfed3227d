use super::Subscriber;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Generation stamp of a registry entry. Ids are never reused, so a stale
/// [`Subscription`] can never remove somebody else's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entry {
    id: SubscriptionId,
    target: Weak<dyn Subscriber>,
    // Subscription handles still referring to this entry
    guards: usize,
}

impl Entry {
    fn address(&self) -> *const () {
        self.target.as_ptr().cast::<()>()
    }
}

struct RegistryInner {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    pruned: AtomicU64,
    dedupe: bool,
}

impl RegistryInner {
    fn remove_id(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                entries.remove(index);
                debug!("Subscription {} removed. Remaining entries: {}", id, entries.len());
                true
            }
            None => false,
        }
    }

    /// One handle to `id` went away. The entry goes with the last one.
    fn release(&self, id: SubscriptionId) {
        let mut entries = self.entries.lock();
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return;
        };

        let entry = &mut entries[index];
        entry.guards = entry.guards.saturating_sub(1);
        if entry.guards > 0 {
            trace!("Subscription {} released, {} handle(s) left", id, entry.guards);
            return;
        }

        entries.remove(index);
        debug!("Subscription {} removed. Remaining entries: {}", id, entries.len());
    }
}

/// Weak-handle storage for bus subscribers.
///
/// Entries keep registration order. The registry never extends a
/// subscriber's lifetime: once the last `Arc` is gone the entry is dead and
/// gets pruned by the next scan that walks over it.
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::with_dedupe(false)
    }

    /// With `dedupe` set, adding an object that already has a live entry
    /// returns another handle to the existing entry instead of a second one.
    /// The entry stays until every handle to it is dropped.
    pub fn with_dedupe(dedupe: bool) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                pruned: AtomicU64::new(0),
                dedupe,
            }),
        }
    }

    pub fn add<S: Subscriber>(&self, subscriber: &Arc<S>) -> Subscription {
        let target: Weak<S> = Arc::downgrade(subscriber);
        self.insert(target)
    }

    pub fn add_dyn(&self, subscriber: &Arc<dyn Subscriber>) -> Subscription {
        self.insert(Arc::downgrade(subscriber))
    }

    fn insert(&self, target: Weak<dyn Subscriber>) -> Subscription {
        let mut entries = self.inner.entries.lock();

        if self.inner.dedupe {
            let address = target.as_ptr().cast::<()>();
            if let Some(existing) = entries
                .iter_mut()
                .find(|entry| entry.target.strong_count() > 0 && entry.address() == address)
            {
                existing.guards += 1;
                trace!(
                    "Subscriber already registered as {} ({} handle(s))",
                    existing.id, existing.guards
                );
                return Subscription::new(existing.id, &self.inner);
            }
        }

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Entry {
            id,
            target,
            guards: 1,
        });
        debug!("Subscriber registered as {}. Total entries: {}", id, entries.len());

        Subscription::new(id, &self.inner)
    }

    /// Remove the first live entry pointing at `subscriber`. Returns whether
    /// an entry was removed; removing an unknown object is a no-op.
    pub fn remove<S: Subscriber + ?Sized>(&self, subscriber: &Arc<S>) -> bool {
        let address = Arc::as_ptr(subscriber).cast::<()>();
        let mut entries = self.inner.entries.lock();

        let position = entries
            .iter()
            .position(|entry| entry.target.strong_count() > 0 && entry.address() == address);

        match position {
            Some(index) => {
                let entry = entries.remove(index);
                debug!(
                    "Subscriber {} unsubscribed. Remaining entries: {}",
                    entry.id,
                    entries.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn remove_id(&self, id: SubscriptionId) -> bool {
        self.inner.remove_id(id)
    }

    /// Walk all entries under the registry lock, applying `predicate` to every
    /// live subscriber and collecting its `Some` results. Dead entries are
    /// removed after the walk, highest index first so earlier indices stay
    /// valid.
    ///
    /// The predicate runs with the lock held and must not call back into the
    /// registry.
    pub fn scan_live<R, F>(&self, mut predicate: F) -> Vec<R>
    where
        F: FnMut(&Arc<dyn Subscriber>) -> Option<R>,
    {
        let mut entries = self.inner.entries.lock();
        let mut results = Vec::new();
        let mut dead = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            match entry.target.upgrade() {
                Some(subscriber) => {
                    if let Some(result) = predicate(&subscriber) {
                        results.push(result);
                    }
                }
                None => dead.push(index),
            }
        }

        for index in dead.iter().rev() {
            let entry = entries.remove(*index);
            trace!("Pruned dead subscriber {}", entry.id);
        }

        if !dead.is_empty() {
            self.inner
                .pruned
                .fetch_add(dead.len() as u64, Ordering::Relaxed);
            debug!(
                "Pruned {} dead subscriber(s). Remaining entries: {}",
                dead.len(),
                entries.len()
            );
        }

        results
    }

    /// Strong handles to every live subscriber, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.scan_live(|subscriber| Some(Arc::clone(subscriber)))
    }

    /// Number of entries, including dead ones not yet pruned.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_count(&self) -> usize {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.target.strong_count() > 0)
            .count()
    }

    /// Total number of dead entries removed by scans so far.
    pub fn pruned_count(&self) -> u64 {
        self.inner.pruned.load(Ordering::Relaxed)
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.entries.lock().iter().any(|entry| entry.id == id)
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("entries", &self.len())
            .field("dedupe", &self.inner.dedupe)
            .finish()
    }
}

/// Scoped registration. Dropping it removes the entry from the registry.
///
/// Use [`Subscription::detach`] to leave the entry in place; it then lives
/// until the subscriber itself is dropped or explicitly removed.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    fn new(id: SubscriptionId, registry: &Arc<RegistryInner>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the entry this handle refers to is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|inner| inner.entries.lock().iter().any(|entry| entry.id == self.id))
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Give up the handle without releasing it. The entry can then only go
    /// away with its subscriber or through an explicit remove.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.release(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
