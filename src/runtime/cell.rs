//! Mutable cell interface and authoritative storage
//!
//! `CellCore` is the storage shared by realtime cells and web-mode control
//! cells. A commit stores the value, mirrors a transfer clone into the
//! holder, then notifies listeners, all while holding the cell's commit lock.
//! Commits made by a listener are queued and delivered by the outermost
//! commit once the current notification round finishes.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::CellResult;
use super::holder::SyncHolder;
use super::policy::{CommitPolicy, RawSlot};
use super::registry::CellId;
use super::value::CellValue;

/// Caller-assigned listener identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl From<u64> for ListenerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked with every committed value
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Function from the current value to the value to commit
pub type Modifier<T> = Box<dyn FnOnce(&T) -> T + Send>;

/// Opaque in-flight animation owned by the animation subsystem
pub type PendingAnimation = Box<dyn Any + Send>;

/// Operations shared by every cell flavour
pub trait MutableCell<T: CellValue> {
    /// Identity of the logical cell
    fn id(&self) -> CellId;

    /// Current committed value
    fn value(&self) -> CellResult<T>;

    /// Write a value through the commit policy with `force_update = true`
    fn set_value(&self, value: T) -> CellResult<()>;

    /// Commit `modifier(current)` (or `current` when no modifier is given)
    fn modify_with(&self, modifier: Option<Modifier<T>>, force_update: bool) -> CellResult<()>;

    /// Register a listener; an existing id has its callback replaced
    fn add_listener<F>(&self, id: ListenerId, listener: F) -> CellResult<()>
    where
        F: Fn(&T) + Send + Sync + 'static;

    /// Unregister a listener; unknown ids are ignored
    fn remove_listener(&self, id: ListenerId) -> CellResult<()>;

    /// Commit `f(current)`, forcing the update
    fn modify<F>(&self, f: F) -> CellResult<()>
    where
        F: FnOnce(&T) -> T + Send + 'static,
        Self: Sized,
    {
        self.modify_with(Some(Box::new(f)), true)
    }

    /// Re-commit the current value so listeners fire again
    fn touch(&self) -> CellResult<()> {
        self.modify_with(None, true)
    }
}

/// Authoritative storage for one logical cell
pub(crate) struct CellCore<T: CellValue> {
    id: CellId,
    policy: CommitPolicy,
    value: RwLock<T>,
    holder: Option<Arc<SyncHolder<T>>>,
    listeners: Mutex<BTreeMap<ListenerId, Listener<T>>>,
    pending_animation: Mutex<Option<PendingAnimation>>,
    commit_lock: ReentrantMutex<()>,
    undelivered: Mutex<VecDeque<T>>,
    delivering: AtomicBool,
}

impl<T: CellValue> CellCore<T> {
    pub(crate) fn new(
        id: CellId,
        initial: T,
        holder: Option<Arc<SyncHolder<T>>>,
        policy: CommitPolicy,
    ) -> Self {
        Self {
            id,
            policy,
            value: RwLock::new(initial),
            holder,
            listeners: Mutex::new(BTreeMap::new()),
            pending_animation: Mutex::new(None),
            commit_lock: ReentrantMutex::new(()),
            undelivered: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> CellId {
        self.id
    }

    pub(crate) fn holder(&self) -> Option<&Arc<SyncHolder<T>>> {
        self.holder.as_ref()
    }

    pub(crate) fn value(&self) -> T {
        self.value.read().clone()
    }

    pub(crate) fn set_value(&self, value: T) -> CellResult<()> {
        let _commit = self.commit_lock.lock();
        self.policy.commit(self, value, true)?;
        Ok(())
    }

    pub(crate) fn modify_with(
        &self,
        modifier: Option<Modifier<T>>,
        force_update: bool,
    ) -> CellResult<()> {
        let _commit = self.commit_lock.lock();
        let current = self.value();
        let next = match modifier {
            Some(modifier) => modifier(&current),
            None => current,
        };
        self.policy.commit(self, next, force_update)?;
        Ok(())
    }

    pub(crate) fn add_listener(&self, id: ListenerId, listener: Listener<T>) {
        if self.listeners.lock().insert(id, listener).is_some() {
            tracing::debug!(cell = %self.id, listener = %id, "replaced listener");
        }
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn set_pending_animation(
        &self,
        animation: Option<PendingAnimation>,
    ) -> Option<PendingAnimation> {
        std::mem::replace(&mut *self.pending_animation.lock(), animation)
    }

    pub(crate) fn has_pending_animation(&self) -> bool {
        self.pending_animation.lock().is_some()
    }

    /// Deliver queued commits in order. Only the outermost commit on the
    /// stack delivers; nested commits leave their value in the queue.
    fn deliver(&self) {
        if self.delivering.swap(true, Ordering::Acquire) {
            return;
        }
        let _delivery = Delivery(self);

        loop {
            let next = self.undelivered.lock().pop_front();
            match next {
                Some(value) => self.notify(&value),
                None => break,
            }
        }
    }

    fn notify(&self, value: &T) {
        // Snapshot so listeners may add or remove listeners on this cell.
        let listeners: Vec<Listener<T>> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(value);
        }
    }
}

/// Ends a delivery round, including one cut short by a panicking listener
struct Delivery<'a, T: CellValue>(&'a CellCore<T>);

impl<T: CellValue> Drop for Delivery<'_, T> {
    fn drop(&mut self) {
        self.0.undelivered.lock().clear();
        self.0.delivering.store(false, Ordering::Release);
    }
}

impl<T: CellValue> RawSlot<T> for CellCore<T> {
    fn raw_value(&self) -> CellResult<T> {
        Ok(self.value())
    }

    fn set_raw(&self, value: T) -> CellResult<()> {
        let _commit = self.commit_lock.lock();

        // Clone before storing so a failed clone commits nothing.
        let mirrored = match &self.holder {
            Some(_) => Some(value.clone_for_transfer()?),
            None => None,
        };

        *self.value.write() = value.clone();

        if let (Some(holder), Some(mirrored)) = (&self.holder, mirrored) {
            let version = holder.publish(mirrored);
            tracing::trace!(cell = %self.id, version, "mirrored commit into holder");
        }

        self.undelivered.lock().push_back(value);
        self.deliver();
        Ok(())
    }
}
