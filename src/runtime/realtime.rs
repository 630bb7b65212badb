//! Realtime runtime: authoritative cells and the worker that drives them
//!
//! The worker is a dedicated thread draining the dispatch channel in FIFO
//! order. Each job receives the `RealtimeScope`, which lazily instantiates a
//! `RealtimeCell` the first time a native cell is used inside the runtime,
//! attaching the holder registered for that cell.

use std::any::{Any, type_name};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;

use super::cell::{CellCore, ListenerId, MutableCell, Modifier, PendingAnimation};
use super::control::{Backing, ControlCell};
use super::dispatch::{Dispatcher, Envelope};
use super::error::{CellError, CellResult, Result, RuntimeError};
use super::holder::SyncHolder;
use super::policy::{CommitPolicy, RawSlot};
use super::registry::{CellId, HandleRegistry};
use super::value::CellValue;

thread_local! {
    static IN_REALTIME: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a realtime runtime worker
pub fn is_realtime_thread() -> bool {
    IN_REALTIME.with(Cell::get)
}

/// Authoritative cell living inside the realtime runtime.
///
/// Also usable on its own as a single-runtime cell.
pub struct RealtimeCell<T: CellValue> {
    core: Arc<CellCore<T>>,
}

impl<T: CellValue> RealtimeCell<T> {
    /// Create a cell with an optional holder to mirror commits into
    pub fn new(
        id: CellId,
        initial: T,
        holder: Option<Arc<SyncHolder<T>>>,
        policy: CommitPolicy,
    ) -> Self {
        Self::from_core(Arc::new(CellCore::new(id, initial, holder, policy)))
    }

    pub(crate) fn from_core(core: Arc<CellCore<T>>) -> Self {
        Self { core }
    }

    /// Holder this cell mirrors its commits into
    pub fn holder(&self) -> Option<Arc<SyncHolder<T>>> {
        self.core.holder().cloned()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.core.listener_count()
    }

    /// Attach an in-flight animation, returning the one it replaces
    pub fn set_pending_animation(&self, animation: PendingAnimation) -> Option<PendingAnimation> {
        self.core.set_pending_animation(Some(animation))
    }

    /// Detach the in-flight animation
    pub fn take_pending_animation(&self) -> Option<PendingAnimation> {
        self.core.set_pending_animation(None)
    }

    /// Whether an animation is driving this cell
    pub fn has_pending_animation(&self) -> bool {
        self.core.has_pending_animation()
    }
}

impl<T: CellValue> Clone for RealtimeCell<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: CellValue + fmt::Debug> fmt::Debug for RealtimeCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeCell")
            .field("id", &self.core.id())
            .field("value", &self.core.value())
            .finish()
    }
}

impl<T: CellValue> MutableCell<T> for RealtimeCell<T> {
    fn id(&self) -> CellId {
        self.core.id()
    }

    fn value(&self) -> CellResult<T> {
        Ok(self.core.value())
    }

    fn set_value(&self, value: T) -> CellResult<()> {
        self.core.set_value(value)
    }

    fn modify_with(&self, modifier: Option<Modifier<T>>, force_update: bool) -> CellResult<()> {
        self.core.modify_with(modifier, force_update)
    }

    fn add_listener<F>(&self, id: ListenerId, listener: F) -> CellResult<()>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.add_listener(id, Arc::new(listener));
        Ok(())
    }

    fn remove_listener(&self, id: ListenerId) -> CellResult<()> {
        self.core.remove_listener(id);
        Ok(())
    }
}

impl<T: CellValue> RawSlot<T> for RealtimeCell<T> {
    fn raw_value(&self) -> CellResult<T> {
        self.core.raw_value()
    }

    fn set_raw(&self, value: T) -> CellResult<()> {
        self.core.set_raw(value)
    }
}

/// Recipe for building a native cell's realtime side on first use
pub(crate) struct CellHandle<T: CellValue> {
    pub(crate) id: CellId,
    seed: Arc<T>,
    policy: CommitPolicy,
}

impl<T: CellValue> CellHandle<T> {
    pub(crate) fn new(id: CellId, seed: T, policy: CommitPolicy) -> Self {
        Self {
            id,
            seed: Arc::new(seed),
            policy,
        }
    }

    fn instantiate(&self, holder: Option<Arc<SyncHolder<T>>>) -> RealtimeCell<T> {
        RealtimeCell::new(self.id, T::clone(&self.seed), holder, self.policy)
    }
}

impl<T: CellValue> Clone for CellHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            seed: Arc::clone(&self.seed),
            policy: self.policy,
        }
    }
}

/// State visible to jobs running on the realtime runtime
pub struct RealtimeScope {
    registry: Arc<HandleRegistry>,
    cells: HashMap<CellId, Box<dyn Any + Send>>,
}

impl RealtimeScope {
    pub(crate) fn new(registry: Arc<HandleRegistry>) -> Self {
        Self {
            registry,
            cells: HashMap::new(),
        }
    }

    /// Realtime side of a control cell.
    ///
    /// Native cells are instantiated on first use; web cells resolve to the
    /// storage they already own.
    pub fn resolve<T: CellValue>(&mut self, cell: &ControlCell<T>) -> CellResult<RealtimeCell<T>> {
        match cell.backing() {
            Backing::Local(core) => Ok(RealtimeCell::from_core(Arc::clone(core))),
            Backing::Remote(remote) => self.instantiate(remote.handle()),
        }
    }

    pub(crate) fn instantiate<T: CellValue>(
        &mut self,
        handle: &CellHandle<T>,
    ) -> CellResult<RealtimeCell<T>> {
        if !self.cells.contains_key(&handle.id) {
            // Unregistered cells have no control readers left and get no holder.
            let holder = self.registry.holder::<T>(handle.id)?;
            tracing::debug!(
                cell = %handle.id,
                holder = holder.is_some(),
                "instantiating realtime cell"
            );
            let cell = handle.instantiate(holder);
            self.cells.insert(handle.id, Box::new(cell) as Box<dyn Any + Send>);
        }

        self.cells
            .get(&handle.id)
            .and_then(|entry| entry.downcast_ref::<RealtimeCell<T>>())
            .cloned()
            .ok_or(CellError::TypeMismatch {
                id: handle.id,
                expected: type_name::<T>(),
            })
    }

    pub(crate) fn release(&mut self, id: CellId) -> bool {
        let released = self.cells.remove(&id).is_some();
        if released {
            tracing::debug!(cell = %id, "released realtime cell");
        }
        released
    }

    /// Whether the realtime side of a cell has been built
    pub fn is_instantiated(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    /// Number of instantiated realtime cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no realtime cells are instantiated
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Handle to the realtime worker thread
pub(crate) struct RealtimeWorker {
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl RealtimeWorker {
    /// Start the worker, returning the dispatcher that feeds it.
    ///
    /// With `debug` set every job is logged as it runs.
    pub(crate) fn spawn(
        name: &str,
        registry: Arc<HandleRegistry>,
        debug: bool,
    ) -> Result<(Dispatcher, Self)> {
        let (dispatcher, rx) = Dispatcher::channel();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(rx, RealtimeScope::new(registry), debug))
            .map_err(RuntimeError::Spawn)?;
        let thread_id = thread.thread().id();
        tracing::debug!(thread = name, "realtime runtime started");

        Ok((
            dispatcher,
            Self {
                thread: Some(thread),
                thread_id,
            },
        ))
    }

    /// Wait for the worker to exit. A no-op when called from the worker itself.
    pub(crate) fn join(&mut self) {
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("realtime runtime thread panicked");
            }
        }
    }
}

fn run(mut rx: mpsc::UnboundedReceiver<Envelope>, mut scope: RealtimeScope, debug: bool) {
    IN_REALTIME.with(|flag| flag.set(true));
    let mut executed: u64 = 0;

    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Job(job) => {
                if debug {
                    tracing::debug!(job = executed, cells = scope.len(), "running realtime job");
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut scope))) {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    tracing::error!(%message, "realtime job panicked");
                }
                executed += 1;
            }
            Envelope::Shutdown => break,
        }
    }

    tracing::debug!(executed, cells = scope.len(), "realtime runtime stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_standalone_cell_read_after_write() {
        let cell = RealtimeCell::new(CellId(1), 0_u32, None, CommitPolicy::SkipIdentical);
        cell.set_value(5).unwrap();
        assert_eq!(cell.value().unwrap(), 5);
        cell.modify(|v| v * 2).unwrap();
        assert_eq!(cell.value().unwrap(), 10);
    }

    fn scope() -> RealtimeScope {
        RealtimeScope::new(Arc::new(HandleRegistry::new()))
    }

    #[test]
    fn test_instantiate_is_lazy_and_unique() {
        let registry = Arc::new(HandleRegistry::new());
        let holder = Arc::new(SyncHolder::new(1_i32));
        registry.register(CellId(3), Some(Arc::clone(&holder)));
        let handle = CellHandle::new(CellId(3), 1, CommitPolicy::SkipIdentical);
        let mut scope = RealtimeScope::new(registry);
        assert!(!scope.is_instantiated(CellId(3)));

        let first = scope.instantiate(&handle).unwrap();
        assert!(Arc::ptr_eq(&first.holder().unwrap(), &holder));
        first.set_value(2).unwrap();
        assert_eq!(holder.read(), 2);
        let second = scope.instantiate(&handle).unwrap();
        assert_eq!(second.value().unwrap(), 2);
        assert_eq!(scope.len(), 1);

        assert!(scope.release(CellId(3)));
        assert!(scope.is_empty());
    }

    #[test]
    fn test_instantiate_type_mismatch() {
        let mut scope = scope();
        let ints = CellHandle::new(CellId(4), 1_i32, CommitPolicy::SkipIdentical);
        let strings = CellHandle::new(CellId(4), String::new(), CommitPolicy::SkipIdentical);
        scope.instantiate(&ints).unwrap();
        assert!(matches!(
            scope.instantiate(&strings).unwrap_err(),
            CellError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_registered_holder_of_other_type_is_rejected() {
        let registry = Arc::new(HandleRegistry::new());
        registry.register(CellId(5), Some(Arc::new(SyncHolder::new(0_i64))));
        let handle = CellHandle::new(CellId(5), String::new(), CommitPolicy::SkipIdentical);
        let mut scope = RealtimeScope::new(registry);

        assert!(matches!(
            scope.instantiate(&handle).unwrap_err(),
            CellError::TypeMismatch { id: CellId(5), .. }
        ));
        assert!(!scope.is_instantiated(CellId(5)));
    }

    #[test]
    fn test_unregistered_cell_has_no_holder() {
        let handle = CellHandle::new(CellId(6), 1_u8, CommitPolicy::SkipIdentical);
        let cell = scope().instantiate(&handle).unwrap();
        assert!(cell.holder().is_none());
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let registry = Arc::new(HandleRegistry::new());
        let (dispatcher, mut worker) = RealtimeWorker::spawn("tandem-test", registry, true).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        dispatcher.dispatch(|_| panic!("boom"));
        let sink = Arc::clone(&seen);
        dispatcher.dispatch(move |_| sink.lock().push(is_realtime_thread()));
        dispatcher.flush().unwrap();

        assert_eq!(*seen.lock(), vec![true]);
        assert!(!is_realtime_thread());

        dispatcher.shutdown();
        worker.join();
    }
}
