//! Control-runtime cell facade
//!
//! `ControlCell` is what application code holds. Its backing is chosen once,
//! when the cell is created:
//! - web-like mode owns the storage directly and behaves like a realtime cell;
//! - native mode proxies writes to the realtime runtime through the
//!   dispatcher and reads the latest commit from the synchronized holder.

use std::fmt;
use std::sync::{Arc, Weak};

use super::RuntimeMode;
use super::cell::{CellCore, ListenerId, MutableCell, Modifier};
use super::dispatch::Dispatcher;
use super::error::{CellError, CellResult, CloneResult};
use super::holder::SyncHolder;
use super::policy::{CommitPolicy, RawSlot};
use super::realtime::CellHandle;
use super::registry::{CellId, HandleRegistry};
use super::value::CellValue;

/// Per-cell creation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellOptions {
    /// Skip allocating a holder; control-side reads then fail
    pub one_way_reads_only: bool,
}

/// Application-facing mutable cell
pub struct ControlCell<T: CellValue> {
    backing: Backing<T>,
}

pub(crate) enum Backing<T: CellValue> {
    Local(Arc<CellCore<T>>),
    Remote(Arc<RemoteCell<T>>),
}

/// Native-mode proxy state, shared by all clones of a control cell
pub(crate) struct RemoteCell<T: CellValue> {
    handle: CellHandle<T>,
    holder: Option<Arc<SyncHolder<T>>>,
    dispatcher: Dispatcher,
    registry: Weak<HandleRegistry>,
}

impl<T: CellValue> RemoteCell<T> {
    pub(crate) fn handle(&self) -> &CellHandle<T> {
        &self.handle
    }
}

impl<T: CellValue> Drop for RemoteCell<T> {
    fn drop(&mut self) {
        let id = self.handle.id;
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(id);
        }
        self.dispatcher.dispatch(move |scope| {
            scope.release(id);
        });
        tracing::trace!(cell = %id, "control cell dropped");
    }
}

impl<T: CellValue> ControlCell<T> {
    /// Web-like cell owning its storage
    pub(crate) fn local(id: CellId, initial: T, policy: CommitPolicy) -> Self {
        Self {
            backing: Backing::Local(Arc::new(CellCore::new(id, initial, None, policy))),
        }
    }

    /// Native cell proxying to the realtime runtime
    pub(crate) fn remote(
        id: CellId,
        initial: T,
        options: CellOptions,
        policy: CommitPolicy,
        dispatcher: Dispatcher,
        registry: &Arc<HandleRegistry>,
    ) -> CellResult<Self> {
        let seed = initial.clone_for_transfer()?;
        let holder = if options.one_way_reads_only {
            None
        } else {
            Some(Arc::new(SyncHolder::new(seed.clone())))
        };

        registry.register(id, holder.clone());
        tracing::debug!(cell = %id, holder = holder.is_some(), "created native cell");

        Ok(Self {
            backing: Backing::Remote(Arc::new(RemoteCell {
                handle: CellHandle::new(id, seed, policy),
                holder,
                dispatcher,
                registry: Arc::downgrade(registry),
            })),
        })
    }

    pub(crate) fn backing(&self) -> &Backing<T> {
        &self.backing
    }

    /// Mode this cell was created in
    pub fn mode(&self) -> RuntimeMode {
        match &self.backing {
            Backing::Local(_) => RuntimeMode::Web,
            Backing::Remote(_) => RuntimeMode::Native,
        }
    }

    /// Holder read by `value()` in native mode
    pub fn holder(&self) -> Option<Arc<SyncHolder<T>>> {
        match &self.backing {
            Backing::Local(_) => None,
            Backing::Remote(remote) => remote.holder.clone(),
        }
    }

    /// Version of the latest commit visible to this runtime, if readable
    pub fn committed_version(&self) -> Option<u64> {
        self.holder().map(|holder| holder.version())
    }
}

impl<T: CellValue> Clone for ControlCell<T> {
    fn clone(&self) -> Self {
        let backing = match &self.backing {
            Backing::Local(core) => Backing::Local(Arc::clone(core)),
            Backing::Remote(remote) => Backing::Remote(Arc::clone(remote)),
        };
        Self { backing }
    }
}

impl<T: CellValue> fmt::Debug for ControlCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlCell")
            .field("id", &self.id())
            .field("mode", &self.mode())
            .finish()
    }
}

impl<T: CellValue> MutableCell<T> for ControlCell<T> {
    fn id(&self) -> CellId {
        match &self.backing {
            Backing::Local(core) => core.id(),
            Backing::Remote(remote) => remote.handle.id,
        }
    }

    fn value(&self) -> CellResult<T> {
        match &self.backing {
            Backing::Local(core) => Ok(core.value()),
            Backing::Remote(remote) => match &remote.holder {
                Some(holder) => Ok(holder.read()),
                None => Err(CellError::InvalidContext {
                    operation: "value",
                    expected: "realtime runtime (cell was created with one-way reads only)",
                }),
            },
        }
    }

    fn set_value(&self, value: T) -> CellResult<()> {
        match &self.backing {
            Backing::Local(core) => core.set_value(value),
            Backing::Remote(remote) => {
                let transfer = value.clone_for_transfer()?;
                let handle = remote.handle.clone();
                remote.dispatcher.dispatch(move |scope| {
                    let result = scope
                        .instantiate(&handle)
                        .and_then(|cell| cell.set_value(transfer));
                    if let Err(err) = result {
                        tracing::error!(
                            cell = %handle.id,
                            error = %err,
                            "dispatched write failed"
                        );
                    }
                });
                Ok(())
            }
        }
    }

    fn modify_with(&self, modifier: Option<Modifier<T>>, force_update: bool) -> CellResult<()> {
        match &self.backing {
            Backing::Local(core) => core.modify_with(modifier, force_update),
            Backing::Remote(remote) => {
                let handle = remote.handle.clone();
                remote.dispatcher.dispatch(move |scope| {
                    let result = scope
                        .instantiate(&handle)
                        .and_then(|cell| cell.modify_with(modifier, force_update));
                    if let Err(err) = result {
                        tracing::error!(
                            cell = %handle.id,
                            error = %err,
                            "dispatched modify failed"
                        );
                    }
                });
                Ok(())
            }
        }
    }

    fn add_listener<F>(&self, id: ListenerId, listener: F) -> CellResult<()>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        match &self.backing {
            Backing::Local(core) => {
                core.add_listener(id, Arc::new(listener));
                Ok(())
            }
            Backing::Remote(_) => Err(CellError::realtime_only("add_listener")),
        }
    }

    fn remove_listener(&self, id: ListenerId) -> CellResult<()> {
        match &self.backing {
            Backing::Local(core) => {
                core.remove_listener(id);
                Ok(())
            }
            Backing::Remote(_) => Err(CellError::realtime_only("remove_listener")),
        }
    }
}

impl<T: CellValue> RawSlot<T> for ControlCell<T> {
    fn raw_value(&self) -> CellResult<T> {
        match &self.backing {
            Backing::Local(core) => core.raw_value(),
            Backing::Remote(_) => Err(CellError::realtime_only("raw_value")),
        }
    }

    fn set_raw(&self, value: T) -> CellResult<()> {
        match &self.backing {
            Backing::Local(core) => core.set_raw(value),
            Backing::Remote(_) => Err(CellError::realtime_only("set_raw")),
        }
    }
}

/// Cells nest by handle: the other runtime receives the same logical cell.
impl<T: CellValue> CellValue for ControlCell<T> {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        Ok(self.clone())
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.id() == other.id()
    }

    fn cell_id(&self) -> Option<CellId> {
        Some(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_cell_allows_raw_access() {
        let cell = ControlCell::local(CellId(1), 1_i32, CommitPolicy::SkipIdentical);
        assert_eq!(cell.mode(), RuntimeMode::Web);
        cell.set_raw(2).unwrap();
        assert_eq!(cell.raw_value().unwrap(), 2);
        assert!(cell.holder().is_none());
    }

    #[test]
    fn test_remote_cell_rejects_authoritative_operations() {
        let registry = Arc::new(HandleRegistry::new());
        let (dispatcher, _rx) = Dispatcher::channel();
        let id = registry.allocate_id();
        let cell = ControlCell::remote(
            id,
            1_i32,
            CellOptions::default(),
            CommitPolicy::SkipIdentical,
            dispatcher,
            &registry,
        )
        .unwrap();

        assert_eq!(cell.value().unwrap(), 1);
        assert!(matches!(
            cell.add_listener(ListenerId(1), |_| {}),
            Err(CellError::InvalidContext { operation: "add_listener", .. })
        ));
        assert!(matches!(
            cell.set_raw(3),
            Err(CellError::InvalidContext { operation: "set_raw", .. })
        ));
        assert!(registry.contains(id));

        drop(cell);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_nested_cell_identity() {
        let a = ControlCell::local(CellId(1), 0_u8, CommitPolicy::SkipIdentical);
        let b = ControlCell::local(CellId(2), 0_u8, CommitPolicy::SkipIdentical);
        assert_eq!(a.cell_id(), Some(CellId(1)));
        assert!(a.is_identical(&a.clone_for_transfer().unwrap()));
        assert!(!a.is_identical(&b));
    }
}
