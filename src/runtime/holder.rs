//! Synchronized data holder
//!
//! Lock-free latest-value slot shared between runtimes. The realtime cell is
//! the only writer; any number of control cells read it synchronously.
//! Snapshots are swapped whole, so a reader sees either the previous or the
//! next committed value and never a torn one.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

use super::value::CellValue;

/// A committed value together with its commit sequence number
#[derive(Debug, Clone)]
pub struct HolderSnapshot<T> {
    /// Number of commits mirrored so far (0 for the initial value)
    pub version: u64,
    /// Transfer clone of the committed value
    pub value: T,
}

/// Cross-runtime latest-value holder
pub struct SyncHolder<T> {
    current: ArcSwap<HolderSnapshot<T>>,
}

impl<T: CellValue> SyncHolder<T> {
    /// Create a holder seeded with the initial transfer clone
    pub fn new(initial: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(HolderSnapshot {
                version: 0,
                value: initial,
            }),
        }
    }

    /// Publish a new committed value, returning its version.
    ///
    /// Must only be called by the owning realtime cell.
    pub fn publish(&self, value: T) -> u64 {
        let version = self.current.load().version + 1;
        self.current
            .store(Arc::new(HolderSnapshot { version, value }));
        version
    }

    /// Latest snapshot, without copying the value
    pub fn load(&self) -> Arc<HolderSnapshot<T>> {
        self.current.load_full()
    }

    /// Clone of the latest committed value
    pub fn read(&self) -> T {
        self.current.load().value.clone()
    }

    /// Version of the latest committed value
    pub fn version(&self) -> u64 {
        self.current.load().version
    }
}

impl<T: fmt::Debug> fmt::Debug for SyncHolder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHolder")
            .field("current", &*self.current.load())
            .finish()
    }
}
