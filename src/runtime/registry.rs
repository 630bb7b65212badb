//! Handle registry
//!
//! Maps each logical cell's identity to its cross-runtime holder. One registry
//! is owned by each `Runtime` and threaded to the cells it creates and to the
//! realtime scope, which looks holders up here when it builds a cell's
//! realtime side. Entries are removed when the last control handle of a cell
//! is dropped.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::{CellError, CellResult};
use super::holder::SyncHolder;
use super::value::CellValue;

/// Identity of a logical cell, shared by its control and realtime sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub u64);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Registry of live native cells and their holders
pub struct HandleRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<CellId, Option<Arc<dyn Any + Send + Sync>>>>,
}

impl HandleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh cell identity
    pub fn allocate_id(&self) -> CellId {
        CellId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a cell and its holder (if any)
    pub fn register<T: CellValue>(&self, id: CellId, holder: Option<Arc<SyncHolder<T>>>) {
        let holder = holder.map(|h| h as Arc<dyn Any + Send + Sync>);
        self.entries.write().insert(id, holder);
        tracing::trace!(%id, value_type = type_name::<T>(), "registered cell handle");
    }

    /// Remove a cell's entry, returning whether it was present
    pub fn unregister(&self, id: CellId) -> bool {
        let removed = self.entries.write().remove(&id).is_some();
        if removed {
            tracing::trace!(%id, "unregistered cell handle");
        }
        removed
    }

    /// Whether the cell is registered
    pub fn contains(&self, id: CellId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Look up the holder of a registered cell.
    ///
    /// Returns `Ok(None)` for unknown cells and cells created with one-way
    /// reads only.
    pub fn holder<T: CellValue>(&self, id: CellId) -> CellResult<Option<Arc<SyncHolder<T>>>> {
        let holder = self.entries.read().get(&id).cloned().flatten();

        match holder {
            Some(holder) => holder
                .downcast::<SyncHolder<T>>()
                .map(Some)
                .map_err(|_| CellError::TypeMismatch {
                    id,
                    expected: type_name::<T>(),
                }),
            None => Ok(None),
        }
    }

    /// Number of registered cells
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no cells are registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
