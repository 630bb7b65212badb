//! Commit policy and the privileged raw slot
//!
//! Every public write goes through `CommitPolicy::commit`, which decides
//! whether the candidate is applied and, if so, finishes by writing the raw
//! slot. Only the policy and code in the authoritative context touch the
//! raw slot directly.

use serde::{Deserialize, Serialize};

use super::error::CellResult;
use super::value::CellValue;

/// Privileged storage of a cell.
///
/// `set_raw` bypasses the commit policy: it stores the value, mirrors it into
/// the holder and notifies listeners unconditionally.
pub trait RawSlot<T: CellValue> {
    /// Current value of the slot
    fn raw_value(&self) -> CellResult<T>;

    /// Store a value, mirror it and notify listeners
    fn set_raw(&self, value: T) -> CellResult<()>;
}

/// Decides whether a write is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit every write
    Always,
    /// Skip non-forced writes identical to the current value
    #[default]
    SkipIdentical,
}

impl CommitPolicy {
    /// Commit `candidate` into `slot`, returning whether it was applied
    pub fn commit<T: CellValue>(
        &self,
        slot: &dyn RawSlot<T>,
        candidate: T,
        force_update: bool,
    ) -> CellResult<bool> {
        if !force_update && *self == CommitPolicy::SkipIdentical {
            let current = slot.raw_value()?;
            if current.is_identical(&candidate) {
                tracing::trace!("skipping identical write");
                return Ok(false);
            }
        }

        slot.set_raw(candidate)?;
        Ok(true)
    }
}
