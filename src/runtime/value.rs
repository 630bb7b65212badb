//! Values that can live in a cell and cross between runtimes
//!
//! `CellValue` is the clone-for-transfer contract: a value must be able to
//! produce a copy that the other runtime can own, and must say when two
//! values are identical for the purpose of skipping redundant commits.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::error::CloneResult;
use super::registry::CellId;

/// A value storable in a mutable cell
pub trait CellValue: Clone + Send + Sync + 'static {
    /// Produce a copy owned by the other runtime.
    ///
    /// Nested cells are carried by handle. Values holding resources that
    /// cannot leave their runtime return `CloneError::NotTransferable`.
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        Ok(self.clone())
    }

    /// Whether a write of `other` over `self` changes nothing observable
    fn is_identical(&self, other: &Self) -> bool;

    /// Identity of the cell when this value is itself a mutable cell
    fn cell_id(&self) -> Option<CellId> {
        None
    }
}

/// Implement [`CellValue`] for types whose identity is their `PartialEq`
#[macro_export]
macro_rules! cell_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::runtime::value::CellValue for $ty {
                fn is_identical(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

cell_value_by_eq!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: CellValue> CellValue for Option<T> {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        self.as_ref().map(CellValue::clone_for_transfer).transpose()
    }

    fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.is_identical(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: CellValue> CellValue for Vec<T> {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        self.iter().map(CellValue::clone_for_transfer).collect()
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.is_identical(b))
    }
}

impl<T: CellValue> CellValue for HashMap<String, T> {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        self.iter()
            .map(|(k, v)| -> CloneResult<(String, T)> {
                Ok((k.clone(), v.clone_for_transfer()?))
            })
            .collect()
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.is_identical(o)))
    }
}

impl<T: CellValue> CellValue for BTreeMap<String, T> {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        self.iter()
            .map(|(k, v)| -> CloneResult<(String, T)> {
                Ok((k.clone(), v.clone_for_transfer()?))
            })
            .collect()
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other)
                .all(|((ka, va), (kb, vb))| ka == kb && va.is_identical(vb))
    }
}

impl<A: CellValue, B: CellValue> CellValue for (A, B) {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        Ok((self.0.clone_for_transfer()?, self.1.clone_for_transfer()?))
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.0.is_identical(&other.0) && self.1.is_identical(&other.1)
    }
}

impl<A: CellValue, B: CellValue, C: CellValue> CellValue for (A, B, C) {
    fn clone_for_transfer(&self) -> CloneResult<Self> {
        Ok((
            self.0.clone_for_transfer()?,
            self.1.clone_for_transfer()?,
            self.2.clone_for_transfer()?,
        ))
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.0.is_identical(&other.0)
            && self.1.is_identical(&other.1)
            && self.2.is_identical(&other.2)
    }
}

/// Reference-counted value compared by identity rather than content.
///
/// Writing a `Shared` that points at the same allocation as the current value
/// is an identical write; an equal but distinct allocation is not.
pub struct Shared<T>(Arc<T>);

impl<T> Shared<T> {
    /// Wrap a value in a new allocation
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Whether both handles point at the same allocation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&*self.0).finish()
    }
}

impl<T: Send + Sync + 'static> CellValue for Shared<T> {
    fn is_identical(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
