//! Tandem – a mutable cell shared between a control runtime and a realtime runtime
//!
//! This crate implements one logical value readable and writable from two
//! cooperating execution contexts:
//! - Authoritative storage, commit policy and listeners in the realtime runtime
//! - A control-side facade that proxies writes through FIFO dispatch
//! - A lock-free synchronized holder for instant control-side reads
//! - A web-like single-runtime mode where the facade owns the storage

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core modules implementing the shared cell
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{
    CellOptions, CellValue, CommitPolicy, ControlCell, ListenerId, MutableCell, RawSlot,
    RealtimeCell, Runtime, RuntimeConfig, RuntimeMode,
};
pub use runtime::error::{CellError, CloneError};

/// Current version of the tandem runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
