//! Domain reconciler: turns raw contract logs into normalized records.

pub mod reconciler;

pub use reconciler::Reconciler;
