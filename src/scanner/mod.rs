//! Chain scanner: per-network/per-factory incremental log ingestion.

pub mod cursor;
pub mod scanner;

pub use cursor::CursorStore;
pub use scanner::{FactoryScanner, NetworkScanner};
