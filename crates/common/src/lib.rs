//! Settlement harness common library
//!
//! Records observed on the settlement dashboard, extraction of those records
//! from rendered tables, and interpretation of the lock panel. Everything
//! here is pure: no I/O, no browser, no clock.

pub mod extract;
pub mod lock;
pub mod types;

pub use extract::{Row, TableId};
pub use lock::{LockPanelReading, LockState};
pub use types::*;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
