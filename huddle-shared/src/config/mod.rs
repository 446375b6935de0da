//! # Configuration
//!
//! Engine tuning knobs, loadable from a file, the environment, or defaults.

pub mod sync;

pub use sync::SyncConfig;
