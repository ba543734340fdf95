//! Core functionality for the recording proxy.
//!
//! - Recording data model and on-disk layout
//! - Asynchronous recorder
//! - Configuration, errors and logging
//! - Read access for the offline tools

pub mod config;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod recording;
pub mod store;

// Re-export commonly used types
pub use config::{AppConfig, ProviderConfig, RecordingConfig};
pub use error::{AppError, LookupError, Result};
pub use recorder::Recorder;
pub use recording::{Provider, Recording};
pub use store::RecordingStore;
