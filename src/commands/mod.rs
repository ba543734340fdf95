//! Offline tools that read a recordings directory.

pub mod export;
pub mod redaction;
pub mod stats;
pub mod view;

pub use export::ExportArgs;
pub use stats::StatsArgs;
pub use view::ViewArgs;
