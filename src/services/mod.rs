//! Request classification services.

pub mod provider_detector;

pub use provider_detector::ProviderDetector;
