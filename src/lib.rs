//! llm-mirror - a recording reverse proxy for LLM APIs
//!
//! Clients point their Claude, OpenAI or Gemini SDK at the proxy instead of
//! the vendor. Every call is forwarded untouched to the right upstream and
//! the full exchange (headers, bodies, streamed events, timing) is appended
//! to a daily JSON Lines file for later inspection.
//!
//! # Architecture
//!
//! - [`core`]: recording model, recorder, config, errors, logging, reader
//! - [`services`]: provider detection
//! - [`api`]: router, proxy handler and body relays
//! - [`commands`]: `view`, `stats` and `export` over a recordings directory
//!
//! # Configuration
//!
//! Defaults can be overridden with a JSON config file and then with
//! environment variables:
//! - `MIRRA_PORT`: listen port (default: 4567)
//! - `MIRRA_RECORDING_ENABLED`: persist recordings (default: true)
//! - `MIRRA_RECORDING_PATH`: recordings directory (default: ./recordings)
//! - `MIRRA_CLAUDE_UPSTREAM`, `MIRRA_OPENAI_UPSTREAM`, `MIRRA_GEMINI_UPSTREAM`
//! - `MIRRA_LOG_FORMAT`, `MIRRA_LOG_LEVEL`

pub mod api;
pub mod commands;
pub mod core;
pub mod services;

pub use crate::api::{build_router, AppState};
pub use crate::core::{AppConfig, AppError, Recorder, Recording, Result};
pub use crate::services::ProviderDetector;
