//! faceval-engine: verification runs off the training thread.
//!
//! Owns an embedder and a pre-decoded pair dataset on a dedicated thread so
//! a training loop can request validation without doing the work itself.

pub mod config;
pub mod engine;

pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
