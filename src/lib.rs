pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod services;

pub use config::EngineConfig;
pub use engine::DuelEngine;
pub use error::EngineError;
