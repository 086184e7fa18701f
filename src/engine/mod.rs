pub mod context;
pub mod engine;
pub mod model;
pub mod pool;
pub mod session;
pub mod types;

pub use engine::DuelEngine;
pub use model::ModelParameters;
pub use pool::CandidatePool;
pub use session::{DuelSession, ResolveOutcome};
pub use types::*;
