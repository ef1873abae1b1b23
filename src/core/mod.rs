pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use context::SimulationContext;
pub use error::{EnsembleError, Result};
pub use types::{ComponentId, EnsembleId, Point, Step};
