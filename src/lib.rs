pub mod agent;
pub mod logger;
pub mod model;
pub mod pipeline;
pub mod provider;

pub use logger::log;
pub use pipeline::{Context, Engine, EngineError, EngineEvent, Graph, Outcome};
