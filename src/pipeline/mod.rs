//! The pipeline execution engine: a directed graph of stages parsed from
//! a DOT-like textual description, driven to a terminal state under
//! conditional routing, retry, checkpoint, and goal-gate policies.

pub mod checkpoint;
pub mod conditions;
pub mod context;
pub mod engine;
pub mod fidelity;
pub mod graph;
pub mod handlers;
pub mod outcome;
pub mod parser;
pub mod stylesheet;
pub mod validator;

pub use context::Context;
pub use engine::{Engine, EngineError, EngineEvent};
pub use graph::{Edge, Graph, Node, Subgraph};
pub use outcome::{Outcome, OutcomeStatus, StageStatus};
