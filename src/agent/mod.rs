//! The agent side of the runtime: the session loop that drives a
//! multi-turn conversation with a provider, the tool subsystem and
//! sandboxed execution environment tool calls run against, the event
//! system turns and tool output are reported through, loop detection,
//! and the subagent manager that lets a session spawn children.

pub mod environment;
pub mod events;
pub mod interviewer;
pub mod loop_detector;
pub mod session;
pub mod subagent;
pub mod tools;
