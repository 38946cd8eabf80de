//! Tool-using agent glue built on the `graph_flow` runtime.
//!
//! The reasoning loop itself is delegated to the graph executor; this crate
//! wires samplers, a tool registry and the session executor into it.

mod react;
mod terminal;
mod tools;

pub use react::{extract_final_answer, AgentResponse, AgentSampler, PendingAction, ReactAgent};
pub use terminal::{parse_command_list, TaskOutcome, TerminalBenchAgent, TERMINAL_SYSTEM_PROMPT};
pub use tools::{AgentTool, CodeExecTool, ToolRegistry, WebSearchTool};
