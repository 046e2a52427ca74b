//! Interactive agent engine.
//!
//! Each session runs the configured agent program on its own pseudo-terminal.
//! Input is written through unmodified and output is forwarded as it arrives.

pub mod engine;
pub mod launch;
pub mod pty;

pub use engine::AgentEngine;
pub use launch::{build_env, mode_args, resolve_executable};
pub use pty::{AgentSession, LaunchSpec};
