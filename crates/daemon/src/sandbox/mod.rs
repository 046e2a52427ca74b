//! Sandboxed command engine.
//!
//! Lines typed into a sandbox session are filtered, tokenized and executed
//! directly without a shell. Working directory changes are confined to the
//! configured workspace roots.

pub mod builtins;
pub mod engine;
pub mod exec;
pub mod policy;
pub mod tokenizer;

pub use engine::{CheckError, SandboxEngine, SandboxSession, EXIT_EXEC_FAILED};
pub use exec::{ExecLimits, ExecOutcome};
pub use policy::{CommandPolicy, SecurityError, EXIT_MALFORMED, EXIT_NOT_ALLOWED};
pub use tokenizer::{tokenize, ParseError};
