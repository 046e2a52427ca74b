//! Filesystem boundary enforcement.
//!
//! Sessions never touch a path, or change their working directory, without
//! first passing it through a [`PathValidator`]. Path traversal is prevented
//! by canonicalizing every candidate and requiring the real path to lie
//! inside an authorized root.

pub mod validator;

pub use validator::{PathValidator, RootValidator, ValidationError};
