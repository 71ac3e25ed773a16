//! Moca inference - structural contract inference and monomorphisation
//!
//! This library derives, for every function of a program, the capabilities
//! its parameters must provide, resolves them against the program's classes,
//! and produces one specialized instantiation per distinct call shape.

pub mod compiler;
pub mod config;

// Re-export commonly used types
pub use compiler::{Analysis, AstBuilder, Program, analyze, analyze_file, format_diagnostics};
pub use config::{ConfigError, EngineConfig};
