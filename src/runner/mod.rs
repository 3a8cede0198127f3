//! Sequence execution engine
//!
//! This module handles placeholder resolution, the execution context and
//! running sequences of task steps.

pub mod context;
pub mod task;
pub mod template;

// Re-export main types
pub use context::*;
pub use task::*;
pub use template::*;
