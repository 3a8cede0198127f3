//! Configuration parsing, validation and lookup
//!
//! This module handles discovery and parsing of assetline.yml files,
//! structural validation, and the store that answers placeholder lookups.

pub mod node;
pub mod parse;
pub mod schema;
pub mod store;
pub mod types;

// Re-export main types
pub use node::*;
pub use parse::*;
pub use schema::*;
pub use store::*;
pub use types::*;
