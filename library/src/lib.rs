//! elfcall Common Library
//!
//! Shared components between the loader crate and its tools

pub mod elf;
pub mod span;

// Re-export commonly used items
pub use elf::*;
pub use span::Span;
