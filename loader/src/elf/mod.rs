//! ELF Module
//!
//! Modular ELF64 loader implementation:
//! - Image view: validated, read-only structured access to the file bytes
//! - Loader: footprint planning, segment copy, relocation, symbol invocation

// Re-export core types
pub use error::{ElfError, ElfResult};
pub use loader::{ElfLoader, Footprint};
pub use view::ElfView;

// Modules
pub mod error;
pub mod loader;
pub mod view;
