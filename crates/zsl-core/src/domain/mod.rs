//! Domain models for zero-shot evaluation.
//!
//! Canonical definitions for the core entities:
//! - `ClassSet`: ordered, duplicate-free class ids (seen, unseen, all)
//! - `SemanticData`: class splits plus the per-class attribute table
//! - `ZslError`: error taxonomy shared by every layer

pub mod class_set;
pub mod error;
pub mod semantic;

pub use class_set::ClassSet;
pub use error::{Result, ZslError};
pub use semantic::{AttributeTable, SemanticData, SemanticDataFile};
