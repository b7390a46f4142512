//! CLI command implementations.

pub mod check_doc;
pub mod show_checkpoint;
pub mod simulate;
