//! trackmux Containers
//!
//! Reference collaborators for the export pipeline:
//! - [`memory`]: in-memory asset reader and container writer
//! - [`bundle`]: on-disk track bundle (`manifest.json` + one JSONL file per track)
//! - [`metadata_reader`]: reads timed metadata tracks back out of any asset

pub mod bundle;
pub mod memory;
pub mod metadata_reader;
mod status;

pub use bundle::*;
pub use memory::*;
pub use metadata_reader::*;
