//! Multi-file CF NetCDF source stage.
//!
//! Discovers the file set, assembles a global time axis across the
//! files, and serves spatio-temporal sub-volumes of it one time-step
//! request at a time through cached file handles.

pub mod file_util;
pub mod handle_cache;
pub mod nc;
pub mod reader;
pub mod testdata;

pub use handle_cache::HandleCache;
pub use reader::{CfReader, ReaderConfig};
