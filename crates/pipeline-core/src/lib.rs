//! Pull-based two-phase pipeline engine.
//!
//! Stages exchange metadata (reports down, requests up) before any
//! data moves, then datasets are pulled from the sources one request
//! at a time. The executive partitions time steps across ranks and
//! drives the sink.

pub mod algorithm;
pub mod comm;
pub mod executive;
pub mod thread_pool;

pub use algorithm::{
    connect, log_request_error, output_metadata, update, CacheStats, Stage, StageCore,
};
pub use comm::{partition_steps, root_rank, Communicator, SoloComm};
pub use executive::{Executive, RunSummary};
pub use thread_pool::ThreadPool;
