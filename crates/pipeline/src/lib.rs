//! trackmux Export Pipeline
//!
//! Moves timed units from an asset reader into a container writer, one
//! independently paced pipe per output track, and folds the pipes'
//! completion into a single session outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Exporter                             │
//! │                                                               │
//! │  Provider ──► [Adapter] ──► WriterInput ──► InputDrain ──►    │
//! │     (Raw | TimedMetadata | PixelBuffer)      ContainerWriter  │
//! │                                                               │
//! │  TrackPipe × N ─── lease ───► CompletionBarrier ──► finalize  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Backpressure
//!
//! A pipe only pulls from its provider while the writer input reports
//! ready, so at most one unit per pipe is in flight outside the writer's
//! bounded queue. When the queue is full the pipe registers a single
//! ready signal and parks until the writer drains a unit.
//!
//! # Completion
//!
//! Every pipe holds a [`barrier::BarrierLease`] that is released exactly
//! once, after its writer input has been finished. The exporter finalizes
//! the writer only once every lease is gone.

pub mod adapter;
pub mod barrier;
pub mod consumer;
pub mod exporter;
pub mod pipe;
pub mod port;
pub mod provider;
pub mod reader;
pub mod state;
pub mod writer;

pub use adapter::*;
pub use barrier::*;
pub use consumer::*;
pub use exporter::*;
pub use pipe::*;
pub use port::*;
pub use provider::*;
pub use reader::*;
pub use state::*;
pub use writer::*;
