//! trackmux Media Model
//!
//! Defines the timed units that flow through an export:
//! - **Time:** Rational media timestamps and ranges
//! - **Samples:** Opaque timed payloads tagged with a media kind
//! - **Metadata:** Timed metadata groups and their format description
//! - **Frames:** Decoded still images and the pixel buffers derived from them
//!
//! Payload bytes are never interpreted here; the model only carries them
//! alongside the timing information the pipeline needs.

pub mod frame;
pub mod metadata;
pub mod sample;
pub mod time;

pub use frame::*;
pub use metadata::*;
pub use sample::*;
pub use time::*;
