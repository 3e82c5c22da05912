//! Progressive tiled decoding.
//!
//! A [`SamplingDecoder`] owns one [`RegionDecoder`], splits the image into a
//! [`BlockGrid`] and decodes the blocks the planner queues on a dedicated
//! worker thread. A coarse background bitmap and an optional thumbnail cover
//! whatever the tiles have not reached yet.

mod block;
mod queue;
mod region;
mod sampling;

pub use block::{BlockGrid, RenderBlock};
pub use queue::{BlockingDeque, DecodeJob};
pub use region::{sampled_dimensions, Bitmap, ImageRegionDecoder, RegionDecoder, Rotation};
pub use sampling::{
    DecoderUpdate, ReleaseHook, SamplingDecoder, SamplingDecoderBuilder, TileDraw, UpdateCallback,
};
