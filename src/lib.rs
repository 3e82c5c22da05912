//! Tiled, progressively sampled image viewing.
//!
//! Large images are shown through a coarse background bitmap that is
//! replaced, region by region, with sharper tiles once the user zooms in.
//! [`decoder`] owns the decoding side and its worker thread, [`viewport`]
//! decides which tiles are needed for a transform, and [`zoomable`] turns
//! gestures into that transform. [`Viewer`] ties the three together.

pub mod config;
pub mod decoder;
pub mod error;
pub mod viewer;
pub mod viewport;
pub mod zoomable;

pub use config::ViewerConfig;
pub use decoder::{Bitmap, RegionDecoder, Rotation, SamplingDecoder, SamplingDecoderBuilder};
pub use error::{DecoderError, Result};
pub use viewer::{RenderFrame, Viewer};
pub use viewport::{Offset, PlanOutcome, Size, Viewport, ViewportPlanner};
pub use zoomable::{GestureEvent, GestureResponse, ZoomableViewState};
