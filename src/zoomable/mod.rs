//! Pan, zoom and rotate gesture handling.
//!
//! [`ZoomableViewState`] turns transform gestures into a bounded affine
//! transform and exposes the resulting [`Viewport`](crate::viewport::Viewport)
//! for the tile planner. Settling, flings and double-tap zoom run as tokio
//! animation tasks.

mod animation;
mod state;
mod velocity;

pub use animation::{
    Animatable, AnimationEnd, AnimationSpec, DecaySpec, Easing, Transition, DEFAULT_FRAME_INTERVAL,
};
pub use state::{Bound, GestureEvent, GestureResponse, ZoomableViewState};
pub use velocity::{same_direction, VelocityTracker};
