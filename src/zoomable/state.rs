//! Gesture state machine for a zoomable container.
//!
//! Transform model: the content is laid out aspect-fit and centred in the
//! container, scaled about the container centre, then translated by the
//! offset. The point on screen of a content point `p` (relative to the
//! content centre at 1x) is `centre + p * scale + offset`.

use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::animation::{Animatable, AnimationSpec, DecaySpec, Transition};
use super::velocity::{same_direction, VelocityTracker};
use crate::config::ViewerConfig;
use crate::viewport::{Offset, Rect, Size, Viewport};

const DEFAULT_SCALE: f64 = 1.0;
const DEFAULT_OFFSET: f64 = 0.0;
const DEFAULT_ROTATION: f64 = 0.0;

/// Offsets closer than this count as sitting on a bound.
const BOUND_EPSILON: f64 = 1e-6;

/// One multi-touch update, as reported by a transform gesture detector.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureEvent {
    /// Centroid of the pointers, in container coordinates.
    pub center: Offset,
    /// Centroid movement since the previous event.
    pub pan: Offset,
    /// Spread ratio since the previous event (1 = unchanged).
    pub zoom: f64,
    /// Rotation since the previous event, in degrees.
    pub rotate: f64,
    /// Positions of the pointers that are down.
    pub pointers: Vec<Offset>,
    pub timestamp_ms: u64,
}

impl GestureEvent {
    /// Single-pointer drag.
    pub fn drag(position: Offset, pan: Offset, timestamp_ms: u64) -> Self {
        Self {
            center: position,
            pan,
            zoom: 1.0,
            rotate: 0.0,
            pointers: vec![position],
            timestamp_ms,
        }
    }

    /// Two-pointer pinch centred between `a` and `b`.
    pub fn pinch(a: Offset, b: Offset, zoom: f64, timestamp_ms: u64) -> Self {
        Self {
            center: Offset::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0),
            pan: Offset::ZERO,
            zoom,
            rotate: 0.0,
            pointers: vec![a, b],
            timestamp_ms,
        }
    }

    pub fn with_pan(mut self, pan: Offset) -> Self {
        self.pan = pan;
        self
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotate = degrees;
        self
    }

    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }
}

/// Result of feeding one event to the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GestureResponse {
    /// The controller used the event; unconsumed events may go to a parent
    /// (for example a pager).
    pub consumed: bool,
    /// A single-pointer drag is pinned at a bound and still pushing outwards.
    pub reach_side: bool,
}

/// Allowed offset range for one axis.
pub type Bound = (f64, f64);

fn limit_to_bound(value: f64, bound: Bound) -> f64 {
    value.clamp(bound.0, bound.1)
}

fn in_bound(value: f64, bound: Bound) -> bool {
    value >= bound.0 && value <= bound.1
}

/// Symmetric offset range keeping a `display_len * scale` long content
/// covering a `container_len` long container.
fn axis_bound(scale: f64, container_len: f64, display_len: f64) -> Bound {
    let half = ((display_len * scale - container_len) / 2.0).max(0.0);
    (-half, half)
}

/// Offset that keeps the content point under `center` fixed while going
/// from `from_scale` to `to_scale`. `origin` is the container centre.
fn centroid_preserving(center: f64, origin: f64, offset: f64, from_scale: f64, to_scale: f64) -> f64 {
    if from_scale <= 0.0 {
        return offset;
    }
    center - origin - (center - origin - offset) * to_scale / from_scale
}

/// Motion planned for one animated value.
enum Motion {
    To(f64),
    Decay { velocity: f64, bound: Bound },
}

/// Pan/zoom/rotate controller for one piece of content.
pub struct ZoomableViewState {
    config: ViewerConfig,
    decay: DecaySpec,

    offset_x: Animatable,
    offset_y: Animatable,
    scale: Animatable,
    rotation: Animatable,

    content_size: Size,
    container_size: Size,
    allow_gesture_input: bool,

    velocity_tracker: VelocityTracker,
    last_pan: Offset,
    centroid: Offset,
    bound_x: Bound,
    bound_y: Bound,
    bound_scale: f64,
    max_pointer_count: usize,

    transition: Option<Transition>,
    runtime: Option<Handle>,
}

impl ZoomableViewState {
    /// Animations run on the ambient tokio runtime, if there is one.
    /// Without a runtime every animation completes instantly.
    pub fn new(content_size: Size, config: ViewerConfig) -> Self {
        let frame = config.frame_interval;
        Self {
            decay: DecaySpec::new(config.decay_friction),
            offset_x: Animatable::with_frame_interval(DEFAULT_OFFSET, frame),
            offset_y: Animatable::with_frame_interval(DEFAULT_OFFSET, frame),
            scale: Animatable::with_frame_interval(DEFAULT_SCALE, frame),
            rotation: Animatable::with_frame_interval(DEFAULT_ROTATION, frame),
            config,
            content_size,
            container_size: Size::ZERO,
            allow_gesture_input: true,
            velocity_tracker: VelocityTracker::new(),
            last_pan: Offset::ZERO,
            centroid: Offset::ZERO,
            bound_x: (0.0, 0.0),
            bound_y: (0.0, 0.0),
            bound_scale: DEFAULT_SCALE,
            max_pointer_count: 0,
            transition: None,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Run animations on `handle` instead of the ambient runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn max_scale(&self) -> f64 {
        self.config.max_scale
    }

    pub fn scale(&self) -> f64 {
        self.scale.value()
    }

    pub fn offset(&self) -> Offset {
        Offset::new(self.offset_x.value(), self.offset_y.value())
    }

    pub fn rotation(&self) -> f64 {
        self.rotation.value()
    }

    pub fn content_size(&self) -> Size {
        self.content_size
    }

    pub fn set_content_size(&mut self, size: Size) {
        self.content_size = size;
    }

    pub fn container_size(&self) -> Size {
        self.container_size
    }

    pub fn set_container_size(&mut self, size: Size) {
        self.container_size = size;
    }

    pub fn allow_gesture_input(&self) -> bool {
        self.allow_gesture_input
    }

    pub fn set_allow_gesture_input(&mut self, allow: bool) {
        self.allow_gesture_input = allow;
    }

    /// Current pan bounds, computed for the latest gesture's scale.
    pub fn bounds(&self) -> (Bound, Bound) {
        (self.bound_x, self.bound_y)
    }

    /// Scale the current bounds were computed with.
    pub fn bound_scale(&self) -> f64 {
        self.bound_scale
    }

    /// True while any of offset, scale or rotation is animating.
    pub fn is_running(&self) -> bool {
        self.scale.is_running()
            || self.offset_x.is_running()
            || self.offset_y.is_running()
            || self.rotation.is_running()
    }

    fn width_fixed(&self) -> bool {
        let content_ratio = self.content_size.width / self.content_size.height;
        let container_ratio = self.container_size.width / self.container_size.height;
        content_ratio > container_ratio
    }

    /// Aspect-fit size of the content at scale 1.
    pub fn display_size(&self) -> Size {
        if self.content_size.is_empty() || self.container_size.is_empty() {
            return Size::ZERO;
        }
        let scale_1x = if self.width_fixed() {
            self.container_size.width / self.content_size.width
        } else {
            self.container_size.height / self.content_size.height
        };
        self.content_size.scaled(scale_1x)
    }

    /// Top-left of the 1x content inside the container.
    pub fn display_offset(&self) -> Offset {
        let display = self.display_size();
        Offset::new(
            (self.container_size.width - display.width) / 2.0,
            (self.container_size.height - display.height) / 2.0,
        )
    }

    /// Display size multiplied by the current scale.
    pub fn real_size(&self) -> Size {
        self.display_size().scaled(self.scale())
    }

    fn container_center(&self) -> Offset {
        Offset::new(self.container_size.width / 2.0, self.container_size.height / 2.0)
    }

    fn compute_bounds(&self, scale: f64) -> (Bound, Bound) {
        let display = self.display_size();
        (
            axis_bound(scale, self.container_size.width, display.width),
            axis_bound(scale, self.container_size.height, display.height),
        )
    }

    /// Visible part of the content, normalized to the real (zoomed) size.
    pub fn viewport(&self) -> Viewport {
        let real = self.real_size();
        let scale = self.scale();
        if real.is_empty() {
            return Viewport::new(scale, Rect::ZERO);
        }

        let center = self.container_center();
        let offset = self.offset();
        let left = center.x - real.width / 2.0 + offset.x;
        let top = center.y - real.height / 2.0 + offset.y;
        let real_rect = Rect::from_origin_size(Offset::new(left, top), real);
        let container_rect = Rect::from_origin_size(Offset::ZERO, self.container_size);
        let visible = real_rect.intersect(&container_rect);
        if visible == Rect::ZERO {
            return Viewport::new(scale, Rect::ZERO);
        }

        Viewport::new(
            scale,
            Rect::new(
                (visible.left - left) / real.width,
                (visible.top - top) / real.height,
                (visible.right - left) / real.width,
                (visible.bottom - top) / real.height,
            ),
        )
    }

    /// A new touch sequence begins.
    pub fn on_gesture_start(&mut self) {
        if !self.allow_gesture_input {
            return;
        }
        self.max_pointer_count = 0;
        self.velocity_tracker = VelocityTracker::new();
        self.offset_x.stop();
        self.offset_y.stop();
        self.offset_x.update_bounds(None, None);
        self.offset_y.update_bounds(None, None);
    }

    /// Apply one transform update.
    pub fn on_gesture(&mut self, event: &GestureEvent) -> GestureResponse {
        let not_consumed = GestureResponse::default();
        if !self.allow_gesture_input || event.pointers.is_empty() {
            return not_consumed;
        }

        // Lifting fingers mid-gesture ends it for this controller
        let count = event.pointer_count();
        if self.max_pointer_count <= count {
            self.max_pointer_count = count;
        } else {
            return not_consumed;
        }

        let (mut zoom, mut rotate) = (event.zoom, event.rotate);
        if count == 2 {
            let (a, b) = (event.pointers[0], event.pointers[1]);
            let min = self.config.min_finger_distance;
            if (a.x - b.x).abs() < min && (a.y - b.y).abs() < min {
                zoom = 1.0;
                rotate = 0.0;
            }
        }

        let scale = self.scale();
        let offset = self.offset();
        let center = self.container_center();

        let next_scale = (scale * zoom).max(self.config.min_scale);
        let mut next_x = centroid_preserving(event.center.x, center.x, offset.x, scale, next_scale)
            + event.pan.x;
        let mut next_y = centroid_preserving(event.center.y, center.y, offset.y, scale, next_scale)
            + event.pan.y;
        let next_rotation = if next_scale < 1.0 {
            self.rotation() + rotate
        } else {
            self.rotation()
        };

        // Past max scale the bounds are those of the scale we snap back to
        self.bound_scale = next_scale.min(self.config.max_scale);
        let (bound_x, bound_y) = self.compute_bounds(self.bound_scale);
        self.bound_x = bound_x;
        self.bound_y = bound_y;

        let mut reach_side = false;
        if self.max_pointer_count == 1 {
            let pinned_x = pinned(offset.x, next_x, bound_x);
            let pinned_y = pinned(offset.y, next_y, bound_y);
            reach_side = if event.pan.x.abs() >= event.pan.y.abs() {
                pinned_x
            } else {
                pinned_y
            };
            next_x = limit_to_bound(next_x, bound_x);
            next_y = limit_to_bound(next_y, bound_y);
        }

        self.velocity_tracker
            .add_position(event.timestamp_ms, Offset::new(next_x, next_y));
        self.last_pan = event.pan;
        self.centroid = event.center;

        if !self.is_running() {
            self.scale.snap_to(next_scale);
            self.offset_x.snap_to(next_x);
            self.offset_y.snap_to(next_y);
            self.rotation.snap_to(next_rotation);
        }

        trace!(next_scale, next_x, next_y, reach_side, "Gesture update");
        GestureResponse {
            consumed: !reach_side,
            reach_side,
        }
    }

    /// The touch sequence ended: fling, and settle scale and offset into
    /// their valid ranges.
    pub fn on_gesture_end(&mut self) {
        if !self.allow_gesture_input || self.is_running() {
            return;
        }

        let scale = self.scale();
        let offset = self.offset();
        let max_scale = self.config.max_scale;

        let mut velocity = Some(self.velocity_tracker.velocity());
        let target_scale = if scale < 1.0 {
            Some(1.0)
        } else if scale > max_scale {
            velocity = None;
            Some(max_scale)
        } else {
            None
        };

        let final_scale = target_scale.unwrap_or(scale);
        let (bound_x, bound_y) = self.compute_bounds(final_scale);
        self.bound_x = bound_x;
        self.bound_y = bound_y;
        self.bound_scale = final_scale;
        let center = self.container_center();

        let plan_axis = |value: f64, bound: Bound, pan: f64, v: Option<f64>, c: f64, origin: f64| {
            match v {
                Some(v) if in_bound(value, bound) => Motion::Decay {
                    velocity: same_direction(pan, v),
                    bound,
                },
                _ if target_scale == Some(max_scale) => {
                    let target = centroid_preserving(c, origin, value, scale, max_scale);
                    Motion::To(limit_to_bound(target, bound))
                }
                _ => Motion::To(limit_to_bound(value, bound)),
            }
        };

        let motion_x = plan_axis(
            offset.x,
            bound_x,
            self.last_pan.x,
            velocity.map(|v| v.x),
            self.centroid.x,
            center.x,
        );
        let motion_y = plan_axis(
            offset.y,
            bound_y,
            self.last_pan.y,
            velocity.map(|v| v.y),
            self.centroid.y,
            center.y,
        );

        let mut motions = vec![
            (self.offset_x.clone(), motion_x),
            (self.offset_y.clone(), motion_y),
            (self.rotation.clone(), Motion::To(DEFAULT_ROTATION)),
        ];
        if let Some(target) = target_scale {
            motions.push((self.scale.clone(), Motion::To(target)));
        }

        debug!(scale, ?target_scale, ?velocity, "Gesture ended");
        self.launch(motions, self.config.animation);
    }

    /// Double-tap behaviour: zoom to max around `point`, or back to 1x.
    ///
    /// Ignored (returns false) while an animation is running.
    pub fn toggle_scale(&mut self, point: Offset) -> bool {
        if self.is_running() {
            return false;
        }
        if self.scale() != DEFAULT_SCALE {
            self.reset();
        } else {
            self.scale_to_max(point);
        }
        true
    }

    /// Animate back to scale 1, no offset, no rotation.
    pub fn reset(&mut self) {
        self.bound_scale = DEFAULT_SCALE;
        let (bound_x, bound_y) = self.compute_bounds(DEFAULT_SCALE);
        self.bound_x = bound_x;
        self.bound_y = bound_y;
        let motions = vec![
            (self.rotation.clone(), Motion::To(DEFAULT_ROTATION)),
            (self.offset_x.clone(), Motion::To(DEFAULT_OFFSET)),
            (self.offset_y.clone(), Motion::To(DEFAULT_OFFSET)),
            (self.scale.clone(), Motion::To(DEFAULT_SCALE)),
        ];
        self.launch(motions, self.config.animation);
    }

    /// Cancel animations and jump straight to the initial transform.
    pub fn reset_immediately(&mut self) {
        self.cancel_animations();
        self.rotation.snap_to(DEFAULT_ROTATION);
        self.offset_x.update_bounds(None, None);
        self.offset_y.update_bounds(None, None);
        self.offset_x.snap_to(DEFAULT_OFFSET);
        self.offset_y.snap_to(DEFAULT_OFFSET);
        self.scale.snap_to(DEFAULT_SCALE);
        self.bound_scale = DEFAULT_SCALE;
        let (bound_x, bound_y) = self.compute_bounds(DEFAULT_SCALE);
        self.bound_x = bound_x;
        self.bound_y = bound_y;
    }

    pub fn scale_to_max(&mut self, point: Offset) {
        self.scale_to(point, self.config.max_scale);
    }

    /// Animate to `target_scale`, bringing the content point under `point`
    /// to the container centre as far as the bounds allow.
    pub fn scale_to(&mut self, point: Offset, target_scale: f64) {
        let scale = self.scale();
        if scale <= 0.0 {
            return;
        }
        let display = self.display_size();
        let center = self.container_center();
        let offset = self.offset();

        // Content point under `point`, relative to the content centre at 1x
        let px = ((point.x - center.x - offset.x) / scale)
            .clamp(-display.width / 2.0, display.width / 2.0);
        let py = ((point.y - center.y - offset.y) / scale)
            .clamp(-display.height / 2.0, display.height / 2.0);

        let (bound_x, bound_y) = self.compute_bounds(target_scale);
        self.bound_x = bound_x;
        self.bound_y = bound_y;
        self.bound_scale = target_scale;
        let target_x = limit_to_bound(-px * target_scale, bound_x);
        let target_y = limit_to_bound(-py * target_scale, bound_y);

        debug!(target_scale, target_x, target_y, "Scaling to point");
        let motions = vec![
            (self.offset_x.clone(), Motion::To(target_x)),
            (self.offset_y.clone(), Motion::To(target_y)),
            (self.scale.clone(), Motion::To(target_scale)),
        ];
        self.launch(motions, self.config.animation);
    }

    /// Wait for the current transition, if any.
    pub async fn finish_animations(&mut self) {
        if let Some(transition) = self.transition.as_mut() {
            transition.join().await;
        }
        self.transition = None;
    }

    pub fn cancel_animations(&mut self) {
        if let Some(mut transition) = self.transition.take() {
            transition.cancel();
        }
        self.offset_x.stop();
        self.offset_y.stop();
        self.scale.stop();
        self.rotation.stop();
    }

    /// Start `motions` as one transition, replacing the previous one.
    fn launch(&mut self, motions: Vec<(Animatable, Motion)>, spec: AnimationSpec) {
        self.transition = None;

        let Some(handle) = self.runtime.clone() else {
            // No runtime: land on the final values at once
            for (value, motion) in motions {
                match motion {
                    Motion::To(target) => {
                        value.update_bounds(None, None);
                        value.snap_to(target);
                    }
                    Motion::Decay { velocity, bound } => {
                        value.update_bounds(Some(bound.0), Some(bound.1));
                        value.snap_to(self.decay.target(value.value(), velocity));
                    }
                }
            }
            return;
        };

        let mut transition = Transition::new(handle);
        for (value, motion) in motions {
            match motion {
                Motion::To(target) => {
                    value.update_bounds(None, None);
                    let animation = value.animate_to(target, spec);
                    transition.spawn(async move {
                        animation.await;
                    });
                }
                Motion::Decay { velocity, bound } => {
                    value.update_bounds(Some(bound.0), Some(bound.1));
                    let animation = value.animate_decay(velocity, self.decay);
                    transition.spawn(async move {
                        animation.await;
                    });
                }
            }
        }
        self.transition = Some(transition);
    }
}

/// A drag is pinned when the offset already sits on the bound it is being
/// pushed past.
fn pinned(current: f64, next: f64, bound: Bound) -> bool {
    (next > bound.1 && current >= bound.1 - BOUND_EPSILON)
        || (next < bound.0 && current <= bound.0 + BOUND_EPSILON)
}

impl std::fmt::Debug for ZoomableViewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoomableViewState")
            .field("scale", &self.scale())
            .field("offset", &self.offset())
            .field("rotation", &self.rotation())
            .field("content_size", &self.content_size)
            .field("container_size", &self.container_size)
            .field("running", &self.is_running())
            .finish()
    }
}
