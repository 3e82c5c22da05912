//! Animated values driven by tokio tasks.
//!
//! - [`Animatable`]: a shared `f64` with optional bounds that a task can
//!   animate towards a target or along a decay curve
//! - [`AnimationSpec`]: spring or tween curve for target animations
//! - [`DecaySpec`]: exponential decay used for flings
//! - [`Transition`]: a group of animation tasks that are awaited or
//!   cancelled together
//!
//! Starting an animation on a value supersedes the one already running on
//! it; the older task notices on its next frame and returns
//! [`AnimationEnd::Interrupted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

/// Default frame interval (about 60 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Medium stiffness, no bounce.
const DEFAULT_SPRING_STIFFNESS: f64 = 1500.0;
const DEFAULT_DAMPING_RATIO: f64 = 1.0;
const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.01;
const DEFAULT_TWEEN_MS: u64 = 300;

/// Scale between friction multiplier and the exponent of the decay curve.
const DECAY_FRICTION_SCALE: f64 = -4.2;
/// Velocity (px/s) below which a fling is considered settled.
const DECAY_VELOCITY_THRESHOLD: f64 = 0.1;

/// Step used for numeric differentiation of curves.
const DERIVATIVE_STEP: f64 = 1e-3;

/// Easing curves for tweens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Easing {
    Linear,
    /// Cubic bezier (0.4, 0.0, 0.2, 1.0).
    FastOutSlowIn,
}

impl Easing {
    /// Map linear progress in `[0, 1]` to eased progress.
    pub fn transform(self, fraction: f64) -> f64 {
        let fraction = fraction.clamp(0.0, 1.0);
        match self {
            Easing::Linear => fraction,
            Easing::FastOutSlowIn => cubic_bezier(0.4, 0.0, 0.2, 1.0, fraction),
        }
    }
}

/// Evaluate a CSS-style cubic bezier easing at `x`.
fn cubic_bezier(x1: f64, y1: f64, x2: f64, y2: f64, x: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return x;
    }

    let curve = |a: f64, b: f64, t: f64| {
        let u = 1.0 - t;
        3.0 * a * u * u * t + 3.0 * b * u * t * t + t * t * t
    };

    // x(t) is monotonic for control points inside [0, 1]
    let (mut lo, mut hi) = (0.0, 1.0);
    let mut t = x;
    for _ in 0..32 {
        let value = curve(x1, x2, t);
        if (value - x).abs() < 1e-7 {
            break;
        }
        if value < x {
            lo = t;
        } else {
            hi = t;
        }
        t = (lo + hi) / 2.0;
    }
    curve(y1, y2, t)
}

/// Curve used to animate a value towards a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationSpec {
    Spring {
        stiffness: f64,
        damping_ratio: f64,
        visibility_threshold: f64,
    },
    Tween {
        duration: Duration,
        easing: Easing,
    },
}

impl Default for AnimationSpec {
    fn default() -> Self {
        AnimationSpec::spring()
    }
}

impl AnimationSpec {
    pub fn spring() -> Self {
        AnimationSpec::Spring {
            stiffness: DEFAULT_SPRING_STIFFNESS,
            damping_ratio: DEFAULT_DAMPING_RATIO,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }

    pub fn tween() -> Self {
        AnimationSpec::Tween {
            duration: Duration::from_millis(DEFAULT_TWEEN_MS),
            easing: Easing::FastOutSlowIn,
        }
    }

    /// Displacement from the target after `t` seconds, starting at
    /// displacement `start` with velocity `velocity`. `None` once settled.
    fn displacement(&self, start: f64, velocity: f64, t: f64) -> Option<f64> {
        match *self {
            AnimationSpec::Spring {
                stiffness,
                damping_ratio,
                visibility_threshold,
            } => {
                let at = |t: f64| spring_displacement(stiffness, damping_ratio, start, velocity, t);
                let x = at(t);
                let v = (at(t + DERIVATIVE_STEP) - x) / DERIVATIVE_STEP;
                if x.abs() < visibility_threshold && v.abs() < visibility_threshold * 100.0 {
                    None
                } else {
                    Some(x)
                }
            }
            AnimationSpec::Tween { duration, easing } => {
                let total = duration.as_secs_f64();
                if total <= 0.0 || t >= total {
                    None
                } else {
                    Some(start * (1.0 - easing.transform(t / total)))
                }
            }
        }
    }
}

/// Closed form of a damped spring released at `x0` with velocity `v0`.
fn spring_displacement(stiffness: f64, damping_ratio: f64, x0: f64, v0: f64, t: f64) -> f64 {
    let omega = stiffness.max(0.0).sqrt();
    let zeta = damping_ratio.max(0.0);

    if zeta < 1.0 {
        let omega_d = omega * (1.0 - zeta * zeta).sqrt();
        let envelope = (-zeta * omega * t).exp();
        let sine_term = (zeta * omega * x0 + v0) / omega_d * (omega_d * t).sin();
        envelope * (x0 * (omega_d * t).cos() + sine_term)
    } else if zeta == 1.0 {
        let b = v0 + omega * x0;
        (x0 + b * t) * (-omega * t).exp()
    } else {
        let root = omega * (zeta * zeta - 1.0).sqrt();
        let r1 = -zeta * omega - root;
        let r2 = -zeta * omega + root;
        let c2 = (v0 - r1 * x0) / (r2 - r1);
        let c1 = x0 - c2;
        c1 * (r1 * t).exp() + c2 * (r2 * t).exp()
    }
}

/// Exponential decay for flings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecaySpec {
    friction: f64,
    velocity_threshold: f64,
}

impl DecaySpec {
    pub fn new(friction_multiplier: f64) -> Self {
        Self {
            friction: DECAY_FRICTION_SCALE * friction_multiplier.max(f64::EPSILON),
            velocity_threshold: DECAY_VELOCITY_THRESHOLD,
        }
    }

    /// Position after `t` seconds.
    pub fn value_at(&self, start: f64, velocity: f64, t: f64) -> f64 {
        start - velocity / self.friction + velocity / self.friction * (self.friction * t).exp()
    }

    pub fn velocity_at(&self, velocity: f64, t: f64) -> f64 {
        velocity * (self.friction * t).exp()
    }

    /// Where the fling comes to rest, ignoring bounds.
    pub fn target(&self, start: f64, velocity: f64) -> f64 {
        start - velocity / self.friction
    }

    fn is_settled(&self, velocity: f64, t: f64) -> bool {
        self.velocity_at(velocity, t).abs() < self.velocity_threshold
    }
}

impl Default for DecaySpec {
    fn default() -> Self {
        Self::new(2.0)
    }
}

/// How an animation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationEnd {
    Finished,
    /// Stopped early because the value hit one of its bounds.
    BoundReached,
    /// Superseded by another animation or stopped.
    Interrupted,
}

#[derive(Debug)]
struct AnimState {
    value: f64,
    velocity: f64,
    lower: Option<f64>,
    upper: Option<f64>,
    /// Bumped whenever a new animation starts or the value is stopped.
    generation: u64,
    running: bool,
}

impl AnimState {
    fn clamp(&self, value: f64) -> f64 {
        let value = self.lower.map_or(value, |lower| value.max(lower));
        self.upper.map_or(value, |upper| value.min(upper))
    }
}

/// Clears the running flag when an animation task ends for any reason,
/// including being aborted mid-frame.
struct RunningGuard {
    value: Animatable,
    generation: u64,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.value.finish(self.generation, None);
    }
}

/// Shared animated value.
#[derive(Debug, Clone)]
pub struct Animatable {
    state: Arc<Mutex<AnimState>>,
    frame_interval: Duration,
}

impl Animatable {
    pub fn new(value: f64) -> Self {
        Self::with_frame_interval(value, DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_frame_interval(value: f64, frame_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(AnimState {
                value,
                velocity: 0.0,
                lower: None,
                upper: None,
                generation: 0,
                running: false,
            })),
            frame_interval: frame_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn value(&self) -> f64 {
        self.state.lock().value
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Set bounds; the current value is clamped into them.
    pub fn update_bounds(&self, lower: Option<f64>, upper: Option<f64>) {
        let mut state = self.state.lock();
        state.lower = lower;
        state.upper = upper;
        state.value = state.clamp(state.value);
    }

    /// Stop any running animation and jump to `value` (clamped).
    pub fn snap_to(&self, value: f64) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.running = false;
        state.velocity = 0.0;
        state.value = state.clamp(value);
    }

    /// Stop any running animation, keeping the current value.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.running {
            state.generation += 1;
            state.running = false;
        }
        state.velocity = 0.0;
    }

    fn begin(&self) -> (u64, f64, f64) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.running = true;
        (state.generation, state.value, state.velocity)
    }

    /// Write a frame. Returns `None` if superseded, otherwise whether the
    /// value was pushed back by a bound.
    fn write_frame(&self, generation: u64, value: f64, velocity: f64) -> Option<bool> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        let clamped = state.clamp(value);
        state.value = clamped;
        state.velocity = velocity;
        Some(clamped != value)
    }

    fn finish(&self, generation: u64, value: Option<f64>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(value) = value {
            state.value = state.clamp(value);
        }
        state.running = false;
        state.velocity = 0.0;
    }

    /// Animate to `target` following `spec`.
    ///
    /// The value is claimed immediately: it reports running, and any older
    /// animation is superseded, before the returned future is first polled.
    pub fn animate_to(
        &self,
        target: f64,
        spec: AnimationSpec,
    ) -> impl Future<Output = AnimationEnd> + Send + 'static {
        let (generation, start, initial_velocity) = self.begin();
        let guard = RunningGuard {
            value: self.clone(),
            generation,
        };
        let displacement = start - target;
        trace!(start, target, ?spec, "Animation started");

        async move {
            let this = &guard.value;
            let started = Instant::now();
            let mut ticker = time::interval(this.frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let t = started.elapsed().as_secs_f64();

                let Some(remaining) = spec.displacement(displacement, initial_velocity, t) else {
                    if this.write_frame(generation, target, 0.0).is_none() {
                        return AnimationEnd::Interrupted;
                    }
                    this.finish(generation, Some(target));
                    return AnimationEnd::Finished;
                };

                let next = spec
                    .displacement(displacement, initial_velocity, t + DERIVATIVE_STEP)
                    .unwrap_or(0.0);
                let velocity = (next - remaining) / DERIVATIVE_STEP;
                match this.write_frame(generation, target + remaining, velocity) {
                    None => return AnimationEnd::Interrupted,
                    Some(true) => return AnimationEnd::BoundReached,
                    Some(false) => {}
                }
            }
        }
    }

    /// Fling with `velocity` (units per second) until it settles or hits a
    /// bound. Claims the value immediately, like [`animate_to`](Self::animate_to).
    pub fn animate_decay(
        &self,
        velocity: f64,
        decay: DecaySpec,
    ) -> impl Future<Output = AnimationEnd> + Send + 'static {
        let (generation, start, _) = self.begin();
        let guard = RunningGuard {
            value: self.clone(),
            generation,
        };
        trace!(start, velocity, "Decay started");

        async move {
            let this = &guard.value;
            let started = Instant::now();
            let mut ticker = time::interval(this.frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let t = started.elapsed().as_secs_f64();
                let value = decay.value_at(start, velocity, t);
                let frame_velocity = decay.velocity_at(velocity, t);

                match this.write_frame(generation, value, frame_velocity) {
                    None => return AnimationEnd::Interrupted,
                    Some(true) => return AnimationEnd::BoundReached,
                    Some(false) => {}
                }

                if decay.is_settled(velocity, t) {
                    return AnimationEnd::Finished;
                }
            }
        }
    }
}

/// Group of animation tasks that run together.
///
/// Dropping the transition aborts every member.
pub struct Transition {
    tasks: JoinSet<()>,
    handle: Handle,
}

impl Transition {
    pub fn new(handle: Handle) -> Self {
        Self {
            tasks: JoinSet::new(),
            handle,
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn_on(task, &self.handle);
    }

    /// Wait for every member to finish.
    pub async fn join(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Animation task panicked");
                }
            }
        }
    }

    /// Abort every member.
    pub fn cancel(&mut self) {
        self.tasks.abort_all();
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fast_out_slow_in_endpoints() {
        let easing = Easing::FastOutSlowIn;
        assert_eq!(easing.transform(0.0), 0.0);
        assert_eq!(easing.transform(1.0), 1.0);
        // Front-loaded curve
        assert!(easing.transform(0.5) > 0.5);
        let mut previous = 0.0;
        for i in 1..=20 {
            let v = easing.transform(i as f64 / 20.0);
            assert!(v >= previous);
            previous = v;
        }
    }

    #[test]
    fn test_spring_settles_at_zero() {
        let x = spring_displacement(1500.0, 1.0, 100.0, 0.0, 0.0);
        assert_relative_eq!(x, 100.0);
        let late = spring_displacement(1500.0, 1.0, 100.0, 0.0, 1.0);
        assert!(late.abs() < 1e-6);
        // Underdamped and overdamped variants also start at x0
        assert_relative_eq!(spring_displacement(1500.0, 0.5, 10.0, 0.0, 0.0), 10.0);
        assert_relative_eq!(spring_displacement(1500.0, 2.0, 10.0, 0.0, 0.0), 10.0);
    }

    #[test]
    fn test_decay_curve() {
        let decay = DecaySpec::new(2.0);
        assert_relative_eq!(decay.value_at(10.0, 840.0, 0.0), 10.0);
        // Rests at start + v / 8.4
        assert_relative_eq!(decay.target(10.0, 840.0), 110.0);
        assert!(decay.value_at(10.0, 840.0, 2.0) < 110.0);
        assert!(decay.velocity_at(840.0, 1.0) < 840.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_animate_to_reaches_target() {
        let value = Animatable::new(0.0);
        let end = value.animate_to(100.0, AnimationSpec::default()).await;
        assert_eq!(end, AnimationEnd::Finished);
        assert_eq!(value.value(), 100.0);
        assert!(!value.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tween_takes_its_duration() {
        let value = Animatable::new(0.0);
        let started = Instant::now();
        value.animate_to(-50.0, AnimationSpec::tween()).await;
        assert_eq!(value.value(), -50.0);
        assert!(started.elapsed() >= Duration::from_millis(DEFAULT_TWEEN_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_animation_supersedes_old() {
        let value = Animatable::new(0.0);
        let first = {
            let value = value.clone();
            tokio::spawn(async move { value.animate_to(100.0, AnimationSpec::tween()).await })
        };
        time::sleep(Duration::from_millis(50)).await;

        let second = value.animate_to(-20.0, AnimationSpec::tween()).await;
        assert_eq!(second, AnimationEnd::Finished);
        assert_eq!(first.await.unwrap(), AnimationEnd::Interrupted);
        assert_eq!(value.value(), -20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_stops_at_bound() {
        let value = Animatable::new(0.0);
        value.update_bounds(Some(-30.0), Some(30.0));
        let end = value.animate_decay(2000.0, DecaySpec::default()).await;
        assert_eq!(end, AnimationEnd::BoundReached);
        assert_eq!(value.value(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_settles_inside_bounds() {
        let value = Animatable::new(0.0);
        let end = value.animate_decay(84.0, DecaySpec::default()).await;
        assert_eq!(end, AnimationEnd::Finished);
        assert!((value.value() - 10.0).abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snap_interrupts_running_animation() {
        let value = Animatable::new(0.0);
        let task = {
            let value = value.clone();
            tokio::spawn(async move { value.animate_to(100.0, AnimationSpec::tween()).await })
        };
        time::sleep(Duration::from_millis(40)).await;
        assert!(value.is_running());
        value.snap_to(7.0);
        assert_eq!(task.await.unwrap(), AnimationEnd::Interrupted);
        assert_eq!(value.value(), 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_cancel() {
        let value = Animatable::new(0.0);
        let mut transition = Transition::new(Handle::current());
        {
            let value = value.clone();
            transition.spawn(async move {
                value.animate_to(100.0, AnimationSpec::tween()).await;
            });
        }
        time::sleep(Duration::from_millis(40)).await;
        transition.cancel();
        transition.join().await;
        assert!(!value.is_running());
        let frozen = value.value();
        assert!(frozen > 0.0 && frozen < 100.0);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(value.value(), frozen);
    }
}
