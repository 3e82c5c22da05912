//! Viewer configuration.
//!
//! Defaults suit a phone-sized container. A few knobs can be overridden
//! through `TILEVIEW_*` environment variables; unparsable or out-of-range
//! values are ignored.

use std::time::Duration;

use crate::zoomable::{AnimationSpec, DEFAULT_FRAME_INTERVAL};

/// Upper zoom limit enforced when a gesture ends.
pub const DEFAULT_MAX_SCALE: f64 = 3.2;
/// Lower zoom limit applied during a pinch.
pub const DEFAULT_MIN_SCALE: f64 = 0.5;
/// Two fingers closer than this on both axes do not zoom or rotate.
pub const DEFAULT_MIN_FINGER_DISTANCE: f64 = 200.0;
/// Friction multiplier for fling decay.
pub const DEFAULT_DECAY_FRICTION: f64 = 2.0;
/// Width of the eagerly decoded placeholder.
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 720;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub max_scale: f64,
    pub min_scale: f64,
    pub animation: AnimationSpec,
    pub min_finger_distance: f64,
    pub decay_friction: f64,
    pub thumbnail_width: u32,
    pub frame_interval: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_scale: DEFAULT_MAX_SCALE,
            min_scale: DEFAULT_MIN_SCALE,
            animation: AnimationSpec::default(),
            min_finger_distance: DEFAULT_MIN_FINGER_DISTANCE,
            decay_friction: DEFAULT_DECAY_FRICTION,
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl ViewerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_f64("TILEVIEW_MAX_SCALE").filter(|v| *v >= 1.0) {
            self.max_scale = v;
        }
        if let Some(v) = env_f64("TILEVIEW_MIN_FINGER_DISTANCE").filter(|v| *v >= 0.0) {
            self.min_finger_distance = v;
        }
        if let Some(v) = std::env::var("TILEVIEW_THUMBNAIL_WIDTH")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
        {
            self.thumbnail_width = v;
        }
        self
    }

    pub fn max_scale(mut self, max_scale: f64) -> Self {
        self.max_scale = max_scale.max(1.0);
        self
    }

    pub fn min_scale(mut self, min_scale: f64) -> Self {
        self.min_scale = min_scale.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn animation(mut self, animation: AnimationSpec) -> Self {
        self.animation = animation;
        self
    }

    pub fn min_finger_distance(mut self, distance: f64) -> Self {
        self.min_finger_distance = distance.max(0.0);
        self
    }

    pub fn decay_friction(mut self, friction: f64) -> Self {
        self.decay_friction = friction;
        self
    }

    pub fn thumbnail_width(mut self, width: u32) -> Self {
        self.thumbnail_width = width;
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.max_scale, 3.2);
        assert_eq!(config.min_scale, 0.5);
        assert_eq!(config.min_finger_distance, 200.0);
        assert_eq!(config.thumbnail_width, 720);
        assert_eq!(config.frame_interval, Duration::from_millis(16));
        assert_eq!(config.animation, AnimationSpec::spring());
    }

    #[test]
    fn test_builder_clamps() {
        let config = ViewerConfig::default().max_scale(0.5).min_scale(4.0);
        assert_eq!(config.max_scale, 1.0);
        assert_eq!(config.min_scale, 1.0);
    }

    // Single test touching the environment so parallel tests do not race
    #[test]
    fn test_env_overrides() {
        std::env::set_var("TILEVIEW_MAX_SCALE", "5.5");
        std::env::set_var("TILEVIEW_MIN_FINGER_DISTANCE", "not-a-number");
        std::env::set_var("TILEVIEW_THUMBNAIL_WIDTH", "0");
        let config = ViewerConfig::from_env();
        std::env::remove_var("TILEVIEW_MAX_SCALE");
        std::env::remove_var("TILEVIEW_MIN_FINGER_DISTANCE");
        std::env::remove_var("TILEVIEW_THUMBNAIL_WIDTH");

        assert_eq!(config.max_scale, 5.5);
        assert_eq!(config.min_finger_distance, DEFAULT_MIN_FINGER_DISTANCE);
        assert_eq!(config.thumbnail_width, DEFAULT_THUMBNAIL_WIDTH);
    }
}
