//! Pointer velocity estimation for flings.

use crate::viewport::Offset;

/// Samples kept in the ring buffer.
const HISTORY_SIZE: usize = 20;

/// Only samples this recent (ms) contribute.
const HORIZON_MS: u64 = 100;

/// A gap this long (ms) between samples means the pointer had stopped.
const ASSUME_STOPPED_MS: u64 = 40;

#[derive(Debug, Clone, Copy)]
struct Sample {
    time_ms: u64,
    position: Offset,
}

/// Least-squares velocity over the most recent samples.
#[derive(Debug, Clone)]
pub struct VelocityTracker {
    samples: [Option<Sample>; HISTORY_SIZE],
    index: usize,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self {
            samples: [None; HISTORY_SIZE],
            index: 0,
        }
    }

    pub fn add_position(&mut self, time_ms: u64, position: Offset) {
        self.index = (self.index + 1) % HISTORY_SIZE;
        self.samples[self.index] = Some(Sample { time_ms, position });
    }

    /// Recent samples, newest first, cut at the horizon or at a pause.
    fn recent(&self) -> Vec<Sample> {
        let mut recent = Vec::with_capacity(HISTORY_SIZE);
        let Some(newest) = self.samples[self.index] else {
            return recent;
        };

        let mut previous = newest;
        for step in 0..HISTORY_SIZE {
            let slot = (self.index + HISTORY_SIZE - step) % HISTORY_SIZE;
            let Some(sample) = self.samples[slot] else {
                break;
            };
            let age = newest.time_ms.saturating_sub(sample.time_ms);
            let gap = previous.time_ms.saturating_sub(sample.time_ms);
            if age > HORIZON_MS || gap > ASSUME_STOPPED_MS {
                break;
            }
            recent.push(sample);
            previous = sample;
        }
        recent
    }

    /// Velocity in units per second; zero with fewer than two usable samples.
    pub fn velocity(&self) -> Offset {
        let recent = self.recent();
        if recent.len() < 2 {
            return Offset::ZERO;
        }

        let newest = recent[0].time_ms;
        let times: Vec<f64> = recent
            .iter()
            .map(|s| (s.time_ms as f64 - newest as f64) / 1000.0)
            .collect();

        Offset::new(
            slope(&times, recent.iter().map(|s| s.position.x)),
            slope(&times, recent.iter().map(|s| s.position.y)),
        )
    }
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Slope of the least-squares line through `(times[i], values[i])`.
fn slope(times: &[f64], values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    let n = times.len() as f64;
    let mean_t = times.iter().sum::<f64>() / n;
    let mean_v = values.iter().sum::<f64>() / n;

    let (mut num, mut den) = (0.0, 0.0);
    for (t, v) in times.iter().zip(&values) {
        num += (t - mean_t) * (v - mean_v);
        den += (t - mean_t) * (t - mean_t);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Force `velocity` to point the same way as `pan`; no recent pan means no
/// fling on that axis.
pub fn same_direction(pan: f64, velocity: f64) -> f64 {
    if pan > 0.0 {
        velocity.abs()
    } else if pan < 0.0 {
        -velocity.abs()
    } else {
        0.0
    }
}
