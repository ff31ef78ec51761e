//! Conditioning of raw SGP40 ticks into a VOC gas index.
//!
//! The index is a relative scale from 0 to 500 centered on a learned
//! baseline: 100 means "typical air for this sensor in this environment",
//! larger values mean more VOC than the recent past, smaller values less.
//! The algorithm keeps two exponential estimators: a baseline tracking the
//! prevailing raw level and a spread tracking its typical deviation. The
//! current deviation, normalized by the spread, is mapped through a sigmoid
//! onto the index scale.
//!
//! One instance serves exactly one sensor stream. State advances on every
//! [`process`](GasIndexAlgorithm::process) call and is only reset by an
//! explicit [`init`](GasIndexAlgorithm::init).

use libm::{expf, fabsf};

/// Samples swallowed after init while the hotplate output is meaningless.
const BLACKOUT_SAMPLES: u32 = 45;
/// Samples during which the baseline tracks quickly to learn the environment.
const LEARNING_SAMPLES: u32 = 600;

const BASELINE_GAIN_LEARNING: f32 = 0.01;
const BASELINE_GAIN_SETTLED: f32 = 0.0005;

const SPREAD_INITIAL: f32 = 50.0;
const SPREAD_MINIMUM: f32 = 25.0;
const SPREAD_GAIN: f32 = 0.005;

const INDEX_FULL_SCALE: f32 = 500.0;
/// Chosen so a zero deviation lands exactly on index 100.
const SIGMOID_WEIGHT: f32 = 4.0;
const SIGMOID_SLOPE: f32 = 1.0 / 3.0;

/// Adaptive conditioner turning raw ticks into a bounded VOC index.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GasIndexAlgorithm {
    samples: u32,
    baseline: f32,
    spread: f32,
}

impl GasIndexAlgorithm {
    pub const fn new() -> Self {
        Self {
            samples: 0,
            baseline: 0.0,
            spread: SPREAD_INITIAL,
        }
    }

    /// Discards all learned state. Call once before the first `process`
    /// and again only to drop the learned baseline (e.g. after a sensor
    /// reset).
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// Feeds one raw sample and returns the current index, 0..=500.
    ///
    /// Returns 0 while the initial blackout elapses. Deterministic given
    /// the current state, but the state advances with every call: repeated
    /// identical input converges toward a stable value rather than
    /// repeating one.
    pub fn process(&mut self, raw: u16) -> i32 {
        let sample = f32::from(raw);
        if self.samples == 0 {
            self.baseline = sample;
        }
        self.samples = self.samples.saturating_add(1);

        let deviation = sample - self.baseline;

        // Track the typical deviation magnitude, floored so a quiet
        // environment does not make the sigmoid hypersensitive.
        self.spread += SPREAD_GAIN * (fabsf(deviation) - self.spread);
        if self.spread < SPREAD_MINIMUM {
            self.spread = SPREAD_MINIMUM;
        }

        // The baseline chases the signal quickly while learning, slowly
        // afterwards so genuine VOC events register before being absorbed.
        let gain = if self.samples <= LEARNING_SAMPLES {
            BASELINE_GAIN_LEARNING
        } else {
            BASELINE_GAIN_SETTLED
        };
        self.baseline += gain * deviation;

        if self.samples <= BLACKOUT_SAMPLES {
            return 0;
        }

        let z = SIGMOID_SLOPE * deviation / self.spread;
        let index = INDEX_FULL_SCALE / (1.0 + SIGMOID_WEIGHT * expf(-z));
        (index + 0.5) as i32
    }
}

impl Default for GasIndexAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}
