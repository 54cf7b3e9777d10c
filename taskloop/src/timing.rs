//! Humanized timing service.
//!
//! Delays follow an ex-Gaussian shape (normal body plus exponential tail),
//! which is what human reaction times look like. Used by phase handlers and
//! executors; the engine core never sleeps or samples delays.

use std::f64::consts::TAU;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Kind of pause being modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayProfile {
    /// Noticing something changed before reacting to it.
    Reaction,
    /// Gap between consecutive input actions.
    Action,
    /// Lingering while nothing needs doing.
    Idle,
}

#[derive(Debug, Clone, Copy)]
struct ExGaussian {
    mu_ms: f64,
    sigma_ms: f64,
    tau_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl DelayProfile {
    fn shape(self) -> ExGaussian {
        match self {
            DelayProfile::Reaction => ExGaussian {
                mu_ms: 250.0,
                sigma_ms: 60.0,
                tau_ms: 120.0,
                min_ms: 120.0,
                max_ms: 1_500.0,
            },
            DelayProfile::Action => ExGaussian {
                mu_ms: 90.0,
                sigma_ms: 25.0,
                tau_ms: 60.0,
                min_ms: 40.0,
                max_ms: 800.0,
            },
            DelayProfile::Idle => ExGaussian {
                mu_ms: 900.0,
                sigma_ms: 250.0,
                tau_ms: 600.0,
                min_ms: 300.0,
                max_ms: 4_000.0,
            },
        }
    }
}

/// Seedable source of humanized delays and coin flips.
#[derive(Debug, Clone)]
pub struct Humanizer {
    rng: StdRng,
    scale: f64,
}

impl Humanizer {
    /// Seeded when `seed` is set, otherwise from OS entropy. `scale`
    /// multiplies every sampled delay.
    pub fn new(seed: Option<u64>, scale: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, scale }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(Some(seed), 1.0)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn delay(&mut self, profile: DelayProfile) -> Duration {
        let shape = profile.shape();
        let normal = shape.mu_ms + shape.sigma_ms * self.standard_normal();
        let tail = -shape.tau_ms * (1.0 - self.rng.r#gen::<f64>()).ln();
        let ms = (normal + tail).clamp(shape.min_ms, shape.max_ms) * self.scale;
        Duration::from_secs_f64(ms.max(0.0) / 1_000.0)
    }

    /// A delay expressed in whole ticks, at least one.
    pub fn delay_ticks(&mut self, profile: DelayProfile, tick_ms: u64) -> u64 {
        let ms = self.delay(profile).as_millis() as u64;
        ms.div_ceil(tick_ms.max(1)).max(1)
    }

    /// True with probability `p` (clamped to `[0, 1]`).
    pub fn chance(&mut self, p: f64) -> bool {
        if p.is_nan() {
            return false;
        }
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform integer in `range`. An empty range yields its start.
    pub fn uniform(&mut self, range: RangeInclusive<u64>) -> u64 {
        if range.start() > range.end() {
            return *range.start();
        }
        self.rng.gen_range(range)
    }

    /// Uniform signed offset in `-max..=max`.
    pub fn offset(&mut self, max: i32) -> i32 {
        let max = max.abs();
        self.rng.gen_range(-max..=max)
    }

    /// Box-Muller transform.
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = 1.0 - self.rng.r#gen::<f64>();
        let u2: f64 = self.rng.r#gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
    }
}
