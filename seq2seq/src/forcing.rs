//! Teacher forcing policies.
//!
//! During a training step the decoder asks its policy, once per step, whether
//! the next input should be the ground-truth decoder input of that step or
//! its own prediction.

use rand::{rngs::StdRng, Rng, SeedableRng};

pub trait TeacherForcing {
    /// Returns `true` when the ground-truth decoder input of `step` should be
    /// fed to the decoder at `step + 1`.
    fn use_ground_truth(&mut self, step: usize) -> bool;
}

impl<F> TeacherForcing for F
where
    F: FnMut(usize) -> bool,
{
    fn use_ground_truth(&mut self, step: usize) -> bool {
        self(step)
    }
}

/// Always feed the ground truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl TeacherForcing for Always {
    fn use_ground_truth(&mut self, _step: usize) -> bool {
        true
    }
}

/// Always feed the previous prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl TeacherForcing for Never {
    fn use_ground_truth(&mut self, _step: usize) -> bool {
        false
    }
}

/// Independent draws with a fixed probability from a seeded generator.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    rate: f64,
    rng: StdRng,
}

impl Bernoulli {
    /// `rate` is clamped to `[0, 1]`. A rate that is not finite never forces.
    pub fn new(rate: f64, seed: u64) -> Self {
        let rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };

        Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TeacherForcing for Bernoulli {
    fn use_ground_truth(&mut self, _step: usize) -> bool {
        self.rng.gen_bool(self.rate)
    }
}

/// Replays decisions drawn ahead of time. Steps past the end of the sequence
/// use the prediction.
#[derive(Debug, Clone, Default)]
pub struct Presampled {
    decisions: Vec<bool>,
}

impl Presampled {
    pub fn new(decisions: Vec<bool>) -> Self {
        Self { decisions }
    }

    /// Draws `steps` decisions up front from `policy`.
    pub fn draw(policy: &mut impl TeacherForcing, steps: usize) -> Self {
        Self::new((0..steps).map(|step| policy.use_ground_truth(step)).collect())
    }
}

impl TeacherForcing for Presampled {
    fn use_ground_truth(&mut self, step: usize) -> bool {
        self.decisions.get(step).copied().unwrap_or(false)
    }
}
