use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution};

use crate::error::{SimResult, SimulationError};

/// Source of randomness owned by exactly one worker.
///
/// Engines are stateful and never shared between concurrent tasks; every
/// worker builds its own from a derived seed.
pub trait RandomEngine: Send {
    /// Uniform deviate in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Distributes `trials` events across `probabilities`, writing counts into `out`.
    ///
    /// The counts always sum to `trials`.
    fn multinomial(&mut self, trials: u64, probabilities: &[f64], out: &mut [u64]) -> SimResult<()>;

    /// Restarts the stream from `seed`.
    fn reseed(&mut self, seed: u64);
}

/// ChaCha8 stream with binomial-chain multinomial sampling.
#[derive(Debug, Clone)]
pub struct ChaChaEngine {
    rng: ChaCha8Rng,
    seed: u64,
}

impl ChaChaEngine {
    /// Creates an engine positioned at the start of `seed`'s stream.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seed the current stream started from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomEngine for ChaChaEngine {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn multinomial(&mut self, trials: u64, probabilities: &[f64], out: &mut [u64]) -> SimResult<()> {
        if out.len() != probabilities.len() {
            return Err(SimulationError::Sampling(format!(
                "{} probabilities for {} output slots",
                probabilities.len(),
                out.len()
            )));
        }
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(SimulationError::Sampling(format!("invalid probability {bad}")));
        }
        let Some(last_positive) = probabilities.iter().rposition(|p| *p > 0.0) else {
            return Err(SimulationError::Sampling("all probabilities are zero".into()));
        };
        let norm: f64 = probabilities.iter().sum();

        let mut mass_used = 0.0;
        let mut assigned = 0_u64;
        for (index, (probability, slot)) in probabilities.iter().zip(out.iter_mut()).enumerate() {
            let remaining = trials - assigned;
            *slot = if remaining == 0 || *probability <= 0.0 {
                0
            } else if index == last_positive {
                remaining
            } else {
                let ratio = (probability / (norm - mass_used)).clamp(0.0, 1.0);
                Binomial::new(remaining, ratio)
                    .map_err(|err| SimulationError::Sampling(err.to_string()))?
                    .sample(&mut self.rng)
            };
            mass_used += probability;
            assigned += *slot;
        }
        Ok(())
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.seed = seed;
    }
}
