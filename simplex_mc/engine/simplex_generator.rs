use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, rng::RandomEngine};

/// Allowed deviation of a simplex sum from 1.
pub const SUM_TOLERANCE: f64 = 1e-9;

/// Probabilities immediately surrounding and including the center category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterTriple {
    /// Probability at index `k/2 - 1`.
    pub pre: f64,
    /// Probability at index `k/2`.
    pub mid: f64,
    /// Probability at index `k/2 + 1`.
    pub post: f64,
}

/// Odd-length sequence of non-negative probabilities summing to 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Simplex {
    probabilities: Vec<f64>,
}

impl Simplex {
    /// Validates caller-supplied probabilities.
    pub fn new(probabilities: Vec<f64>) -> Result<Self, ConfigError> {
        check_size(probabilities.len())?;
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(ConfigError::InvalidSimplex(format!(
                "probability {bad} is negative or not finite"
            )));
        }
        let sum: f64 = probabilities.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(ConfigError::InvalidSimplex(format!(
                "probabilities sum to {sum}"
            )));
        }
        Ok(Self { probabilities })
    }

    /// Three-category simplex `(pre, mid, 1 - pre - mid)`.
    pub fn from_pre_mid(pre: f64, mid: f64) -> Result<Self, ConfigError> {
        let post = 1.0 - pre - mid;
        // absorb rounding residue from sweeps that end exactly at 1 - mid
        let post = if post < 0.0 && post > -SUM_TOLERANCE { 0.0 } else { post };
        Self::new(vec![pre, mid, post])
    }

    /// Number of categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    /// Always false: a simplex holds at least three categories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Index of the center category.
    #[must_use]
    pub fn center_index(&self) -> usize {
        self.probabilities.len() / 2
    }

    /// Raw probabilities in category order.
    #[must_use]
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// `(pre, mid, post)` around the center.
    #[must_use]
    pub fn triple(&self) -> CenterTriple {
        let mid = self.center_index();
        CenterTriple {
            pre: self.probabilities[mid - 1],
            mid: self.probabilities[mid],
            post: self.probabilities[mid + 1],
        }
    }
}

fn check_size(size: usize) -> Result<(), ConfigError> {
    if size < 3 || size % 2 == 0 {
        return Err(ConfigError::InvalidSimplexSize(size));
    }
    Ok(())
}

/// Draws uniformly distributed simplices of a fixed odd size.
#[derive(Debug, Clone, Copy)]
pub struct SimplexGenerator {
    size: usize,
}

impl SimplexGenerator {
    /// Creates a generator; `size` must be odd and at least 3.
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        check_size(size)?;
        Ok(Self { size })
    }

    /// Number of categories produced.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Uniform draws consumed by one call to [`Self::generate`].
    #[must_use]
    pub const fn draws_per_call(&self, center: Option<f64>) -> usize {
        match center {
            Some(_) => self.size - 2,
            None => self.size - 1,
        }
    }

    /// Produces a simplex whose center category holds `center`, or a value
    /// drawn from `[0, center_max)` when `center` is unset.
    ///
    /// The remaining mass is split over the other categories with sorted
    /// uniform cut points, which samples that face of the simplex uniformly.
    pub fn generate(
        &self,
        engine: &mut dyn RandomEngine,
        center: Option<f64>,
        center_max: f64,
    ) -> Result<(Simplex, CenterTriple), ConfigError> {
        if !(center_max > 0.0 && center_max <= 1.0) {
            return Err(ConfigError::ProbabilityOutOfRange {
                name: "center_max",
                value: center_max,
                low: 0.0,
                high: 1.0,
            });
        }
        let center = match center {
            Some(value) if (0.0..=1.0).contains(&value) => value,
            Some(value) => {
                return Err(ConfigError::ProbabilityOutOfRange {
                    name: "center",
                    value,
                    low: 0.0,
                    high: 1.0,
                })
            }
            None => engine.uniform() * center_max,
        };

        let mut probabilities = vec![0.0; self.size];
        probabilities[0] = center;
        split_uniformly(engine, 1.0 - center, &mut probabilities[1..]);
        probabilities.swap(0, self.size / 2);

        let simplex = Simplex { probabilities };
        let triple = simplex.triple();
        Ok((simplex, triple))
    }
}

fn split_uniformly(engine: &mut dyn RandomEngine, total: f64, pieces: &mut [f64]) {
    let mut cuts: Vec<f64> = (1..pieces.len()).map(|_| engine.uniform() * total).collect();
    cuts.push(total);
    cuts.sort_by(f64::total_cmp);
    let mut previous = 0.0;
    for (piece, cut) in pieces.iter_mut().zip(cuts) {
        *piece = cut - previous;
        previous = cut;
    }
}
