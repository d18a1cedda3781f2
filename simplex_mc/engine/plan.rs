use serde::Serialize;

use crate::{error::ConfigError, simplex_generator::Simplex};

/// Where an epoch's simplex comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SimplexSource {
    /// Drawn fresh by the worker's generator.
    Generated {
        /// Fixed center value, or `None` to draw it from `[0, center_max)`.
        center: Option<f64>,
        /// Upper bound for a drawn center.
        center_max: f64,
    },
    /// Supplied by the caller.
    Fixed(Simplex),
}

/// Parameters of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSpec {
    /// Simplex for this epoch.
    pub source: SimplexSource,
    /// Events distributed per multinomial draw.
    pub entry_count: u64,
}

/// A sweep: an ordered, indexable list of epochs split across workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SweepPlan {
    /// Fresh random simplex every epoch.
    RandomSimplex {
        /// Number of epochs.
        epochs: usize,
        /// Optional fixed center value.
        center: Option<f64>,
        /// Upper bound for drawn centers.
        center_max: f64,
        /// Events per draw.
        entry_count: u64,
    },
    /// Three-category simplex with fixed mid probability and swept pre probability.
    PreProbability {
        /// Fixed mid probability.
        mid: f64,
        /// First pre probability.
        begin: f64,
        /// Distance between consecutive pre probabilities.
        step: f64,
        /// Number of swept points.
        points: usize,
        /// Events per draw.
        entry_count: u64,
    },
    /// One fixed simplex with the entry count swept over a range.
    EntryCount {
        /// Simplex shared by every epoch.
        simplex: Simplex,
        /// First entry count.
        first: u64,
        /// Number of consecutive entry counts.
        count: usize,
    },
}

impl SweepPlan {
    /// Pre-probability sweep over `points` evenly spaced values in `[begin, end)`.
    pub fn pre_probability(
        mid: f64,
        begin: f64,
        end: f64,
        points: usize,
        entry_count: u64,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&mid) {
            return Err(ConfigError::ProbabilityOutOfRange {
                name: "pb",
                value: mid,
                low: 0.0,
                high: 1.0,
            });
        }
        let ceiling = 1.0 - mid;
        for (name, value) in [("pa_min", begin), ("pa_max", end)] {
            if !(0.0..=ceiling).contains(&value) {
                return Err(ConfigError::ProbabilityOutOfRange {
                    name,
                    value,
                    low: 0.0,
                    high: ceiling,
                });
            }
        }
        if begin > end {
            return Err(ConfigError::ProbabilityOutOfRange {
                name: "pa_max",
                value: end,
                low: begin,
                high: ceiling,
            });
        }
        let step = if points == 0 {
            0.0
        } else {
            (end - begin) / points as f64
        };
        Ok(Self::PreProbability {
            mid,
            begin,
            step,
            points,
            entry_count,
        })
    }

    /// Total epochs in the sweep.
    #[must_use]
    pub fn epoch_count(&self) -> usize {
        match self {
            Self::RandomSimplex { epochs, .. } => *epochs,
            Self::PreProbability { points, .. } => *points,
            Self::EntryCount { count, .. } => *count,
        }
    }

    /// Prefix for worker labels.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RandomSimplex { .. } => "simplex_hist",
            Self::PreProbability { .. } => "pa_hist",
            Self::EntryCount { .. } => "entryN_hist",
        }
    }

    /// Largest entry count any epoch in `range` uses; sizes worker histograms.
    #[must_use]
    pub fn max_entry_count(&self, range: std::ops::Range<usize>) -> u64 {
        match self {
            Self::RandomSimplex { entry_count, .. } | Self::PreProbability { entry_count, .. } => {
                *entry_count
            }
            Self::EntryCount { first, .. } => {
                let last = range.end.saturating_sub(1).max(range.start);
                *first + last as u64
            }
        }
    }

    /// Epoch parameters for global index `index`.
    pub fn epoch(&self, index: usize) -> Result<EpochSpec, ConfigError> {
        match self {
            Self::RandomSimplex {
                center,
                center_max,
                entry_count,
                ..
            } => Ok(EpochSpec {
                source: SimplexSource::Generated {
                    center: *center,
                    center_max: *center_max,
                },
                entry_count: *entry_count,
            }),
            Self::PreProbability {
                mid,
                begin,
                step,
                entry_count,
                ..
            } => {
                let pre = (index as f64).mul_add(*step, *begin);
                Ok(EpochSpec {
                    source: SimplexSource::Fixed(Simplex::from_pre_mid(pre, *mid)?),
                    entry_count: *entry_count,
                })
            }
            Self::EntryCount { simplex, first, .. } => Ok(EpochSpec {
                source: SimplexSource::Fixed(simplex.clone()),
                entry_count: *first + index as u64,
            }),
        }
    }
}
