use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, SimResult, SimulationError},
    rng::RandomEngine,
};

/// Mean and error of one epoch's recorded values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Mean recorded position.
    pub mean: f64,
    /// Dispersion estimate, see [`ErrorEstimate`].
    pub error: f64,
}

/// Which dispersion figure `finish` reports as the error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorEstimate {
    /// Population standard deviation of the recorded positions.
    #[default]
    StdDev,
    /// Standard deviation divided by the square root of the sample count.
    StdErrorOfMean,
}

/// Stateful sink for multinomial outcomes within one epoch.
pub trait Consumer: Send {
    /// Clears all state; called once per epoch before sampling.
    fn init(&mut self);

    /// Consumes one outcome vector.
    fn accept(&mut self, outcome: &[u64], engine: &mut dyn RandomEngine) -> SimResult<()>;

    /// Returns the epoch statistic and clears the running state.
    fn finish(&mut self) -> Estimate;
}

/// Half-open `[pre, post)` count interval covering the center category.
///
/// `pre` sums every count strictly before index `len/2`; `post` adds the
/// center count to it.
pub fn center_boundary(outcome: &[u64]) -> SimResult<(u64, u64)> {
    if outcome.len() < 3 {
        return Err(SimulationError::SampleSize(outcome.len()));
    }
    let center = outcome.len() / 2;
    let pre: u64 = outcome[..center].iter().sum();
    Ok((pre, pre + outcome[center]))
}

/// Fixed-width histogram over `[low, high)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    low: f64,
    high: f64,
    counts: Vec<u64>,
    underflow: u64,
    overflow: u64,
}

impl Histogram {
    /// Creates an empty histogram with `bins` equal-width bins.
    pub fn new(bins: usize, low: f64, high: f64) -> Result<Self, ConfigError> {
        if bins == 0 || !(high > low) {
            return Err(ConfigError::EmptyHistogram);
        }
        Ok(Self {
            low,
            high,
            counts: vec![0; bins],
            underflow: 0,
            overflow: 0,
        })
    }

    /// Adds one value.
    pub fn fill(&mut self, value: f64) {
        if value < self.low {
            self.underflow += 1;
        } else if value >= self.high {
            self.overflow += 1;
        } else {
            let bins = self.counts.len();
            let position = (value - self.low) / self.bin_width();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = (position as usize).min(bins - 1);
            self.counts[index] += 1;
        }
    }

    /// Empties every bin.
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|count| *count = 0);
        self.underflow = 0;
        self.overflow = 0;
    }

    /// Width of one bin.
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.counts.len() as f64
    }

    /// Per-bin counts.
    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Lower edge of the first bin.
    #[must_use]
    pub const fn low(&self) -> f64 {
        self.low
    }

    /// Upper edge of the last bin.
    #[must_use]
    pub const fn high(&self) -> f64 {
        self.high
    }

    /// Values below `low`.
    #[must_use]
    pub const fn underflow(&self) -> u64 {
        self.underflow
    }

    /// Values at or above `high`.
    #[must_use]
    pub const fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Total values filled, including under/overflow.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.underflow + self.overflow
    }
}

/// Welford running mean/variance.
#[derive(Debug, Clone, Copy, Default)]
struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn estimate(&self, kind: ErrorEstimate) -> Estimate {
        if self.count == 0 {
            return Estimate::default();
        }
        let n = self.count as f64;
        let std_dev = (self.m2 / n).sqrt();
        let error = match kind {
            ErrorEstimate::StdDev => std_dev,
            ErrorEstimate::StdErrorOfMean => std_dev / n.sqrt(),
        };
        Estimate {
            mean: self.mean,
            error,
        }
    }
}

/// Records, per outcome, one position drawn uniformly inside the center interval.
#[derive(Debug, Clone)]
pub struct UniformPositionAccumulator {
    label: String,
    moments: RunningMoments,
    histogram: Histogram,
    error_estimate: ErrorEstimate,
    skipped: u64,
}

impl UniformPositionAccumulator {
    /// Creates an accumulator whose histogram spans `[0, upper)`.
    pub fn new(
        label: impl Into<String>,
        upper: f64,
        bins: usize,
        error_estimate: ErrorEstimate,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            label: label.into(),
            moments: RunningMoments::default(),
            histogram: Histogram::new(bins, 0.0, upper)?,
            error_estimate,
            skipped: 0,
        })
    }

    /// Worker-scoped name.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Values recorded since the last `finish`.
    #[must_use]
    pub const fn recorded(&self) -> u64 {
        self.moments.count
    }

    /// Outcomes skipped for an empty center interval since the last `init`.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Histogram of the current or most recently finished epoch.
    #[must_use]
    pub const fn histogram(&self) -> &Histogram {
        &self.histogram
    }
}

impl Consumer for UniformPositionAccumulator {
    fn init(&mut self) {
        self.moments = RunningMoments::default();
        self.histogram.reset();
        self.skipped = 0;
    }

    fn accept(&mut self, outcome: &[u64], engine: &mut dyn RandomEngine) -> SimResult<()> {
        let (start, end) = center_boundary(outcome)?;
        if start == end {
            self.skipped += 1;
            return Ok(());
        }
        let width = (end - start) as f64;
        let value = engine.uniform().mul_add(width, start as f64);
        self.moments.push(value);
        self.histogram.fill(value);
        Ok(())
    }

    fn finish(&mut self) -> Estimate {
        let estimate = self.moments.estimate(self.error_estimate);
        self.moments = RunningMoments::default();
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::ChaChaEngine;

    fn accumulator(kind: ErrorEstimate) -> UniformPositionAccumulator {
        UniformPositionAccumulator::new("test_0", 10.0, 100, kind).unwrap()
    }

    #[test]
    fn boundary_uses_two_prefix_sums() {
        assert_eq!(center_boundary(&[2, 3, 5]).unwrap(), (2, 5));
        assert_eq!(center_boundary(&[1, 2, 3, 4, 5]).unwrap(), (3, 6));
        assert!(matches!(
            center_boundary(&[4, 6]),
            Err(SimulationError::SampleSize(2))
        ));
    }

    #[test]
    fn values_stay_inside_interval() {
        let mut engine = ChaChaEngine::new(1);
        let mut acc = accumulator(ErrorEstimate::StdDev);
        acc.init();
        for _ in 0..1_000 {
            acc.accept(&[2, 3, 5], &mut engine).unwrap();
        }
        let histogram = acc.histogram().clone();
        let estimate = acc.finish();
        assert!((2.0..5.0).contains(&estimate.mean));
        assert!((estimate.mean - 3.5).abs() < 0.1);
        // uniform over width 3 has sigma 3 / sqrt(12)
        assert!((estimate.error - 3.0 / 12.0_f64.sqrt()).abs() < 0.05);
        assert_eq!(histogram.entries(), 1_000);
        assert_eq!(histogram.counts()[..20].iter().sum::<u64>(), 0);
    }

    #[test]
    fn degenerate_interval_is_skipped() {
        let mut engine = ChaChaEngine::new(1);
        let mut acc = accumulator(ErrorEstimate::StdDev);
        acc.init();
        acc.accept(&[4, 0, 6], &mut engine).unwrap();
        assert_eq!(acc.recorded(), 0);
        assert_eq!(acc.skipped(), 1);
        assert_eq!(acc.finish(), Estimate::default());
    }

    #[test]
    fn finish_init_finish_is_empty() {
        let mut engine = ChaChaEngine::new(8);
        let mut acc = accumulator(ErrorEstimate::StdErrorOfMean);
        acc.init();
        acc.accept(&[1, 5, 4], &mut engine).unwrap();
        let first = acc.finish();
        assert!(first.mean > 0.0);
        acc.init();
        assert_eq!(acc.finish(), Estimate { mean: 0.0, error: 0.0 });
        assert_eq!(acc.finish(), Estimate::default());
    }

    #[test]
    fn standard_error_shrinks_with_samples() {
        let mut engine = ChaChaEngine::new(4);
        let mut spread = accumulator(ErrorEstimate::StdDev);
        let mut sem = accumulator(ErrorEstimate::StdErrorOfMean);
        spread.init();
        sem.init();
        let mut replay = ChaChaEngine::new(4);
        for _ in 0..400 {
            spread.accept(&[0, 8, 2], &mut engine).unwrap();
            sem.accept(&[0, 8, 2], &mut replay).unwrap();
        }
        let spread = spread.finish();
        let sem = sem.finish();
        assert_eq!(spread.mean, sem.mean);
        assert!((sem.error - spread.error / 20.0).abs() < 1e-12);
    }

    #[test]
    fn histogram_tracks_out_of_range_values() {
        let mut histogram = Histogram::new(4, 0.0, 8.0).unwrap();
        histogram.fill(-1.0);
        histogram.fill(0.0);
        histogram.fill(7.99);
        histogram.fill(8.0);
        assert_eq!(histogram.underflow(), 1);
        assert_eq!(histogram.overflow(), 1);
        assert_eq!(histogram.counts(), &[1, 0, 0, 1]);
        histogram.reset();
        assert_eq!(histogram.entries(), 0);
        assert!(Histogram::new(0, 0.0, 1.0).is_err());
    }
}
