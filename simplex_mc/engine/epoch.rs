use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    consumer::{Consumer, Estimate, Histogram, UniformPositionAccumulator},
    error::SimResult,
    helper::{emit, EngineTelemetry},
    multinomial::MultinomialSampler,
    plan::{EpochSpec, SimplexSource},
    rng::{ChaChaEngine, RandomEngine},
    simplex_generator::{CenterTriple, Simplex, SimplexGenerator},
};

/// Outcome of one epoch, handed to a recorder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// Probability just before the center category.
    pub pre: f64,
    /// Center category probability.
    pub mid: f64,
    /// Probability just after the center category.
    pub post: f64,
    /// Epoch statistic.
    pub estimate: Estimate,
    /// Events distributed per draw.
    pub entry_count: u64,
    /// Histogram snapshot, captured only when the runner is asked to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<Histogram>,
}

impl ResultRecord {
    /// Center interval edges in event counts: `(pre * N, (1 - post) * N)`.
    #[must_use]
    pub fn boundaries(&self) -> (f64, f64) {
        let entries = self.entry_count as f64;
        (self.pre * entries, (1.0 - self.post) * entries)
    }
}

/// Runs epochs for one worker: generate or accept a simplex, sample, finalize.
pub struct EpochRunner<E: RandomEngine = ChaChaEngine, C: Consumer = UniformPositionAccumulator> {
    generator: SimplexGenerator,
    sampler: MultinomialSampler,
    consumer: C,
    engine: E,
    center_max: f64,
    capture_histogram: bool,
    label: String,
    telemetry: Option<EngineTelemetry>,
}

impl<E: RandomEngine, C: Consumer> EpochRunner<E, C> {
    /// Creates a runner owning its engine and consumer.
    #[must_use]
    pub fn new(generator: SimplexGenerator, sampler: MultinomialSampler, consumer: C, engine: E) -> Self {
        Self {
            generator,
            sampler,
            consumer,
            engine,
            center_max: 1.0,
            capture_histogram: false,
            label: "epoch_runner".into(),
            telemetry: None,
        }
    }

    /// Upper bound for randomly drawn centers.
    #[must_use]
    pub const fn center_max(mut self, center_max: f64) -> Self {
        self.center_max = center_max;
        self
    }

    /// Names the runner in log records.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: Option<EngineTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The consumer, for inspection between epochs.
    #[must_use]
    pub const fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Releases the consumer.
    #[must_use]
    pub fn into_consumer(self) -> C {
        self.consumer
    }

    /// Runs one epoch on `fixed`, or on a freshly generated simplex.
    pub fn run_one(&mut self, fixed: Option<&Simplex>) -> SimResult<ResultRecord> {
        match fixed {
            Some(simplex) => self.run_on(simplex, simplex.triple(), None),
            None => {
                let (simplex, triple) =
                    self.generator
                        .generate(&mut self.engine, None, self.center_max)?;
                self.run_on(&simplex, triple, None)
            }
        }
    }

    /// Runs one epoch described by a sweep plan entry.
    pub fn run_spec(&mut self, spec: &EpochSpec) -> SimResult<ResultRecord> {
        match &spec.source {
            SimplexSource::Fixed(simplex) => self.run_on(simplex, simplex.triple(), Some(spec.entry_count)),
            SimplexSource::Generated { center, center_max } => {
                let (simplex, triple) =
                    self.generator
                        .generate(&mut self.engine, *center, *center_max)?;
                self.run_on(&simplex, triple, Some(spec.entry_count))
            }
        }
    }

    /// Runs `count` epochs on fresh simplices, forwarding each record in order.
    pub fn run_many<F>(&mut self, count: usize, mut record: F) -> SimResult<()>
    where
        F: FnMut(ResultRecord) -> SimResult<()>,
    {
        for _ in 0..count {
            record(self.run_one(None)?)?;
        }
        Ok(())
    }

    /// Runs every spec in order, forwarding each record.
    pub fn run_specs<I, F>(&mut self, specs: I, mut record: F) -> SimResult<usize>
    where
        I: IntoIterator<Item = SimResult<EpochSpec>>,
        F: FnMut(ResultRecord) -> SimResult<()>,
    {
        let mut completed = 0;
        for spec in specs {
            record(self.run_spec(&spec?)?)?;
            completed += 1;
        }
        Ok(completed)
    }

    fn run_on(
        &mut self,
        simplex: &Simplex,
        triple: CenterTriple,
        entry_count: Option<u64>,
    ) -> SimResult<ResultRecord> {
        if let Some(entries) = entry_count {
            self.sampler.set_entry_count(entries);
        }
        self.consumer.init();
        self.sampler.run(simplex, &mut self.engine, &mut self.consumer)?;
        let estimate = self.consumer.finish();
        if estimate.error == 0.0 {
            emit(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "epoch.zero_error",
                json!({ "worker": self.label, "mean": estimate.mean, "mid": triple.mid }),
            );
        }
        Ok(ResultRecord {
            pre: triple.pre,
            mid: triple.mid,
            post: triple.post,
            estimate,
            entry_count: self.sampler.entry_count(),
            histogram: None,
        })
    }
}

impl<E: RandomEngine> EpochRunner<E, UniformPositionAccumulator> {
    /// Attaches a histogram snapshot to every record.
    #[must_use]
    pub const fn capture_histogram(mut self, capture: bool) -> Self {
        self.capture_histogram = capture;
        self
    }

    /// Like [`Self::run_one`], attaching the histogram when capture is on.
    pub fn run_one_captured(&mut self, fixed: Option<&Simplex>) -> SimResult<ResultRecord> {
        let mut record = self.run_one(fixed)?;
        if self.capture_histogram {
            record.histogram = Some(self.consumer.histogram().clone());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{consumer::ErrorEstimate, error::SimulationError};

    fn runner(seed: u64, size: usize, entries: u64, loops: u64) -> EpochRunner {
        let accumulator =
            UniformPositionAccumulator::new("test_0", entries as f64, 100, ErrorEstimate::StdDev).unwrap();
        EpochRunner::new(
            SimplexGenerator::new(size).unwrap(),
            MultinomialSampler::new(entries, loops),
            accumulator,
            ChaChaEngine::new(seed),
        )
    }

    /// Consumer that remembers every outcome it saw.
    #[derive(Default)]
    struct Capture {
        outcomes: Vec<Vec<u64>>,
        inits: usize,
    }

    impl Consumer for Capture {
        fn init(&mut self) {
            self.inits += 1;
        }

        fn accept(&mut self, outcome: &[u64], _: &mut dyn RandomEngine) -> SimResult<()> {
            self.outcomes.push(outcome.to_vec());
            Ok(())
        }

        fn finish(&mut self) -> Estimate {
            Estimate::default()
        }
    }

    #[test]
    fn fixed_three_category_epoch() {
        let simplex = Simplex::new(vec![0.2, 0.3, 0.5]).unwrap();
        let mut runner = EpochRunner::new(
            SimplexGenerator::new(3).unwrap(),
            MultinomialSampler::new(10, 1),
            Capture::default(),
            ChaChaEngine::new(0),
        );
        let record = runner.run_one(Some(&simplex)).unwrap();
        assert_eq!((record.pre, record.mid, record.post), (0.2, 0.3, 0.5));
        assert_eq!(record.entry_count, 10);
        let capture = runner.into_consumer();
        assert_eq!(capture.inits, 1);
        assert_eq!(capture.outcomes.len(), 1);
        assert_eq!(capture.outcomes[0].iter().sum::<u64>(), 10);
    }

    #[test]
    fn run_many_forwards_in_order() {
        let mut runner = runner(3, 5, 50, 20);
        let mut records = Vec::new();
        runner
            .run_many(4, |record| {
                records.push(record);
                Ok(())
            })
            .unwrap();
        assert_eq!(records.len(), 4);
        for record in &records {
            let (low, high) = record.boundaries();
            assert!(low <= high + 1e-9);
            assert!(record.estimate.mean >= 0.0);
        }
    }

    #[test]
    fn identical_seeds_replay_identically() {
        let collect = |seed| {
            let mut records = Vec::new();
            runner(seed, 5, 100, 50)
                .run_many(3, |record| {
                    records.push(record);
                    Ok(())
                })
                .unwrap();
            records
        };
        assert_eq!(collect(17), collect(17));
        assert_ne!(collect(17), collect(18));
    }

    #[test]
    fn recorder_failure_stops_the_loop() {
        let mut runner = runner(1, 3, 10, 5);
        let mut calls = 0;
        let result = runner.run_many(5, |_| {
            calls += 1;
            Err(SimulationError::Sampling("sink closed".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn empty_center_epoch_warns_about_zero_error() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("epoch.log");
        let telemetry = EngineTelemetry::builder("epoch")
            .log_path(&log_path)
            .build()
            .unwrap();
        let simplex = Simplex::new(vec![0.5, 0.0, 0.5]).unwrap();
        let mut runner = runner(4, 3, 20, 30).telemetry(Some(telemetry));
        let record = runner.run_one(Some(&simplex)).unwrap();
        assert_eq!(record.estimate, Estimate::default());
        assert_eq!(runner.consumer().skipped(), 30);
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("epoch.zero_error"));
    }

    #[test]
    fn spec_sets_entry_count_and_histogram_capture() {
        let simplex = Simplex::from_pre_mid(0.25, 0.5).unwrap();
        let mut runner = runner(2, 3, 40, 200).capture_histogram(true);
        let spec = EpochSpec {
            source: SimplexSource::Fixed(simplex.clone()),
            entry_count: 40,
        };
        let record = runner.run_spec(&spec).unwrap();
        assert_eq!(record.entry_count, 40);
        assert!(record.histogram.is_none());
        let captured = runner.run_one_captured(Some(&simplex)).unwrap();
        assert_eq!(captured.boundaries(), (10.0, 30.0));
        let histogram = captured.histogram.as_ref().unwrap();
        assert!(histogram.entries() > 0);
    }
}
