use std::{fmt, ops::Range, sync::Arc};

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    config::SeedPolicy,
    consumer::{ErrorEstimate, UniformPositionAccumulator},
    epoch::EpochRunner,
    error::{ConfigError, SimResult, SimulationError, SinkError},
    helper::{emit, EngineTelemetry},
    multinomial::MultinomialSampler,
    plan::SweepPlan,
    rng::ChaChaEngine,
    simplex_generator::{Simplex, SimplexGenerator},
    sinks::SharedRecorder,
};

/// Categories of the simplices the pre-probability, entry, and fixed studies run on.
const FIXED_SIMPLEX_SIZE: usize = 3;

/// Splits `total` epochs into at most `workers` shares.
///
/// Shares sum to `total` and differ by at most one; the earliest workers take
/// the remainder. Nothing to split yields no shares.
#[must_use]
pub fn partition(total: usize, workers: usize) -> Vec<usize> {
    let workers = workers.min(total);
    if workers == 0 {
        return Vec::new();
    }
    let base = total / workers;
    let extra = total % workers;
    (0..workers).map(|index| base + usize::from(index < extra)).collect()
}

/// Identity of one launched worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerId {
    /// Launch-order index, also the seed offset.
    pub index: usize,
    /// `"{prefix}_{index}"`.
    pub label: String,
}

impl WorkerId {
    /// Builds the identifier for `index` under `prefix`.
    #[must_use]
    pub fn new(prefix: &str, index: usize) -> Self {
        Self {
            index,
            label: format!("{prefix}_{index}"),
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Per-worker settings shared by every launch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerConfig {
    /// Requested workers per launch.
    pub workers: usize,
    /// Draws per epoch.
    pub loop_count: u64,
    /// Categories of generated simplices; read by random-simplex sweeps only.
    pub simplex_size: usize,
    /// Seed policy for worker engines.
    pub seeds: SeedPolicy,
    /// Bins per worker histogram.
    pub histogram_bins: usize,
    /// Error figure reported by worker accumulators.
    pub error_estimate: ErrorEstimate,
    /// Upper bound for drawn centers outside a plan.
    pub center_max: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            loop_count: 1000,
            simplex_size: 5,
            seeds: SeedPolicy::default(),
            histogram_bins: 10_000,
            error_estimate: ErrorEstimate::StdDev,
            center_max: 1.0,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.loop_count == 0 {
            return Err(ConfigError::ZeroLoops);
        }
        if self.histogram_bins == 0 {
            return Err(ConfigError::EmptyHistogram);
        }
        Ok(())
    }
}

/// Fans sweeps out over blocking workers and drains them.
pub struct ParallelScheduler {
    config: SchedulerConfig,
    telemetry: Option<EngineTelemetry>,
    tasks: Vec<(WorkerId, JoinHandle<SimResult<usize>>)>,
    recorders: Vec<SharedRecorder>,
    next_worker: usize,
}

impl fmt::Debug for ParallelScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelScheduler")
            .field("config", &self.config)
            .field("outstanding", &self.tasks.len())
            .field("recorders", &self.recorders.len())
            .field("next_worker", &self.next_worker)
            .finish()
    }
}

impl ParallelScheduler {
    /// Creates a scheduler after validating `config`.
    pub fn new(config: SchedulerConfig, telemetry: Option<EngineTelemetry>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            telemetry,
            tasks: Vec::new(),
            recorders: Vec::new(),
            next_worker: 0,
        })
    }

    /// Settings applied to every worker.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Workers launched and not yet drained by [`Self::wait`].
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Splits `plan` into contiguous epoch ranges and starts one blocking worker per range.
    ///
    /// Every worker owns its engine and accumulator and forwards each record to
    /// `recorder`. Runners are built before any worker starts, so configuration
    /// problems leave nothing running.
    pub fn launch(&mut self, plan: SweepPlan, recorder: SharedRecorder) -> SimResult<Vec<WorkerId>> {
        let total = plan.epoch_count();
        if total == 0 {
            return Err(ConfigError::ZeroEpochs.into());
        }
        let runtime = Handle::try_current().map_err(|_| SimulationError::NoRuntime)?;
        let simplex_size = match plan {
            SweepPlan::RandomSimplex { .. } => self.config.simplex_size,
            SweepPlan::PreProbability { .. } | SweepPlan::EntryCount { .. } => FIXED_SIMPLEX_SIZE,
        };

        let mut start = 0;
        let mut prepared = Vec::new();
        for (offset, share) in partition(total, self.config.workers).into_iter().enumerate() {
            let range = start..start + share;
            start += share;
            let worker = WorkerId::new(plan.label(), self.next_worker + offset);
            let runner =
                self.runner_for(&worker, plan.max_entry_count(range.clone()), simplex_size)?;
            prepared.push((worker, range, runner));
        }
        self.next_worker += prepared.len();

        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "study.launch",
            json!({
                "plan": plan.label(),
                "epochs": total,
                "workers": prepared.len(),
                "seed": self.config.seeds.base,
            }),
        );

        let plan = Arc::new(plan);
        let mut launched = Vec::with_capacity(prepared.len());
        for (worker, range, runner) in prepared {
            let handle = runtime.spawn_blocking({
                let plan = Arc::clone(&plan);
                let recorder = recorder.clone();
                let telemetry = self.telemetry.clone();
                let label = worker.label.clone();
                move || run_share(runner, &plan, range, &recorder, telemetry.as_ref(), &label)
            });
            launched.push(worker.clone());
            self.tasks.push((worker, handle));
        }
        self.register(recorder);
        Ok(launched)
    }

    /// Awaits every outstanding worker and returns the epochs they completed.
    ///
    /// All workers are drained before the first failure, in launch order, is
    /// reported; nothing is cancelled.
    pub async fn wait(&mut self) -> SimResult<usize> {
        let (workers, handles): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks).into_iter().unzip();
        let outcomes = join_all(handles).await;

        let mut completed = 0;
        let mut first_failure = None;
        for (worker, outcome) in workers.into_iter().zip(outcomes) {
            let failure = match outcome {
                Ok(Ok(epochs)) => {
                    completed += epochs;
                    continue;
                }
                Ok(Err(source)) => SimulationError::Worker {
                    worker: worker.label,
                    source: Box::new(source),
                },
                Err(join) => SimulationError::WorkerPanicked {
                    worker: worker.label,
                    message: join.to_string(),
                },
            };
            emit(
                self.telemetry.as_ref(),
                LogLevel::Error,
                "worker.failed",
                json!({ "error": failure.to_string() }),
            );
            first_failure.get_or_insert(failure);
        }
        first_failure.map_or(Ok(completed), Err)
    }

    /// Runs one epoch on `simplex` on the blocking pool, records it, and hands back the accumulator.
    ///
    /// The record carries the histogram snapshot.
    pub async fn run_fixed(
        &mut self,
        simplex: Simplex,
        entry_count: u64,
        recorder: SharedRecorder,
    ) -> SimResult<UniformPositionAccumulator> {
        if entry_count == 0 {
            return Err(ConfigError::ZeroEntries.into());
        }
        let runtime = Handle::try_current().map_err(|_| SimulationError::NoRuntime)?;
        let worker = WorkerId::new("fix_hist", self.next_worker);
        self.next_worker += 1;
        let mut runner = self
            .runner_for(&worker, entry_count, FIXED_SIMPLEX_SIZE)?
            .capture_histogram(true);
        let outcome = runtime
            .spawn_blocking(move || {
                let record = runner.run_one_captured(Some(&simplex))?;
                Ok::<_, SimulationError>((record, runner.into_consumer()))
            })
            .await;
        let (record, accumulator) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(source)) => {
                return Err(SimulationError::Worker {
                    worker: worker.label,
                    source: Box::new(source),
                })
            }
            Err(join) => {
                return Err(SimulationError::WorkerPanicked {
                    worker: worker.label,
                    message: join.to_string(),
                })
            }
        };
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "study.fixed.completed",
            json!({
                "worker": worker.label,
                "mean": record.estimate.mean,
                "error": record.estimate.error,
            }),
        );
        recorder.record(record)?;
        self.register(recorder);
        Ok(accumulator)
    }

    /// Persists every registered recorder in registration order.
    pub fn persist_all(&self) -> Result<(), SinkError> {
        self.recorders.iter().try_for_each(SharedRecorder::persist)
    }

    fn register(&mut self, recorder: SharedRecorder) {
        if !self.recorders.iter().any(|known| known.same_sink(&recorder)) {
            self.recorders.push(recorder);
        }
    }

    fn runner_for(
        &self,
        worker: &WorkerId,
        max_entries: u64,
        simplex_size: usize,
    ) -> Result<EpochRunner, ConfigError> {
        let consumer = UniformPositionAccumulator::new(
            worker.label.clone(),
            max_entries as f64,
            self.config.histogram_bins,
            self.config.error_estimate,
        )?;
        Ok(EpochRunner::new(
            SimplexGenerator::new(simplex_size)?,
            MultinomialSampler::new(max_entries, self.config.loop_count),
            consumer,
            ChaChaEngine::new(self.config.seeds.worker_seed(worker.index)),
        )
        .center_max(self.config.center_max)
        .label(worker.label.clone())
        .telemetry(self.telemetry.clone()))
    }
}

fn run_share(
    mut runner: EpochRunner,
    plan: &SweepPlan,
    range: Range<usize>,
    recorder: &SharedRecorder,
    telemetry: Option<&EngineTelemetry>,
    label: &str,
) -> SimResult<usize> {
    emit(
        telemetry,
        LogLevel::Debug,
        "worker.started",
        json!({ "worker": label, "first_epoch": range.start, "epochs": range.len() }),
    );
    let specs = range.map(|index| plan.epoch(index).map_err(SimulationError::from));
    let completed = runner.run_specs(specs, |record| Ok(recorder.record(record)?))?;
    emit(
        telemetry,
        LogLevel::Debug,
        "worker.completed",
        json!({ "worker": label, "epochs": completed }),
    );
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SeedDerivation,
        sinks::{RowLayout, SingleSlotSink, Sink, TabularSink},
    };
    use tempfile::tempdir;

    fn config(workers: usize, loop_count: u64) -> SchedulerConfig {
        SchedulerConfig {
            workers,
            loop_count,
            seeds: SeedPolicy {
                base: 11,
                derivation: SeedDerivation::PerWorker,
            },
            histogram_bins: 100,
            ..SchedulerConfig::default()
        }
    }

    fn table(path: impl Into<std::path::PathBuf>, layout: RowLayout) -> SharedRecorder {
        SharedRecorder::new(TabularSink::with_default_columns(path, layout))
    }

    fn csv(recorder: &SharedRecorder) -> String {
        recorder.with_sink(|sink| match sink {
            Sink::Tabular(table) => {
                let mut out = Vec::new();
                table.write_to(&mut out).unwrap();
                String::from_utf8(out).unwrap()
            }
            Sink::SingleSlot(_) => panic!("expected a table"),
        })
    }

    fn random_plan(epochs: usize) -> SweepPlan {
        SweepPlan::RandomSimplex {
            epochs,
            center: None,
            center_max: 1.0,
            entry_count: 60,
        }
    }

    #[test]
    fn partition_law() {
        for total in 0..40 {
            for workers in 1..9 {
                let shares = partition(total, workers);
                assert_eq!(shares.iter().sum::<usize>(), total);
                assert!(shares.len() <= workers.min(total));
                if let (Some(max), Some(min)) = (shares.iter().max(), shares.iter().min()) {
                    assert!(max - min <= 1);
                    assert!(*min > 0);
                }
                assert!(shares.windows(2).all(|pair| pair[0] >= pair[1]));
            }
        }
        assert_eq!(partition(10, 3), vec![4, 3, 3]);
        assert!(partition(0, 4).is_empty());
    }

    #[test]
    fn launch_outside_runtime_is_rejected() {
        let mut scheduler = ParallelScheduler::new(config(2, 10), None).unwrap();
        let recorder = table("simplex.csv", RowLayout::Simplex);
        let err = scheduler.launch(random_plan(4), recorder).unwrap_err();
        assert!(matches!(err, SimulationError::NoRuntime));
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[test]
    fn fixed_run_needs_a_runtime() {
        let mut scheduler = ParallelScheduler::new(config(1, 5), None).unwrap();
        let recorder = SharedRecorder::new(SingleSlotSink::new("distri.png"));
        let simplex = Simplex::new(vec![0.2, 0.3, 0.5]).unwrap();
        let err = futures::executor::block_on(scheduler.run_fixed(simplex, 10, recorder.clone()))
            .unwrap_err();
        assert!(matches!(err, SimulationError::NoRuntime));
        assert!(recorder.with_sink(Sink::is_empty));
    }

    #[tokio::test]
    async fn simplex_size_only_binds_random_sweeps() {
        let mut scheduler = ParallelScheduler::new(
            SchedulerConfig {
                simplex_size: 4,
                ..config(2, 10)
            },
            None,
        )
        .unwrap();
        let plan = SweepPlan::pre_probability(0.2, 0.0, 0.6, 4, 30).unwrap();
        let recorder = table("pa.csv", RowLayout::PreProbability);
        scheduler.launch(plan, recorder.clone()).unwrap();
        assert_eq!(scheduler.wait().await.unwrap(), 4);
        assert_eq!(recorder.with_sink(Sink::len), 4);

        let err = scheduler
            .launch(random_plan(3), table("simplex.csv", RowLayout::Simplex))
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigError::InvalidSimplexSize(4))
        ));
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[test]
    fn zero_workers_are_rejected() {
        let err = ParallelScheduler::new(config(0, 10), None).unwrap_err();
        assert_eq!(err, ConfigError::ZeroWorkers);
    }

    #[tokio::test]
    async fn zero_epoch_sweep_launches_nothing() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("simplex.csv");
        let mut scheduler = ParallelScheduler::new(config(2, 10), None).unwrap();
        let err = scheduler
            .launch(random_plan(0), table(&path, RowLayout::Simplex))
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigError::ZeroEpochs)
        ));
        assert_eq!(scheduler.outstanding(), 0);
        scheduler.persist_all().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn every_epoch_is_recorded_once() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("simplex.csv");
        let recorder = table(&path, RowLayout::Simplex);
        let mut scheduler = ParallelScheduler::new(config(3, 50), None).unwrap();
        let workers = scheduler.launch(random_plan(10), recorder.clone()).unwrap();
        let labels: Vec<_> = workers.iter().map(ToString::to_string).collect();
        assert_eq!(labels, ["simplex_hist_0", "simplex_hist_1", "simplex_hist_2"]);
        assert_eq!(scheduler.wait().await.unwrap(), 10);
        assert_eq!(recorder.with_sink(Sink::len), 10);
        scheduler.persist_all().unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 11);
        assert!(written.starts_with("pre_prob, mid_prob, post_prob, mean, stderr\n"));
    }

    #[tokio::test]
    async fn one_worker_replays_identically() {
        let run = || async {
            let recorder = table("pa.csv", RowLayout::PreProbability);
            let mut scheduler = ParallelScheduler::new(config(1, 200), None).unwrap();
            let plan = SweepPlan::pre_probability(0.2, 0.0, 0.6, 8, 100).unwrap();
            scheduler.launch(plan, recorder.clone()).unwrap();
            scheduler.wait().await.unwrap();
            csv(&recorder)
        };
        let first = run().await;
        assert_eq!(first, run().await);
        assert_eq!(first.lines().count(), 9);
        assert!(first.lines().nth(1).unwrap().starts_with("0, "));
    }

    #[tokio::test]
    async fn successive_launches_continue_worker_numbering() {
        let mut scheduler = ParallelScheduler::new(config(2, 20), None).unwrap();
        let simplex = Simplex::from_pre_mid(0.3, 0.4).unwrap();
        let entries = table("entryN.csv", RowLayout::EntryCount);
        let first = scheduler.launch(random_plan(2), table("simplex.csv", RowLayout::Simplex)).unwrap();
        let second = scheduler
            .launch(
                SweepPlan::EntryCount {
                    simplex,
                    first: 10,
                    count: 5,
                },
                entries.clone(),
            )
            .unwrap();
        assert_eq!(first[1].index, 1);
        assert_eq!(second[0].label, "entryN_hist_2");
        assert_eq!(scheduler.outstanding(), 4);
        assert_eq!(scheduler.wait().await.unwrap(), 7);
        let rows = csv(&entries);
        let counts: Vec<&str> = rows
            .lines()
            .skip(1)
            .map(|line| line.split(", ").next().unwrap())
            .collect();
        let mut sorted = counts.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, ["10", "11", "12", "13", "14"]);
    }

    #[tokio::test]
    async fn worker_failure_surfaces_after_draining() {
        let recorder = table("pa.csv", RowLayout::PreProbability);
        let mut scheduler = ParallelScheduler::new(config(2, 20), None).unwrap();
        // points past 1 - mid yield a negative post probability in the second share
        let plan = SweepPlan::PreProbability {
            mid: 0.5,
            begin: 0.0,
            step: 0.1,
            points: 8,
            entry_count: 40,
        };
        scheduler.launch(plan, recorder.clone()).unwrap();
        let err = scheduler.wait().await.unwrap_err();
        match err {
            SimulationError::Worker { worker, source } => {
                assert_eq!(worker, "pa_hist_1");
                assert!(matches!(*source, SimulationError::Configuration(_)));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(recorder.with_sink(Sink::len), 6);
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[tokio::test]
    async fn fixed_run_records_three_category_epoch() {
        let tmp = tempdir().unwrap();
        let recorder = SharedRecorder::new(SingleSlotSink::new(tmp.path().join("distri.png")));
        let mut scheduler = ParallelScheduler::new(config(1, 1), None).unwrap();
        let simplex = Simplex::new(vec![0.2, 0.3, 0.5]).unwrap();
        let accumulator = scheduler
            .run_fixed(simplex, 10, recorder.clone())
            .await
            .unwrap();
        assert_eq!(
            accumulator.histogram().entries() + accumulator.skipped(),
            1
        );
        recorder.with_sink(|sink| {
            let Sink::SingleSlot(slot) = sink else {
                panic!("expected single slot");
            };
            let record = slot.retained().unwrap();
            assert_eq!((record.pre, record.mid, record.post), (0.2, 0.3, 0.5));
            assert_eq!(record.entry_count, 10);
            assert!(record.histogram.is_some());
            assert_eq!(slot.boundaries(), Some((2.0, 5.0)));
        });
        scheduler.persist_all().unwrap();
    }
}
