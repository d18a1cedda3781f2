use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    config::{RunConfiguration, SeedPolicy, StudyConfig, StudyMode},
    consumer::Estimate,
    error::{ConfigError, SimResult},
    helper::{emit, EngineTelemetry},
    plan::SweepPlan,
    rng::ChaChaEngine,
    scheduler::{ParallelScheduler, SchedulerConfig},
    simplex_generator::{Simplex, SimplexGenerator},
    sinks::{Renderer, RowLayout, SharedRecorder, Sink, SingleSlotSink, TabularSink},
};

/// What a finished study reports.
#[derive(Debug, Clone, Serialize)]
pub struct StudySummary {
    /// Unique id for correlating log records.
    pub run_id: Uuid,
    /// Mode that ran.
    pub mode: StudyMode,
    /// Run size.
    pub run: RunConfiguration,
    /// Base seed, when workers were started.
    pub seed: Option<u64>,
    /// Records accepted by sinks.
    pub records: usize,
    /// Files written.
    pub outputs: Vec<PathBuf>,
    /// Statistic of a fixed study.
    pub fixed: Option<Estimate>,
    /// Center interval edges of a fixed study.
    pub boundaries: Option<(f64, f64)>,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl StudySummary {
    /// Duration in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// Builder for [`StudyEngine`].
pub struct StudyEngineBuilder {
    config: StudyConfig,
    telemetry: Option<EngineTelemetry>,
    renderer: Option<Arc<dyn Renderer + Sync>>,
}

impl StudyEngineBuilder {
    /// Attaches telemetry shared with the scheduler, workers, and sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Renderer for fixed studies.
    #[must_use]
    pub fn renderer(mut self, renderer: impl Renderer + Sync + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> StudyEngine {
        StudyEngine {
            config: self.config,
            telemetry: self.telemetry,
            renderer: self.renderer,
        }
    }
}

/// Drives complete studies: validate, launch, drain, persist.
pub struct StudyEngine {
    config: StudyConfig,
    telemetry: Option<EngineTelemetry>,
    renderer: Option<Arc<dyn Renderer + Sync>>,
}

impl fmt::Debug for StudyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudyEngine")
            .field("config", &self.config)
            .field("telemetry", &self.telemetry)
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl StudyEngine {
    /// Returns a builder over `config`.
    #[must_use]
    pub fn builder(config: StudyConfig) -> StudyEngineBuilder {
        StudyEngineBuilder {
            config,
            telemetry: None,
            renderer: None,
        }
    }

    /// Study configuration.
    #[must_use]
    pub const fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// Runs `mode` to completion.
    ///
    /// Configuration is validated before anything launches. Outputs are
    /// persisted only after every worker finished successfully.
    pub async fn run(&self, mode: StudyMode) -> SimResult<StudySummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = Uuid::new_v4();
        self.config.validate_for(mode)?;
        let run = self.config.run_configuration(mode);
        self.log(
            LogLevel::Info,
            "study.start",
            json!({ "run_id": run_id, "mode": mode, "run": run }),
        );

        let mut summary = StudySummary {
            run_id,
            mode,
            run,
            seed: None,
            records: 0,
            outputs: Vec::new(),
            fixed: None,
            boundaries: None,
            started_at,
            elapsed: Duration::ZERO,
        };
        if mode != StudyMode::Idle {
            let seeds = self.config.seed_policy();
            let mut scheduler =
                ParallelScheduler::new(self.scheduler_config(seeds), self.telemetry.clone())?;
            let target = self.target(mode);
            summary.seed = Some(seeds.base);
            summary.records = match mode {
                StudyMode::PreProbabilitySweep => {
                    let (low, high) = self.config.pa_range();
                    let plan = SweepPlan::pre_probability(
                        self.config.pb,
                        low,
                        high,
                        self.config.pa_size,
                        self.config.entry_count,
                    )?;
                    self.sweep(&mut scheduler, plan, RowLayout::PreProbability, target.clone())
                        .await?
                }
                StudyMode::EntryCountSweep => {
                    let plan = SweepPlan::EntryCount {
                        simplex: self.entry_simplex(seeds.base)?,
                        first: self.config.entry_min,
                        count: run.epoch_count,
                    };
                    self.sweep(&mut scheduler, plan, RowLayout::EntryCount, target.clone())
                        .await?
                }
                StudyMode::SimplexSweep => {
                    let plan = SweepPlan::RandomSimplex {
                        epochs: self.config.epochs,
                        center: None,
                        center_max: self.config.center_max,
                        entry_count: self.config.entry_count,
                    };
                    self.sweep(&mut scheduler, plan, RowLayout::Simplex, target.clone())
                        .await?
                }
                StudyMode::Idle => 0,
                StudyMode::Fixed => {
                    let recorder = self.fixed(&mut scheduler, target.clone()).await?;
                    recorder.with_sink(|sink| {
                        if let Sink::SingleSlot(slot) = sink {
                            summary.fixed = slot.retained().map(|record| record.estimate);
                            summary.boundaries = slot.boundaries();
                        }
                    });
                    1
                }
            };
            scheduler.persist_all()?;
            if mode.is_sweep() || self.renderer.is_some() {
                summary.outputs.push(target);
            }
        }

        summary.elapsed = clock.elapsed();
        self.log(
            LogLevel::Info,
            "study.completed",
            json!({
                "run_id": run_id,
                "mode": mode,
                "records": summary.records,
                "elapsed_ms": summary.elapsed_ms(),
            }),
        );
        Ok(summary)
    }

    async fn sweep(
        &self,
        scheduler: &mut ParallelScheduler,
        plan: SweepPlan,
        layout: RowLayout,
        target: PathBuf,
    ) -> SimResult<usize> {
        let recorder = SharedRecorder::new(TabularSink::with_default_columns(target, layout))
            .with_telemetry(self.telemetry.clone());
        scheduler.launch(plan, recorder)?;
        scheduler.wait().await
    }

    async fn fixed(
        &self,
        scheduler: &mut ParallelScheduler,
        target: PathBuf,
    ) -> SimResult<SharedRecorder> {
        let simplex = Simplex::from_pre_mid(self.config.pa, self.config.pb)?;
        let mut slot = SingleSlotSink::new(target);
        if let Some(renderer) = &self.renderer {
            slot = slot.with_renderer(Box::new(Arc::clone(renderer)));
        }
        let recorder = SharedRecorder::new(slot).with_telemetry(self.telemetry.clone());
        let accumulator = scheduler
            .run_fixed(simplex, self.config.entry_count, recorder.clone())
            .await?;
        self.log(
            LogLevel::Debug,
            "study.fixed.histogram",
            json!({
                "worker": accumulator.label(),
                "entries": accumulator.histogram().entries(),
                "skipped": accumulator.skipped(),
            }),
        );
        Ok(recorder)
    }

    /// The entry sweep's simplex: three categories, center fixed to `pb`, drawn from the base seed.
    fn entry_simplex(&self, seed: u64) -> Result<Simplex, ConfigError> {
        let mut engine = ChaChaEngine::new(seed);
        let (simplex, _) = SimplexGenerator::new(3)?.generate(&mut engine, Some(self.config.pb), 1.0)?;
        Ok(simplex)
    }

    fn scheduler_config(&self, seeds: SeedPolicy) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.config.threads,
            loop_count: self.config.loop_count,
            simplex_size: self.config.simplex_size,
            seeds,
            histogram_bins: self.config.histogram_bins,
            error_estimate: self.config.error_estimate,
            center_max: self.config.center_max,
        }
    }

    fn target(&self, mode: StudyMode) -> PathBuf {
        self.config
            .output_path(mode)
            .unwrap_or_else(|| self.config.output_dir.clone())
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        emit(self.telemetry.as_ref(), level, message, metadata);
    }
}
