#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Simplex Monte Carlo engine – samples probability simplices, runs multinomial
//! trials over them, and aggregates per-epoch statistics across parallel workers.

/// Telemetry and seed helpers.
#[path = "../helper.rs"]
pub mod helper;

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Study configuration, modes, and seed policy.
#[path = "../config.rs"]
pub mod config;

/// Random engine abstraction.
#[path = "../rng.rs"]
pub mod rng;

/// Simplex definitions and generator.
#[path = "../simplex_generator.rs"]
pub mod simplex_generator;

/// Multinomial sampling loop.
#[path = "../multinomial.rs"]
pub mod multinomial;

/// Per-epoch accumulation boundary.
#[path = "../consumer.rs"]
pub mod consumer;

/// Epoch runner and result records.
#[path = "../epoch.rs"]
pub mod epoch;

/// Sweep plans describing what each epoch runs.
#[path = "../plan.rs"]
pub mod plan;

/// Fan-out/fan-in worker scheduling.
#[path = "../scheduler.rs"]
pub mod scheduler;

/// Result sinks and the shared recorder.
#[path = "../sinks/main.rs"]
pub mod sinks;

/// Runtime entry driving complete studies.
#[path = "../main.rs"]
pub mod runtime;

pub use config::{RunConfiguration, SeedDerivation, SeedPolicy, StudyConfig, StudyMode};
pub use consumer::{Consumer, ErrorEstimate, Estimate, Histogram, UniformPositionAccumulator};
pub use epoch::{EpochRunner, ResultRecord};
pub use error::{ConfigError, SimResult, SimulationError, SinkError};
pub use helper::{EngineTelemetry, EngineTelemetryBuilder};
pub use plan::{EpochSpec, SimplexSource, SweepPlan};
pub use rng::{ChaChaEngine, RandomEngine};
pub use runtime::{StudyEngine, StudyEngineBuilder, StudySummary};
pub use scheduler::{partition, ParallelScheduler, SchedulerConfig, WorkerId};
pub use simplex_generator::{CenterTriple, Simplex, SimplexGenerator};
pub use sinks::{RenderFrame, Renderer, RowLayout, SharedRecorder, Sink};
