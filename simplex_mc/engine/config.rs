use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    consumer::ErrorEstimate, error::ConfigError, helper::random_seed,
    simplex_generator::SimplexGenerator,
};

/// Which study a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyMode {
    /// Sweep the pre probability with a fixed mid probability.
    PreProbabilitySweep,
    /// Sweep the entry count over one generated simplex.
    EntryCountSweep,
    /// Fresh random simplex every epoch.
    SimplexSweep,
    /// One epoch on a caller-fixed simplex, retained for rendering.
    Fixed,
    /// Runs nothing.
    Idle,
}

impl StudyMode {
    /// Short name used on the command line and in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PreProbabilitySweep => "pa",
            Self::EntryCountSweep => "entryN",
            Self::SimplexSweep => "simplex",
            Self::Fixed => "fix",
            Self::Idle => "none",
        }
    }

    /// True for the modes that launch a sweep across workers.
    #[must_use]
    pub const fn is_sweep(self) -> bool {
        matches!(
            self,
            Self::PreProbabilitySweep | Self::EntryCountSweep | Self::SimplexSweep
        )
    }
}

impl fmt::Display for StudyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StudyMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pa" | "pa-sweep" => Ok(Self::PreProbabilitySweep),
            "entryN" | "entryN-sweep" | "entryn" => Ok(Self::EntryCountSweep),
            "simplex" | "simplex-sweep" => Ok(Self::SimplexSweep),
            "fix" | "fixed" => Ok(Self::Fixed),
            "none" => Ok(Self::Idle),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Size of one run: N entries per draw, L draws per epoch, E epochs over W workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunConfiguration {
    /// Entries per multinomial draw (first entry count for entry sweeps).
    pub entry_count: u64,
    /// Draws per epoch.
    pub loop_count: u64,
    /// Epochs in the sweep.
    pub epoch_count: usize,
    /// Requested workers.
    pub worker_count: usize,
}

/// How worker seeds derive from the base seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedDerivation {
    /// `base + worker index`.
    #[default]
    PerWorker,
    /// Every worker starts from `base`.
    Shared,
}

/// Base seed plus derivation rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Seed before derivation.
    pub base: u64,
    /// Derivation rule.
    pub derivation: SeedDerivation,
}

impl SeedPolicy {
    /// Seed for the worker launched with `index`.
    #[must_use]
    pub const fn worker_seed(&self, index: usize) -> u64 {
        match self.derivation {
            SeedDerivation::PerWorker => self.base.wrapping_add(index as u64),
            SeedDerivation::Shared => self.base,
        }
    }
}

/// Every tunable of a study; loadable from TOML, overridable from the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudyConfig {
    /// Worker count.
    pub threads: usize,
    /// Entries per draw for pre-probability, simplex, and fixed studies.
    pub entry_count: u64,
    /// First entry count of an entry sweep (inclusive).
    pub entry_min: u64,
    /// Last entry count of an entry sweep (exclusive).
    pub entry_max: u64,
    /// Draws per epoch.
    pub loop_count: u64,
    /// Mid probability.
    pub pb: f64,
    /// Pre probability of the fixed study.
    pub pa: f64,
    /// First pre probability of a pre-probability sweep.
    pub pa_min: f64,
    /// End of the pre-probability sweep; `1 - pb` when unset.
    pub pa_max: Option<f64>,
    /// Points in a pre-probability sweep.
    pub pa_size: usize,
    /// Epochs in a random-simplex sweep.
    pub epochs: usize,
    /// Categories per generated simplex.
    pub simplex_size: usize,
    /// Upper bound for randomly drawn centers.
    pub center_max: f64,
    /// Base seed; `None` draws one at startup.
    pub seed: Option<u64>,
    /// Give every worker the base seed instead of `base + index`.
    pub shared_seed: bool,
    /// Bins in each worker's position histogram.
    pub histogram_bins: usize,
    /// Dispersion figure reported as the error.
    pub error_estimate: ErrorEstimate,
    /// Directory receiving every output.
    pub output_dir: PathBuf,
    /// Pre-probability sweep table.
    pub pa_output: String,
    /// Entry sweep table.
    pub entry_output: String,
    /// Random-simplex sweep table.
    pub simplex_output: String,
    /// Fixed-study render target.
    pub render_output: String,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            entry_count: 400,
            entry_min: 10,
            entry_max: 20,
            loop_count: 1000,
            pb: 0.01,
            pa: 0.0,
            pa_min: 0.0,
            pa_max: None,
            pa_size: 200,
            epochs: 10,
            simplex_size: 5,
            center_max: 1.0,
            seed: Some(0),
            shared_seed: false,
            histogram_bins: 10_000,
            error_estimate: ErrorEstimate::StdDev,
            output_dir: PathBuf::from("."),
            pa_output: "pa.csv".into(),
            entry_output: "entryN.csv".into(),
            simplex_output: "simplex.csv".into(),
            render_output: "distri.png".into(),
        }
    }
}

impl StudyConfig {
    /// Loads a TOML file; a relative `output_dir` resolves against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading study config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if config.output_dir.is_relative() {
            let source_dir = path
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            config.output_dir = source_dir.join(&config.output_dir);
        }
        Ok(config)
    }

    /// Resolved pre-probability sweep range `[pa_min, pa_max)`.
    #[must_use]
    pub fn pa_range(&self) -> (f64, f64) {
        (self.pa_min, self.pa_max.unwrap_or(1.0 - self.pb))
    }

    /// Seed policy; draws a base seed when none is pinned.
    #[must_use]
    pub fn seed_policy(&self) -> SeedPolicy {
        SeedPolicy {
            base: self.seed.unwrap_or_else(random_seed),
            derivation: if self.shared_seed {
                SeedDerivation::Shared
            } else {
                SeedDerivation::PerWorker
            },
        }
    }

    /// Run size for `mode`.
    #[must_use]
    pub fn run_configuration(&self, mode: StudyMode) -> RunConfiguration {
        let (entry_count, epoch_count) = match mode {
            StudyMode::PreProbabilitySweep => (self.entry_count, self.pa_size),
            StudyMode::EntryCountSweep => (
                self.entry_min,
                usize::try_from(self.entry_max.saturating_sub(self.entry_min)).unwrap_or(usize::MAX),
            ),
            StudyMode::SimplexSweep => (self.entry_count, self.epochs),
            StudyMode::Fixed => (self.entry_count, 1),
            StudyMode::Idle => (self.entry_count, 0),
        };
        RunConfiguration {
            entry_count,
            loop_count: self.loop_count,
            epoch_count,
            worker_count: self.threads,
        }
    }

    /// Output file for `mode`, if it writes one.
    #[must_use]
    pub fn output_path(&self, mode: StudyMode) -> Option<PathBuf> {
        let name = match mode {
            StudyMode::PreProbabilitySweep => &self.pa_output,
            StudyMode::EntryCountSweep => &self.entry_output,
            StudyMode::SimplexSweep => &self.simplex_output,
            StudyMode::Fixed => &self.render_output,
            StudyMode::Idle => return None,
        };
        Some(self.output_dir.join(name))
    }

    /// Checks every parameter `mode` reads.
    pub fn validate_for(&self, mode: StudyMode) -> Result<(), ConfigError> {
        if mode == StudyMode::Idle {
            return Ok(());
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.loop_count == 0 {
            return Err(ConfigError::ZeroLoops);
        }
        if self.histogram_bins == 0 {
            return Err(ConfigError::EmptyHistogram);
        }
        probability("pb", self.pb, 1.0)?;
        match mode {
            StudyMode::PreProbabilitySweep => {
                self.require_entries()?;
                if self.pa_size == 0 {
                    return Err(ConfigError::ZeroEpochs);
                }
                let (low, high) = self.pa_range();
                probability("pa_min", low, 1.0 - self.pb)?;
                probability("pa_max", high, 1.0 - self.pb)?;
                if low > high {
                    return Err(ConfigError::ProbabilityOutOfRange {
                        name: "pa_max",
                        value: high,
                        low,
                        high: 1.0 - self.pb,
                    });
                }
            }
            StudyMode::EntryCountSweep => {
                if self.entry_min >= self.entry_max {
                    return Err(ConfigError::EmptyEntryRange {
                        min: self.entry_min,
                        max: self.entry_max,
                    });
                }
                if self.entry_min == 0 {
                    return Err(ConfigError::ZeroEntries);
                }
            }
            StudyMode::SimplexSweep => {
                self.require_entries()?;
                if self.epochs == 0 {
                    return Err(ConfigError::ZeroEpochs);
                }
                SimplexGenerator::new(self.simplex_size)?;
                if !(self.center_max > 0.0 && self.center_max <= 1.0) {
                    return Err(ConfigError::ProbabilityOutOfRange {
                        name: "center_max",
                        value: self.center_max,
                        low: 0.0,
                        high: 1.0,
                    });
                }
            }
            StudyMode::Fixed => {
                self.require_entries()?;
                probability("pa", self.pa, 1.0 - self.pb)?;
            }
            StudyMode::Idle => {}
        }
        Ok(())
    }

    const fn require_entries(&self) -> Result<(), ConfigError> {
        if self.entry_count == 0 {
            Err(ConfigError::ZeroEntries)
        } else {
            Ok(())
        }
    }
}

fn probability(name: &'static str, value: f64, high: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=high).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ProbabilityOutOfRange {
            name,
            value,
            low: 0.0,
            high,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mode_names_and_aliases_resolve() {
        assert_eq!("pa".parse::<StudyMode>().unwrap(), StudyMode::PreProbabilitySweep);
        assert_eq!("entryN-sweep".parse::<StudyMode>().unwrap(), StudyMode::EntryCountSweep);
        assert_eq!("simplex".parse::<StudyMode>().unwrap(), StudyMode::SimplexSweep);
        assert_eq!("fix".parse::<StudyMode>().unwrap(), StudyMode::Fixed);
        assert_eq!("none".parse::<StudyMode>().unwrap(), StudyMode::Idle);
        assert_eq!(
            "histogram".parse::<StudyMode>().unwrap_err(),
            ConfigError::UnknownMode("histogram".into())
        );
    }

    #[test]
    fn seeds_derive_per_worker_unless_shared() {
        let mut policy = SeedPolicy {
            base: 40,
            derivation: SeedDerivation::PerWorker,
        };
        assert_eq!(policy.worker_seed(2), 42);
        assert_eq!(
            SeedPolicy { base: u64::MAX, ..policy }.worker_seed(1),
            0
        );
        policy.derivation = SeedDerivation::Shared;
        assert_eq!(policy.worker_seed(2), 40);
    }

    #[test]
    fn defaults_validate_for_every_mode() {
        let config = StudyConfig::default();
        for mode in [
            StudyMode::PreProbabilitySweep,
            StudyMode::EntryCountSweep,
            StudyMode::SimplexSweep,
            StudyMode::Fixed,
            StudyMode::Idle,
        ] {
            config.validate_for(mode).unwrap();
        }
        let (low, high) = config.pa_range();
        assert_eq!(low, 0.0);
        assert!((high - 0.99).abs() < 1e-12);
        assert_eq!(
            config.run_configuration(StudyMode::EntryCountSweep).epoch_count,
            10
        );
    }

    #[test]
    fn validation_rejects_degenerate_parameters() {
        let config = StudyConfig {
            epochs: 0,
            ..StudyConfig::default()
        };
        assert_eq!(
            config.validate_for(StudyMode::SimplexSweep),
            Err(ConfigError::ZeroEpochs)
        );
        assert!(config.validate_for(StudyMode::Idle).is_ok());

        let config = StudyConfig {
            simplex_size: 4,
            ..StudyConfig::default()
        };
        assert_eq!(
            config.validate_for(StudyMode::SimplexSweep),
            Err(ConfigError::InvalidSimplexSize(4))
        );

        let config = StudyConfig {
            pa: 0.995,
            ..StudyConfig::default()
        };
        assert!(matches!(
            config.validate_for(StudyMode::Fixed),
            Err(ConfigError::ProbabilityOutOfRange { name: "pa", .. })
        ));

        let config = StudyConfig {
            entry_min: 20,
            entry_max: 20,
            ..StudyConfig::default()
        };
        assert_eq!(
            config.validate_for(StudyMode::EntryCountSweep),
            Err(ConfigError::EmptyEntryRange { min: 20, max: 20 })
        );

        let config = StudyConfig {
            pa_min: 0.5,
            pa_max: Some(0.1),
            ..StudyConfig::default()
        };
        assert!(matches!(
            config.validate_for(StudyMode::PreProbabilitySweep),
            Err(ConfigError::ProbabilityOutOfRange { name: "pa_max", low, .. }) if low == 0.5
        ));

        let config = StudyConfig {
            threads: 0,
            ..StudyConfig::default()
        };
        assert_eq!(
            config.validate_for(StudyMode::PreProbabilitySweep),
            Err(ConfigError::ZeroWorkers)
        );
    }

    #[test]
    fn loads_toml_with_defaults_and_relative_output_dir() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("study.toml");
        std::fs::write(
            &path,
            "threads = 4\nepochs = 3\nseed = 7\noutput_dir = \"out\"\nerror_estimate = \"std_error_of_mean\"\n",
        )
        .unwrap();
        let config = StudyConfig::load(&path).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.entry_count, 400);
        assert_eq!(config.error_estimate, ErrorEstimate::StdErrorOfMean);
        assert_eq!(config.output_dir, tmp.path().join("out"));
        assert_eq!(
            config.output_path(StudyMode::SimplexSweep),
            Some(tmp.path().join("out").join("simplex.csv"))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("study.toml");
        std::fs::write(&path, "thread = 4\n").unwrap();
        assert!(StudyConfig::load(&path).is_err());
    }
}
