use crate::{cache::CacheConfig, instance::Instance};
use core::num::NonZeroUsize;
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
};
use thiserror::Error;

/// Configuration entry-point for instantiating the scheduler.
///
/// A concrete `Config` binds the live instance type whose chains the
/// scheduler orders and runs.
pub trait Config: Sized + 'static {
    /// The user-defined instance type found in pass chains.
    type Instance: Instance;
}

/// Error kind for unusable scheduler settings.
///
/// The scheduler cannot run with unknown parameters, so every variant is
/// fatal at startup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configured file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The thresholds file lacks a value or holds an unreadable one.
    #[error("thresholds file: expected a non-negative integer for {parameter}")]
    Thresholds {
        /// Name of the offending value.
        parameter: &'static str,
    },
    /// The settings are not valid TOML or have unknown keys.
    #[error("invalid scheduler settings: {0}")]
    Toml(#[from] toml::de::Error),
    /// `workers` was set to zero.
    #[error("workers must be at least 1")]
    ZeroWorkers,
}

/// Runtime settings of a [`Scheduler`](crate::scheduler::Scheduler).
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Worker threads draining a parallel pass. Also the batch count the
    /// optimizer aims for.
    pub workers: usize,
    /// Merge independent nodes into worker-sized batches after building.
    pub optimize: bool,
    /// Time every instance and feed the results into the weight table.
    pub measure_play_time: bool,
    /// `name, weight[, play_time]` file seeding the weight table.
    pub weights_path: Option<PathBuf>,
    /// Four-value file with the parallel scheduling thresholds.
    pub thresholds_path: Option<PathBuf>,
    /// Graph cache tuning.
    pub cache: CacheConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            optimize: true,
            measure_play_time: false,
            weights_path: None,
            thresholds_path: None,
            cache: CacheConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Parse settings from TOML text.
    ///
    /// # Errors
    /// If the text is not valid TOML for these settings, or fails
    /// [`SchedulerConfig::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read settings from a TOML file.
    ///
    /// # Errors
    /// If the file cannot be read or its contents are invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check the values serde cannot.
    ///
    /// # Errors
    /// If `workers` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker_count().map(|_| ())
    }

    /// `workers` as a non-zero count.
    ///
    /// # Errors
    /// If `workers` is zero.
    pub fn worker_count(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.workers).ok_or(ConfigError::ZeroWorkers)
    }
}
