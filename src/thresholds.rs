use crate::{config::ConfigError, graph::Graph};
use core::fmt::{self, Display, Formatter};
use std::{fs, path::Path, str::FromStr};

/// Limits deciding whether a pass is worth running in parallel.
///
/// A maximum of zero means unbounded. The default admits every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    /// Smallest total graph weight scheduled in parallel.
    pub weight_min: u64,
    /// Largest total graph weight scheduled in parallel.
    pub weight_max: u64,
    /// Smallest `max_roots` scheduled in parallel.
    pub roots_avail_min: usize,
    /// Largest `max_roots` scheduled in parallel.
    pub roots_avail_max: usize,
}

impl Thresholds {
    /// Parse four whitespace-separated values in the order `weight_min
    /// weight_max roots_avail_min roots_avail_max`.
    ///
    /// # Errors
    /// Naming the first missing or unreadable value.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut values = text.split_whitespace();
        Ok(Self {
            weight_min: next_value(&mut values, "weight_min")?,
            weight_max: next_value(&mut values, "weight_max")?,
            roots_avail_min: next_value(&mut values, "roots_avail_min")?,
            roots_avail_max: next_value(&mut values, "roots_avail_max")?,
        })
    }

    /// Read and parse the thresholds file at `path`.
    ///
    /// # Errors
    /// If the file cannot be read or does not hold four values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text)
    }

    /// `true` when `graph` is heavy enough and wide enough to be drained by
    /// several workers.
    #[must_use]
    pub fn should_parallelize(&self, graph: &Graph) -> bool {
        let (weight, roots) = (graph.weight(), graph.max_roots());
        weight >= self.weight_min
            && roots >= self.roots_avail_min
            && (self.weight_max == 0 || weight <= self.weight_max)
            && (self.roots_avail_max == 0 || roots <= self.roots_avail_max)
    }
}

fn next_value<'a, T: FromStr>(
    values: &mut impl Iterator<Item = &'a str>,
    parameter: &'static str,
) -> Result<T, ConfigError> {
    values
        .next()
        .and_then(|value| value.parse().ok())
        .ok_or(ConfigError::Thresholds { parameter })
}

impl Display for Thresholds {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "weight_min: {}, weight_max: {}, roots_avail_min: {}, roots_avail_max: {}",
            self.weight_min, self.weight_max, self.roots_avail_min, self.roots_avail_max
        )
    }
}
