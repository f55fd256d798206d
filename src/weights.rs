use crate::{config::ConfigError, types::IndexMap};
use core::fmt::{self, Display, Formatter};
use std::{fs, io, path::Path};
use tracing::{debug, warn};

/// Weight of a type that has neither a file weight nor a measurement.
pub const DEFAULT_WEIGHT: u32 = 5;

/// Share of the previous play time kept by every new measurement.
const DECAY: f64 = 0.9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WeightEntry {
    /// Weight read from the weights file.
    weight: Option<u32>,
    /// Decayed moving average of measured execution time, `0.0` until the
    /// first measurement.
    play_time: f64,
}

/// Per-type cost estimates.
///
/// Seeded from an optional `name, weight[, play_time]` file and refined by
/// measured execution times. File weights take precedence; types without
/// one are weighted by their measured play time relative to all others.
#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    entries: IndexMap<String, WeightEntry>,
    loaded: bool,
}

impl WeightTable {
    /// Empty table: every type weighs [`DEFAULT_WEIGHT`] until measured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse weights file contents.
    ///
    /// Malformed rows never fail the parse: a row without a name is
    /// skipped, an unreadable weight becomes [`DEFAULT_WEIGHT`] and an
    /// unreadable play time is ignored, each with a warning.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut table = Self {
            entries: IndexMap::default(),
            loaded: true,
        };
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, ',').map(str::trim);
            let name = fields.next().unwrap_or_default();
            let Some(weight) = fields.next() else {
                warn!(line = line_no, row = line, "weights row has no weight column, skipped");
                continue;
            };
            if name.is_empty() {
                warn!(line = line_no, "weights row has no name, skipped");
                continue;
            }
            let weight = weight.parse().unwrap_or_else(|_| {
                warn!(line = line_no, name, weight, "unreadable weight, using default");
                DEFAULT_WEIGHT
            });
            table.entries.entry(name.to_owned()).or_default().weight = Some(weight);
            if let Some(play_time) = fields.next() {
                match play_time.parse::<f64>() {
                    Ok(play_time) if play_time.is_finite() && play_time >= 0.0 => {
                        table.set(name, play_time);
                    }
                    _ => warn!(line = line_no, name, play_time, "unreadable play time, ignored"),
                }
            }
        }
        debug!(entries = table.entries.len(), "parsed weights");
        table
    }

    /// Read and parse the weights file at `path`.
    ///
    /// # Errors
    /// If the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// `true` when the table was seeded from a weights file.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of known types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no type is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weight of type `name`.
    ///
    /// The file weight if there is one, else the normalised measured play
    /// time, else [`DEFAULT_WEIGHT`].
    pub fn fetch(&self, name: &str) -> u32 {
        match self.entries.get(name) {
            Some(&WeightEntry {
                weight: Some(weight),
                ..
            }) => weight,
            Some(entry) if entry.play_time > 0.0 => {
                Scale::of(&self.entries).normalise(entry.play_time)
            }
            _ => {
                if self.loaded {
                    warn!(name, "no weight found, using default");
                }
                DEFAULT_WEIGHT
            }
        }
    }

    /// Fold one measured execution time of `name` into its play time.
    ///
    /// The first measurement is stored as is; later ones move the average
    /// by a tenth of the difference.
    pub fn set(&mut self, name: &str, play_time: f64) {
        let entry = match self.entries.get_mut(name) {
            Some(entry) => entry,
            None => self.entries.entry(name.to_owned()).or_default(),
        };
        entry.play_time = if entry.play_time == 0.0 {
            play_time
        } else {
            DECAY * entry.play_time + (1.0 - DECAY) * play_time
        };
    }

    /// Current play time average of `name`, if it was ever measured.
    #[must_use]
    pub fn play_time(&self, name: &str) -> Option<f64> {
        self.entries
            .get(name)
            .map(|entry| entry.play_time)
            .filter(|&play_time| play_time > 0.0)
    }

    /// Play times mapped linearly onto `1..=100`, in insertion order.
    #[must_use]
    pub fn normalised(&self) -> Vec<(&str, u32, f64)> {
        let scale = Scale::of(&self.entries);
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), scale.normalise(entry.play_time), entry.play_time))
            .collect()
    }

    /// Write `name, weight, play_time` rows with normalised weights. The
    /// output can be read back with [`WeightTable::parse`].
    ///
    /// # Errors
    /// If writing fails.
    pub fn write_to<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        for (name, weight, play_time) in self.normalised() {
            writeln!(writer, "{name}, {weight}, {play_time}")?;
        }
        writer.flush()
    }
}

/// Smallest and largest non-zero play time.
#[derive(Debug, Clone, Copy)]
struct Scale {
    min: f64,
    max: f64,
}

impl Scale {
    fn of(entries: &IndexMap<String, WeightEntry>) -> Self {
        entries
            .values()
            .map(|entry| entry.play_time)
            .filter(|&play_time| play_time > 0.0)
            .fold(None, |acc: Option<Self>, t| match acc {
                None => Some(Self { min: t, max: t }),
                Some(Self { min, max }) => Some(Self {
                    min: min.min(t),
                    max: max.max(t),
                }),
            })
            .unwrap_or(Self { min: 0.0, max: 0.0 })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn normalise(self, play_time: f64) -> u32 {
        let span = self.max - self.min;
        if span <= 0.0 || play_time <= self.min {
            return 1;
        }
        if play_time >= self.max {
            return 100;
        }
        let scaled = ((play_time - self.min) * 99.0 / span).floor();
        scaled.min(99.0) as u32 + 1
    }
}

impl Display for WeightTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.loaded && self.entries.is_empty() {
            return writeln!(f, "no weights (using defaults)");
        }
        for name in self.entries.keys() {
            writeln!(f, "{name} => {}", self.fetch(name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_weights_win_over_measurements() {
        let mut table = WeightTable::parse("reverb, 7, 0.0023\nosc, 3\n");
        assert_eq!(table.fetch("reverb"), 7);
        assert_eq!(table.fetch("osc"), 3);
        table.set("reverb", 1.0);
        assert_eq!(table.fetch("reverb"), 7);
    }

    #[test]
    fn malformed_rows_are_tolerated() {
        let table = WeightTable::parse("  \nnocomma\n, 4\nbad, x\nslow, 2, nan?\n");
        assert_eq!(table.len(), 2);
        assert_eq!(table.fetch("bad"), DEFAULT_WEIGHT);
        assert_eq!(table.fetch("slow"), 2);
        assert_eq!(table.play_time("slow"), None);
        assert_eq!(table.fetch("nocomma"), DEFAULT_WEIGHT);
    }

    #[test]
    fn first_measurement_is_stored_then_decayed() {
        let mut table = WeightTable::new();
        table.set("osc", 10.0);
        assert_eq!(table.play_time("osc"), Some(10.0));
        table.set("osc", 20.0);
        let t = table.play_time("osc").unwrap();
        assert!((t - 11.0).abs() < 1e-9);
    }

    #[test]
    fn measured_types_are_weighted_relative_to_each_other() {
        let mut table = WeightTable::new();
        table.set("cheap", 1.0);
        table.set("mid", 2.0);
        table.set("dear", 3.0);
        assert_eq!(table.fetch("cheap"), 1);
        assert_eq!(table.fetch("mid"), 50);
        assert_eq!(table.fetch("dear"), 100);
        assert_eq!(table.fetch("unknown"), DEFAULT_WEIGHT);
    }

    #[test]
    fn equal_play_times_normalise_to_one() {
        let mut table = WeightTable::new();
        table.set("a", 0.5);
        table.set("b", 0.5);
        let weights: Vec<u32> = table.normalised().iter().map(|&(_, w, _)| w).collect();
        assert_eq!(weights, vec![1, 1]);
    }

    #[test]
    fn dump_reloads() {
        let mut table = WeightTable::new();
        table.set("a", 1.0);
        table.set("b", 2.0);
        let mut out = Vec::new();
        table.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "a, 1, 1\nb, 100, 2\n");
        let reloaded = WeightTable::parse(&text);
        assert_eq!(reloaded.fetch("b"), 100);
        assert_eq!(reloaded.play_time("a"), Some(1.0));
    }
}
