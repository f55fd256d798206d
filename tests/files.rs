#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use core::num::NonZeroU16;
use pass_dag::{
    access::AccessSets,
    config::{Config, ConfigError, SchedulerConfig},
    instance::Instance,
    scheduler::{Scheduler, SchedulerError},
    thresholds::Thresholds,
    types::InstrId,
    weights::{DEFAULT_WEIGHT, WeightTable},
};
use std::{fs, io::Write, path::Path};
use tempfile::{NamedTempFile, TempDir};

fn iid(x: u16) -> InstrId {
    NonZeroU16::new(x).unwrap()
}

fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn reverb_weight_holds_while_play_time_converges() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "reverb, 7, 0.0023").unwrap();
    let mut table = WeightTable::load(file.path()).unwrap();

    assert_eq!(table.fetch("reverb"), 7);
    assert_eq!(table.play_time("reverb"), Some(0.0023));

    let measured = 0.01;
    let mut previous = (measured - 0.0023_f64).abs();
    for _ in 0..50 {
        table.set("reverb", measured);
        let distance = (measured - table.play_time("reverb").unwrap()).abs();
        assert!(distance < previous);
        previous = distance;
    }
    // 0.9^50 of the initial gap is left.
    assert!(previous < 0.0001);
    assert_eq!(table.fetch("reverb"), 7);
}

#[test]
fn first_update_moves_a_tenth_of_the_way() {
    let table = {
        let mut table = WeightTable::parse("reverb, 7, 0.0023\n");
        table.set("reverb", 0.0123);
        table
    };
    let play_time = table.play_time("reverb").unwrap();
    assert!((play_time - 0.0033).abs() < 1e-12);
}

#[test]
fn missing_weights_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.txt");
    let err = WeightTable::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { path: ref p, .. } if p == &path));
}

#[test]
fn unknown_names_fall_back_to_default() {
    let table = WeightTable::parse("osc, 3\n");
    assert_eq!(table.fetch("granule"), DEFAULT_WEIGHT);
}

#[test]
fn weights_dump_round_trips_through_a_file() {
    let mut table = WeightTable::new();
    table.set("osc", 0.001);
    table.set("reverb", 0.003);
    table.set("fft", 0.002);

    let file = NamedTempFile::new().unwrap();
    table.write_to(file.as_file()).unwrap();
    let reloaded = WeightTable::load(file.path()).unwrap();
    assert_eq!(reloaded.fetch("osc"), 1);
    assert_eq!(reloaded.fetch("fft"), 50);
    assert_eq!(reloaded.fetch("reverb"), 100);
}

#[test]
fn thresholds_file_is_read_in_order() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "parallel.thresholds", "1125\n0\n2\n0\n");
    let thresholds = Thresholds::load(&path).unwrap();
    assert_eq!(thresholds.weight_min, 1125);
    assert_eq!(thresholds.roots_avail_min, 2);
}

#[test]
fn truncated_thresholds_file_names_the_missing_value() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "parallel.thresholds", "10 20\n");
    let err = Thresholds::load(&path).unwrap_err();
    assert_eq!(
        err.to_string(),
        "thresholds file: expected a non-negative integer for roots_avail_min"
    );
}

#[derive(Debug)]
struct Voice(InstrId);

impl Instance for Voice {
    fn instr_id(&self) -> InstrId {
        self.0
    }
}

struct Engine;

impl Config for Engine {
    type Instance = Voice;
}

#[test]
fn scheduler_loads_both_files_from_toml_settings() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "weights.txt", "osc, 40\nfilter, 60, 0.002\n");
    write_file(dir.path(), "parallel.thresholds", "1000 0 2 0");
    let settings = format!(
        "workers = 2\nweights_path = {:?}\nthresholds_path = {:?}\n",
        dir.path().join("weights.txt"),
        dir.path().join("parallel.thresholds"),
    );
    let settings_path = write_file(dir.path(), "scheduler.toml", &settings);

    let config = SchedulerConfig::from_toml_file(&settings_path).unwrap();
    let mut scheduler = Scheduler::<Engine>::new(config).unwrap();
    assert_eq!(scheduler.weight_fetch("osc"), 40);
    assert_eq!(scheduler.thresholds().weight_min, 1000);

    scheduler.register_type(iid(1), "osc", AccessSets::new());
    scheduler.register_type(iid(2), "filter", AccessSets::new());
    assert_eq!(scheduler.registry().get(iid(2)).unwrap().weight(), 60);

    // Total weight 200 is below the 1000 minimum: runs serially.
    let light = [Voice(iid(1)), Voice(iid(2)), Voice(iid(1)), Voice(iid(2))];
    assert!(!scheduler.run_pass(&light, |_| {}).unwrap().parallel);

    // 20 independent oscillators weigh 800; 30 weigh 1200.
    let heavy: Vec<Voice> = (0..30).map(|_| Voice(iid(1))).collect();
    let summary = scheduler.run_pass(&heavy, |_| {}).unwrap();
    assert!(summary.parallel);
    assert_eq!(summary.instances, 30);

    let mut dump = Vec::new();
    scheduler.write_cache_entries(&mut dump).unwrap();
    let dump = String::from_utf8(dump).unwrap();
    assert!(dump.starts_with("1,2,1,2\n") || dump.contains("\n1,2,1,2\n"));
}

#[test]
fn scheduler_refuses_a_missing_thresholds_file() {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig {
        workers: 1,
        thresholds_path: Some(dir.path().join("absent.thresholds")),
        ..SchedulerConfig::default()
    };
    let err = Scheduler::<Engine>::new(config).unwrap_err();
    assert!(matches!(err, SchedulerError::Config(ConfigError::Io { .. })));
}
