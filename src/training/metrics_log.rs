//! Flat-file metrics logger
//!
//! Each run gets its own directory `log_dir/<run_name>/version_<n>/` with
//! the next free version number. Inside it:
//!
//! - `metrics.csv`: long format, one `step,epoch,metric,value` row per
//!   logged value, flushed as it is written
//! - `hparams.json`: hyperparameters captured when the run starts
//!
//! Step metrics are accumulated (weighted by batch size) so the epoch
//! aggregates can be written once the phase ends.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::utils::error::{Result, ShotError};

const METRICS_FILE: &str = "metrics.csv";
const HPARAMS_FILE: &str = "hparams.json";

#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    step: usize,
    epoch: usize,
    metric: &'a str,
    value: f64,
}

/// Running weighted mean of a metric
#[derive(Debug, Clone, Copy, Default)]
struct Running {
    sum: f64,
    weight: f64,
}

impl Running {
    fn add(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
    }

    fn mean(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }
}

/// Versioned CSV metrics sink for a single run
pub struct MetricsLogger {
    dir: PathBuf,
    writer: csv::Writer<File>,
    step: usize,
    epoch: usize,
    running: BTreeMap<String, Running>,
}

impl MetricsLogger {
    /// Create `root/<name>/version_<n>` and open its metrics file
    pub fn create<P: AsRef<Path>>(root: P, name: &str) -> Result<Self> {
        let run_dir = root.as_ref().join(name);
        std::fs::create_dir_all(&run_dir)?;

        let version = next_version(&run_dir)?;
        let dir = run_dir.join(format!("version_{}", version));
        std::fs::create_dir_all(&dir)?;

        let writer = csv::Writer::from_path(dir.join(METRICS_FILE))?;
        tracing::info!("Logging metrics to {:?}", dir);

        Ok(Self {
            dir,
            writer,
            step: 0,
            epoch: 0,
            running: BTreeMap::new(),
        })
    }

    /// Directory of this run version
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    /// Write the run's hyperparameters next to the metrics
    pub fn log_hyperparams<T: Serialize>(&self, hparams: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(hparams)?;
        std::fs::write(self.dir.join(HPARAMS_FILE), json)?;
        Ok(())
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Global optimizer step counter
    pub fn step(&self) -> usize {
        self.step
    }

    /// Advance the global step, called once per optimizer step
    pub fn advance_step(&mut self) {
        self.step += 1;
    }

    /// Write one row and fold the value into the epoch aggregate
    pub fn log_step(&mut self, name: &str, value: f64, weight: usize) -> Result<()> {
        self.log_value(name, value)?;
        self.accumulate(name, value, weight);
        Ok(())
    }

    /// Fold a value into its aggregate without writing a row
    pub fn accumulate(&mut self, name: &str, value: f64, weight: usize) {
        self.running
            .entry(name.to_string())
            .or_default()
            .add(value, weight as f64);
    }

    /// Write a single row at the current step and epoch
    pub fn log_value(&mut self, name: &str, value: f64) -> Result<()> {
        self.writer.serialize(MetricRow {
            step: self.step,
            epoch: self.epoch,
            metric: name,
            value,
        })?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write `<metric>_epoch` rows for every accumulated metric and reset
    ///
    /// A trailing `_step` is dropped, so `train_acc_step` aggregates into
    /// `train_acc_epoch` and `val_loss` into `val_loss_epoch`.
    pub fn flush_epoch(&mut self) -> Result<BTreeMap<String, f64>> {
        let aggregates = self.drain();
        for (name, value) in &aggregates {
            let base = name.strip_suffix("_step").unwrap_or(name);
            self.log_value(&format!("{}_epoch", base), *value)?;
        }
        Ok(aggregates)
    }

    /// Write every accumulated metric under its own name and reset
    pub fn flush_aggregates(&mut self) -> Result<BTreeMap<String, f64>> {
        let aggregates = self.drain();
        for (name, value) in &aggregates {
            self.log_value(name, *value)?;
        }
        Ok(aggregates)
    }

    fn drain(&mut self) -> BTreeMap<String, f64> {
        let aggregates: BTreeMap<String, f64> = std::mem::take(&mut self.running)
            .into_iter()
            .filter_map(|(name, running)| running.mean().map(|mean| (name, mean)))
            .collect();
        debug!("Aggregated metrics: {:?}", aggregates);
        aggregates
    }
}

/// One past the highest existing `version_<n>` directory
fn next_version(run_dir: &Path) -> Result<usize> {
    let mut next = 0;
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let version = name
            .to_str()
            .and_then(|n| n.strip_prefix("version_"))
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(version) = version {
            next = next.max(version + 1);
        }
    }
    Ok(next)
}

/// Read back a metrics file as `(step, epoch, metric, value)` rows
pub fn read_metrics<P: AsRef<Path>>(path: P) -> Result<Vec<(usize, usize, String, f64)>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ShotError::PathNotFound(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_versions_increment() {
        let dir = TempDir::new().unwrap();
        let first = MetricsLogger::create(dir.path(), "run").unwrap();
        let second = MetricsLogger::create(dir.path(), "run").unwrap();

        assert!(first.dir().ends_with("run/version_0"));
        assert!(second.dir().ends_with("run/version_1"));
    }

    #[test]
    fn test_next_version_skips_gaps() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("version_4")).unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        assert_eq!(next_version(dir.path()).unwrap(), 5);
    }

    #[test]
    fn test_epoch_aggregates_are_weighted() {
        let dir = TempDir::new().unwrap();
        let mut logger = MetricsLogger::create(dir.path(), "run").unwrap();

        logger.log_step("train_acc_step", 1.0, 3).unwrap();
        logger.advance_step();
        logger.log_step("train_acc_step", 0.0, 1).unwrap();
        logger.advance_step();

        let aggregates = logger.flush_epoch().unwrap();
        assert!((aggregates["train_acc_step"] - 0.75).abs() < 1e-12);

        let rows = read_metrics(logger.metrics_path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], (0, 0, "train_acc_step".to_string(), 1.0));
        assert_eq!(rows[2].2, "train_acc_epoch");

        // Aggregates reset after a flush
        assert!(logger.flush_epoch().unwrap().is_empty());
    }

    #[test]
    fn test_accumulate_writes_no_rows() {
        let dir = TempDir::new().unwrap();
        let mut logger = MetricsLogger::create(dir.path(), "run").unwrap();
        logger.set_epoch(2);
        logger.accumulate("test_loss", 0.5, 2);
        logger.accumulate("test_loss", 1.0, 2);

        assert!(read_metrics(logger.metrics_path()).unwrap().is_empty());

        let aggregates = logger.flush_aggregates().unwrap();
        assert!((aggregates["test_loss"] - 0.75).abs() < 1e-12);

        let rows = read_metrics(logger.metrics_path()).unwrap();
        assert_eq!(rows, vec![(0, 2, "test_loss".to_string(), 0.75)]);
    }

    #[test]
    fn test_hyperparams_written() {
        let dir = TempDir::new().unwrap();
        let logger = MetricsLogger::create(dir.path(), "run").unwrap();
        logger
            .log_hyperparams(&serde_json::json!({"learning_rate": 1e-4}))
            .unwrap();

        let json = std::fs::read_to_string(logger.dir().join("hparams.json")).unwrap();
        assert!(json.contains("learning_rate"));
    }
}
