//! Sample table: one row per image, persisted as `image_id,label,kfold` CSV.
//!
//! The CSV file is the contract between `prepare` and `train`. A fold of
//! `-1` on disk means "not assigned yet".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, ShotError};

/// One indexed image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    /// Image location, unique per table
    pub image_path: PathBuf,
    /// Encoded class label
    pub label: usize,
    /// Cross-validation fold, `None` before assignment
    pub fold: Option<usize>,
}

impl SampleRecord {
    pub fn new(image_path: PathBuf, label: usize) -> Self {
        Self {
            image_path,
            label,
            fold: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    image_id: String,
    label: usize,
    kfold: i64,
}

/// Ordered collection of sample records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTable {
    records: Vec<SampleRecord>,
}

impl SampleTable {
    pub fn new(records: Vec<SampleRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&SampleRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter()
    }

    /// Encoded labels in row order
    pub fn labels(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.label).collect()
    }

    /// Rows whose fold equals `fold`
    pub fn in_fold(&self, fold: usize) -> SampleTable {
        self.filtered(|r| r.fold == Some(fold))
    }

    /// Rows whose fold differs from `fold`
    pub fn outside_fold(&self, fold: usize) -> SampleTable {
        self.filtered(|r| r.fold != Some(fold))
    }

    fn filtered<F: Fn(&SampleRecord) -> bool>(&self, keep: F) -> SampleTable {
        SampleTable::new(self.records.iter().filter(|r| keep(r)).cloned().collect())
    }

    /// Number of rows per label
    pub fn label_counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.label).or_insert(0) += 1;
        }
        counts
    }

    /// Number of rows per label within each assigned fold
    pub fn fold_label_counts(&self) -> BTreeMap<usize, BTreeMap<usize, usize>> {
        let mut counts: BTreeMap<usize, BTreeMap<usize, usize>> = BTreeMap::new();
        for record in &self.records {
            if let Some(fold) = record.fold {
                *counts.entry(fold).or_default().entry(record.label).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Write the table as CSV with a header row, replacing any existing file
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for record in &self.records {
            let image_id = record.image_path.to_str().ok_or_else(|| {
                ShotError::Table(format!("Path {:?} is not valid UTF-8", record.image_path))
            })?;
            writer.serialize(CsvRow {
                image_id: image_id.to_string(),
                label: record.label,
                kfold: record.fold.map_or(-1, |f| f as i64),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a table written by [`SampleTable::write_csv`]
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ShotError::PathNotFound(path.to_path_buf()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row?;
            let fold = match row.kfold {
                -1 => None,
                f if f >= 0 => Some(f as usize),
                f => {
                    return Err(ShotError::Table(format!(
                        "Row {} of {:?} has invalid fold {}",
                        line + 1,
                        path,
                        f
                    )))
                }
            };
            records.push(SampleRecord {
                image_path: PathBuf::from(row.image_id),
                label: row.label,
                fold,
            });
        }

        tracing::debug!("Read {} rows from {:?}", records.len(), path);
        Ok(Self { records })
    }
}

impl FromIterator<SampleRecord> for SampleTable {
    fn from_iter<I: IntoIterator<Item = SampleRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, label: usize, fold: Option<usize>) -> SampleRecord {
        SampleRecord {
            image_path: PathBuf::from(path),
            label,
            fold,
        }
    }

    fn sample_table() -> SampleTable {
        SampleTable::new(vec![
            record("t/a_closeup.jpg", 0, Some(0)),
            record("t/b_wide.jpg", 1, Some(1)),
            record("t/c_closeup.jpg", 0, Some(1)),
            record("t/d_long.jpg", 2, Some(2)),
        ])
    }

    #[test]
    fn test_csv_header_and_unassigned_fold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train_folds.csv");

        let table = SampleTable::new(vec![SampleRecord::new(PathBuf::from("x/y_wide.jpg"), 3)]);
        table.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("image_id,label,kfold"));
        assert_eq!(lines.next(), Some("x/y_wide.jpg,3,-1"));

        let loaded = SampleTable::read_csv(&path).unwrap();
        assert_eq!(loaded.get(0).unwrap().fold, None);
    }

    #[test]
    fn test_write_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("train_folds.csv");

        sample_table().write_csv(&path).unwrap();
        let smaller = SampleTable::new(vec![record("only_one.jpg", 0, Some(0))]);
        smaller.write_csv(&path).unwrap();

        assert_eq!(SampleTable::read_csv(&path).unwrap(), smaller);
    }

    #[test]
    fn test_read_rejects_negative_fold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "image_id,label,kfold\na_b.jpg,0,-3\n").unwrap();
        assert!(matches!(SampleTable::read_csv(&path), Err(ShotError::Table(_))));
    }

    #[test]
    fn test_read_missing_file() {
        let result = SampleTable::read_csv("/no/such/train_folds.csv");
        assert!(matches!(result, Err(ShotError::PathNotFound(_))));
    }

    #[test]
    fn test_fold_filters_partition_the_table() {
        let table = sample_table();
        let held_out = table.in_fold(1);
        let rest = table.outside_fold(1);

        assert_eq!(held_out.len(), 2);
        assert_eq!(rest.len(), 2);
        assert!(held_out.iter().all(|r| r.fold == Some(1)));
        assert!(rest.iter().all(|r| r.fold != Some(1)));
    }

    #[test]
    fn test_missing_fold_gives_empty_split() {
        let table = sample_table();
        assert!(table.in_fold(7).is_empty());
        assert_eq!(table.outside_fold(7).len(), table.len());
    }

    #[test]
    fn test_label_counts() {
        let table = sample_table();
        let counts = table.label_counts();
        assert_eq!(counts[&0], 2);
        assert_eq!(counts[&1], 1);
        assert_eq!(counts[&2], 1);

        let per_fold = table.fold_label_counts();
        assert_eq!(per_fold[&1][&0], 1);
        assert_eq!(per_fold[&1][&1], 1);
    }
}
