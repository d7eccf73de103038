//! Dataset indexer: discovers frames and builds the encoded sample table.
//!
//! The expected layout is exactly one directory level below the root:
//!
//! ```text
//! root/
//! ├── trailer_001/
//! │   ├── clip_00012_closeup.jpg
//! │   └── clip_00013_wide.jpg
//! └── trailer_002/
//!     └── ...
//! ```
//!
//! Files at any other depth, or with an extension other than `.jpg`, are
//! skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dataset::labels::{extract_label, LabelMap};
use crate::dataset::table::{SampleRecord, SampleTable};
use crate::utils::error::{Result, ResultExt, ShotError};

/// Encoded sample table together with its label map
#[derive(Debug, Clone)]
pub struct IndexedDataset {
    pub table: SampleTable,
    pub label_map: LabelMap,
}

impl IndexedDataset {
    pub fn stats(&self) -> DatasetStats {
        DatasetStats::from_table(&self.table, &self.label_map)
    }
}

/// Find every `root/*/*.jpg` file, sorted by path
pub fn discover_images<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ShotError::PathNotFound(root.to_path_buf()));
    }

    let walker = WalkDir::new(root)
        .follow_links(true)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", root))?;
        let is_jpg = entry.path().extension().and_then(|ext| ext.to_str()) == Some("jpg");
        if entry.file_type().is_file() && is_jpg {
            paths.push(entry.into_path());
        }
    }

    paths.sort();
    debug!("Discovered {} images under {:?}", paths.len(), root);
    Ok(paths)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Index an image tree: extract labels, fit the label map and encode every row
pub fn index_directory<P: AsRef<Path>>(root: P) -> Result<IndexedDataset> {
    let root = root.as_ref();
    info!("Indexing images under {:?}", root);

    let paths = discover_images(root)?;
    if paths.is_empty() {
        return Err(ShotError::Dataset(format!(
            "No images matching <subdir>/*.jpg found under {:?}",
            root
        )));
    }

    let labeled = paths
        .into_iter()
        .map(|path| extract_label(&path).map(|label| (path, label)))
        .collect::<Result<Vec<_>>>()?;

    let label_map = LabelMap::fit(labeled.iter().map(|(_, label)| label));

    let records = labeled
        .into_iter()
        .map(|(path, label)| Ok(SampleRecord::new(path, label_map.encode(&label)?)))
        .collect::<Result<Vec<_>>>()?;

    let dataset = IndexedDataset {
        table: SampleTable::new(records),
        label_map,
    };

    let stats = dataset.stats();
    info!(
        "Indexed {} images with {} distinct labels",
        stats.total_samples, stats.num_classes
    );
    for (code, name) in stats.class_names.iter().enumerate() {
        info!("  {:>3} {:<20} {}", code, name, stats.class_counts[code]);
    }

    Ok(dataset)
}

/// Label distribution of a table, optionally broken down per fold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    /// Rows per label code
    pub class_counts: Vec<usize>,
    /// Label names ordered by code
    pub class_names: Vec<String>,
    /// Rows per label code within each assigned fold
    pub fold_counts: BTreeMap<usize, Vec<usize>>,
}

impl DatasetStats {
    pub fn from_table(table: &SampleTable, label_map: &LabelMap) -> Self {
        let num_classes = label_map.len();
        let mut class_counts = vec![0usize; num_classes];
        let mut fold_counts: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for record in table.iter() {
            if record.label >= num_classes {
                continue;
            }
            class_counts[record.label] += 1;
            if let Some(fold) = record.fold {
                fold_counts.entry(fold).or_insert_with(|| vec![0; num_classes])[record.label] += 1;
            }
        }

        Self {
            total_samples: table.len(),
            num_classes,
            class_counts,
            class_names: label_map.classes().to_vec(),
            fold_counts,
        }
    }

    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Samples per class:");

        for (idx, name) in self.class_names.iter().enumerate() {
            let count = self.class_counts[idx];
            let bar_len = if self.total_samples > 0 {
                (count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            let bar: String = "█".repeat(bar_len);
            println!("    {:3}. {:20} {:6} {}", idx, name, count, bar);
        }

        if self.fold_counts.is_empty() {
            println!("\n  Folds: not assigned");
            return;
        }

        println!("\n  Samples per fold:");
        let header: String = self
            .class_names
            .iter()
            .map(|n| format!("{:>10}", truncate(n, 10)))
            .collect();
        println!("    fold {} {:>8}", header, "total");
        for (fold, counts) in &self.fold_counts {
            let row: String = counts.iter().map(|c| format!("{:>10}", c)).collect();
            println!("    {:>4} {} {:>8}", fold, row, counts.iter().sum::<usize>());
        }
    }
}

fn truncate(name: &str, width: usize) -> String {
    name.chars().take(width).collect()
}
