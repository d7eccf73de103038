//! Label extraction and the label code map.
//!
//! A frame's class is the last underscore-separated token of its file name,
//! without extension: `clip_00012_closeup.jpg` is a `closeup`. Codes are
//! assigned in sorted order of the distinct labels so the same label set
//! always produces the same mapping.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::utils::error::{Result, ShotError};

/// Extract the class label encoded in an image file name.
///
/// File names without an underscore, or with nothing after the last one,
/// are rejected with [`ShotError::MalformedFileName`].
pub fn extract_label(path: &Path) -> Result<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ShotError::MalformedFileName(path.to_path_buf()))?;

    let (_, suffix) = file_name
        .rsplit_once('_')
        .ok_or_else(|| ShotError::MalformedFileName(path.to_path_buf()))?;

    // Strip the extension only
    let label = match suffix.rfind('.') {
        Some(dot) => &suffix[..dot],
        None => suffix,
    };

    if label.is_empty() {
        return Err(ShotError::MalformedFileName(path.to_path_buf()));
    }

    Ok(label.to_string())
}

/// Bijection between integer class codes and string labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelMap {
    /// Fit the map over every observed label
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = labels.into_iter().map(|l| l.as_ref().to_string()).collect();
        Self::from_classes(distinct.into_iter().collect())
    }

    fn from_classes(classes: Vec<String>) -> Self {
        let index = classes
            .iter()
            .enumerate()
            .map(|(code, label)| (label.clone(), code))
            .collect();
        Self { classes, index }
    }

    /// Code of a label
    pub fn encode(&self, label: &str) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| ShotError::Dataset(format!("Unknown label '{}'", label)))
    }

    /// Label of a code
    pub fn decode(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }

    /// Labels ordered by code
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Persist as a JSON object `{"0": "closeup", ...}`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let labels: BTreeMap<usize, &str> = self
            .classes
            .iter()
            .enumerate()
            .map(|(code, label)| (code, label.as_str()))
            .collect();
        let json = serde_json::to_string_pretty(&labels)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a map written by [`LabelMap::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ShotError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let labels: BTreeMap<usize, String> = serde_json::from_str(&json)?;

        // Codes must be exactly 0..n
        for (expected, code) in labels.keys().enumerate() {
            if *code != expected {
                return Err(ShotError::Serialization(format!(
                    "Label map {:?} is missing code {}",
                    path, expected
                )));
            }
        }

        let classes: Vec<String> = labels.into_values().collect();
        let distinct: BTreeSet<&String> = classes.iter().collect();
        if distinct.len() != classes.len() {
            return Err(ShotError::Serialization(format!(
                "Label map {:?} maps two codes to the same label",
                path
            )));
        }

        Ok(Self::from_classes(classes))
    }
}
