//! Dataset catalog of a node.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::CoreError;

/// Longest label that still yields valid resource names.
const MAX_LABEL_LEN: usize = 63;

/// Storage type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Csv,
    Excel,
    Parquet,
    Sql,
    Sparql,
    Omop,
}

impl DatasetKind {
    /// Tabular datasets are files and get bind-mounted into the job.
    /// The others are service URIs handed over through the environment.
    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Csv | Self::Excel | Self::Parquet)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "excel",
            Self::Parquet => "parquet",
            Self::Sql => "sql",
            Self::Sparql => "sparql",
            Self::Omop => "omop",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dataset the node can offer to algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Label algorithms refer to the dataset by.
    pub label: String,

    /// Storage type.
    #[serde(rename = "type")]
    pub kind: DatasetKind,

    /// Host path (tabular kinds) or connection URI.
    pub uri: String,
}

impl DatasetEntry {
    pub fn new(label: impl Into<String>, kind: DatasetKind, uri: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind,
            uri: uri.into(),
        }
    }
}

/// Check a dataset label against `[a-z0-9.-]`.
pub fn validate_label(label: &str) -> Result<(), CoreError> {
    if label.is_empty() {
        return Err(CoreError::invalid_identifier(label, "label is empty"));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(CoreError::invalid_identifier(
            label,
            "label is longer than 63 characters",
        ));
    }
    let valid = label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    if !valid {
        return Err(CoreError::invalid_identifier(
            label,
            "label may only contain [a-z0-9.-]",
        ));
    }
    Ok(())
}

/// The datasets configured on a node, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetCatalog {
    entries: Vec<DatasetEntry>,
}

impl DatasetCatalog {
    /// Build a catalog. Labels are not checked here; see [`DatasetCatalog::validate`].
    pub fn new(entries: Vec<DatasetEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn get(&self, label: &str) -> Option<&DatasetEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every label and reject duplicates.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            validate_label(&entry.label)?;
            if !seen.insert(entry.label.as_str()) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate dataset label '{}'",
                    entry.label
                )));
            }
        }
        Ok(())
    }

    /// Restrict the catalog to the labels a run asked for.
    ///
    /// An empty request selects the whole catalog. Requested labels are
    /// validated first, then looked up; the result keeps catalog order.
    pub fn select(&self, requested: &[String]) -> Result<DatasetCatalog, CoreError> {
        if requested.is_empty() {
            return Ok(self.clone());
        }
        for label in requested {
            validate_label(label)?;
            if self.get(label).is_none() {
                return Err(CoreError::UnknownDataset(label.clone()));
            }
        }
        let entries = self
            .entries
            .iter()
            .filter(|e| requested.contains(&e.label))
            .cloned()
            .collect();
        Ok(DatasetCatalog { entries })
    }
}
