//! Class Index Map
//!
//! Persisted `class_id -> label` table exported at training time as JSON with
//! stringified integer keys:
//!
//! ```json
//! { "0": "Pepper__bell___Bacterial_spot", "1": "Pepper__bell___healthy" }
//! ```
//!
//! A missing file yields an empty map; lookups never fail and fall back to
//! [`UNKNOWN_LABEL`].

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::utils::error::{CropCareError, Result};

/// Sentinel returned for ids with no registered label
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Read-only mapping from class id to human-readable label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassIndexMap {
    labels: BTreeMap<usize, String>,
}

impl ClassIndexMap {
    /// An empty map; every lookup resolves to [`UNKNOWN_LABEL`]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a dense map where the position of each label is its class id
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .enumerate()
                .map(|(id, label)| (id, label.into()))
                .collect(),
        }
    }

    /// Load the table from disk
    ///
    /// Returns an empty map when `path` does not exist. Any other read failure,
    /// invalid JSON, non-string labels or keys that are not non-negative
    /// integers are `Config` errors.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "No class index file at {:?}; labels will resolve to \"{}\"",
                path, UNKNOWN_LABEL
            );
            return Ok(Self::empty());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CropCareError::Config(format!(
                "Failed to read class index {}: {}",
                path.display(),
                e
            ))
        })?;

        let map = Self::parse(&content).map_err(|e| match e {
            CropCareError::Config(msg) => {
                CropCareError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        if !map.is_dense() {
            warn!(
                "Class index {:?} has gaps: {} labels, highest id {:?}",
                path,
                map.len(),
                map.max_id()
            );
        }
        info!("Loaded {} class labels from {:?}", map.len(), path);

        Ok(map)
    }

    /// Parse the JSON table
    pub fn parse(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(content).map_err(|e| {
            CropCareError::Config(format!("class index is not a label table: {}", e))
        })?;

        let mut labels = BTreeMap::new();
        for (key, label) in raw {
            let id = key.trim().parse::<usize>().map_err(|_| {
                CropCareError::Config(format!("class index key {:?} is not a class id", key))
            })?;
            if labels.insert(id, label).is_some() {
                return Err(CropCareError::Config(format!(
                    "class id {} appears more than once",
                    id
                )));
            }
        }

        Ok(Self { labels })
    }

    /// Resolve a class id, falling back to [`UNKNOWN_LABEL`]
    pub fn lookup(&self, class_id: usize) -> &str {
        self.get(class_id).unwrap_or(UNKNOWN_LABEL)
    }

    /// The stored label, if any
    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.labels.get(&class_id).map(String::as_str)
    }

    pub fn contains(&self, class_id: usize) -> bool {
        self.labels.contains_key(&class_id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Highest registered id
    pub fn max_id(&self) -> Option<usize> {
        self.labels.keys().next_back().copied()
    }

    /// Whether the ids are exactly `0..len`
    pub fn is_dense(&self) -> bool {
        self.max_id().map_or(true, |max| max + 1 == self.len())
    }

    /// Labels in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().map(|(id, label)| (*id, label.as_str()))
    }
}
