//! Crop Class-Group Registry
//!
//! Maps a crop keyword to the class ids that are plausible for it, and selects
//! the most likely class inside that subset.
//!
//! Restricted selection takes the argmax over the allowed ids only. It does
//! not compute the global argmax and reject it when it falls outside the crop;
//! the two differ whenever the overall favourite belongs to another crop.

use std::collections::{BTreeMap, BTreeSet};

use crate::inference::class_map::ClassIndexMap;
use crate::utils::error::{CropCareError, Result};

/// Compiled-in crop table, matching the class order of the trained model
pub const DEFAULT_CROP_GROUPS: &[(&str, &[usize])] = &[
    ("pepper", &[0, 1]),
    ("potato", &[2, 3, 4]),
    ("tomato", &[5, 6, 7, 8, 9, 10, 11, 12, 13, 14]),
];

/// Outcome of class selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub class_id: usize,

    /// Probability at `class_id` in the full scored vector
    pub confidence: f32,

    /// Crop group the search was limited to, if any
    pub restricted_to: Option<String>,
}

/// Index of the largest probability among `ids`, lowest index on ties
///
/// NaN entries and ids past the end of the vector are skipped.
pub fn argmax_over<I>(probabilities: &[f32], ids: I) -> Option<(usize, f32)>
where
    I: IntoIterator<Item = usize>,
{
    let mut best: Option<(usize, f32)> = None;
    for id in ids {
        let Some(&p) = probabilities.get(id) else {
            continue;
        };
        if p.is_nan() {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_id, best_p)) => p > best_p || (p == best_p && id < best_id),
        };
        if better {
            best = Some((id, p));
        }
    }
    best
}

/// Static registry of crop keyword -> allowed class ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropClassGroups {
    groups: BTreeMap<String, BTreeSet<usize>>,
}

impl Default for CropClassGroups {
    fn default() -> Self {
        Self::new(
            DEFAULT_CROP_GROUPS
                .iter()
                .map(|(crop, ids)| (*crop, ids.iter().copied())),
        )
    }
}

impl CropClassGroups {
    /// Build a registry; keywords are stored lowercased
    pub fn new<I, S, G>(groups: I) -> Self
    where
        I: IntoIterator<Item = (S, G)>,
        S: AsRef<str>,
        G: IntoIterator<Item = usize>,
    {
        let mut table: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for (crop, ids) in groups {
            table
                .entry(normalize_crop(crop.as_ref()))
                .or_default()
                .extend(ids);
        }
        Self { groups: table }
    }

    /// Allowed ids for a crop keyword, matched case-insensitively
    pub fn group(&self, crop_type: &str) -> Option<&BTreeSet<usize>> {
        self.groups.get(&normalize_crop(crop_type))
    }

    /// Registered crop keywords in sorted order
    pub fn crops(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<usize>)> {
        self.groups.iter().map(|(crop, ids)| (crop.as_str(), ids))
    }

    /// Pick the class for `probabilities`, limited to the crop's ids if known
    ///
    /// An absent, blank or unregistered crop type falls back to the argmax over
    /// the full vector, as does a group none of whose ids are in range.
    /// Returns `None` only when no finite probability exists at all.
    pub fn restrict(&self, crop_type: Option<&str>, probabilities: &[f32]) -> Option<Selection> {
        let matched = crop_type
            .map(normalize_crop)
            .filter(|crop| !crop.is_empty())
            .and_then(|crop| self.groups.get_key_value(&crop));

        if let Some((crop, ids)) = matched {
            if let Some((class_id, confidence)) = argmax_over(probabilities, ids.iter().copied()) {
                return Some(Selection {
                    class_id,
                    confidence,
                    restricted_to: Some(crop.clone()),
                });
            }
        }

        argmax_over(probabilities, 0..probabilities.len()).map(|(class_id, confidence)| Selection {
            class_id,
            confidence,
            restricted_to: None,
        })
    }

    /// Check every referenced id against the model and the label table
    ///
    /// Ids must be below `num_classes`. When `class_map` is non-empty every id
    /// must also have a label; an empty map is the documented "labels absent"
    /// mode and is not checked.
    pub fn validate(&self, class_map: &ClassIndexMap, num_classes: usize) -> Result<()> {
        for (crop, ids) in &self.groups {
            if ids.is_empty() {
                return Err(CropCareError::Config(format!(
                    "crop group '{}' has no class ids",
                    crop
                )));
            }
            for &id in ids {
                if id >= num_classes {
                    return Err(CropCareError::Config(format!(
                        "crop group '{}' references class {} but the model has {} classes",
                        crop, id, num_classes
                    )));
                }
                if !class_map.is_empty() && !class_map.contains(id) {
                    return Err(CropCareError::Config(format!(
                        "crop group '{}' references class {} which has no label in the class index",
                        crop, id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn normalize_crop(crop_type: &str) -> String {
    crop_type.trim().to_lowercase()
}
