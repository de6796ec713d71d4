//! Folder key ↔ label id mapping, and persistence of the model/label-map pair.
//!
//! Label ids are dense integers assigned in dataset enumeration order at
//! training time. The label map records the SHA-256 of the model file it was
//! written with, so a model and a label map from different training runs are
//! rejected at load instead of silently mismatching.

use crate::persist;
use crate::recognizer::{LbphRecognizer, RecognizerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const LABEL_FILE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum LabelMapError {
    #[error("model file not found: {0} — run `rollcall train` first")]
    ModelNotFound(String),
    #[error("label map not found: {0} — run `rollcall train` first")]
    LabelsNotFound(String),
    #[error("label ids are not dense: {folder:?} has id {found}, expected {expected}")]
    NotDense {
        folder: String,
        found: u32,
        expected: u32,
    },
    #[error("label map belongs to a different model (expected digest {expected}, model is {actual})")]
    DigestMismatch { expected: String, actual: String },
    #[error("model predicts label {0} which the label map does not contain")]
    UnknownLabel(u32),
    #[error("unsupported label map version {0}")]
    UnsupportedVersion(u32),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("label map serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bidirectional mapping between folder keys and label ids.
///
/// Id `i` is the `i`-th folder; ids are always `0..len`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    folders: Vec<String>,
}

/// On-disk representation: folder -> id, plus the digest of the paired model.
#[derive(Debug, Serialize, Deserialize)]
struct LabelFile {
    version: u32,
    model_sha256: String,
    labels: BTreeMap<String, u32>,
}

impl LabelMap {
    /// Assign ids in iteration order. Repeated folders keep their first id.
    pub fn from_folders<I, S>(folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::default();
        for folder in folders {
            map.insert(folder.into());
        }
        map
    }

    /// Id for `folder`, assigning the next free id if it is new.
    pub fn insert(&mut self, folder: String) -> u32 {
        if let Some(id) = self.id_of(&folder) {
            return id;
        }
        self.folders.push(folder);
        (self.folders.len() - 1) as u32
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn id_of(&self, folder: &str) -> Option<u32> {
        self.folders.iter().position(|f| f == folder).map(|i| i as u32)
    }

    pub fn folder_of(&self, id: u32) -> Option<&str> {
        self.folders.get(id as usize).map(String::as_str)
    }

    /// Folder keys in id order.
    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.folders
            .iter()
            .enumerate()
            .map(|(i, f)| (i as u32, f.as_str()))
    }

    fn to_json(&self, model_sha256: &str) -> Result<Vec<u8>, serde_json::Error> {
        let file = LabelFile {
            version: LABEL_FILE_VERSION,
            model_sha256: model_sha256.to_string(),
            labels: self.iter().map(|(id, f)| (f.to_string(), id)).collect(),
        };
        serde_json::to_vec_pretty(&file)
    }

    /// Parse a label file, returning the map and the model digest it records.
    fn from_json(bytes: &[u8]) -> Result<(Self, String), LabelMapError> {
        let file: LabelFile = serde_json::from_slice(bytes)?;
        if file.version != LABEL_FILE_VERSION {
            return Err(LabelMapError::UnsupportedVersion(file.version));
        }

        let mut by_id: Vec<(u32, String)> = file.labels.into_iter().map(|(f, id)| (id, f)).collect();
        by_id.sort();
        for (expected, (found, folder)) in by_id.iter().enumerate() {
            if *found != expected as u32 {
                return Err(LabelMapError::NotDense {
                    folder: folder.clone(),
                    found: *found,
                    expected: expected as u32,
                });
            }
        }

        let map = Self {
            folders: by_id.into_iter().map(|(_, f)| f).collect(),
        };
        Ok((map, file.model_sha256))
    }
}

/// Write the trained model and its label map side by side.
///
/// Both files are written atomically; the model goes first so a label map on
/// disk always has its model.
pub fn save_model(
    model: &LbphRecognizer,
    labels: &LabelMap,
    model_path: &Path,
    labels_path: &Path,
) -> Result<(), LabelMapError> {
    let model_bytes = persist::replace_with(model_path, |tmp| -> Result<(), LabelMapError> {
        Ok(model.write(tmp)?)
    })?;
    let digest = persist::sha256_hex(&model_bytes);
    persist::write_atomic(labels_path, &labels.to_json(&digest)?)?;

    tracing::info!(
        model = %model_path.display(),
        labels = %labels_path.display(),
        samples = model.sample_count(),
        folders = labels.len(),
        "saved model and label map"
    );
    Ok(())
}

/// Load a model/label-map pair, checking they belong together.
pub fn load_model(model_path: &Path, labels_path: &Path) -> Result<(LbphRecognizer, LabelMap), LabelMapError> {
    if !model_path.exists() {
        return Err(LabelMapError::ModelNotFound(model_path.display().to_string()));
    }
    if !labels_path.exists() {
        return Err(LabelMapError::LabelsNotFound(labels_path.display().to_string()));
    }

    let (labels, expected) = LabelMap::from_json(&std::fs::read(labels_path)?)?;
    let actual = persist::sha256_hex(&std::fs::read(model_path)?);
    if actual != expected {
        return Err(LabelMapError::DigestMismatch { expected, actual });
    }

    let model = LbphRecognizer::read(model_path)?;
    if let Some(missing) = model
        .known_labels()
        .into_iter()
        .find(|&id| labels.folder_of(id).is_none())
    {
        return Err(LabelMapError::UnknownLabel(missing));
    }

    tracing::info!(
        model = %model_path.display(),
        samples = model.sample_count(),
        folders = labels.len(),
        "loaded model and label map"
    );
    Ok((model, labels))
}
