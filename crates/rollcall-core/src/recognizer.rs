//! LBPH (Local Binary Pattern Histogram) face recognizer.
//!
//! Backed by OpenCV's `face::LBPHFaceRecognizer`: each normalized face is
//! described by the per-cell histograms of its circular LBP image, and a
//! prediction is the nearest training face under the chi-square distance.
//! Models are persisted in OpenCV's own YAML format.

use crate::frame::{FrameError, GrayFrame};
use crate::types::Prediction;
use opencv::core::{Mat, Ptr, Vector};
use opencv::face::{FaceRecognizerTrait, FaceRecognizerTraitConst, LBPHFaceRecognizer};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
pub const LBPH_RADIUS: u32 = 1;
pub const LBPH_NEIGHBORS: u32 = 8;
pub const LBPH_GRID_X: u32 = 8;
pub const LBPH_GRID_Y: u32 = 8;
/// Histograms have `2^neighbors` bins per cell; more neighbours than this make them explode.
const LBPH_MAX_NEIGHBORS: u32 = 16;
/// OpenCV's own rejection is disabled; acceptance is decided by the caller's threshold.
const LBPH_NO_THRESHOLD: f64 = f64::MAX;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer has not been trained")]
    Untrained,
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("{faces} faces but {labels} labels")]
    LabelCountMismatch { faces: usize, labels: usize },
    #[error("label {0} does not fit the model's label range")]
    LabelOutOfRange(u32),
    #[error("face is {width}x{height}, too small for the LBPH grid")]
    FaceTooSmall { width: u32, height: u32 },
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("model produced no prediction")]
    NoPrediction,
    #[error("model path is not valid UTF-8: {0}")]
    InvalidPath(String),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// LBP operator and grid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: LBPH_RADIUS,
            neighbors: LBPH_NEIGHBORS,
            grid_x: LBPH_GRID_X,
            grid_y: LBPH_GRID_Y,
        }
    }
}

impl LbphParams {
    fn validate(&self) -> Result<(), RecognizerError> {
        if self.radius == 0 {
            return Err(RecognizerError::InvalidParams("radius must be at least 1".into()));
        }
        if self.neighbors == 0 || self.neighbors > LBPH_MAX_NEIGHBORS {
            return Err(RecognizerError::InvalidParams(format!(
                "neighbors must be in 1..={LBPH_MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(RecognizerError::InvalidParams("grid must be at least 1x1".into()));
        }
        Ok(())
    }

    /// Faces must leave at least one LBP code per grid cell.
    fn check_face(&self, face: &GrayFrame) -> Result<(), RecognizerError> {
        let border = 2 * self.radius;
        let usable_w = face.width.saturating_sub(border);
        let usable_h = face.height.saturating_sub(border);
        if usable_w < self.grid_x || usable_h < self.grid_y {
            return Err(RecognizerError::FaceTooSmall {
                width: face.width,
                height: face.height,
            });
        }
        Ok(())
    }
}

/// Trained LBPH model plus the label of every training face.
pub struct LbphRecognizer {
    params: LbphParams,
    inner: Ptr<LBPHFaceRecognizer>,
    labels: Vec<u32>,
}

impl std::fmt::Debug for LbphRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LbphRecognizer")
            .field("params", &self.params)
            .field("samples", &self.labels.len())
            .finish_non_exhaustive()
    }
}

impl LbphRecognizer {
    pub fn new(params: LbphParams) -> Result<Self, RecognizerError> {
        params.validate()?;
        let inner = LBPHFaceRecognizer::create(
            params.radius as i32,
            params.neighbors as i32,
            params.grid_x as i32,
            params.grid_y as i32,
            LBPH_NO_THRESHOLD,
        )?;
        Ok(Self {
            params,
            inner,
            labels: Vec::new(),
        })
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    pub fn is_trained(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    /// Distinct label ids the model can predict.
    pub fn known_labels(&self) -> BTreeSet<u32> {
        self.labels.iter().copied().collect()
    }

    /// Replace the model with histograms computed from `faces`.
    pub fn train(&mut self, faces: &[GrayFrame], labels: &[u32]) -> Result<(), RecognizerError> {
        if faces.is_empty() {
            return Err(RecognizerError::EmptyTrainingSet);
        }
        if faces.len() != labels.len() {
            return Err(RecognizerError::LabelCountMismatch {
                faces: faces.len(),
                labels: labels.len(),
            });
        }

        let mut images = Vector::<Mat>::with_capacity(faces.len());
        for face in faces {
            self.params.check_face(face)?;
            images.push(face.to_mat()?);
        }
        let targets = labels
            .iter()
            .map(|&l| i32::try_from(l).map_err(|_| RecognizerError::LabelOutOfRange(l)))
            .collect::<Result<Vector<i32>, _>>()?;

        self.inner.train(&images, &targets)?;
        self.labels = labels.to_vec();

        tracing::info!(
            samples = self.labels.len(),
            labels = self.known_labels().len(),
            "LBPH model trained"
        );
        Ok(())
    }

    /// Nearest training face to `face`: its label and chi-square distance.
    pub fn predict(&self, face: &GrayFrame) -> Result<Prediction, RecognizerError> {
        if !self.is_trained() {
            return Err(RecognizerError::Untrained);
        }
        self.params.check_face(face)?;

        let mut label = -1;
        let mut distance = 0.0;
        self.inner.predict(&face.to_mat()?, &mut label, &mut distance)?;
        let label = u32::try_from(label).map_err(|_| RecognizerError::NoPrediction)?;

        tracing::trace!(label, distance, "LBPH prediction");
        Ok(Prediction { label, distance })
    }

    /// Write the model to `path` in OpenCV's storage format (chosen by extension).
    pub fn write(&self, path: &Path) -> Result<(), RecognizerError> {
        if !self.is_trained() {
            return Err(RecognizerError::Untrained);
        }
        FaceRecognizerTraitConst::write(&self.inner, path_str(path)?)?;
        Ok(())
    }

    /// Read a model previously written with [`write`](Self::write).
    pub fn read(path: &Path) -> Result<Self, RecognizerError> {
        let mut model = Self::new(LbphParams::default())?;
        FaceRecognizerTrait::read(&mut model.inner, path_str(path)?)?;

        let params = LbphParams {
            radius: model.inner.get_radius()?.max(0) as u32,
            neighbors: model.inner.get_neighbors()?.max(0) as u32,
            grid_x: model.inner.get_grid_x()?.max(0) as u32,
            grid_y: model.inner.get_grid_y()?.max(0) as u32,
        };
        params.validate()?;
        model.params = params;

        let labels = model.inner.get_labels()?;
        model.labels = if labels.empty() {
            Vec::new()
        } else {
            labels
                .data_typed::<i32>()?
                .iter()
                .map(|&l| u32::try_from(l).map_err(|_| RecognizerError::NoPrediction))
                .collect::<Result<_, _>>()?
        };
        if model.labels.is_empty() {
            return Err(RecognizerError::Untrained);
        }
        Ok(model)
    }
}

fn path_str(path: &Path) -> Result<&str, RecognizerError> {
    path.to_str()
        .ok_or_else(|| RecognizerError::InvalidPath(path.display().to_string()))
}
