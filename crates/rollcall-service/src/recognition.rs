//! The loaded recognition bundle: detector, trained model, label map and
//! acceptance threshold, built once and never mutated afterwards.

use crate::config::Config;
use rollcall_core::detector::DetectorError;
use rollcall_core::labels::LabelMapError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{extract_faces, BoundingBox, Detector, GrayFrame, HaarCascade, LabelMap, LbphRecognizer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("model: {0}")]
    Model(#[from] LabelMapError),
}

/// Failure while matching faces in a frame.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("detection: {0}")]
    Detector(#[from] DetectorError),
    #[error("prediction: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl LoadError {
    /// True when no model has been trained yet, as opposed to a broken one.
    pub fn is_missing_model(&self) -> bool {
        matches!(
            self,
            LoadError::Model(LabelMapError::ModelNotFound(_) | LabelMapError::LabelsNotFound(_))
        )
    }
}

/// An accepted face: the first region whose distance is within threshold and
/// whose label belongs to a known folder.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub folder: String,
    pub label: u32,
    pub distance: f64,
    pub region: BoundingBox,
}

pub struct Recognition {
    detector: Box<dyn Detector + Send + Sync>,
    model: LbphRecognizer,
    labels: LabelMap,
    threshold: f64,
}

impl Recognition {
    pub fn new(
        detector: Box<dyn Detector + Send + Sync>,
        model: LbphRecognizer,
        labels: LabelMap,
        threshold: f64,
    ) -> Self {
        Self {
            detector,
            model,
            labels,
            threshold,
        }
    }

    /// Load the cascade and the model/label-map pair named by `config`.
    pub fn load(config: &Config) -> Result<Self, LoadError> {
        let (model, labels) = rollcall_core::load_model(&config.model_path(), &config.labels_path())?;
        let detector = load_detector(config)?;
        tracing::info!(
            labels = labels.len(),
            threshold = config.distance_threshold,
            "recognition bundle loaded"
        );
        Ok(Self::new(Box::new(detector), model, labels, config.distance_threshold))
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify every detected face in detection order and return the first
    /// acceptable one.
    ///
    /// A region whose label has no folder is skipped, not treated as a match.
    pub fn first_match(&self, frame: &GrayFrame) -> Result<Option<FaceMatch>, MatchError> {
        let faces = extract_faces(&self.detector, frame)?;
        tracing::debug!(faces = faces.len(), "faces detected");

        for (region, face) in faces {
            let prediction = self.model.predict(&face)?;
            if !prediction.is_accepted(self.threshold) {
                tracing::debug!(
                    label = prediction.label,
                    distance = prediction.distance,
                    threshold = self.threshold,
                    "face rejected"
                );
                continue;
            }
            match self.labels.folder_of(prediction.label) {
                Some(folder) => {
                    return Ok(Some(FaceMatch {
                        folder: folder.to_string(),
                        label: prediction.label,
                        distance: prediction.distance,
                        region,
                    }))
                }
                None => tracing::warn!(label = prediction.label, "accepted label has no folder"),
            }
        }
        Ok(None)
    }
}

/// Open the Haar cascade with the configured scan parameters.
pub fn load_detector(config: &Config) -> Result<HaarCascade, DetectorError> {
    Ok(HaarCascade::load(&config.cascade_path)?
        .with_scale_factor(config.scale_factor)?
        .with_min_neighbors(config.min_neighbors))
}
