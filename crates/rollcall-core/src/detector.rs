//! Haar cascade face detector.
//!
//! Wraps OpenCV's `CascadeClassifier`, loaded from a boosted Haar cascade in
//! the OpenCV XML format (e.g. `haarcascade_frontalface_default.xml`), and
//! runs `detectMultiScale` with a configurable pyramid step and neighbour
//! count.

use crate::frame::{FrameError, GrayFrame};
use crate::types::BoundingBox;
use opencv::core::{Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

// --- Named constants (no magic numbers) ---
pub const DEFAULT_SCALE_FACTOR: f64 = 1.1;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0} — install OpenCV's haarcascade_frontalface_default.xml")]
    CascadeNotFound(String),
    #[error("cascade could not be loaded: {0}")]
    Malformed(String),
    #[error("invalid detector parameter: {0}")]
    InvalidParameter(String),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Strategy for locating faces in a grayscale frame.
///
/// An image without a detectable face yields an empty list; that is an
/// expected outcome, not a failure.
pub trait Detector {
    fn detect(&self, frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&self, frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(frame)
    }
}

/// OpenCV Haar cascade with `detectMultiScale` parameters.
///
/// `detectMultiScale` mutates classifier state, so the classifier sits
/// behind a mutex and the detector can be shared.
pub struct HaarCascade {
    classifier: Mutex<CascadeClassifier>,
    scale_factor: f64,
    min_neighbors: u32,
}

impl std::fmt::Debug for HaarCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaarCascade")
            .field("scale_factor", &self.scale_factor)
            .field("min_neighbors", &self.min_neighbors)
            .finish_non_exhaustive()
    }
}

impl HaarCascade {
    /// Load a cascade XML file.
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::CascadeNotFound(path.display().to_string()));
        }
        let name = path
            .to_str()
            .ok_or_else(|| DetectorError::Malformed(format!("non UTF-8 path {}", path.display())))?;

        let classifier = CascadeClassifier::new(name)?;
        if classifier.empty()? {
            return Err(DetectorError::Malformed(path.display().to_string()));
        }

        tracing::info!(cascade = %path.display(), "Haar cascade loaded");
        Ok(Self {
            classifier: Mutex::new(classifier),
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
        })
    }

    /// Pyramid step between scan scales. Must be greater than 1.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Result<Self, DetectorError> {
        if !(scale_factor.is_finite() && scale_factor > 1.0) {
            return Err(DetectorError::InvalidParameter(format!(
                "scale factor must be > 1, got {scale_factor}"
            )));
        }
        self.scale_factor = scale_factor;
        Ok(self)
    }

    /// Raw hits a region needs beyond the first to be reported (0 disables grouping).
    pub fn with_min_neighbors(mut self, min_neighbors: u32) -> Self {
        self.min_neighbors = min_neighbors;
        self
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn min_neighbors(&self) -> u32 {
        self.min_neighbors
    }
}

impl Detector for HaarCascade {
    fn detect(&self, frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let image = frame.to_mat()?;
        let mut rects = Vector::<Rect>::new();
        let mut hits = Vector::<i32>::new();

        let mut classifier = self.classifier.lock().unwrap_or_else(PoisonError::into_inner);
        classifier.detect_multi_scale2(
            &image,
            &mut rects,
            &mut hits,
            self.scale_factor,
            self.min_neighbors as i32,
            0,
            Size::default(),
            Size::default(),
        )?;
        drop(classifier);

        let faces: Vec<BoundingBox> = rects
            .iter()
            .enumerate()
            .map(|(i, r)| BoundingBox {
                x: r.x.max(0) as u32,
                y: r.y.max(0) as u32,
                width: r.width.max(0) as u32,
                height: r.height.max(0) as u32,
                neighbors: hits.get(i).map(|n| n.max(0) as u32).unwrap_or(0),
            })
            .collect();

        tracing::debug!(
            width = frame.width,
            height = frame.height,
            faces = faces.len(),
            "cascade scan complete"
        );
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two stages laid out like `haarcascade_frontalface_default.xml`.
    ///
    /// Stage 0 uses a three-rectangle feature over vertical thirds and passes
    /// windows whose left two thirds are brighter than the right third.
    /// Stage 1 uses the stock file's band feature (weights `-1.` and `3.`) and
    /// passes windows whose middle horizontal band is brighter than the rows
    /// above and below it.
    const TWO_STAGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>2</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000149011612e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 1 1.0000000149011612e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 8 24 1.</_>
        <_>
          8 0 8 24 1.</_>
        <_>
          16 0 8 24 -2.</_></rects></_>
    <_>
      <rects>
        <_>
          0 0 24 24 -1.</_>
        <_>
          0 8 24 8 3.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn write_cascade(dir: &Path, xml: &str) -> std::path::PathBuf {
        let path = dir.join("haarcascade_frontalface_default.xml");
        std::fs::write(&path, xml).unwrap();
        path
    }

    fn frame(w: u32, h: u32, value_at: impl Fn(u32, u32) -> u8) -> GrayFrame {
        let data = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| value_at(x, y))
            .collect();
        GrayFrame::new(data, w, h).unwrap()
    }

    /// Bright left columns plus a bright horizontal band: passes both stages.
    fn face_like(x: u32, y: u32) -> u8 {
        40 + if x < 15 { 60 } else { 0 } + if (10..19).contains(&y) { 100 } else { 0 }
    }

    /// Bright left columns only: passes stage 0, rejected by stage 1.
    fn edge_only(x: u32, _y: u32) -> u8 {
        40 + if x < 15 { 60 } else { 0 }
    }

    /// Bright right columns plus the band: rejected by stage 0.
    fn mirrored(x: u32, y: u32) -> u8 {
        40 + if x >= 15 { 60 } else { 0 } + if (10..19).contains(&y) { 100 } else { 0 }
    }

    fn raw_hits(cascade: HaarCascade, frame: &GrayFrame) -> Vec<BoundingBox> {
        cascade.with_min_neighbors(0).detect(frame).unwrap()
    }

    #[test]
    fn test_load_real_layout_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let cascade = HaarCascade::load(&write_cascade(dir.path(), TWO_STAGE_CASCADE)).unwrap();
        assert_eq!(cascade.scale_factor(), DEFAULT_SCALE_FACTOR);
        assert_eq!(cascade.min_neighbors(), DEFAULT_MIN_NEIGHBORS);
    }

    #[test]
    fn test_window_passing_both_stages_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        let hits = raw_hits(HaarCascade::load(&path).unwrap(), &frame(30, 30, face_like));
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_window_rejected_by_second_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        let hits = raw_hits(HaarCascade::load(&path).unwrap(), &frame(30, 30, edge_only));
        assert!(hits.is_empty(), "stage 1 should reject: {hits:?}");
    }

    #[test]
    fn test_window_rejected_by_first_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        let hits = raw_hits(HaarCascade::load(&path).unwrap(), &frame(30, 30, mirrored));
        assert!(hits.is_empty(), "stage 0 should reject: {hits:?}");
    }

    #[test]
    fn test_uniform_frame_has_no_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        let hits = raw_hits(HaarCascade::load(&path).unwrap(), &frame(64, 64, |_, _| 128));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_frame_smaller_than_window_has_no_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        let hits = raw_hits(HaarCascade::load(&path).unwrap(), &frame(20, 20, face_like));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_default_grouping_merges_raw_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        let cascade = HaarCascade::load(&path).unwrap();
        let faces = cascade.detect(&frame(30, 30, face_like)).unwrap();

        assert_eq!(faces.len(), 1, "{faces:?}");
        assert!(faces[0].neighbors > DEFAULT_MIN_NEIGHBORS);
        assert!(faces[0].x + faces[0].width <= 30);
        assert!(faces[0].y + faces[0].height <= 30);
    }

    #[test]
    fn test_invalid_scale_factor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(dir.path(), TWO_STAGE_CASCADE);
        for bad in [1.0, 0.5, f64::NAN] {
            assert!(matches!(
                HaarCascade::load(&path).unwrap().with_scale_factor(bad),
                Err(DetectorError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HaarCascade::load(&dir.path().join("nope.xml")),
            Err(DetectorError::CascadeNotFound(_))
        ));
    }

    #[test]
    fn test_load_rejects_non_cascade_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cascade(
            dir.path(),
            "<?xml version=\"1.0\"?>\n<opencv_storage>\n<answer>42</answer>\n</opencv_storage>\n",
        );
        assert!(HaarCascade::load(&path).is_err());
    }
}
