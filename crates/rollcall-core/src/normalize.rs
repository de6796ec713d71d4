//! Face normalization: crop a detected region and resize it to the canonical
//! 200×200 canvas used for both training and recognition.

use crate::detector::{Detector, DetectorError};
use crate::frame::{FrameError, GrayFrame};
use crate::types::BoundingBox;

/// Side length of every normalized face.
pub const NORMALIZED_SIZE: u32 = 200;

/// Crop `region` out of `frame` and resize it to 200×200.
///
/// No aspect-ratio correction is applied. The transform is deterministic, and
/// a 200×200 input covering the whole frame comes back unchanged.
pub fn normalize(frame: &GrayFrame, region: &BoundingBox) -> Result<GrayFrame, FrameError> {
    frame.crop(region)?.resize(NORMALIZED_SIZE, NORMALIZED_SIZE)
}

/// Detect every face in `frame` and normalize each one, in detection order.
pub fn extract_faces<D: Detector + ?Sized>(
    detector: &D,
    frame: &GrayFrame,
) -> Result<Vec<(BoundingBox, GrayFrame)>, DetectorError> {
    extract_faces_with(detector, frame, normalize)
}

/// [`extract_faces`] with a caller-supplied normalization step.
///
/// `normalize_face` runs once per detected region and never when nothing is
/// detected. Regions it fails on are skipped with a warning.
pub fn extract_faces_with<D, N>(
    detector: &D,
    frame: &GrayFrame,
    mut normalize_face: N,
) -> Result<Vec<(BoundingBox, GrayFrame)>, DetectorError>
where
    D: Detector + ?Sized,
    N: FnMut(&GrayFrame, &BoundingBox) -> Result<GrayFrame, FrameError>,
{
    let faces = detector
        .detect(frame)?
        .into_iter()
        .filter_map(|region| match normalize_face(frame, &region) {
            Ok(face) => Some((region, face)),
            Err(e) => {
                tracing::warn!(error = %e, ?region, "skipping face region");
                None
            }
        })
        .collect();
    Ok(faces)
}

/// Detect the first face in `frame` and return it normalized.
pub fn extract_first_face<D: Detector + ?Sized>(
    detector: &D,
    frame: &GrayFrame,
) -> Result<Option<GrayFrame>, DetectorError> {
    Ok(detector
        .detect(frame)?
        .iter()
        .find_map(|region| normalize(frame, region).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    
    struct FixedDetector(Vec<BoundingBox>);

    impl Detector for FixedDetector {
        fn detect(&self, _frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn noise(w: u32, h: u32) -> GrayFrame {
        let data = (0..w * h).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        GrayFrame::new(data, w, h).unwrap()
    }

    #[test]
    fn test_normalize_output_size() {
        let frame = noise(640, 480);
        for region in [
            BoundingBox::new(0, 0, 24, 24),
            BoundingBox::new(100, 50, 300, 120),
            BoundingBox::new(10, 10, 417, 333),
        ] {
            let face = normalize(&frame, &region).unwrap();
            assert_eq!((face.width, face.height), (NORMALIZED_SIZE, NORMALIZED_SIZE));
            assert_eq!(face.data.len(), (NORMALIZED_SIZE * NORMALIZED_SIZE) as usize);
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let face = noise(NORMALIZED_SIZE, NORMALIZED_SIZE);
        let full = BoundingBox::new(0, 0, NORMALIZED_SIZE, NORMALIZED_SIZE);
        let once = normalize(&face, &full).unwrap();
        assert_eq!(once, face);
        assert_eq!(normalize(&once, &full).unwrap(), once);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let frame = noise(320, 240);
        let region = BoundingBox::new(40, 30, 150, 170);
        assert_eq!(normalize(&frame, &region).unwrap(), normalize(&frame, &region).unwrap());
    }

    #[test]
    fn test_no_faces_means_nothing_normalized() {
        let detector = FixedDetector(Vec::new());
        let mut normalized = 0;
        let faces = extract_faces_with(&detector, &noise(64, 64), |frame, region| {
            normalized += 1;
            normalize(frame, region)
        })
        .unwrap();
        assert!(faces.is_empty());
        assert_eq!(normalized, 0);
        assert!(extract_first_face(&detector, &noise(64, 64)).unwrap().is_none());
    }

    #[test]
    fn test_each_region_normalized_once() {
        let detector = FixedDetector(vec![
            BoundingBox::new(0, 0, 30, 30),
            BoundingBox::new(40, 40, 30, 30),
        ]);
        let mut seen = Vec::new();
        let faces = extract_faces_with(&detector, &noise(100, 100), |frame, region| {
            seen.push(*region);
            normalize(frame, region)
        })
        .unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(seen, vec![BoundingBox::new(0, 0, 30, 30), BoundingBox::new(40, 40, 30, 30)]);
    }

    #[test]
    fn test_extract_faces_keeps_detection_order() {
        let regions = vec![BoundingBox::new(50, 0, 30, 30), BoundingBox::new(0, 0, 30, 30)];
        let detector = FixedDetector(regions.clone());
        let faces = extract_faces(&detector, &noise(100, 100)).unwrap();
        let order: Vec<_> = faces.iter().map(|(r, _)| *r).collect();
        assert_eq!(order, regions);
    }

    #[test]
    fn test_extract_faces_skips_regions_outside_frame() {
        let detector = FixedDetector(vec![
            BoundingBox::new(500, 500, 30, 30),
            BoundingBox::new(0, 0, 30, 30),
        ]);
        let faces = extract_faces(&detector, &noise(100, 100)).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].0, BoundingBox::new(0, 0, 30, 30));
        assert!(extract_first_face(&detector, &noise(100, 100)).unwrap().is_some());
    }
}
