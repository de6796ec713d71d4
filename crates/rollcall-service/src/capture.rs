//! Dataset capture from still images: keep the first face of each image,
//! normalized, as the next numbered JPEG in the student's folder.

use crate::config::Config;
use crate::recognition;
use rollcall_core::detector::DetectorError;
use rollcall_core::training::is_image;
use rollcall_core::{extract_first_face, Detector, GrayFrame};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("invalid folder name {0:?}")]
    InvalidFolderName(String),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CaptureServiceError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("{0}")]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable,
    NoFace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub folder: String,
    pub saved: Vec<PathBuf>,
    pub skipped: Vec<SkippedImage>,
}

/// Capture faces into `folder` under the configured dataset directory.
///
/// Only the cascade is loaded. A missing or damaged model does not block
/// building the dataset it will be trained from.
pub fn capture_dataset(
    config: &Config,
    folder: &str,
    images: &[PathBuf],
    limit: Option<usize>,
) -> Result<CaptureReport, CaptureServiceError> {
    if !is_valid_folder_name(folder) {
        return Err(CaptureError::InvalidFolderName(folder.to_string()).into());
    }
    let detector = recognition::load_detector(config)?;
    Ok(capture_faces(&detector, &config.student_dir(folder), images, limit)?)
}

/// Save the first face of each image in `images` into `student_dir`.
///
/// Files are named `<n>.jpg`, continuing after the highest number already in
/// the folder. Stops once `limit` faces have been saved.
pub fn capture_faces<D: Detector + ?Sized>(
    detector: &D,
    student_dir: &Path,
    images: &[PathBuf],
    limit: Option<usize>,
) -> Result<CaptureReport, CaptureError> {
    std::fs::create_dir_all(student_dir)?;
    let mut next = next_index(student_dir)?;
    let mut report = CaptureReport {
        folder: student_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..Default::default()
    };

    for image in images {
        if limit.is_some_and(|l| report.saved.len() >= l) {
            break;
        }

        let frame = match GrayFrame::open(image) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(image = %image.display(), error = %e, "skipping unreadable image");
                report.skipped.push(SkippedImage {
                    path: image.clone(),
                    reason: SkipReason::Unreadable,
                });
                continue;
            }
        };

        let Some(face) = extract_first_face(detector, &frame)? else {
            tracing::info!(image = %image.display(), "no face found");
            report.skipped.push(SkippedImage {
                path: image.clone(),
                reason: SkipReason::NoFace,
            });
            continue;
        };

        let target = student_dir.join(format!("{next}.jpg"));
        face.save(&target).map_err(|e| CaptureError::Write {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(image = %image.display(), saved = %target.display(), "captured face");
        report.saved.push(target);
        next += 1;
    }

    tracing::info!(
        folder = %report.folder,
        saved = report.saved.len(),
        skipped = report.skipped.len(),
        "capture complete"
    );
    Ok(report)
}

/// A single path component: no separators, not `.` or `..`.
pub(crate) fn is_valid_folder_name(folder: &str) -> bool {
    !folder.is_empty()
        && folder != "."
        && folder != ".."
        && !folder.contains(['/', '\\'])
        && Path::new(folder).components().count() == 1
}

/// One past the largest numeric file stem among the folder's images.
fn next_index(dir: &Path) -> Result<u64, CaptureError> {
    let highest = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| is_image(p))
        .filter_map(|p| p.file_stem()?.to_str()?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::BoundingBox;

    /// Reports a face covering the left half of any frame whose top-left pixel is bright.
    struct BrightCornerDetector;

    impl Detector for BrightCornerDetector {
        fn detect(&self, frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            if frame.pixel(0, 0) > 128 {
                Ok(vec![BoundingBox::new(0, 0, frame.width / 2, frame.height)])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn write_image(path: &Path, value: u8) {
        GrayFrame::new(vec![value; 64 * 48], 64, 48)
            .unwrap()
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_capture_saves_normalized_faces_and_counts_skips() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = dir.path().join("inputs");
        std::fs::create_dir_all(&inputs).unwrap();
        write_image(&inputs.join("face1.png"), 200);
        write_image(&inputs.join("dark.png"), 10);
        write_image(&inputs.join("face2.png"), 220);
        std::fs::write(inputs.join("junk.png"), "not a png").unwrap();

        let images: Vec<PathBuf> = ["face1.png", "dark.png", "junk.png", "face2.png"]
            .iter()
            .map(|n| inputs.join(n))
            .collect();
        let student = dir.path().join("dataset/A001_alice");
        let report = capture_faces(&BrightCornerDetector, &student, &images, None).unwrap();

        assert_eq!(report.folder, "A001_alice");
        assert_eq!(report.saved, vec![student.join("1.jpg"), student.join("2.jpg")]);
        assert_eq!(
            report.skipped.iter().map(|s| s.reason.clone()).collect::<Vec<_>>(),
            vec![SkipReason::NoFace, SkipReason::Unreadable]
        );

        let saved = GrayFrame::open(&student.join("1.jpg")).unwrap();
        assert_eq!((saved.width, saved.height), (200, 200));
    }

    #[test]
    fn test_capture_numbers_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let student = dir.path().join("A002_bob");
        std::fs::create_dir_all(&student).unwrap();
        write_image(&student.join("1.jpg"), 200);
        write_image(&student.join("7.jpg"), 200);
        std::fs::write(student.join("99.txt"), "ignored").unwrap();

        let input = dir.path().join("in.png");
        write_image(&input, 250);
        let report = capture_faces(&BrightCornerDetector, &student, &[input], None).unwrap();
        assert_eq!(report.saved, vec![student.join("8.jpg")]);
    }

    #[test]
    fn test_capture_stops_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        write_image(&input, 250);
        let images = vec![input.clone(), input.clone(), input];

        let student = dir.path().join("A003_carol");
        let report = capture_faces(&BrightCornerDetector, &student, &images, Some(2)).unwrap();
        assert_eq!(report.saved.len(), 2);
        assert!(!student.join("3.jpg").exists());
    }

    #[test]
    fn test_folder_names() {
        assert!(is_valid_folder_name("ENG2023001_samuel"));
        assert!(!is_valid_folder_name(""));
        assert!(!is_valid_folder_name(".."));
        assert!(!is_valid_folder_name("a/b"));
        assert!(!is_valid_folder_name("a\\b"));
    }
}
