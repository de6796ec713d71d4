//! rollcall-core — Face detection, normalization and recognition.
//!
//! Faces are located with an OpenCV Haar cascade, cropped to a fixed 200×200
//! canvas and classified with OpenCV's Local Binary Pattern Histogram
//! recognizer, trained offline from a directory of per-student image folders.

pub mod detector;
pub mod frame;
pub mod labels;
pub mod metrics;
pub mod normalize;
mod persist;
pub mod recognizer;
pub mod training;
pub mod types;

pub use detector::{Detector, HaarCascade};
pub use frame::GrayFrame;
pub use labels::{load_model, save_model, LabelMap};
pub use normalize::{extract_faces, extract_faces_with, extract_first_face, normalize, NORMALIZED_SIZE};
pub use recognizer::{LbphParams, LbphRecognizer};
pub use types::{BoundingBox, Prediction};
