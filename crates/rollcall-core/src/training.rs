//! Offline training: dataset enumeration, stratified hold-out split, LBPH fit,
//! evaluation on the held-out set, and persistence of the model/label pair.
//!
//! Nothing is written unless every step before persistence succeeds.

use crate::frame::GrayFrame;
use crate::labels::{self, LabelMap, LabelMapError};
use crate::metrics::{self, Evaluation};
use crate::normalize::NORMALIZED_SIZE;
use crate::recognizer::{LbphParams, LbphRecognizer, RecognizerError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_SPLIT_SEED: u64 = 42;
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("dataset directory not found: {0}")]
    DatasetNotFound(String),
    #[error("no face images found in {0} — capture images first")]
    EmptyDataset(String),
    #[error("{folder:?} has only {count} image(s); every student needs at least 2")]
    TooFewSamples { folder: String, count: usize },
    #[error("a {test}/{train} test/train split cannot cover {classes} students")]
    SplitTooSmall {
        test: usize,
        train: usize,
        classes: usize,
    },
    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidTestFraction(f64),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("saving model: {0}")]
    Persist(#[from] LabelMapError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Every usable image of the dataset, with its label id.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub labels: LabelMap,
    pub faces: Vec<GrayFrame>,
    pub targets: Vec<u32>,
}

impl Dataset {
    /// Read `dir/<folder>/*.{jpg,jpeg,png}`.
    ///
    /// Folders are enumerated in lexicographic order and get dense ids in
    /// that order. Undecodable images are skipped with a warning, and
    /// folders without any usable image get no id. Images that are not
    /// 200×200 are resized to it.
    pub fn load(dir: &Path) -> Result<Self, TrainingError> {
        if !dir.is_dir() {
            return Err(TrainingError::DatasetNotFound(dir.display().to_string()));
        }

        let mut folders: Vec<(String, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| Some((e.file_name().into_string().ok()?, e.path())))
            .collect();
        folders.sort();

        let mut dataset = Dataset {
            labels: LabelMap::default(),
            faces: Vec::new(),
            targets: Vec::new(),
        };

        for (folder, path) in folders {
            let faces = load_folder(&path)?;
            if faces.is_empty() {
                tracing::warn!(folder, "folder has no usable images; skipping");
                continue;
            }
            let id = dataset.labels.insert(folder.clone());
            tracing::debug!(folder, id, images = faces.len(), "loaded folder");
            dataset.targets.extend(std::iter::repeat(id).take(faces.len()));
            dataset.faces.extend(faces);
        }

        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Number of images per label id.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.labels.len()];
        for &t in &self.targets {
            counts[t as usize] += 1;
        }
        counts
    }
}

/// Folders of `dir` that hold at least one image file, sorted.
///
/// Images are not decoded; this is the cheap listing used by the
/// consistency check.
pub fn dataset_folders(dir: &Path) -> Result<Vec<String>, TrainingError> {
    if !dir.is_dir() {
        return Err(TrainingError::DatasetNotFound(dir.display().to_string()));
    }
    let mut folders = Vec::new();
    for entry in std::fs::read_dir(dir)?.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let has_image = std::fs::read_dir(&path)?
            .filter_map(Result::ok)
            .any(|e| is_image(&e.path()));
        if has_image {
            if let Ok(name) = entry.file_name().into_string() {
                folders.push(name);
            }
        }
    }
    folders.sort();
    Ok(folders)
}

/// Whether `path` has one of the dataset image extensions (case-insensitive).
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn load_folder(path: &Path) -> Result<Vec<GrayFrame>, TrainingError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    files.sort();

    let mut faces = Vec::with_capacity(files.len());
    for file in files {
        match GrayFrame::open(&file) {
            Ok(frame) => {
                if (frame.width, frame.height) != (NORMALIZED_SIZE, NORMALIZED_SIZE) {
                    tracing::warn!(
                        file = %file.display(),
                        width = frame.width,
                        height = frame.height,
                        "image is not normalized; resizing"
                    );
                    match frame.resize(NORMALIZED_SIZE, NORMALIZED_SIZE) {
                        Ok(face) => faces.push(face),
                        Err(e) => tracing::warn!(file = %file.display(), error = %e, "skipping image"),
                    }
                } else {
                    faces.push(frame);
                }
            }
            Err(e) => tracing::warn!(file = %file.display(), error = %e, "skipping unreadable image"),
        }
    }
    Ok(faces)
}

/// Sample indices of the two halves of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Hold out `test_fraction` of the samples, preserving class proportions.
///
/// Every class keeps at least one sample on each side. The shuffle is seeded,
/// so the same dataset always splits the same way.
pub fn stratified_split(
    targets: &[u32],
    labels: &LabelMap,
    test_fraction: f64,
    seed: u64,
) -> Result<Split, TrainingError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(TrainingError::InvalidTestFraction(test_fraction));
    }

    let classes = labels.len();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); classes];
    for (i, &t) in targets.iter().enumerate() {
        members[t as usize].push(i);
    }

    for (id, m) in members.iter().enumerate() {
        if m.len() < 2 {
            return Err(TrainingError::TooFewSamples {
                folder: labels.folder_of(id as u32).unwrap_or_default().to_string(),
                count: m.len(),
            });
        }
    }

    let n = targets.len();
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    let n_train = n - n_test;
    if n_test < classes || n_train < classes {
        return Err(TrainingError::SplitTooSmall {
            test: n_test,
            train: n_train,
            classes,
        });
    }

    // Proportional allocation; leftover test slots go to the largest remainders.
    let exact: Vec<f64> = members
        .iter()
        .map(|m| n_test as f64 * m.len() as f64 / n as f64)
        .collect();
    let mut alloc: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut order: Vec<usize> = (0..classes).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut missing = n_test.saturating_sub(alloc.iter().sum());
    for &c in order.iter().cycle().take(classes * 2) {
        if missing == 0 {
            break;
        }
        if alloc[c] < members[c].len() - 1 {
            alloc[c] += 1;
            missing -= 1;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::with_capacity(n_train),
        test: Vec::with_capacity(n_test),
    };
    for (m, &k) in members.iter_mut().zip(&alloc) {
        let k = k.clamp(1, m.len() - 1);
        m.shuffle(&mut rng);
        split.test.extend_from_slice(&m[..k]);
        split.train.extend_from_slice(&m[k..]);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();

    Ok(split)
}

/// Inputs and outputs of a training run.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub dataset_dir: PathBuf,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub test_fraction: f64,
    pub seed: u64,
    pub params: LbphParams,
}

impl TrainingConfig {
    pub fn new(dataset_dir: PathBuf, model_path: PathBuf, labels_path: PathBuf) -> Self {
        Self {
            dataset_dir,
            model_path,
            labels_path,
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
            params: LbphParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub folders: Vec<String>,
    pub samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub evaluation: Evaluation,
}

/// Load the dataset, fit on the training split, evaluate on the held-out
/// split, then persist the model and label map.
pub fn train(config: &TrainingConfig) -> Result<TrainingReport, TrainingError> {
    tracing::info!(dataset = %config.dataset_dir.display(), "loading dataset");
    let dataset = Dataset::load(&config.dataset_dir)?;
    if dataset.is_empty() {
        return Err(TrainingError::EmptyDataset(config.dataset_dir.display().to_string()));
    }
    tracing::info!(
        images = dataset.len(),
        people = dataset.labels.len(),
        "dataset loaded"
    );

    let split = stratified_split(&dataset.targets, &dataset.labels, config.test_fraction, config.seed)?;

    let pick = |idx: &[usize]| -> (Vec<GrayFrame>, Vec<u32>) {
        idx.iter()
            .map(|&i| (dataset.faces[i].clone(), dataset.targets[i]))
            .unzip()
    };
    let (train_faces, train_targets) = pick(&split.train);
    let (test_faces, test_targets) = pick(&split.test);

    let mut model = LbphRecognizer::new(config.params)?;
    model.train(&train_faces, &train_targets)?;

    let predicted = test_faces
        .iter()
        .map(|f| model.predict(f).map(|p| p.label))
        .collect::<Result<Vec<_>, _>>()?;
    let evaluation = metrics::evaluate(&test_targets, &predicted, &dataset.labels);
    tracing::info!(
        accuracy = evaluation.accuracy,
        test_samples = test_targets.len(),
        "evaluation complete"
    );

    labels::save_model(&model, &dataset.labels, &config.model_path, &config.labels_path)?;

    Ok(TrainingReport {
        folders: dataset.labels.folders().to_vec(),
        samples: dataset.len(),
        train_samples: train_targets.len(),
        test_samples: test_targets.len(),
        evaluation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_face(path: &Path, value_at: impl Fn(u32, u32) -> u8) {
        let data = (0..200u32)
            .flat_map(|y| (0..200u32).map(move |x| (y, x)))
            .map(|(y, x)| value_at(x, y))
            .collect();
        GrayFrame::new(data, 200, 200).unwrap().save(path).unwrap();
    }

    fn config(root: &Path) -> TrainingConfig {
        TrainingConfig::new(
            root.join("dataset"),
            root.join("models/face_recognizer.yml"),
            root.join("models/labels.json"),
        )
    }

    #[test]
    fn test_empty_dataset_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dataset/A001_alice")).unwrap();
        let cfg = config(dir.path());

        let result = train(&cfg);
        assert!(matches!(result, Err(TrainingError::EmptyDataset(_))));
        assert!(!cfg.model_path.exists());
        assert!(!cfg.labels_path.exists());
    }

    #[test]
    fn test_missing_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            train(&config(dir.path())),
            Err(TrainingError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn test_single_image_student_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let alice = dir.path().join("dataset/A001_alice");
        std::fs::create_dir_all(&alice).unwrap();
        write_face(&alice.join("1.png"), |x, _| x as u8);
        let cfg = config(dir.path());

        assert!(matches!(
            train(&cfg),
            Err(TrainingError::TooFewSamples { count: 1, .. })
        ));
        assert!(!cfg.model_path.exists());
    }

    #[test]
    fn test_dataset_ignores_non_images_and_sorts_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dataset");
        for folder in ["B_second", "A_first"] {
            std::fs::create_dir_all(root.join(folder)).unwrap();
            write_face(&root.join(folder).join("1.png"), |x, y| (x ^ y) as u8);
            std::fs::write(root.join(folder).join("notes.txt"), "not an image").unwrap();
            std::fs::write(root.join(folder).join("broken.jpg"), "not a jpeg").unwrap();
        }
        std::fs::write(root.join("stray.png"), "file at top level").unwrap();

        let ds = Dataset::load(&root).unwrap();
        assert_eq!(ds.labels.folders(), &["A_first".to_string(), "B_second".to_string()]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.class_counts(), vec![1, 1]);
    }

    #[test]
    fn test_dataset_folders_lists_only_folders_with_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dataset");
        std::fs::create_dir_all(root.join("B_empty")).unwrap();
        std::fs::create_dir_all(root.join("A_face")).unwrap();
        std::fs::create_dir_all(root.join("C_face")).unwrap();
        std::fs::write(root.join("A_face/1.jpg"), "bytes are not checked").unwrap();
        std::fs::write(root.join("C_face/2.PNG"), "bytes are not checked").unwrap();
        std::fs::write(root.join("B_empty/readme.txt"), "no images").unwrap();

        assert_eq!(
            dataset_folders(&root).unwrap(),
            vec!["A_face".to_string(), "C_face".to_string()]
        );
        assert!(matches!(
            dataset_folders(&dir.path().join("missing")),
            Err(TrainingError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn test_dataset_resizes_unnormalized_images() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("dataset/A001_alice");
        std::fs::create_dir_all(&folder).unwrap();
        GrayFrame::new(vec![77u8; 50 * 40], 50, 40)
            .unwrap()
            .save(&folder.join("small.png"))
            .unwrap();

        let ds = Dataset::load(&dir.path().join("dataset")).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!((ds.faces[0].width, ds.faces[0].height), (200, 200));
    }

    #[test]
    fn test_stratified_split_keeps_every_class_on_both_sides() {
        let labels = LabelMap::from_folders(["a", "b", "c"]);
        let targets: Vec<u32> = [vec![0; 10], vec![1; 5], vec![2; 2]].concat();
        let split = stratified_split(&targets, &labels, 0.2, 42).unwrap();

        assert_eq!(split.train.len() + split.test.len(), targets.len());
        for class in 0..3u32 {
            assert!(split.test.iter().any(|&i| targets[i] == class));
            assert!(split.train.iter().any(|&i| targets[i] == class));
        }
        // ceil(17 * 0.2) = 4 test samples
        assert_eq!(split.test.len(), 4);
    }

    #[test]
    fn test_stratified_split_is_deterministic() {
        let labels = LabelMap::from_folders(["a", "b"]);
        let targets: Vec<u32> = [vec![0; 20], vec![1; 20]].concat();
        let first = stratified_split(&targets, &labels, 0.2, 42).unwrap();
        let second = stratified_split(&targets, &labels, 0.2, 42).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.test.len(), 8);
        assert_eq!(first.test.iter().filter(|&&i| targets[i] == 0).count(), 4);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let labels = LabelMap::from_folders(["a"]);
        assert!(matches!(
            stratified_split(&[0, 0, 0], &labels, 1.5, 42),
            Err(TrainingError::InvalidTestFraction(_))
        ));
    }

    #[test]
    fn test_train_writes_model_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dataset");
        let alice = root.join("A001_alice");
        let bob = root.join("A002_bob");
        std::fs::create_dir_all(&alice).unwrap();
        std::fs::create_dir_all(&bob).unwrap();
        for i in 1..=5 {
            write_face(&alice.join(format!("{i}.png")), |x, _| x as u8);
            write_face(&bob.join(format!("{i}.png")), |_, y| y as u8);
        }

        let cfg = config(dir.path());
        let report = train(&cfg).unwrap();
        assert_eq!(report.folders, vec!["A001_alice".to_string(), "A002_bob".to_string()]);
        assert_eq!(report.samples, 10);
        assert_eq!(report.test_samples, 2);
        assert_eq!(report.train_samples, 8);
        assert_eq!(report.evaluation.accuracy, 1.0);

        let (model, labels) = labels::load_model(&cfg.model_path, &cfg.labels_path).unwrap();
        assert_eq!(model.sample_count(), 8);
        assert_eq!(labels.id_of("A001_alice"), Some(0));
        assert_eq!(labels.id_of("A002_bob"), Some(1));
    }
}
