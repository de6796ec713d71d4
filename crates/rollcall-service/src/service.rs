use crate::capture::{self, is_valid_folder_name, CaptureReport, CaptureServiceError};
use crate::config::Config;
use crate::recognition::{LoadError, MatchError, Recognition};
use rollcall_core::frame::FrameError;
use rollcall_core::training::{self, TrainingError};
use rollcall_core::GrayFrame;
use rollcall_store::{
    AddStudentOutcome, AttendanceStore, LogOutcome, ReportFilter, ReportRow, StoreError, Student,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Load(#[from] LoadError),
    #[error("dataset: {0}")]
    Dataset(#[from] TrainingError),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("model not trained — run `rollcall train` first")]
    ModelNotLoaded,
    #[error("no image data")]
    EmptyPayload,
    #[error("invalid image: {0}")]
    InvalidImage(FrameError),
    #[error("recognition failed: {0}")]
    Recognition(#[from] MatchError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("invalid folder name {0:?}")]
    InvalidFolderName(String),
    #[error("dataset folder not found: {0} — capture images first")]
    DatasetFolderMissing(String),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Recognized {
        folder_name: String,
        /// Database row for the folder, if the student is registered.
        student: Option<Student>,
        distance: f64,
        logged: bool,
        info: LogOutcome,
    },
    NotRecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// Added; the model must be retrained before scans can recognize them.
    Registered { student: Student },
    AlreadyRegistered,
}

/// Disagreements between dataset folders, the label map and student rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Dataset folders with images that the trained model does not know.
    pub untrained_folders: Vec<String>,
    /// Label-map folders with no student row; scans of them log nothing.
    pub unregistered_labels: Vec<String>,
    /// Registered students the model cannot recognize.
    pub unlabeled_students: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.untrained_folders.is_empty()
            && self.unregistered_labels.is_empty()
            && self.unlabeled_students.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub model_loaded: bool,
    pub labels: usize,
    pub distance_threshold: f64,
    pub db_path: PathBuf,
    pub students: u64,
    pub attendance_records: u64,
}

/// Attendance handlers over one store and an optional recognition bundle.
pub struct AttendanceService {
    config: Config,
    store: AttendanceStore,
    recognition: Option<Recognition>,
}

impl AttendanceService {
    pub fn new(config: Config, store: AttendanceStore, recognition: Option<Recognition>) -> Self {
        Self {
            config,
            store,
            recognition,
        }
    }

    /// Open the store and load the recognition bundle if a model exists.
    ///
    /// A missing model leaves the service running with scans disabled; a model
    /// that is present but unusable is an error.
    pub fn open(config: Config) -> Result<Self, ServiceError> {
        let store = AttendanceStore::open(&config.db_path)?;
        let recognition = match Recognition::load(&config) {
            Ok(r) => Some(r),
            Err(e) if e.is_missing_model() => {
                tracing::warn!(error = %e, "model not found; train before scanning");
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(config, store, recognition))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &AttendanceStore {
        &self.store
    }

    /// Recognize the first known face in an encoded image and log attendance.
    pub fn scan(&self, payload: &[u8], course: Option<&str>) -> Result<ScanOutcome, ScanError> {
        let recognition = self.recognition.as_ref().ok_or(ScanError::ModelNotLoaded)?;
        if payload.is_empty() {
            return Err(ScanError::EmptyPayload);
        }
        let frame = GrayFrame::decode(payload).map_err(|e| match e {
            FrameError::EmptyPayload => ScanError::EmptyPayload,
            other => ScanError::InvalidImage(other),
        })?;

        let Some(found) = recognition.first_match(&frame)? else {
            tracing::info!(width = frame.width, height = frame.height, "no known face recognized");
            return Ok(ScanOutcome::NotRecognized);
        };

        let info = self.store.log_attendance(&found.folder, course)?;
        let student = self.store.student_by_folder(&found.folder)?;
        tracing::info!(
            folder = %found.folder,
            distance = found.distance,
            logged = info.is_logged(),
            "face recognized"
        );
        Ok(ScanOutcome::Recognized {
            folder_name: found.folder,
            student,
            distance: found.distance,
            logged: info.is_logged(),
            info,
        })
    }

    /// Register a student whose dataset folder already exists.
    pub fn register(
        &self,
        folder: &str,
        matric_no: Option<&str>,
        name: Option<&str>,
    ) -> Result<RegisterOutcome, RegisterError> {
        if !is_valid_folder_name(folder) {
            return Err(RegisterError::InvalidFolderName(folder.to_string()));
        }
        let dir = self.config.student_dir(folder);
        if !dir.is_dir() {
            return Err(RegisterError::DatasetFolderMissing(dir.display().to_string()));
        }
        Ok(match self.store.add_student(folder, matric_no, name)? {
            AddStudentOutcome::Added { student } => RegisterOutcome::Registered { student },
            AddStudentOutcome::Duplicate => RegisterOutcome::AlreadyRegistered,
        })
    }

    pub fn report(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, StoreError> {
        self.store.report(filter)
    }

    /// Detect and save faces from still images into the student's dataset folder.
    pub fn capture(
        &self,
        folder: &str,
        images: &[PathBuf],
        limit: Option<usize>,
    ) -> Result<CaptureReport, CaptureServiceError> {
        capture::capture_dataset(&self.config, folder, images, limit)
    }

    /// Compare dataset folders, the loaded label map and registered students.
    pub fn check_consistency(&self) -> Result<ConsistencyReport, ServiceError> {
        let folders: BTreeSet<String> = match training::dataset_folders(&self.config.dataset_dir) {
            Ok(folders) => folders.into_iter().collect(),
            Err(TrainingError::DatasetNotFound(_)) => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        let labeled: BTreeSet<String> = self
            .recognition
            .as_ref()
            .map(|r| r.labels().folders().iter().cloned().collect())
            .unwrap_or_default();
        let students: BTreeSet<String> = self
            .store
            .list_students()?
            .into_iter()
            .map(|s| s.folder_name)
            .collect();

        let report = ConsistencyReport {
            untrained_folders: folders.difference(&labeled).cloned().collect(),
            unregistered_labels: labeled.difference(&students).cloned().collect(),
            unlabeled_students: students.difference(&labeled).cloned().collect(),
        };
        if report.is_consistent() {
            tracing::info!(folders = folders.len(), "dataset, model and database agree");
        } else {
            tracing::warn!(?report, "dataset, model and database disagree");
        }
        Ok(report)
    }

    pub fn status(&self) -> Result<ServiceStatus, StoreError> {
        let counts = self.store.counts()?;
        Ok(ServiceStatus {
            model_loaded: self.recognition.is_some(),
            labels: self.recognition.as_ref().map_or(0, |r| r.labels().len()),
            distance_threshold: self
                .recognition
                .as_ref()
                .map_or(self.config.distance_threshold, Recognition::threshold),
            db_path: self.store.path().to_path_buf(),
            students: counts.students,
            attendance_records: counts.attendance,
        })
    }
}
