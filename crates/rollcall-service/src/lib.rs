//! rollcall-service — attendance handlers over the recognition core and store.
//!
//! [`AttendanceService`] owns the configuration, the attendance store and the
//! recognition bundle (detector, model, label map, threshold). The bundle is
//! built once at startup; scans are refused until a model has been trained.

pub mod capture;
pub mod config;
pub mod recognition;
pub mod service;

pub use capture::{capture_dataset, CaptureError, CaptureReport, CaptureServiceError};
pub use config::Config;
pub use recognition::{load_detector, FaceMatch, LoadError, MatchError, Recognition};
pub use service::{
    AttendanceService, ConsistencyReport, RegisterError, RegisterOutcome, ScanError, ScanOutcome,
    ServiceError, ServiceStatus,
};
