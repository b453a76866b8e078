//! attend-core: Recognition and attendance engine for a single-camera kiosk.
//!
//! Builds the known-identity database from an enrollment manifest, matches
//! observed face encodings against it, keeps an append-only daily ledger and
//! drives the scanning/confirmed session state machine. Face detection and
//! encoding run behind the [`FaceEngine`] trait; [`OnnxFaceEngine`] provides
//! SCRFD detection and ArcFace encoding via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod enrollment;
pub mod ledger;
pub mod matcher;
pub mod recognizer;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineError, FaceEngine, OnnxFaceEngine};
pub use enrollment::{EncodingStore, EnrollmentError, EnrollmentSource};
pub use ledger::{AttendanceEvent, AttendanceLedger, LedgerError, MarkOutcome};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use session::{Confirmation, FrameOutcome, FrameTime, SessionController, SessionSettings, SessionState};
pub use types::{BoundingBox, Encoding, Identity, KnownEncoding};

use std::path::PathBuf;

/// Default directory holding `det_10g.onnx` and `w600k_r50.onnx`.
///
/// `$XDG_DATA_HOME/attend/models`, falling back to `~/.local/share/attend/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
        .join("models")
}
