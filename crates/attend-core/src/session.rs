//! Per-frame scanning/confirmed state machine.
//!
//! While scanning, detection runs on every `frame_skip`-th frame and the
//! last face box is kept for rendering in between. A match records
//! attendance and holds the confirmed state until the cooldown has
//! elapsed; the ledger outcome never changes the transition.

use crate::engine::FaceEngine;
use crate::enrollment::EncodingStore;
use crate::ledger::{AttendanceLedger, MarkOutcome};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::types::{BoundingBox, Identity};
use chrono::NaiveDateTime;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use std::time::{Duration, Instant};

/// Maximum Euclidean distance for an accepted match on unit-length
/// ArcFace encodings (cosine similarity above 0.5).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.0;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_FRAME_SKIP: u32 = 2;
pub const DEFAULT_DETECT_DOWNSCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub match_threshold: f32,
    pub cooldown: Duration,
    /// Run detection on one frame out of every `frame_skip` while scanning.
    pub frame_skip: u32,
    /// Detection runs on the frame shrunk by this factor.
    pub detect_downscale: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            frame_skip: DEFAULT_FRAME_SKIP,
            detect_downscale: DEFAULT_DETECT_DOWNSCALE,
        }
    }
}

/// Capture time of a frame: monotonic for the cooldown, wall clock for the ledger.
#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    pub instant: Instant,
    pub local: NaiveDateTime,
}

impl FrameTime {
    pub fn now() -> Self {
        Self::captured_at(Instant::now())
    }

    /// Time for a frame dequeued at `instant`, stamped with the current local clock.
    pub fn captured_at(instant: Instant) -> Self {
        Self {
            instant,
            local: chrono::Local::now().naive_local(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Confirmation {
    pub identity: Identity,
    pub confirmed_at: Instant,
    pub distance: f32,
    /// `None` when the ledger write failed.
    pub ledger: Option<MarkOutcome>,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Scanning,
    Confirmed(Confirmation),
}

impl SessionState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, SessionState::Scanning)
    }
}

/// What a single [`SessionController::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Scanning frame skipped by the frame-skip policy.
    Skipped,
    NoFace,
    Unrecognized { distance: Option<f32> },
    Confirmed { identity_id: String, ledger: Option<MarkOutcome> },
    /// Confirmed and still inside the cooldown.
    Holding,
    /// Cooldown elapsed; back to scanning.
    Expired,
}

/// Session state threaded through the capture loop.
pub struct SessionController<M = EuclideanMatcher> {
    store: EncodingStore,
    ledger: AttendanceLedger,
    matcher: M,
    settings: SessionSettings,
    state: SessionState,
    last_face: Option<BoundingBox>,
    scan_tick: u64,
}

impl SessionController<EuclideanMatcher> {
    pub fn new(store: EncodingStore, ledger: AttendanceLedger, settings: SessionSettings) -> Self {
        Self::with_matcher(store, ledger, settings, EuclideanMatcher)
    }
}

impl<M: Matcher> SessionController<M> {
    pub fn with_matcher(
        store: EncodingStore,
        ledger: AttendanceLedger,
        settings: SessionSettings,
        matcher: M,
    ) -> Self {
        Self {
            store,
            ledger,
            matcher,
            settings,
            state: SessionState::Scanning,
            last_face: None,
            scan_tick: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last detected face box in full-frame coordinates.
    pub fn last_face(&self) -> Option<&BoundingBox> {
        self.last_face.as_ref()
    }

    pub fn store(&self) -> &EncodingStore {
        &self.store
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Advance the state machine by one captured frame.
    pub fn step<E>(&mut self, engine: &mut E, frame: &RgbImage, at: FrameTime) -> FrameOutcome
    where
        E: FaceEngine + ?Sized,
    {
        if let SessionState::Confirmed(confirmation) = &self.state {
            let elapsed = at.instant.saturating_duration_since(confirmation.confirmed_at);
            if elapsed <= self.settings.cooldown {
                return FrameOutcome::Holding;
            }
            // The expiring frame already renders as scanning and runs no detection.
            tracing::info!(id = %confirmation.identity.id, "cooldown elapsed; scanning");
            self.state = SessionState::Scanning;
            self.last_face = None;
            return FrameOutcome::Expired;
        }

        let skip = u64::from(self.settings.frame_skip.max(1));
        let process = self.scan_tick % skip == 0;
        self.scan_tick = self.scan_tick.wrapping_add(1);
        if !process {
            return FrameOutcome::Skipped;
        }

        self.scan(engine, frame, at)
    }

    fn scan<E>(&mut self, engine: &mut E, frame: &RgbImage, at: FrameTime) -> FrameOutcome
    where
        E: FaceEngine + ?Sized,
    {
        let factor = self.settings.detect_downscale.max(1);
        let probe = downscale(frame, factor);

        let faces = match engine.locate(&probe) {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(error = %err, "face detection failed; treating frame as empty");
                self.last_face = None;
                return FrameOutcome::NoFace;
            }
        };

        // Single-subject kiosk: only the first (most confident) face is
        // encoded and matched, even when several people are in view.
        let Some(face) = faces.into_iter().next() else {
            self.last_face = None;
            return FrameOutcome::NoFace;
        };
        self.last_face = Some(face.scaled(factor as f32));

        let encoding = match engine.encode(&probe, &face) {
            Ok(encoding) => encoding,
            Err(err) => {
                tracing::warn!(error = %err, "face encoding failed");
                return FrameOutcome::NoFace;
            }
        };

        let result = self
            .matcher
            .compare(&encoding, self.store.known(), self.settings.match_threshold);
        let distance = result.distance;

        let Some(identity) = result.identity().and_then(|id| self.store.identity(id)).cloned() else {
            tracing::debug!(?distance, "face not recognized");
            return FrameOutcome::Unrecognized { distance };
        };

        let ledger = match self.ledger.mark(&identity.id, &identity.name, at.local) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::error!(id = %identity.id, error = %err, "failed to record attendance");
                None
            }
        };

        tracing::info!(
            id = %identity.id,
            name = %identity.name,
            distance = distance.unwrap_or_default(),
            ?ledger,
            "identity confirmed"
        );

        let identity_id = identity.id.clone();
        self.state = SessionState::Confirmed(Confirmation {
            identity,
            confirmed_at: at.instant,
            distance: distance.unwrap_or_default(),
            ledger,
        });
        FrameOutcome::Confirmed { identity_id, ledger }
    }
}

fn downscale(frame: &RgbImage, factor: u32) -> Cow<'_, RgbImage> {
    if factor <= 1 {
        return Cow::Borrowed(frame);
    }
    let width = (frame.width() / factor).max(1);
    let height = (frame.height() / factor).max(1);
    Cow::Owned(imageops::resize(frame, width, height, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{colour_encoding, solid, ColourEngine};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const RED: [u8; 3] = [200, 30, 30];
    const BLUE: [u8; 3] = [30, 30, 200];
    const GREY: [u8; 3] = [120, 120, 120];
    const BLACK: [u8; 3] = [0, 0, 0];

    struct Harness {
        _dir: TempDir,
        controller: SessionController,
        engine: ColourEngine,
        start: Instant,
        day: NaiveDateTime,
    }

    impl Harness {
        fn new(settings: SessionSettings) -> Self {
            let dir = TempDir::new().unwrap();
            let ledger = AttendanceLedger::new(dir.path().join("attendance_log.csv"));
            Self::with_ledger(dir, ledger, settings)
        }

        fn with_ledger(dir: TempDir, ledger: AttendanceLedger, settings: SessionSettings) -> Self {
            let person = |id: &str, name: &str| Identity {
                id: id.into(),
                name: name.into(),
                major: "Physics".into(),
                image_file: format!("{id}.jpg"),
            };
            let store = EncodingStore::from_enrolled(vec![
                (person("S1", "Jane"), vec![colour_encoding(RED)]),
                (person("S2", "John"), vec![colour_encoding(BLUE)]),
            ]);
            Self {
                _dir: dir,
                controller: SessionController::new(store, ledger, settings),
                engine: ColourEngine::default(),
                start: Instant::now(),
                day: NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
            }
        }

        fn frame(&mut self, rgb: [u8; 3], after: Duration) -> FrameOutcome {
            let at = FrameTime {
                instant: self.start + after,
                local: self.day + chrono::Duration::from_std(after).unwrap(),
            };
            self.controller.step(&mut self.engine, &solid(8, 8, rgb), at)
        }

        fn ledger_rows(&self) -> usize {
            self.controller.ledger.entries().unwrap().len()
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            match_threshold: 0.05,
            cooldown: Duration::from_secs(5),
            frame_skip: 2,
            detect_downscale: 1,
        }
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn test_match_confirms_and_writes_once() {
        let mut h = Harness::new(settings());

        let outcome = h.frame(RED, secs(0.0));
        assert_eq!(
            outcome,
            FrameOutcome::Confirmed {
                identity_id: "S1".into(),
                ledger: Some(MarkOutcome::Written)
            }
        );
        assert!(!h.controller.state().is_scanning());
        assert_eq!(h.ledger_rows(), 1);

        // Inside the cooldown: no detection, no writes.
        for t in [0.1, 1.0, 3.0, 5.0] {
            assert_eq!(h.frame(RED, secs(t)), FrameOutcome::Holding);
        }
        assert_eq!(h.engine.locate_calls, 1);
        assert_eq!(h.ledger_rows(), 1);

        // After the cooldown the next frame returns to scanning, face or not.
        assert_eq!(h.frame(RED, secs(5.1)), FrameOutcome::Expired);
        assert_eq!(h.engine.locate_calls, 1, "expiring frame runs no detection");
        assert!(h.controller.state().is_scanning());
        assert!(h.controller.last_face().is_none());
        assert_eq!(h.ledger_rows(), 1);
    }

    #[test]
    fn test_reconfirm_same_day_keeps_single_row() {
        let mut h = Harness::new(settings());
        h.frame(RED, secs(0.0));
        assert_eq!(h.frame(RED, secs(6.0)), FrameOutcome::Expired);
        // Frame-skip parity carries over from the first scanning frame.
        assert_eq!(h.frame(RED, secs(6.1)), FrameOutcome::Skipped);
        assert_eq!(
            h.frame(RED, secs(6.2)),
            FrameOutcome::Confirmed {
                identity_id: "S1".into(),
                ledger: Some(MarkOutcome::AlreadyMarked)
            }
        );
        assert_eq!(h.ledger_rows(), 1);
    }

    #[test]
    fn test_frame_skip_alternates_detection() {
        let mut h = Harness::new(settings());
        let outcomes: Vec<FrameOutcome> = (0..4).map(|i| h.frame(BLACK, secs(i as f32 * 0.03))).collect();
        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::NoFace,
                FrameOutcome::Skipped,
                FrameOutcome::NoFace,
                FrameOutcome::Skipped
            ]
        );
        assert_eq!(h.engine.locate_calls, 2);
    }

    #[test]
    fn test_frame_skip_one_processes_every_frame() {
        let mut h = Harness::new(SessionSettings { frame_skip: 1, ..settings() });
        for i in 0..3 {
            assert_eq!(h.frame(BLACK, secs(i as f32)), FrameOutcome::NoFace);
        }
        assert_eq!(h.engine.locate_calls, 3);
    }

    #[test]
    fn test_no_face_leaves_state_unchanged() {
        let mut h = Harness::new(settings());
        assert_eq!(h.frame(BLACK, secs(0.0)), FrameOutcome::NoFace);
        assert_eq!(h.engine.encode_calls, 0);
        assert!(h.controller.state().is_scanning());
        assert_eq!(h.ledger_rows(), 0);
    }

    #[test]
    fn test_unknown_face_keeps_scanning_and_box_persists_over_skips() {
        let mut h = Harness::new(settings());
        match h.frame(GREY, secs(0.0)) {
            FrameOutcome::Unrecognized { distance: Some(d) } => assert!(d > 0.05),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(h.controller.state().is_scanning());
        assert!(h.controller.last_face().is_some());

        assert_eq!(h.frame(BLACK, secs(0.03)), FrameOutcome::Skipped);
        assert!(h.controller.last_face().is_some(), "box kept across skipped frame");

        assert_eq!(h.frame(BLACK, secs(0.06)), FrameOutcome::NoFace);
        assert!(h.controller.last_face().is_none());
        assert_eq!(h.ledger_rows(), 0);
    }

    #[test]
    fn test_downscaled_box_maps_back_to_frame() {
        let mut h = Harness::new(SessionSettings {
            detect_downscale: 2,
            match_threshold: 0.0,
            ..settings()
        });
        h.frame(GREY, secs(0.0));
        let face = h.controller.last_face().unwrap();
        assert_eq!((face.width, face.height), (8.0, 8.0));
    }

    #[test]
    fn test_engine_failure_is_treated_as_no_face() {
        let mut h = Harness::new(settings());
        h.engine.fail_locate = true;
        assert_eq!(h.frame(RED, secs(0.0)), FrameOutcome::NoFace);
        assert!(h.controller.state().is_scanning());
    }

    #[test]
    fn test_ledger_failure_still_confirms() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened as a ledger file.
        let ledger = AttendanceLedger::new(dir.path());
        let mut h = Harness::with_ledger(dir, ledger, settings());
        assert_eq!(
            h.frame(BLUE, secs(0.0)),
            FrameOutcome::Confirmed {
                identity_id: "S2".into(),
                ledger: None
            }
        );
        match h.controller.state() {
            SessionState::Confirmed(c) => {
                assert_eq!(c.identity.name, "John");
                assert_eq!(c.ledger, None);
            }
            SessionState::Scanning => panic!("expected confirmed state"),
        }
    }

    #[test]
    fn test_captured_at_keeps_capture_instant() {
        let captured = Instant::now() - Duration::from_millis(40);
        let at = FrameTime::captured_at(captured);
        assert_eq!(at.instant, captured);
    }

    #[test]
    fn test_empty_store_never_confirms() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("log.csv"));
        let mut controller = SessionController::new(EncodingStore::default(), ledger, settings());
        let mut engine = ColourEngine::default();
        let at = FrameTime::now();
        let outcome = controller.step(&mut engine, &solid(8, 8, RED), at);
        assert_eq!(outcome, FrameOutcome::Unrecognized { distance: None });
    }
}
