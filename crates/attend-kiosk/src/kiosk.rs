//! Live capture loop: camera → session → overlay → window.

use crate::config::Config;
use crate::display::Display;
use crate::overlay::{self, ProfileCache, Scene, WINDOW_TITLE};
use anyhow::{bail, Context, Result};
use attend_core::{
    AttendanceLedger, EncodingStore, FrameTime, OnnxFaceEngine, SessionController, SessionState,
};
use attend_hw::Camera;

/// Load models, then enrollment, then the camera, and run until the
/// operator quits or the camera stops delivering frames.
pub fn run(config: &Config) -> Result<()> {
    let mut engine = OnnxFaceEngine::load(&config.model_dir, config.detector_confidence)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;

    let store = EncodingStore::build(&config.enrollment_source(), &mut engine)
        .context("failed to build encoding store")?;
    if store.is_empty() {
        bail!(
            "no usable face encodings from {}; nothing to recognize",
            config.manifest.display()
        );
    }
    tracing::info!(
        identities = store.identities().count(),
        encodings = store.len(),
        "encoding store ready"
    );

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let mut stream = camera.stream().context("failed to start capture stream")?;

    let icon = overlay::load_icon(&config.icon);
    let font = overlay::load_font(&config.font);
    let mut profiles = ProfileCache::new(&config.images_dir);
    let ledger = AttendanceLedger::new(&config.ledger);
    let mut session = SessionController::new(store, ledger, config.session_settings());

    let (width, height) = overlay::canvas_size(camera.width, camera.height);
    let mut display = Display::open(WINDOW_TITLE, width, height)?;
    tracing::info!(device = %config.camera_device, ledger = %config.ledger.display(), "kiosk running");

    while display.is_open() {
        let frame = match stream.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "camera stopped delivering frames");
                break;
            }
        };
        let (sequence, at) = (frame.sequence, FrameTime::captured_at(frame.timestamp));
        let image = match frame.into_image() {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(sequence, error = %e, "dropping malformed frame");
                continue;
            }
        };

        let outcome = session.step(&mut engine, &image, at);
        tracing::trace!(sequence, ?outcome, "frame processed");

        let scene = match session.state() {
            SessionState::Scanning => Scene::Scanning {
                face: session.last_face(),
            },
            SessionState::Confirmed(confirmation) => Scene::Confirmed {
                identity: &confirmation.identity,
                recorded: confirmation.ledger.is_some(),
                icon: icon.as_ref(),
                picture: profiles.get(&confirmation.identity),
            },
        };
        let canvas = overlay::compose(&image, &scene, font.as_ref());
        display.show(&canvas)?;
    }

    tracing::info!("kiosk shutting down");
    Ok(())
}
