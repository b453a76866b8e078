//! Kiosk canvas composition.
//!
//! The canvas is the camera frame inset below a header bar, with a profile
//! card on the right. Labels are rendered with the configured TrueType font;
//! without one the canvas is drawn without text.

use ab_glyph::FontVec;
use attend_core::{BoundingBox, Identity};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const HEADER_HEIGHT: u32 = 60;
pub const FRAME_LEFT: u32 = 20;
const SIDEBAR_WIDTH: u32 = 340;

const CARD_WIDTH: u32 = 300;
const CARD_HEIGHT: u32 = 380;
const CARD_TOP: u32 = 80;
const CARD_RIGHT: u32 = 320;
const CARD_BORDER: u32 = 3;
const BAR_INSET: u32 = 20;
const BAR_HEIGHT: u32 = 30;
const ID_BAR_TOP: u32 = 240;
const MAJOR_BAR_TOP: u32 = 280;

pub const ICON_SIZE: u32 = 128;
pub const PICTURE_SIZE: u32 = 150;
const PICTURE_TOP: u32 = 20;

const FACE_BOX_THICKNESS: u32 = 3;
const TINT_ALPHA: f32 = 0.7;

const BACKGROUND: Rgb<u8> = Rgb([216, 235, 240]);
const ACCENT: Rgb<u8> = Rgb([224, 80, 128]);
const CARD: Rgb<u8> = Rgb([255, 255, 255]);
const FACE_BOX: Rgb<u8> = Rgb([0, 255, 0]);
const CONFIRM_TINT: Rgb<u8> = Rgb([0, 180, 0]);
const TEXT_LIGHT: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_DARK: Rgb<u8> = Rgb([0, 0, 0]);

const HEADER_TEXT_SIZE: f32 = 32.0;
const BANNER_TEXT_SIZE: f32 = 44.0;
const CARD_TEXT_SIZE: f32 = 26.0;
const BAR_TEXT_SIZE: f32 = 20.0;

pub const WINDOW_TITLE: &str = "Attendance System";

/// What to draw on top of the current frame.
pub enum Scene<'a> {
    Scanning {
        face: Option<&'a BoundingBox>,
    },
    Confirmed {
        identity: &'a Identity,
        /// False when the ledger write failed.
        recorded: bool,
        icon: Option<&'a RgbaImage>,
        picture: Option<&'a RgbImage>,
    },
}

/// One line of text in canvas coordinates; (x, y) is the top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub size: f32,
    pub colour: Rgb<u8>,
}

impl Label {
    /// Position a label by its baseline, the way the layout is specified.
    fn on_baseline(text: impl Into<String>, x: i64, baseline: i64, size: f32, colour: Rgb<u8>) -> Self {
        Self {
            text: text.into(),
            x: x as i32,
            y: (baseline - (size * 0.75).round() as i64) as i32,
            size,
            colour,
        }
    }
}

/// Canvas dimensions for a camera frame of `frame_width` x `frame_height`.
pub fn canvas_size(frame_width: u32, frame_height: u32) -> (u32, u32) {
    (frame_width + SIDEBAR_WIDTH, frame_height + HEADER_HEIGHT)
}

fn card_origin(canvas_width: u32) -> (i64, i64) {
    (canvas_width as i64 - CARD_RIGHT as i64, CARD_TOP as i64)
}

pub fn compose(frame: &RgbImage, scene: &Scene<'_>, font: Option<&FontVec>) -> RgbImage {
    let (width, height) = canvas_size(frame.width(), frame.height());
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    draw_filled_rect_mut(&mut canvas, Rect::at(0, 0).of_size(width, HEADER_HEIGHT), ACCENT);
    imageops::replace(&mut canvas, frame, FRAME_LEFT as i64, HEADER_HEIGHT as i64);

    let (card_x, card_y) = card_origin(width);
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(card_x as i32, card_y as i32).of_size(CARD_WIDTH, CARD_HEIGHT),
        CARD,
    );
    draw_thick_rect(&mut canvas, card_x, card_y, CARD_WIDTH, CARD_HEIGHT, CARD_BORDER, ACCENT);

    match scene {
        Scene::Scanning { face } => {
            if let Some(face) = face {
                draw_thick_rect(
                    &mut canvas,
                    face.x.round() as i64 + FRAME_LEFT as i64,
                    face.y.round() as i64 + HEADER_HEIGHT as i64,
                    face.width.round().max(0.0) as u32,
                    face.height.round().max(0.0) as u32,
                    FACE_BOX_THICKNESS,
                    FACE_BOX,
                );
            }
        }
        Scene::Confirmed { icon, picture, .. } => {
            tint_rect(
                &mut canvas,
                FRAME_LEFT,
                HEADER_HEIGHT,
                frame.width(),
                frame.height(),
                CONFIRM_TINT,
                TINT_ALPHA,
            );
            if let Some(icon) = icon {
                let x = FRAME_LEFT as i64 + (frame.width() as i64 - icon.width() as i64) / 2;
                let y = HEADER_HEIGHT as i64 + (frame.height() as i64 - icon.height() as i64) / 2 - 30;
                blend_rgba(&mut canvas, icon, x, y);
            }
            if let Some(picture) = picture {
                let x = card_x + (CARD_WIDTH as i64 - picture.width() as i64) / 2;
                imageops::replace(&mut canvas, *picture, x, card_y + PICTURE_TOP as i64);
            }
            for top in [ID_BAR_TOP, MAJOR_BAR_TOP] {
                let bar = Rect::at((card_x + BAR_INSET as i64) as i32, (card_y + top as i64) as i32)
                    .of_size(CARD_WIDTH - 2 * BAR_INSET, BAR_HEIGHT);
                draw_filled_rect_mut(&mut canvas, bar, ACCENT);
            }
        }
    }

    if let Some(font) = font {
        for label in labels(scene, frame.width(), frame.height()) {
            draw_text_mut(&mut canvas, label.colour, label.x, label.y, label.size, font, &label.text);
        }
    }

    canvas
}

/// Text drawn for `scene` on a canvas built around a `frame_width` x
/// `frame_height` camera frame.
pub fn labels(scene: &Scene<'_>, frame_width: u32, frame_height: u32) -> Vec<Label> {
    let (canvas_width, _) = canvas_size(frame_width, frame_height);
    let (card_x, card_y) = card_origin(canvas_width);

    let mut labels = vec![Label::on_baseline(
        "ATTENDANCE SYSTEM",
        FRAME_LEFT as i64,
        40,
        HEADER_TEXT_SIZE,
        TEXT_LIGHT,
    )];

    match scene {
        Scene::Scanning { .. } => {
            labels.push(Label::on_baseline(
                "Scan Your Face",
                card_x + 40,
                card_y + 200,
                CARD_TEXT_SIZE,
                TEXT_DARK,
            ));
        }
        Scene::Confirmed {
            identity, recorded, ..
        } => {
            let banner = if *recorded {
                "Attendance Marked"
            } else {
                "Attendance Not Saved"
            };
            labels.push(Label::on_baseline(
                banner,
                FRAME_LEFT as i64 + frame_width as i64 / 2 - 180,
                HEADER_HEIGHT as i64 + frame_height as i64 / 2 + 80,
                BANNER_TEXT_SIZE,
                TEXT_LIGHT,
            ));
            labels.push(Label::on_baseline(
                identity.name.as_str(),
                card_x + 20,
                card_y + 210,
                CARD_TEXT_SIZE,
                TEXT_DARK,
            ));
            labels.push(Label::on_baseline(
                format!("ID: {}", identity.id),
                card_x + 30,
                card_y + 262,
                BAR_TEXT_SIZE,
                TEXT_LIGHT,
            ));
            labels.push(Label::on_baseline(
                format!("Major: {}", identity.major),
                card_x + 30,
                card_y + 302,
                BAR_TEXT_SIZE,
                TEXT_LIGHT,
            ));
        }
    }

    labels
}

/// Load a TrueType/OpenType font for the labels. A missing or unreadable
/// file yields `None`.
pub fn load_font(path: &Path) -> Option<FontVec> {
    let loaded = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
    match loaded {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "font unavailable; rendering without labels");
            None
        }
    }
}

/// Load the confirmation icon scaled to [`ICON_SIZE`]. A missing or
/// unreadable file yields `None`.
pub fn load_icon(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(img) => Some(imageops::resize(&img.to_rgba8(), ICON_SIZE, ICON_SIZE, FilterType::Triangle)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "icon unavailable; confirming without it");
            None
        }
    }
}

/// Profile pictures keyed by identity ID, loaded on first use.
pub struct ProfileCache {
    images_dir: PathBuf,
    pictures: HashMap<String, Option<RgbImage>>,
}

impl ProfileCache {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            pictures: HashMap::new(),
        }
    }

    /// Picture for `identity`, scaled to [`PICTURE_SIZE`]. Failures are
    /// logged once and remembered.
    pub fn get(&mut self, identity: &Identity) -> Option<&RgbImage> {
        let images_dir = &self.images_dir;
        self.pictures
            .entry(identity.id.clone())
            .or_insert_with(|| {
                let path = images_dir.join(&identity.image_file);
                match image::open(&path) {
                    Ok(img) => Some(imageops::resize(
                        &img.to_rgb8(),
                        PICTURE_SIZE,
                        PICTURE_SIZE,
                        FilterType::Triangle,
                    )),
                    Err(e) => {
                        tracing::warn!(id = %identity.id, path = %path.display(), error = %e, "profile picture unavailable");
                        None
                    }
                }
            })
            .as_ref()
    }
}

/// Hollow rectangle `thickness` pixels wide, growing inwards. Clipped by imageproc.
fn draw_thick_rect(
    canvas: &mut RgbImage,
    x: i64,
    y: i64,
    width: u32,
    height: u32,
    thickness: u32,
    colour: Rgb<u8>,
) {
    for inset in 0..thickness {
        let (w, h) = (width.saturating_sub(2 * inset), height.saturating_sub(2 * inset));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((x + inset as i64) as i32, (y + inset as i64) as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, colour);
    }
}

/// Weighted blend of `colour` over a region; imageproc has no fill-with-alpha.
fn tint_rect(canvas: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, colour: Rgb<u8>, alpha: f32) {
    let x1 = (x + width).min(canvas.width());
    let y1 = (y + height).min(canvas.height());
    for py in y..y1 {
        for px in x..x1 {
            let pixel = canvas.get_pixel_mut(px, py);
            for (c, t) in pixel.0.iter_mut().zip(colour.0) {
                *c = (alpha * t as f32 + (1.0 - alpha) * *c as f32).round() as u8;
            }
        }
    }
}

/// Alpha-blend an RGBA image onto the RGB canvas with its top-left corner
/// at (x, y), clipped.
fn blend_rgba(canvas: &mut RgbImage, top: &RgbaImage, x: i64, y: i64) {
    for (tx, ty, src) in top.enumerate_pixels() {
        let cx = x + tx as i64;
        let cy = y + ty as i64;
        if cx < 0 || cy < 0 || cx >= canvas.width() as i64 || cy >= canvas.height() as i64 {
            continue;
        }
        let a = src.0[3] as f32 / 255.0;
        let dst = canvas.get_pixel_mut(cx as u32, cy as u32);
        for (c, s) in dst.0.iter_mut().zip(src.0) {
            *c = (a * s as f32 + (1.0 - a) * *c as f32).round() as u8;
        }
    }
}
