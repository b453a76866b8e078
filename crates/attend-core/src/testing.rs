//! Test doubles shared by the enrollment and session tests.

use crate::detector::DetectorError;
use crate::engine::{EngineError, FaceEngine};
use crate::types::{BoundingBox, Encoding};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Engine that "sees" a face in any image whose top-left pixel is not black
/// and encodes it as the normalized colour of the centre pixel.
#[derive(Default)]
pub(crate) struct ColourEngine {
    pub locate_calls: usize,
    pub encode_calls: usize,
    pub fail_locate: bool,
}

impl FaceEngine for ColourEngine {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        self.locate_calls += 1;
        if self.fail_locate {
            return Err(DetectorError::InferenceFailed("scripted failure".into()).into());
        }
        if image.width() == 0 || image.get_pixel(0, 0).0 == [0, 0, 0] {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: image.width() as f32,
            height: image.height() as f32,
            confidence: 0.99,
            landmarks: None,
        }])
    }

    fn encode(&mut self, image: &RgbImage, _face: &BoundingBox) -> Result<Encoding, EngineError> {
        self.encode_calls += 1;
        Ok(colour_encoding(
            image.get_pixel(image.width() / 2, image.height() / 2).0,
        ))
    }
}

pub(crate) fn colour_encoding(rgb: [u8; 3]) -> Encoding {
    Encoding::new(rgb.iter().map(|&c| c as f32 / 255.0).collect())
}

pub(crate) fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

pub(crate) fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    solid(16, 16, rgb).save(&path).unwrap();
    path
}
