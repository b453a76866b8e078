use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Scale coordinates and landmarks by `factor`.
    ///
    /// Maps a box found on a downscaled frame back to full resolution.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

/// Fixed-length numeric descriptor of one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two encodings of equal length.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person, as listed in the enrollment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub major: String,
    /// Primary enrollment image, also used as the profile picture.
    pub image_file: String,
}

/// A known encoding tagged with the id of the identity that owns it.
///
/// Only the enrollment store constructs these, so every known encoding has
/// an owner in the store's identity index.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownEncoding {
    pub(crate) identity_id: String,
    pub(crate) encoding: Encoding,
}

impl KnownEncoding {
    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Encoding::new(vec![0.3, -0.2, 0.9]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_scaled() {
        let bbox = BoundingBox {
            x: 10.0,
            y: 5.0,
            width: 20.0,
            height: 30.0,
            confidence: 0.8,
            landmarks: Some([(1.0, 2.0); 5]),
        };
        let big = bbox.scaled(4.0);
        assert_eq!(big.x, 40.0);
        assert_eq!(big.y, 20.0);
        assert_eq!(big.width, 80.0);
        assert_eq!(big.height, 120.0);
        assert_eq!(big.confidence, 0.8);
        assert_eq!(big.landmarks, Some([(4.0, 8.0); 5]));
    }
}
