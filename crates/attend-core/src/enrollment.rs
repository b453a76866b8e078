//! Encoding store: builds the known-identity database from an enrollment
//! manifest and a directory of enrollment photos.
//!
//! Each manifest row names a base image file. Every file in the images
//! directory whose name starts with that file's stem is an enrollment
//! sample, so one person can be enrolled from several photos without
//! listing them all in the manifest.

use crate::engine::{EngineError, FaceEngine};
use crate::types::{Encoding, Identity, KnownEncoding};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Columns the manifest must provide. Extra columns are ignored.
pub const REQUIRED_COLUMNS: [&str; 4] = ["Name", "ID", "Major", "ImageFile"];

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollment manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),
    #[error("enrollment manifest {}: missing required column {column:?}", .path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("enrollment manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("enrollment manifest {}: {source}", .path.display())]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("enrollment images directory {}: {source}", .path.display())]
    ImagesDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a single enrollment image contributed no encoding.
#[derive(Error, Debug)]
enum SampleError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Where enrollment data lives on disk.
#[derive(Debug, Clone)]
pub struct EnrollmentSource {
    pub manifest: PathBuf,
    pub images_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ManifestRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Major")]
    major: String,
    #[serde(rename = "ImageFile")]
    image_file: String,
}

impl From<ManifestRow> for Identity {
    fn from(row: ManifestRow) -> Self {
        Identity {
            id: row.id,
            name: row.name,
            major: row.major,
            image_file: row.image_file,
        }
    }
}

/// Known encodings in enrollment scan order plus the identity index.
///
/// Read-only once built; rebuilding requires a restart.
#[derive(Debug, Default)]
pub struct EncodingStore {
    known: Vec<KnownEncoding>,
    identities: HashMap<String, Identity>,
    /// Identity ids in manifest order.
    order: Vec<String>,
}

impl EncodingStore {
    /// Build the store by running the face engine over every enrollment image.
    ///
    /// A missing manifest, a manifest without the required columns, or an
    /// unreadable images directory is fatal. Images without a face and
    /// identities without any usable image are logged and skipped.
    pub fn build<E>(source: &EnrollmentSource, engine: &mut E) -> Result<Self, EnrollmentError>
    where
        E: FaceEngine + ?Sized,
    {
        let rows = read_manifest(&source.manifest)?;
        let candidates = list_images(&source.images_dir)?;
        tracing::info!(
            manifest = %source.manifest.display(),
            rows = rows.len(),
            images = candidates.len(),
            "loading enrollment data"
        );

        let mut store = EncodingStore::default();
        for row in rows {
            let identity = Identity::from(row);
            if store.identities.contains_key(&identity.id) {
                tracing::warn!(id = %identity.id, name = %identity.name, "duplicate manifest id; skipping row");
                continue;
            }

            let base = image_stem(&identity.image_file);
            let mut files = 0usize;
            let mut usable = 0usize;

            for (file_name, path) in candidates
                .iter()
                .filter(|(file_name, _)| !base.is_empty() && file_name.starts_with(base))
            {
                files += 1;
                match encode_sample(engine, path) {
                    Ok(Some(encoding)) => {
                        if store.push_encoding(&identity.id, encoding, file_name) {
                            usable += 1;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(file = %file_name, "no face found in enrollment image; skipping");
                    }
                    Err(err) => {
                        tracing::warn!(file = %file_name, error = %err, "failed to process enrollment image; skipping");
                    }
                }
            }

            if files == 0 {
                tracing::warn!(
                    id = %identity.id,
                    name = %identity.name,
                    base,
                    "no enrollment images found"
                );
            } else {
                tracing::debug!(id = %identity.id, files, usable, "identity enrolled");
            }
            store.insert_identity(identity, usable);
        }

        tracing::info!(
            identities = store.identities.len(),
            encodings = store.known.len(),
            "enrollment complete"
        );
        Ok(store)
    }

    /// Assemble a store from identities with precomputed encodings.
    ///
    /// Applies the same duplicate-id and dimension rules as [`build`](Self::build).
    pub fn from_enrolled<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Identity, Vec<Encoding>)>,
    {
        let mut store = EncodingStore::default();
        for (identity, encodings) in entries {
            if store.identities.contains_key(&identity.id) {
                tracing::warn!(id = %identity.id, "duplicate identity id; skipping");
                continue;
            }
            let usable = encodings
                .into_iter()
                .filter(|encoding| store.push_encoding(&identity.id, encoding.clone(), "<precomputed>"))
                .count();
            store.insert_identity(identity, usable);
        }
        store
    }

    fn insert_identity(&mut self, identity: Identity, usable: usize) {
        if usable == 0 {
            tracing::warn!(
                id = %identity.id,
                name = %identity.name,
                "identity has no usable encodings and cannot be matched"
            );
        }
        self.order.push(identity.id.clone());
        self.identities.insert(identity.id.clone(), identity);
    }

    /// Append an encoding for `identity_id`, rejecting empty encodings and
    /// encodings whose dimension differs from the ones already stored.
    fn push_encoding(&mut self, identity_id: &str, encoding: Encoding, origin: &str) -> bool {
        if encoding.is_empty() {
            tracing::warn!(origin, "empty encoding; skipping");
            return false;
        }
        if let Some(first) = self.known.first() {
            if first.encoding.len() != encoding.len() {
                tracing::warn!(
                    origin,
                    expected = first.encoding.len(),
                    actual = encoding.len(),
                    "encoding dimension mismatch; skipping"
                );
                return false;
            }
        }
        self.known.push(KnownEncoding {
            identity_id: identity_id.to_string(),
            encoding,
        });
        true
    }

    /// Matchable encodings in enrollment scan order.
    pub fn known(&self) -> &[KnownEncoding] {
        &self.known
    }

    /// Look up identity metadata, including unmatchable identities.
    pub fn identity(&self, id: &str) -> Option<&Identity> {
        self.identities.get(id)
    }

    /// Identities in manifest order.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.order.iter().filter_map(|id| self.identities.get(id))
    }

    /// Number of usable encodings enrolled for `id`.
    pub fn encoding_count(&self, id: &str) -> usize {
        self.known.iter().filter(|k| k.identity_id == id).count()
    }

    /// Identities that ended up with no usable encodings.
    pub fn unmatchable(&self) -> Vec<&Identity> {
        self.identities()
            .filter(|identity| self.encoding_count(&identity.id) == 0)
            .collect()
    }

    /// True when nothing can ever be matched.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }
}

/// File name without its extension, e.g. `Jane_Doe.jpg` → `Jane_Doe`.
fn image_stem(image_file: &str) -> &str {
    Path::new(image_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
}

fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>, EnrollmentError> {
    let file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => EnrollmentError::ManifestNotFound(path.to_path_buf()),
        _ => EnrollmentError::ManifestIo {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let csv_err = |source| EnrollmentError::Manifest {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers().map_err(csv_err)?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(EnrollmentError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }

    reader
        .deserialize::<ManifestRow>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(csv_err)
}

/// Regular files in `dir`, sorted by file name.
fn list_images(dir: &Path) -> Result<Vec<(String, PathBuf)>, EnrollmentError> {
    let dir_err = |source| EnrollmentError::ImagesDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(dir_err)? {
        let path = entry.map_err(dir_err)?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            images.push((name.to_string(), path.clone()));
        }
    }
    images.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(images)
}

/// Encode the first (most confident) face in an enrollment image.
fn encode_sample<E>(engine: &mut E, path: &Path) -> Result<Option<Encoding>, SampleError>
where
    E: FaceEngine + ?Sized,
{
    let image = image::open(path)?.to_rgb8();
    let faces = engine.locate(&image)?;
    let Some(face) = faces.first() else {
        return Ok(None);
    };
    if faces.len() > 1 {
        tracing::debug!(file = %path.display(), faces = faces.len(), "multiple faces; using the most confident");
    }
    Ok(Some(engine.encode(&image, face)?))
}
