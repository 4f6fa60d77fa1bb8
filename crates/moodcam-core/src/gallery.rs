//! Known-face gallery built from a directory of reference images.
//!
//! Layout: `known_faces/alice.jpg` is identity "alice"; every image inside
//! `known_faces/bob/` is identity "bob".

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::selection::select_primary_face;
use crate::types::{CosineMatcher, Embedding, KnownFace, MatchResult, Matcher};
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default cosine similarity threshold for a positive match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces an embedding for the primary face in an image.
pub trait FaceEmbedder {
    /// `Ok(None)` when the image contains no usable face.
    fn embed_primary(&mut self, image: &GrayImage) -> Result<Option<Embedding>, GalleryError>;
}

/// SCRFD detection followed by ArcFace extraction on the largest face.
pub struct DetectAndEmbed<'a> {
    pub detector: &'a mut FaceDetector,
    pub recognizer: &'a mut FaceRecognizer,
}

impl FaceEmbedder for DetectAndEmbed<'_> {
    fn embed_primary(&mut self, image: &GrayImage) -> Result<Option<Embedding>, GalleryError> {
        let (w, h) = image.dimensions();
        let faces = self.detector.detect(image.as_raw(), w, h)?;
        let Some(face) = select_primary_face(&faces, 0.0) else {
            return Ok(None);
        };
        Ok(Some(self.recognizer.extract(image.as_raw(), w, h, face)?))
    }
}

/// Reference image paired with the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub identity: String,
    pub path: PathBuf,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let io_err = |source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}

/// List the reference images under `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn scan_reference_images(dir: &Path) -> Result<Vec<ReferenceImage>, GalleryError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut refs = Vec::new();
    for path in sorted_entries(dir)? {
        if path.is_dir() {
            let Some(identity) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for inner in sorted_entries(&path)? {
                if inner.is_file() && is_image(&inner) {
                    refs.push(ReferenceImage {
                        identity: identity.to_string(),
                        path: inner,
                    });
                }
            }
        } else if is_image(&path) {
            let Some(identity) = path.file_stem().and_then(|n| n.to_str()) else {
                continue;
            };
            refs.push(ReferenceImage {
                identity: identity.to_string(),
                path,
            });
        }
    }
    Ok(refs)
}

/// Embeddings of every usable reference face.
pub struct Gallery {
    faces: Vec<KnownFace>,
    threshold: f32,
}

impl Gallery {
    pub fn new(faces: Vec<KnownFace>, threshold: f32) -> Self {
        Self { faces, threshold }
    }

    /// Embed every reference image under `dir`.
    ///
    /// Images that fail to decode or contain no face are skipped with a warning.
    pub fn build<E: FaceEmbedder>(
        dir: &Path,
        embedder: &mut E,
        threshold: f32,
    ) -> Result<Self, GalleryError> {
        let refs = scan_reference_images(dir)?;
        let mut faces = Vec::with_capacity(refs.len());

        for reference in refs {
            let image = match image::open(&reference.path) {
                Ok(img) => img.to_luma8(),
                Err(source) => {
                    let err = GalleryError::Decode {
                        path: reference.path.clone(),
                        source,
                    };
                    tracing::warn!(error = %err, "skipping reference image");
                    continue;
                }
            };

            match embedder.embed_primary(&image) {
                Ok(Some(embedding)) => {
                    tracing::debug!(identity = %reference.identity, path = %reference.path.display(), "reference face embedded");
                    faces.push(KnownFace {
                        identity: reference.identity,
                        source: reference.path,
                        embedding,
                    });
                }
                Ok(None) => {
                    tracing::warn!(path = %reference.path.display(), "no face in reference image; skipping");
                }
                Err(err) => {
                    tracing::warn!(path = %reference.path.display(), error = %err, "failed to embed reference image");
                }
            }
        }

        tracing::info!(dir = %dir.display(), faces = faces.len(), "known-face gallery built");
        Ok(Self::new(faces, threshold))
    }

    /// Best match for `probe`; unmatched results display as "Unknown".
    pub fn identify(&self, probe: &Embedding) -> MatchResult {
        CosineMatcher.compare(probe, &self.faces, self.threshold)
    }

    pub fn faces(&self) -> &[KnownFace] {
        &self.faces
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Distinct identities, in first-seen order.
    pub fn identities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for face in &self.faces {
            if !names.contains(&face.identity.as_str()) {
                names.push(&face.identity);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Embeds by mean brightness; black images have no face.
    struct BrightnessEmbedder;

    impl FaceEmbedder for BrightnessEmbedder {
        fn embed_primary(&mut self, image: &GrayImage) -> Result<Option<Embedding>, GalleryError> {
            let mean = image.pixels().map(|p| p.0[0] as f32).sum::<f32>()
                / (image.width() * image.height()) as f32;
            if mean == 0.0 {
                return Ok(None);
            }
            Ok(Some(Embedding {
                values: vec![mean, 255.0 - mean],
                model_version: None,
            }))
        }
    }

    fn write_image(path: &Path, value: u8) {
        GrayImage::from_pixel(8, 8, Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_scan_flat_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("alice.png"), 10);
        std::fs::create_dir(dir.path().join("bob")).unwrap();
        write_image(&dir.path().join("bob/one.png"), 20);
        write_image(&dir.path().join("bob/two.png"), 30);
        std::fs::rename(dir.path().join("bob/two.png"), dir.path().join("bob/two.PNG")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let refs = scan_reference_images(dir.path()).unwrap();
        let ids: Vec<&str> = refs.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "bob"]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let refs = scan_reference_images(Path::new("/nonexistent/known_faces")).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn test_build_skips_faceless_and_broken_images() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("alice.png"), 250);
        write_image(&dir.path().join("blank.png"), 0);
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();

        let gallery = Gallery::build(dir.path(), &mut BrightnessEmbedder, 0.9).unwrap();
        assert_eq!(gallery.identities(), vec!["alice"]);
        assert_eq!(gallery.faces()[0].source, dir.path().join("alice.png"));
    }

    #[test]
    fn test_identify_known_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("bright.png"), 250);
        write_image(&dir.path().join("dim.png"), 5);
        let gallery = Gallery::build(dir.path(), &mut BrightnessEmbedder, 0.99).unwrap();

        let probe = Embedding { values: vec![248.0, 7.0], model_version: None };
        assert_eq!(gallery.identify(&probe).display_name(), "bright");

        let midway = Embedding { values: vec![127.0, 128.0], model_version: None };
        assert_eq!(gallery.identify(&midway).display_name(), "Unknown");
    }

    #[test]
    fn test_empty_gallery_identifies_unknown() {
        let gallery = Gallery::new(Vec::new(), DEFAULT_SIMILARITY_THRESHOLD);
        assert!(gallery.is_empty());
        let probe = Embedding { values: vec![1.0], model_version: None };
        assert_eq!(gallery.identify(&probe).display_name(), "Unknown");
    }
}
