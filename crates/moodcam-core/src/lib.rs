//! moodcam-core: face detection, expression and identity engine.
//!
//! Uses SCRFD for face detection, FER+ for expression classification and
//! ArcFace for identity embeddings, all running via ONNX Runtime on the CPU.
//! The per-frame policy (primary face choice, capture cooldown) lives here
//! too, as plain functions over explicit state.

pub mod alignment;
pub mod cooldown;
pub mod detector;
pub mod emotion;
pub mod gallery;
pub mod recognizer;
pub mod selection;
pub mod types;

use std::path::PathBuf;

pub use cooldown::{CooldownLedger, WatchSet, DEFAULT_CAPTURE_COOLDOWN};
pub use detector::{DetectorError, FaceDetector};
pub use emotion::{Emotion, EmotionClassifier, EmotionError, EmotionPrediction};
pub use gallery::{DetectAndEmbed, FaceEmbedder, Gallery, GalleryError};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use selection::{select_primary_face, DEFAULT_MIN_FACE_SIZE};
pub use types::{BoundingBox, CosineMatcher, Embedding, KnownFace, MatchResult, Matcher};

/// Identity shown when a face matches nobody in the gallery.
pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// SCRFD detection model file name.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// FER+ expression model file name.
pub const EMOTION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";
/// ArcFace recognition model file name.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/moodcam/models`, falling back to `~/.local/share/moodcam/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("moodcam")
        .join("models")
}
