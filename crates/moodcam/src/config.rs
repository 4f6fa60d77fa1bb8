use crate::session::{ModeFlags, SessionOptions};
use moodcam_core::gallery::DEFAULT_SIMILARITY_THRESHOLD;
use moodcam_core::{WatchSet, DEFAULT_CAPTURE_COOLDOWN, DEFAULT_MIN_FACE_SIZE};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Where snapshots are written (created on startup).
    pub snapshot_dir: PathBuf,
    /// Reference images for identity matching.
    pub known_faces_dir: PathBuf,
    /// Minimum interval between automatic captures of the same emotion.
    pub capture_cooldown: Duration,
    /// Faces narrower or shorter than this are ignored; 0 disables the filter.
    pub min_face_size: f32,
    /// Cosine similarity threshold for a positive identity match.
    pub similarity_threshold: f32,
    /// Emotions that trigger an automatic capture.
    pub watch: WatchSet,
    /// Boolean switches (`MOODCAM_AUTO_CAPTURE`, `MOODCAM_DEBUG`,
    /// `MOODCAM_IDENTIFY`) are off for "0", "false", "off" or "no" and on
    /// for anything else.
    pub auto_capture: bool,
    pub debug: bool,
    /// Whether to match faces against the known-face gallery.
    pub identify: bool,
    /// TrueType font for overlay text; common system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `MOODCAM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let watch = match var("MOODCAM_WATCH_EMOTIONS") {
            Some(list) => list.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, value = %list, "invalid MOODCAM_WATCH_EMOTIONS; using defaults");
                WatchSet::default()
            }),
            None => WatchSet::default(),
        };

        // try_from rejects negative, NaN and out-of-range values.
        let cooldown_secs = parsed(&var, "MOODCAM_CAPTURE_COOLDOWN_SECS")
            .and_then(|s: f32| Duration::try_from_secs_f32(s).ok())
            .unwrap_or(DEFAULT_CAPTURE_COOLDOWN);

        Self {
            camera_device: var("MOODCAM_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: var("MOODCAM_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(moodcam_core::default_model_dir),
            snapshot_dir: var("MOODCAM_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("emotion_snapshots")),
            known_faces_dir: var("MOODCAM_KNOWN_FACES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("known_faces")),
            capture_cooldown: cooldown_secs,
            min_face_size: parsed(&var, "MOODCAM_MIN_FACE_SIZE")
                .filter(|s: &f32| s.is_finite() && *s >= 0.0)
                .unwrap_or(DEFAULT_MIN_FACE_SIZE),
            similarity_threshold: parsed(&var, "MOODCAM_SIMILARITY_THRESHOLD")
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            watch,
            auto_capture: flag(&var, "MOODCAM_AUTO_CAPTURE", true),
            debug: flag(&var, "MOODCAM_DEBUG", true),
            identify: flag(&var, "MOODCAM_IDENTIFY", true),
            font_path: var("MOODCAM_FONT_PATH").map(PathBuf::from),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_path(moodcam_core::DETECTOR_MODEL_FILE)
    }

    /// Path to the FER+ expression model.
    pub fn emotion_model_path(&self) -> String {
        self.model_path(moodcam_core::EMOTION_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_path(moodcam_core::RECOGNIZER_MODEL_FILE)
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            min_face_size: self.min_face_size,
            cooldown: self.capture_cooldown,
            watch: self.watch.clone(),
            flags: ModeFlags {
                auto_capture: self.auto_capture,
                debug: self.debug,
            },
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

/// "0", "false", "off" and "no" (any case) count as off; any other value is on.
fn flag(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    var(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !matches!(v.as_str(), "0" | "false" | "off" | "no")
        })
        .unwrap_or(default)
}
