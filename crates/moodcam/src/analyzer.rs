//! Per-face analysis behind the capture loop.

use crate::config::Config;
use image::GrayImage;
use moodcam_core::{
    BoundingBox, DetectAndEmbed, DetectorError, EmotionClassifier, EmotionError,
    EmotionPrediction, FaceDetector, FaceRecognizer, Gallery, GalleryError, MatchResult,
    RecognizerError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("emotion: {0}")]
    Emotion(#[from] EmotionError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
}

/// Face detection, expression classification and optional identification
/// over a grayscale frame.
pub trait FaceAnalyzer {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<BoundingBox>, AnalysisError>;

    fn classify(
        &mut self,
        gray: &GrayImage,
        face: &BoundingBox,
    ) -> Result<EmotionPrediction, AnalysisError>;

    /// Whether [`FaceAnalyzer::identify`] should be called at all.
    fn identifies(&self) -> bool;

    fn identify(&mut self, gray: &GrayImage, face: &BoundingBox)
        -> Result<MatchResult, AnalysisError>;
}

struct Identification {
    recognizer: FaceRecognizer,
    gallery: Gallery,
}

/// SCRFD + FER+ (+ ArcFace against the known-face gallery).
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    emotion: EmotionClassifier,
    identification: Option<Identification>,
}

impl OnnxAnalyzer {
    /// Load the models named by `config`.
    ///
    /// The detector and the emotion model are required. Identification is
    /// disabled, with a log line, when it is turned off, the ArcFace model is
    /// missing or the gallery holds no usable face.
    pub fn load(config: &Config) -> Result<Self, AnalysisError> {
        let mut detector = FaceDetector::load(&config.detector_model_path())?;
        let emotion = EmotionClassifier::load(&config.emotion_model_path())?;

        let identification = if config.identify {
            load_identification(config, &mut detector)?
        } else {
            tracing::info!("identity matching disabled");
            None
        };

        Ok(Self {
            detector,
            emotion,
            identification,
        })
    }
}

fn load_identification(
    config: &Config,
    detector: &mut FaceDetector,
) -> Result<Option<Identification>, AnalysisError> {
    let mut recognizer = match FaceRecognizer::load(&config.recognizer_model_path()) {
        Ok(r) => r,
        Err(RecognizerError::ModelNotFound(path)) => {
            tracing::warn!(path = %path, "ArcFace model not found; identity matching disabled");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let gallery = build_gallery(config, detector, &mut recognizer)?;
    if gallery.is_empty() {
        tracing::info!(
            dir = %config.known_faces_dir.display(),
            "no known faces; identity matching disabled"
        );
        return Ok(None);
    }

    Ok(Some(Identification {
        recognizer,
        gallery,
    }))
}

/// Embed every reference image under the configured known-faces directory.
pub fn build_gallery(
    config: &Config,
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
) -> Result<Gallery, GalleryError> {
    let mut embedder = DetectAndEmbed {
        detector,
        recognizer,
    };
    Gallery::build(
        &config.known_faces_dir,
        &mut embedder,
        config.similarity_threshold,
    )
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<BoundingBox>, AnalysisError> {
        let (w, h) = gray.dimensions();
        Ok(self.detector.detect(gray.as_raw(), w, h)?)
    }

    fn classify(
        &mut self,
        gray: &GrayImage,
        face: &BoundingBox,
    ) -> Result<EmotionPrediction, AnalysisError> {
        let (w, h) = gray.dimensions();
        Ok(self.emotion.classify(gray.as_raw(), w, h, face)?)
    }

    fn identifies(&self) -> bool {
        self.identification.is_some()
    }

    fn identify(
        &mut self,
        gray: &GrayImage,
        face: &BoundingBox,
    ) -> Result<MatchResult, AnalysisError> {
        let Some(id) = self.identification.as_mut() else {
            return Ok(MatchResult {
                matched: false,
                similarity: 0.0,
                identity: None,
            });
        };
        let (w, h) = gray.dimensions();
        let embedding = id.recognizer.extract(gray.as_raw(), w, h, face)?;
        let result = id.gallery.identify(&embedding);
        tracing::debug!(
            matched = result.matched,
            similarity = result.similarity,
            identity = result.display_name(),
            "identity match"
        );
        Ok(result)
    }
}
