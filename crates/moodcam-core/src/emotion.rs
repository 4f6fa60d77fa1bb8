//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Classifies a grayscale face crop into one of eight expressions using the
//! `emotion-ferplus-8` model from the ONNX model zoo.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: u32 = 64;

/// FER+ output order. The model is trained on raw 0–255 intensities.
const FERPLUS_CLASSES: [Emotion; 8] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Surprise,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Contempt,
];

/// Facial expression label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
    Contempt,
}

impl Emotion {
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Contempt => "contempt",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "angry" | "anger" => Ok(Emotion::Angry),
            "disgust" => Ok(Emotion::Disgust),
            "fear" => Ok(Emotion::Fear),
            "happy" | "happiness" => Ok(Emotion::Happy),
            "sad" | "sadness" => Ok(Emotion::Sad),
            "surprise" => Ok(Emotion::Surprise),
            "neutral" => Ok(Emotion::Neutral),
            "contempt" => Ok(Emotion::Contempt),
            _ => Err(UnknownEmotion(s.to_string())),
        }
    }
}

/// Classifier output for one face.
#[derive(Debug, Clone, Serialize)]
pub struct EmotionPrediction {
    /// Highest-probability label.
    pub dominant: Emotion,
    /// Probability of the dominant label.
    pub confidence: f32,
    /// Probability per label, in model output order.
    pub scores: Vec<(Emotion, f32)>,
}

impl EmotionPrediction {
    /// Build a prediction from raw logits in FER+ class order.
    fn from_logits(logits: &[f32]) -> Option<Self> {
        if logits.len() != FERPLUS_CLASSES.len() {
            return None;
        }
        let probs = softmax(logits);
        let scores: Vec<(Emotion, f32)> = FERPLUS_CLASSES.iter().copied().zip(probs).collect();
        let (dominant, confidence) = scores.iter().copied().fold(scores[0], |best, cur| {
            if cur.1 > best.1 { cur } else { best }
        });
        Some(Self {
            dominant,
            confidence,
            scores,
        })
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("model file not found: {0} — download emotion-ferplus-8.onnx and place in models/")]
    ModelNotFound(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FER+-based emotion classifier.
pub struct EmotionClassifier {
    session: Session,
}

impl EmotionClassifier {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmotionError> {
        if !Path::new(model_path).exists() {
            return Err(EmotionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }

    /// Classify the expression of `face` in a grayscale frame.
    pub fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<EmotionPrediction, EmotionError> {
        let input = preprocess(frame, width, height, face)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmotionError::InferenceFailed(format!("logits: {e}")))?;

        EmotionPrediction::from_logits(logits).ok_or_else(|| {
            EmotionError::InferenceFailed(format!(
                "expected {} logits, got {}",
                FERPLUS_CLASSES.len(),
                logits.len()
            ))
        })
    }
}

/// Crop the face from a grayscale frame and resize it into a `[1, 1, 64, 64]` tensor.
fn preprocess(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
) -> Result<Array4<f32>, EmotionError> {
    let (x, y, w, h) = face.clamped_rect(width, height).ok_or(EmotionError::EmptyCrop)?;
    let gray = GrayImage::from_raw(width, height, frame.to_vec()).ok_or_else(|| {
        EmotionError::InferenceFailed(format!(
            "grayscale buffer of {} bytes does not match {width}x{height}",
            frame.len()
        ))
    })?;

    let crop = imageops::crop_imm(&gray, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE, FilterType::Triangle);

    let size = FERPLUS_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (px, py, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, py as usize, px as usize]] = pixel.0[0] as f32;
    }
    Ok(tensor)
}
