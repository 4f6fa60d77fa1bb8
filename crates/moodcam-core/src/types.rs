use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
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
    /// Box without landmarks, as produced by detectors that only localise.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to a `frame_w × frame_h` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clamped_rect(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(frame_w);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(frame_h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// A reference face loaded from the known-faces directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFace {
    /// Identity shown on screen when this face is the best match.
    pub identity: String,
    /// Image the embedding was extracted from.
    pub source: PathBuf,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the known faces.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate [-1, 1].
    pub similarity: f32,
    /// Identity of the matched face (if any).
    pub identity: Option<String>,
}

impl MatchResult {
    /// Identity to display: the matched name, or "Unknown".
    pub fn display_name(&self) -> &str {
        match (&self.identity, self.matched) {
            (Some(name), true) => name.as_str(),
            _ => crate::UNKNOWN_IDENTITY,
        }
    }
}

/// Strategy for comparing a probe embedding against the known faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, known: &[KnownFace], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over cosine similarity.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, known: &[KnownFace], threshold: f32) -> MatchResult {
        let best = known
            .iter()
            .map(|face| (face, probe.similarity(&face.embedding)))
            .fold(None::<(&KnownFace, f32)>, |best, (face, sim)| match best {
                Some((_, best_sim)) if best_sim >= sim => best,
                _ => Some((face, sim)),
            });

        match best {
            Some((face, sim)) if sim >= threshold => MatchResult {
                matched: true,
                similarity: sim,
                identity: Some(face.identity.clone()),
            },
            Some((_, sim)) => MatchResult {
                matched: false,
                similarity: sim,
                identity: None,
            },
            None => MatchResult {
                matched: false,
                similarity: 0.0,
                identity: None,
            },
        }
    }
}
