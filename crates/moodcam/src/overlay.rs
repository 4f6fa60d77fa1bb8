//! Annotations drawn onto the display copy of each frame.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use moodcam_core::{BoundingBox, Emotion, WatchSet};
use std::path::{Path, PathBuf};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

const LABEL_SCALE: f32 = 24.0;
const STATUS_SCALE: f32 = 18.0;
const LEGEND: &str = "q: quit  s: snapshot  c: auto-capture  d: debug";

const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

fn read_font(path: &Path) -> Option<FontVec> {
    let bytes = std::fs::read(path).ok()?;
    FontVec::try_from_vec(bytes).ok()
}

/// Draws face boxes, labels and status lines. Without a font only boxes are drawn.
pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    /// Use `configured` if given, else the first common system font found.
    pub fn load(configured: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from))
            .collect();

        for path in &candidates {
            if let Some(font) = read_font(path) {
                tracing::debug!(path = %path.display(), "overlay font loaded");
                return Self { font: Some(font) };
            }
            if Some(path.as_path()) == configured {
                tracing::warn!(path = %path.display(), "configured font unusable; trying system fonts");
            }
        }

        tracing::warn!("no usable font found; overlay text disabled (set MOODCAM_FONT_PATH)");
        Self::without_text()
    }

    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn has_text(&self) -> bool {
        self.font.is_some()
    }

    /// Green rectangle, 2px thick, around `face`.
    pub fn face_box(&self, canvas: &mut RgbImage, face: &BoundingBox) {
        let x = face.x.round() as i32;
        let y = face.y.round() as i32;
        let w = face.width.round().max(1.0) as u32;
        let h = face.height.round().max(1.0) as u32;

        draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w, h), GREEN);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(canvas, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), GREEN);
        }
    }

    /// Emotion name just above the face box.
    pub fn emotion_label(&self, canvas: &mut RgbImage, face: &BoundingBox, emotion: Emotion) {
        let y = face.y.round() as i32 - LABEL_SCALE as i32 - 4;
        self.text(canvas, face.x.round() as i32, y, LABEL_SCALE, GREEN, emotion.as_str());
    }

    /// `User: {name}` just below the face box.
    pub fn identity_label(&self, canvas: &mut RgbImage, face: &BoundingBox, name: &str) {
        let y = (face.y + face.height).round() as i32 + 4;
        self.text(canvas, face.x.round() as i32, y, LABEL_SCALE, GREEN, &format!("User: {name}"));
    }

    /// `Captured: {emotion}` near the top-left corner.
    pub fn capture_notice(&self, canvas: &mut RgbImage, emotion: Emotion) {
        self.text(canvas, 10, 40, LABEL_SCALE, RED, &format!("Captured: {emotion}"));
    }

    /// Key legend at the top; auto-capture state (and watched emotions when on) at the bottom.
    pub fn status(&self, canvas: &mut RgbImage, auto_capture: bool, watch: &WatchSet) {
        let bottom = canvas.height() as i32;
        self.text(canvas, 10, 10, STATUS_SCALE, WHITE, LEGEND);

        let state = if auto_capture { "ON" } else { "OFF" };
        self.text(canvas, 10, bottom - 28, STATUS_SCALE, YELLOW, &format!("Auto-capture: {state}"));
        if auto_capture {
            self.text(canvas, 10, bottom - 52, STATUS_SCALE, YELLOW, &format!("Capturing: {watch}"));
        }
    }

    fn text(&self, canvas: &mut RgbImage, x: i32, y: i32, scale: f32, color: Rgb<u8>, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y.max(0), PxScale::from(scale), font, text);
        }
    }
}
