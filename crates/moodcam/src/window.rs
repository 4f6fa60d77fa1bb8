//! Preview window and keyboard input.

use crate::session::{Command, Display, DisplayError};
use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

pub const WINDOW_TITLE: &str = "Emotion Detection";
const TARGET_FPS: usize = 30;

/// Key binding for the capture loop.
pub fn command_for_key(key: Key) -> Option<Command> {
    match key {
        Key::Q => Some(Command::Quit),
        Key::S => Some(Command::Snapshot),
        Key::C => Some(Command::ToggleAutoCapture),
        Key::D => Some(Command::ToggleDebug),
        _ => None,
    }
}

/// Pack RGB pixels as minifb's `0RGB` words.
fn pack_rgb(image: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        image
            .pixels()
            .map(|p| (u32::from(p.0[0]) << 16) | (u32::from(p.0[1]) << 8) | u32::from(p.0[2])),
    );
}

pub struct PreviewWindow {
    window: Window,
    buffer: Vec<u32>,
}

impl PreviewWindow {
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self, DisplayError> {
        let mut window = Window::new(title, width as usize, height as usize, WindowOptions::default())
            .map_err(|e| DisplayError::Window(e.to_string()))?;
        window.set_target_fps(TARGET_FPS);
        tracing::debug!(width, height, "preview window opened");
        Ok(Self {
            window,
            buffer: Vec::with_capacity((width * height) as usize),
        })
    }
}

impl Display for PreviewWindow {
    fn show(&mut self, canvas: &RgbImage) -> Result<(), DisplayError> {
        pack_rgb(canvas, &mut self.buffer);
        self.window
            .update_with_buffer(&self.buffer, canvas.width() as usize, canvas.height() as usize)
            .map_err(|e| DisplayError::Window(e.to_string()))
    }

    /// A closed window reads as `q`.
    fn poll_command(&mut self) -> Option<Command> {
        if !self.window.is_open() {
            return Some(Command::Quit);
        }
        self.window
            .get_keys_pressed(KeyRepeat::No)
            .into_iter()
            .find_map(command_for_key)
    }
}

impl Drop for PreviewWindow {
    fn drop(&mut self) {
        tracing::debug!("preview window closed");
    }
}
