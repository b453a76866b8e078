//! Kiosk window backed by `minifb`.

use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use thiserror::Error;

const TARGET_FPS: usize = 30;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to open window: {0}")]
    Open(String),
    #[error("failed to present frame: {0}")]
    Present(String),
}

pub struct Display {
    window: Window,
    buffer: Vec<u32>,
}

impl Display {
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self, DisplayError> {
        let mut window = Window::new(title, width as usize, height as usize, WindowOptions::default())
            .map_err(|e| DisplayError::Open(e.to_string()))?;
        window.set_target_fps(TARGET_FPS);
        tracing::debug!(width, height, "window opened");
        Ok(Self {
            window,
            buffer: Vec::with_capacity((width * height) as usize),
        })
    }

    /// False once the window is closed or `q`/`Esc` is held.
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Q) && !self.window.is_key_down(Key::Escape)
    }

    pub fn show(&mut self, canvas: &RgbImage) -> Result<(), DisplayError> {
        pack_rgb(canvas, &mut self.buffer);
        self.window
            .update_with_buffer(&self.buffer, canvas.width() as usize, canvas.height() as usize)
            .map_err(|e| DisplayError::Present(e.to_string()))
    }
}

/// Pack RGB pixels into minifb's `0RGB` u32 layout.
fn pack_rgb(canvas: &RgbImage, out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        canvas
            .pixels()
            .map(|p| (u32::from(p.0[0]) << 16) | (u32::from(p.0[1]) << 8) | u32::from(p.0[2])),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_pack_rgb() {
        let mut canvas = RgbImage::new(2, 1);
        canvas.put_pixel(0, 0, Rgb([0x12, 0x34, 0x56]));
        canvas.put_pixel(1, 0, Rgb([0xff, 0x00, 0x80]));
        let mut out = vec![7; 5];
        pack_rgb(&canvas, &mut out);
        assert_eq!(out, vec![0x0012_3456, 0x00ff_0080]);
    }
}
