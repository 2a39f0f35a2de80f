//! Capture provider contract
//!
//! A capture provider owns the combined camera + microphone stream. The session
//! controller is its only client: it acquires one handle when the candidate
//! consents and releases it exactly once on the way to a terminal phase.
//!
//! - **Frames**: raw RGB/RGBA pixel buffers for the presence detector
//! - **Energy**: average spectral energy (0-255) for the noise detector

mod scripted;

pub use scripted::{ScriptedCapture, ScriptedFeed};

use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Per-tick read failure; the detector skips the tick
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Stream has no frame data yet")]
    NotReady,

    #[error("Capture handle was released")]
    Released,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Opaque handle to an acquired stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureHandle {
    pub id: Uuid,
    /// Human-readable device label, for logs
    pub label: String,
}

impl CaptureHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// One video frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a pixel buffer, checking its length against the dimensions
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidFrame("zero-sized frame".to_string()));
        }
        if data.len() != expected {
            return Err(CaptureError::InvalidFrame(format!(
                "expected {expected} bytes for {width}x{height} {format:?}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Frame filled with one color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Self {
            width,
            height,
            format: PixelFormat::Rgba,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Iterate pixels as `[r, g, b]`, ignoring alpha
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data
            .chunks_exact(self.format.bytes_per_pixel())
            .map(|px| [px[0], px[1], px[2]])
    }

    /// Overwrite a rectangular region with one color (clipped to the frame)
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let bpp = self.format.bytes_per_pixel();
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for row in y..y_end {
            for col in x..x_end {
                let offset = (row as usize * self.width as usize + col as usize) * bpp;
                self.data[offset..offset + 3].copy_from_slice(&rgb);
            }
        }
    }
}

/// Average of frequency-bin magnitudes, the scalar the noise detector samples
pub fn average_energy(bins: &[u8]) -> f64 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&b| b as u64).sum();
    sum as f64 / bins.len() as f64
}

/// Poll a readiness probe until the stream delivers a readable frame.
///
/// There is no internal timeout: a device that never becomes ready is
/// expected to fail the probe with a [`DeviceError`].
pub fn poll_until_ready<P, W>(mut probe: P, mut wait: W) -> Result<u32, DeviceError>
where
    P: FnMut() -> Result<bool, DeviceError>,
    W: FnMut(),
{
    let mut polls = 0;
    loop {
        polls += 1;
        if probe()? {
            return Ok(polls);
        }
        wait();
    }
}

/// Source of the combined video + audio stream
pub trait CaptureProvider {
    /// Acquire the devices. Must not succeed before a readable frame exists.
    fn acquire(&mut self) -> Result<CaptureHandle, DeviceError>;

    /// Release the devices. Safe to call repeatedly, and on handles that
    /// never finished initializing.
    fn release(&mut self, handle: &CaptureHandle);

    /// Grab the current video frame
    fn read_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError>;

    /// Sample the current audio energy (roughly 0-255)
    fn sample_energy(&mut self, handle: &CaptureHandle) -> Result<f64, CaptureError>;
}
