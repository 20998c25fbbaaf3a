//! Camera identifiers and decoded frames.
//!
//! - `CameraId`: stable device identifier, assigned at configuration time.
//! - `Frame`: one decoded image owned by exactly one holder at a time.
//!
//! Frames are moved from the source into the acquisition loop, and the
//! display copy is moved into the consumer. There is no shared mutable
//! frame state anywhere in the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Stable identifier naming a physical device (`/dev/video<id>` on Linux).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl CameraId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CameraId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for CameraId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(CameraId)
    }
}

/// Interleaved 8-bit, 3-channel pixel orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Device-native order for most capture stacks.
    Bgr24,
    /// Display order.
    Rgb24,
}

impl PixelLayout {
    pub const fn channels(self) -> u32 {
        3
    }
}

/// One decoded image.
#[derive(Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Per-session read counter, starting at 1.
    pub sequence: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a pixel buffer. Returns `None` when the buffer length does not
    /// match `width * height * channels`.
    pub fn new(
        camera_id: CameraId,
        width: u32,
        height: u32,
        layout: PixelLayout,
        sequence: u64,
        data: Vec<u8>,
    ) -> Option<Self> {
        if expected_len(width, height, layout)? != data.len() {
            return None;
        }
        Some(Self {
            camera_id,
            width,
            height,
            layout,
            sequence,
            captured_at: Instant::now(),
            data,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// RGB pixel triple at (x, y), independent of storage layout.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 3;
        let px = self.data.get(offset..offset + 3)?;
        Some(match self.layout {
            PixelLayout::Rgb24 => [px[0], px[1], px[2]],
            PixelLayout::Bgr24 => [px[2], px[1], px[0]],
        })
    }

    /// Copy of this frame in RGB order, suitable for display.
    pub fn to_rgb(&self) -> Frame {
        let data = match self.layout {
            PixelLayout::Rgb24 => self.data.clone(),
            PixelLayout::Bgr24 => swap_red_blue(&self.data),
        };
        Frame {
            camera_id: self.camera_id,
            width: self.width,
            height: self.height,
            layout: PixelLayout::Rgb24,
            sequence: self.sequence,
            captured_at: self.captured_at,
            data,
        }
    }

    pub(crate) fn replace_pixels(&mut self, data: Vec<u8>) {
        debug_assert_eq!(data.len(), self.data.len());
        self.data = data;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("camera_id", &self.camera_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn expected_len(width: u32, height: u32, layout: PixelLayout) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(layout.channels() as usize)
}

fn swap_red_blue(pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len());
    for px in pixels.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}
