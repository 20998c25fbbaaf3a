//! Synthetic frame source.
//!
//! Produces a deterministic BGR test pattern at a paced frame rate, so the
//! whole capture/record/notify path can run without hardware. The provider
//! can pretend only some ids are connected and can end every stream after
//! a fixed number of frames to exercise the end-of-stream path.

use std::time::{Duration, Instant};

use super::{FrameSource, SourceProperties, SourceProvider};
use crate::error::{OpenError, ReadError};
use crate::frame::{CameraId, Frame, PixelLayout};

/// Configuration for synthetic sources.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Pacing rate. 0 disables pacing.
    pub fps: u32,
    /// Ids that "have a device". `None` means every id opens.
    pub available: Option<Vec<CameraId>>,
    /// End each stream after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            available: None,
            frame_limit: None,
        }
    }
}

pub struct SyntheticProvider {
    config: SyntheticConfig,
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    fn is_connected(&self, camera_id: CameraId) -> bool {
        self.config
            .available
            .as_ref()
            .map_or(true, |ids| ids.contains(&camera_id))
    }
}

impl SourceProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, camera_id: CameraId) -> Result<Box<dyn FrameSource>, OpenError> {
        if !self.is_connected(camera_id) {
            return Err(OpenError::device_unavailable(
                camera_id,
                "no synthetic device connected",
            ));
        }
        if self.config.width == 0 || self.config.height == 0 {
            return Err(OpenError::device_unavailable(
                camera_id,
                "synthetic frame size must be non-zero",
            ));
        }
        log::info!(
            "SyntheticSource: connected camera {} ({}x{}@{})",
            camera_id,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(Box::new(SyntheticSource::new(camera_id, self.config.clone())))
    }
}

pub struct SyntheticSource {
    camera_id: CameraId,
    config: SyntheticConfig,
    frame_count: u64,
    next_due: Option<Instant>,
    released: bool,
}

impl SyntheticSource {
    pub fn new(camera_id: CameraId, config: SyntheticConfig) -> Self {
        Self {
            camera_id,
            config,
            frame_count: 0,
            next_due: None,
            released: false,
        }
    }

    /// The BGR pixels produced for frame number `sequence`.
    ///
    /// Channel values within a pixel are consecutive, so pure primaries
    /// never occur in the pattern.
    pub fn pattern(width: u32, height: u32, sequence: u64) -> Vec<u8> {
        let len = (width as usize) * (height as usize) * 3;
        (0..len)
            .map(|i| ((i as u64).wrapping_add(sequence) % 256) as u8)
            .collect()
    }

    fn frame_interval(&self) -> Option<Duration> {
        if self.config.fps == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.config.fps as f64))
        }
    }

    fn pace(&mut self) {
        let Some(interval) = self.frame_interval() else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + interval);
    }
}

impl FrameSource for SyntheticSource {
    fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        if self.released {
            return Err(ReadError::end_of_stream(self.camera_id, "device released"));
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Err(ReadError::end_of_stream(
                    self.camera_id,
                    format!("synthetic stream ended after {} frames", limit),
                ));
            }
        }

        self.pace();
        self.frame_count += 1;

        let pixels = Self::pattern(self.config.width, self.config.height, self.frame_count);
        Frame::new(
            self.camera_id,
            self.config.width,
            self.config.height,
            PixelLayout::Bgr24,
            self.frame_count,
            pixels,
        )
        .ok_or_else(|| ReadError::end_of_stream(self.camera_id, "synthetic frame size overflow"))
    }

    fn properties(&self) -> SourceProperties {
        SourceProperties {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps as f64,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::info!("SyntheticSource: released camera {}", self.camera_id);
        }
    }
}
