//! Frame sources.
//!
//! This module provides the device side of the capture core:
//! - `FrameSource`: one opened device, pull-based and synchronous
//! - `SourceProvider`: opens a `FrameSource` for a `CameraId`
//! - Synthetic provider (tests, demos, headless rigs)
//! - V4L2 provider (feature: ingest-v4l2)
//!
//! Sources hold at most one frame in flight. A read error is terminal for
//! the session; callers release the source and do not retry.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{CameraSettings, SourceBackend};
use crate::error::{OpenError, ReadError};
use crate::frame::{CameraId, Frame};

pub use synthetic::{SyntheticConfig, SyntheticProvider, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Provider, V4l2Source};

/// Native stream properties reported by an opened device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceProperties {
    pub width: u32,
    pub height: u32,
    /// Device-reported frame rate; 0.0 when the device does not say.
    pub fps: f64,
}

/// An opened capture device. Exclusively owned by one camera controller.
pub trait FrameSource: Send {
    fn camera_id(&self) -> CameraId;

    /// Block for the next frame.
    fn read_frame(&mut self) -> std::result::Result<Frame, ReadError>;

    fn properties(&self) -> SourceProperties;

    /// Give the device back. Must be safe to call more than once.
    fn release(&mut self);
}

/// Opens capture devices by id.
pub trait SourceProvider: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn open(&self, camera_id: CameraId) -> std::result::Result<Box<dyn FrameSource>, OpenError>;
}

/// Build the provider selected by configuration.
pub fn provider_for(settings: &CameraSettings) -> Result<Arc<dyn SourceProvider>> {
    match settings.backend {
        SourceBackend::Synthetic => Ok(Arc::new(SyntheticProvider::new(SyntheticConfig {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            available: settings.synthetic_available.clone(),
            frame_limit: settings.synthetic_frame_limit,
        }))),
        #[cfg(feature = "ingest-v4l2")]
        SourceBackend::V4l2 => Ok(Arc::new(V4l2Provider::new(v4l2::V4l2Config {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
        }))),
        #[cfg(not(feature = "ingest-v4l2"))]
        SourceBackend::V4l2 => {
            anyhow::bail!("camera backend 'v4l2' requires the ingest-v4l2 feature")
        }
    }
}
