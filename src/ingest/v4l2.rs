//! V4L2 frame source.
//!
//! `CameraId(n)` maps to `/dev/video<n>`. The source asks for RGB24 at the
//! configured size and rate; when the driver refuses, it keeps whatever the
//! device negotiated (YUYV or NV12) and converts on the CPU.
//!
//! Frames are delivered in RGB order.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceProperties, SourceProvider};
use crate::error::{OpenError, ReadError};
use crate::frame::{CameraId, Frame, PixelLayout};

const STREAM_BUFFERS: u32 = 4;

/// Requested stream parameters, shared by every device the provider opens.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

pub struct V4l2Provider {
    config: V4l2Config,
}

impl V4l2Provider {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }
}

impl SourceProvider for V4l2Provider {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&self, camera_id: CameraId) -> Result<Box<dyn FrameSource>, OpenError> {
        V4l2Source::connect(camera_id, &self.config)
            .map(|source| Box::new(source) as Box<dyn FrameSource>)
            .map_err(|err| OpenError::device_unavailable(camera_id, format!("{:#}", err)))
    }
}

pub fn device_path(camera_id: CameraId) -> String {
    format!("/dev/video{}", camera_id.index())
}

pub struct V4l2Source {
    camera_id: CameraId,
    device_path: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    properties: SourceProperties,
    frame_count: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    fn connect(camera_id: CameraId, config: &V4l2Config) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = device_path(camera_id);
        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set RGB24 on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("unsupported pixel format {}", format.fourcc))?;

        if config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }
        let fps = device
            .params()
            .map(|params| {
                let interval = params.interval;
                if interval.numerator == 0 {
                    0.0
                } else {
                    interval.denominator as f64 / interval.numerator as f64
                }
            })
            .unwrap_or(0.0);

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?} @ {:.1} fps)",
            path,
            format.width,
            format.height,
            pixel_format,
            fps
        );

        Ok(Self {
            camera_id,
            device_path: path,
            state: Some(state),
            format: pixel_format,
            properties: SourceProperties {
                width: format.width,
                height: format.height,
                fps,
            },
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        use v4l::io::traits::CaptureStream;

        let camera_id = self.camera_id;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| ReadError::end_of_stream(camera_id, "device released"))?;
        let (width, height, format) = (
            self.properties.width,
            self.properties.height,
            self.format,
        );
        let pixels = state
            .with_mut(|fields| {
                let (buf, _meta) = fields.stream.next()?;
                normalize_to_rgb(buf, width, height, format)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
            })
            .map_err(|err| ReadError::end_of_stream(camera_id, err.to_string()))?;

        self.frame_count += 1;
        Frame::new(
            camera_id,
            width,
            height,
            PixelLayout::Rgb24,
            self.frame_count,
            pixels,
        )
        .ok_or_else(|| ReadError::end_of_stream(camera_id, "short frame from device"))
    }

    fn properties(&self) -> SourceProperties {
        self.properties
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.device_path);
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_ids_map_to_video_nodes() {
        assert_eq!(device_path(CameraId(0)), "/dev/video0");
        assert_eq!(device_path(CameraId(6)), "/dev/video6");
    }

    #[test]
    fn missing_device_is_unavailable() {
        let provider = V4l2Provider::new(V4l2Config::default());
        let err = provider.open(CameraId(250)).err().expect("no such device");
        assert!(matches!(err, OpenError::DeviceUnavailable { .. }));
    }
}
