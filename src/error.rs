//! Error taxonomy for the capture/record core.
//!
//! Every variant here is scoped to a single camera or a single message.
//! None of them is allowed to escalate past the controller (or adapter)
//! that produced it; callers turn them into status text and keep going.

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::CameraId;

/// Failure to acquire a capture device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// Not connected, already in use, or an invalid index.
    #[error("camera {camera_id} unavailable: {reason}")]
    DeviceUnavailable { camera_id: CameraId, reason: String },
    /// The configured backend was not compiled into this build.
    #[error("camera {camera_id}: backend '{backend}' is not supported by this build")]
    Unsupported {
        camera_id: CameraId,
        backend: String,
    },
}

impl OpenError {
    pub fn device_unavailable(camera_id: CameraId, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            camera_id,
            reason: reason.into(),
        }
    }
}

/// Failure to read from an open capture device. Terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("end of stream on camera {camera_id}: {reason}")]
    EndOfStream { camera_id: CameraId, reason: String },
}

impl ReadError {
    pub fn end_of_stream(camera_id: CameraId, reason: impl Into<String>) -> Self {
        Self::EndOfStream {
            camera_id,
            reason: reason.into(),
        }
    }
}

/// Failures around a recording session. Logged, never fatal to the loop.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("failed to create recording directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create recording file {}: {reason}", path.display())]
    CreateFile { path: PathBuf, reason: String },
    #[error("codec '{0}' requires the record-ffmpeg feature")]
    UnsupportedCodec(String),
    #[error("frame is {actual_width}x{actual_height}, recording expects {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("failed to write frame to {}: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },
    #[error("failed to finalize {}: {reason}", path.display())]
    Finish { path: PathBuf, reason: String },
}

/// Inbound command payload could not be honored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload does not contain the app")]
    MissingApp,
}

/// Lifecycle misuse of a camera controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("camera {0} is not opened")]
    NotOpened(CameraId),
    #[error("failed to spawn acquisition loop for camera {camera_id}: {reason}")]
    Spawn { camera_id: CameraId, reason: String },
}
