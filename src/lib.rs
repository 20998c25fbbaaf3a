//! Cabin Camera Recorder
//!
//! Multi-camera capture and recording core for a driving-simulator cabin.
//!
//! # Architecture
//!
//! Every configured camera gets its own controller and acquisition loop:
//!
//! 1. **Per-camera isolation**: a device failure, end of stream, or write
//!    error affects only the camera that produced it.
//! 2. **Raw recordings**: recorded frames are the frames as read from the
//!    device; the fps label exists only on the display copy.
//! 3. **One session layout**: `<output_root>/<YYYY_MM_DD_HH_MM_SS>/cam_<id>.<ext>`.
//! 4. **Remote control**: recording start/stop arrives over a pub/sub command
//!    channel, with loop suppression on the application name.
//!
//! # Module Structure
//!
//! - `frame`: `CameraId` and `Frame`
//! - `ingest`: frame sources (synthetic, V4L2)
//! - `record`: recording sessions, codecs, PNG snapshots
//! - `overlay`: display label rendering
//! - `controller` / `registry`: per-camera state machine and fan-out
//! - `consumer`: frame and status delivery
//! - `command`: command channel adapter and MQTT transport
//! - `config`: JSON + env configuration

pub mod command;
pub mod config;
pub mod consumer;
pub mod controller;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod record;
pub mod registry;
pub mod ui;

pub use command::{CommandAdapter, CommandTable, CommandTopics, Disposition, DropReason, Publisher, Route};
pub use config::{BrokerSettings, CameraSettings, RecorderConfig, SourceBackend};
pub use consumer::{frame_channel, FrameConsumer, FrameEvent, LogStatus, StatusHistory, StatusSink};
pub use controller::{CameraController, ControllerSettings, ControllerState, RecordingOutcome};
pub use error::{ControllerError, OpenError, PayloadError, ReadError, RecordingError};
pub use frame::{CameraId, Frame, PixelLayout};
pub use ingest::{FrameSource, SourceProperties, SourceProvider};
pub use record::{Codec, RecordingSession, RecordingSettings};
pub use registry::{CameraStatus, ControllerRegistry, FanOutReport, Operation};
