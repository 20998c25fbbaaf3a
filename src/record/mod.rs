//! Recording sinks.
//!
//! A `RecordingSession` encodes raw frames from one camera into one
//! container file:
//!
//! ```text
//! <output_root>/<YYYY_MM_DD_HH_MM_SS>/cam_<id>.<ext>
//! ```
//!
//! Codec/container pairs:
//! - `mp4v` → `.mp4` (MPEG-4 Part 2, feature: record-ffmpeg)
//! - `mjpeg` → `.avi` (Motion JPEG, feature: record-ffmpeg)
//! - `y4m` → `.y4m` (uncompressed YUV4MPEG2 4:4:4, always available)
//!
//! Sessions are written to exclusively from the owning controller's
//! acquisition loop, always under the controller's recording lock.

#[cfg(feature = "record-ffmpeg")]
mod ffmpeg;
pub mod snapshot;
pub mod y4m;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::RecordingError;
use crate::frame::{CameraId, Frame};
use crate::ingest::SourceProperties;

pub use snapshot::save_png;
pub use y4m::Y4mWriter;

/// Wall-clock stamp naming a session directory.
pub const SESSION_STAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp4v,
    Mjpeg,
    Y4m,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Codec::Mp4v => "mp4v",
            Codec::Mjpeg => "mjpeg",
            Codec::Y4m => "y4m",
        }
    }

    /// Container file extension.
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Mp4v => "mp4",
            Codec::Mjpeg => "avi",
            Codec::Y4m => "y4m",
        }
    }

    /// Whether this build can encode the codec.
    pub fn is_available(self) -> bool {
        match self {
            Codec::Y4m => true,
            Codec::Mp4v | Codec::Mjpeg => cfg!(feature = "record-ffmpeg"),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        if cfg!(feature = "record-ffmpeg") {
            Codec::Mp4v
        } else {
            Codec::Y4m
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mp4v" | "mp4" => Ok(Codec::Mp4v),
            "mjpeg" | "mjpg" | "avi" => Ok(Codec::Mjpeg),
            "y4m" | "raw" => Ok(Codec::Y4m),
            other => Err(anyhow::anyhow!(
                "unknown codec '{}': expected 'mp4v', 'mjpeg' or 'y4m'",
                other
            )),
        }
    }
}

/// Where and how a controller records.
#[derive(Clone, Debug)]
pub struct RecordingSettings {
    pub output_root: PathBuf,
    /// Fixed container frame rate, independent of the measured capture rate.
    pub target_fps: u32,
    pub codec: Codec,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("video"),
            target_fps: 30,
            codec: Codec::default(),
        }
    }
}

pub fn session_stamp(now: DateTime<Local>) -> String {
    now.format(SESSION_STAMP_FORMAT).to_string()
}

/// Pick a session directory under `root` that does not exist yet.
///
/// The directory itself is created lazily by the first camera that writes
/// into it. A second session started within the same wall-clock second
/// gets a `_<n>` suffix.
pub fn allocate_session_dir(root: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = session_stamp(now);
    let first = root.join(&stamp);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| root.join(format!("{}_{}", stamp, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

pub fn file_name(camera_id: CameraId, extension: &str) -> String {
    format!("cam_{}.{}", camera_id, extension)
}

enum SinkBackend {
    Y4m(Y4mWriter),
    #[cfg(feature = "record-ffmpeg")]
    Ffmpeg(ffmpeg::FfmpegWriter),
}

/// One active recording for one camera.
pub struct RecordingSession {
    camera_id: CameraId,
    dir: PathBuf,
    path: PathBuf,
    codec: Codec,
    target_fps: u32,
    width: u32,
    height: u32,
    sink: Option<SinkBackend>,
    frames_written: u64,
    write_failures: u64,
}

impl RecordingSession {
    /// Create `dir` if needed and open `cam_<id>.<ext>` inside it, sized to
    /// the source's native resolution.
    pub fn create(
        dir: &Path,
        camera_id: CameraId,
        properties: SourceProperties,
        settings: &RecordingSettings,
    ) -> Result<Self, RecordingError> {
        if !settings.codec.is_available() {
            return Err(RecordingError::UnsupportedCodec(
                settings.codec.name().to_string(),
            ));
        }
        std::fs::create_dir_all(dir).map_err(|source| RecordingError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(file_name(camera_id, settings.codec.extension()));
        let (width, height) = (properties.width, properties.height);
        let sink = match settings.codec {
            Codec::Y4m => SinkBackend::Y4m(Y4mWriter::create(
                &path,
                width,
                height,
                settings.target_fps,
            )?),
            #[cfg(feature = "record-ffmpeg")]
            Codec::Mp4v | Codec::Mjpeg => SinkBackend::Ffmpeg(ffmpeg::FfmpegWriter::create(
                &path,
                settings.codec,
                width,
                height,
                settings.target_fps,
            )?),
            #[cfg(not(feature = "record-ffmpeg"))]
            Codec::Mp4v | Codec::Mjpeg => {
                return Err(RecordingError::UnsupportedCodec(
                    settings.codec.name().to_string(),
                ))
            }
        };

        log::info!(
            "recording camera({}) info : ({},{}@{:.1}) -> {} [{}@{}fps]",
            camera_id,
            width,
            height,
            properties.fps,
            path.display(),
            settings.codec,
            settings.target_fps
        );

        Ok(Self {
            camera_id,
            dir: dir.to_path_buf(),
            path,
            codec: settings.codec,
            target_fps: settings.target_fps,
            width,
            height,
            sink: Some(sink),
            frames_written: 0,
            write_failures: 0,
        })
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Encode one raw frame.
    pub fn write(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        let result = self.write_inner(frame);
        match result {
            Ok(()) => self.frames_written += 1,
            Err(_) => self.write_failures += 1,
        }
        result
    }

    fn write_inner(&mut self, frame: &Frame) -> Result<(), RecordingError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(RecordingError::DimensionMismatch {
                width: self.width,
                height: self.height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }
        match self.sink.as_mut() {
            Some(SinkBackend::Y4m(writer)) => writer.write(frame),
            #[cfg(feature = "record-ffmpeg")]
            Some(SinkBackend::Ffmpeg(writer)) => writer.write(frame),
            None => Err(RecordingError::WriteFailure {
                path: self.path.clone(),
                reason: "session already finished".to_string(),
            }),
        }
    }

    /// Flush and close the container. Returns the file path.
    pub fn finish(mut self) -> Result<PathBuf, RecordingError> {
        self.finish_sink()?;
        Ok(self.path.clone())
    }

    fn finish_sink(&mut self) -> Result<(), RecordingError> {
        let result = match self.sink.take() {
            Some(SinkBackend::Y4m(writer)) => writer.finish(),
            #[cfg(feature = "record-ffmpeg")]
            Some(SinkBackend::Ffmpeg(writer)) => writer.finish(),
            None => return Ok(()),
        };
        log::info!(
            "recording camera({}) closed: {} frames -> {}",
            self.camera_id,
            self.frames_written,
            self.path.display()
        );
        result
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Err(err) = self.finish_sink() {
            log::warn!("recording camera({}) finalize failed: {}", self.camera_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn session_stamp_uses_underscored_fields() {
        assert_eq!(session_stamp(fixed_now()), "2024_03_09_07_05_01");
    }

    #[test]
    fn allocate_session_dir_avoids_existing_directories() {
        let root = tempfile::tempdir().expect("tempdir");
        let first = allocate_session_dir(root.path(), fixed_now());
        assert_eq!(first, root.path().join("2024_03_09_07_05_01"));

        std::fs::create_dir_all(&first).expect("mkdir");
        let second = allocate_session_dir(root.path(), fixed_now());
        assert_eq!(second, root.path().join("2024_03_09_07_05_01_1"));
    }

    #[test]
    fn codec_names_round_trip_through_from_str() {
        for codec in [Codec::Mp4v, Codec::Mjpeg, Codec::Y4m] {
            assert_eq!(codec.name().parse::<Codec>().expect("parse"), codec);
        }
        assert!("h265".parse::<Codec>().is_err());
    }

    #[test]
    fn file_name_uses_camera_id_and_extension() {
        assert_eq!(file_name(CameraId(4), Codec::Mp4v.extension()), "cam_4.mp4");
        assert_eq!(file_name(CameraId(0), Codec::Mjpeg.extension()), "cam_0.avi");
    }

    #[cfg(not(feature = "record-ffmpeg"))]
    #[test]
    fn ffmpeg_codecs_are_rejected_without_feature() {
        let root = tempfile::tempdir().expect("tempdir");
        let settings = RecordingSettings {
            output_root: root.path().to_path_buf(),
            target_fps: 30,
            codec: Codec::Mp4v,
        };
        let props = SourceProperties {
            width: 4,
            height: 4,
            fps: 30.0,
        };
        let err = RecordingSession::create(root.path(), CameraId(0), props, &settings)
            .err()
            .expect("unsupported");
        assert!(matches!(err, RecordingError::UnsupportedCodec(_)));
    }
}
