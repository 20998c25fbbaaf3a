//! Controller registry.
//!
//! Built once at startup from the configured camera ids. Controllers that
//! fail to open stay in the map as `Unavailable` so targeted commands can
//! report failure. Fan-out operations visit every controller and collect a
//! `FanOutReport`; one camera's failure never stops the loop.

use chrono::Local;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::consumer::{FrameConsumer, StatusSink};
use crate::controller::{CameraController, ControllerSettings, ControllerState, RecordingOutcome};
use crate::frame::CameraId;
use crate::ingest::SourceProvider;
use crate::record;

/// Per-camera outcome of a fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub succeeded: Vec<CameraId>,
    /// Not applicable to this camera (not running, already recording, ...).
    pub skipped: Vec<CameraId>,
    pub failed: Vec<(CameraId, String)>,
}

impl FanOutReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} failed",
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }

    fn fail(&mut self, camera_id: CameraId, reason: impl ToString) {
        self.failed.push((camera_id, reason.to_string()));
    }
}

/// Single-camera operation for `dispatch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Open,
    Begin,
    StartRecording,
    StopRecording,
    CaptureImage(Duration),
    Close,
}

/// Snapshot of one controller for status displays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraStatus {
    pub camera_id: CameraId,
    pub state: ControllerState,
    pub recording: bool,
    pub frames_emitted: u64,
    pub last_error: Option<String>,
}

pub struct ControllerRegistry {
    controllers: BTreeMap<CameraId, CameraController>,
    output_root: PathBuf,
    status: Arc<dyn StatusSink>,
}

impl ControllerRegistry {
    /// Create a controller per id and attempt to open each one.
    pub fn open(
        ids: &[CameraId],
        provider: Arc<dyn SourceProvider>,
        settings: ControllerSettings,
        consumer: Arc<dyn FrameConsumer>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let output_root = settings.recording.output_root.clone();
        let mut controllers = BTreeMap::new();
        for &camera_id in ids {
            if controllers.contains_key(&camera_id) {
                log::warn!("camera {} listed twice; ignoring duplicate", camera_id);
                continue;
            }
            let controller = CameraController::new(
                camera_id,
                Arc::clone(&provider),
                settings.clone(),
                Arc::clone(&consumer),
                Arc::clone(&status),
            );
            // Failure is recorded on the controller and reported through the sink.
            let _ = controller.open();
            controllers.insert(camera_id, controller);
        }
        log::info!(
            "registry opened {} of {} camera(s) via {}",
            controllers
                .values()
                .filter(|c| c.state() == ControllerState::Opened)
                .count(),
            controllers.len(),
            provider.name()
        );
        Self {
            controllers,
            output_root,
            status,
        }
    }

    pub fn ids(&self) -> Vec<CameraId> {
        self.controllers.keys().copied().collect()
    }

    pub fn get(&self, camera_id: CameraId) -> Option<&CameraController> {
        self.controllers.get(&camera_id)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn is_recording(&self) -> bool {
        self.controllers.values().any(CameraController::is_recording)
    }

    pub fn statuses(&self) -> Vec<CameraStatus> {
        self.controllers
            .values()
            .map(|controller| CameraStatus {
                camera_id: controller.id(),
                state: controller.state(),
                recording: controller.is_recording(),
                frames_emitted: controller.frames_emitted(),
                last_error: controller.last_error(),
            })
            .collect()
    }

    /// Start acquisition on every opened controller.
    pub fn begin_all(&self) -> FanOutReport {
        let mut report = FanOutReport::default();
        for controller in self.controllers.values() {
            let camera_id = controller.id();
            match controller.state() {
                ControllerState::Opened => match controller.begin() {
                    Ok(()) => report.succeeded.push(camera_id),
                    Err(err) => report.fail(camera_id, err),
                },
                _ => report.skipped.push(camera_id),
            }
        }
        log::info!("begin all: {}", report.summary());
        report
    }

    /// Start recording on every running controller, all into one session
    /// directory.
    pub fn start_all(&self) -> FanOutReport {
        let dir = record::allocate_session_dir(&self.output_root, Local::now());
        let mut report = FanOutReport::default();
        for controller in self.controllers.values() {
            let camera_id = controller.id();
            if !controller.is_running() {
                report.skipped.push(camera_id);
                continue;
            }
            match controller.start_recording_in(&dir) {
                Ok(RecordingOutcome::Started(_)) => report.succeeded.push(camera_id),
                Ok(RecordingOutcome::AlreadyRecording(_)) | Ok(RecordingOutcome::NotRunning) => {
                    report.skipped.push(camera_id)
                }
                Err(err) => report.fail(camera_id, err),
            }
        }
        if !report.succeeded.is_empty() {
            self.status.on_status("Start Recording...");
        }
        log::info!("start recording into {}: {}", dir.display(), report.summary());
        report
    }

    pub fn stop_all(&self) -> FanOutReport {
        let mut report = FanOutReport::default();
        for controller in self.controllers.values() {
            let camera_id = controller.id();
            match controller.stop_recording() {
                Ok(Some(_)) => report.succeeded.push(camera_id),
                Ok(None) => report.skipped.push(camera_id),
                Err(err) => report.fail(camera_id, err),
            }
        }
        if !report.succeeded.is_empty() || !report.failed.is_empty() {
            self.status.on_status("Stopped Recording...");
        }
        log::info!("stop recording: {}", report.summary());
        report
    }

    /// Schedule a PNG capture on every running controller.
    pub fn capture_all(&self, delay: Duration) -> FanOutReport {
        let dir = record::allocate_session_dir(&self.output_root, Local::now());
        let mut report = FanOutReport::default();
        for controller in self.controllers.values() {
            if controller.capture_image_in(&dir, delay) {
                report.succeeded.push(controller.id());
            } else {
                report.skipped.push(controller.id());
            }
        }
        if !report.succeeded.is_empty() {
            self.status.on_status(&format!(
                "Capture Image in {} second(s)...",
                delay.as_secs()
            ));
        }
        report
    }

    /// Close every controller. Invoked once at shutdown.
    pub fn close_all(&self) -> FanOutReport {
        let mut report = FanOutReport::default();
        for controller in self.controllers.values() {
            let camera_id = controller.id();
            if controller.state() == ControllerState::Closed && !controller.is_recording() {
                controller.close();
                report.skipped.push(camera_id);
            } else {
                controller.close();
                report.succeeded.push(camera_id);
            }
        }
        log::info!("close all: {}", report.summary());
        report
    }

    /// Run one operation against one camera.
    pub fn dispatch(&self, camera_id: CameraId, operation: Operation) -> FanOutReport {
        let mut report = FanOutReport::default();
        let Some(controller) = self.controllers.get(&camera_id) else {
            report.fail(camera_id, format!("camera {} is not configured", camera_id));
            return report;
        };
        match operation {
            Operation::Open => match controller.open() {
                Ok(()) => report.succeeded.push(camera_id),
                Err(err) => report.fail(camera_id, err),
            },
            Operation::Begin => match controller.begin() {
                Ok(()) => report.succeeded.push(camera_id),
                Err(err) => report.fail(camera_id, err),
            },
            Operation::StartRecording => match controller.start_recording() {
                Ok(RecordingOutcome::Started(path)) => {
                    self.status.on_status(&format!(
                        "camera {} Start Recording... {}",
                        camera_id,
                        path.display()
                    ));
                    report.succeeded.push(camera_id)
                }
                Ok(RecordingOutcome::AlreadyRecording(_)) => report.skipped.push(camera_id),
                Ok(RecordingOutcome::NotRunning) => {
                    report.fail(camera_id, format!("camera {} is not running", camera_id))
                }
                Err(err) => report.fail(camera_id, err),
            },
            Operation::StopRecording => match controller.stop_recording() {
                Ok(Some(_)) => {
                    self.status
                        .on_status(&format!("camera {} Stopped Recording...", camera_id));
                    report.succeeded.push(camera_id)
                }
                Ok(None) => report.skipped.push(camera_id),
                Err(err) => report.fail(camera_id, err),
            },
            Operation::CaptureImage(delay) => {
                if controller.capture_image(delay) {
                    report.succeeded.push(camera_id);
                } else {
                    report.fail(camera_id, format!("camera {} is not running", camera_id));
                }
            }
            Operation::Close => {
                controller.close();
                report.succeeded.push(camera_id);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_summary_counts_each_bucket() {
        let mut report = FanOutReport::default();
        report.succeeded.push(CameraId(0));
        report.skipped.push(CameraId(2));
        report.fail(CameraId(4), "gone");
        assert_eq!(report.summary(), "1 succeeded, 1 skipped, 1 failed");
        assert!(!report.is_clean());
    }
}
