//! Camera controller.
//!
//! One controller owns one frame source and at most one recording session.
//!
//! ```text
//! Closed ──open()──▶ Opened ──begin()──▶ Running ──close() / end of stream──▶ Closed
//!    ╰──open() fails──▶ Unavailable
//! ```
//!
//! While `Running`, a dedicated acquisition thread reads frames, writes the
//! raw frame to the active recording (if any), annotates a display copy and
//! hands it to the consumer. Recording start/stop may be called from any
//! thread; the session and its "recording" flag live behind one lock, so
//! the loop never writes into a half-closed file.

use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::consumer::{FrameConsumer, StatusSink};
use crate::error::{ControllerError, OpenError, RecordingError};
use crate::frame::{CameraId, Frame};
use crate::ingest::{FrameSource, SourceProperties, SourceProvider};
use crate::overlay;
use crate::record::{self, RecordingSession, RecordingSettings};

pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub recording: RecordingSettings,
    /// Upper bound on how long `close()` waits for the loop to exit.
    pub close_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            recording: RecordingSettings::default(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Closed,
    /// Last `open()` failed; the camera's controls should report failure.
    Unavailable,
    Opened,
    Running,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordingOutcome {
    Started(PathBuf),
    /// A session is already active and keeps running.
    AlreadyRecording(PathBuf),
    NotRunning,
}

struct PendingSnapshot {
    due: Instant,
    path: PathBuf,
}

#[derive(Default)]
struct RecordingSlot {
    session: Option<RecordingSession>,
    snapshot: Option<PendingSnapshot>,
}

/// State shared between the controller handle and its acquisition thread.
struct Shared {
    camera_id: CameraId,
    state: Mutex<ControllerState>,
    interrupt: AtomicBool,
    /// Bumped by every `begin()` and `close()`; a loop from an older run
    /// exits and leaves state alone.
    generation: AtomicU64,
    recording: Mutex<RecordingSlot>,
    frames_emitted: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn state(&self) -> ControllerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ControllerState) {
        *lock(&self.state) = state;
    }

    /// Write the raw frame to the active session and service a due snapshot.
    ///
    /// Returns the status lines to emit once the lock is released, or
    /// `None` when `generation` is no longer the current run; the frame is
    /// then dropped untouched.
    fn record(&self, frame: &Frame, generation: u64) -> Option<Vec<String>> {
        let mut slot = lock(&self.recording);
        if !self.is_current(generation) {
            return None;
        }
        let mut notices = Vec::new();
        if let Some(session) = slot.session.as_mut() {
            if let Err(err) = session.write(frame) {
                if session.write_failures() == 1 {
                    log::warn!("camera {} recording write failed: {}", self.camera_id, err);
                    notices.push(format!("camera {} recording error: {}", self.camera_id, err));
                } else {
                    log::debug!("camera {} recording write failed: {}", self.camera_id, err);
                }
            }
        }

        let due = slot
            .snapshot
            .as_ref()
            .map_or(false, |snapshot| Instant::now() >= snapshot.due);
        if due {
            if let Some(snapshot) = slot.snapshot.take() {
                match record::save_png(frame, &snapshot.path) {
                    Ok(()) => {
                        log::info!("camera {} captured {}", self.camera_id, snapshot.path.display());
                        notices.push(format!(
                            "camera {} captured image {}",
                            self.camera_id,
                            snapshot.path.display()
                        ));
                    }
                    Err(err) => {
                        log::warn!("camera {} image capture failed: {}", self.camera_id, err);
                        notices.push(format!("camera {} capture failed: {}", self.camera_id, err));
                    }
                }
            }
        }
        Some(notices)
    }

    fn take_session(&self) -> Option<RecordingSession> {
        let mut slot = lock(&self.recording);
        slot.snapshot = None;
        slot.session.take()
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

#[derive(Default)]
struct Lifecycle {
    /// Opened but not yet handed to a loop.
    source: Option<Box<dyn FrameSource>>,
    properties: Option<SourceProperties>,
    worker: Option<Worker>,
    last_error: Option<String>,
}

pub struct CameraController {
    camera_id: CameraId,
    provider: Arc<dyn SourceProvider>,
    settings: ControllerSettings,
    consumer: Arc<dyn FrameConsumer>,
    status: Arc<dyn StatusSink>,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl CameraController {
    pub fn new(
        camera_id: CameraId,
        provider: Arc<dyn SourceProvider>,
        settings: ControllerSettings,
        consumer: Arc<dyn FrameConsumer>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            camera_id,
            provider,
            settings,
            consumer,
            status,
            shared: Arc::new(Shared {
                camera_id,
                state: Mutex::new(ControllerState::Closed),
                interrupt: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                recording: Mutex::new(RecordingSlot::default()),
                frames_emitted: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn id(&self) -> CameraId {
        self.camera_id
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ControllerState::Running
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.shared.recording).session.is_some()
    }

    /// Path of the active recording, if any.
    pub fn recording_path(&self) -> Option<PathBuf> {
        lock(&self.shared.recording)
            .session
            .as_ref()
            .map(|session| session.path().to_path_buf())
    }

    /// Frames handed to the consumer since construction.
    pub fn frames_emitted(&self) -> u64 {
        self.shared.frames_emitted.load(Ordering::Acquire)
    }

    pub fn properties(&self) -> Option<SourceProperties> {
        lock(&self.lifecycle).properties
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.lifecycle).last_error.clone()
    }

    /// Acquire the device. A no-op when already opened or running.
    pub fn open(&self) -> Result<(), OpenError> {
        let mut lifecycle = lock(&self.lifecycle);
        match self.shared.state() {
            ControllerState::Opened | ControllerState::Running => return Ok(()),
            ControllerState::Closed | ControllerState::Unavailable => {}
        }
        // A loop that ended on its own still has a handle to collect.
        self.reap_worker(&mut lifecycle);

        match self.provider.open(self.camera_id) {
            Ok(source) => {
                lifecycle.properties = Some(source.properties());
                lifecycle.source = Some(source);
                lifecycle.last_error = None;
                self.shared.interrupt.store(false, Ordering::Release);
                self.shared.set_state(ControllerState::Opened);
                log::info!("connected camera device : {}", self.camera_id);
                Ok(())
            }
            Err(err) => {
                lifecycle.last_error = Some(err.to_string());
                self.shared.set_state(ControllerState::Unavailable);
                drop(lifecycle);
                log::warn!("{}", err);
                self.status.on_status(&err.to_string());
                Err(err)
            }
        }
    }

    /// Start the acquisition loop. A no-op when already running.
    pub fn begin(&self) -> Result<(), ControllerError> {
        let mut lifecycle = lock(&self.lifecycle);
        match self.shared.state() {
            ControllerState::Running => return Ok(()),
            ControllerState::Opened => {}
            ControllerState::Closed | ControllerState::Unavailable => {
                return Err(ControllerError::NotOpened(self.camera_id))
            }
        }
        let source = lifecycle
            .source
            .take()
            .ok_or(ControllerError::NotOpened(self.camera_id))?;

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let consumer = Arc::clone(&self.consumer);
        let status = Arc::clone(&self.status);
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.interrupt.store(false, Ordering::Release);
        self.shared.set_state(ControllerState::Running);

        let spawned = std::thread::Builder::new()
            .name(format!("camera-{}", self.camera_id))
            .spawn(move || {
                run_acquisition(source, shared, generation, consumer, status, done_tx)
            });
        match spawned {
            Ok(handle) => {
                lifecycle.worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                log::info!("start camera thread {}", self.camera_id);
                Ok(())
            }
            Err(err) => {
                self.shared.set_state(ControllerState::Closed);
                lifecycle.last_error = Some(err.to_string());
                Err(ControllerError::Spawn {
                    camera_id: self.camera_id,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Start recording into a fresh timestamped directory under the
    /// output root.
    pub fn start_recording(&self) -> Result<RecordingOutcome, RecordingError> {
        let dir = record::allocate_session_dir(&self.settings.recording.output_root, Local::now());
        self.start_recording_in(&dir)
    }

    /// Start recording into `dir` (shared by every camera of a fan-out).
    ///
    /// Ignored unless running. While a session is active this is a no-op
    /// and the active session continues.
    pub fn start_recording_in(&self, dir: &Path) -> Result<RecordingOutcome, RecordingError> {
        let lifecycle = lock(&self.lifecycle);
        let mut slot = lock(&self.shared.recording);
        if self.shared.state() != ControllerState::Running {
            log::debug!("camera {} not running; start recording ignored", self.camera_id);
            return Ok(RecordingOutcome::NotRunning);
        }
        if let Some(session) = slot.session.as_ref() {
            return Ok(RecordingOutcome::AlreadyRecording(session.path().to_path_buf()));
        }
        let Some(properties) = lifecycle.properties else {
            return Ok(RecordingOutcome::NotRunning);
        };

        match RecordingSession::create(dir, self.camera_id, properties, &self.settings.recording) {
            Ok(session) => {
                let path = session.path().to_path_buf();
                slot.session = Some(session);
                Ok(RecordingOutcome::Started(path))
            }
            Err(err) => {
                drop(slot);
                drop(lifecycle);
                log::warn!("camera {} recording failed: {}", self.camera_id, err);
                self.status
                    .on_status(&format!("camera {} recording failed: {}", self.camera_id, err));
                Err(err)
            }
        }
    }

    /// Stop and finalize the active session. A no-op when not recording.
    pub fn stop_recording(&self) -> Result<Option<PathBuf>, RecordingError> {
        let session = lock(&self.shared.recording).session.take();
        match session {
            Some(session) => session.finish().map(Some).map_err(|err| {
                log::warn!("camera {} recording finalize failed: {}", self.camera_id, err);
                self.status.on_status(&format!(
                    "camera {} recording finalize failed: {}",
                    self.camera_id, err
                ));
                err
            }),
            None => Ok(None),
        }
    }

    /// Save the next raw frame after `delay` as a PNG under a fresh
    /// timestamped directory. Returns false when not running.
    pub fn capture_image(&self, delay: Duration) -> bool {
        let dir = record::allocate_session_dir(&self.settings.recording.output_root, Local::now());
        self.capture_image_in(&dir, delay)
    }

    pub fn capture_image_in(&self, dir: &Path, delay: Duration) -> bool {
        let _lifecycle = lock(&self.lifecycle);
        let mut slot = lock(&self.shared.recording);
        if self.shared.state() != ControllerState::Running {
            return false;
        }
        slot.snapshot = Some(PendingSnapshot {
            due: Instant::now() + delay,
            path: dir.join(record::file_name(self.camera_id, "png")),
        });
        true
    }

    /// Stop the loop (bounded wait), finalize any recording, release the
    /// device. Safe to call any number of times.
    pub fn close(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        self.shared.interrupt.store(true, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        let mut detached = false;
        if let Some(worker) = lifecycle.worker.take() {
            match worker.done.recv_timeout(self.settings.close_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        log::warn!("camera {} acquisition thread panicked", self.camera_id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "camera {} acquisition loop did not stop within {:?}; detaching",
                        self.camera_id,
                        self.settings.close_timeout
                    );
                    detached = true;
                }
            }
        }

        if let Some(session) = self.shared.take_session() {
            if let Err(err) = session.finish() {
                log::warn!("camera {} recording finalize failed: {}", self.camera_id, err);
            }
        }
        if let Some(mut source) = lifecycle.source.take() {
            source.release();
        }

        let previous = self.shared.state();
        if previous != ControllerState::Closed {
            self.shared.set_state(ControllerState::Closed);
            log::info!("camera {} closed", self.camera_id);
        }
        drop(lifecycle);
        if detached {
            self.status
                .on_status(&format!("camera {} did not stop in time", self.camera_id));
        }
    }

    fn reap_worker(&self, lifecycle: &mut Lifecycle) {
        if let Some(worker) = lifecycle.worker.take() {
            if worker.done.recv_timeout(self.settings.close_timeout).is_ok() {
                let _ = worker.handle.join();
            }
        }
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.close();
    }
}

enum LoopExit {
    Interrupted,
    EndOfStream(String),
}

/// Marks the controller closed and signals `close()` however the loop ends,
/// including by panic.
struct LoopGuard {
    shared: Arc<Shared>,
    generation: u64,
    done: Sender<()>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if self.shared.is_current(self.generation) {
            self.shared.set_state(ControllerState::Closed);
        }
        let _ = self.done.try_send(());
    }
}

fn run_acquisition(
    mut source: Box<dyn FrameSource>,
    shared: Arc<Shared>,
    generation: u64,
    consumer: Arc<dyn FrameConsumer>,
    status: Arc<dyn StatusSink>,
    done: Sender<()>,
) {
    let camera_id = shared.camera_id;
    let guard = LoopGuard {
        shared: Arc::clone(&shared),
        generation,
        done,
    };

    let exit = loop {
        if shared.interrupt.load(Ordering::Acquire) || !shared.is_current(generation) {
            break LoopExit::Interrupted;
        }

        let started = Instant::now();
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => break LoopExit::EndOfStream(err.to_string()),
        };
        let fps = estimate_fps(started.elapsed());

        let Some(notices) = shared.record(&frame, generation) else {
            break LoopExit::Interrupted;
        };
        for notice in &notices {
            status.on_status(notice);
        }

        let display = overlay::annotate(frame, camera_id, fps);
        if !shared.is_current(generation) {
            break LoopExit::Interrupted;
        }
        shared.frames_emitted.fetch_add(1, Ordering::AcqRel);
        consumer.on_frame(camera_id, display);
    };

    source.release();
    let current = shared.is_current(generation);
    if current {
        // Flip to Closed before taking the session so a concurrent start
        // sees the loop is gone.
        shared.set_state(ControllerState::Closed);
        if let Some(session) = shared.take_session() {
            if let Err(err) = session.finish() {
                log::warn!("camera {} recording finalize failed: {}", camera_id, err);
            }
        }
    }

    match exit {
        LoopExit::Interrupted => log::info!("camera {} acquisition stopped", camera_id),
        LoopExit::EndOfStream(reason) if current => {
            log::warn!("camera {} stopped: {}", camera_id, reason);
            status.on_status(&format!("camera {} stopped: {}", camera_id, reason));
        }
        LoopExit::EndOfStream(reason) => {
            log::debug!("detached camera {} loop ended: {}", camera_id, reason);
        }
    }
    drop(guard);
}

/// Instantaneous rate from one frame interval.
pub(crate) fn estimate_fps(elapsed: Duration) -> u32 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (1.0 / secs).round().min(u32::MAX as f64) as u32
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_rounded_reciprocal_of_interval() {
        assert_eq!(estimate_fps(Duration::from_millis(33)), 30);
        assert_eq!(estimate_fps(Duration::from_millis(40)), 25);
        assert_eq!(estimate_fps(Duration::from_secs(2)), 1);
        assert_eq!(estimate_fps(Duration::ZERO), 0);
    }
}
