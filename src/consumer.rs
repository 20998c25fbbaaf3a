//! Frame and status delivery to the outside world.
//!
//! The core never depends on a UI event loop. Display code registers a
//! `FrameConsumer` (or takes the receiving end of `frame_channel`) and a
//! `StatusSink` for one-line status text.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Mutex;

use crate::frame::{CameraId, Frame};

/// Receives one annotated frame per successful capture.
///
/// Called from the camera's acquisition loop; implementations must return
/// quickly.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, camera_id: CameraId, frame: Frame);
}

/// Receives human-readable status lines.
pub trait StatusSink: Send + Sync {
    fn on_status(&self, text: &str);
}

impl<F> FrameConsumer for F
where
    F: Fn(CameraId, Frame) + Send + Sync,
{
    fn on_frame(&self, camera_id: CameraId, frame: Frame) {
        self(camera_id, frame)
    }
}

impl<F> StatusSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_status(&self, text: &str) {
        self(text)
    }
}

/// A frame delivered through `frame_channel`.
#[derive(Debug)]
pub struct FrameEvent {
    pub camera_id: CameraId,
    pub frame: Frame,
}

/// Channel-backed consumer.
pub struct FrameChannel {
    tx: Sender<FrameEvent>,
}

/// Build a frame channel. With `capacity = Some(n)` frames beyond `n`
/// pending are dropped instead of growing memory.
pub fn frame_channel(capacity: Option<usize>) -> (FrameChannel, Receiver<FrameEvent>) {
    let (tx, rx) = match capacity {
        Some(n) => crossbeam_channel::bounded(n),
        None => crossbeam_channel::unbounded(),
    };
    (FrameChannel { tx }, rx)
}

impl FrameConsumer for FrameChannel {
    fn on_frame(&self, camera_id: CameraId, frame: Frame) {
        match self.tx.try_send(FrameEvent { camera_id, frame }) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!(
                    "frame channel full, dropping frame {} of camera {}",
                    event.frame.sequence,
                    camera_id
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Status sink writing to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn on_status(&self, text: &str) {
        log::info!("status: {}", text);
    }
}

/// Status sink that keeps the most recent lines, for status bars.
pub struct StatusHistory {
    limit: usize,
    lines: Mutex<Vec<String>>,
}

impl StatusHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn latest(&self) -> Option<String> {
        self.lines().pop()
    }
}

impl StatusSink for StatusHistory {
    fn on_status(&self, text: &str) {
        log::info!("status: {}", text);
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.push(text.to_string());
        let overflow = lines.len().saturating_sub(self.limit);
        lines.drain(..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;

    fn frame(sequence: u64) -> Frame {
        Frame::new(CameraId(0), 1, 1, PixelLayout::Rgb24, sequence, vec![0, 0, 0])
            .expect("frame")
    }

    #[test]
    fn bounded_channel_drops_when_full() {
        let (consumer, rx) = frame_channel(Some(1));
        consumer.on_frame(CameraId(0), frame(1));
        consumer.on_frame(CameraId(0), frame(2));
        let received: Vec<u64> = rx.try_iter().map(|event| event.frame.sequence).collect();
        assert_eq!(received, vec![1]);
    }

    #[test]
    fn status_history_keeps_latest_lines() {
        let history = StatusHistory::new(2);
        history.on_status("a");
        history.on_status("b");
        history.on_status("c");
        assert_eq!(history.lines(), vec!["b", "c"]);
        assert_eq!(history.latest().as_deref(), Some("c"));
    }

    #[test]
    fn closures_are_consumers() {
        let seen = Mutex::new(Vec::new());
        let sink = |text: &str| seen.lock().expect("lock").push(text.to_string());
        sink.on_status("Start Recording...");
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }
}
