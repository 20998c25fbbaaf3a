use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use cabin_cam::ingest::{SyntheticConfig, SyntheticProvider, SyntheticSource};
use cabin_cam::record::y4m;
use cabin_cam::{
    CameraController, CameraId, Codec, ControllerError, ControllerSettings, ControllerState,
    Frame, FrameSource, OpenError, PixelLayout, ReadError, RecordingOutcome, RecordingSettings,
    SourceProperties, SourceProvider, StatusHistory, StatusSink,
};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

#[derive(Default)]
struct Collected {
    frames: Mutex<Vec<Frame>>,
}

impl Collected {
    fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

struct Rig {
    controller: CameraController,
    frames: Arc<Collected>,
    status: Arc<StatusHistory>,
}

fn rig(root: &Path, camera_id: u32, available: &[u32], frame_limit: Option<u64>) -> Rig {
    let provider = Arc::new(SyntheticProvider::new(SyntheticConfig {
        width: WIDTH,
        height: HEIGHT,
        fps: 100,
        available: Some(available.iter().copied().map(CameraId).collect()),
        frame_limit,
    }));
    let settings = ControllerSettings {
        recording: RecordingSettings {
            output_root: root.to_path_buf(),
            target_fps: 30,
            codec: Codec::Y4m,
        },
        close_timeout: Duration::from_secs(1),
    };
    let frames = Arc::new(Collected::default());
    let sink = Arc::clone(&frames);
    let status = Arc::new(StatusHistory::new(64));
    let controller = CameraController::new(
        CameraId(camera_id),
        provider,
        settings,
        Arc::new(move |_id: CameraId, frame: Frame| sink.frames.lock().unwrap().push(frame)),
        status.clone(),
    );
    Rig {
        controller,
        frames,
        status,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn session_dirs(root: &Path) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Split a Y4M file into its frame payloads.
fn y4m_frames(bytes: &[u8]) -> Vec<Vec<u8>> {
    let header_end = bytes.iter().position(|b| *b == b'\n').unwrap() + 1;
    assert_eq!(
        &bytes[..header_end],
        y4m::header(WIDTH, HEIGHT, 30).as_bytes()
    );
    let payload = (WIDTH * HEIGHT * 3) as usize;
    let chunk = y4m::FRAME_MARKER.len() + payload;
    bytes[header_end..]
        .chunks(chunk)
        .map(|frame| {
            assert_eq!(frame.len(), chunk, "truncated frame");
            assert_eq!(&frame[..y4m::FRAME_MARKER.len()], y4m::FRAME_MARKER);
            frame[y4m::FRAME_MARKER.len()..].to_vec()
        })
        .collect()
}

fn raw_planes(sequence: u64) -> Vec<u8> {
    let frame = Frame::new(
        CameraId(0),
        WIDTH,
        HEIGHT,
        PixelLayout::Bgr24,
        sequence,
        SyntheticSource::pattern(WIDTH, HEIGHT, sequence),
    )
    .unwrap();
    y4m::encode_planes(&frame)
}

#[test]
fn begin_emits_frames_in_read_order() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 0, &[0], None);

    rig.controller.open().unwrap();
    assert_eq!(rig.controller.state(), ControllerState::Opened);
    rig.controller.begin().unwrap();
    assert!(wait_until(Duration::from_secs(5), || rig.frames.len() >= 10));
    rig.controller.close();

    let frames = rig.frames.frames.lock().unwrap();
    assert_eq!(frames.len() as u64, rig.controller.frames_emitted());
    for pair in frames.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert!(pair[1].captured_at > pair[0].captured_at);
    }
    assert!(frames.iter().all(|frame| frame.camera_id == CameraId(0)));
}

#[test]
fn displayed_frames_carry_the_label_and_recorded_frames_do_not() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 0, &[0], None);
    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();

    let outcome = rig.controller.start_recording().unwrap();
    let RecordingOutcome::Started(path) = outcome else {
        panic!("expected a new session, got {:?}", outcome);
    };
    assert!(rig.controller.is_recording());
    let before = rig.frames.len();
    assert!(wait_until(Duration::from_secs(5), || rig.frames.len() >= before + 8));
    assert_eq!(rig.controller.stop_recording().unwrap(), Some(path.clone()));
    rig.controller.close();

    assert_eq!(path.file_name().unwrap(), "cam_0.y4m");
    let recorded = y4m_frames(&std::fs::read(&path).unwrap());
    assert!(!recorded.is_empty());
    let emitted = rig.controller.frames_emitted();
    for planes in &recorded {
        assert!(
            (1..=emitted).any(|sequence| raw_planes(sequence) == *planes),
            "recorded frame does not match any raw capture"
        );
    }

    let frames = rig.frames.frames.lock().unwrap();
    for frame in frames.iter() {
        assert_eq!(frame.layout, PixelLayout::Rgb24);
        assert!(frame
            .pixels()
            .chunks_exact(3)
            .any(|px| px == cabin_cam::overlay::LABEL_COLOR));
    }
}

#[test]
fn start_while_recording_keeps_the_active_session() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 2, &[2], None);
    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();

    let RecordingOutcome::Started(first) = rig.controller.start_recording().unwrap() else {
        panic!("first start must open a session");
    };
    let second = rig.controller.start_recording().unwrap();
    assert_eq!(second, RecordingOutcome::AlreadyRecording(first.clone()));

    rig.controller.close();
    assert!(!rig.controller.is_recording());
    let dirs = session_dirs(root.path());
    assert_eq!(dirs.len(), 1);
    let files: Vec<_> = std::fs::read_dir(&dirs[0]).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert!(first.exists());
}

#[test]
fn stop_without_session_is_a_no_op() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 0, &[0], None);
    assert_eq!(rig.controller.stop_recording().unwrap(), None);

    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();
    assert_eq!(rig.controller.stop_recording().unwrap(), None);
    rig.controller.close();

    assert!(session_dirs(root.path()).is_empty());
}

#[test]
fn start_before_begin_is_ignored() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 0, &[0], None);
    rig.controller.open().unwrap();
    assert_eq!(
        rig.controller.start_recording().unwrap(),
        RecordingOutcome::NotRunning
    );
    assert!(!rig.controller.capture_image(Duration::ZERO));
    assert!(session_dirs(root.path()).is_empty());
}

#[test]
fn close_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 0, &[0], None);
    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();
    rig.controller.start_recording().unwrap();

    rig.controller.close();
    rig.controller.close();
    assert_eq!(rig.controller.state(), ControllerState::Closed);
    assert!(!rig.controller.is_recording());

    // Never-opened controllers close cleanly too.
    let idle = rig_idle(root.path());
    idle.close();
    idle.close();
}

fn rig_idle(root: &Path) -> CameraController {
    rig(root, 9, &[], None).controller
}

#[test]
fn unavailable_device_is_reported_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 4, &[0], None);

    let err = rig.controller.open().unwrap_err();
    assert!(matches!(err, OpenError::DeviceUnavailable { camera_id: CameraId(4), .. }));
    assert_eq!(rig.controller.state(), ControllerState::Unavailable);
    assert!(rig.controller.last_error().is_some());
    assert_eq!(
        rig.controller.begin(),
        Err(ControllerError::NotOpened(CameraId(4)))
    );
    assert!(rig
        .status
        .lines()
        .iter()
        .any(|line| line.starts_with("camera 4 unavailable")));
}

#[test]
fn end_of_stream_stops_the_loop_and_finalizes_recording() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 0, &[0], Some(40));
    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();
    let RecordingOutcome::Started(path) = rig.controller.start_recording().unwrap() else {
        panic!("expected a session");
    };

    assert!(wait_until(Duration::from_secs(5), || {
        rig.controller.state() == ControllerState::Closed
    }));
    assert!(!rig.controller.is_recording());
    assert_eq!(rig.frames.len(), 40);
    assert!(!y4m_frames(&std::fs::read(&path).unwrap()).is_empty());
    assert!(rig
        .status
        .lines()
        .iter()
        .any(|line| line.starts_with("camera 0 stopped")));

    // No automatic restart; an explicit open + begin resumes.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.frames.len(), 40);
    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();
    assert!(wait_until(Duration::from_secs(5), || rig.frames.len() > 40));
    rig.controller.close();
}

#[test]
fn capture_image_writes_an_unlabelled_png() {
    let root = tempfile::tempdir().unwrap();
    let rig = rig(root.path(), 6, &[6], None);
    rig.controller.open().unwrap();
    rig.controller.begin().unwrap();

    assert!(rig.controller.capture_image(Duration::from_millis(20)));
    let found = wait_until(Duration::from_secs(5), || {
        session_dirs(root.path())
            .iter()
            .any(|dir| dir.join("cam_6.png").exists())
    });
    rig.controller.close();
    assert!(found);

    let dir = session_dirs(root.path()).pop().unwrap();
    let image = image::open(dir.join("cam_6.png")).unwrap().to_rgb8();
    assert_eq!((image.width(), image.height()), (WIDTH, HEIGHT));
    assert!(image.pixels().all(|px| px.0 != cabin_cam::overlay::LABEL_COLOR));
}

const STALE_GRAY: u8 = 0xaa;
const FRESH_GRAY: u8 = 0x11;

fn gray_frame(camera_id: CameraId, width: u32, height: u32, sequence: u64, value: u8) -> Frame {
    let len = (width * height * 3) as usize;
    Frame::new(camera_id, width, height, PixelLayout::Bgr24, sequence, vec![value; len]).unwrap()
}

/// Uniform gray frames. The first device opened stalls on its second read;
/// every later device is well behaved. `shrink` switches to a smaller
/// frame size mid-stream.
struct ScriptedSource {
    camera_id: CameraId,
    gray: u8,
    stall_on: Option<u64>,
    stall: Duration,
    shrink: Arc<AtomicBool>,
    sequence: u64,
}

impl FrameSource for ScriptedSource {
    fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        self.sequence += 1;
        if self.stall_on == Some(self.sequence) {
            std::thread::sleep(self.stall);
        } else {
            std::thread::sleep(Duration::from_millis(5));
        }
        let (width, height) = if self.shrink.load(Ordering::SeqCst) {
            (WIDTH / 2, HEIGHT / 2)
        } else {
            (WIDTH, HEIGHT)
        };
        Ok(gray_frame(self.camera_id, width, height, self.sequence, self.gray))
    }

    fn properties(&self) -> SourceProperties {
        SourceProperties {
            width: WIDTH,
            height: HEIGHT,
            fps: 0.0,
        }
    }

    fn release(&mut self) {}
}

struct ScriptedProvider {
    opened: AtomicUsize,
    stall: Duration,
    shrink: Arc<AtomicBool>,
}

impl ScriptedProvider {
    fn new(stall: Duration) -> Self {
        Self {
            opened: AtomicUsize::new(0),
            stall,
            shrink: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SourceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, camera_id: CameraId) -> Result<Box<dyn FrameSource>, OpenError> {
        let first = self.opened.fetch_add(1, Ordering::SeqCst) == 0;
        Ok(Box::new(ScriptedSource {
            camera_id,
            gray: if first { STALE_GRAY } else { FRESH_GRAY },
            stall_on: first.then_some(2),
            stall: self.stall,
            shrink: Arc::clone(&self.shrink),
            sequence: 0,
        }))
    }
}

fn scripted_controller(
    root: &Path,
    provider: Arc<ScriptedProvider>,
    close_timeout: Duration,
    frames: Arc<Collected>,
    status: Arc<dyn StatusSink>,
) -> CameraController {
    let settings = ControllerSettings {
        recording: RecordingSettings {
            output_root: root.to_path_buf(),
            target_fps: 30,
            codec: Codec::Y4m,
        },
        close_timeout,
    };
    let sink = Arc::clone(&frames);
    CameraController::new(
        CameraId(0),
        provider,
        settings,
        Arc::new(move |_id: CameraId, frame: Frame| sink.frames.lock().unwrap().push(frame)),
        status,
    )
}

/// Gray level of a displayed frame, read away from the label.
fn display_gray(frame: &Frame) -> u8 {
    frame.rgb_at(frame.width - 1, frame.height - 1).unwrap()[0]
}

#[test]
fn blocked_close_times_out_and_the_detached_loop_stays_out_of_the_next_run() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(1500)));
    let frames = Arc::new(Collected::default());
    let status = Arc::new(StatusHistory::new(64));
    let controller = scripted_controller(
        root.path(),
        provider,
        Duration::from_millis(200),
        frames.clone(),
        status.clone(),
    );

    controller.open().unwrap();
    controller.begin().unwrap();
    assert!(wait_until(Duration::from_secs(5), || frames.len() >= 1));
    // Let the loop enter the stalled read.
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    controller.close();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(controller.state(), ControllerState::Closed);
    assert!(status
        .lines()
        .iter()
        .any(|line| line == "camera 0 did not stop in time"));
    let emitted_before_reopen = frames.len();

    controller.open().unwrap();
    controller.begin().unwrap();
    let RecordingOutcome::Started(path) = controller.start_recording().unwrap() else {
        panic!("expected a session");
    };
    // Outlive the stalled read on the old device.
    std::thread::sleep(Duration::from_millis(1800));
    controller.stop_recording().unwrap();
    controller.close();

    let stale_planes = y4m::encode_planes(&gray_frame(CameraId(0), WIDTH, HEIGHT, 2, STALE_GRAY));
    let recorded = y4m_frames(&std::fs::read(&path).unwrap());
    assert!(!recorded.is_empty());
    assert!(recorded.iter().all(|planes| *planes != stale_planes));

    let frames = frames.frames.lock().unwrap();
    assert!(frames
        .iter()
        .skip(emitted_before_reopen)
        .all(|frame| display_gray(frame) == FRESH_GRAY));
    assert!(frames
        .iter()
        .take(emitted_before_reopen)
        .all(|frame| display_gray(frame) == STALE_GRAY));
}

#[test]
fn write_failures_are_reported_once_and_the_loop_keeps_running() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(5)));
    let shrink = Arc::clone(&provider.shrink);
    let frames = Arc::new(Collected::default());
    let status = Arc::new(StatusHistory::new(64));
    let controller = scripted_controller(
        root.path(),
        provider,
        Duration::from_secs(1),
        frames.clone(),
        status.clone(),
    );

    controller.open().unwrap();
    controller.begin().unwrap();
    let RecordingOutcome::Started(path) = controller.start_recording().unwrap() else {
        panic!("expected a session");
    };
    assert!(wait_until(Duration::from_secs(5), || frames.len() >= 5));

    shrink.store(true, Ordering::SeqCst);
    let shrunk_at = frames.len();
    assert!(wait_until(Duration::from_secs(5), || frames.len() >= shrunk_at + 10));

    assert!(controller.is_running());
    assert!(controller.is_recording());
    let errors: Vec<_> = status
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("camera 0 recording error"))
        .collect();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].contains("recording expects 32x24"));

    assert_eq!(controller.stop_recording().unwrap(), Some(path.clone()));
    controller.close();
    assert!(!y4m_frames(&std::fs::read(&path).unwrap()).is_empty());
}

/// Status sink that queries the controller it reports for, as a status bar
/// would.
struct ReentrantStatus {
    controller: OnceLock<Arc<CameraController>>,
    lines: Mutex<Vec<String>>,
}

impl StatusSink for ReentrantStatus {
    fn on_status(&self, text: &str) {
        if let Some(controller) = self.controller.get() {
            let _ = controller.is_recording();
            let _ = controller.recording_path();
            let _ = controller.last_error();
        }
        self.lines.lock().unwrap().push(text.to_string());
    }
}

#[test]
fn status_sinks_may_call_back_into_the_controller() {
    let root = tempfile::tempdir().unwrap();
    let frames = Arc::new(Collected::default());
    let status = Arc::new(ReentrantStatus {
        controller: OnceLock::new(),
        lines: Mutex::new(Vec::new()),
    });

    let shrink_provider = Arc::new(ScriptedProvider::new(Duration::from_millis(5)));
    let shrink = Arc::clone(&shrink_provider.shrink);
    let controller = Arc::new(scripted_controller(
        root.path(),
        shrink_provider,
        Duration::from_secs(1),
        frames.clone(),
        status.clone(),
    ));
    assert!(status.controller.set(Arc::clone(&controller)).is_ok());

    controller.open().unwrap();
    controller.begin().unwrap();
    controller.start_recording().unwrap();
    assert!(controller.capture_image(Duration::ZERO));
    let has_line = |prefix: &str| {
        status
            .lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.starts_with(prefix))
    };
    assert!(wait_until(Duration::from_secs(5), || has_line("camera 0 captured image")));

    shrink.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(5), || has_line("camera 0 recording error")));
    let before = frames.len();
    assert!(wait_until(Duration::from_secs(5), || frames.len() > before + 3));

    controller.close();
    assert_eq!(controller.state(), ControllerState::Closed);
}
