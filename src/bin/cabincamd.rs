//! cabincamd - cabin camera recorder daemon
//!
//! This daemon:
//! 1. Opens every configured camera (unavailable ones are reported, not fatal)
//! 2. Starts an acquisition loop per camera
//! 3. Connects to the MQTT broker and serves record start/stop commands
//! 4. Logs per-camera frame rates until Ctrl-C, then closes everything

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cabin_cam::command::mqtt::{self, MqttRuntime};
use cabin_cam::ui::{Ui, UiMode};
use cabin_cam::{
    frame_channel, ingest, CameraId, CommandAdapter, CommandTable, ControllerRegistry,
    LogStatus, RecorderConfig, StatusSink,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const FRAME_QUEUE_PER_CAMERA: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera recorder with MQTT remote control")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "CABINCAM_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address (overrides the configuration).
    #[arg(long)]
    broker: Option<String>,

    /// Run without the MQTT command channel.
    #[arg(long)]
    no_mqtt: bool,

    /// Start recording as soon as the cameras are running.
    #[arg(long)]
    record: bool,

    #[arg(long, value_enum, default_value = "auto")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::new(args.ui, is_tty, !stdout_is_tty);

    let config = {
        let _stage = ui.stage("Load configuration");
        let mut config = RecorderConfig::load_from(args.config.as_deref())?;
        if let Some(broker) = args.broker.clone() {
            config.broker.addr = broker;
        }
        config
    };
    log::info!(
        "{} cameras={:?} backend={} output={} codec={}@{}fps",
        config.app_name,
        config.cameras.ids,
        config.cameras.backend,
        config.recording.output_root.display(),
        config.recording.codec,
        config.recording.target_fps
    );

    let status: Arc<dyn StatusSink> = Arc::new(LogStatus);
    let (frames, frame_rx) =
        frame_channel(Some(config.cameras.ids.len().max(1) * FRAME_QUEUE_PER_CAMERA));

    let registry = {
        let _stage = ui.stage("Open cameras");
        let provider = ingest::provider_for(&config.cameras)?;
        Arc::new(ControllerRegistry::open(
            &config.cameras.ids,
            provider,
            config.controller_settings(),
            Arc::new(frames),
            Arc::clone(&status),
        ))
    };
    {
        let _stage = ui.stage("Start acquisition");
        let report = registry.begin_all();
        for (camera_id, reason) in &report.failed {
            log::warn!("camera {} did not start: {}", camera_id, reason);
        }
    }
    ui.cameras(&registry.statuses());

    if args.record {
        registry.start_all();
    }

    let runtime = if args.no_mqtt {
        log::info!("MQTT command channel disabled");
        None
    } else {
        let _stage = ui.stage("Connect command channel");
        let (publisher, connection) = mqtt::connect(&config.broker)?;
        let adapter = Arc::new(CommandAdapter::new(
            config.app_name.clone(),
            config.topics.clone(),
            CommandTable::for_registry(Arc::clone(&registry), &config.topics),
            publisher,
            Arc::clone(&status),
        ));
        Some(MqttRuntime::spawn(connection, adapter)?)
    };

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("cabincamd running; waiting for shutdown signal (Ctrl-C)...");
    let mut counts: BTreeMap<CameraId, u64> = BTreeMap::new();
    let mut last_stats = Instant::now();
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        match frame_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => *counts.entry(event.camera_id).or_default() += 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if last_stats.elapsed() >= STATS_INTERVAL {
            let secs = last_stats.elapsed().as_secs_f64();
            for camera in registry.statuses() {
                let frames = counts.remove(&camera.camera_id).unwrap_or(0);
                log::info!(
                    "camera {} state={:?} recording={} frames={} ({:.1} fps)",
                    camera.camera_id,
                    camera.state,
                    camera.recording,
                    frames,
                    frames as f64 / secs
                );
            }
            last_stats = Instant::now();
        }
    }

    log::info!("shutdown signal received, stopping...");
    if let Some(runtime) = runtime {
        let _stage = ui.stage("Disconnect command channel");
        runtime.shutdown()?;
    }
    {
        let _stage = ui.stage("Close cameras");
        registry.close_all();
    }
    Ok(())
}
