//! Player runtime.
//!
//! Opens the output device, starts a [`PlaybackController`] session over the
//! Symphonia backend, and serves stdin commands until the file ends or the
//! user quits.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Receiver;

use av_player::{FramePoll, PlaybackController, PlayerStatus, SymphoniaBackend, VideoOutput};
use av_player_types::PlaybackState;

use crate::commands::{self, Command};
use crate::config::PlayConfig;
use crate::{device, playback};

const TICK: Duration = Duration::from_millis(100);
/// Consecutive drained ticks after which playback counts as finished.
const END_IDLE_TICKS: u32 = 10;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Play one local file until it ends or a `quit` command arrives.
pub fn run_play(config: PlayConfig, install_ctrlc: bool) -> Result<()> {
    let host = cpal::default_host();
    let device_name = normalize_device_name(config.device);
    let device = device::pick_device(&host, device_name.as_deref())?;
    let supported = device::pick_output_config(&device, config.pipeline.output.sample_rate)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }
    tracing::info!(
        device = %device.description()?,
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?supported.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "output device"
    );

    let mut pipeline = config.pipeline;
    pipeline.output.sample_rate = stream_config.sample_rate;
    pipeline.output.channels = stream_config.channels;

    let controller = PlaybackController::new(Arc::new(SymphoniaBackend), pipeline);
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Command>();
    let quit_rx = if install_ctrlc {
        let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(1);
        match ctrlc::set_handler(move || {
            let _ = quit_tx.try_send(());
        }) {
            Ok(()) => quit_rx,
            Err(e) => {
                tracing::warn!("ctrl-c handler not installed: {e}");
                crossbeam_channel::never()
            }
        }
    } else {
        crossbeam_channel::never()
    };

    let uri = config.path.to_string_lossy();
    let session = controller
        .start(&uri)
        .with_context(|| format!("start playback of {:?}", config.path))?;
    if config.start_paused {
        controller.pause(true)?;
    }
    if let Some(speed) = config.speed {
        controller.set_speed(speed)?;
    }

    let presenter = match controller.video_output() {
        Some(video) => Some(spawn_presenter(video)?),
        None => None,
    };
    let stream = match controller.audio_output() {
        Some(audio) => {
            let stream = playback::build_output_stream(
                &device,
                &stream_config,
                supported.sample_format(),
                audio,
            )?;
            stream.play()?;
            Some(stream)
        }
        None => None,
    };
    if stream.is_none() && presenter.is_none() {
        controller.stop();
        return Err(anyhow!("{session} has nothing to present"));
    }

    let _stdin = commands::spawn_stdin_reader(cmd_tx)?;
    serve(&controller, cmd_rx, quit_rx, config.status_interval);

    drop(stream);
    let report = controller.stop();
    if report.any_detached() {
        tracing::warn!(?report, "some workers did not exit in time");
    }
    if let Some(handle) = presenter {
        let _ = handle.join();
    }
    tracing::info!(%session, "playback finished");
    Ok(())
}

fn serve(
    controller: &PlaybackController,
    mut commands: Receiver<Command>,
    mut quit: Receiver<()>,
    status_interval: Option<Duration>,
) {
    let mut end = EndDetector::default();
    let mut since_status = Duration::ZERO;

    loop {
        match wait(&commands, &quit, TICK) {
            Wake::Quit => return,
            Wake::Command(cmd) => {
                if let Err(e) = apply(controller, cmd) {
                    tracing::warn!("{e:#}");
                }
                continue;
            }
            // stdin closed: keep playing to the end of the file.
            Wake::InputClosed => {
                tracing::debug!("command input closed");
                commands = crossbeam_channel::never();
                continue;
            }
            Wake::SignalClosed => {
                quit = crossbeam_channel::never();
                continue;
            }
            Wake::Tick => {}
        }

        let status = controller.status();
        if end.observe(&status) {
            return;
        }
        if let Some(interval) = status_interval {
            since_status += TICK;
            if since_status >= interval {
                since_status = Duration::ZERO;
                print_status(&status);
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Wake {
    Command(Command),
    Quit,
    InputClosed,
    SignalClosed,
    Tick,
}

/// Block for at most `tick` on the command and quit channels.
fn wait(commands: &Receiver<Command>, quit: &Receiver<()>, tick: Duration) -> Wake {
    crossbeam_channel::select! {
        recv(quit) -> signal => match signal {
            Ok(()) => Wake::Quit,
            Err(_) => Wake::SignalClosed,
        },
        recv(commands) -> cmd => match cmd {
            Ok(Command::Quit) => Wake::Quit,
            Ok(cmd) => Wake::Command(cmd),
            Err(_) => Wake::InputClosed,
        },
        default(tick) => Wake::Tick,
    }
}

fn apply(controller: &PlaybackController, cmd: Command) -> Result<()> {
    match cmd {
        Command::Pause => controller.pause(true)?,
        Command::Resume => controller.pause(false)?,
        Command::Seek(fraction) => {
            let report = controller.seek(fraction)?;
            tracing::info!(
                target_secs = report.target_secs,
                epoch = report.epoch,
                discarded = ?report.discarded,
                "seeked"
            );
        }
        Command::Speed(value) => {
            let speed = controller.set_speed(value)?;
            tracing::info!(speed, "speed changed");
        }
        Command::Status => print_status(&controller.status()),
        Command::Quit => {}
    }
    Ok(())
}

fn print_status(status: &PlayerStatus) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!("status encode failed: {e}"),
    }
}

/// Pull decoded frames at the presentation rate; this front end has no
/// window, so frames are only counted.
fn spawn_presenter(mut video: VideoOutput) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("av-play-present".to_string())
        .spawn(move || {
            let mut presented = 0u64;
            loop {
                match video.next_frame(TICK) {
                    FramePoll::Frame(frame) => {
                        presented += 1;
                        tracing::trace!(pts = ?frame.pts, key = frame.key, "frame");
                        thread::sleep(video.frame_delay());
                    }
                    FramePoll::Idle => {}
                    FramePoll::Ended => break,
                }
            }
            tracing::debug!(presented, "presenter exiting");
        })
        .context("spawn presenter")
}

/// Detects the end of the file: playing, past the start, and every buffer
/// drained for [`END_IDLE_TICKS`] consecutive observations.
#[derive(Default)]
struct EndDetector {
    idle_ticks: u32,
}

impl EndDetector {
    fn observe(&mut self, status: &PlayerStatus) -> bool {
        let drained = status.state == PlaybackState::Playing
            && status.position_secs > 0.0
            && status.levels.is_empty();
        if status.state == PlaybackState::Stopped {
            return true;
        }
        self.idle_ticks = if drained { self.idle_ticks + 1 } else { 0 };
        self.idle_ticks >= END_IDLE_TICKS
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
