//! Render scheduler: composes frames at a steady rate on its own thread and
//! hands them to the device link without waiting for transmission.

use crossbeam::channel::{bounded, select, tick, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thermal_engine_core::{RegistryReader, ResumeDetector, MAX_TARGET_FPS, RESUME_GAP_THRESHOLD};
use thermal_engine_device::{FrameSubmitter, SubmitOutcome};
use thermal_engine_render::{Compositor, PainterRegistry, RenderContext};
use thermal_engine_types::Frame;

use super::theme_handle::ThemeHandle;

/// Frames used for the rolling FPS figure
const FPS_WINDOW: usize = 60;

/// Where composed frames go
pub trait FrameSink: Send + 'static {
    fn submit(&self, frame: Frame) -> SubmitOutcome;

    /// Called when a jump in wall-clock time suggests the system slept
    fn notify_resume(&self) {}
}

impl FrameSink for FrameSubmitter {
    fn submit(&self, frame: Frame) -> SubmitOutcome {
        FrameSubmitter::submit(self, frame)
    }

    fn notify_resume(&self) {
        FrameSubmitter::notify_resume(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulerStats {
    pub frames_rendered: u64,
    pub render_failures: u64,
    /// Time the last successful render took
    pub last_render_time: Option<Duration>,
    /// Achieved frame rate over the recent window
    pub fps: f64,
    pub target_fps: u32,
    pub paused: bool,
}

enum Command {
    Pause,
    Resume,
    SetFps(u32),
    Shutdown,
}

pub struct RenderScheduler {
    commands: Sender<Command>,
    stats: Arc<Mutex<SchedulerStats>>,
    handle: Option<JoinHandle<()>>,
}

fn interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps as f64)
}

impl RenderScheduler {
    /// Spawn the render thread. The compositor is created on that thread.
    pub fn start(
        theme: ThemeHandle,
        registry: RegistryReader,
        sink: Box<dyn FrameSink>,
        painters: PainterRegistry,
        target_fps: u32,
    ) -> std::io::Result<Self> {
        let target_fps = target_fps.clamp(1, MAX_TARGET_FPS);
        let stats = Arc::new(Mutex::new(SchedulerStats {
            target_fps,
            ..SchedulerStats::default()
        }));
        let (commands, command_rx) = bounded(16);

        let worker = SchedulerWorker {
            theme,
            registry,
            sink,
            stats: Arc::clone(&stats),
            started: Instant::now(),
            frame_times: VecDeque::with_capacity(FPS_WINDOW),
            resume: ResumeDetector::new(RESUME_GAP_THRESHOLD),
        };

        let handle = thread::Builder::new()
            .name("render-scheduler".into())
            .spawn(move || worker.run(command_rx, painters, target_fps))?;

        Ok(Self {
            commands,
            stats,
            handle: Some(handle),
        })
    }

    /// Stop composing frames; sensors keep polling
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Retime the render cadence, clamped to 1..=60
    pub fn set_target_fps(&self, fps: u32) {
        let _ = self.commands.send(Command::SetFps(fps.clamp(1, MAX_TARGET_FPS)));
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::info!("Stopping render scheduler");
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                log::error!("Render scheduler thread panicked");
            }
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SchedulerWorker {
    theme: ThemeHandle,
    registry: RegistryReader,
    sink: Box<dyn FrameSink>,
    stats: Arc<Mutex<SchedulerStats>>,
    started: Instant,
    frame_times: VecDeque<Instant>,
    resume: ResumeDetector,
}

impl SchedulerWorker {
    fn run(mut self, commands: Receiver<Command>, painters: PainterRegistry, target_fps: u32) {
        let mut compositor = match Compositor::new() {
            Ok(c) => c.with_painters(painters),
            Err(e) => {
                log::error!("Failed to create compositor: {}", e);
                return;
            }
        };
        log::warn!("=== Render scheduler started at {} FPS ===", target_fps);

        let mut ticker = tick(interval(target_fps));
        let mut paused = false;
        loop {
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(Command::Pause) => {
                        log::info!("Rendering paused");
                        paused = true;
                        self.frame_times.clear();
                        self.update_stats(|s| {
                            s.paused = true;
                            s.fps = 0.0;
                        });
                    }
                    Ok(Command::Resume) => {
                        log::info!("Rendering resumed");
                        paused = false;
                        self.update_stats(|s| s.paused = false);
                    }
                    Ok(Command::SetFps(fps)) => {
                        log::info!("Render rate set to {} FPS", fps);
                        ticker = tick(interval(fps));
                        self.frame_times.clear();
                        self.update_stats(|s| s.target_fps = fps);
                    }
                    Ok(Command::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => {
                    if self.resume.check() {
                        log::warn!("=== Resume from sleep detected ===");
                        self.sink.notify_resume();
                    }
                    if !paused {
                        self.render_once(&mut compositor);
                    }
                }
            }
        }
        log::info!("Render scheduler stopped");
    }

    fn render_once(&mut self, compositor: &mut Compositor) {
        let theme = self.theme.load();
        let snapshot = self.registry.snapshot();
        let context = RenderContext::now(self.started.elapsed());

        let start = Instant::now();
        match compositor.render(&theme, &snapshot, &context) {
            Ok(frame) => {
                let render_time = start.elapsed();
                let outcome = self.sink.submit(frame);
                log::trace!("Frame rendered in {:?}: {:?}", render_time, outcome);

                let now = Instant::now();
                self.frame_times.push_back(now);
                while self.frame_times.len() > FPS_WINDOW {
                    self.frame_times.pop_front();
                }
                let fps = rolling_fps(&self.frame_times);
                self.update_stats(|s| {
                    s.frames_rendered += 1;
                    s.last_render_time = Some(render_time);
                    s.fps = fps;
                });
            }
            Err(e) => {
                log::warn!("Render failed: {}", e);
                self.update_stats(|s| s.render_failures += 1);
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut stats);
    }
}

fn rolling_fps(times: &VecDeque<Instant>) -> f64 {
    match (times.front(), times.back()) {
        (Some(first), Some(last)) if times.len() > 1 => {
            let span = last.duration_since(*first).as_secs_f64();
            if span > 0.0 {
                (times.len() - 1) as f64 / span
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}
