//! Device link: discovers the panel, keeps it connected, and streams the
//! most recent frame to it from a dedicated thread.

use crossbeam::channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thermal_engine_core::{Backoff, BackoffPolicy, StatusCell};
use thermal_engine_types::{ConnectionState, Fault, FaultKind, Frame};

use crate::protocol::{protocol_for, PanelProtocol, HID_PACKET_SIZE};
use crate::registry::{self, DeviceId};
use crate::slot::FrameSlot;
use crate::transport::{Connection, Transport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Panel to use when several are attached
    #[serde(default)]
    pub preferred: Option<DeviceId>,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default = "default_init_timeout_ms")]
    pub init_response_timeout_ms: u64,
}

fn default_init_timeout_ms() -> u64 {
    2000
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            preferred: None,
            backoff: BackoffPolicy::default(),
            init_response_timeout_ms: default_init_timeout_ms(),
        }
    }
}

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queued, dropping an older frame that had not started sending
    ReplacedPending,
    /// No panel connected; the frame was dropped
    SkippedDisconnected,
}

#[derive(Debug, Default)]
struct LinkCounters {
    sent: AtomicU64,
    skipped: AtomicU64,
    replaced: AtomicU64,
    write_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub frames_replaced: u64,
    pub write_failures: u64,
}

impl LinkCounters {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.sent.load(Ordering::Relaxed),
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            frames_replaced: self.replaced.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkCommand {
    Removed,
    Resume,
    Shutdown,
}

pub struct DeviceLink {
    slot: Arc<FrameSlot>,
    status: Arc<StatusCell>,
    counters: Arc<LinkCounters>,
    abort: Arc<AtomicBool>,
    commands: Sender<LinkCommand>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceLink {
    pub fn start(transport: Box<dyn Transport>, config: LinkConfig) -> std::io::Result<Self> {
        let slot = Arc::new(FrameSlot::new());
        let status = Arc::new(StatusCell::new("device"));
        let counters = Arc::new(LinkCounters::default());
        let abort = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = bounded(16);

        let worker = LinkWorker {
            transport,
            backoff: Backoff::new(config.backoff),
            config,
            slot: Arc::clone(&slot),
            status: Arc::clone(&status),
            counters: Arc::clone(&counters),
            abort: Arc::clone(&abort),
            connection: None,
            next_attempt: Instant::now(),
        };

        let handle = thread::Builder::new()
            .name("device-link".into())
            .spawn(move || worker.run(command_rx))?;

        Ok(Self {
            slot,
            status,
            counters,
            abort,
            commands,
            handle: Some(handle),
        })
    }

    /// Hand a frame to the link. Never blocks.
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        self.submitter().submit(frame)
    }

    /// Cloneable handle for submitting frames from another thread
    pub fn submitter(&self) -> FrameSubmitter {
        FrameSubmitter {
            slot: Arc::clone(&self.slot),
            status: Arc::clone(&self.status),
            counters: Arc::clone(&self.counters),
            commands: self.commands.clone(),
        }
    }

    pub fn status(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    /// The OS reported the panel was unplugged
    pub fn notify_removed(&self) {
        let _ = self.commands.try_send(LinkCommand::Removed);
    }

    /// The system woke from sleep; reopen the panel
    pub fn notify_resume(&self) {
        let _ = self.commands.try_send(LinkCommand::Resume);
    }

    /// Abort any transmission in progress, release the device and stop the
    /// thread.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::info!("Stopping device link");
            self.abort.store(true, Ordering::SeqCst);
            let _ = self.commands.send(LinkCommand::Shutdown);
            if handle.join().is_err() {
                log::error!("Device link thread panicked");
            }
        }
    }
}

/// Submit side of a [`DeviceLink`]. After the link shuts down every frame
/// is skipped as disconnected.
#[derive(Clone)]
pub struct FrameSubmitter {
    slot: Arc<FrameSlot>,
    status: Arc<StatusCell>,
    counters: Arc<LinkCounters>,
    commands: Sender<LinkCommand>,
}

impl FrameSubmitter {
    /// Same as [`DeviceLink::notify_resume`]
    pub fn notify_resume(&self) {
        let _ = self.commands.try_send(LinkCommand::Resume);
    }

    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        if self.status.state() != ConnectionState::Connected {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::SkippedDisconnected;
        }
        match self.slot.put(frame) {
            Some(_) => {
                self.counters.replaced.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::ReplacedPending
            }
            None => SubmitOutcome::Queued,
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ActiveConnection {
    handle: Box<dyn Connection>,
    protocol: Box<dyn PanelProtocol>,
    id: DeviceId,
}

struct LinkWorker {
    transport: Box<dyn Transport>,
    config: LinkConfig,
    backoff: Backoff,
    slot: Arc<FrameSlot>,
    status: Arc<StatusCell>,
    counters: Arc<LinkCounters>,
    abort: Arc<AtomicBool>,
    connection: Option<ActiveConnection>,
    next_attempt: Instant,
}

impl LinkWorker {
    fn run(mut self, commands: Receiver<LinkCommand>) {
        log::warn!("=== Device link started ({}) ===", self.transport.name());
        let waker = self.slot.waker().clone();

        loop {
            if self.connection.is_none() && Instant::now() >= self.next_attempt {
                self.try_connect();
            }

            let idle = if self.connection.is_some() {
                Duration::from_secs(1)
            } else {
                self.next_attempt
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_millis(1))
            };

            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(LinkCommand::Removed) => {
                        self.disconnect(FaultKind::DeviceDisconnected, "device removed".into());
                    }
                    Ok(LinkCommand::Resume) => {
                        log::warn!("=== Resume from sleep, reopening panel ===");
                        self.disconnect(FaultKind::DeviceDisconnected, "system resumed".into());
                        self.backoff.reset();
                        self.next_attempt = Instant::now();
                    }
                    Ok(LinkCommand::Shutdown) | Err(_) => break,
                },
                recv(waker) -> _ => {
                    if let Some(frame) = self.slot.take() {
                        self.transmit(frame);
                    }
                }
                default(idle) => {}
            }
        }

        if self.connection.take().is_some() {
            log::info!("Released panel");
        }
        let _ = self.status.transition(ConnectionState::Disconnected);
        log::info!("Device link stopped");
    }

    fn try_connect(&mut self) {
        if self.status.transition(ConnectionState::Connecting).is_err() {
            return;
        }

        let devices = match self.transport.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                self.fail_connect(FaultKind::DeviceNotFound, e.to_string());
                return;
            }
        };
        let Some(device) = registry::choose(&devices, self.config.preferred).cloned() else {
            let message = match devices.iter().find_map(|d| d.model().map(|m| (m, d.id))) {
                Some((model, id)) => format!("{} ({}) attached but has no driver yet", model, id),
                None => "no supported panel attached".to_string(),
            };
            self.fail_connect(FaultKind::DeviceNotFound, message);
            return;
        };
        let Some((model, protocol)) = device
            .supported_model()
            .and_then(|model| protocol_for(model).map(|protocol| (model, protocol)))
        else {
            self.fail_connect(FaultKind::DeviceNotFound, format!("unsupported device {}", device.id));
            return;
        };

        let handle = match self.transport.open(&device) {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_connect(FaultKind::DeviceNotFound, e.to_string());
                return;
            }
        };
        let mut active = ActiveConnection {
            handle,
            protocol,
            id: device.id,
        };

        if let Err(e) = self.initialize(&mut active) {
            self.fail_connect(FaultKind::DeviceWriteFailed, e);
            return;
        }

        log::warn!("=== Connected to {} ({}) ===", model, device.id);
        self.connection = Some(active);
        self.backoff.reset();
        let _ = self.status.transition(ConnectionState::Connected);
    }

    fn initialize(&self, active: &mut ActiveConnection) -> Result<(), String> {
        for packet in active.protocol.init_packets() {
            active
                .handle
                .write(&packet)
                .map_err(|e| format!("init write failed: {}", e))?;
        }
        if active.protocol.expects_init_response() {
            let mut buf = [0u8; HID_PACKET_SIZE];
            let timeout = Duration::from_millis(self.config.init_response_timeout_ms);
            match active.handle.read_timeout(&mut buf, timeout) {
                Ok(0) => log::info!("No init response from {}", active.id),
                Ok(n) => log::info!("Init response from {}: {}", active.id, hex_prefix(&buf[..n], 36)),
                Err(e) => log::warn!("Reading init response failed: {}", e),
            }
        }
        Ok(())
    }

    fn fail_connect(&mut self, kind: FaultKind, message: String) {
        let _ = self
            .status
            .fail(ConnectionState::Disconnected, Fault::new(kind, message));
        let delay = self.backoff.next_delay();
        log::debug!("Next panel discovery in {:?}", delay);
        self.next_attempt = Instant::now() + delay;
    }

    /// Drop the handle and schedule a reconnect
    fn disconnect(&mut self, kind: FaultKind, message: String) {
        if self.connection.take().is_none() {
            return;
        }
        self.slot.clear();
        log::warn!("Panel disconnected: {}", message);
        let _ = self
            .status
            .fail(ConnectionState::Disconnected, Fault::new(kind, message));
        let delay = self.backoff.next_delay();
        self.next_attempt = Instant::now() + delay;
    }

    /// Send one frame whole. A write failure discards the rest of it.
    fn transmit(&mut self, frame: Frame) {
        let Some(active) = self.connection.as_mut() else {
            return;
        };

        let packets = match active.protocol.frame_packets(&frame) {
            Ok(packets) => packets,
            Err(e) => {
                log::warn!("Dropping frame {}: {}", frame.sequence, e);
                return;
            }
        };

        for packet in &packets {
            if self.abort.load(Ordering::SeqCst) {
                log::debug!("Frame {} aborted by shutdown", frame.sequence);
                return;
            }
            if let Err(e) = active.handle.write(packet) {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                self.disconnect(FaultKind::DeviceWriteFailed, e.to_string());
                return;
            }
        }
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }
}

fn hex_prefix(data: &[u8], max: usize) -> String {
    let mut out: Vec<String> = data.iter().take(max).map(|b| format!("{:02X}", b)).collect();
    if data.len() > max {
        out.push(format!("... ({} bytes)", data.len()));
    }
    out.join(" ")
}
