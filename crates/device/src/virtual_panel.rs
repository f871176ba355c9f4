//! In-memory panel speaking the virtual RGB565 protocol.
//!
//! Used by tests and by headless runs. Knobs simulate a slow panel, a panel
//! that fails after a number of writes, and unplugging.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{DeviceError, Result};
use crate::protocol::VIRTUAL_MAGIC;
use crate::registry::{DeviceInfo, VIRTUAL_PANEL};
use crate::transport::{Connection, Transport};

const FPS_WINDOW: usize = 60;

#[derive(Debug, Default)]
struct PanelState {
    plugged: bool,
    open_handles: usize,
    opens: usize,
    stall: Duration,
    /// Writes left before a write fails; `None` never fails
    fail_after: Option<usize>,
    /// (width, height, received bytes) of the frame being assembled
    assembling: Option<(u16, u16, Vec<u8>)>,
    frames: u64,
    last_frame: Option<(u16, u16, Vec<u8>)>,
    frame_times: Vec<Instant>,
}

/// Shared handle to the simulated panel
#[derive(Debug, Clone)]
pub struct VirtualPanel {
    state: Arc<Mutex<PanelState>>,
}

impl Default for VirtualPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPanel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PanelState {
                plugged: true,
                ..PanelState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PanelState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn transport(&self) -> VirtualTransport {
        VirtualTransport {
            panel: self.clone(),
        }
    }

    /// Delay every write by `stall`
    pub fn set_stall(&self, stall: Duration) {
        self.lock().stall = stall;
    }

    /// Fail the write after the next `writes` successful ones
    pub fn fail_after(&self, writes: usize) {
        self.lock().fail_after = Some(writes);
    }

    pub fn unplug(&self) {
        let mut state = self.lock();
        state.plugged = false;
        state.assembling = None;
    }

    pub fn plug(&self) {
        let mut state = self.lock();
        state.plugged = true;
        state.fail_after = None;
    }

    pub fn frames_received(&self) -> u64 {
        self.lock().frames
    }

    /// Times the panel was opened
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    /// Dimensions and RGB565 data of the last complete frame
    pub fn last_frame(&self) -> Option<(u16, u16, Vec<u8>)> {
        self.lock().last_frame.clone()
    }

    /// Rolling frame rate over the last frames received
    pub fn fps(&self) -> f64 {
        let state = self.lock();
        let (Some(first), Some(last)) = (state.frame_times.first(), state.frame_times.last())
        else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first).as_secs_f64();
        if state.frame_times.len() < 2 || elapsed <= 0.0 {
            return 0.0;
        }
        (state.frame_times.len() - 1) as f64 / elapsed
    }
}

pub struct VirtualTransport {
    panel: VirtualPanel,
}

impl Transport for VirtualTransport {
    fn name(&self) -> &str {
        "virtual"
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        if !self.panel.lock().plugged {
            return Ok(Vec::new());
        }
        Ok(vec![DeviceInfo {
            id: VIRTUAL_PANEL,
            path: "virtual:0".into(),
            product: Some("Virtual Panel".into()),
        }])
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn Connection>> {
        let mut state = self.panel.lock();
        if !state.plugged {
            return Err(DeviceError::Open {
                device: device.path.clone(),
                message: "not present".into(),
            });
        }
        state.open_handles += 1;
        state.opens += 1;
        log::info!("Virtual panel opened");
        Ok(Box::new(VirtualConnection {
            panel: self.panel.clone(),
        }))
    }
}

struct VirtualConnection {
    panel: VirtualPanel,
}

impl Connection for VirtualConnection {
    fn write(&mut self, report: &[u8]) -> Result<usize> {
        let stall = self.panel.lock().stall;
        if !stall.is_zero() {
            thread::sleep(stall);
        }

        let mut state = self.panel.lock();
        if !state.plugged {
            return Err(DeviceError::Unplugged);
        }
        let fail_after = state.fail_after;
        match fail_after {
            Some(0) => return Err(DeviceError::Write("simulated write failure".into())),
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }

        if report.len() == 8 && report[..4] == VIRTUAL_MAGIC {
            let width = u16::from_le_bytes([report[4], report[5]]);
            let height = u16::from_le_bytes([report[6], report[7]]);
            state.assembling = Some((width, height, Vec::new()));
            return Ok(report.len());
        }

        let complete = match state.assembling.as_mut() {
            Some((width, height, data)) => {
                data.extend_from_slice(report);
                data.len() >= *width as usize * *height as usize * 2
            }
            None => false,
        };
        if complete {
            state.last_frame = state.assembling.take();
            state.frames += 1;
            state.frame_times.push(Instant::now());
            if state.frame_times.len() > FPS_WINDOW {
                state.frame_times.remove(0);
            }
        }
        Ok(report.len())
    }

    fn read_timeout(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        Ok(0)
    }
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        let mut state = self.panel.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        state.assembling = None;
    }
}
