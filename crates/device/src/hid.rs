//! USB HID transport backed by hidapi.

use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use std::time::Duration;

use crate::error::{DeviceError, Result};
use crate::registry::{DeviceId, DeviceInfo};
use crate::transport::{Connection, Transport};

pub struct HidTransport {
    api: HidApi,
}

impl HidTransport {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| DeviceError::Backend(e.to_string()))?;
        Ok(Self { api })
    }
}

impl Transport for HidTransport {
    fn name(&self) -> &str {
        "hid"
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        self.api
            .refresh_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        let devices = self
            .api
            .device_list()
            .map(|d| DeviceInfo {
                id: DeviceId::new(d.vendor_id(), d.product_id()),
                path: d.path().to_string_lossy().into_owned(),
                product: d.product_string().map(str::to_owned),
            })
            .collect();
        Ok(devices)
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn Connection>> {
        let open_err = |message: String| DeviceError::Open {
            device: format!("{} ({})", device.id, device.path),
            message,
        };
        let path = CString::new(device.path.as_bytes()).map_err(|e| open_err(e.to_string()))?;
        let handle = self
            .api
            .open_path(&path)
            .map_err(|e| open_err(e.to_string()))?;
        log::info!("Opened HID device {} at {}", device.id, device.path);
        Ok(Box::new(HidConnection { handle }))
    }
}

struct HidConnection {
    handle: HidDevice,
}

impl Connection for HidConnection {
    fn write(&mut self, report: &[u8]) -> Result<usize> {
        self.handle
            .write(report)
            .map_err(|e| DeviceError::Write(e.to_string()))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        self.handle
            .read_timeout(buf, millis)
            .map_err(|e| DeviceError::Read(e.to_string()))
    }
}
