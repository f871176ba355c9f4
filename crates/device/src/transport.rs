//! Transport seam between the link thread and the USB stack.

use std::time::Duration;

use crate::error::Result;
use crate::registry::DeviceInfo;

/// Discovers and opens panels
pub trait Transport: Send {
    fn name(&self) -> &str;

    /// List every interface the transport can see. Filtering against the
    /// allow-list is done by the caller.
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>>;

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn Connection>>;
}

/// An open panel handle. Dropping it releases the device.
pub trait Connection: Send {
    /// Write one report. Returns the number of bytes written.
    fn write(&mut self, report: &[u8]) -> Result<usize>;

    /// Read one report, waiting at most `timeout`. Returns 0 on timeout.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}
