//! thermal-engine-device: USB LCD panel support.
//!
//! Panels are matched against a small allow-list, opened through a
//! [`Transport`], and fed frames by a [`DeviceLink`] running on its own
//! thread. The link keeps at most one frame pending and never blocks the
//! caller.

mod error;
#[cfg(feature = "hid")]
mod hid;
mod link;
pub mod protocol;
pub mod registry;
mod slot;
mod transport;
mod virtual_panel;

pub use error::{DeviceError, Result};
#[cfg(feature = "hid")]
pub use hid::HidTransport;
pub use link::{DeviceLink, FrameSubmitter, LinkConfig, LinkStats, SubmitOutcome};
pub use protocol::{PanelProtocol, TrofeoVisionProtocol, VirtualProtocol};
pub use registry::{DeviceId, DeviceInfo, DeviceModel};
pub use slot::FrameSlot;
pub use transport::{Connection, Transport};
pub use virtual_panel::{VirtualPanel, VirtualTransport};

/// Attached devices with the model each maps to, if supported
pub fn list_devices(transport: &mut dyn Transport) -> Result<Vec<(DeviceInfo, Option<DeviceModel>)>> {
    Ok(transport
        .enumerate()?
        .into_iter()
        .map(|d| {
            let model = d.model();
            (d, model)
        })
        .collect())
}
