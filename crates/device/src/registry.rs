//! Allow-list of panels keyed by USB vendor/product id.
//!
//! Some panels are recognised but have no wire protocol yet; they are named
//! in listings and logs but never opened.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Known panel models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    /// Thermalright Trofeo Vision, 1280x480, JPEG over HID
    TrofeoVision,
    /// In-memory panel for tests and headless runs
    Virtual,
    AliLcd,
    LianYun,
    LianYunV2,
    Xsail,
}

impl DeviceModel {
    pub fn name(self) -> &'static str {
        match self {
            DeviceModel::TrofeoVision => "Trofeo Vision",
            DeviceModel::Virtual => "Virtual Panel",
            DeviceModel::AliLcd => "ALi LCD",
            DeviceModel::LianYun => "LianYun LCD",
            DeviceModel::LianYunV2 => "LianYun V2 LCD",
            DeviceModel::Xsail => "Xsail LCD",
        }
    }

    pub fn id(self) -> DeviceId {
        match self {
            DeviceModel::TrofeoVision => TROFEO_VISION,
            DeviceModel::Virtual => VIRTUAL_PANEL,
            DeviceModel::AliLcd => ALI_LCD,
            DeviceModel::LianYun => LIANYUN,
            DeviceModel::LianYunV2 => LIANYUN_V2,
            DeviceModel::Xsail => XSAIL,
        }
    }

    /// Whether a panel protocol exists for the model
    pub fn is_supported(self) -> bool {
        matches!(self, DeviceModel::TrofeoVision | DeviceModel::Virtual)
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// USB vendor/product pair, written `vvvv:pppp` in hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

pub const TROFEO_VISION: DeviceId = DeviceId::new(0x0416, 0x5302);
pub const VIRTUAL_PANEL: DeviceId = DeviceId::new(0xFFFF, 0x0001);
pub const ALI_LCD: DeviceId = DeviceId::new(0x0416, 0x5406);
pub const LIANYUN: DeviceId = DeviceId::new(0x0416, 0x5408);
pub const LIANYUN_V2: DeviceId = DeviceId::new(0x0416, 0x5409);
pub const XSAIL: DeviceId = DeviceId::new(0x87AD, 0x70DB);

const KNOWN_DEVICES: &[(DeviceId, DeviceModel)] = &[
    (TROFEO_VISION, DeviceModel::TrofeoVision),
    (VIRTUAL_PANEL, DeviceModel::Virtual),
    (ALI_LCD, DeviceModel::AliLcd),
    (LIANYUN, DeviceModel::LianYun),
    (LIANYUN_V2, DeviceModel::LianYunV2),
    (XSAIL, DeviceModel::Xsail),
];

/// Model for a vendor/product pair, if recognised
pub fn lookup(id: DeviceId) -> Option<DeviceModel> {
    KNOWN_DEVICES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, model)| *model)
}

pub fn known_devices() -> impl Iterator<Item = (DeviceId, DeviceModel)> {
    KNOWN_DEVICES.iter().copied()
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected vvvv:pppp, got '{}'", s))?;
        let parse = |part: &str| {
            let part = part.trim_start_matches("0x");
            u16::from_str_radix(part, 16).map_err(|e| format!("bad id '{}': {}", part, e))
        };
        Ok(DeviceId::new(parse(vid)?, parse(pid)?))
    }
}

impl Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An enumerated USB interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    /// Transport-specific path used to open the device
    pub path: String,
    pub product: Option<String>,
}

impl DeviceInfo {
    pub fn model(&self) -> Option<DeviceModel> {
        lookup(self.id)
    }

    /// The model, only when it can be driven
    pub fn supported_model(&self) -> Option<DeviceModel> {
        self.model().filter(|m| m.is_supported())
    }
}

/// Pick the device to open: the preferred one when present, otherwise the
/// first supported device in enumeration order.
pub fn choose<'a>(devices: &'a [DeviceInfo], preferred: Option<DeviceId>) -> Option<&'a DeviceInfo> {
    if let Some(wanted) = preferred {
        if let Some(found) = devices
            .iter()
            .find(|d| d.id == wanted && d.supported_model().is_some())
        {
            return Some(found);
        }
        log::debug!("Preferred device {} not present", wanted);
    }
    devices.iter().find(|d| d.supported_model().is_some())
}
