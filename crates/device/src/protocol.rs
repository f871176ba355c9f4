//! Panel wire protocols: how a rendered frame becomes a sequence of reports.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thermal_engine_types::Frame;

use crate::error::{DeviceError, Result};
use crate::registry::DeviceModel;

/// HID payload size for the Trofeo Vision
pub const HID_PACKET_SIZE: usize = 512;
/// Prepended to every HID write
pub const HID_REPORT_ID: u8 = 0x00;
pub const TROFEO_MAGIC: [u8; 4] = [0xDA, 0xDB, 0xDC, 0xDD];
pub const TROFEO_JPEG_QUALITY: u8 = 80;
/// JPEG bytes that fit in the frame header packet after the 20-byte header
pub const TROFEO_HEADER_PAYLOAD: usize = HID_PACKET_SIZE - 20;

const CMD_INIT: u8 = 0x01;
const CMD_FRAME: u8 = 0x02;

pub const VIRTUAL_MAGIC: [u8; 4] = *b"VPNL";
pub const VIRTUAL_CHUNK_SIZE: usize = 4096;

/// Turns frames into transport reports for one panel model
pub trait PanelProtocol: Send {
    fn model(&self) -> DeviceModel;

    /// Reports sent once after opening the device
    fn init_packets(&self) -> Vec<Vec<u8>>;

    /// Whether the panel answers the init sequence
    fn expects_init_response(&self) -> bool {
        false
    }

    /// Encode a frame into the reports that transmit it, in order.
    fn frame_packets(&self, frame: &Frame) -> Result<Vec<Vec<u8>>>;
}

/// Wire protocol for the model; `None` for recognised panels without a driver
pub fn protocol_for(model: DeviceModel) -> Option<Box<dyn PanelProtocol>> {
    match model {
        DeviceModel::TrofeoVision => Some(Box::new(TrofeoVisionProtocol::default())),
        DeviceModel::Virtual => Some(Box::new(VirtualProtocol)),
        DeviceModel::AliLcd | DeviceModel::LianYun | DeviceModel::LianYunV2 | DeviceModel::Xsail => {
            None
        }
    }
}

/// JPEG frames in 512-byte HID reports
#[derive(Debug, Clone)]
pub struct TrofeoVisionProtocol {
    pub quality: u8,
}

impl Default for TrofeoVisionProtocol {
    fn default() -> Self {
        Self {
            quality: TROFEO_JPEG_QUALITY,
        }
    }
}

fn hid_report(payload: &[u8]) -> Vec<u8> {
    let mut report = Vec::with_capacity(HID_PACKET_SIZE + 1);
    report.push(HID_REPORT_ID);
    report.extend_from_slice(payload);
    report.resize(HID_PACKET_SIZE + 1, 0);
    report
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| DeviceError::Encode(e.to_string()))?;
    Ok(jpeg)
}

/// Split an encoded JPEG into the header report and zero-padded
/// continuation reports.
pub fn trofeo_frame_reports(jpeg: &[u8], width: u32, height: u32) -> Vec<Vec<u8>> {
    let mut header = [0u8; HID_PACKET_SIZE];
    header[..4].copy_from_slice(&TROFEO_MAGIC);
    header[4] = CMD_FRAME;
    header[8..10].copy_from_slice(&(width as u16).to_le_bytes());
    header[10..12].copy_from_slice(&(height as u16).to_le_bytes());
    header[12] = 0x02;
    header[16..20].copy_from_slice(&(jpeg.len() as u32).to_le_bytes());

    let first = jpeg.len().min(TROFEO_HEADER_PAYLOAD);
    header[20..20 + first].copy_from_slice(&jpeg[..first]);

    let mut reports = vec![hid_report(&header)];
    reports.extend(jpeg[first..].chunks(HID_PACKET_SIZE).map(hid_report));
    reports
}

impl PanelProtocol for TrofeoVisionProtocol {
    fn model(&self) -> DeviceModel {
        DeviceModel::TrofeoVision
    }

    fn init_packets(&self) -> Vec<Vec<u8>> {
        let mut init = [0u8; HID_PACKET_SIZE];
        init[..4].copy_from_slice(&TROFEO_MAGIC);
        init[12] = CMD_INIT;
        vec![hid_report(&init)]
    }

    fn expects_init_response(&self) -> bool {
        true
    }

    fn frame_packets(&self, frame: &Frame) -> Result<Vec<Vec<u8>>> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        log::trace!("Frame {} encoded to {} JPEG bytes", frame.sequence, jpeg.len());
        Ok(trofeo_frame_reports(&jpeg, frame.width, frame.height))
    }
}

/// Raw RGB565 frames for the in-memory panel: a header with the dimensions,
/// then little-endian pixel data in fixed-size chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualProtocol;

pub fn to_rgb565(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.pixels().len() / 2);
    for px in frame.pixels().chunks_exact(4) {
        let (r, g, b) = (px[0] as u16, px[1] as u16, px[2] as u16);
        let value = ((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3);
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

impl PanelProtocol for VirtualProtocol {
    fn model(&self) -> DeviceModel {
        DeviceModel::Virtual
    }

    fn init_packets(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn frame_packets(&self, frame: &Frame) -> Result<Vec<Vec<u8>>> {
        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&VIRTUAL_MAGIC);
        header.extend_from_slice(&(frame.width as u16).to_le_bytes());
        header.extend_from_slice(&(frame.height as u16).to_le_bytes());

        let data = to_rgb565(frame);
        let mut packets = vec![header];
        packets.extend(data.chunks(VIRTUAL_CHUNK_SIZE).map(<[u8]>::to_vec));
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_packet() {
        let packets = TrofeoVisionProtocol::default().init_packets();
        assert_eq!(packets.len(), 1);
        let init = &packets[0];
        assert_eq!(init.len(), 513);
        assert_eq!(init[0], HID_REPORT_ID);
        assert_eq!(&init[1..5], &TROFEO_MAGIC);
        assert_eq!(init[13], 0x01);
    }

    #[test]
    fn test_frame_header_layout() {
        let jpeg: Vec<u8> = (0..1200u32).map(|i| (i % 251) as u8).collect();
        let reports = trofeo_frame_reports(&jpeg, 1280, 480);
        let header = &reports[0][1..];
        assert_eq!(&header[..4], &TROFEO_MAGIC);
        assert_eq!(header[4], 0x02);
        assert_eq!(&header[8..12], &[0x00, 0x05, 0xE0, 0x01]);
        assert_eq!(header[12], 0x02);
        assert_eq!(&header[16..20], &1200u32.to_le_bytes());
        assert_eq!(&header[20..], &jpeg[..492]);
    }

    #[test]
    fn test_continuation_reports_are_padded() {
        // 492 in the header, 512 in the first continuation, 196 left over
        let jpeg = vec![0xABu8; 1200];
        let reports = trofeo_frame_reports(&jpeg, 1280, 480);
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.len() == 513 && r[0] == HID_REPORT_ID));
        let last = &reports[2][1..];
        assert!(last[..196].iter().all(|&b| b == 0xAB));
        assert!(last[196..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_small_jpeg_fits_header() {
        let reports = trofeo_frame_reports(&[1, 2, 3], 1280, 480);
        assert_eq!(reports.len(), 1);
        assert_eq!(&reports[0][21..24], &[1, 2, 3]);
        assert_eq!(reports[0][24], 0);
    }

    #[test]
    fn test_jpeg_frame_packets() {
        let frame = Frame::solid(1, [200, 40, 40, 255]);
        let packets = TrofeoVisionProtocol::default().frame_packets(&frame).unwrap();
        let len = u32::from_le_bytes([packets[0][17], packets[0][18], packets[0][19], packets[0][20]]) as usize;
        // SOI marker at the start of the payload
        assert_eq!(&packets[0][21..23], &[0xFF, 0xD8]);
        let expected = 1 + len.saturating_sub(TROFEO_HEADER_PAYLOAD).div_ceil(HID_PACKET_SIZE);
        assert_eq!(packets.len(), expected);
    }

    #[test]
    fn test_rgb565_conversion() {
        let frame = Frame::from_rgba(0, 2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]).unwrap();
        assert_eq!(to_rgb565(&frame), vec![0x00, 0xF8, 0x1F, 0x00]);
    }

    #[test]
    fn test_protocol_only_for_supported_models() {
        assert!(protocol_for(DeviceModel::TrofeoVision).is_some());
        assert!(protocol_for(DeviceModel::Xsail).is_none());
        assert!(protocol_for(DeviceModel::AliLcd).is_none());
    }

    #[test]
    fn test_virtual_packets() {
        let frame = Frame::from_rgba(0, 64, 64, vec![0; 64 * 64 * 4]).unwrap();
        let packets = VirtualProtocol.frame_packets(&frame).unwrap();
        assert_eq!(&packets[0][..4], &VIRTUAL_MAGIC);
        assert_eq!(packets.len(), 1 + (64 * 64 * 2) / VIRTUAL_CHUNK_SIZE);
    }
}
