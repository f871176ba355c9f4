//! Video backgrounds decoded through an external `ffmpeg`.
//!
//! `ffprobe` reports the stream size and frame rate, then `ffmpeg` writes
//! raw RGBA frames scaled to fit the panel on its stdout. Decoding is slow
//! and blocking, so [`ImageCache`](crate::image_cache::ImageCache) runs it on
//! a loader thread and only keeps the plain RGBA buffers.

use image::RgbaImage;
use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::RenderError;

/// Frames kept per video; longer clips loop over their opening
pub const MAX_VIDEO_FRAMES: usize = 300;
const DEFAULT_FPS: f64 = 30.0;
const MAX_FPS: f64 = 120.0;

/// Decoded frames of a video, all shown for `frame_duration`
pub struct VideoFrames {
    pub frames: Vec<RgbaImage>,
    pub frame_duration: Duration,
}

/// Turns a video file into frames no larger than `max_size`
pub trait VideoDecoder: Send + Sync {
    fn decode(&self, path: &Path, max_size: (u32, u32)) -> Result<VideoFrames, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Parse `ffprobe -of json` output for the first video stream
pub fn parse_stream_info(json: &str) -> Result<StreamInfo, String> {
    let output: FfprobeOutput = serde_json::from_str(json).map_err(|e| format!("bad ffprobe output: {}", e))?;
    let stream = output.streams.first().ok_or("no video stream")?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no size".into()),
    };
    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(DEFAULT_FPS)
        .clamp(1.0, MAX_FPS);
    Ok(StreamInfo { width, height, fps })
}

/// `"30000/1001"` or `"25"` to frames per second
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((numer, denom)) => {
            let numer: f64 = numer.trim().parse().ok()?;
            let denom: f64 = denom.trim().parse().ok()?;
            if denom == 0.0 {
                return None;
            }
            numer / denom
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Largest even size within `max` keeping the aspect ratio. Never upscales.
pub fn scaled_size(src: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (w, h) = (src.0.max(1) as f64, src.1.max(1) as f64);
    let scale = (max.0 as f64 / w).min(max.1 as f64 / h).min(1.0);
    let even = |v: f64| ((v.round() as u32) & !1).max(2);
    (even(w * scale), even(h * scale))
}

pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    max_frames: usize,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::with_programs("ffmpeg", "ffprobe")
    }
}

impl FfmpegDecoder {
    pub fn with_programs(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            max_frames: MAX_VIDEO_FRAMES,
        }
    }

    fn stream_info(&self, path: &Path) -> Result<StreamInfo, RenderError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,r_frame_rate", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(path, &self.ffprobe, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(video_error(path, format!("ffprobe failed: {}", stderr.trim())));
        }
        parse_stream_info(&String::from_utf8_lossy(&output.stdout)).map_err(|message| video_error(path, message))
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn decode(&self, path: &Path, max_size: (u32, u32)) -> Result<VideoFrames, RenderError> {
        let info = self.stream_info(path)?;
        let (width, height) = scaled_size((info.width, info.height), max_size);
        log::info!(
            "Decoding video {} ({}x{} at {:.2} fps, scaled to {}x{})",
            path.display(),
            info.width,
            info.height,
            info.fps,
            width,
            height
        );

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-an", "-frames:v", &self.max_frames.to_string()])
            .args(["-vf", &format!("scale={}:{}", width, height)])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(path, &self.ffmpeg, e))?;
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(video_error(path, "ffmpeg stdout not captured".into()));
        };

        let frame_len = width as usize * height as usize * 4;
        let mut frames = Vec::new();
        let mut read_error = None;
        while frames.len() < self.max_frames {
            let mut buffer = vec![0u8; frame_len];
            match stdout.read_exact(&mut buffer) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
            match RgbaImage::from_raw(width, height, buffer) {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        drop(stdout);
        let _ = child.kill();
        let _ = child.wait();

        if let Some(e) = read_error {
            return Err(video_error(path, format!("reading frames: {}", e)));
        }
        if frames.is_empty() {
            return Err(video_error(path, "no frames decoded".into()));
        }
        if frames.len() == self.max_frames {
            log::warn!("Video {} truncated to {} frames", path.display(), self.max_frames);
        }
        Ok(VideoFrames {
            frames,
            frame_duration: Duration::from_secs_f64(1.0 / info.fps),
        })
    }
}

fn video_error(path: &Path, message: String) -> RenderError {
    RenderError::Video {
        path: path.to_path_buf(),
        message,
    }
}

fn spawn_error(path: &Path, program: &Path, e: std::io::Error) -> RenderError {
    let message = if e.kind() == ErrorKind::NotFound {
        format!("{} not found", program.display())
    } else {
        format!("failed to start {}: {}", program.display(), e)
    };
    video_error(path, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_stream_info() {
        let json = r#"{"programs": [], "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "60/1"}]}"#;
        assert_eq!(
            parse_stream_info(json),
            Ok(StreamInfo {
                width: 1920,
                height: 1080,
                fps: 60.0
            })
        );

        // unknown rate falls back
        let json = r#"{"streams": [{"width": 640, "height": 480, "r_frame_rate": "0/0"}]}"#;
        assert_eq!(parse_stream_info(json).map(|p| p.fps), Ok(DEFAULT_FPS));

        assert!(parse_stream_info(r#"{"streams": []}"#).is_err());
        assert!(parse_stream_info("not json").is_err());
    }

    #[test]
    fn test_scaled_size() {
        assert_eq!(scaled_size((1920, 1080), (1280, 480)), (852, 480));
        assert_eq!(scaled_size((2560, 960), (1280, 480)), (1280, 480));
        // small clips keep their size
        assert_eq!(scaled_size((320, 240), (1280, 480)), (320, 240));
        assert_eq!(scaled_size((321, 241), (1280, 480)), (320, 240));
    }

    #[test]
    fn test_missing_ffmpeg_is_an_error() {
        let decoder = FfmpegDecoder::with_programs("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        match decoder.decode(Path::new("/tmp/loop.mp4"), (1280, 480)) {
            Err(RenderError::Video { message, .. }) => assert!(message.contains("not found"), "{}", message),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("decoded without ffmpeg"),
        }
    }
}
