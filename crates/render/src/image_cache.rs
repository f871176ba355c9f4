//! Decoded image, GIF and video frame cache.
//!
//! Images are decoded once with the `image` crate and kept as cairo
//! surfaces. Videos are decoded on a loader thread by a [`VideoDecoder`] and
//! kept as RGBA buffers; only the frame being shown becomes a surface. The
//! cache is bounded and evicts the least recently used entry.

use cairo::{Format, ImageSurface};
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thermal_engine_types::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

use crate::error::RenderError;
use crate::video::{FfmpegDecoder, VideoDecoder, VideoFrames};

const MAX_ENTRIES: usize = 16;
/// Browsers treat near-zero GIF delays as 100 ms
const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

enum Frames {
    Surfaces(Vec<ImageSurface>),
    /// Video frames stay RGBA until shown
    Rgba {
        frames: Vec<RgbaImage>,
        shown: RefCell<Option<(usize, ImageSurface)>>,
    },
}

/// A decoded still image, animation or video
pub struct DecodedImage {
    frames: Frames,
    delays: Vec<Duration>,
    total: Duration,
}

impl DecodedImage {
    fn from_video(video: VideoFrames) -> Self {
        let delays = vec![video.frame_duration; video.frames.len()];
        let total = delays.iter().sum();
        Self {
            frames: Frames::Rgba {
                frames: video.frames,
                shown: RefCell::new(None),
            },
            delays,
            total,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.delays.len()
    }

    pub fn size(&self) -> (i32, i32) {
        match &self.frames {
            Frames::Surfaces(surfaces) => surfaces.first().map(|s| (s.width(), s.height())),
            Frames::Rgba { frames, .. } => frames.first().map(|f| (f.width() as i32, f.height() as i32)),
        }
        .unwrap_or((0, 0))
    }

    /// Frame index shown `elapsed` into a looping playback
    pub fn frame_index(&self, elapsed: Duration) -> usize {
        if self.delays.len() <= 1 || self.total.is_zero() {
            return 0;
        }
        let mut t = Duration::from_nanos((elapsed.as_nanos() % self.total.as_nanos()) as u64);
        for (i, delay) in self.delays.iter().enumerate() {
            if t < *delay {
                return i;
            }
            t -= *delay;
        }
        self.delays.len() - 1
    }

    pub fn frame(&self, index: usize) -> Option<ImageSurface> {
        match &self.frames {
            Frames::Surfaces(surfaces) => surfaces.get(index).cloned(),
            Frames::Rgba { frames, shown } => {
                if let Some((shown_index, surface)) = &*shown.borrow() {
                    if *shown_index == index {
                        return Some(surface.clone());
                    }
                }
                let surface = match rgba_to_surface(frames.get(index)?) {
                    Ok(surface) => surface,
                    Err(e) => {
                        log::warn!("Video frame {} unavailable: {}", index, e);
                        return None;
                    }
                };
                *shown.borrow_mut() = Some((index, surface.clone()));
                Some(surface)
            }
        }
    }
}

/// Convert straight RGBA to a premultiplied cairo ARGB32 surface
pub fn rgba_to_surface(image: &RgbaImage) -> Result<ImageSurface, RenderError> {
    let (width, height) = image.dimensions();
    let stride = Format::ARgb32
        .stride_for_width(width)
        .map_err(RenderError::Cairo)?;
    let mut data = vec![0u8; stride as usize * height as usize];
    for (y, row) in image.rows().enumerate() {
        let offset = y * stride as usize;
        for (x, px) in row.enumerate() {
            let [r, g, b, a] = px.0;
            let premul = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
            let argb = u32::from_be_bytes([a, premul(r), premul(g), premul(b)]);
            let i = offset + x * 4;
            data[i..i + 4].copy_from_slice(&argb.to_ne_bytes());
        }
    }
    Ok(ImageSurface::create_for_data(
        data,
        Format::ARgb32,
        width as i32,
        height as i32,
        stride,
    )?)
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gif"))
        .unwrap_or(false)
}

fn decode(path: &Path) -> Result<DecodedImage, RenderError> {
    let image_err = |message: String| RenderError::Image {
        path: path.to_path_buf(),
        message,
    };

    let mut frames = Vec::new();
    let mut delays = Vec::new();
    if is_gif(path) {
        let file = File::open(path).map_err(|e| image_err(e.to_string()))?;
        let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| image_err(e.to_string()))?;
        let decoded = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| image_err(e.to_string()))?;
        for frame in decoded {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let mut delay = Duration::from_millis((numer / denom.max(1)) as u64);
            if delay < MIN_FRAME_DELAY {
                delay = DEFAULT_FRAME_DELAY;
            }
            frames.push(rgba_to_surface(frame.buffer())?);
            delays.push(delay);
        }
    } else {
        let image = image::open(path).map_err(|e| image_err(e.to_string()))?;
        frames.push(rgba_to_surface(&image.to_rgba8())?);
        delays.push(Duration::ZERO);
    }

    if frames.is_empty() {
        return Err(image_err("no frames".into()));
    }
    let total = delays.iter().sum();
    log::debug!("Decoded {} ({} frames)", path.display(), frames.len());
    Ok(DecodedImage {
        frames: Frames::Surfaces(frames),
        delays,
        total,
    })
}

type VideoResult = Result<VideoFrames, RenderError>;

struct Entry {
    image: Option<Rc<DecodedImage>>,
    /// Pending video decode
    loading: Option<Receiver<VideoResult>>,
    last_used: u64,
}

impl Entry {
    fn poll_video(&mut self, path: &Path) {
        let result = match &self.loading {
            Some(rx) => rx.try_recv(),
            None => return,
        };
        match result {
            Ok(Ok(video)) => {
                log::info!("Video {} ready ({} frames)", path.display(), video.frames.len());
                self.image = Some(Rc::new(DecodedImage::from_video(video)));
                self.loading = None;
            }
            Ok(Err(e)) => {
                log::warn!("{}", e);
                self.loading = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                log::warn!("Video decoder for {} exited without a result", path.display());
                self.loading = None;
            }
        }
    }
}

/// Bounded cache of decoded images keyed by path
pub struct ImageCache {
    entries: HashMap<PathBuf, Entry>,
    clock: u64,
    video: Arc<dyn VideoDecoder>,
    video_size: (u32, u32),
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache {
    pub fn new() -> Self {
        Self::with_video_decoder(Arc::new(FfmpegDecoder::default()))
    }

    pub fn with_video_decoder(video: Arc<dyn VideoDecoder>) -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
            video,
            video_size: (DISPLAY_WIDTH, DISPLAY_HEIGHT),
        }
    }

    /// Decoded image for `path`. Failures are remembered so a missing file
    /// is reported once, not every frame.
    pub fn get(&mut self, path: &Path) -> Option<Rc<DecodedImage>> {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(path) {
            entry.last_used = self.clock;
            return entry.image.clone();
        }

        let image = match decode(path) {
            Ok(image) => Some(Rc::new(image)),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        };
        self.insert(
            path,
            Entry {
                image: image.clone(),
                loading: None,
                last_used: self.clock,
            },
        );
        image
    }

    /// Decoded video for `path`, or `None` while it is still loading or
    /// when decoding failed. The first call starts the decode.
    pub fn get_video(&mut self, path: &Path) -> Option<Rc<DecodedImage>> {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(path) {
            entry.last_used = self.clock;
            entry.poll_video(path);
            return entry.image.clone();
        }

        let (tx, rx) = bounded(1);
        let decoder = Arc::clone(&self.video);
        let owned = path.to_path_buf();
        let max_size = self.video_size;
        let spawned = thread::Builder::new()
            .name("video-decode".into())
            .spawn(move || {
                let _ = tx.send(decoder.decode(&owned, max_size));
            });
        let loading = match spawned {
            Ok(_) => Some(rx),
            Err(e) => {
                log::warn!("Failed to start video decoder for {}: {}", path.display(), e);
                None
            }
        };
        self.insert(
            path,
            Entry {
                image: None,
                loading,
                last_used: self.clock,
            },
        );
        None
    }

    fn insert(&mut self, path: &Path, entry: Entry) {
        if self.entries.len() >= MAX_ENTRIES {
            self.evict_oldest();
        }
        self.entries.insert(path.to_path_buf(), entry);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(p, _)| p.clone());
        if let Some(path) = oldest {
            log::debug!("Evicting cached image {}", path.display());
            self.entries.remove(&path);
        }
    }

    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame as GifFrame, Rgba};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Four solid frames at 25 fps, shaded by index
    struct StripeDecoder {
        calls: AtomicUsize,
    }

    impl VideoDecoder for StripeDecoder {
        fn decode(&self, _path: &Path, max_size: (u32, u32)) -> Result<VideoFrames, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(max_size, (DISPLAY_WIDTH, DISPLAY_HEIGHT));
            Ok(VideoFrames {
                frames: (0..4u8).map(|i| RgbaImage::from_pixel(8, 4, Rgba([i * 60, 0, 0, 255]))).collect(),
                frame_duration: Duration::from_millis(40),
            })
        }
    }

    struct BrokenDecoder {
        calls: AtomicUsize,
    }

    impl VideoDecoder for BrokenDecoder {
        fn decode(&self, path: &Path, _max_size: (u32, u32)) -> Result<VideoFrames, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RenderError::Video {
                path: path.to_path_buf(),
                message: "ffmpeg not found".into(),
            })
        }
    }

    fn wait_for_video(cache: &mut ImageCache, path: &Path) -> Option<Rc<DecodedImage>> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(video) = cache.get_video(path) {
                return Some(video);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    /// Red channel of the top-left pixel, read through a copy since the
    /// cache still holds the shown surface
    fn red_at_origin(surface: &ImageSurface) -> u32 {
        let mut copy = ImageSurface::create(Format::ARgb32, 1, 1).unwrap();
        {
            let cr = cairo::Context::new(&copy).unwrap();
            cr.set_source_surface(surface, 0.0, 0.0).unwrap();
            cr.paint().unwrap();
        }
        copy.flush();
        let data = copy.data().unwrap();
        let px = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
        (px >> 16) & 0xff
    }

    fn write_gif(path: &Path, delays_ms: &[u32]) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for (i, ms) in delays_ms.iter().enumerate() {
            let shade = (i * 80) as u8;
            let buffer = RgbaImage::from_pixel(4, 4, Rgba([shade, 0, 0, 255]));
            let frame = GifFrame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(*ms, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }

    #[test]
    fn test_rgba_to_surface_premultiplies() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 0, 128]));
        let mut surface = rgba_to_surface(&image).unwrap();
        let stride = surface.stride() as usize;
        let data = surface.data().unwrap();
        let px = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
        assert_eq!(px >> 24, 128);
        assert_eq!((px >> 16) & 0xff, 100);
        assert_eq!((px >> 8) & 0xff, 50);
        assert!(stride >= 8);
    }

    #[test]
    fn test_gif_frames_and_timing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spin.gif");
        write_gif(&path, &[100, 200, 100]);

        let mut cache = ImageCache::new();
        let image = cache.get(&path).unwrap();
        assert_eq!(image.frame_count(), 3);
        assert_eq!(image.size(), (4, 4));
        assert_eq!(image.frame_index(Duration::from_millis(50)), 0);
        assert_eq!(image.frame_index(Duration::from_millis(150)), 1);
        assert_eq!(image.frame_index(Duration::from_millis(350)), 2);
        // loops
        assert_eq!(image.frame_index(Duration::from_millis(450)), 0);
    }

    #[test]
    fn test_missing_file_is_cached_as_failure() {
        let mut cache = ImageCache::new();
        assert!(cache.get(Path::new("/nonexistent/logo.png")).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(Path::new("/nonexistent/logo.png")).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ImageCache::new();
        for i in 0..MAX_ENTRIES + 3 {
            let path = dir.path().join(format!("{}.png", i));
            RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])).save(&path).unwrap();
            cache.get(&path);
        }
        assert_eq!(cache.len(), MAX_ENTRIES);
    }

    #[test]
    fn test_video_loads_in_background() {
        let decoder = Arc::new(StripeDecoder {
            calls: AtomicUsize::new(0),
        });
        let mut cache = ImageCache::with_video_decoder(decoder.clone());
        let path = Path::new("/themes/loop.mp4");

        let video = wait_for_video(&mut cache, path).expect("video never loaded");
        assert_eq!(video.frame_count(), 4);
        assert_eq!(video.size(), (8, 4));
        assert_eq!(video.frame_index(Duration::from_millis(50)), 1);
        assert_eq!(video.frame_index(Duration::from_millis(130)), 3);
        // loops after 160 ms
        assert_eq!(video.frame_index(Duration::from_millis(170)), 0);

        let third = video.frame(2).unwrap();
        assert_eq!(red_at_origin(&third), 120);
        assert!(video.frame(4).is_none());

        assert!(cache.get_video(path).is_some());
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_video_is_not_retried() {
        let decoder = Arc::new(BrokenDecoder {
            calls: AtomicUsize::new(0),
        });
        let mut cache = ImageCache::with_video_decoder(decoder.clone());
        let path = Path::new("/themes/missing.mp4");

        assert!(wait_for_video(&mut cache, path).is_none());
        assert!(cache.get_video(path).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }
}
