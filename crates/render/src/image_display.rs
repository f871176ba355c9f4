//! Static images, animated GIFs and video backgrounds.

use cairo::{Context, ImageSurface};
use std::rc::Rc;
use std::time::Duration;
use thermal_engine_types::{ImageFit, ImageSource, ImageStyle};

use crate::error::RenderError;
use crate::image_cache::{DecodedImage, ImageCache};

/// Scale and offset that place an image of `src` size into the element box
pub fn fit_transform(fit: ImageFit, src: (f64, f64), dst: (f64, f64)) -> (f64, f64, f64, f64) {
    let (sw, sh) = src;
    let (dw, dh) = dst;
    if sw <= 0.0 || sh <= 0.0 {
        return (1.0, 1.0, 0.0, 0.0);
    }
    let (sx, sy) = match fit {
        ImageFit::Stretch => (dw / sw, dh / sh),
        ImageFit::Fit => {
            let s = (dw / sw).min(dh / sh);
            (s, s)
        }
        ImageFit::Fill => {
            let s = (dw / sw).max(dh / sh);
            (s, s)
        }
        ImageFit::Center => (1.0, 1.0),
        ImageFit::FitHeight => (dh / sh, dh / sh),
        ImageFit::FitWidth => (dw / sw, dw / sw),
    };
    let ox = (dw - sw * sx) / 2.0;
    let oy = (dh - sh * sy) / 2.0;
    (sx, sy, ox, oy)
}

/// Decoded media for an image source; `None` while a video is loading
pub fn lookup(cache: &mut ImageCache, source: &ImageSource) -> Option<Rc<DecodedImage>> {
    match source {
        ImageSource::File { path } | ImageSource::Animation { path, .. } => cache.get(path),
        ImageSource::Video { path, .. } => cache.get_video(path),
    }
}

/// Frame of the element's image at the given animation time
pub fn frame_index(cache: &mut ImageCache, source: &ImageSource, elapsed: Duration) -> usize {
    let speed = match source {
        ImageSource::File { .. } => return 0,
        ImageSource::Animation { speed, .. } | ImageSource::Video { speed, .. } => *speed,
    };
    match lookup(cache, source) {
        Some(image) => image.frame_index(elapsed.mul_f64(speed.max(0.0))),
        None => 0,
    }
}

pub fn render_image(
    cr: &Context,
    style: &ImageStyle,
    cache: &mut ImageCache,
    elapsed: Duration,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    let index = frame_index(cache, &style.source, elapsed);
    // a missing file was already logged by the cache; draw nothing
    let Some(image) = lookup(cache, &style.source) else {
        return Ok(());
    };
    let Some(surface) = image.frame(index) else {
        return Ok(());
    };
    paint_surface(cr, &surface, style.fit, width, height)
}

fn paint_surface(
    cr: &Context,
    surface: &ImageSurface,
    fit: ImageFit,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    let src = (surface.width() as f64, surface.height() as f64);
    let (sx, sy, ox, oy) = fit_transform(fit, src, (width, height));

    cr.save()?;
    cr.rectangle(0.0, 0.0, width, height);
    cr.clip();
    cr.translate(ox, oy);
    cr.scale(sx, sy);
    cr.set_source_surface(surface, 0.0, 0.0)?;
    cr.paint()?;
    cr.restore()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{VideoDecoder, VideoFrames};
    use cairo::Format;
    use image::{Rgba, RgbaImage};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Instant;

    /// Solid green then solid blue, 10 fps
    struct TwoFrameDecoder;

    impl VideoDecoder for TwoFrameDecoder {
        fn decode(&self, _path: &Path, _max_size: (u32, u32)) -> Result<VideoFrames, RenderError> {
            Ok(VideoFrames {
                frames: vec![
                    RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 255])),
                    RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255])),
                ],
                frame_duration: Duration::from_millis(100),
            })
        }
    }

    fn pixel(surface: &mut ImageSurface) -> [u8; 4] {
        surface.flush();
        let data = surface.data().unwrap();
        u32::from_ne_bytes([data[0], data[1], data[2], data[3]]).to_be_bytes()
    }

    #[test]
    fn test_fit_modes() {
        let src = (200.0, 100.0);
        let dst = (100.0, 100.0);

        assert_eq!(fit_transform(ImageFit::Stretch, src, dst), (0.5, 1.0, 0.0, 0.0));
        // fit letterboxes vertically
        assert_eq!(fit_transform(ImageFit::Fit, src, dst), (0.5, 0.5, 0.0, 25.0));
        // fill crops horizontally
        assert_eq!(fit_transform(ImageFit::Fill, src, dst), (1.0, 1.0, -50.0, 0.0));
        assert_eq!(fit_transform(ImageFit::Center, src, dst), (1.0, 1.0, -50.0, 0.0));
        assert_eq!(fit_transform(ImageFit::FitHeight, src, dst), (1.0, 1.0, -50.0, 0.0));
        assert_eq!(fit_transform(ImageFit::FitWidth, src, dst), (0.5, 0.5, 0.0, 25.0));
    }

    #[test]
    fn test_static_image_has_single_frame() {
        let mut cache = ImageCache::new();
        let source = ImageSource::File {
            path: "/nonexistent.png".into(),
        };
        assert_eq!(frame_index(&mut cache, &source, Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_video_frame_follows_elapsed_time() {
        let mut cache = ImageCache::with_video_decoder(Arc::new(TwoFrameDecoder));
        let style = ImageStyle {
            source: ImageSource::Video {
                path: "/themes/loop.mp4".into(),
                speed: 2.0,
            },
            fit: ImageFit::Stretch,
        };

        // nothing to show until the decode finishes
        let deadline = Instant::now() + Duration::from_secs(2);
        while lookup(&mut cache, &style.source).is_none() {
            assert!(Instant::now() < deadline, "video never loaded");
            std::thread::sleep(Duration::from_millis(10));
        }

        // double speed reaches the second frame after 50 ms
        assert_eq!(frame_index(&mut cache, &style.source, Duration::from_millis(40)), 0);
        assert_eq!(frame_index(&mut cache, &style.source, Duration::from_millis(60)), 1);
        assert_eq!(frame_index(&mut cache, &style.source, Duration::from_millis(110)), 0);

        let mut surface = ImageSurface::create(Format::ARgb32, 20, 20).unwrap();
        {
            let cr = Context::new(&surface).unwrap();
            render_image(&cr, &style, &mut cache, Duration::from_millis(60), 20.0, 20.0).unwrap();
        }
        assert_eq!(pixel(&mut surface), [255, 0, 0, 255]);
    }
}
