//! Frame compositor.
//!
//! Renders a [`ThemeSnapshot`] against a [`RegistrySnapshot`] into a panel
//! sized [`Frame`]. Each element is drawn into its own layer surface which is
//! kept until the element's inputs change, so a mostly static theme costs
//! little more than the final blend.
//!
//! The compositor holds cairo surfaces and is not `Send`; build it on the
//! thread that renders.

use cairo::{Context, Format, ImageSurface, Operator};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thermal_engine_core::RegistrySnapshot;
use thermal_engine_types::{
    sorted_by_z, ClockMode, ElementKind, Frame, ImageSource, SensorValue, ThemeElement,
    ThemeSnapshot, DISPLAY_HEIGHT, DISPLAY_WIDTH,
};
use uuid::Uuid;

use crate::chart_display::{self, MetricHistory};
use crate::clock_display;
use crate::context::RenderContext;
use crate::error::RenderError;
use crate::gauge_display;
use crate::image_cache::ImageCache;
use crate::image_display;
use crate::painter::{ElementPainter, PaintRequest, PainterRegistry};
use crate::render_utils::set_color;
use crate::shape_display;
use crate::text_display;
use crate::video::VideoDecoder;

/// Largest layer edge; guards against absurd geometry in a theme file
const MAX_LAYER_EDGE: f64 = 4096.0;

struct Layer {
    /// `None` for layers that are redrawn every frame
    fingerprint: Option<u64>,
    surface: ImageSurface,
}

/// Layer cache counters for the most recent frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub drawn: usize,
    pub reused: usize,
}

pub struct Compositor {
    width: i32,
    height: i32,
    surface: ImageSurface,
    layers: HashMap<Uuid, Layer>,
    /// Serialized-definition hash per element, rebuilt on revision change
    definitions: HashMap<Uuid, u64>,
    definitions_revision: Option<u64>,
    images: ImageCache,
    history: MetricHistory,
    painters: PainterRegistry,
    warned_kinds: HashSet<String>,
    sequence: u64,
    stats: LayerStats,
}

impl Compositor {
    /// Compositor for the panel's native resolution
    pub fn new() -> Result<Self, RenderError> {
        Self::with_size(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    pub fn with_size(width: u32, height: u32) -> Result<Self, RenderError> {
        let surface = ImageSurface::create(Format::ARgb32, width as i32, height as i32)?;
        log::debug!("Compositor surface {}x{}", width, height);
        Ok(Self {
            width: width as i32,
            height: height as i32,
            surface,
            layers: HashMap::new(),
            definitions: HashMap::new(),
            definitions_revision: None,
            images: ImageCache::new(),
            history: MetricHistory::new(),
            painters: PainterRegistry::new(),
            warned_kinds: HashSet::new(),
            sequence: 0,
            stats: LayerStats::default(),
        })
    }

    pub fn with_painters(mut self, painters: PainterRegistry) -> Self {
        self.painters = painters;
        self
    }

    /// Replace the `ffmpeg` video decoder; drops cached images
    pub fn with_video_decoder(mut self, decoder: Arc<dyn VideoDecoder>) -> Self {
        self.images = ImageCache::with_video_decoder(decoder);
        self
    }

    pub fn register_painter(&mut self, painter: Arc<dyn ElementPainter>) {
        self.painters.register(painter);
    }

    pub fn last_frame_stats(&self) -> LayerStats {
        self.stats
    }

    pub fn cached_layers(&self) -> usize {
        self.layers.len()
    }

    /// Render one frame. The result depends only on the arguments and on
    /// the history accumulated from earlier registry snapshots.
    pub fn render(
        &mut self,
        theme: &ThemeSnapshot,
        registry: &RegistrySnapshot,
        context: &RenderContext,
    ) -> Result<Frame, RenderError> {
        self.stats = LayerStats::default();
        self.history.update(registry, &theme.bound_metrics());
        self.refresh_definitions(theme);

        let mut live = HashSet::new();
        {
            let cr = Context::new(&self.surface)?;
            cr.save()?;
            cr.set_operator(Operator::Source);
            set_color(&cr, &theme.background);
            cr.paint()?;
            cr.restore()?;

            let ordered = theme.draw_order();
            self.draw_elements(&cr, &ordered, (0.0, 0.0), 1.0, registry, context, &mut live)?;
        }

        let before = self.layers.len();
        self.layers.retain(|id, _| live.contains(id));
        if self.layers.len() != before {
            log::debug!("Evicted {} stale layers", before - self.layers.len());
        }

        self.sequence += 1;
        self.to_frame()
    }

    fn refresh_definitions(&mut self, theme: &ThemeSnapshot) {
        if self.definitions_revision == Some(theme.revision) {
            return;
        }
        fn walk(elements: &[ThemeElement], out: &mut HashMap<Uuid, u64>) {
            for element in elements {
                let mut hasher = DefaultHasher::new();
                match serde_json::to_vec(element) {
                    Ok(bytes) => bytes.hash(&mut hasher),
                    Err(e) => {
                        log::warn!("Cannot hash element {}: {}", element.id, e);
                        element.id.hash(&mut hasher);
                    }
                }
                out.insert(element.id, hasher.finish());
                if let ElementKind::Group { children } = &element.kind {
                    walk(children, out);
                }
            }
        }
        self.definitions.clear();
        walk(&theme.elements, &mut self.definitions);
        self.definitions_revision = Some(theme.revision);
        log::debug!(
            "Theme revision {} ({} elements)",
            theme.revision,
            self.definitions.len()
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_elements(
        &mut self,
        cr: &Context,
        elements: &[&ThemeElement],
        origin: (f64, f64),
        opacity: f64,
        registry: &RegistrySnapshot,
        context: &RenderContext,
        live: &mut HashSet<Uuid>,
    ) -> Result<(), RenderError> {
        for element in elements {
            live.insert(element.id);
            let alpha = (opacity * element.opacity).clamp(0.0, 1.0);
            let x = origin.0 + element.geometry.x;
            let y = origin.1 + element.geometry.y;

            if let ElementKind::Group { children } = &element.kind {
                let ordered = sorted_by_z(children);
                self.draw_elements(cr, &ordered, (x, y), alpha, registry, context, live)?;
                continue;
            }
            if alpha <= 0.0 {
                continue;
            }
            if let ElementKind::Extension { kind, .. } = &element.kind {
                if self.painters.get(kind).is_none() {
                    if self.warned_kinds.insert(kind.clone()) {
                        log::warn!("No painter for element kind '{}', skipping", kind);
                    }
                    continue;
                }
            }

            let fingerprint = self.fingerprint(element, registry, context);
            let cached = matches!(
                (self.layers.get(&element.id), fingerprint),
                (Some(layer), Some(fp)) if layer.fingerprint == Some(fp)
            );
            if cached {
                self.stats.reused += 1;
            } else {
                match self.draw_layer(element, registry, context) {
                    Ok(Some(surface)) => {
                        self.stats.drawn += 1;
                        self.layers.insert(element.id, Layer { fingerprint, surface });
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("Failed to draw {} '{}': {}", element.kind.type_name(), element.name, e);
                        self.layers.remove(&element.id);
                        continue;
                    }
                }
            }

            if let Some(layer) = self.layers.get(&element.id) {
                cr.save()?;
                cr.set_source_surface(&layer.surface, x, y)?;
                cr.paint_with_alpha(alpha)?;
                cr.restore()?;
            }
        }
        Ok(())
    }

    /// Hash of everything that affects an element's pixels. `None` means
    /// the layer must be redrawn every frame.
    fn fingerprint(
        &mut self,
        element: &ThemeElement,
        registry: &RegistrySnapshot,
        context: &RenderContext,
    ) -> Option<u64> {
        let mut hasher = DefaultHasher::new();
        self.definitions.get(&element.id).hash(&mut hasher);
        if let Some(key) = element.binding {
            match registry.get(key) {
                SensorValue::Value(v) => v.to_bits().hash(&mut hasher),
                SensorValue::NoData => "no-data".hash(&mut hasher),
            }
        }
        match &element.kind {
            ElementKind::Clock(style) => match style.mode {
                ClockMode::Analog { smooth: true, .. } => context.now.timestamp_micros().hash(&mut hasher),
                _ => context.now.timestamp().hash(&mut hasher),
            },
            ElementKind::Image(style) => {
                match style.source {
                    ImageSource::File { .. } => {}
                    ImageSource::Animation { .. } => {
                        image_display::frame_index(&mut self.images, &style.source, context.elapsed).hash(&mut hasher)
                    }
                    ImageSource::Video { .. } => {
                        // blank until the loader delivers
                        image_display::lookup(&mut self.images, &style.source).is_some().hash(&mut hasher);
                        image_display::frame_index(&mut self.images, &style.source, context.elapsed).hash(&mut hasher)
                    }
                }
            }
            ElementKind::Chart(_) => self.history.revision().hash(&mut hasher),
            ElementKind::Extension { .. } => return None,
            _ => {}
        }
        Some(hasher.finish())
    }

    /// Draw an element into a fresh surface the size of its geometry
    fn draw_layer(
        &mut self,
        element: &ThemeElement,
        registry: &RegistrySnapshot,
        context: &RenderContext,
    ) -> Result<Option<ImageSurface>, RenderError> {
        let width = element.geometry.width.min(MAX_LAYER_EDGE);
        let height = element.geometry.height.min(MAX_LAYER_EDGE);
        if width < 1.0 || height < 1.0 {
            return Ok(None);
        }
        let surface = ImageSurface::create(Format::ARgb32, width.ceil() as i32, height.ceil() as i32)?;
        {
            let cr = Context::new(&surface)?;
            self.draw_content(&cr, element, registry, context, width, height)?;
        }
        surface.flush();
        Ok(Some(surface))
    }

    fn draw_content(
        &mut self,
        cr: &Context,
        element: &ThemeElement,
        registry: &RegistrySnapshot,
        context: &RenderContext,
        width: f64,
        height: f64,
    ) -> Result<(), RenderError> {
        let value = element.binding.map(|key| registry.get(key));
        let unit = element.binding.map(|key| key.unit());

        match &element.kind {
            ElementKind::Gauge(style) => gauge_display::render_gauge(
                cr,
                style,
                value.unwrap_or(SensorValue::NoData),
                unit,
                width,
                height,
            ),
            ElementKind::Text(style) => {
                let bound = value.zip(unit);
                text_display::render_text(cr, style, bound, width, height)
            }
            ElementKind::Clock(style) => clock_display::render_clock(cr, style, &context.now, width, height),
            ElementKind::Image(style) => {
                image_display::render_image(cr, style, &mut self.images, context.elapsed, width, height)
            }
            ElementKind::Chart(style) => {
                let series = element.binding.and_then(|key| self.history.series(key));
                chart_display::render_chart(cr, style, series, self.history.capacity(), width, height)
            }
            ElementKind::Rectangle(style) => shape_display::render_rectangle(cr, style, width, height),
            ElementKind::Group { .. } => Ok(()),
            ElementKind::Extension { kind, params } => match self.painters.get(kind) {
                Some(painter) => {
                    let request = PaintRequest {
                        params,
                        value,
                        width,
                        height,
                        context,
                    };
                    painter.paint(cr, &request)
                }
                None => Ok(()),
            },
        }
    }

    /// Copy the composited surface out as straight-alpha RGBA
    fn to_frame(&mut self) -> Result<Frame, RenderError> {
        self.surface.flush();
        let width = self.width as usize;
        let height = self.height as usize;
        let stride = self.surface.stride() as usize;
        let data = self.surface.data()?;

        let mut pixels = Vec::with_capacity(width * height * 4);
        for row in data.chunks_exact(stride).take(height) {
            for px in row[..width * 4].chunks_exact(4) {
                let argb = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                let a = argb >> 24;
                if a == 0 {
                    pixels.extend_from_slice(&[0, 0, 0, 0]);
                    continue;
                }
                let unpremul = |c: u32| ((c * 255 + a / 2) / a).min(255) as u8;
                pixels.extend_from_slice(&[
                    unpremul((argb >> 16) & 0xff),
                    unpremul((argb >> 8) & 0xff),
                    unpremul(argb & 0xff),
                    a as u8,
                ]);
            }
        }
        drop(data);

        let (width, height) = (self.width as u32, self.height as u32);
        Frame::from_rgba(self.sequence, width, height, pixels).ok_or(RenderError::FrameSize { width, height })
    }
}
