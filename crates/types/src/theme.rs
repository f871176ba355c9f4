//! Theme element model.
//!
//! Themes are authored by the editor and handed to the engine as immutable
//! [`ThemeSnapshot`]s. The compositor only ever reads them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::color::{Color, Threshold};
use crate::metric::{MetricKey, UnitKind};

/// Element rectangle in display pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Geometry {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One drawable item of a theme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeElement {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub geometry: Geometry,
    /// Draw order, lower first
    #[serde(default)]
    pub z: i32,
    /// Metric this element displays, if any
    #[serde(default)]
    pub binding: Option<MetricKey>,
    /// 0.0 (invisible) to 1.0 (opaque)
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_true")]
    pub visible: bool,
    pub kind: ElementKind,
}

fn default_opacity() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl ThemeElement {
    pub fn new(name: impl Into<String>, geometry: Geometry, kind: ElementKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            geometry,
            z: 0,
            binding: None,
            opacity: 1.0,
            visible: true,
            kind,
        }
    }

    pub fn with_z(mut self, z: i32) -> Self {
        self.z = z;
        self
    }

    pub fn with_binding(mut self, key: MetricKey) -> Self {
        self.binding = Some(key);
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }
}

/// Closed set of element kinds, plus an escape hatch for painters
/// registered at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Gauge(GaugeStyle),
    Text(TextStyle),
    Clock(ClockStyle),
    Image(ImageStyle),
    Chart(ChartStyle),
    Rectangle(RectangleStyle),
    Group {
        #[serde(default)]
        children: Vec<ThemeElement>,
    },
    Extension {
        kind: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl ElementKind {
    pub fn type_name(&self) -> &str {
        match self {
            ElementKind::Gauge(_) => "gauge",
            ElementKind::Text(_) => "text",
            ElementKind::Clock(_) => "clock",
            ElementKind::Image(_) => "image",
            ElementKind::Chart(_) => "chart",
            ElementKind::Rectangle(_) => "rectangle",
            ElementKind::Group { .. } => "group",
            ElementKind::Extension { kind, .. } => kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Gauge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeStyle {
    #[serde(default)]
    pub shape: GaugeShape,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_gauge_color")]
    pub color: Color,
    #[serde(default = "default_track_color")]
    pub track_color: Color,
    #[serde(default = "default_text_color")]
    pub text_color: Color,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_gauge_max")]
    pub max: f64,
    /// Color bands; `None` uses the unit's defaults
    #[serde(default)]
    pub thresholds: Option<Vec<Threshold>>,
}

fn default_gauge_color() -> Color {
    Color::from_rgba8(0, 200, 255, 255)
}

fn default_track_color() -> Color {
    Color::from_rgba8(40, 40, 50, 255)
}

fn default_text_color() -> Color {
    Color::WHITE
}

fn default_font_family() -> String {
    "Sans".to_string()
}

fn default_gauge_max() -> f64 {
    100.0
}

impl Default for GaugeStyle {
    fn default() -> Self {
        Self {
            shape: GaugeShape::default(),
            label: String::new(),
            color: default_gauge_color(),
            track_color: default_track_color(),
            text_color: default_text_color(),
            font_family: default_font_family(),
            min: 0.0,
            max: default_gauge_max(),
            thresholds: None,
        }
    }
}

impl GaugeStyle {
    /// Color for `value`, honoring explicit or default threshold bands
    pub fn color_for(&self, value: f64, unit: Option<UnitKind>) -> Color {
        let bands = match &self.thresholds {
            Some(bands) => bands.clone(),
            None => default_thresholds(unit),
        };
        bands
            .iter()
            .filter(|t| value >= t.value)
            .max_by(|a, b| a.value.total_cmp(&b.value))
            .map(|t| t.color)
            .unwrap_or(self.color)
    }

    /// Position of `value` in the configured range, clamped to 0.0..=1.0
    pub fn fraction(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

/// Warning/critical bands: 60/80 for temperatures, 70/90 otherwise
pub fn default_thresholds(unit: Option<UnitKind>) -> Vec<Threshold> {
    let (warn, crit) = match unit {
        Some(UnitKind::Temperature) => (60.0, 80.0),
        _ => (70.0, 90.0),
    };
    vec![
        Threshold::new(warn, Color::from_rgba8(255, 204, 0, 255)),
        Threshold::new(crit, Color::from_rgba8(255, 50, 50, 255)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum GaugeShape {
    Arc(ArcGaugeStyle),
    Bar(BarGaugeStyle),
}

impl Default for GaugeShape {
    fn default() -> Self {
        GaugeShape::Arc(ArcGaugeStyle::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcGaugeStyle {
    #[serde(default = "default_arc_thickness")]
    pub thickness: f64,
    /// Degrees, clockwise from 3 o'clock
    #[serde(default = "default_arc_start")]
    pub start_angle: f64,
    #[serde(default = "default_arc_sweep")]
    pub sweep_angle: f64,
    #[serde(default = "default_true")]
    pub show_value: bool,
}

fn default_arc_thickness() -> f64 {
    18.0
}

fn default_arc_start() -> f64 {
    135.0
}

fn default_arc_sweep() -> f64 {
    270.0
}

impl Default for ArcGaugeStyle {
    fn default() -> Self {
        Self {
            thickness: default_arc_thickness(),
            start_angle: default_arc_start(),
            sweep_angle: default_arc_sweep(),
            show_value: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarGaugeStyle {
    #[serde(default)]
    pub rounded: bool,
    #[serde(default)]
    pub text_mode: BarTextMode,
    #[serde(default)]
    pub text_position: BarTextPosition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarTextMode {
    /// Label and value
    #[default]
    Full,
    ValueOnly,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarTextPosition {
    #[default]
    Inside,
    Left,
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    /// Static text. For bound elements `{value}` is replaced by the
    /// formatted metric value.
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default = "default_text_color")]
    pub color: Color,
    #[serde(default)]
    pub align: TextAlign,
    /// Clip to the element rectangle
    #[serde(default = "default_true")]
    pub clip: bool,
}

fn default_font_size() -> f64 {
    36.0
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_family: default_font_family(),
            font_size: default_font_size(),
            bold: false,
            italic: false,
            color: default_text_color(),
            align: TextAlign::default(),
            clip: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockStyle {
    #[serde(default)]
    pub mode: ClockMode,
    #[serde(default = "default_text_color")]
    pub color: Color,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_clock_font_size")]
    pub font_size: f64,
}

fn default_clock_font_size() -> f64 {
    48.0
}

impl Default for ClockStyle {
    fn default() -> Self {
        Self {
            mode: ClockMode::default(),
            color: default_text_color(),
            font_family: default_font_family(),
            font_size: default_clock_font_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClockMode {
    Digital {
        #[serde(default = "default_true")]
        use_24h: bool,
        #[serde(default = "default_true")]
        show_seconds: bool,
        #[serde(default)]
        show_am_pm: bool,
        #[serde(default = "default_true")]
        leading_zero: bool,
    },
    Analog {
        #[serde(default)]
        face: AnalogFace,
        #[serde(default = "default_true")]
        show_border: bool,
        #[serde(default = "default_clock_background")]
        background_color: Color,
        #[serde(default = "default_true")]
        show_second_hand: bool,
        /// Sweep the second hand continuously instead of ticking
        #[serde(default)]
        smooth: bool,
    },
}

fn default_clock_background() -> Color {
    Color::from_rgba8(26, 26, 46, 255)
}

impl Default for ClockMode {
    fn default() -> Self {
        ClockMode::Digital {
            use_24h: true,
            show_seconds: true,
            show_am_pm: false,
            leading_zero: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalogFace {
    #[default]
    Numbers,
    Ticks,
    None,
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStyle {
    pub source: ImageSource,
    #[serde(default)]
    pub fit: ImageFit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Static image
    File { path: PathBuf },
    /// Animated GIF played back on the animation clock
    Animation {
        path: PathBuf,
        #[serde(default = "default_playback_speed")]
        speed: f64,
    },
    /// Video file looped at its native frame rate times `speed`
    Video {
        path: PathBuf,
        #[serde(default = "default_playback_speed")]
        speed: f64,
    },
}

fn default_playback_speed() -> f64 {
    1.0
}

impl ImageSource {
    pub fn path(&self) -> &PathBuf {
        match self {
            ImageSource::File { path }
            | ImageSource::Animation { path, .. }
            | ImageSource::Video { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFit {
    /// Fill the rectangle ignoring aspect ratio
    Stretch,
    /// Scale to fit inside, preserving aspect ratio
    #[default]
    Fit,
    /// Scale to cover, preserving aspect ratio, cropping overflow
    Fill,
    /// Natural size, centered
    Center,
    /// Scale to the rectangle's height, preserving aspect ratio
    FitHeight,
    /// Scale to the rectangle's width, preserving aspect ratio
    FitWidth,
}

// ---------------------------------------------------------------------------
// Chart
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartStyle {
    #[serde(default = "default_gauge_color")]
    pub color: Color,
    #[serde(default)]
    pub background_color: Option<Color>,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
    /// Gradient fill under the line
    #[serde(default = "default_true")]
    pub fill: bool,
    /// Catmull-Rom smoothing
    #[serde(default = "default_true")]
    pub smooth: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_text_color")]
    pub label_color: Color,
    /// Fixed scale; `None` auto-scales to the visible history
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

fn default_line_width() -> f64 {
    2.0
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            color: default_gauge_color(),
            background_color: None,
            line_width: default_line_width(),
            fill: true,
            smooth: true,
            label: String::new(),
            label_color: default_text_color(),
            min: None,
            max: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rectangle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectangleStyle {
    #[serde(default = "default_track_color")]
    pub color: Color,
    #[serde(default)]
    pub corner_radius: f64,
    #[serde(default)]
    pub border_color: Option<Color>,
    #[serde(default)]
    pub border_width: f64,
}

impl Default for RectangleStyle {
    fn default() -> Self {
        Self {
            color: default_track_color(),
            corner_radius: 0.0,
            border_color: None,
            border_width: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable theme as published by the editor. Each edit produces a new
/// snapshot with a higher revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeSnapshot {
    #[serde(default)]
    pub revision: u64,
    #[serde(default = "default_background")]
    pub background: Color,
    #[serde(default)]
    pub elements: Vec<ThemeElement>,
}

fn default_background() -> Color {
    Color::from_rgba8(15, 15, 25, 255)
}

impl ThemeSnapshot {
    pub fn new(revision: u64, elements: Vec<ThemeElement>) -> Self {
        Self {
            revision,
            background: default_background(),
            elements,
        }
    }

    /// Visible elements in draw order (ascending z, ties keep list order)
    pub fn draw_order(&self) -> Vec<&ThemeElement> {
        sorted_by_z(&self.elements)
    }

    /// Metrics referenced by any element, including group children
    pub fn bound_metrics(&self) -> Vec<MetricKey> {
        fn walk(elements: &[ThemeElement], out: &mut Vec<MetricKey>) {
            for e in elements {
                if let Some(key) = e.binding {
                    if !out.contains(&key) {
                        out.push(key);
                    }
                }
                if let ElementKind::Group { children } = &e.kind {
                    walk(children, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.elements, &mut out);
        out
    }
}

impl Default for ThemeSnapshot {
    fn default() -> Self {
        Self::new(0, Vec::new())
    }
}

/// Stable z-order sort of visible elements
pub fn sorted_by_z(elements: &[ThemeElement]) -> Vec<&ThemeElement> {
    let mut ordered: Vec<&ThemeElement> = elements.iter().filter(|e| e.visible).collect();
    ordered.sort_by_key(|e| e.z);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(name: &str, z: i32) -> ThemeElement {
        ThemeElement::new(
            name,
            Geometry::new(0.0, 0.0, 10.0, 10.0),
            ElementKind::Rectangle(RectangleStyle::default()),
        )
        .with_z(z)
    }

    #[test]
    fn test_draw_order_is_stable_by_z() {
        let theme = ThemeSnapshot::new(1, vec![rect("a", 2), rect("b", 0), rect("c", 2), rect("d", 1)]);
        let names: Vec<&str> = theme.draw_order().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_hidden_elements_are_not_drawn() {
        let mut hidden = rect("hidden", 0);
        hidden.visible = false;
        let theme = ThemeSnapshot::new(1, vec![hidden, rect("shown", 0)]);
        assert_eq!(theme.draw_order().len(), 1);
    }

    #[test]
    fn test_default_thresholds() {
        let style = GaugeStyle::default();
        let yellow = Color::from_rgba8(255, 204, 0, 255);
        let red = Color::from_rgba8(255, 50, 50, 255);

        assert_eq!(style.color_for(59.0, Some(UnitKind::Temperature)), style.color);
        assert_eq!(style.color_for(65.0, Some(UnitKind::Temperature)), yellow);
        assert_eq!(style.color_for(85.0, Some(UnitKind::Temperature)), red);

        assert_eq!(style.color_for(65.0, Some(UnitKind::Percent)), style.color);
        assert_eq!(style.color_for(75.0, Some(UnitKind::Percent)), yellow);
        assert_eq!(style.color_for(95.0, None), red);
    }

    #[test]
    fn test_gauge_fraction_clamps() {
        let style = GaugeStyle::default();
        assert_eq!(style.fraction(-5.0), 0.0);
        assert_eq!(style.fraction(50.0), 0.5);
        assert_eq!(style.fraction(150.0), 1.0);
    }

    #[test]
    fn test_theme_json_round_trip() {
        let gauge = ThemeElement::new(
            "cpu",
            Geometry::new(80.0, 120.0, 240.0, 240.0),
            ElementKind::Gauge(GaugeStyle::default()),
        )
        .with_binding(MetricKey::CpuTemp);
        let group = ThemeElement::new(
            "group",
            Geometry::new(0.0, 0.0, 1280.0, 480.0),
            ElementKind::Group {
                children: vec![gauge.clone()],
            },
        );
        let theme = ThemeSnapshot::new(3, vec![group]);

        let json = serde_json::to_string(&theme).unwrap();
        let back: ThemeSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, theme);
        assert_eq!(back.bound_metrics(), vec![MetricKey::CpuTemp]);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "elements": [
                {"geometry": {"x": 0, "y": 0, "width": 100, "height": 40},
                 "binding": "gpu_temp",
                 "kind": {"type": "gauge", "shape": {"style": "bar", "rounded": true}}}
            ]
        }"#;
        let theme: ThemeSnapshot = serde_json::from_str(json).unwrap();
        let element = &theme.elements[0];
        assert_eq!(element.binding, Some(MetricKey::GpuTemp));
        assert_eq!(element.opacity, 1.0);
        match &element.kind {
            ElementKind::Gauge(style) => {
                assert_eq!(style.max, 100.0);
                assert!(matches!(style.shape, GaugeShape::Bar(BarGaugeStyle { rounded: true, .. })));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_video_background_json() {
        let json = r#"{"type": "image", "source": {"kind": "video", "path": "/themes/loop.mp4"}, "fit": "fit_height"}"#;
        let kind: ElementKind = serde_json::from_str(json).unwrap();
        match kind {
            ElementKind::Image(style) => {
                assert_eq!(
                    style.source,
                    ImageSource::Video {
                        path: "/themes/loop.mp4".into(),
                        speed: 1.0
                    }
                );
                assert_eq!(style.source.path(), &PathBuf::from("/themes/loop.mp4"));
                assert_eq!(style.fit, ImageFit::FitHeight);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
