//! Rolling line charts and the per-metric history that feeds them.

use cairo::{Context, LineCap, LineJoin, LinearGradient};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use thermal_engine_core::{RegistrySnapshot, CHART_HISTORY_LEN};
use thermal_engine_types::{ChartStyle, MetricKey, TextAlign};

use crate::error::RenderError;
use crate::pango_text::{self, FontSpec};
use crate::render_utils::set_color;

// Reused between frames to avoid allocating point lists
thread_local! {
    static POINTS_BUFFER: RefCell<Vec<(f64, f64)>> = RefCell::new(Vec::with_capacity(CHART_HISTORY_LEN));
}

/// Bounded sample history per metric.
///
/// A sample is appended only when the registry sequence advances, so the
/// chart scrolls at the sensor rate rather than the frame rate.
#[derive(Debug)]
pub struct MetricHistory {
    samples: HashMap<MetricKey, VecDeque<f64>>,
    last_sequence: Option<u64>,
    capacity: usize,
    revision: u64,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::with_capacity(CHART_HISTORY_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: HashMap::new(),
            last_sequence: None,
            capacity: capacity.max(2),
            revision: 0,
        }
    }

    /// Record the tracked metrics if the snapshot is newer than the last one
    pub fn update(&mut self, snapshot: &RegistrySnapshot, keys: &[MetricKey]) {
        if self.last_sequence == Some(snapshot.sequence) {
            return;
        }
        self.last_sequence = Some(snapshot.sequence);
        self.samples.retain(|key, _| keys.contains(key));
        for &key in keys {
            let series = self.samples.entry(key).or_default();
            series.push_back(snapshot.get(key).or_zero());
            while series.len() > self.capacity {
                series.pop_front();
            }
        }
        self.revision += 1;
    }

    pub fn series(&self, key: MetricKey) -> Option<&VecDeque<f64>> {
        self.samples.get(&key)
    }

    /// Bumped whenever any series changes
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Vertical range for the series: the fixed bounds when set, else the data
/// range padded so a flat line sits mid-chart.
pub fn value_range(style: &ChartStyle, series: &VecDeque<f64>) -> (f64, f64) {
    let data_min = series.iter().copied().fold(f64::INFINITY, f64::min);
    let data_max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut min = style.min.unwrap_or(if data_min.is_finite() { data_min } else { 0.0 });
    let mut max = style.max.unwrap_or(if data_max.is_finite() { data_max } else { 100.0 });
    if max - min < f64::EPSILON {
        min -= 1.0;
        max += 1.0;
    }
    (min, max)
}

/// Catmull-Rom control points for the segment p1 -> p2
pub fn catmull_rom(
    p0: (f64, f64),
    p1: (f64, f64),
    p2: (f64, f64),
    p3: (f64, f64),
) -> ((f64, f64), (f64, f64)) {
    let cp1 = (p1.0 + (p2.0 - p0.0) / 6.0, p1.1 + (p2.1 - p0.1) / 6.0);
    let cp2 = (p2.0 - (p3.0 - p1.0) / 6.0, p2.1 - (p3.1 - p1.1) / 6.0);
    (cp1, cp2)
}

fn trace_line(cr: &Context, points: &[(f64, f64)], smooth: bool) {
    let Some(&(x, y)) = points.first() else {
        return;
    };
    cr.move_to(x, y);
    for i in 1..points.len() {
        if smooth {
            let p0 = points[i.saturating_sub(2)];
            let p1 = points[i - 1];
            let p2 = points[i];
            let p3 = points[(i + 1).min(points.len() - 1)];
            let (cp1, cp2) = catmull_rom(p0, p1, p2, p3);
            cr.curve_to(cp1.0, cp1.1, cp2.0, cp2.1, p2.0, p2.1);
        } else {
            cr.line_to(points[i].0, points[i].1);
        }
    }
}

pub fn render_chart(
    cr: &Context,
    style: &ChartStyle,
    series: Option<&VecDeque<f64>>,
    capacity: usize,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    cr.save()?;
    cr.rectangle(0.0, 0.0, width, height);
    cr.clip();

    if let Some(background) = &style.background_color {
        set_color(cr, background);
        cr.paint()?;
    }

    if let Some(series) = series.filter(|s| s.len() >= 2) {
        let (min, max) = value_range(style, series);
        let step = width / (capacity.max(2) - 1) as f64;
        // newest sample sits on the right edge
        let x0 = width - step * (series.len() - 1) as f64;
        let inset = style.line_width / 2.0;
        let plot_height = (height - style.line_width).max(1.0);

        POINTS_BUFFER.with(|buffer| -> Result<(), RenderError> {
            let mut points = buffer.borrow_mut();
            points.clear();
            points.extend(series.iter().enumerate().map(|(i, v)| {
                let t = ((v - min) / (max - min)).clamp(0.0, 1.0);
                (x0 + step * i as f64, inset + plot_height * (1.0 - t))
            }));

            if style.fill {
                trace_line(cr, &points, style.smooth);
                if let (Some(first), Some(last)) = (points.first(), points.last()) {
                    cr.line_to(last.0, height);
                    cr.line_to(first.0, height);
                }
                cr.close_path();
                let gradient = LinearGradient::new(0.0, 0.0, 0.0, height);
                let c = style.color;
                gradient.add_color_stop_rgba(0.0, c.r, c.g, c.b, c.a * 0.5);
                gradient.add_color_stop_rgba(1.0, c.r, c.g, c.b, 0.0);
                cr.set_source(&gradient)?;
                cr.fill()?;
            }

            trace_line(cr, &points, style.smooth);
            set_color(cr, &style.color);
            cr.set_line_width(style.line_width);
            cr.set_line_cap(LineCap::Round);
            cr.set_line_join(LineJoin::Round);
            cr.stroke()?;
            Ok(())
        })?;
    }

    if !style.label.is_empty() {
        let font = FontSpec::new("Sans", (height * 0.15).clamp(10.0, 24.0));
        pango_text::draw_text_in_box(
            cr,
            &style.label,
            &font,
            &style.label_color,
            TextAlign::Left,
            6.0,
            4.0,
            width - 12.0,
            font.size * 1.4,
        );
    }
    cr.restore()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermal_engine_core::SensorRegistry;
    use thermal_engine_types::SensorSnapshot;

    fn snapshot_with(writer: &mut thermal_engine_core::RegistryWriter, value: f64) {
        let mut snap = SensorSnapshot::empty();
        snap.set(MetricKey::CpuPercent, value, chrono::Utc::now());
        writer.publish(&snap, &[MetricKey::CpuPercent]);
    }

    #[test]
    fn test_history_appends_on_new_sequence_only() {
        let (mut writer, reader) = SensorRegistry::with_window(1);
        let mut history = MetricHistory::with_capacity(3);
        let keys = [MetricKey::CpuPercent];

        snapshot_with(&mut writer, 10.0);
        history.update(&reader.snapshot(), &keys);
        history.update(&reader.snapshot(), &keys);
        assert_eq!(history.series(MetricKey::CpuPercent).unwrap().len(), 1);
        assert_eq!(history.revision(), 1);

        for v in [20.0, 30.0, 40.0] {
            snapshot_with(&mut writer, v);
            history.update(&reader.snapshot(), &keys);
        }
        let series: Vec<f64> = history.series(MetricKey::CpuPercent).unwrap().iter().copied().collect();
        assert_eq!(series, vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_history_records_no_data_as_zero() {
        let (_writer, reader) = SensorRegistry::new();
        let mut history = MetricHistory::new();
        history.update(&reader.snapshot(), &[MetricKey::GpuTemp]);
        assert_eq!(history.series(MetricKey::GpuTemp).unwrap()[0], 0.0);
    }

    #[test]
    fn test_value_range() {
        let style = ChartStyle::default();
        let series: VecDeque<f64> = vec![10.0, 30.0, 20.0].into();
        assert_eq!(value_range(&style, &series), (10.0, 30.0));

        let flat: VecDeque<f64> = vec![5.0, 5.0].into();
        assert_eq!(value_range(&style, &flat), (4.0, 6.0));

        let fixed = ChartStyle {
            min: Some(0.0),
            max: Some(100.0),
            ..ChartStyle::default()
        };
        assert_eq!(value_range(&fixed, &series), (0.0, 100.0));
    }

    #[test]
    fn test_catmull_rom_straight_line() {
        // collinear, evenly spaced points keep control points on the line
        let (cp1, cp2) = catmull_rom((0.0, 0.0), (6.0, 6.0), (12.0, 12.0), (18.0, 18.0));
        assert_eq!(cp1, (8.0, 8.0));
        assert_eq!(cp2, (10.0, 10.0));
    }
}
