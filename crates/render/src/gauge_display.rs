//! Arc and bar gauges.

use cairo::{Context, LineCap};
use thermal_engine_types::{
    ArcGaugeStyle, BarGaugeStyle, BarTextMode, BarTextPosition, GaugeShape, GaugeStyle,
    SensorValue, TextAlign, UnitKind,
};

use crate::error::RenderError;
use crate::pango_text::{self, FontSpec};
use crate::render_utils::{rounded_rectangle, set_color};

/// Text for a gauge value. Unbound gauges show a bare percentage.
pub fn value_text(value: f64, unit: Option<UnitKind>) -> String {
    unit.unwrap_or(UnitKind::Percent).format(value)
}

pub fn render_gauge(
    cr: &Context,
    style: &GaugeStyle,
    value: SensorValue,
    unit: Option<UnitKind>,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    // missing data draws as an idle gauge
    let value = value.or_zero();
    match &style.shape {
        GaugeShape::Arc(arc) => render_arc(cr, style, arc, value, unit, width, height),
        GaugeShape::Bar(bar) => render_bar(cr, style, bar, value, unit, width, height),
    }
}

fn render_arc(
    cr: &Context,
    style: &GaugeStyle,
    arc: &ArcGaugeStyle,
    value: f64,
    unit: Option<UnitKind>,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    let cx = width / 2.0;
    let cy = height / 2.0;
    let radius = (width.min(height) / 2.0 - arc.thickness / 2.0).max(1.0);
    let start = arc.start_angle.to_radians();
    let sweep = arc.sweep_angle.to_radians();

    cr.save()?;
    cr.set_line_cap(LineCap::Round);
    cr.set_line_width(arc.thickness);

    set_color(cr, &style.track_color);
    cr.new_path();
    cr.arc(cx, cy, radius, start, start + sweep);
    cr.stroke()?;

    let fraction = style.fraction(value);
    if fraction > 0.0 {
        let color = style.color_for(value, unit);
        set_color(cr, &color);
        cr.new_path();
        cr.arc(cx, cy, radius, start, start + sweep * fraction);
        cr.stroke()?;
    }
    cr.restore()?;

    if arc.show_value {
        let value_font = FontSpec::new(&style.font_family, radius * 0.45).bold(true);
        pango_text::draw_text_centered(
            cr,
            &value_text(value, unit),
            &value_font,
            &style.text_color,
            cx,
            cy - radius * 0.05,
        );
    }
    if !style.label.is_empty() {
        let label_font = FontSpec::new(&style.font_family, radius * 0.25);
        let color = style.color_for(value, unit);
        pango_text::draw_text_centered(cr, &style.label, &label_font, &color, cx, cy + radius * 0.45);
    }
    Ok(())
}

fn render_bar(
    cr: &Context,
    style: &GaugeStyle,
    bar: &BarGaugeStyle,
    value: f64,
    unit: Option<UnitKind>,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    let font = FontSpec::new(&style.font_family, height * 0.6);
    let text = match bar.text_mode {
        BarTextMode::Full if !style.label.is_empty() => {
            Some(format!("{}: {}", style.label, value_text(value, unit)))
        }
        BarTextMode::Full | BarTextMode::ValueOnly => Some(value_text(value, unit)),
        BarTextMode::None => None,
    };

    // Text on the left takes space from the bar
    let mut bar_x = 0.0;
    if let (Some(text), BarTextPosition::Left) = (&text, bar.text_position) {
        let layout = pango_text::layout(cr, text, &font);
        let (text_width, _) = pango_text::text_size(&layout);
        bar_x = (text_width + 10.0).min(width * 0.6);
    }
    let bar_width = width - bar_x;
    let radius = if bar.rounded { height / 2.0 } else { 0.0 };

    cr.save()?;
    set_color(cr, &style.track_color);
    rounded_rectangle(cr, bar_x, 0.0, bar_width, height, radius);
    cr.fill()?;

    let fill_width = bar_width * style.fraction(value);
    if fill_width > 0.0 {
        set_color(cr, &style.color_for(value, unit));
        if bar.rounded {
            // clip to the track so a short fill keeps the rounded end
            rounded_rectangle(cr, bar_x, 0.0, bar_width, height, radius);
            cr.clip();
            rounded_rectangle(cr, bar_x, 0.0, fill_width.max(height), height, radius);
        } else {
            cr.rectangle(bar_x, 0.0, fill_width, height);
        }
        cr.fill()?;
    }
    cr.restore()?;

    if let Some(text) = text {
        match bar.text_position {
            BarTextPosition::Inside => pango_text::draw_text_in_box(
                cr,
                &text,
                &font,
                &style.text_color,
                TextAlign::Center,
                bar_x,
                0.0,
                bar_width,
                height,
            ),
            BarTextPosition::Left => pango_text::draw_text_in_box(
                cr,
                &text,
                &font,
                &style.text_color,
                TextAlign::Left,
                0.0,
                0.0,
                bar_x,
                height,
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(61.6, Some(UnitKind::Temperature)), "62°C");
        assert_eq!(value_text(0.0, Some(UnitKind::Speed)), "0.0MB/s");
        assert_eq!(value_text(45.0, None), "45%");
    }
}
