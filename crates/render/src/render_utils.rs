//! Small cairo helpers shared by the element renderers.

use cairo::Context;
use std::f64::consts::PI;
use thermal_engine_types::Color;

pub fn set_color(cr: &Context, color: &Color) {
    cr.set_source_rgba(color.r, color.g, color.b, color.a);
}

/// Add a rounded rectangle path. The radius is clamped to half the shorter
/// side; zero gives a plain rectangle.
pub fn rounded_rectangle(cr: &Context, x: f64, y: f64, width: f64, height: f64, radius: f64) {
    let radius = radius.min(width / 2.0).min(height / 2.0).max(0.0);
    cr.new_path();
    if radius <= 0.0 {
        cr.rectangle(x, y, width, height);
        return;
    }
    cr.arc(x + radius, y + radius, radius, PI, 1.5 * PI);
    cr.arc(x + width - radius, y + radius, radius, 1.5 * PI, 0.0);
    cr.arc(x + width - radius, y + height - radius, radius, 0.0, 0.5 * PI);
    cr.arc(x + radius, y + height - radius, radius, 0.5 * PI, PI);
    cr.close_path();
}

/// Point on a circle, with angle 0 at twelve o'clock going clockwise
pub fn clock_point(cx: f64, cy: f64, radius: f64, angle: f64) -> (f64, f64) {
    (cx + angle.sin() * radius, cy - angle.cos() * radius)
}
