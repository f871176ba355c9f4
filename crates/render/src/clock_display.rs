//! Digital and analog clocks driven by the render context's wall-clock time.

use cairo::{Context, LineCap};
use chrono::Timelike;
use std::f64::consts::PI;
use thermal_engine_types::{AnalogFace, ClockMode, ClockStyle, Color, TextAlign};

use crate::error::RenderError;
use crate::pango_text::{self, FontSpec};
use crate::render_utils::{clock_point, set_color};

const SECOND_HAND_COLOR: (u8, u8, u8) = (255, 80, 80);
const CENTER_DOT_RADIUS: f64 = 4.0;

/// Digital clock options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalFormat {
    pub use_24h: bool,
    pub show_seconds: bool,
    pub show_am_pm: bool,
    pub leading_zero: bool,
}

pub fn format_digital<T: Timelike>(time: &T, format: DigitalFormat) -> String {
    let (is_pm, hour) = if format.use_24h {
        (time.hour() >= 12, time.hour())
    } else {
        time.hour12()
    };
    let mut out = if format.leading_zero {
        format!("{:02}:{:02}", hour, time.minute())
    } else {
        format!("{}:{:02}", hour, time.minute())
    };
    if format.show_seconds {
        out.push_str(&format!(":{:02}", time.second()));
    }
    if !format.use_24h && format.show_am_pm {
        out.push_str(if is_pm { " PM" } else { " AM" });
    }
    out
}

/// Hour, minute and second hand angles in degrees clockwise from twelve.
///
/// Smooth mode sweeps the second hand with sub-second precision; the hour
/// hand always moves with the minutes.
pub fn hand_angles<T: Timelike>(time: &T, smooth: bool) -> (f64, f64, f64) {
    let hours = (time.hour() % 12) as f64;
    let minutes = time.minute() as f64;
    let seconds = time.second() as f64;
    let hour = (hours + minutes / 60.0) * 30.0;
    if smooth {
        let micros = (time.nanosecond() / 1_000).min(999_999) as f64;
        (hour, (minutes + seconds / 60.0) * 6.0, (seconds + micros / 1e6) * 6.0)
    } else {
        (hour, minutes * 6.0, seconds * 6.0)
    }
}

pub fn render_clock<T: Timelike>(
    cr: &Context,
    style: &ClockStyle,
    time: &T,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    match &style.mode {
        ClockMode::Digital {
            use_24h,
            show_seconds,
            show_am_pm,
            leading_zero,
        } => {
            let text = format_digital(
                time,
                DigitalFormat {
                    use_24h: *use_24h,
                    show_seconds: *show_seconds,
                    show_am_pm: *show_am_pm,
                    leading_zero: *leading_zero,
                },
            );
            let font = FontSpec::new(&style.font_family, style.font_size);
            pango_text::draw_text_in_box(cr, &text, &font, &style.color, TextAlign::Center, 0.0, 0.0, width, height);
            Ok(())
        }
        ClockMode::Analog {
            face,
            show_border,
            background_color,
            show_second_hand,
            smooth,
        } => {
            let cx = width / 2.0;
            let cy = height / 2.0;
            let radius = (width.min(height) / 2.0 - 2.0).max(1.0);

            cr.save()?;
            cr.new_path();
            cr.arc(cx, cy, radius, 0.0, 2.0 * PI);
            set_color(cr, background_color);
            cr.fill_preserve()?;
            if *show_border {
                set_color(cr, &style.color);
                cr.set_line_width(2.0);
                cr.stroke()?;
            } else {
                cr.new_path();
            }
            cr.restore()?;

            draw_face(cr, style, *face, cx, cy, radius)?;
            let (hour, minute, second) = hand_angles(time, *smooth);
            draw_hand(cr, &style.color, cx, cy, radius * 0.5, 4.0, hour)?;
            draw_hand(cr, &style.color, cx, cy, radius * 0.7, 3.0, minute)?;
            if *show_second_hand {
                let (r, g, b) = SECOND_HAND_COLOR;
                let color = Color::from_rgba8(r, g, b, 255).with_alpha_factor(style.color.a);
                draw_hand(cr, &color, cx, cy, radius * 0.85, 1.5, second)?;
            }

            cr.save()?;
            set_color(cr, &style.color);
            cr.new_path();
            cr.arc(cx, cy, CENTER_DOT_RADIUS, 0.0, 2.0 * PI);
            cr.fill()?;
            cr.restore()?;
            Ok(())
        }
    }
}

fn draw_face(
    cr: &Context,
    style: &ClockStyle,
    face: AnalogFace,
    cx: f64,
    cy: f64,
    radius: f64,
) -> Result<(), RenderError> {
    match face {
        AnalogFace::None => {}
        AnalogFace::Numbers => {
            let font = FontSpec::new(&style.font_family, (radius * 0.18).max(6.0));
            for hour in 1..=12 {
                let angle = (hour as f64 * 30.0).to_radians();
                let (x, y) = clock_point(cx, cy, radius * 0.78, angle);
                pango_text::draw_text_centered(cr, &hour.to_string(), &font, &style.color, x, y);
            }
        }
        AnalogFace::Ticks => {
            cr.save()?;
            set_color(cr, &style.color);
            for i in 0..12 {
                let angle = (i as f64 * 30.0).to_radians();
                // longer, heavier ticks at 12, 3, 6 and 9
                let (inner, line_width) = if i % 3 == 0 { (0.75, 2.0) } else { (0.85, 1.0) };
                let (x1, y1) = clock_point(cx, cy, radius * inner, angle);
                let (x2, y2) = clock_point(cx, cy, radius * 0.95, angle);
                cr.set_line_width(line_width);
                cr.move_to(x1, y1);
                cr.line_to(x2, y2);
                cr.stroke()?;
            }
            cr.restore()?;
        }
    }
    Ok(())
}

fn draw_hand(
    cr: &Context,
    color: &Color,
    cx: f64,
    cy: f64,
    length: f64,
    line_width: f64,
    degrees: f64,
) -> Result<(), RenderError> {
    let (x, y) = clock_point(cx, cy, length, degrees.to_radians());
    cr.save()?;
    set_color(cr, color);
    cr.set_line_width(line_width);
    cr.set_line_cap(LineCap::Round);
    cr.move_to(cx, cy);
    cr.line_to(x, y);
    cr.stroke()?;
    cr.restore()?;
    Ok(())
}
