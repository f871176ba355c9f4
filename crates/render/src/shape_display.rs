//! Plain rectangles.

use cairo::Context;
use thermal_engine_types::RectangleStyle;

use crate::error::RenderError;
use crate::render_utils::{rounded_rectangle, set_color};

pub fn render_rectangle(
    cr: &Context,
    style: &RectangleStyle,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    cr.save()?;
    set_color(cr, &style.color);
    rounded_rectangle(cr, 0.0, 0.0, width, height, style.corner_radius);
    cr.fill()?;

    if let Some(border) = &style.border_color {
        if style.border_width > 0.0 {
            // inset so the stroke stays inside the element box
            let inset = style.border_width / 2.0;
            set_color(cr, border);
            cr.set_line_width(style.border_width);
            rounded_rectangle(
                cr,
                inset,
                inset,
                width - style.border_width,
                height - style.border_width,
                (style.corner_radius - inset).max(0.0),
            );
            cr.stroke()?;
        }
    }
    cr.restore()?;
    Ok(())
}
