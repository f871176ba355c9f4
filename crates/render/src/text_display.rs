//! Static and metric-bound text.

use cairo::Context;
use thermal_engine_types::{SensorValue, TextStyle, UnitKind};

use crate::error::RenderError;
use crate::pango_text::{self, FontSpec};

const VALUE_PLACEHOLDER: &str = "{value}";

/// Resolve the string shown by a text element.
///
/// Bound text substitutes `{value}` when present; otherwise a non-empty
/// text becomes a `label: value` pair and an empty one shows just the value.
pub fn resolve_text(style: &TextStyle, bound: Option<(SensorValue, UnitKind)>) -> String {
    let Some((value, unit)) = bound else {
        return style.text.clone();
    };
    let formatted = unit.format(value.or_zero());
    if style.text.contains(VALUE_PLACEHOLDER) {
        style.text.replace(VALUE_PLACEHOLDER, &formatted)
    } else if style.text.is_empty() {
        formatted
    } else {
        format!("{}: {}", style.text, formatted)
    }
}

pub fn render_text(
    cr: &Context,
    style: &TextStyle,
    bound: Option<(SensorValue, UnitKind)>,
    width: f64,
    height: f64,
) -> Result<(), RenderError> {
    let text = resolve_text(style, bound);
    if text.is_empty() {
        return Ok(());
    }

    cr.save()?;
    if style.clip {
        cr.rectangle(0.0, 0.0, width, height);
        cr.clip();
    }
    let font = FontSpec::new(&style.font_family, style.font_size)
        .bold(style.bold)
        .italic(style.italic);
    pango_text::draw_text_in_box(cr, &text, &font, &style.color, style.align, 0.0, 0.0, width, height);
    cr.restore()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(text: &str) -> TextStyle {
        TextStyle {
            text: text.into(),
            ..TextStyle::default()
        }
    }

    #[test]
    fn test_static_text() {
        assert_eq!(resolve_text(&style("Hello"), None), "Hello");
    }

    #[test]
    fn test_bound_text_forms() {
        let bound = Some((SensorValue::Value(62.4), UnitKind::Temperature));
        assert_eq!(resolve_text(&style(""), bound), "62°C");
        assert_eq!(resolve_text(&style("CPU"), bound), "CPU: 62°C");
        assert_eq!(resolve_text(&style("CPU {value} now"), bound), "CPU 62°C now");
    }

    #[test]
    fn test_no_data_shows_zero() {
        let bound = Some((SensorValue::NoData, UnitKind::Clock));
        assert_eq!(resolve_text(&style(""), bound), "0MHz");
    }
}
