//! Pango text layout for element labels, values and clocks.
//!
//! Font descriptions are cached per thread; the compositor owns its thread
//! so the cache lives as long as the render loop.

use cairo::Context;
use pango::{FontDescription, Layout, Style, Weight};
use pangocairo::functions::{create_layout, show_layout};
use std::cell::RefCell;
use std::collections::HashMap;
use thermal_engine_types::{Color, TextAlign};

use crate::render_utils::set_color;

const FONT_CACHE_MAX: usize = 64;

/// Font selection for a run of text. Sizes are in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec<'a> {
    pub family: &'a str,
    pub size: f64,
    pub bold: bool,
    pub italic: bool,
}

impl<'a> FontSpec<'a> {
    pub fn new(family: &'a str, size: f64) -> Self {
        Self {
            family,
            size,
            bold: false,
            italic: false,
        }
    }

    pub fn bold(mut self, bold: bool) -> Self {
        self.bold = bold;
        self
    }

    pub fn italic(mut self, italic: bool) -> Self {
        self.italic = italic;
        self
    }
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct FontKey {
    family: String,
    bold: bool,
    italic: bool,
    size_pango: i32,
}

thread_local! {
    static FONT_DESC_CACHE: RefCell<HashMap<FontKey, FontDescription>> = RefCell::new(HashMap::new());
}

fn font_description(font: &FontSpec<'_>) -> FontDescription {
    let size_pango = (font.size.max(1.0) * pango::SCALE as f64) as i32;
    let key = FontKey {
        family: font.family.to_string(),
        bold: font.bold,
        italic: font.italic,
        size_pango,
    };

    FONT_DESC_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(desc) = cache.get(&key) {
            return desc.clone();
        }
        if cache.len() >= FONT_CACHE_MAX {
            cache.clear();
        }

        let mut desc = FontDescription::new();
        desc.set_family(font.family);
        desc.set_weight(if font.bold { Weight::Bold } else { Weight::Normal });
        desc.set_style(if font.italic { Style::Italic } else { Style::Normal });
        desc.set_absolute_size(size_pango as f64);
        cache.insert(key, desc.clone());
        desc
    })
}

pub fn layout(cr: &Context, text: &str, font: &FontSpec<'_>) -> Layout {
    let layout = create_layout(cr);
    layout.set_font_description(Some(&font_description(font)));
    layout.set_text(text);
    layout
}

/// Logical size of laid-out text in pixels
pub fn text_size(layout: &Layout) -> (f64, f64) {
    let (_ink, logical) = layout.extents();
    let scale = pango::SCALE as f64;
    (logical.width() as f64 / scale, logical.height() as f64 / scale)
}

/// Draw `text` inside the box, vertically centered and aligned horizontally.
#[allow(clippy::too_many_arguments)]
pub fn draw_text_in_box(
    cr: &Context,
    text: &str,
    font: &FontSpec<'_>,
    color: &Color,
    align: TextAlign,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
) {
    let layout = layout(cr, text, font);
    let (text_width, text_height) = text_size(&layout);
    let draw_x = match align {
        TextAlign::Left => x,
        TextAlign::Center => x + (width - text_width) / 2.0,
        TextAlign::Right => x + width - text_width,
    };
    let draw_y = y + (height - text_height) / 2.0;

    set_color(cr, color);
    cr.move_to(draw_x, draw_y);
    show_layout(cr, &layout);
}

/// Draw `text` centered on a point
pub fn draw_text_centered(cr: &Context, text: &str, font: &FontSpec<'_>, color: &Color, cx: f64, cy: f64) {
    let layout = layout(cr, text, font);
    let (w, h) = text_size(&layout);
    set_color(cr, color);
    cr.move_to(cx - w / 2.0, cy - h / 2.0);
    show_layout(cr, &layout);
}
