//! Painters for extension element kinds.
//!
//! The built-in kinds are a closed enum. Anything else arrives as
//! `ElementKind::Extension { kind, params }` and is drawn by a painter
//! registered under that kind name.

use cairo::Context;
use std::collections::HashMap;
use std::sync::Arc;
use thermal_engine_types::SensorValue;

use crate::context::RenderContext;
use crate::error::RenderError;

/// Inputs handed to an extension painter for one element
pub struct PaintRequest<'a> {
    pub params: &'a serde_json::Value,
    /// Smoothed value of the element's binding, if it has one
    pub value: Option<SensorValue>,
    pub width: f64,
    pub height: f64,
    pub context: &'a RenderContext,
}

/// Draws one extension element kind.
///
/// Painters run on the render thread with the element's origin already
/// translated to (0, 0). Extension layers are redrawn every frame since
/// their inputs are opaque to the compositor.
pub trait ElementPainter: Send + Sync + 'static {
    /// Kind name matched against `ElementKind::Extension::kind`
    fn kind(&self) -> &str;

    fn paint(&self, cr: &Context, request: &PaintRequest<'_>) -> Result<(), RenderError>;
}

/// Registry of extension painters keyed by kind name
#[derive(Default, Clone)]
pub struct PainterRegistry {
    painters: HashMap<String, Arc<dyn ElementPainter>>,
}

impl PainterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a painter, replacing any previous one for the same kind
    pub fn register(&mut self, painter: Arc<dyn ElementPainter>) {
        let kind = painter.kind().to_string();
        if self.painters.insert(kind.clone(), painter).is_some() {
            log::info!("Replaced painter for element kind '{}'", kind);
        } else {
            log::debug!("Registered painter for element kind '{}'", kind);
        }
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ElementPainter>> {
        self.painters.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.painters.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for PainterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PainterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
