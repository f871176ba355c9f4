use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use thermal_engine::core::builtin_theme;
use thermal_engine_core::SensorRegistry;
use thermal_engine_render::{Compositor, RenderContext};
use thermal_engine_types::{MetricKey, SensorSnapshot};

fn bench_compositor(c: &mut Criterion) {
    let theme = builtin_theme();
    let (mut writer, reader) = SensorRegistry::new();
    let mut snapshot = SensorSnapshot::empty();
    for (i, key) in MetricKey::ALL.iter().enumerate() {
        snapshot.set(*key, 20.0 + i as f64 * 5.0, chrono::Utc::now());
    }
    writer.publish(&snapshot, &MetricKey::ALL);
    let registry = reader.snapshot();

    let mut compositor = match Compositor::new() {
        Ok(c) => c,
        Err(e) => panic!("compositor: {}", e),
    };

    c.bench_function("render_cached_layers", |b| {
        let context = RenderContext::now(Duration::ZERO);
        b.iter(|| compositor.render(black_box(&theme), black_box(&registry), &context))
    });

    c.bench_function("render_all_layers_dirty", |b| {
        let mut step = 0u64;
        b.iter(|| {
            // a new theme revision with a fresh definition hash forces redraws
            let mut theme = theme.clone();
            step += 1;
            theme.revision = step;
            theme.background.r = (step % 255) as f64 / 255.0;
            for element in &mut theme.elements {
                element.opacity = 0.5 + (step % 2) as f64 * 0.5;
            }
            let context = RenderContext::now(Duration::from_millis(step * 100));
            compositor.render(black_box(&theme), black_box(&registry), &context)
        })
    });
}

criterion_group!(benches, bench_compositor);
criterion_main!(benches);
