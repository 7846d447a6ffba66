use std::sync::{Arc, Once};

use maskflow::{Canvas, Compass, CpuRenderer, Overlay, Point, PreparedImage, SettingsPatch};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn digest_u64(bytes: &[u8]) -> u64 {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    for chunk in bytes.chunks(8) {
        let mut v = 0u64;
        for (i, &b) in chunk.iter().enumerate() {
            v |= (b as u64) << (i * 8);
        }
        state = mix64(state ^ v);
    }
    state
}

fn red_background(width: u32, height: u32) -> PreparedImage {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for _ in 0..width * height {
        data.extend_from_slice(&[200, 30, 30, 255]);
    }
    PreparedImage {
        width,
        height,
        rgba8_premul: Arc::new(data),
    }
}

fn build_overlay(seed: u64) -> Overlay {
    let mut ov = Overlay::new(Canvas::new(64, 64).unwrap(), seed);
    ov.set_background(red_background(8, 8));
    ov.start_drawing(8.0, 8.0);
    ov.add_point(56.0, 8.0);
    ov.add_point(56.0, 56.0);
    ov.finish_drawing(Some(Point::new(8.0, 56.0))).unwrap();
    ov.update_settings(SettingsPatch {
        density: Some(0.2),
        ..SettingsPatch::default()
    });
    ov.apply_direction(0, Compass::Right);
    ov
}

#[test]
fn cpu_render_is_deterministic_and_nonempty() {
    init_tracing();
    let ov_a = build_overlay(1);
    let ov_b = build_overlay(1);

    let mut renderer_a = CpuRenderer::new(ov_a.canvas()).unwrap();
    let mut renderer_b = CpuRenderer::new(ov_b.canvas()).unwrap();

    let a = renderer_a.render(&ov_a).unwrap();
    let b = renderer_b.render(&ov_b).unwrap();

    assert_eq!(a.width, 64);
    assert_eq!(a.height, 64);
    assert!(a.premultiplied);
    assert_eq!(a.data.len(), 64 * 64 * 4);
    assert_eq!(digest_u64(&a.data), digest_u64(&b.data));

    // The red backdrop must show through somewhere.
    assert!(a.data.chunks_exact(4).any(|px| px[0] > 100 && px[3] == 255));
}

#[test]
fn render_does_not_mutate_the_overlay() {
    init_tracing();
    let ov = build_overlay(2);
    let mut renderer = CpuRenderer::new(ov.canvas()).unwrap();

    let positions: Vec<Point> = ov.particles().iter().map(|p| p.position).collect();
    let a = renderer.render(&ov).unwrap();
    let b = renderer.render(&ov).unwrap();

    assert_eq!(digest_u64(&a.data), digest_u64(&b.data));
    assert_eq!(
        positions,
        ov.particles().iter().map(|p| p.position).collect::<Vec<_>>()
    );
}

#[test]
fn ticking_between_renders_changes_the_frame() {
    init_tracing();
    let mut ov = build_overlay(3);
    let mut renderer = CpuRenderer::new(ov.canvas()).unwrap();

    let a = renderer.render(&ov).unwrap();
    for _ in 0..8 {
        ov.tick(16.0);
    }
    let b = renderer.render(&ov).unwrap();
    assert_ne!(digest_u64(&a.data), digest_u64(&b.data));
}
