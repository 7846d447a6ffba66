use std::sync::Arc;

use kurbo::Shape;

use crate::{
    assets::PreparedImage,
    core::{Affine, BezPath, Canvas, Circle, Point, Rgba8, Vec2},
    error::{MaskflowError, MaskflowResult},
    mask::Mask,
    overlay::Overlay,
    particle::Particle,
};

const MASK_FILL_ALPHA: u8 = 38;
const MASK_STROKE_WIDTH: f64 = 2.0;
const ARROW_LENGTH: f64 = 40.0;
const ARROW_HEAD_LENGTH: f64 = 12.0;
const ARROW_HEAD_ANGLE: f64 = 2.6;
const HANDLE_RADIUS: f64 = 4.0;
const LABEL_SIZE_PX: f32 = 12.0;
const LABEL_OFFSET: Vec2 = Vec2::new(6.0, -6.0);

/// Rendered frame in row-major premultiplied RGBA8.
#[derive(Clone, Debug)]
pub struct FrameRgba {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub premultiplied: bool,
}

/// Which loaded image a draw op refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSlot {
    Background,
    Material,
}

/// Flat immediate-mode draw list the scene builder emits and the CPU backend
/// executes. Ops carry no backend types so the list stays inspectable.
#[derive(Clone, Debug)]
pub enum DrawOp {
    /// Background image stretched over the full canvas.
    Backdrop,
    FillPath {
        path: BezPath,
        color: Rgba8,
    },
    StrokePath {
        path: BezPath,
        color: Rgba8,
        width: f64,
    },
    /// Material texture centered on `center`, scaled to `size` px square and
    /// rotated about its center.
    Sprite {
        slot: ImageSlot,
        center: Point,
        size: f64,
        rotation: f64,
    },
    /// Text label anchored at `at`. Skipped when no label font is configured.
    Label {
        text: String,
        at: Point,
        color: Rgba8,
    },
}

/// One frame's draw list: base ops (backdrop + masks) drawn opaque, particle
/// ops drawn under a single global opacity layer that is popped afterwards so
/// unrelated draws are unaffected.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub base: Vec<DrawOp>,
    pub particles: Vec<DrawOp>,
    pub particle_opacity: f32,
}

/// Build the frame's draw list from overlay state. Pure: reads the data
/// model, never mutates it, so rendering is idempotent.
pub fn build_scene(overlay: &Overlay) -> Scene {
    let mut scene = Scene {
        particle_opacity: overlay.settings().opacity as f32,
        ..Scene::default()
    };

    if overlay.background().is_some() {
        scene.base.push(DrawOp::Backdrop);
    }

    for mask in overlay.masks() {
        push_committed_mask(&mut scene.base, mask);
    }
    if let Some(mask) = overlay.in_progress_mask() {
        push_in_progress_mask(&mut scene.base, mask);
    }

    let textured = overlay.material().is_some();
    for particle in overlay.particles() {
        push_particle(&mut scene.particles, particle, textured);
    }

    scene
}

fn polygon_path(points: &[Point], close: bool) -> BezPath {
    let mut path = BezPath::new();
    let Some((first, rest)) = points.split_first() else {
        return path;
    };
    path.move_to(*first);
    for p in rest {
        path.line_to(*p);
    }
    if close {
        path.close_path();
    }
    path
}

fn push_committed_mask(ops: &mut Vec<DrawOp>, mask: &Mask) {
    let outline = polygon_path(&mask.points, true);
    ops.push(DrawOp::FillPath {
        path: outline.clone(),
        color: mask.color.with_alpha(MASK_FILL_ALPHA),
    });
    ops.push(DrawOp::StrokePath {
        path: outline,
        color: mask.color,
        width: MASK_STROKE_WIDTH,
    });

    if let Some(direction) = mask.direction
        && direction.hypot() > 0.0
    {
        ops.push(DrawOp::StrokePath {
            path: arrow_path(mask.center(), direction),
            color: mask.color,
            width: MASK_STROKE_WIDTH + 1.0,
        });
    }
}

/// Arrow glyph: shaft from the mask's bounding-box center along the flow
/// direction, plus two head strokes swept back from the tip.
fn arrow_path(center: Point, direction: Vec2) -> BezPath {
    let dir = direction / direction.hypot();
    let tip = center + dir * ARROW_LENGTH;
    let angle = dir.atan2();

    let mut path = BezPath::new();
    path.move_to(center);
    path.line_to(tip);
    for sweep in [ARROW_HEAD_ANGLE, -ARROW_HEAD_ANGLE] {
        path.move_to(tip);
        path.line_to(tip + Vec2::from_angle(angle + sweep) * ARROW_HEAD_LENGTH);
    }
    path
}

fn push_in_progress_mask(ops: &mut Vec<DrawOp>, mask: &Mask) {
    ops.push(DrawOp::StrokePath {
        path: polygon_path(&mask.points, false),
        color: mask.color,
        width: MASK_STROKE_WIDTH,
    });
    for (i, vertex) in mask.points.iter().enumerate() {
        ops.push(DrawOp::FillPath {
            path: Circle::new(*vertex, HANDLE_RADIUS).to_path(0.1),
            color: mask.color,
        });
        ops.push(DrawOp::Label {
            text: (i + 1).to_string(),
            at: *vertex + LABEL_OFFSET,
            color: Rgba8::opaque(255, 255, 255),
        });
    }
}

fn push_particle(ops: &mut Vec<DrawOp>, particle: &Particle, textured: bool) {
    if textured {
        ops.push(DrawOp::Sprite {
            slot: ImageSlot::Material,
            center: particle.position,
            size: particle.size,
            rotation: particle.rotation,
        });
        return;
    }

    // Fallback: filled circle with a smaller lighter highlight dot.
    let radius = particle.size / 2.0;
    ops.push(DrawOp::FillPath {
        path: Circle::new(particle.position, radius).to_path(0.1),
        color: particle.color,
    });
    let highlight = particle.position + Vec2::new(-radius / 2.5, -radius / 2.5);
    ops.push(DrawOp::FillPath {
        path: Circle::new(highlight, radius / 3.0).to_path(0.1),
        color: particle.color.lighten(0.6),
    });
}

struct ImagePaint {
    /// Identity of the decoded bytes the paint was built from.
    key: usize,
    width: u32,
    height: u32,
    paint: vello_cpu::Image,
}

/// CPU render backend: executes a [`Scene`] with `vello_cpu` into an owned
/// pixmap and reads the result back as [`FrameRgba`].
pub struct CpuRenderer {
    width: u16,
    height: u16,
    pixmap: vello_cpu::Pixmap,
    /// Straight RGBA the frame is cleared to; `None` clears to transparent.
    clear_rgba: Option<[u8; 4]>,
    background: Option<ImagePaint>,
    material: Option<ImagePaint>,
    labels: Option<LabelEngine>,
}

impl CpuRenderer {
    pub fn new(canvas: Canvas) -> MaskflowResult<Self> {
        let width: u16 = canvas
            .width
            .try_into()
            .map_err(|_| MaskflowError::render("canvas width exceeds u16"))?;
        let height: u16 = canvas
            .height
            .try_into()
            .map_err(|_| MaskflowError::render("canvas height exceeds u16"))?;
        Ok(Self {
            width,
            height,
            pixmap: vello_cpu::Pixmap::new(width, height),
            clear_rgba: Some([0, 0, 0, 255]),
            background: None,
            material: None,
            labels: None,
        })
    }

    pub fn set_clear_color(&mut self, rgba: Option<[u8; 4]>) {
        self.clear_rgba = rgba;
    }

    /// Configure the font used for vertex-handle labels. Without one, label
    /// ops are skipped.
    pub fn set_label_font(&mut self, font_bytes: Vec<u8>) -> MaskflowResult<()> {
        self.labels = Some(LabelEngine::new(font_bytes)?);
        Ok(())
    }

    /// Render one frame of the overlay. The canvas extent must match the one
    /// the renderer was created for.
    #[tracing::instrument(skip_all)]
    pub fn render(&mut self, overlay: &Overlay) -> MaskflowResult<FrameRgba> {
        if overlay.canvas().width != u32::from(self.width)
            || overlay.canvas().height != u32::from(self.height)
        {
            return Err(MaskflowError::render(
                "overlay canvas does not match renderer extent",
            ));
        }

        self.background = sync_image_paint(self.background.take(), overlay.background())?;
        self.material = sync_image_paint(self.material.take(), overlay.material())?;

        let premul = self
            .clear_rgba
            .map(|[r, g, b, a]| premul_rgba8(r, g, b, a))
            .unwrap_or([0, 0, 0, 0]);
        clear_pixmap(&mut self.pixmap, premul);

        let scene = build_scene(overlay);
        let mut ctx = vello_cpu::RenderContext::new(self.width, self.height);
        for op in &scene.base {
            self.draw_op(&mut ctx, op)?;
        }
        if !scene.particles.is_empty() {
            let opacity = scene.particle_opacity.clamp(0.0, 1.0);
            if opacity < 1.0 {
                ctx.push_opacity_layer(opacity);
            }
            for op in &scene.particles {
                self.draw_op(&mut ctx, op)?;
            }
            if opacity < 1.0 {
                ctx.pop_layer();
            }
        }
        ctx.flush();
        ctx.render_to_pixmap(&mut self.pixmap);

        Ok(FrameRgba {
            width: u32::from(self.width),
            height: u32::from(self.height),
            data: self.pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        })
    }

    fn draw_op(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        op: &DrawOp,
    ) -> MaskflowResult<()> {
        ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);

        match op {
            DrawOp::Backdrop => {
                let Some(bg) = &self.background else {
                    return Ok(());
                };
                let (w, h) = (f64::from(bg.width), f64::from(bg.height));
                let transform = Affine::scale_non_uniform(
                    f64::from(self.width) / w,
                    f64::from(self.height) / h,
                );
                ctx.set_transform(affine_to_cpu(transform));
                ctx.set_paint(bg.paint.clone());
                ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, w, h));
                Ok(())
            }
            DrawOp::FillPath { path, color } => {
                ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    color.r, color.g, color.b, color.a,
                ));
                ctx.fill_path(&bezpath_to_cpu(path));
                Ok(())
            }
            DrawOp::StrokePath { path, color, width } => {
                ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    color.r, color.g, color.b, color.a,
                ));
                ctx.set_stroke(vello_cpu::kurbo::Stroke::new(*width));
                ctx.stroke_path(&bezpath_to_cpu(path));
                Ok(())
            }
            DrawOp::Sprite {
                slot,
                center,
                size,
                rotation,
            } => {
                let image = match slot {
                    ImageSlot::Background => self.background.as_ref(),
                    ImageSlot::Material => self.material.as_ref(),
                };
                let Some(img) = image else {
                    return Ok(());
                };
                let (w, h) = (f64::from(img.width), f64::from(img.height));
                let transform = Affine::translate(center.to_vec2())
                    * Affine::rotate(*rotation)
                    * Affine::scale_non_uniform(size / w, size / h)
                    * Affine::translate(Vec2::new(-w / 2.0, -h / 2.0));
                ctx.set_transform(affine_to_cpu(transform));
                ctx.set_paint(img.paint.clone());
                ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, w, h));
                Ok(())
            }
            DrawOp::Label { text, at, color } => {
                let Some(labels) = &mut self.labels else {
                    return Ok(());
                };
                let layout = labels.layout(text, LABEL_SIZE_PX, *color)?;
                let font = labels.font.clone();
                ctx.set_transform(affine_to_cpu(Affine::translate(at.to_vec2())));
                for line in layout.lines() {
                    for item in line.items() {
                        let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                            continue;
                        };
                        let brush = run.style().brush;
                        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                            brush.r, brush.g, brush.b, brush.a,
                        ));
                        let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                            id: g.id,
                            x: g.x,
                            y: g.y,
                        });
                        ctx.glyph_run(&font)
                            .font_size(run.run().font_size())
                            .fill_glyphs(glyphs);
                    }
                }
                Ok(())
            }
        }
    }
}

fn sync_image_paint(
    cached: Option<ImagePaint>,
    image: Option<&PreparedImage>,
) -> MaskflowResult<Option<ImagePaint>> {
    let Some(image) = image else {
        return Ok(None);
    };
    let key = Arc::as_ptr(&image.rgba8_premul) as usize;
    if let Some(cached) = cached
        && cached.key == key
    {
        return Ok(Some(cached));
    }

    let pixmap = image_premul_bytes_to_pixmap(&image.rgba8_premul, image.width, image.height)?;
    Ok(Some(ImagePaint {
        key,
        width: image.width,
        height: image.height,
        paint: vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        },
    }))
}

/// Parley layout plumbing for vertex-handle labels, driven by caller-supplied
/// font bytes.
struct LabelEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<Rgba8>,
    family_name: String,
    font: vello_cpu::peniko::FontData,
}

impl LabelEngine {
    fn new(font_bytes: Vec<u8>) -> MaskflowResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.clone()), None);
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            MaskflowError::validation("no font families registered from font bytes")
        })?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| MaskflowError::validation("registered font family has no name"))?
            .to_string();

        let font = vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(font_bytes), 0);
        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
            font,
        })
    }

    fn layout(
        &mut self,
        text: &str,
        size_px: f32,
        brush: Rgba8,
    ) -> MaskflowResult<parley::Layout<Rgba8>> {
        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<Rgba8> = builder.build(text);
        layout.break_all_lines(None);
        Ok(layout)
    }
}

fn premul_rgba8(r: u8, g: u8, b: u8, a: u8) -> [u8; 4] {
    let af = (a as u16) + 1;
    let premul = |c: u8| -> u8 { (((c as u16) * af) >> 8) as u8 };
    [premul(r), premul(g), premul(b), a]
}

fn clear_pixmap(pixmap: &mut vello_cpu::Pixmap, rgba: [u8; 4]) {
    let data = pixmap.data_as_u8_slice_mut();
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&rgba);
    }
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn point_to_cpu(p: Point) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(point_to_cpu(p)),
            PathEl::LineTo(p) => out.line_to(point_to_cpu(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(point_to_cpu(p1), point_to_cpu(p2)),
            PathEl::CurveTo(p1, p2, p3) => {
                out.curve_to(point_to_cpu(p1), point_to_cpu(p2), point_to_cpu(p3));
            }
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

fn image_premul_bytes_to_pixmap(
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
) -> MaskflowResult<vello_cpu::Pixmap> {
    let w: u16 = width
        .try_into()
        .map_err(|_| MaskflowError::render("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| MaskflowError::render("image height exceeds u16"))?;
    if rgba8_premul.len() != width as usize * height as usize * 4 {
        return Err(MaskflowError::render("prepared image byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for px in rgba8_premul.chunks_exact(4) {
        let a = px[3];
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 {
            r: px[0],
            g: px[1],
            b: px[2],
            a,
        });
    }

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}
