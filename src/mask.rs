use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    core::{MASK_PALETTE, Point, Rect, Rgba8, Vec2},
    geometry,
};

/// A closed polygon authored by the user. It both visually marks a region and
/// geometrically constrains where particles may be seeded.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Mask {
    /// Insertion order is the drawing order and defines the polygon edges.
    pub points: Vec<Point>,
    pub closed: bool,
    /// Unit-scaled flow vector; `Vec2::ZERO` means "no motion". Unset until
    /// the user assigns one.
    pub direction: Option<Vec2>,
    /// Cosmetic display color, picked at creation and stable thereafter.
    pub color: Rgba8,
}

impl Mask {
    fn begin(at: Point, color: Rgba8) -> Self {
        Self {
            points: vec![at],
            closed: false,
            direction: None,
            color,
        }
    }

    /// Axis-aligned bounding box, recomputed on demand.
    pub fn bounding_box(&self) -> Rect {
        geometry::bounding_box(&self.points)
    }

    /// Midpoint of the bounding box (not the centroid).
    pub fn center(&self) -> Point {
        self.bounding_box().center()
    }

    pub fn contains(&self, p: Point) -> bool {
        geometry::point_in_polygon(p, &self.points)
    }
}

/// Authoring state: at most one mask may be in progress at a time.
#[derive(Clone, Debug)]
enum Authoring {
    Idle,
    Drawing(Mask),
}

/// Interactive polygon capture plus the persistent mask collection.
///
/// All inputs originate from a trusted local UI, so invalid operations are
/// deliberately silent no-ops rather than errors.
pub struct MaskAuthoring {
    masks: Vec<Mask>,
    state: Authoring,
    rng: StdRng,
}

impl MaskAuthoring {
    pub fn new(seed: u64) -> Self {
        Self {
            masks: Vec::new(),
            state: Authoring::Idle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Committed (closed) masks, in completion order.
    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    /// The mask currently being drawn, if any.
    pub fn in_progress(&self) -> Option<&Mask> {
        match &self.state {
            Authoring::Idle => None,
            Authoring::Drawing(mask) => Some(mask),
        }
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, Authoring::Drawing(_))
    }

    /// Begin a new mask at the given point with a random palette color.
    /// No-op while another mask is in progress.
    pub fn start_drawing(&mut self, x: f64, y: f64) {
        if self.is_drawing() {
            return;
        }
        let color = MASK_PALETTE[self.rng.random_range(0..MASK_PALETTE.len())];
        self.state = Authoring::Drawing(Mask::begin(Point::new(x, y), color));
    }

    /// Append a vertex to the in-progress mask. No-op while idle.
    pub fn add_point(&mut self, x: f64, y: f64) {
        if let Authoring::Drawing(mask) = &mut self.state {
            mask.points.push(Point::new(x, y));
        }
    }

    /// Close the in-progress mask, optionally appending one final point
    /// first. A mask with fewer than 3 points cannot be closed: the call
    /// returns `None` and the mask stays in progress so the caller may add
    /// more points or cancel. On success the committed mask is returned and
    /// authoring goes back to idle.
    pub fn finish_drawing(&mut self, final_point: Option<Point>) -> Option<&Mask> {
        let Authoring::Drawing(mask) = &mut self.state else {
            return None;
        };
        if let Some(p) = final_point {
            mask.points.push(p);
        }
        if mask.points.len() < 3 {
            return None;
        }

        let Authoring::Drawing(mut mask) = std::mem::replace(&mut self.state, Authoring::Idle)
        else {
            unreachable!("checked above");
        };
        mask.closed = true;
        tracing::debug!(vertices = mask.points.len(), "mask committed");
        self.masks.push(mask);
        self.masks.last()
    }

    /// Discard the in-progress mask, if any. Committed masks are untouched.
    pub fn cancel_drawing(&mut self) {
        self.state = Authoring::Idle;
    }

    /// Assign a flow direction to a committed mask in place. An out-of-range
    /// index is a no-op.
    pub fn update_direction(&mut self, index: usize, direction: Vec2) {
        if let Some(mask) = self.masks.get_mut(index) {
            mask.direction = Some(direction);
        }
    }

    /// Drop every committed mask and any in-progress one.
    pub fn clear_all(&mut self) {
        self.masks.clear();
        self.state = Authoring::Idle;
    }
}
