use crate::core::{Point, Rect};

/// Ray-casting parity test: a horizontal ray at `p.y` toggles `inside` each
/// time it crosses an edge strictly between the edge endpoints' y values.
/// Degenerate input (< 3 points, horizontal edges at exactly `p.y`) follows
/// the algorithm's natural behavior.
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.saturating_sub(1);
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Axis-aligned bounding box of a point set. The box center is the midpoint
/// of the extremes, not the centroid. Callers guarantee non-empty input.
pub fn bounding_box(points: &[Point]) -> Rect {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Rect::new(min_x, min_y, max_x, max_y)
}
