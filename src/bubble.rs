// ============================================================================
// BUBBLE LAYOUT — pure geometry shared by the stage and the compositor
// ============================================================================
//
// Both projections (live presentation and export) build bubble rasters from
// this one layout, so what is exported is exactly what was on screen.

use egui::{Pos2, Rect, Vec2, pos2, vec2};

use crate::geometry::rotate_vec;
use crate::scene::BubbleShape;

/// Minimum bubble body, logical units.
pub const MIN_BODY: Vec2 = vec2(150.0, 80.0);
/// Inner padding between text and the bubble border.
pub const TEXT_PADDING: f32 = 16.0;
/// Bubble border stroke width.
pub const BORDER_WIDTH: f32 = 4.0;
/// Corner radius of the speech bubble body.
pub const CORNER_RADIUS: f32 = 18.0;
/// Tail base width / reach beyond the body edge.
pub const TAIL_WIDTH: f32 = 40.0;
pub const TAIL_LENGTH: f32 = 45.0;
/// Raster margin around the body — must fit the tail at any angle plus the
/// speaker label.
pub const RASTER_MARGIN: f32 = TAIL_LENGTH + 10.0;
/// Bubble text size, logical units.
pub const FONT_SIZE: f32 = 22.0;
/// Speaker label text size.
pub const SPEAKER_FONT_SIZE: f32 = 15.0;

/// Tail geometry in raster-local coordinates.
#[derive(Clone, Debug)]
pub enum TailGeometry {
    /// Speech: one filled triangle (tip, base corner, base corner).
    Triangle([Pos2; 3]),
    /// Thought: two trailing circles, `(center, radius)`, larger first.
    Dots([(Pos2, f32); 2]),
}

/// Computed layout of one bubble raster.
#[derive(Clone, Debug)]
pub struct BubbleLayout {
    /// Full raster size including the tail margin.
    pub raster_size: Vec2,
    /// Bubble body rect in raster coordinates.
    pub body: Rect,
    pub shape: BubbleShape,
    pub tail: TailGeometry,
}

/// Body size needed for a measured text block: text plus padding, never
/// smaller than the minimum bubble.  Collapses to exactly fit the content —
/// no trailing-whitespace growth, since callers measure trimmed text.
pub fn body_size(text_size: Vec2) -> Vec2 {
    vec2(
        (text_size.x + 2.0 * TEXT_PADDING).max(MIN_BODY.x),
        (text_size.y + 2.0 * TEXT_PADDING).max(MIN_BODY.y),
    )
}

/// Lay out a bubble for a measured text block and tail angle.
/// `tail_angle_deg` uses screen convention: 90° points straight down.
pub fn layout(shape: BubbleShape, text_size: Vec2, tail_angle_deg: f32) -> BubbleLayout {
    let body_size = body_size(text_size);
    let raster_size = body_size + Vec2::splat(2.0 * RASTER_MARGIN);
    let center = pos2(raster_size.x * 0.5, raster_size.y * 0.5);
    let body = Rect::from_center_size(center, body_size);

    let dir = rotate_vec(vec2(1.0, 0.0), tail_angle_deg);
    // Attach slightly inside the body edge so the tail blends with it.
    let attach = edge_distance(body_size, dir) - BORDER_WIDTH;

    let tail = match shape {
        BubbleShape::Speech => {
            let perp = vec2(-dir.y, dir.x);
            let tip = center + dir * (attach + TAIL_LENGTH);
            let base_a = center + dir * attach + perp * (TAIL_WIDTH * 0.5);
            let base_b = center + dir * attach - perp * (TAIL_WIDTH * 0.5);
            TailGeometry::Triangle([tip, base_a, base_b])
        }
        BubbleShape::Thought => {
            let big = center + dir * (attach + 12.0);
            let small = center + dir * (attach + 30.0);
            TailGeometry::Dots([(big, 8.0), (small, 5.0)])
        }
    };

    BubbleLayout {
        raster_size,
        body,
        shape,
        tail,
    }
}

/// Distance from the body center to its edge along `dir` (unit vector).
/// Rect edge for speech bubbles, ellipse edge for thought bubbles share the
/// same conservative estimate (the tail overlaps the border either way).
fn edge_distance(body_size: Vec2, dir: Vec2) -> f32 {
    let hx = body_size.x * 0.5;
    let hy = body_size.y * 0.5;
    let ax = dir.x.abs();
    let ay = dir.y.abs();
    if ax < 1e-6 {
        hy
    } else if ay < 1e-6 {
        hx
    } else {
        (hx / ax).min(hy / ay)
    }
}

// ---------------------------------------------------------------------------
//  Signed distances for rasterization (negative inside)
// ---------------------------------------------------------------------------

/// Rounded-rectangle signed distance, for the speech body.
pub fn sdf_rounded_rect(p: Pos2, rect: Rect, radius: f32) -> f32 {
    let c = rect.center();
    let half = rect.size() * 0.5 - Vec2::splat(radius);
    let d = vec2(
        (p.x - c.x).abs() - half.x.max(0.0),
        (p.y - c.y).abs() - half.y.max(0.0),
    );
    let outside = vec2(d.x.max(0.0), d.y.max(0.0)).length();
    let inside = d.x.max(d.y).min(0.0);
    outside + inside - radius
}

/// Ellipse signed distance approximation, for the thought body.  Scaled so
/// the gradient is roughly 1 near the edge, which is all the anti-aliased
/// fill needs.
pub fn sdf_ellipse(p: Pos2, rect: Rect) -> f32 {
    let c = rect.center();
    let rx = (rect.width() * 0.5).max(1e-3);
    let ry = (rect.height() * 0.5).max(1e-3);
    let nx = (p.x - c.x) / rx;
    let ny = (p.y - c.y) / ry;
    let k = (nx * nx + ny * ny).sqrt();
    (k - 1.0) * rx.min(ry)
}

/// Body signed distance for either shape.
pub fn sdf_body(p: Pos2, layout: &BubbleLayout) -> f32 {
    match layout.shape {
        BubbleShape::Speech => sdf_rounded_rect(p, layout.body, CORNER_RADIUS),
        BubbleShape::Thought => sdf_ellipse(p, layout.body),
    }
}

/// Point-in-triangle test for the speech tail (barycentric sign check).
pub fn triangle_contains(tri: &[Pos2; 3], p: Pos2) -> bool {
    let sign =
        |a: Pos2, b: Pos2| (p.x - b.x) * (a.y - b.y) - (a.x - b.x) * (p.y - b.y);
    let d1 = sign(tri[0], tri[1]);
    let d2 = sign(tri[1], tri[2]);
    let d3 = sign(tri[2], tri[0]);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_never_shrinks_below_minimum() {
        let s = body_size(vec2(10.0, 10.0));
        assert_eq!(s, MIN_BODY);
    }

    #[test]
    fn body_grows_to_fit_text() {
        let s = body_size(vec2(400.0, 30.0));
        assert_eq!(s.x, 400.0 + 2.0 * TEXT_PADDING);
        assert_eq!(s.y, MIN_BODY.y);
    }

    #[test]
    fn default_tail_angle_points_down() {
        let l = layout(BubbleShape::Speech, vec2(0.0, 0.0), 90.0);
        let TailGeometry::Triangle(tri) = &l.tail else {
            panic!("speech bubble must have a triangle tail");
        };
        let center = l.body.center();
        // Tip is below the body center and below the body bottom edge.
        assert!(tri[0].y > center.y);
        assert!(tri[0].y > l.body.max.y);
        assert!((tri[0].x - center.x).abs() < 1e-3);
    }

    #[test]
    fn thought_bubble_gets_trailing_dots() {
        let l = layout(BubbleShape::Thought, vec2(0.0, 0.0), 0.0);
        let TailGeometry::Dots(dots) = &l.tail else {
            panic!("thought bubble must have dots");
        };
        // Dots trail to the right of the body at angle 0, largest first.
        assert!(dots[0].0.x > l.body.center().x);
        assert!(dots[1].0.x > dots[0].0.x);
        assert!(dots[0].1 > dots[1].1);
    }

    #[test]
    fn sdf_signs_make_sense() {
        let l = layout(BubbleShape::Speech, vec2(100.0, 40.0), 90.0);
        assert!(sdf_body(l.body.center(), &l) < 0.0);
        assert!(sdf_body(pos2(0.0, 0.0), &l) > 0.0);

        let t = layout(BubbleShape::Thought, vec2(100.0, 40.0), 90.0);
        assert!(sdf_body(t.body.center(), &t) < 0.0);
        assert!(sdf_body(pos2(0.0, 0.0), &t) > 0.0);
    }

    #[test]
    fn triangle_contains_its_centroid() {
        let tri = [pos2(0.0, 0.0), pos2(10.0, 0.0), pos2(5.0, 10.0)];
        assert!(triangle_contains(&tri, pos2(5.0, 3.0)));
        assert!(!triangle_contains(&tri, pos2(-1.0, -1.0)));
    }
}
