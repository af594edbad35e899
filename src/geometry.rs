// ============================================================================
// GEOMETRY ENGINE — pure math shared by gestures, stage and compositor
// ============================================================================

use egui::{Pos2, Vec2, pos2, vec2};

/// Item scale clamp — one fixed, documented set of bounds.
pub const MIN_ITEM_SCALE: f32 = 0.2;
pub const MAX_ITEM_SCALE: f32 = 5.0;

/// Background zoom clamp (background pinch affects zoom only, never rotation).
pub const MIN_BG_ZOOM: f32 = 0.5;
pub const MAX_BG_ZOOM: f32 = 4.0;

/// Euclidean distance between two points.
pub fn distance(p1: Pos2, p2: Pos2) -> f32 {
    (p2 - p1).length()
}

/// Angle of the vector p1→p2 in degrees, atan2 semantics (−180..180).
pub fn angle_deg(p1: Pos2, p2: Pos2) -> f32 {
    let d = p2 - p1;
    d.y.atan2(d.x).to_degrees()
}

/// Wrap an unconstrained rotation into 0..360 for display.
pub fn wrap_deg(deg: f32) -> f32 {
    let w = deg % 360.0;
    if w < 0.0 { w + 360.0 } else { w }
}

/// Clamp an item scale into the supported range.
pub fn clamp_item_scale(scale: f32) -> f32 {
    scale.clamp(MIN_ITEM_SCALE, MAX_ITEM_SCALE)
}

/// Clamp a background zoom into the supported range.
pub fn clamp_bg_zoom(zoom: f32) -> f32 {
    zoom.clamp(MIN_BG_ZOOM, MAX_BG_ZOOM)
}

// ---------------------------------------------------------------------------
//  Affine item transform — translate, then scale, then rotate about center
// ---------------------------------------------------------------------------

/// Transform of a placed item: `position` is the item center in scene units,
/// scale and rotation are applied about that center, in that order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemTransform {
    pub position: Pos2,
    pub scale: f32,
    pub rotation_deg: f32,
}

impl Default for ItemTransform {
    fn default() -> Self {
        Self {
            position: pos2(0.0, 0.0),
            scale: 1.0,
            rotation_deg: 0.0,
        }
    }
}

impl ItemTransform {
    /// Map a point from the item's local space (origin at the item center,
    /// unscaled units) into scene space.
    pub fn local_to_scene(&self, local: Vec2) -> Pos2 {
        let scaled = local * self.scale;
        self.position + rotate_vec(scaled, self.rotation_deg)
    }

    /// Map a scene-space point into the item's local space (origin at the
    /// item center, unscaled units).  Degenerate zero scale is guarded by
    /// the clamp, but a defensive epsilon keeps the division finite anyway.
    pub fn scene_to_local(&self, scene: Pos2) -> Vec2 {
        let centered = scene - self.position;
        let unrotated = rotate_vec(centered, -self.rotation_deg);
        unrotated / self.scale.max(1e-6)
    }

    /// Scene-space corners of a `size`-sized box centered on the item,
    /// in TL, TR, BR, BL order.
    pub fn corners(&self, size: Vec2) -> [Pos2; 4] {
        let hx = size.x * 0.5;
        let hy = size.y * 0.5;
        [
            self.local_to_scene(vec2(-hx, -hy)),
            self.local_to_scene(vec2(hx, -hy)),
            self.local_to_scene(vec2(hx, hy)),
            self.local_to_scene(vec2(-hx, hy)),
        ]
    }

    /// Hit test: does a scene-space point fall inside the transformed box?
    pub fn contains(&self, scene: Pos2, size: Vec2) -> bool {
        let local = self.scene_to_local(scene);
        local.x.abs() <= size.x * 0.5 && local.y.abs() <= size.y * 0.5
    }

    /// Axis-aligned scene-space bounds of the transformed box.
    pub fn bounds(&self, size: Vec2) -> egui::Rect {
        let corners = self.corners(size);
        let mut min = corners[0];
        let mut max = corners[0];
        for c in &corners[1..] {
            min = min.min(*c);
            max = max.max(*c);
        }
        egui::Rect::from_min_max(min, max)
    }
}

/// Rotate a vector by `deg` degrees (counter-clockwise in math terms,
/// clockwise on screen because y points down).
pub fn rotate_vec(v: Vec2, deg: f32) -> Vec2 {
    let rad = deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    vec2(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(distance(pos2(0.0, 0.0), pos2(3.0, 4.0)), 5.0);
        assert_eq!(distance(pos2(1.0, 1.0), pos2(1.0, 1.0)), 0.0);
    }

    #[test]
    fn angle_uses_atan2_semantics() {
        assert_eq!(angle_deg(pos2(0.0, 0.0), pos2(1.0, 0.0)), 0.0);
        assert_eq!(angle_deg(pos2(0.0, 0.0), pos2(0.0, 1.0)), 90.0);
        assert_eq!(angle_deg(pos2(0.0, 0.0), pos2(-1.0, 0.0)), 180.0);
        assert!((angle_deg(pos2(0.0, 0.0), pos2(0.0, -1.0)) - -90.0).abs() < 1e-5);
    }

    #[test]
    fn wrap_deg_covers_negatives() {
        assert_eq!(wrap_deg(0.0), 0.0);
        assert_eq!(wrap_deg(370.0), 10.0);
        assert_eq!(wrap_deg(-90.0), 270.0);
    }

    #[test]
    fn scale_clamp_handles_pathological_ratios() {
        assert_eq!(clamp_item_scale(0.0), MIN_ITEM_SCALE);
        assert_eq!(clamp_item_scale(f32::INFINITY), MAX_ITEM_SCALE);
        assert_eq!(clamp_item_scale(1.0), 1.0);
    }

    #[test]
    fn local_scene_round_trip() {
        let t = ItemTransform {
            position: pos2(100.0, 50.0),
            scale: 2.0,
            rotation_deg: 33.0,
        };
        let local = vec2(10.0, -4.0);
        let back = t.scene_to_local(t.local_to_scene(local));
        assert!((back - local).length() < 1e-3);
    }

    #[test]
    fn contains_respects_rotation() {
        let t = ItemTransform {
            position: pos2(0.0, 0.0),
            scale: 1.0,
            rotation_deg: 45.0,
        };
        let size = vec2(10.0, 10.0);
        // Rotated 45°, the box corners point along the axes and reach ~7.07.
        assert!(t.contains(pos2(6.9, 0.0), size));
        // The old axis-aligned corner direction only reaches 5.0 now.
        assert!(!t.contains(pos2(4.9, 4.9), size));
    }
}
