// ============================================================================
// GESTURE CONTROLLER — single-active-gesture state machine
// ============================================================================
//
// Raw pointer/touch events arrive from the stage projection already mapped
// into scene units.  Pointer-down hit-tests exactly one target (an item or
// the empty canvas standing for the background) and locks it in for the
// whole gesture; every move computes deltas against the one snapshot taken
// at gesture start, never against the previous move's result.

use egui::{Pos2, Vec2};
use uuid::Uuid;

use crate::geometry::{self, ItemTransform, clamp_bg_zoom};
use crate::scene::SceneGraph;

/// What a pointer-down landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitTarget {
    Item(Uuid),
    /// Empty canvas — stands for the background layer.
    Background,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GestureState {
    Idle,
    DraggingItem {
        id: Uuid,
        start: Pos2,
        snapshot: ItemTransform,
    },
    PinchingItem {
        id: Uuid,
        start_dist: f32,
        start_angle: f32,
        snapshot: ItemTransform,
    },
    DraggingBackground {
        start: Pos2,
        snapshot_pan: Vec2,
    },
    PinchingBackground {
        start_dist: f32,
        snapshot_zoom: f32,
    },
}

#[derive(Default)]
pub struct GestureController {
    state: Option<GestureState>,
}

impl GestureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GestureState {
        self.state.unwrap_or(GestureState::Idle)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state(), GestureState::Idle)
    }

    /// Pointer/touch-down.  Always retargets the selection (the hit item,
    /// or none for empty canvas); then enters a drag or pinch state with a
    /// snapshot of the target's current transform and the initial contact
    /// geometry.  Locked targets leave the controller idle — a policy
    /// no-op, not an error.
    pub fn pointer_down(&mut self, scene: &mut SceneGraph, hit: HitTarget, contacts: &[Pos2]) {
        self.state = Some(GestureState::Idle);
        match hit {
            HitTarget::Item(id) => {
                scene.set_selected(Some(id));
                let Some(item) = scene.get(id) else {
                    return;
                };
                if item.locked {
                    return;
                }
                let snapshot = item.transform();
                match contacts {
                    [p] => {
                        self.state = Some(GestureState::DraggingItem {
                            id,
                            start: *p,
                            snapshot,
                        });
                    }
                    [a, b, ..] => {
                        let start_dist = geometry::distance(*a, *b);
                        if start_dist <= f32::EPSILON {
                            // Degenerate zero-distance pinch denominator.
                            return;
                        }
                        self.state = Some(GestureState::PinchingItem {
                            id,
                            start_dist,
                            start_angle: geometry::angle_deg(*a, *b),
                            snapshot,
                        });
                    }
                    [] => {}
                }
            }
            HitTarget::Background => {
                scene.set_selected(None);
                if scene.background.locked {
                    return;
                }
                match contacts {
                    [p] => {
                        self.state = Some(GestureState::DraggingBackground {
                            start: *p,
                            snapshot_pan: scene.background.pan,
                        });
                    }
                    [a, b, ..] => {
                        let start_dist = geometry::distance(*a, *b);
                        if start_dist <= f32::EPSILON {
                            return;
                        }
                        self.state = Some(GestureState::PinchingBackground {
                            start_dist,
                            snapshot_zoom: scene.background.zoom,
                        });
                    }
                    [] => {}
                }
            }
        }
    }

    /// Pointer/touch-move.  If the contact count no longer matches the
    /// active gesture (a third finger landed, or one of two lifted) the
    /// gesture degrades by simply ceasing updates until pointer-up.
    pub fn pointer_move(&mut self, scene: &mut SceneGraph, contacts: &[Pos2]) {
        match self.state() {
            GestureState::Idle => {}
            GestureState::DraggingItem {
                id,
                start,
                snapshot,
            } => {
                let [p] = contacts else { return };
                let delta = *p - start;
                scene.apply_gesture_transform(
                    id,
                    ItemTransform {
                        position: snapshot.position + delta,
                        ..snapshot
                    },
                );
            }
            GestureState::PinchingItem {
                id,
                start_dist,
                start_angle,
                snapshot,
            } => {
                let [a, b] = contacts else { return };
                let factor = geometry::distance(*a, *b) / start_dist;
                let angle_delta = geometry::angle_deg(*a, *b) - start_angle;
                scene.apply_gesture_transform(
                    id,
                    ItemTransform {
                        position: snapshot.position,
                        scale: snapshot.scale * factor,
                        rotation_deg: snapshot.rotation_deg + angle_delta,
                    },
                );
            }
            GestureState::DraggingBackground {
                start,
                snapshot_pan,
            } => {
                let [p] = contacts else { return };
                if scene.background.locked {
                    return;
                }
                scene.background.pan = snapshot_pan + (*p - start);
            }
            GestureState::PinchingBackground {
                start_dist,
                snapshot_zoom,
            } => {
                let [a, b] = contacts else { return };
                if scene.background.locked {
                    return;
                }
                // Background pinch affects zoom only, never rotation.
                let factor = geometry::distance(*a, *b) / start_dist;
                scene.background.zoom = clamp_bg_zoom(snapshot_zoom * factor);
            }
        }
    }

    /// Global pointer/touch-up — listened at the application root so a
    /// gesture can never get stuck when the pointer leaves the target's
    /// bounds.  Discards the snapshot.
    pub fn pointer_up(&mut self) {
        self.state = Some(GestureState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MAX_ITEM_SCALE, MIN_ITEM_SCALE};
    use crate::scene::{ItemKind, ItemPatch, StickerPayload};
    use egui::pos2;

    fn scene_with_item() -> (SceneGraph, Uuid) {
        let mut scene = SceneGraph::new();
        let id = scene.add_item(
            ItemKind::Sticker(StickerPayload {
                glyph: "💖".to_string(),
            }),
            pos2(0.0, 0.0),
        );
        (scene, id)
    }

    #[test]
    fn drag_applies_net_delta_from_single_snapshot() {
        let (mut scene, id) = scene_with_item();
        let mut gestures = GestureController::new();

        gestures.pointer_down(&mut scene, HitTarget::Item(id), &[pos2(100.0, 100.0)]);
        gestures.pointer_move(&mut scene, &[pos2(120.0, 120.0)]);
        gestures.pointer_move(&mut scene, &[pos2(150.0, 150.0)]);
        gestures.pointer_up();

        // Two moves of (20,20) then (30,30) relative to start — exactly
        // (50,50), not a cumulative (70,70).
        assert_eq!(scene.get(id).unwrap().position, pos2(50.0, 50.0));
        assert!(gestures.is_idle());
    }

    #[test]
    fn batched_and_incremental_moves_agree() {
        let (mut scene_a, id_a) = scene_with_item();
        let (mut scene_b, id_b) = scene_with_item();
        let mut g = GestureController::new();

        g.pointer_down(&mut scene_a, HitTarget::Item(id_a), &[pos2(0.0, 0.0)]);
        for i in 1..=10 {
            g.pointer_move(&mut scene_a, &[pos2(i as f32 * 3.0, i as f32 * -2.0)]);
        }
        g.pointer_up();

        g.pointer_down(&mut scene_b, HitTarget::Item(id_b), &[pos2(0.0, 0.0)]);
        g.pointer_move(&mut scene_b, &[pos2(30.0, -20.0)]);
        g.pointer_up();

        assert_eq!(
            scene_a.get(id_a).unwrap().position,
            scene_b.get(id_b).unwrap().position
        );
    }

    #[test]
    fn pinch_scales_by_distance_ratio_and_rotates_by_angle_delta() {
        let (mut scene, id) = scene_with_item();
        let mut gestures = GestureController::new();

        // Initial distance 100 along x.
        gestures.pointer_down(
            &mut scene,
            HitTarget::Item(id),
            &[pos2(0.0, 0.0), pos2(100.0, 0.0)],
        );
        // Distance 50, rotated 90°.
        gestures.pointer_move(&mut scene, &[pos2(0.0, 0.0), pos2(0.0, 50.0)]);

        let item = scene.get(id).unwrap();
        assert!((item.scale - 0.5).abs() < 1e-5);
        assert!((item.rotation_deg - 90.0).abs() < 1e-4);
    }

    #[test]
    fn pinch_scale_is_clamped_for_pathological_ratios() {
        let (mut scene, id) = scene_with_item();
        let mut gestures = GestureController::new();

        gestures.pointer_down(
            &mut scene,
            HitTarget::Item(id),
            &[pos2(0.0, 0.0), pos2(10.0, 0.0)],
        );
        gestures.pointer_move(&mut scene, &[pos2(0.0, 0.0), pos2(100000.0, 0.0)]);
        assert_eq!(scene.get(id).unwrap().scale, MAX_ITEM_SCALE);

        gestures.pointer_move(&mut scene, &[pos2(0.0, 0.0), pos2(0.001, 0.0)]);
        assert_eq!(scene.get(id).unwrap().scale, MIN_ITEM_SCALE);
    }

    #[test]
    fn zero_distance_pinch_never_starts() {
        let (mut scene, id) = scene_with_item();
        let mut gestures = GestureController::new();
        gestures.pointer_down(
            &mut scene,
            HitTarget::Item(id),
            &[pos2(5.0, 5.0), pos2(5.0, 5.0)],
        );
        assert!(gestures.is_idle());
    }

    #[test]
    fn locked_item_is_selected_but_not_dragged() {
        let (mut scene, id) = scene_with_item();
        scene.update_item(
            id,
            ItemPatch {
                locked: Some(true),
                ..Default::default()
            },
        );
        scene.set_selected(None);
        let mut gestures = GestureController::new();

        gestures.pointer_down(&mut scene, HitTarget::Item(id), &[pos2(0.0, 0.0)]);
        assert_eq!(scene.selected(), Some(id));
        assert!(gestures.is_idle());

        gestures.pointer_move(&mut scene, &[pos2(40.0, 40.0)]);
        assert_eq!(scene.get(id).unwrap().position, pos2(0.0, 0.0));
    }

    #[test]
    fn background_drag_and_pinch() {
        let mut scene = SceneGraph::new();
        let mut gestures = GestureController::new();

        gestures.pointer_down(&mut scene, HitTarget::Background, &[pos2(10.0, 10.0)]);
        gestures.pointer_move(&mut scene, &[pos2(25.0, 4.0)]);
        assert_eq!(scene.background.pan, egui::vec2(15.0, -6.0));
        gestures.pointer_up();

        gestures.pointer_down(
            &mut scene,
            HitTarget::Background,
            &[pos2(0.0, 0.0), pos2(100.0, 0.0)],
        );
        gestures.pointer_move(&mut scene, &[pos2(0.0, 0.0), pos2(200.0, 0.0)]);
        assert!((scene.background.zoom - 2.0).abs() < 1e-5);
    }

    #[test]
    fn locked_background_input_is_a_no_op_but_clears_selection() {
        let (mut scene, id) = scene_with_item();
        scene.set_selected(Some(id));
        scene.background.locked = true;
        let mut gestures = GestureController::new();

        gestures.pointer_down(&mut scene, HitTarget::Background, &[pos2(0.0, 0.0)]);
        assert!(gestures.is_idle());
        assert_eq!(scene.selected(), None);

        gestures.pointer_move(&mut scene, &[pos2(50.0, 50.0)]);
        assert_eq!(scene.background.pan, egui::vec2(0.0, 0.0));
    }

    #[test]
    fn contact_count_change_freezes_updates_without_corruption() {
        let (mut scene, id) = scene_with_item();
        let mut gestures = GestureController::new();

        gestures.pointer_down(
            &mut scene,
            HitTarget::Item(id),
            &[pos2(0.0, 0.0), pos2(100.0, 0.0)],
        );
        gestures.pointer_move(&mut scene, &[pos2(0.0, 0.0), pos2(50.0, 0.0)]);
        let scale_after = scene.get(id).unwrap().scale;

        // One finger lifts: updates freeze, last state is preserved.
        gestures.pointer_move(&mut scene, &[pos2(0.0, 0.0)]);
        assert_eq!(scene.get(id).unwrap().scale, scale_after);

        // A third finger lands: still frozen.
        gestures.pointer_move(
            &mut scene,
            &[pos2(0.0, 0.0), pos2(10.0, 0.0), pos2(20.0, 20.0)],
        );
        assert_eq!(scene.get(id).unwrap().scale, scale_after);

        gestures.pointer_up();
        assert!(gestures.is_idle());
    }

    #[test]
    fn gesture_target_never_retargets_mid_move() {
        let (mut scene, a) = scene_with_item();
        let b = scene.add_item(
            ItemKind::Sticker(StickerPayload {
                glyph: "⭐".to_string(),
            }),
            pos2(200.0, 200.0),
        );
        let mut gestures = GestureController::new();

        gestures.pointer_down(&mut scene, HitTarget::Item(a), &[pos2(0.0, 0.0)]);
        // The pointer passes over item b's position — a must keep moving.
        gestures.pointer_move(&mut scene, &[pos2(200.0, 200.0)]);
        assert_eq!(scene.get(a).unwrap().position, pos2(200.0, 200.0));
        assert_eq!(scene.get(b).unwrap().position, pos2(200.0, 200.0));
        gestures.pointer_up();
    }
}
