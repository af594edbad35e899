// ============================================================================
// STAGE — live presentation projection of the scene graph
// ============================================================================
//
// Draws the same item rasters the compositor exports, uploaded as GPU
// textures and placed as rotated quads, so the live view and the captured
// PNG always agree on where things are.  Also owns raw input: touch points
// and the mouse pointer are folded into one contact list, mapped into scene
// units and fed to the gesture controller.

use egui::{Color32, Event, Pos2, Rect, Sense, Stroke, TextureHandle, TouchId, TouchPhase, Vec2, pos2, vec2};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use ab_glyph::FontArc;

use crate::compositor::{self, ItemRaster};
use crate::gesture::{GestureController, HitTarget};
use crate::scene::{BackgroundSlot, SceneGraph, STAGE_UNITS};

/// Stage aspect ratio presets.  The scene-unit space has a fixed height of
/// `STAGE_UNITS`; width follows the ratio, so switching ratios reframes the
/// stage without moving items vertically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StageAspect {
    /// Phone portrait, the native framing.
    #[default]
    Portrait,
    Square,
    Landscape,
}

impl StageAspect {
    pub const ALL: [StageAspect; 3] = [
        StageAspect::Portrait,
        StageAspect::Square,
        StageAspect::Landscape,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StageAspect::Portrait => "9:16",
            StageAspect::Square => "1:1",
            StageAspect::Landscape => "16:9",
        }
    }

    /// Width over height.
    pub fn ratio(&self) -> f32 {
        match self {
            StageAspect::Portrait => 9.0 / 16.0,
            StageAspect::Square => 1.0,
            StageAspect::Landscape => 16.0 / 9.0,
        }
    }

    /// Stage size in scene units.
    pub fn scene_size(&self) -> Vec2 {
        vec2(STAGE_UNITS * self.ratio(), STAGE_UNITS)
    }
}

// ---------------------------------------------------------------------------
//  Screen <-> scene mapping
// ---------------------------------------------------------------------------

/// The letterboxed stage rect on screen plus the pixels-per-scene-unit
/// factor.  Everything the stage draws or hit-tests goes through this.
#[derive(Clone, Copy, Debug)]
pub struct StageMapping {
    pub rect: Rect,
    pub px_per_unit: f32,
    pub scene_size: Vec2,
}

impl StageMapping {
    /// Largest stage rect of the given aspect that fits `avail`, centered.
    pub fn fit(avail: Rect, aspect: StageAspect) -> Self {
        let scene_size = aspect.scene_size();
        let px_per_unit = (avail.width() / scene_size.x)
            .min(avail.height() / scene_size.y)
            .max(1e-3);
        let size = scene_size * px_per_unit;
        let rect = Rect::from_center_size(avail.center(), size);
        Self {
            rect,
            px_per_unit,
            scene_size,
        }
    }

    pub fn screen_to_scene(&self, screen: Pos2) -> Pos2 {
        ((screen - self.rect.min) / self.px_per_unit).to_pos2()
    }

    pub fn scene_to_screen(&self, scene: Pos2) -> Pos2 {
        self.rect.min + scene.to_vec2() * self.px_per_unit
    }
}

// ---------------------------------------------------------------------------
//  Stage view
// ---------------------------------------------------------------------------

struct CachedItem {
    revision: u64,
    raster: ItemRaster,
    texture: Option<TextureHandle>,
}

pub struct StageView {
    /// Item rasters + uploaded textures, invalidated by the item revision.
    cache: HashMap<Uuid, CachedItem>,
    /// Uploaded background, keyed by the image allocation it came from.
    bg_texture: Option<(usize, TextureHandle)>,
    /// Live touch points by platform touch id, screen coordinates.
    touches: BTreeMap<TouchId, Pos2>,
    prev_contacts: usize,
    /// Target locked in at gesture start; re-snapshot against it when the
    /// finger count changes mid-gesture.
    active_target: Option<HitTarget>,
    /// Item rasters need a font for bubble and sticker text; `None` leaves
    /// the item cache empty (the shell disables the item tools then).
    font: Option<FontArc>,
}

impl StageView {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            cache: HashMap::new(),
            bg_texture: None,
            touches: BTreeMap::new(),
            prev_contacts: 0,
            active_target: None,
            font,
        }
    }

    /// Draw the stage into the available space and route input.  Returns the
    /// mapping so the caller can place overlay controls next to on-stage
    /// geometry.
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        scene: &mut SceneGraph,
        gestures: &mut GestureController,
        aspect: StageAspect,
        input_enabled: bool,
    ) -> StageMapping {
        let avail = ui.available_rect_before_wrap();
        let mapping = StageMapping::fit(avail, aspect);
        let response = ui.allocate_rect(avail, Sense::click_and_drag());
        let painter = ui.painter().with_clip_rect(mapping.rect);

        self.refresh_caches(ui.ctx(), scene);

        // Stage backdrop behind the (possibly transparent) scene.
        painter.rect_filled(mapping.rect, 0.0, Color32::from_gray(28));
        self.draw_background(&painter, scene, &mapping);
        self.draw_items(&painter, scene, &mapping);
        self.draw_selection(&painter, scene, &mapping);

        if input_enabled {
            self.route_input(ui, &response, scene, gestures, &mapping);
        } else {
            // A modal is open: drop any in-flight gesture.
            self.touches.clear();
            self.prev_contacts = 0;
            self.active_target = None;
            gestures.pointer_up();
        }

        mapping
    }

    /// Scene-unit size of an item at scale 1, from the cached raster.
    pub fn item_logical_size(&self, id: Uuid) -> Option<Vec2> {
        self.cache.get(&id).map(|c| c.raster.logical_size)
    }

    // -----------------------------------------------------------------------
    //  Input
    // -----------------------------------------------------------------------

    fn route_input(
        &mut self,
        ui: &egui::Ui,
        response: &egui::Response,
        scene: &mut SceneGraph,
        gestures: &mut GestureController,
        mapping: &StageMapping,
    ) {
        let events = ui.input(|i| i.events.clone());
        for event in &events {
            if let Event::Touch { id, phase, pos, .. } = event {
                match phase {
                    TouchPhase::Start | TouchPhase::Move => {
                        self.touches.insert(*id, *pos);
                    }
                    TouchPhase::End | TouchPhase::Cancel => {
                        self.touches.remove(id);
                    }
                }
            }
        }

        // Fold touches and the mouse pointer into one screen contact list.
        let mut contacts: Vec<Pos2> = if self.touches.is_empty() {
            let down = ui.input(|i| i.pointer.primary_down());
            match ui.input(|i| i.pointer.interact_pos()) {
                Some(p) if down => vec![p],
                _ => Vec::new(),
            }
        } else {
            let mut pts: Vec<(TouchId, Pos2)> =
                self.touches.iter().map(|(id, p)| (*id, *p)).collect();
            pts.sort_by_key(|(id, _)| id.0);
            pts.into_iter().map(|(_, p)| p).collect()
        };

        // A gesture may only start inside the stage; once active it keeps
        // receiving moves even when the pointer leaves the rect.
        let starting = self.prev_contacts == 0 && !contacts.is_empty();
        if starting && (!mapping.rect.contains(contacts[0]) || !response.hovered()) {
            contacts.clear();
        }

        let scene_contacts: Vec<Pos2> = contacts
            .iter()
            .map(|p| mapping.screen_to_scene(*p))
            .collect();

        let released = ui.input(|i| i.pointer.any_released());
        match (self.prev_contacts, scene_contacts.len()) {
            (0, 0) => {
                if released {
                    gestures.pointer_up();
                }
            }
            (0, _) => {
                let hit = self.hit_test(scene, scene_contacts[0]);
                self.active_target = Some(hit);
                gestures.pointer_down(scene, hit, &scene_contacts);
            }
            (_, 0) => {
                gestures.pointer_up();
                self.active_target = None;
            }
            (prev, now) if prev != now => {
                // Finger landed or lifted mid-gesture: re-snapshot against
                // the same target so the remaining fingers keep working.
                if let Some(hit) = self.active_target {
                    gestures.pointer_down(scene, hit, &scene_contacts);
                }
            }
            _ => gestures.pointer_move(scene, &scene_contacts),
        }
        self.prev_contacts = scene_contacts.len();
    }

    /// Top-down hit test in scene units.  Locked items still hit (they can
    /// be selected, just not moved); hidden items never do.  Empty canvas
    /// stands for the background.
    fn hit_test(&self, scene: &SceneGraph, point: Pos2) -> HitTarget {
        for item in scene.ordered().into_iter().rev() {
            if !item.visible {
                continue;
            }
            let Some(size) = self.item_logical_size(item.id) else {
                continue;
            };
            if item.transform().contains(point, size) {
                return HitTarget::Item(item.id);
            }
        }
        HitTarget::Background
    }

    // -----------------------------------------------------------------------
    //  Caches
    // -----------------------------------------------------------------------

    fn refresh_caches(&mut self, ctx: &egui::Context, scene: &SceneGraph) {
        // Drop entries for removed items.
        let live: Vec<Uuid> = scene.ordered().iter().map(|i| i.id).collect();
        self.cache.retain(|id, _| live.contains(id));

        for item in scene.ordered() {
            let stale = self
                .cache
                .get(&item.id)
                .map(|c| c.revision != item.revision)
                .unwrap_or(true);
            if stale && let Some(font) = &self.font {
                let raster = compositor::render_item_raster(item, font);
                self.cache.insert(
                    item.id,
                    CachedItem {
                        revision: item.revision,
                        raster,
                        texture: None,
                    },
                );
            }
        }

        // Upload missing textures in a second pass.
        for item in scene.ordered() {
            if let Some(cached) = self.cache.get_mut(&item.id)
                && cached.texture.is_none()
            {
                let name = format!("item_{}", item.id);
                cached.texture = Some(upload_texture(ctx, &name, &cached.raster.pixels));
            }
        }

        match scene.background.image() {
            Some(image) => {
                let key = std::sync::Arc::as_ptr(image) as usize;
                let stale = self.bg_texture.as_ref().map(|(k, _)| *k != key).unwrap_or(true);
                if stale {
                    let tex = upload_texture(ctx, "stage_background", image);
                    self.bg_texture = Some((key, tex));
                }
            }
            None => self.bg_texture = None,
        }
    }

    // -----------------------------------------------------------------------
    //  Drawing
    // -----------------------------------------------------------------------

    fn draw_background(&self, painter: &egui::Painter, scene: &SceneGraph, mapping: &StageMapping) {
        let bg = &scene.background;
        match &bg.slot {
            BackgroundSlot::Ready { image, .. } => {
                let Some((_, tex)) = &self.bg_texture else {
                    return;
                };
                // Cover-fit with pan/zoom about the stage center, the same
                // placement the export sampler computes.
                let (iw, ih) = (image.width() as f32, image.height() as f32);
                let cover = (mapping.scene_size.x / iw).max(mapping.scene_size.y / ih);
                let scale = cover * bg.zoom;
                let center = pos2(
                    mapping.scene_size.x * 0.5 + bg.pan.x,
                    mapping.scene_size.y * 0.5 + bg.pan.y,
                );
                let half = vec2(iw, ih) * scale * 0.5;
                let quad = [
                    mapping.scene_to_screen(center - half),
                    mapping.scene_to_screen(pos2(center.x + half.x, center.y - half.y)),
                    mapping.scene_to_screen(center + half),
                    mapping.scene_to_screen(pos2(center.x - half.x, center.y + half.y)),
                ];
                draw_textured_quad(painter, tex, quad);
            }
            BackgroundSlot::Empty => {
                painter.text(
                    mapping.rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Pick a background to get started",
                    egui::FontId::proportional(15.0),
                    Color32::from_gray(120),
                );
            }
            BackgroundSlot::Loading { .. } => {
                painter.text(
                    mapping.rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Loading background…",
                    egui::FontId::proportional(15.0),
                    Color32::from_gray(150),
                );
            }
            BackgroundSlot::Protected { .. } => {
                painter.rect_filled(mapping.rect, 0.0, Color32::from_gray(40));
                painter.text(
                    mapping.rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "🔒 Protected image — it will not appear in captures",
                    egui::FontId::proportional(14.0),
                    Color32::from_gray(170),
                );
            }
        }
    }

    fn draw_items(&self, painter: &egui::Painter, scene: &SceneGraph, mapping: &StageMapping) {
        for item in scene.ordered() {
            if !item.visible {
                continue;
            }
            let Some(cached) = self.cache.get(&item.id) else {
                continue;
            };
            let Some(tex) = &cached.texture else { continue };
            let corners = item.transform().corners(cached.raster.logical_size);
            let quad = corners.map(|c| mapping.scene_to_screen(c));
            draw_textured_quad(painter, tex, quad);
        }
    }

    /// Dashed ring around the selected item's rotated bounds.
    fn draw_selection(&self, painter: &egui::Painter, scene: &SceneGraph, mapping: &StageMapping) {
        let Some(id) = scene.selected() else { return };
        let Some(item) = scene.get(id) else { return };
        let Some(cached) = self.cache.get(&id) else {
            return;
        };
        if !item.visible {
            return;
        }
        let corners = item.transform().corners(cached.raster.logical_size);
        let mut ring: Vec<Pos2> = corners.iter().map(|c| mapping.scene_to_screen(*c)).collect();
        ring.push(ring[0]);
        let color = if item.locked {
            Color32::from_rgb(0xb0, 0xb0, 0xb0)
        } else {
            Color32::from_rgb(0x6d, 0x59, 0x7a)
        };
        painter.extend(egui::Shape::dashed_line(
            &ring,
            Stroke::new(2.0, color),
            6.0,
            4.0,
        ));
    }
}

/// Upload an RGBA raster as a linearly-filtered egui texture.
fn upload_texture(ctx: &egui::Context, name: &str, img: &image::RgbaImage) -> TextureHandle {
    let pixels: Vec<Color32> = img
        .as_raw()
        .par_chunks_exact(4)
        .map(|px| Color32::from_rgba_unmultiplied(px[0], px[1], px[2], px[3]))
        .collect();
    let color_image = egui::ColorImage {
        size: [img.width() as usize, img.height() as usize],
        pixels,
    };
    ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR)
}

/// Textured quad (two triangles) through four screen corners in TL, TR, BR,
/// BL order.  The GPU handles rotation; no per-pixel CPU work.
fn draw_textured_quad(painter: &egui::Painter, tex: &TextureHandle, quad: [Pos2; 4]) {
    let white = Color32::WHITE;
    let mut mesh = egui::Mesh::with_texture(tex.id());
    let uvs = [
        pos2(0.0, 0.0),
        pos2(1.0, 0.0),
        pos2(1.0, 1.0),
        pos2(0.0, 1.0),
    ];
    for (pos, uv) in quad.into_iter().zip(uvs) {
        mesh.vertices.push(egui::epaint::Vertex {
            pos,
            uv,
            color: white,
        });
    }
    mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
    painter.add(egui::Shape::mesh(mesh));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_letterboxes_and_round_trips() {
        let avail = Rect::from_min_size(pos2(100.0, 50.0), vec2(800.0, 600.0));
        let m = StageMapping::fit(avail, StageAspect::Portrait);
        // Portrait stage inside a landscape viewport: height-bound.
        assert!((m.rect.height() - 600.0).abs() < 0.5);
        assert!(m.rect.width() < 800.0);
        assert!(avail.contains_rect(m.rect));

        let scene = pos2(123.0, 456.0);
        let back = m.screen_to_scene(m.scene_to_screen(scene));
        assert!((back - scene).length() < 1e-3);
    }

    #[test]
    fn mapping_scene_size_follows_aspect() {
        assert_eq!(StageAspect::Square.scene_size(), vec2(STAGE_UNITS, STAGE_UNITS));
        let p = StageAspect::Portrait.scene_size();
        assert!((p.x / p.y - 9.0 / 16.0).abs() < 1e-4);
        assert_eq!(p.y, STAGE_UNITS);
    }

    #[test]
    fn window_resize_does_not_move_scene_positions() {
        let small = StageMapping::fit(
            Rect::from_min_size(pos2(0.0, 0.0), vec2(400.0, 400.0)),
            StageAspect::Square,
        );
        let large = StageMapping::fit(
            Rect::from_min_size(pos2(0.0, 0.0), vec2(1200.0, 1200.0)),
            StageAspect::Square,
        );
        // The same screen-relative spot maps to the same scene point.
        let spot = |r: Rect| pos2(r.min.x + r.width() * 0.25, r.min.y + r.height() * 0.75);
        let scene_a = small.screen_to_scene(spot(small.rect));
        let scene_b = large.screen_to_scene(spot(large.rect));
        assert!((scene_a - scene_b).length() < 1e-2);
    }

    #[test]
    fn missing_font_leaves_the_item_cache_empty() {
        use crate::scene::{ItemKind, StickerPayload};

        let ctx = egui::Context::default();
        let mut view = StageView::new(None);
        let mut scene = SceneGraph::new();
        let id = scene.add_item(
            ItemKind::Sticker(StickerPayload {
                glyph: "⭐".to_string(),
            }),
            pos2(100.0, 100.0),
        );
        view.refresh_caches(&ctx, &scene);
        assert!(view.item_logical_size(id).is_none());
    }
}
