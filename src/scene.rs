// ============================================================================
// SCENE GRAPH — placed items + background state, single source of truth
// ============================================================================
//
// Both the live stage projection and the capture pipeline read this store;
// only the gesture controller, the property editors and the explicit store
// operations below mutate it.

use egui::{Color32, Pos2, Vec2, pos2, vec2};
use image::RgbaImage;
use std::sync::Arc;
use uuid::Uuid;

use crate::geometry::{ItemTransform, clamp_item_scale};
use crate::log_warn;

/// Logical stage height in scene units.  The stage projection maps screen
/// pixels to this space; item positions are stored in it so window resizes
/// never move items.
pub const STAGE_UNITS: f32 = 720.0;

// ---------------------------------------------------------------------------
//  Item kinds (tagged variants — a sticker can never carry bubble fields)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BubbleShape {
    #[default]
    Speech,
    Thought,
}

impl BubbleShape {
    pub fn label(&self) -> &'static str {
        match self {
            BubbleShape::Speech => "Speech",
            BubbleShape::Thought => "Thought",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            BubbleShape::Speech => BubbleShape::Thought,
            BubbleShape::Thought => BubbleShape::Speech,
        }
    }
}

/// A cut-out character raster, already processed by the eraser tool.
#[derive(Clone)]
pub struct CharacterPayload {
    pub image: Arc<RgbaImage>,
    pub flip_h: bool,
}

#[derive(Clone)]
pub struct BubblePayload {
    pub text: String,
    /// Optional speaker-name label drawn above the bubble body.
    pub speaker: Option<String>,
    pub accent: Color32,
    /// Direction the tail points, 0–360, independent of item rotation.
    pub tail_angle_deg: f32,
    pub shape: BubbleShape,
}

impl Default for BubblePayload {
    fn default() -> Self {
        Self {
            text: "Olá!".to_string(),
            speaker: None,
            accent: Color32::from_rgb(0x6d, 0x59, 0x7a),
            tail_angle_deg: 90.0,
            shape: BubbleShape::Speech,
        }
    }
}

/// A symbolic glyph sticker (emoji) — no raster asset.
#[derive(Clone)]
pub struct StickerPayload {
    pub glyph: String,
}

#[derive(Clone)]
pub enum ItemKind {
    Character(CharacterPayload),
    DialogueBubble(BubblePayload),
    Sticker(StickerPayload),
}

impl ItemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Character(_) => "Character",
            ItemKind::DialogueBubble(_) => "Bubble",
            ItemKind::Sticker(_) => "Sticker",
        }
    }
}

// ---------------------------------------------------------------------------
//  Scene item
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SceneItem {
    pub id: Uuid,
    pub kind: ItemKind,
    /// Item center in scene units.
    pub position: Pos2,
    pub scale: f32,
    /// Unconstrained domain; wrapped mod 360 only for display.
    pub rotation_deg: f32,
    /// Back-to-front draw order, unique across all items.
    pub stack_order: i32,
    /// Locked items ignore gesture input but stay visible and exported.
    pub locked: bool,
    /// Hidden items are kept in the store but excluded from render/export.
    pub visible: bool,
    /// Bumped on payload edits so raster caches can invalidate.
    pub revision: u64,
}

impl SceneItem {
    pub fn transform(&self) -> ItemTransform {
        ItemTransform {
            position: self.position,
            scale: self.scale,
            rotation_deg: self.rotation_deg,
        }
    }
}

/// Partial update for `update_item` — `None` fields are left untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct ItemPatch {
    pub position: Option<Pos2>,
    pub scale: Option<f32>,
    pub rotation_deg: Option<f32>,
    pub locked: Option<bool>,
    pub visible: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReorderDirection {
    /// Towards the front (drawn later).
    Up,
    /// Towards the back.
    Down,
}

// ---------------------------------------------------------------------------
//  Background state
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub enum BackgroundSlot {
    #[default]
    Empty,
    /// A remote pick is being fetched on a worker thread.
    Loading { url: String },
    Ready {
        image: Arc<RgbaImage>,
        label: String,
    },
    /// The image could not be fetched/decoded — shown as a "protected
    /// image" placeholder, never an error dialog.
    Protected { url: String },
}

#[derive(Clone)]
pub struct BackgroundState {
    pub slot: BackgroundSlot,
    /// Pan offset in scene units, on top of the cover-fit placement.
    pub pan: Vec2,
    pub zoom: f32,
    /// Background transform is only mutable while unlocked.
    pub locked: bool,
}

impl Default for BackgroundState {
    fn default() -> Self {
        Self {
            slot: BackgroundSlot::Empty,
            pan: vec2(0.0, 0.0),
            zoom: 1.0,
            locked: false,
        }
    }
}

impl BackgroundState {
    /// Replace the image reference.  The pan/zoom transform always resets
    /// with a new reference.
    pub fn set_slot(&mut self, slot: BackgroundSlot) {
        self.slot = slot;
        self.pan = vec2(0.0, 0.0);
        self.zoom = 1.0;
    }

    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        match &self.slot {
            BackgroundSlot::Ready { image, .. } => Some(image),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
//  Scene graph / item store
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct SceneGraph {
    items: Vec<SceneItem>,
    selected: Option<Uuid>,
    pub background: BackgroundState,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- queries ----------------------------------------------------------

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn get(&self, id: Uuid) -> Option<&SceneItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut SceneItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Items in back-to-front draw order.
    pub fn ordered(&self) -> Vec<&SceneItem> {
        let mut refs: Vec<&SceneItem> = self.items.iter().collect();
        refs.sort_by_key(|i| i.stack_order);
        refs
    }

    // ---- mutations --------------------------------------------------------

    /// Insert a new item with the default transform at the top of the
    /// stack; it becomes the selection.
    pub fn add_item(&mut self, kind: ItemKind, position: Pos2) -> Uuid {
        let id = Uuid::new_v4();
        let top = self.items.iter().map(|i| i.stack_order).max().unwrap_or(0);
        self.items.push(SceneItem {
            id,
            kind,
            position,
            scale: 1.0,
            rotation_deg: 0.0,
            stack_order: top + 1,
            locked: false,
            visible: true,
            revision: 0,
        });
        self.selected = Some(id);
        id
    }

    /// Convenience: add at the stage center.
    pub fn add_item_centered(&mut self, kind: ItemKind, stage_size: Vec2) -> Uuid {
        self.add_item(kind, pos2(stage_size.x * 0.5, stage_size.y * 0.5))
    }

    /// Merge a partial update into an existing item.  An unknown id is a
    /// logged no-op, not an error — a stale reference can race a removal.
    pub fn update_item(&mut self, id: Uuid, patch: ItemPatch) {
        let Some(item) = self.get_mut(id) else {
            log_warn!("update_item: unknown item id {}", id);
            return;
        };
        if let Some(p) = patch.position {
            item.position = p;
        }
        if let Some(s) = patch.scale {
            item.scale = clamp_item_scale(s);
        }
        if let Some(r) = patch.rotation_deg {
            item.rotation_deg = r;
        }
        if let Some(l) = patch.locked {
            item.locked = l;
        }
        if let Some(v) = patch.visible {
            item.visible = v;
        }
    }

    /// Transform update coming from gesture input.  Locked items are
    /// immutable to gestures, so this silently refuses for them; direct
    /// edits (unlock, delete, reorder) go through the other operations.
    pub fn apply_gesture_transform(&mut self, id: Uuid, t: ItemTransform) {
        let Some(item) = self.get_mut(id) else {
            log_warn!("apply_gesture_transform: unknown item id {}", id);
            return;
        };
        if item.locked {
            return;
        }
        item.position = t.position;
        item.scale = clamp_item_scale(t.scale);
        item.rotation_deg = t.rotation_deg;
    }

    /// Edit a bubble payload in place.  No-op (with diagnostic) when the id
    /// is unknown or not a bubble.
    pub fn update_bubble(&mut self, id: Uuid, edit: impl FnOnce(&mut BubblePayload)) {
        match self.get_mut(id) {
            Some(item) => {
                if let ItemKind::DialogueBubble(payload) = &mut item.kind {
                    edit(payload);
                    item.revision += 1;
                } else {
                    log_warn!("update_bubble: item {} is not a bubble", id);
                }
            }
            None => log_warn!("update_bubble: unknown item id {}", id),
        }
    }

    /// Edit a character payload in place (e.g. toggle the horizontal flip).
    pub fn update_character(&mut self, id: Uuid, edit: impl FnOnce(&mut CharacterPayload)) {
        match self.get_mut(id) {
            Some(item) => {
                if let ItemKind::Character(payload) = &mut item.kind {
                    edit(payload);
                    item.revision += 1;
                } else {
                    log_warn!("update_character: item {} is not a character", id);
                }
            }
            None => log_warn!("update_character: unknown item id {}", id),
        }
    }

    /// Remove an item; clears the selection if it pointed at it.
    pub fn remove_item(&mut self, id: Uuid) {
        let before = self.items.len();
        self.items.retain(|i| i.id != id);
        if self.items.len() == before {
            log_warn!("remove_item: unknown item id {}", id);
            return;
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
    }

    /// Select an item (must exist) or clear the selection.
    pub fn set_selected(&mut self, id: Option<Uuid>) {
        match id {
            Some(id) if self.get(id).is_none() => {
                log_warn!("set_selected: unknown item id {}", id);
                self.selected = None;
            }
            other => self.selected = other,
        }
    }

    /// Swap stack order with the neighbor in the requested direction.
    /// No-op at the top/bottom boundary.
    pub fn reorder(&mut self, id: Uuid, direction: ReorderDirection) {
        let Some(order) = self.get(id).map(|i| i.stack_order) else {
            log_warn!("reorder: unknown item id {}", id);
            return;
        };
        // Nearest neighbor above/below in stack order.
        let neighbor = match direction {
            ReorderDirection::Up => self
                .items
                .iter()
                .filter(|i| i.stack_order > order)
                .min_by_key(|i| i.stack_order)
                .map(|i| i.id),
            ReorderDirection::Down => self
                .items
                .iter()
                .filter(|i| i.stack_order < order)
                .max_by_key(|i| i.stack_order)
                .map(|i| i.id),
        };
        let Some(neighbor_id) = neighbor else {
            return; // already at the boundary
        };
        let neighbor_order = self.get(neighbor_id).map(|i| i.stack_order).unwrap_or(order);
        if let Some(item) = self.get_mut(id) {
            item.stack_order = neighbor_order;
        }
        if let Some(item) = self.get_mut(neighbor_id) {
            item.stack_order = order;
        }
    }

    /// "Start over": one atomic state replacement — items, selection,
    /// background image and background transform all reset together so the
    /// render layer never observes a half-cleared scene.
    pub fn clear_all(&mut self) {
        *self = SceneGraph::default();
    }
}
