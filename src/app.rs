// ============================================================================
// APPLICATION SHELL — toolbar, panels, modals, worker threads
// ============================================================================
//
// Owns the scene graph and every collaborator.  Long-running work (image
// search, background fetch, capture) runs on worker threads; results come
// back over mpsc channels polled once per frame, so the UI thread never
// blocks on the network or the renderer.

use ab_glyph::FontArc;
use egui::{Align2, Color32, TextureHandle, pos2, vec2};
use image::RgbaImage;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{Receiver, channel};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::compositor::{self, CaptureError, CaptureOutput};
use crate::eraser::EraserTool;
use crate::gesture::GestureController;
use crate::io::{self, SceneHistory};
use crate::scene::{
    BackgroundSlot, BubblePayload, ItemKind, ItemPatch, ReorderDirection, SceneGraph,
    StickerPayload,
};
use crate::search::{self, BackgroundResult};
use crate::stage::{StageAspect, StageView};
use crate::{log_err, log_info, log_warn};

/// Sticker glyph palette offered by the toolbar.
const STICKER_GLYPHS: [&str; 8] = ["⭐", "💖", "✨", "🔥", "😂", "🎀", "🌸", "👑"];

/// Frames to let the frame settle after deselecting, before the capture
/// snapshot is taken.  Keeps selection chrome out of the export.
const CAPTURE_SETTLE_FRAMES: u8 = 2;

/// Uploaded character images are bounded before entering the eraser.
const UPLOAD_MAX_W: u32 = 1024;
const UPLOAD_MAX_H: u32 = 1024;

// ---------------------------------------------------------------------------
//  Transient UI state
// ---------------------------------------------------------------------------

struct EraserModal {
    tool: EraserTool,
    texture: Option<TextureHandle>,
    tex_revision: u64,
    stroking: bool,
}

#[derive(Default)]
struct BackgroundModal {
    open: bool,
    query: String,
    results: Vec<BackgroundResult>,
    searching: bool,
    searched_once: bool,
}

enum LayerCmd {
    Select(Uuid),
    Reorder(Uuid, ReorderDirection),
    ToggleLock(Uuid),
    ToggleVisible(Uuid),
    Delete(Uuid),
}

#[derive(Default)]
struct Workers {
    search_rx: Option<Receiver<Vec<BackgroundResult>>>,
    background_rx: Option<Receiver<(String, Result<RgbaImage, String>)>>,
    capture_rx: Option<Receiver<Result<CaptureOutput, CaptureError>>>,
}

// ---------------------------------------------------------------------------
//  App
// ---------------------------------------------------------------------------

/// Every modal and tool flag lives here, on the one controller that owns
/// it.  The scene graph and gesture controller are the only other stateful
/// parts of the editor.
#[derive(Default)]
struct EditorUiState {
    aspect: StageAspect,
    eraser: Option<EraserModal>,
    background_modal: BackgroundModal,
    sticker_picker: bool,
    confirm_start_over: bool,
    /// Deselect-and-settle countdown; the capture snapshot is taken when it
    /// reaches zero.
    pending_capture: Option<u8>,
    notice: Option<(String, Instant)>,
    /// History length the cached capture thumbnail was decoded at.
    capture_thumb_for: usize,
    capture_thumb: Option<TextureHandle>,
}

impl EditorUiState {
    fn any_modal_open(&self) -> bool {
        self.eraser.is_some() || self.background_modal.open || self.confirm_start_over
    }
}

pub struct GachaStageApp {
    scene: SceneGraph,
    gestures: GestureController,
    stage: StageView,
    /// `None` when no usable font could be found at startup; the item tools
    /// and capture stay disabled, background editing still works.
    font: Option<FontArc>,
    history: SceneHistory,
    ui: EditorUiState,
    workers: Workers,
}

impl GachaStageApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let font = compositor::load_export_font();
        if font.is_none() {
            log_err!("no usable font found; item tools and capture are disabled");
        }
        Self {
            scene: SceneGraph::new(),
            gestures: GestureController::new(),
            stage: StageView::new(font.clone()),
            font,
            history: SceneHistory::with_default_path(),
            ui: EditorUiState::default(),
            workers: Workers::default(),
        }
    }

    fn set_notice(&mut self, text: impl Into<String>) {
        self.ui.notice = Some((text.into(), Instant::now()));
    }

    // -----------------------------------------------------------------------
    //  Worker plumbing
    // -----------------------------------------------------------------------

    fn poll_workers(&mut self) {
        let search_done = self
            .workers
            .search_rx
            .as_ref()
            .and_then(|rx| rx.try_recv().ok());
        if let Some(results) = search_done {
            self.workers.search_rx = None;
            self.ui.background_modal.results = results;
            self.ui.background_modal.searching = false;
            self.ui.background_modal.searched_once = true;
        }

        let fetch_done = self
            .workers
            .background_rx
            .as_ref()
            .and_then(|rx| rx.try_recv().ok());
        if let Some((url, result)) = fetch_done {
            self.workers.background_rx = None;
            // A newer pick may have replaced the loading slot; only the
            // matching fetch is allowed to fill it.
            let loading_url = match &self.scene.background.slot {
                BackgroundSlot::Loading { url } => Some(url.clone()),
                _ => None,
            };
            if loading_url.as_deref() == Some(url.as_str()) {
                match result {
                    Ok(image) => {
                        self.scene.background.set_slot(BackgroundSlot::Ready {
                            image: std::sync::Arc::new(image),
                            label: url,
                        });
                    }
                    Err(e) => {
                        log_warn!("background fetch failed: {}", e);
                        self.scene
                            .background
                            .set_slot(BackgroundSlot::Protected { url });
                    }
                }
            }
        }

        let capture_done = self
            .workers
            .capture_rx
            .as_ref()
            .and_then(|rx| rx.try_recv().ok());
        if let Some(result) = capture_done {
            self.workers.capture_rx = None;
            self.finish_capture(result);
        }
    }

    fn start_search(&mut self, ctx: &egui::Context) {
        let query = self.ui.background_modal.query.clone();
        self.ui.background_modal.searching = true;
        let (tx, rx) = channel();
        self.workers.search_rx = Some(rx);
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let results = search::search_backgrounds(&query);
            let _ = tx.send(results);
            ctx.request_repaint();
        });
    }

    fn pick_background(&mut self, ctx: &egui::Context, result: &BackgroundResult) {
        let url = result.url.clone();
        self.scene
            .background
            .set_slot(BackgroundSlot::Loading { url: url.clone() });
        self.ui.background_modal.open = false;
        let (tx, rx) = channel();
        self.workers.background_rx = Some(rx);
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let fetched = search::fetch_background_image(&url);
            let _ = tx.send((url, fetched));
            ctx.request_repaint();
        });
    }

    // -----------------------------------------------------------------------
    //  Capture pipeline
    // -----------------------------------------------------------------------

    /// Deselect, let the frame settle, then snapshot the scene for a worker
    /// render.  The live scene stays editable while the capture runs.
    fn request_capture(&mut self) {
        if self.workers.capture_rx.is_some() || self.ui.pending_capture.is_some() {
            return;
        }
        self.scene.set_selected(None);
        self.gestures.pointer_up();
        self.ui.pending_capture = Some(CAPTURE_SETTLE_FRAMES);
    }

    fn tick_capture_countdown(&mut self, ctx: &egui::Context) {
        let Some(frames) = self.ui.pending_capture else {
            return;
        };
        if frames > 0 {
            self.ui.pending_capture = Some(frames - 1);
            ctx.request_repaint();
            return;
        }
        self.ui.pending_capture = None;

        let Some(font) = self.font.clone() else {
            self.set_notice("Capture needs a font and none was found");
            return;
        };
        let scene = self.scene.clone();
        let stage_size = self.ui.aspect.scene_size();
        let (tx, rx) = channel();
        self.workers.capture_rx = Some(rx);
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            // A panic in the renderer must not take the app down; it is
            // reported as a failed capture instead.
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                compositor::capture_scene(&scene, stage_size, &font)
            }))
            .unwrap_or_else(|_| Err(CaptureError::Internal("renderer panicked".to_string())));
            let _ = tx.send(result);
            ctx.request_repaint();
        });
    }

    fn finish_capture(&mut self, result: Result<CaptureOutput, CaptureError>) {
        match result {
            Ok(output) => {
                log_info!("captured scene {}x{}", output.width, output.height);
                self.history.push(&output.thumbnail_png);
                match io::save_png_dialog(&io::suggested_scene_filename(), &output.png) {
                    Ok(Some(path)) => {
                        self.set_notice(format!("Saved {}", path.display()));
                    }
                    Ok(None) => self.set_notice("Capture discarded"),
                    Err(e) => {
                        log_err!("save failed: {}", e);
                        self.set_notice(format!("Save failed: {}", e));
                    }
                }
            }
            Err(e) => {
                log_err!("capture failed: {}", e);
                self.set_notice(format!("{}", e));
            }
        }
    }

    // -----------------------------------------------------------------------
    //  Toolbar + panels
    // -----------------------------------------------------------------------

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        // Items cannot be rastered without a font; only background editing
        // stays available then.
        let has_font = self.font.is_some();
        ui.horizontal_wrapped(|ui| {
            if ui
                .add_enabled(has_font, egui::Button::new("➕ Character"))
                .clicked()
            {
                self.open_character_upload();
            }
            if ui.button("🖼 Background").clicked() {
                self.ui.background_modal.open = true;
            }
            if ui
                .add_enabled(has_font, egui::Button::new("💬 Bubble"))
                .clicked()
            {
                self.scene.add_item_centered(
                    ItemKind::DialogueBubble(BubblePayload::default()),
                    self.ui.aspect.scene_size(),
                );
            }
            let sticker = ui.add_enabled(has_font, egui::Button::new("✨ Sticker"));
            if sticker.clicked() {
                self.ui.sticker_picker = !self.ui.sticker_picker;
            }
            if self.ui.sticker_picker {
                for glyph in STICKER_GLYPHS {
                    if ui.button(glyph).clicked() {
                        self.scene.add_item_centered(
                            ItemKind::Sticker(StickerPayload {
                                glyph: glyph.to_string(),
                            }),
                            self.ui.aspect.scene_size(),
                        );
                        self.ui.sticker_picker = false;
                    }
                }
            }

            ui.separator();

            egui::ComboBox::from_id_source("stage_aspect")
                .selected_text(self.ui.aspect.label())
                .show_ui(ui, |ui| {
                    for aspect in StageAspect::ALL {
                        ui.selectable_value(&mut self.ui.aspect, aspect, aspect.label());
                    }
                });

            let lock_label = if self.scene.background.locked {
                "🔒 Background"
            } else {
                "🔓 Background"
            };
            if ui.button(lock_label).clicked() {
                self.scene.background.locked = !self.scene.background.locked;
            }

            ui.separator();

            let capturing = self.ui.pending_capture.is_some() || self.workers.capture_rx.is_some();
            if ui
                .add_enabled(has_font && !capturing, egui::Button::new("📷 Capture"))
                .clicked()
            {
                self.request_capture();
            }
            if capturing {
                ui.spinner();
            }
            if ui.button("🗑 Start over").clicked() {
                self.ui.confirm_start_over = true;
            }
        });
    }

    fn open_character_upload(&mut self) {
        let Some(path) = io::pick_image_file() else {
            return;
        };
        match io::read_image_file(&path) {
            Ok(image) => {
                let mut tool = EraserTool::from_image(image, UPLOAD_MAX_W, UPLOAD_MAX_H);
                tool.auto_detect();
                self.ui.eraser = Some(EraserModal {
                    tool,
                    texture: None,
                    tex_revision: u64::MAX,
                    stroking: false,
                });
            }
            Err(e) => {
                log_err!("character upload failed: {}", e);
                self.set_notice(format!("Could not open image: {}", e));
            }
        }
    }

    fn layer_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Layers");
        ui.separator();

        let mut commands: Vec<LayerCmd> = Vec::new();
        let selected = self.scene.selected();
        // Front-most first, matching what the user sees stacked.
        for item in self.scene.ordered().into_iter().rev() {
            ui.horizontal(|ui| {
                let label = match &item.kind {
                    ItemKind::Sticker(s) => format!("{} {}", item.kind.label(), s.glyph),
                    ItemKind::DialogueBubble(b) => {
                        let mut text: String = b.text.chars().take(12).collect();
                        if text.len() < b.text.len() {
                            text.push('…');
                        }
                        format!("{} \"{}\"", item.kind.label(), text)
                    }
                    ItemKind::Character(_) => item.kind.label().to_string(),
                };
                if ui
                    .selectable_label(selected == Some(item.id), label)
                    .clicked()
                {
                    commands.push(LayerCmd::Select(item.id));
                }
                if ui.small_button("⬆").clicked() {
                    commands.push(LayerCmd::Reorder(item.id, ReorderDirection::Up));
                }
                if ui.small_button("⬇").clicked() {
                    commands.push(LayerCmd::Reorder(item.id, ReorderDirection::Down));
                }
                if ui
                    .small_button(if item.locked { "🔒" } else { "🔓" })
                    .clicked()
                {
                    commands.push(LayerCmd::ToggleLock(item.id));
                }
                if ui
                    .small_button(if item.visible { "👁" } else { "―" })
                    .clicked()
                {
                    commands.push(LayerCmd::ToggleVisible(item.id));
                }
                if ui.small_button("✖").clicked() {
                    commands.push(LayerCmd::Delete(item.id));
                }
            });
        }
        if self.scene.is_empty() {
            ui.weak("Nothing on stage yet.");
        }

        for cmd in commands {
            match cmd {
                LayerCmd::Select(id) => self.scene.set_selected(Some(id)),
                LayerCmd::Reorder(id, dir) => self.scene.reorder(id, dir),
                LayerCmd::ToggleLock(id) => {
                    let locked = self.scene.get(id).map(|i| i.locked).unwrap_or(false);
                    self.scene.update_item(
                        id,
                        ItemPatch {
                            locked: Some(!locked),
                            ..Default::default()
                        },
                    );
                }
                LayerCmd::ToggleVisible(id) => {
                    let visible = self.scene.get(id).map(|i| i.visible).unwrap_or(true);
                    self.scene.update_item(
                        id,
                        ItemPatch {
                            visible: Some(!visible),
                            ..Default::default()
                        },
                    );
                }
                LayerCmd::Delete(id) => self.scene.remove_item(id),
            }
        }

        ui.separator();
        self.property_editor(ui);

        ui.separator();
        ui.heading("Captures");
        if self.history.is_empty() {
            ui.weak("No captures this session.");
        } else {
            ui.label(format!("{} captured", self.history.len()));
            self.latest_capture_preview(ui);
        }
    }

    /// Preview of the newest capture, decoded from the data URI its history
    /// record stores.  Re-decoded only when a capture lands.
    fn latest_capture_preview(&mut self, ui: &mut egui::Ui) {
        let count = self.history.len();
        if self.ui.capture_thumb_for != count {
            self.ui.capture_thumb_for = count;
            self.ui.capture_thumb = None;
            if let Some(record) = self.history.records().last() {
                match decode_thumbnail(&record.thumbnail) {
                    Ok(img) => {
                        self.ui.capture_thumb = Some(ui.ctx().load_texture(
                            "capture_thumbnail",
                            img,
                            egui::TextureOptions::LINEAR,
                        ));
                    }
                    Err(e) => log_warn!("capture thumbnail decode failed: {}", e),
                }
            }
        }
        if let Some(tex) = &self.ui.capture_thumb {
            let [w, h] = tex.size();
            let width = ui.available_width().min(w as f32);
            let size = vec2(width, width * h as f32 / w as f32);
            let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
            ui.painter().image(
                tex.id(),
                rect,
                egui::Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                Color32::WHITE,
            );
        }
    }

    /// Edit panel for the selected item's payload.
    fn property_editor(&mut self, ui: &mut egui::Ui) {
        let Some(id) = self.scene.selected() else {
            ui.weak("Select an item to edit it.");
            return;
        };
        // Clone the editable payload so widget edits can write back through
        // the store without a standing borrow of the item.
        enum Editable {
            Bubble(BubblePayload),
            Character { flip_h: bool },
            Sticker,
        }
        let editable = match self.scene.get(id).map(|i| &i.kind) {
            Some(ItemKind::DialogueBubble(p)) => Editable::Bubble(p.clone()),
            Some(ItemKind::Character(p)) => Editable::Character { flip_h: p.flip_h },
            Some(ItemKind::Sticker(_)) => Editable::Sticker,
            None => return,
        };

        match editable {
            Editable::Bubble(payload) => {
                let mut text = payload.text.clone();
                let mut speaker = payload.speaker.clone().unwrap_or_default();
                let mut accent = payload.accent;
                let shape = payload.shape;
                let tail = payload.tail_angle_deg;

                ui.heading("Bubble");
                if ui.text_edit_multiline(&mut text).changed() {
                    self.scene.update_bubble(id, |b| b.text = text.clone());
                }
                ui.horizontal(|ui| {
                    ui.label("Speaker");
                    if ui.text_edit_singleline(&mut speaker).changed() {
                        let value = speaker.trim().to_string();
                        self.scene.update_bubble(id, |b| {
                            b.speaker = (!value.is_empty()).then(|| value.clone());
                        });
                    }
                });
                ui.horizontal(|ui| {
                    ui.label("Accent");
                    if ui.color_edit_button_srgba(&mut accent).changed() {
                        self.scene.update_bubble(id, |b| b.accent = accent);
                    }
                    if ui.button(shape.label()).clicked() {
                        self.scene.update_bubble(id, |b| b.shape = b.shape.toggled());
                    }
                    if ui.button("↻ Tail").clicked() {
                        self.scene.update_bubble(id, |b| {
                            b.tail_angle_deg = crate::geometry::wrap_deg(tail + 45.0);
                        });
                    }
                });
            }
            Editable::Character { flip_h } => {
                ui.heading("Character");
                if ui
                    .button(if flip_h { "Facing left" } else { "Facing right" })
                    .clicked()
                {
                    self.scene.update_character(id, |c| c.flip_h = !c.flip_h);
                }
            }
            Editable::Sticker => {
                ui.heading("Sticker");
                ui.weak("Drag to move, pinch to resize and rotate.");
            }
        }
    }

    // -----------------------------------------------------------------------
    //  Modals
    // -----------------------------------------------------------------------

    fn background_window(&mut self, ctx: &egui::Context) {
        if !self.ui.background_modal.open {
            return;
        }
        let mut open = true;
        let mut search_clicked = false;
        let mut from_file = false;
        let mut picked: Option<BackgroundResult> = None;

        egui::Window::new("Background search")
            .open(&mut open)
            .collapsible(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    let edit = ui.text_edit_singleline(&mut self.ui.background_modal.query);
                    let submitted =
                        edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("🔍 Search").clicked() || submitted {
                        search_clicked = true;
                    }
                    if self.ui.background_modal.searching {
                        ui.spinner();
                    }
                    if ui.button("📁 From file…").clicked() {
                        from_file = true;
                    }
                });
                ui.separator();
                if self.ui.background_modal.results.is_empty() {
                    if self.ui.background_modal.searched_once && !self.ui.background_modal.searching {
                        ui.weak("No results.");
                    } else {
                        ui.weak("Search for a background, e.g. \"cherry blossom park\".");
                    }
                } else {
                    egui::ScrollArea::vertical().max_height(300.0).show(ui, |ui| {
                        for result in &self.ui.background_modal.results {
                            if ui.button(&result.source_label).clicked() {
                                picked = Some(result.clone());
                            }
                        }
                    });
                }
            });

        self.ui.background_modal.open = open;
        if search_clicked && !self.ui.background_modal.searching {
            self.start_search(ctx);
        }
        if from_file {
            self.pick_background_file();
        }
        if let Some(result) = picked {
            self.pick_background(ctx, &result);
        }
    }

    /// Local image straight into the background slot, no network.
    fn pick_background_file(&mut self) {
        let Some(path) = io::pick_image_file() else {
            return;
        };
        match io::read_image_file(&path) {
            Ok(image) => {
                let label = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Local image".to_string());
                self.scene.background.set_slot(BackgroundSlot::Ready {
                    image: std::sync::Arc::new(image),
                    label,
                });
                self.ui.background_modal.open = false;
            }
            Err(e) => {
                log_err!("background upload failed: {}", e);
                self.set_notice(format!("Could not open image: {}", e));
            }
        }
    }

    fn eraser_window(&mut self, ctx: &egui::Context) {
        let Some(modal) = &mut self.ui.eraser else { return };
        let mut open = true;
        let mut apply = false;

        egui::Window::new("Magic eraser")
            .open(&mut open)
            .collapsible(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.selectable_value(&mut modal.tool.mode, crate::eraser::EraserMode::Magic, "Magic wand");
                    ui.selectable_value(&mut modal.tool.mode, crate::eraser::EraserMode::Brush, "Brush");
                    ui.separator();
                    if ui
                        .add_enabled(modal.tool.can_undo(), egui::Button::new("↩ Undo"))
                        .clicked()
                    {
                        modal.tool.undo();
                    }
                });
                match modal.tool.mode {
                    crate::eraser::EraserMode::Magic => {
                        ui.add(
                            egui::Slider::new(&mut modal.tool.tolerance, 1.0..=100.0)
                                .text("Tolerance"),
                        );
                    }
                    crate::eraser::EraserMode::Brush => {
                        ui.add(
                            egui::Slider::new(&mut modal.tool.brush_radius, 1.0..=100.0)
                                .text("Brush size"),
                        );
                    }
                }
                ui.separator();

                eraser_canvas(ui, modal);

                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("✔ Add to stage").clicked() {
                        apply = true;
                    }
                    ui.weak("Click the backdrop to erase it.");
                });
            });

        if apply && let Some(modal) = self.ui.eraser.take() {
            let image = std::sync::Arc::new(modal.tool.into_image());
            self.scene.add_item_centered(
                ItemKind::Character(crate::scene::CharacterPayload {
                    image,
                    flip_h: false,
                }),
                self.ui.aspect.scene_size(),
            );
        } else if !open {
            self.ui.eraser = None;
        }
    }

    fn start_over_window(&mut self, ctx: &egui::Context) {
        if !self.ui.confirm_start_over {
            return;
        }
        egui::Window::new("Start over?")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("This clears every item and the background.");
                ui.horizontal(|ui| {
                    if ui.button("Clear everything").clicked() {
                        self.scene.clear_all();
                        self.gestures.pointer_up();
                        self.ui.confirm_start_over = false;
                    }
                    if ui.button("Keep my scene").clicked() {
                        self.ui.confirm_start_over = false;
                    }
                });
            });
    }

    fn notice_toast(&mut self, ctx: &egui::Context) {
        let Some((text, shown_at)) = self.ui.notice.clone() else {
            return;
        };
        if shown_at.elapsed() > Duration::from_secs(4) {
            self.ui.notice = None;
            return;
        }
        egui::Area::new(egui::Id::new("notice_toast"))
            .anchor(Align2::CENTER_BOTTOM, [0.0, -24.0])
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.label(text);
                });
            });
        ctx.request_repaint_after(Duration::from_millis(250));
    }
}

// ---------------------------------------------------------------------------
//  Eraser canvas widget
// ---------------------------------------------------------------------------

/// Interactive preview inside the eraser modal: clicks flood-fill, drags
/// paint erase strokes, both in buffer pixel coordinates.
fn eraser_canvas(ui: &mut egui::Ui, modal: &mut EraserModal) {
    let tool = &mut modal.tool;
    let (bw, bh) = (tool.width() as f32, tool.height() as f32);
    let max = vec2(480.0, 360.0);
    let fit = (max.x / bw).min(max.y / bh).min(1.0);
    let size = vec2(bw * fit, bh * fit);

    let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click_and_drag());

    if modal.tex_revision != tool.revision {
        let img = tool.buffer();
        let pixels: Vec<Color32> = img
            .as_raw()
            .chunks_exact(4)
            .map(|px| Color32::from_rgba_unmultiplied(px[0], px[1], px[2], px[3]))
            .collect();
        let color_image = egui::ColorImage {
            size: [img.width() as usize, img.height() as usize],
            pixels,
        };
        modal.texture =
            Some(ui.ctx()
                .load_texture("eraser_preview", color_image, egui::TextureOptions::LINEAR));
        modal.tex_revision = tool.revision;
    }

    // Checkerboard behind the preview so erased regions read as holes.
    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, 0.0, Color32::from_gray(60));
    if let Some(tex) = &modal.texture {
        painter.image(
            tex.id(),
            rect,
            egui::Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
            Color32::WHITE,
        );
    }

    let to_buffer = |p: egui::Pos2| ((p - rect.min) / fit).to_pos2();
    match tool.mode {
        crate::eraser::EraserMode::Magic => {
            if response.clicked()
                && let Some(p) = response.interact_pointer_pos()
            {
                let b = to_buffer(p);
                tool.flood_fill(b.x as i32, b.y as i32);
            }
        }
        crate::eraser::EraserMode::Brush => {
            if response.drag_started()
                && let Some(p) = response.interact_pointer_pos()
            {
                let b = to_buffer(p);
                tool.stroke_begin(b.x, b.y);
                modal.stroking = true;
            } else if response.dragged()
                && modal.stroking
                && let Some(p) = response.interact_pointer_pos()
            {
                let b = to_buffer(p);
                tool.stroke_move(b.x, b.y);
            }
            if modal.stroking && response.drag_released() {
                tool.stroke_end();
                modal.stroking = false;
            }
        }
    }
}

/// PNG data URI → egui image, for the capture history preview.
fn decode_thumbnail(uri: &str) -> Result<egui::ColorImage, String> {
    let bytes = io::decode_data_uri(uri)?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| format!("bad thumbnail: {}", e))?
        .into_rgba8();
    let pixels = img
        .as_raw()
        .chunks_exact(4)
        .map(|px| Color32::from_rgba_unmultiplied(px[0], px[1], px[2], px[3]))
        .collect();
    Ok(egui::ColorImage {
        size: [img.width() as usize, img.height() as usize],
        pixels,
    })
}

// ---------------------------------------------------------------------------
//  eframe glue
// ---------------------------------------------------------------------------

impl eframe::App for GachaStageApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_workers();
        self.tick_capture_countdown(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.toolbar(ui);
        });

        egui::SidePanel::right("layers")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.layer_panel(ui);
                });
            });

        let input_enabled = !self.ui.any_modal_open();
        egui::CentralPanel::default().show(ctx, |ui| {
            self.stage
                .show(ui, &mut self.scene, &mut self.gestures, self.ui.aspect, input_enabled);
        });

        self.background_window(ctx);
        self.eraser_window(ctx);
        self.start_over_window(ctx);
        self.notice_toast(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modal_flags_gate_stage_input() {
        let mut state = EditorUiState::default();
        assert!(!state.any_modal_open());
        state.confirm_start_over = true;
        assert!(state.any_modal_open());
        state.confirm_start_over = false;
        state.background_modal.open = true;
        assert!(state.any_modal_open());
    }

    #[test]
    fn stored_thumbnails_decode_back_to_images() {
        let img = RgbaImage::from_pixel(6, 4, image::Rgba([1, 2, 3, 255]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        let mut history = SceneHistory::in_memory();
        let record = history.push(&png).clone();

        let decoded = decode_thumbnail(&record.thumbnail).unwrap();
        assert_eq!(decoded.size, [6, 4]);
        assert_eq!(decoded.pixels[0], Color32::from_rgb(1, 2, 3));

        assert!(decode_thumbnail("not a data uri").is_err());
    }
}
