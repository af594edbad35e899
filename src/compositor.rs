// ============================================================================
// COMPOSITOR / CAPTURE PIPELINE — scene graph → final pixel buffer
// ============================================================================
//
// The export projection: renders the same scene graph the stage shows, at a
// higher resolution multiplier, with no selection decorations.  Item rasters
// produced here are also what the stage uploads as textures, so the export
// is pixel-faithful to the live view by construction.
//
// Capture is a read-only operation over the scene graph; every failure is
// reported through `CaptureError` and leaves the scene untouched.

use ab_glyph::{Font, FontArc, ScaleFont, point};
use egui::{Pos2, Vec2, pos2, vec2};
use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use std::fmt;

use crate::bubble::{self, BubbleLayout, TailGeometry};
use crate::geometry::ItemTransform;
use crate::log_warn;
use crate::scene::{
    BackgroundState, BubblePayload, ItemKind, SceneGraph, SceneItem, StickerPayload,
};

/// Export resolution multiplier over the stage presentation size.
pub const EXPORT_SCALE: f32 = 2.0;
/// Supersampling factor for generated item rasters (bubbles, stickers).
pub const RASTER_SS: f32 = 2.0;
/// Characters are displayed no taller than this many scene units.
pub const CHARACTER_MAX_HEIGHT: f32 = 256.0;
/// Sticker glyph box, scene units.
pub const STICKER_SIZE: f32 = 96.0;
/// Exported scene-history thumbnail width, pixels.
pub const THUMBNAIL_WIDTH: u32 = 200;

// ---------------------------------------------------------------------------
//  Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum CaptureError {
    /// The stage region had a degenerate size.
    Degenerate(String),
    /// PNG encoding failed.
    Encode(String),
    /// A panic inside the render was caught at the capture boundary.
    Internal(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Degenerate(msg) => write!(f, "capture skipped: {}", msg),
            CaptureError::Encode(msg) => write!(f, "could not encode image: {}", msg),
            CaptureError::Internal(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Finished capture, ready for the download and scene-history collaborators.
pub struct CaptureOutput {
    pub png: Vec<u8>,
    pub thumbnail_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

// ---------------------------------------------------------------------------
//  Export font
// ---------------------------------------------------------------------------

/// Load the font used for bubble text and stickers: best system sans-serif
/// match, falling back to the UI's embedded font so export always works.
pub fn load_export_font() -> Option<FontArc> {
    if let Some(font) = load_system_sans() {
        return Some(font);
    }
    // Fallback: pull bytes out of egui's default embedded fonts.
    let defs = egui::FontDefinitions::default();
    for name in ["Ubuntu-Light", "Hack", "NotoEmoji-Regular"] {
        if let Some(data) = defs.font_data.get(name)
            && let Ok(font) = FontArc::try_from_vec(data.font.to_vec())
        {
            return Some(font);
        }
    }
    log_warn!("no usable export font found");
    None
}

fn load_system_sans() -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::Properties;
    use font_kit::source::SystemSource;

    let handle = SystemSource::new()
        .select_best_match(&[FamilyName::SansSerif], &Properties::new())
        .ok()?;
    let font = handle.load().ok()?;
    let data = font.copy_font_data()?;
    FontArc::try_from_vec((*data).clone()).ok()
}

// ---------------------------------------------------------------------------
//  Text layout / rasterization (multiline, kerned)
// ---------------------------------------------------------------------------

/// Measure a multiline text block: (max line width, total height).
/// Trailing whitespace is trimmed per line so bubbles collapse to exactly
/// fit their content.
pub fn measure_text(font: &FontArc, text: &str, size: f32) -> Vec2 {
    let scaled = font.as_scaled(size);
    let line_height = scaled.height();
    let mut max_w = 0.0f32;
    let mut lines = 0u32;
    for line in text.lines() {
        max_w = max_w.max(line_width(font, line.trim_end(), size));
        lines += 1;
    }
    vec2(max_w, lines.max(1) as f32 * line_height)
}

fn line_width(font: &FontArc, line: &str, size: f32) -> f32 {
    let scaled = font.as_scaled(size);
    let mut w = 0.0f32;
    let mut prev = None;
    for ch in line.chars() {
        let id = font.glyph_id(ch);
        if let Some(p) = prev {
            w += scaled.kern(p, id);
        }
        w += scaled.h_advance(id);
        prev = Some(id);
    }
    w
}

/// Draw a multiline text block, each line horizontally centered on
/// `center.x`, the whole block vertically centered on `center.y`.
pub fn draw_text_centered(
    target: &mut RgbaImage,
    font: &FontArc,
    text: &str,
    size: f32,
    center: Pos2,
    color: [u8; 4],
) {
    let scaled = font.as_scaled(size);
    let line_height = scaled.height();
    let lines: Vec<&str> = text.lines().collect();
    let block_h = lines.len().max(1) as f32 * line_height;
    let mut baseline_y = center.y - block_h * 0.5 + scaled.ascent();
    for line in &lines {
        let line = line.trim_end();
        let w = line_width(font, line, size);
        draw_line(target, font, line, size, pos2(center.x - w * 0.5, baseline_y), color);
        baseline_y += line_height;
    }
}

/// Draw one line of text with its baseline-left origin at `origin`.
pub fn draw_line(
    target: &mut RgbaImage,
    font: &FontArc,
    line: &str,
    size: f32,
    origin: Pos2,
    color: [u8; 4],
) {
    let scaled = font.as_scaled(size);
    let mut cursor = origin.x;
    let mut prev = None;
    for ch in line.chars() {
        let id = font.glyph_id(ch);
        if let Some(p) = prev {
            cursor += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(size, point(cursor, origin.y));
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let x = bounds.min.x as i32 + gx as i32;
                let y = bounds.min.y as i32 + gy as i32;
                if x >= 0 && y >= 0 && (x as u32) < target.width() && (y as u32) < target.height() {
                    let src = [
                        color[0],
                        color[1],
                        color[2],
                        (color[3] as f32 * coverage.clamp(0.0, 1.0)) as u8,
                    ];
                    blend_over(target.get_pixel_mut(x as u32, y as u32), src);
                }
            });
        }
        cursor += scaled.h_advance(id);
        prev = Some(id);
    }
}

/// True when no character in the text has an outline in this font — the
/// usual case for color emoji with an outline-only font.
pub fn has_no_outlines(font: &FontArc, text: &str) -> bool {
    text.chars().all(|ch| {
        let id = font.glyph_id(ch);
        id.0 == 0
            || font
                .outline_glyph(id.with_scale_and_position(32.0, point(0.0, 0.0)))
                .is_none()
    })
}

// ---------------------------------------------------------------------------
//  Item rasters — shared by the stage textures and the export sampler
// ---------------------------------------------------------------------------

/// A rendered item: pixel raster plus its size in scene units at scale 1.
pub struct ItemRaster {
    pub pixels: RgbaImage,
    pub logical_size: Vec2,
}

/// Render an item's raster.  Characters reuse their source pixels (capped
/// to the display height, aspect preserved, flip applied); bubbles and
/// stickers are generated at `RASTER_SS`× supersampling.
pub fn render_item_raster(item: &SceneItem, font: &FontArc) -> ItemRaster {
    match &item.kind {
        ItemKind::Character(payload) => {
            let img = if payload.flip_h {
                imageops::flip_horizontal(payload.image.as_ref())
            } else {
                payload.image.as_ref().clone()
            };
            let (w, h) = (img.width().max(1) as f32, img.height().max(1) as f32);
            let fit = (CHARACTER_MAX_HEIGHT / h).min(1.0);
            ItemRaster {
                pixels: img,
                logical_size: vec2(w * fit, h * fit),
            }
        }
        ItemKind::DialogueBubble(payload) => render_bubble_raster(payload, font),
        ItemKind::Sticker(payload) => render_sticker_raster(payload, font),
    }
}

fn render_bubble_raster(payload: &BubblePayload, font: &FontArc) -> ItemRaster {
    let text_size = measure_text(font, &payload.text, bubble::FONT_SIZE);
    let layout = bubble::layout(payload.shape, text_size, payload.tail_angle_deg);
    let ss = RASTER_SS;
    let w = (layout.raster_size.x * ss).ceil().max(1.0) as u32;
    let h = (layout.raster_size.y * ss).ceil().max(1.0) as u32;
    let mut img = RgbaImage::new(w, h);

    let accent = payload.accent.to_array();
    let white = [255, 255, 255, 255];

    paint_tail(&mut img, &layout, ss, accent, white);
    paint_body(&mut img, &layout, ss, accent, white);

    // Text, centered in the body.
    let text_color = [accent[0], accent[1], accent[2], 255];
    let body_center = layout.body.center();
    draw_text_centered(
        &mut img,
        font,
        &payload.text,
        bubble::FONT_SIZE * ss,
        pos2(body_center.x * ss, body_center.y * ss),
        text_color,
    );

    // Optional speaker label above the body.
    if let Some(speaker) = payload.speaker.as_deref()
        && !speaker.trim().is_empty()
    {
        let scaled_size = bubble::SPEAKER_FONT_SIZE * ss;
        let origin = pos2(
            (layout.body.min.x + 10.0) * ss,
            (layout.body.min.y - 8.0) * ss,
        );
        draw_line(&mut img, font, speaker.trim(), scaled_size, origin, text_color);
    }

    ItemRaster {
        pixels: img,
        logical_size: layout.raster_size,
    }
}

/// Tail first, so the body fill painted after it hides the shared border.
fn paint_tail(img: &mut RgbaImage, layout: &BubbleLayout, ss: f32, accent: [u8; 4], white: [u8; 4]) {
    match &layout.tail {
        TailGeometry::Triangle(tri) => {
            // Inner triangle shrunk toward the centroid gives the border.
            let centroid = pos2(
                (tri[0].x + tri[1].x + tri[2].x) / 3.0,
                (tri[0].y + tri[1].y + tri[2].y) / 3.0,
            );
            let inner: [Pos2; 3] = [
                lerp_pos(tri[0], centroid, 0.22),
                lerp_pos(tri[1], centroid, 0.22),
                lerp_pos(tri[2], centroid, 0.22),
            ];
            let (w, h) = (img.width(), img.height());
            for y in 0..h {
                for x in 0..w {
                    let p = pos2((x as f32 + 0.5) / ss, (y as f32 + 0.5) / ss);
                    if bubble::triangle_contains(tri, p) {
                        let color = if bubble::triangle_contains(&inner, p) {
                            white
                        } else {
                            accent
                        };
                        blend_over(img.get_pixel_mut(x, y), color);
                    }
                }
            }
        }
        TailGeometry::Dots(dots) => {
            for (center, radius) in dots {
                paint_circle(img, *center, *radius, ss, accent, white);
            }
        }
    }
}

fn paint_body(img: &mut RgbaImage, layout: &BubbleLayout, ss: f32, accent: [u8; 4], white: [u8; 4]) {
    let (w, h) = (img.width(), img.height());
    let border = bubble::BORDER_WIDTH;
    for y in 0..h {
        for x in 0..w {
            let p = pos2((x as f32 + 0.5) / ss, (y as f32 + 0.5) / ss);
            let d = bubble::sdf_body(p, layout);
            // Anti-aliased: border band around d=0, white fill inside.
            let aa = 1.0 / ss;
            if d < border * 0.5 + aa {
                let (color, alpha) = if d > border * 0.5 - aa {
                    (accent, smooth_cov(border * 0.5 - d, aa))
                } else if d > -border * 0.5 {
                    (accent, 1.0)
                } else if d > -border * 0.5 - aa {
                    // Blend border into fill.
                    (mix(accent, white, smooth_cov(-border * 0.5 - d, aa)), 1.0)
                } else {
                    (white, 1.0)
                };
                let src = [color[0], color[1], color[2], (255.0 * alpha) as u8];
                if src[3] > 0 {
                    let dst = img.get_pixel_mut(x, y);
                    if alpha >= 1.0 {
                        *dst = Rgba(src);
                    } else {
                        blend_over(dst, src);
                    }
                }
            }
        }
    }
}

fn paint_circle(
    img: &mut RgbaImage,
    center: Pos2,
    radius: f32,
    ss: f32,
    accent: [u8; 4],
    white: [u8; 4],
) {
    let border = 2.0;
    let x0 = (((center.x - radius - 1.0) * ss).floor().max(0.0)) as u32;
    let y0 = (((center.y - radius - 1.0) * ss).floor().max(0.0)) as u32;
    let x1 = ((((center.x + radius + 1.0) * ss).ceil()) as u32).min(img.width());
    let y1 = ((((center.y + radius + 1.0) * ss).ceil()) as u32).min(img.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let p = pos2((x as f32 + 0.5) / ss, (y as f32 + 0.5) / ss);
            let d = (p - center).length() - radius;
            if d < 0.0 {
                let color = if d > -border { accent } else { white };
                *img.get_pixel_mut(x, y) = Rgba(color);
            }
        }
    }
}

fn render_sticker_raster(payload: &StickerPayload, font: &FontArc) -> ItemRaster {
    let ss = RASTER_SS;
    let logical = vec2(STICKER_SIZE, STICKER_SIZE);
    let px = (STICKER_SIZE * ss) as u32;
    let mut img = RgbaImage::new(px, px);

    if has_no_outlines(font, &payload.glyph) {
        // Outline-only fonts can't draw color emoji — fall back to a
        // rounded badge carrying the glyph's first char code as a hue.
        let hue_seed = payload.glyph.chars().next().map(|c| c as u32).unwrap_or(0);
        let color = badge_color(hue_seed);
        let center = pos2(STICKER_SIZE * 0.5, STICKER_SIZE * 0.5);
        paint_circle(&mut img, center, STICKER_SIZE * 0.42, ss, [255, 255, 255, 255], color);
    } else {
        draw_text_centered(
            &mut img,
            font,
            &payload.glyph,
            STICKER_SIZE * 0.8 * ss,
            pos2(STICKER_SIZE * 0.5 * ss, STICKER_SIZE * 0.5 * ss),
            [45, 27, 46, 255],
        );
    }

    ItemRaster {
        pixels: img,
        logical_size: logical,
    }
}

fn badge_color(seed: u32) -> [u8; 4] {
    const PALETTE: [[u8; 4]; 4] = [
        [255, 143, 171, 255],
        [186, 157, 255, 255],
        [134, 200, 255, 255],
        [255, 196, 120, 255],
    ];
    PALETTE[(seed as usize) % PALETTE.len()]
}

// ---------------------------------------------------------------------------
//  Scene rendering
// ---------------------------------------------------------------------------

/// Render the export projection of the scene into a pixel buffer of
/// `stage_size * multiplier`.  Transparent where no background is set; a
/// protected background is skipped while the rest of the scene renders.
pub fn render_scene(scene: &SceneGraph, stage_size: Vec2, multiplier: f32, font: &FontArc) -> RgbaImage {
    let w = (stage_size.x * multiplier).round().max(1.0) as u32;
    let h = (stage_size.y * multiplier).round().max(1.0) as u32;
    let mut canvas = RgbaImage::new(w, h);

    draw_background(&mut canvas, &scene.background, stage_size, multiplier);

    for item in scene.ordered() {
        if !item.visible {
            continue;
        }
        let raster = render_item_raster(item, font);
        draw_item(&mut canvas, &raster, item.transform(), multiplier);
    }

    canvas
}

/// Background drawn cover-fit (fills the stage, overflow cropped) with the
/// user's pan/zoom applied about the stage center.
fn draw_background(canvas: &mut RgbaImage, bg: &BackgroundState, stage_size: Vec2, multiplier: f32) {
    let Some(image) = bg.image() else {
        return; // empty or protected: transparent, caller shows placeholder
    };
    let (iw, ih) = (image.width() as f32, image.height() as f32);
    if iw < 1.0 || ih < 1.0 {
        return;
    }
    let cover = (stage_size.x / iw).max(stage_size.y / ih);
    let scale = cover * bg.zoom * multiplier;
    let w = canvas.width();
    let cx = canvas.width() as f32 * 0.5 + bg.pan.x * multiplier;
    let cy = canvas.height() as f32 * 0.5 + bg.pan.y * multiplier;
    let src = image.clone();

    canvas
        .par_chunks_exact_mut(w as usize * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..w as usize {
                let sx = (x as f32 + 0.5 - cx) / scale + iw * 0.5;
                let sy = (y as f32 + 0.5 - cy) / scale + ih * 0.5;
                if let Some(px) = sample_bilinear(&src, sx, sy) {
                    let out = &mut row[x * 4..x * 4 + 4];
                    out.copy_from_slice(&px);
                }
            }
        });
}

/// Composite one item raster through its affine transform (translate, then
/// scale, then rotate about the item center), sampled bilinearly.
fn draw_item(canvas: &mut RgbaImage, raster: &ItemRaster, transform: ItemTransform, multiplier: f32) {
    let size = raster.logical_size;
    if size.x < 1.0 || size.y < 1.0 {
        return;
    }
    let bounds = transform.bounds(size);
    let w = canvas.width();
    let h = canvas.height();
    let x0 = ((bounds.min.x * multiplier).floor().max(0.0)) as u32;
    let y0 = ((bounds.min.y * multiplier).floor().max(0.0)) as u32;
    let x1 = (((bounds.max.x * multiplier).ceil()) as i64).clamp(0, w as i64) as u32;
    let y1 = (((bounds.max.y * multiplier).ceil()) as i64).clamp(0, h as i64) as u32;
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    // Raster pixels per logical unit.
    let density = vec2(
        raster.pixels.width() as f32 / size.x,
        raster.pixels.height() as f32 / size.y,
    );
    let stride = w as usize * 4;
    let buf: &mut [u8] = canvas;
    let rows = &mut buf[(y0 as usize * stride)..(y1 as usize * stride)];

    rows.par_chunks_exact_mut(stride).enumerate().for_each(|(i, row)| {
        let y = y0 + i as u32;
        for x in x0..x1 {
            let scene = pos2(
                (x as f32 + 0.5) / multiplier,
                (y as f32 + 0.5) / multiplier,
            );
            let local = transform.scene_to_local(scene);
            if local.x.abs() > size.x * 0.5 || local.y.abs() > size.y * 0.5 {
                continue;
            }
            let rx = (local.x + size.x * 0.5) * density.x - 0.5;
            let ry = (local.y + size.y * 0.5) * density.y - 0.5;
            if let Some(px) = sample_bilinear(&raster.pixels, rx, ry)
                && px[3] > 0
            {
                let off = x as usize * 4;
                let dst = &mut row[off..off + 4];
                let mut pixel = Rgba([dst[0], dst[1], dst[2], dst[3]]);
                blend_over(&mut pixel, px);
                dst.copy_from_slice(&pixel.0);
            }
        }
    });
}

// ---------------------------------------------------------------------------
//  Capture entry point
// ---------------------------------------------------------------------------

/// Produce the final PNG plus a scene-history thumbnail.  The caller is
/// responsible for the deselect-and-settle ordering before invoking this;
/// the scene is only read here.
pub fn capture_scene(
    scene: &SceneGraph,
    stage_size: Vec2,
    font: &FontArc,
) -> Result<CaptureOutput, CaptureError> {
    if stage_size.x < 1.0 || stage_size.y < 1.0 {
        return Err(CaptureError::Degenerate(format!(
            "stage size {}x{}",
            stage_size.x, stage_size.y
        )));
    }

    let canvas = render_scene(scene, stage_size, EXPORT_SCALE, font);
    let png = encode_png(&canvas)?;

    let thumb_h =
        (canvas.height() as u64 * THUMBNAIL_WIDTH as u64 / canvas.width().max(1) as u64).max(1);
    let thumb = imageops::thumbnail(&canvas, THUMBNAIL_WIDTH, thumb_h as u32);
    let thumbnail_png = encode_png(&thumb)?;

    Ok(CaptureOutput {
        width: canvas.width(),
        height: canvas.height(),
        png,
        thumbnail_png,
    })
}

/// Encode an RGBA buffer as PNG bytes (alpha preserved).
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    use image::ImageEncoder;
    use image::codecs::png::PngEncoder;
    let mut out = Vec::new();
    let encoder = PngEncoder::new(&mut out);
    encoder
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ColorType::Rgba8,
        )
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
//  Pixel helpers
// ---------------------------------------------------------------------------

/// Bilinear sample with edge clamp; `None` when fully outside the image.
fn sample_bilinear(img: &RgbaImage, x: f32, y: f32) -> Option<[u8; 4]> {
    let w = img.width() as i64;
    let h = img.height() as i64;
    if x < -1.0 || y < -1.0 || x > w as f32 || y > h as f32 {
        return None;
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let pixel = |px: i64, py: i64| -> [f32; 4] {
        let cx = px.clamp(0, w - 1) as u32;
        let cy = py.clamp(0, h - 1) as u32;
        let p = img.get_pixel(cx, cy);
        [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
    };

    let tl = pixel(x0, y0);
    let tr = pixel(x0 + 1, y0);
    let bl = pixel(x0, y0 + 1);
    let br = pixel(x0 + 1, y0 + 1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = tl[c] + (tr[c] - tl[c]) * fx;
        let bottom = bl[c] + (br[c] - bl[c]) * fx;
        out[c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

/// Standard non-premultiplied alpha-over.
fn blend_over(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let s = src[c] as f32;
        let d = dst[c] as f32;
        dst[c] = ((s * sa + d * da * (1.0 - sa)) / out_a).round() as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

fn smooth_cov(d: f32, aa: f32) -> f32 {
    ((d / (2.0 * aa)) + 0.5).clamp(0.0, 1.0)
}

fn mix(a: [u8; 4], b: [u8; 4], t: f32) -> [u8; 4] {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t).round() as u8;
    }
    out
}

fn lerp_pos(a: Pos2, b: Pos2, t: f32) -> Pos2 {
    pos2(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{BackgroundSlot, CharacterPayload, ItemPatch};
    use std::sync::Arc;

    fn test_font() -> FontArc {
        load_export_font().expect("a font must be available for tests")
    }

    fn red_square(size: u32) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(size, size, Rgba([255, 0, 0, 255])))
    }

    fn character(img: Arc<RgbaImage>) -> ItemKind {
        ItemKind::Character(CharacterPayload {
            image: img,
            flip_h: false,
        })
    }

    #[test]
    fn empty_scene_exports_transparent_pixels() {
        let scene = SceneGraph::new();
        let font = test_font();
        let img = render_scene(&scene, vec2(100.0, 100.0), 2.0, &font);
        assert_eq!((img.width(), img.height()), (200, 200));
        assert!(img.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn item_is_drawn_at_its_position_at_export_scale() {
        let mut scene = SceneGraph::new();
        scene.add_item(character(red_square(40)), pos2(50.0, 50.0));
        let font = test_font();
        let img = render_scene(&scene, vec2(100.0, 100.0), 2.0, &font);
        // Scene (50,50) → export (100,100).
        let p = img.get_pixel(100, 100);
        assert_eq!(p[0], 255);
        assert_eq!(p[3], 255);
        // Outside the 40-unit square nothing is drawn.
        assert_eq!(img.get_pixel(10, 10)[3], 0);
    }

    #[test]
    fn hidden_items_are_excluded_locked_items_are_included() {
        let mut scene = SceneGraph::new();
        let hidden = scene.add_item(character(red_square(40)), pos2(25.0, 25.0));
        let locked = scene.add_item(character(red_square(40)), pos2(75.0, 75.0));
        scene.update_item(
            hidden,
            ItemPatch {
                visible: Some(false),
                ..Default::default()
            },
        );
        scene.update_item(
            locked,
            ItemPatch {
                locked: Some(true),
                ..Default::default()
            },
        );
        let font = test_font();
        let img = render_scene(&scene, vec2(100.0, 100.0), 1.0, &font);
        assert_eq!(img.get_pixel(25, 25)[3], 0, "hidden item must not export");
        assert_eq!(img.get_pixel(75, 75)[3], 255, "locked item still exports");
    }

    #[test]
    fn stack_order_decides_which_pixel_wins() {
        let mut scene = SceneGraph::new();
        let bottom = scene.add_item(character(red_square(40)), pos2(50.0, 50.0));
        let top = scene.add_item(
            ItemKind::Character(CharacterPayload {
                image: Arc::new(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 255, 255]))),
                flip_h: false,
            }),
            pos2(50.0, 50.0),
        );
        let font = test_font();
        let img = render_scene(&scene, vec2(100.0, 100.0), 1.0, &font);
        assert_eq!(img.get_pixel(50, 50)[2], 255, "top item wins");

        // Swap and re-render: bottom now wins.
        scene.reorder(bottom, crate::scene::ReorderDirection::Up);
        let _ = top;
        let img = render_scene(&scene, vec2(100.0, 100.0), 1.0, &font);
        assert_eq!(img.get_pixel(50, 50)[0], 255, "reordered item wins");
    }

    #[test]
    fn protected_background_skips_pixels_but_capture_succeeds() {
        let mut scene = SceneGraph::new();
        scene.background.set_slot(BackgroundSlot::Protected {
            url: "http://example/locked.jpg".to_string(),
        });
        scene.add_item(character(red_square(40)), pos2(50.0, 50.0));
        let font = test_font();
        let out = capture_scene(&scene, vec2(100.0, 100.0), &font).expect("capture succeeds");
        let decoded = image::load_from_memory(&out.png).unwrap().into_rgba8();
        assert_eq!(decoded.get_pixel(10, 10)[3], 0, "no background pixels");
        assert_eq!(decoded.get_pixel(100, 100)[3], 255, "item still present");
    }

    #[test]
    fn background_cover_fills_the_whole_stage() {
        let mut scene = SceneGraph::new();
        scene.background.set_slot(BackgroundSlot::Ready {
            image: Arc::new(RgbaImage::from_pixel(50, 10, Rgba([0, 200, 0, 255]))),
            label: "green".to_string(),
        });
        let font = test_font();
        let img = render_scene(&scene, vec2(100.0, 100.0), 1.0, &font);
        // Cover-fit: every stage pixel gets background even for a wide image.
        assert!(img.pixels().all(|p| p[3] == 255 && p[1] == 200));
    }

    #[test]
    fn capture_is_read_only_over_the_scene() {
        let mut scene = SceneGraph::new();
        let id = scene.add_item(character(red_square(30)), pos2(40.0, 60.0));
        scene.background.pan = vec2(3.0, -2.0);
        scene.background.zoom = 1.5;
        let font = test_font();

        let _ = capture_scene(&scene, vec2(100.0, 100.0), &font).unwrap();

        assert_eq!(scene.len(), 1);
        let item = scene.get(id).unwrap();
        assert_eq!(item.position, pos2(40.0, 60.0));
        assert_eq!(item.scale, 1.0);
        assert_eq!(scene.background.pan, vec2(3.0, -2.0));
        assert_eq!(scene.background.zoom, 1.5);
    }

    #[test]
    fn capture_output_decodes_with_expected_dimensions() {
        let mut scene = SceneGraph::new();
        scene.add_item(character(red_square(20)), pos2(30.0, 30.0));
        let font = test_font();
        let out = capture_scene(&scene, vec2(90.0, 160.0), &font).unwrap();
        assert_eq!((out.width, out.height), (180, 320));
        let decoded = image::load_from_memory(&out.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (180, 320));
        let thumb = image::load_from_memory(&out.thumbnail_png).unwrap();
        assert_eq!(thumb.width(), THUMBNAIL_WIDTH);
    }

    #[test]
    fn degenerate_stage_size_is_an_error_not_a_panic() {
        let scene = SceneGraph::new();
        let font = test_font();
        assert!(matches!(
            capture_scene(&scene, vec2(0.0, 100.0), &font),
            Err(CaptureError::Degenerate(_))
        ));
    }

    #[test]
    fn bubble_raster_has_body_and_border() {
        let payload = BubblePayload::default();
        let font = test_font();
        let raster = render_bubble_raster(&payload, &font);
        assert!(raster.logical_size.x >= bubble::MIN_BODY.x);
        // Center of the body is white fill.
        let cx = raster.pixels.width() / 2;
        let cy = raster.pixels.height() / 2;
        let outside = raster.pixels.get_pixel(0, 0);
        assert_eq!(outside[3], 0, "corners stay transparent");
        let center = raster.pixels.get_pixel(cx, cy);
        assert_eq!(center[3], 255, "body center is opaque");
    }

    #[test]
    fn character_raster_caps_display_height() {
        let item_kind = character(Arc::new(RgbaImage::from_pixel(
            100,
            1000,
            Rgba([1, 2, 3, 255]),
        )));
        let mut scene = SceneGraph::new();
        let id = scene.add_item(item_kind, pos2(0.0, 0.0));
        let font = test_font();
        let raster = render_item_raster(scene.get(id).unwrap(), &font);
        assert_eq!(raster.logical_size.y, CHARACTER_MAX_HEIGHT);
        assert!((raster.logical_size.x - 25.6).abs() < 0.01);
    }
}
