// ============================================================================
// MAGIC ERASER — flood-fill segmentation + manual brush, bounded history
// ============================================================================
//
// Operates on one raster in isolation: the uploaded character photo is
// loaded into an owned RGBA buffer, the background is erased to
// transparency (auto flood fill and/or manual brush), and the result is
// committed as a character item's source image.  The buffer is never
// shared with the scene graph until explicitly committed.

use image::{Rgba, RgbaImage, imageops};
use std::collections::VecDeque;

use crate::log_info;

/// Bounded snapshot history, including the initial loaded image.
pub const HISTORY_CAP: usize = 10;

/// Tolerance and brush radius share the 1–100 UI scale.
pub const DEFAULT_TOLERANCE: f32 = 40.0;
pub const DEFAULT_BRUSH_RADIUS: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EraserMode {
    /// Tap to flood-fill a contiguous near-uniform region to transparency.
    #[default]
    Magic,
    /// Hold and move to erase a circle under the pointer.
    Brush,
}

pub struct EraserTool {
    pub mode: EraserMode,
    /// Max Euclidean RGB distance from the seed color, 1–100.
    pub tolerance: f32,
    pub brush_radius: f32,

    buffer: RgbaImage,
    /// `history[0]` is always the loaded image; overflow drops the oldest
    /// *edit* snapshot so undo can always walk back to the original.
    history: Vec<RgbaImage>,
    /// Mid-stroke state for the brush: last stamp position.
    stroke_last: Option<(f32, f32)>,
    stroke_dirty: bool,
    /// Bumped on every visible change so the UI texture can re-upload.
    pub revision: u64,
}

impl EraserTool {
    /// Load an image into the tool, scaled to fit within `max_w`×`max_h`
    /// (aspect preserved, never upscaled).  Auto-detect is the caller's
    /// first move, matching the tool's open-and-clean flow.
    pub fn from_image(src: RgbaImage, max_w: u32, max_h: u32) -> Self {
        let (w, h) = (src.width().max(1), src.height().max(1));
        let fit = (max_w as f32 / w as f32)
            .min(max_h as f32 / h as f32)
            .min(1.0);
        let buffer = if fit < 1.0 {
            let nw = ((w as f32 * fit).floor() as u32).max(1);
            let nh = ((h as f32 * fit).floor() as u32).max(1);
            imageops::resize(&src, nw, nh, imageops::FilterType::Triangle)
        } else {
            src
        };
        log_info!(
            "eraser: loaded {}x{} buffer (history cap {})",
            buffer.width(),
            buffer.height(),
            HISTORY_CAP
        );
        Self {
            mode: EraserMode::Magic,
            tolerance: DEFAULT_TOLERANCE,
            brush_radius: DEFAULT_BRUSH_RADIUS,
            history: vec![buffer.clone()],
            buffer,
            stroke_last: None,
            stroke_dirty: false,
            revision: 0,
        }
    }

    /// Decode raw upload bytes and load them.
    pub fn from_bytes(bytes: &[u8], max_w: u32, max_h: u32) -> Result<Self, String> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| format!("could not decode image: {}", e))?
            .into_rgba8();
        Ok(Self::from_image(img, max_w, max_h))
    }

    pub fn buffer(&self) -> &RgbaImage {
        &self.buffer
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// Commit: hand the processed buffer over and tear the tool down.
    pub fn into_image(self) -> RgbaImage {
        self.buffer
    }

    // ---- auto / flood-fill mode -------------------------------------------

    /// Auto-detect the background: flood fill from the top-left corner.
    pub fn auto_detect(&mut self) {
        self.flood_fill(0, 0);
    }

    /// 4-connected flood fill from a seed pixel.  A neighbor joins the fill
    /// when its Euclidean RGB distance from the seed color is within the
    /// tolerance, or when it is already fully transparent (so the fill
    /// propagates through holes left by earlier erasing).  Included pixels
    /// get alpha 0.  Out-of-bounds seeds are a no-op.
    ///
    /// Iterative BFS with a full-grid visited set — never recursion, so
    /// large images cannot blow the stack.
    pub fn flood_fill(&mut self, seed_x: i32, seed_y: i32) {
        let w = self.buffer.width();
        let h = self.buffer.height();
        if seed_x < 0 || seed_y < 0 || seed_x as u32 >= w || seed_y as u32 >= h {
            return;
        }
        let (sx, sy) = (seed_x as u32, seed_y as u32);
        let seed = *self.buffer.get_pixel(sx, sy);
        let seed_rgb = [seed[0] as f32, seed[1] as f32, seed[2] as f32];
        let tol_sq = self.tolerance * self.tolerance;

        let mut visited = vec![false; (w * h) as usize];
        let mut queue = VecDeque::with_capacity(1024);
        visited[(sy * w + sx) as usize] = true;
        queue.push_back((sx, sy));
        let mut changed = false;

        while let Some((px, py)) = queue.pop_front() {
            {
                let p = self.buffer.get_pixel_mut(px, py);
                if p[3] != 0 {
                    p[3] = 0;
                    changed = true;
                }
            }
            let neighbors = [
                (px.wrapping_sub(1), py),
                (px + 1, py),
                (px, py.wrapping_sub(1)),
                (px, py + 1),
            ];
            for (nx, ny) in neighbors {
                if nx >= w || ny >= h {
                    continue;
                }
                let idx = (ny * w + nx) as usize;
                if visited[idx] {
                    continue;
                }
                let p = self.buffer.get_pixel(nx, ny);
                // Transparent pixels always propagate the fill.
                let include = p[3] == 0 || color_dist_sq(p, &seed_rgb) <= tol_sq;
                if include {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        if changed {
            self.revision += 1;
            // One history entry per completed operation, append-after-mutation.
            // A fill that touched nothing must not consume an undo slot.
            self.push_snapshot();
        }
    }

    // ---- manual / brush mode ----------------------------------------------

    /// Begin a brush stroke at the pointer position.
    pub fn stroke_begin(&mut self, x: f32, y: f32) {
        self.stroke_last = Some((x, y));
        self.stroke_dirty = false;
        self.erase_circle(x, y);
    }

    /// Continue a stroke: stamps are interpolated between the previous and
    /// current position so fast pointer moves leave no gaps.
    pub fn stroke_move(&mut self, x: f32, y: f32) {
        let Some((lx, ly)) = self.stroke_last else {
            return;
        };
        let dist = ((x - lx).powi(2) + (y - ly).powi(2)).sqrt();
        let step = (self.brush_radius * 0.5).max(1.0);
        let steps = (dist / step).ceil() as u32;
        for i in 1..=steps.max(1) {
            let t = i as f32 / steps.max(1) as f32;
            self.erase_circle(lx + (x - lx) * t, ly + (y - ly) * t);
        }
        self.stroke_last = Some((x, y));
    }

    /// Finish a stroke — pushes exactly one history snapshot for the whole
    /// stroke, and only if it actually changed pixels.
    pub fn stroke_end(&mut self) {
        self.stroke_last = None;
        if self.stroke_dirty {
            self.stroke_dirty = false;
            self.push_snapshot();
        }
    }

    /// Alpha-zeroing circular stamp ("erase" compositing, not paint-over).
    fn erase_circle(&mut self, cx: f32, cy: f32) {
        let w = self.buffer.width() as i32;
        let h = self.buffer.height() as i32;
        let r = self.brush_radius.max(0.5);
        let r_sq = r * r;
        let x0 = ((cx - r).floor() as i32).max(0);
        let x1 = ((cx + r).ceil() as i32).min(w - 1);
        let y0 = ((cy - r).floor() as i32).max(0);
        let y1 = ((cy + r).ceil() as i32).min(h - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if dx * dx + dy * dy <= r_sq {
                    let p = self.buffer.get_pixel_mut(x as u32, y as u32);
                    if p[3] != 0 {
                        p[3] = 0;
                        self.stroke_dirty = true;
                    }
                }
            }
        }
        if self.stroke_dirty {
            self.revision += 1;
        }
    }

    // ---- history ----------------------------------------------------------

    fn push_snapshot(&mut self) {
        self.history.push(self.buffer.clone());
        if self.history.len() > HISTORY_CAP {
            // Keep the loaded image pinned at index 0; drop the oldest edit.
            self.history.remove(1);
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.len() > 1
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Pop the latest snapshot and restore the prior one.  No-op when only
    /// the loaded image remains.
    pub fn undo(&mut self) {
        if self.history.len() <= 1 {
            return;
        }
        self.history.pop();
        if let Some(prev) = self.history.last() {
            self.buffer = prev.clone();
            self.revision += 1;
        }
    }
}

fn color_dist_sq(p: &Rgba<u8>, rgb: &[f32; 3]) -> f32 {
    let dr = p[0] as f32 - rgb[0];
    let dg = p[1] as f32 - rgb[1];
    let db = p[2] as f32 - rgb[2];
    dr * dr + dg * dg + db * db
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Rgba<u8> = Rgba([250, 250, 250, 255]);
    const B: Rgba<u8> = Rgba([10, 10, 10, 255]);

    /// Left half color A, right half color B, hard edge.
    fn split_image(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, _| if x < w / 2 { A } else { B })
    }

    fn tool(img: RgbaImage) -> EraserTool {
        EraserTool::from_image(img, 1024, 1024)
    }

    #[test]
    fn tolerance_zero_erases_exactly_the_seed_region() {
        let mut t = tool(split_image(20, 10));
        t.tolerance = 0.0;
        t.flood_fill(0, 0);
        for y in 0..10 {
            for x in 0..20 {
                let a = t.buffer().get_pixel(x, y)[3];
                if x < 10 {
                    assert_eq!(a, 0, "color-A pixel ({},{}) must be erased", x, y);
                } else {
                    assert_eq!(a, 255, "color-B pixel ({},{}) must stay opaque", x, y);
                }
            }
        }
    }

    #[test]
    fn out_of_bounds_seed_is_a_no_op() {
        let mut t = tool(split_image(8, 8));
        let before = t.history_len();
        t.flood_fill(-1, 0);
        t.flood_fill(0, 99);
        assert_eq!(t.history_len(), before);
        assert_eq!(t.buffer().get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn fill_propagates_through_existing_transparent_holes() {
        // Columns: A | transparent (B-colored) | A | opaque B.  The fill
        // from the left must cross the pre-erased stripe to reach the far A
        // region, even though the stripe's RGB does not match the seed.
        let img = RgbaImage::from_fn(10, 4, |x, _| match x {
            0..=2 => A,
            3..=4 => Rgba([B[0], B[1], B[2], 0]),
            5..=7 => A,
            _ => B,
        });
        let mut t = tool(img);
        t.tolerance = 10.0;
        t.auto_detect();
        assert_eq!(t.buffer().get_pixel(1, 2)[3], 0, "near A region erased");
        assert_eq!(t.buffer().get_pixel(6, 2)[3], 0, "far A region reached");
        assert_eq!(t.buffer().get_pixel(9, 2)[3], 255, "opaque B untouched");
    }

    #[test]
    fn transparent_seed_still_fills_outward() {
        // Auto-detect after partial erasure: the corner is already
        // transparent but the fill keeps walking from it.
        let mut img = split_image(10, 10);
        img.get_pixel_mut(0, 0)[3] = 0;
        let mut t = tool(img);
        t.tolerance = 10.0;
        t.auto_detect();
        assert_eq!(t.buffer().get_pixel(2, 5)[3], 0, "A region reached");
        assert_eq!(t.buffer().get_pixel(8, 5)[3], 255, "B region untouched");
    }

    #[test]
    fn flood_fill_is_idempotent_once_background_is_transparent() {
        let mut t = tool(split_image(16, 16));
        t.tolerance = 30.0;
        t.auto_detect();
        let after_first: Vec<u8> = t.buffer().as_raw().clone();
        t.auto_detect();
        assert_eq!(t.buffer().as_raw(), &after_first, "second run is a fixed point");
    }

    #[test]
    fn no_op_fill_does_not_consume_history() {
        let mut t = tool(split_image(12, 12));
        t.tolerance = 20.0;
        t.flood_fill(0, 0);
        let len = t.history_len();
        // Clicking the already-transparent region again changes no pixels,
        // so no undo slot may be spent on it.
        t.flood_fill(0, 0);
        t.flood_fill(1, 1);
        assert_eq!(t.history_len(), len);
    }

    #[test]
    fn brush_stroke_erases_circle_and_pushes_one_snapshot() {
        let mut t = tool(RgbaImage::from_pixel(40, 40, A));
        t.brush_radius = 5.0;
        let before = t.history_len();
        t.stroke_begin(20.0, 20.0);
        t.stroke_move(25.0, 20.0);
        t.stroke_move(30.0, 20.0);
        t.stroke_end();
        assert_eq!(t.history_len(), before + 1);
        assert_eq!(t.buffer().get_pixel(20, 20)[3], 0);
        assert_eq!(t.buffer().get_pixel(30, 20)[3], 0);
        // Interpolated midpoint also erased.
        assert_eq!(t.buffer().get_pixel(27, 20)[3], 0);
        // Far corner untouched.
        assert_eq!(t.buffer().get_pixel(2, 2)[3], 255);
    }

    #[test]
    fn undo_restores_previous_snapshot() {
        let mut t = tool(split_image(12, 12));
        t.tolerance = 20.0;
        t.flood_fill(0, 0);
        assert_eq!(t.buffer().get_pixel(0, 0)[3], 0);
        t.undo();
        assert_eq!(t.buffer().get_pixel(0, 0)[3], 255);
        // Only the loaded image remains — undo is now a no-op.
        t.undo();
        assert_eq!(t.buffer().get_pixel(0, 0)[3], 255);
        assert_eq!(t.history_len(), 1);
    }

    #[test]
    fn history_is_bounded_and_bottoms_out_at_the_loaded_image() {
        let mut t = tool(RgbaImage::from_pixel(30, 30, A));
        t.brush_radius = 2.0;
        // More edits than the cap can hold.
        for i in 0..(HISTORY_CAP + 5) {
            t.stroke_begin(i as f32, i as f32);
            t.stroke_end();
        }
        assert_eq!(t.history_len(), HISTORY_CAP);
        // Exactly cap-minus-one undos are available...
        let mut undos = 0;
        while t.can_undo() {
            t.undo();
            undos += 1;
        }
        assert_eq!(undos, HISTORY_CAP - 1);
        // ...and the final state is the original loaded image.
        assert!(t.buffer().pixels().all(|p| p[3] == 255));
        // Underflow attempt changes nothing.
        t.undo();
        assert_eq!(t.history_len(), 1);
    }

    #[test]
    fn from_bytes_decodes_uploads_and_rejects_garbage() {
        let img = split_image(8, 8);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        let t = EraserTool::from_bytes(&bytes, 100, 100).unwrap();
        assert_eq!((t.width(), t.height()), (8, 8));

        assert!(EraserTool::from_bytes(b"not an image", 10, 10).is_err());
    }

    #[test]
    fn load_fits_within_bounds_without_upscaling() {
        let t = EraserTool::from_image(RgbaImage::from_pixel(2000, 1000, A), 800, 600);
        assert!(t.width() <= 800 && t.height() <= 600);
        // Aspect preserved (2:1).
        assert_eq!(t.width(), 800);
        assert_eq!(t.height(), 400);

        let small = EraserTool::from_image(RgbaImage::from_pixel(100, 50, A), 800, 600);
        assert_eq!((small.width(), small.height()), (100, 50), "never upscaled");
    }
}
