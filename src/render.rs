//! Halftone renderer: tiles a sampling grid over a source frame and
//! composites one filled circle per grid cell into the target surface.
//!
//! Each cell samples exactly one source pixel at its origin. Cheap
//! single-sample luminance, not supersampling; the tradeoff is intentional
//! and keeps the live path fast enough for per-refresh rendering.

use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Transform};

use crate::dot_model::{compute_dot, RenderMode};
use crate::error::DotvidError;
use crate::frame::{FrameBuffer, BYTES_PER_PIXEL};

// Total jitter swing as a fraction of the pitch (±5% per axis).
const JITTER_SPAN: f32 = 0.1;

const XORSHIFT_MULTIPLIER: u64 = 0x2545_f491_4f6c_dd1d;
const FALLBACK_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Positional jitter source for enhanced-mode placement. Seeded from the
/// clock in production, so export output is intentionally non-deterministic
/// in dot positions only; dot count and ordering never depend on it.
#[derive(Debug, Clone)]
pub struct PlacementJitter {
    state: u64,
}

impl PlacementJitter {
    pub fn from_clock() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(FALLBACK_SEED);
        Self::seeded(seed)
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            state: if seed == 0 { FALLBACK_SEED } else { seed },
        }
    }

    fn next_unit(&mut self) -> f32 {
        // xorshift64*; top 24 bits give a uniform value in [0, 1).
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        let value = self.state.wrapping_mul(XORSHIFT_MULTIPLIER);
        (value >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Per-axis placement offsets within ±`JITTER_SPAN`/2 of the pitch.
    pub fn offsets(&mut self, pitch: f32) -> (f32, f32) {
        let dx = (self.next_unit() - 0.5) * pitch * JITTER_SPAN;
        let dy = (self.next_unit() - 0.5) * pitch * JITTER_SPAN;
        (dx, dy)
    }
}

/// A dot placed on the output surface, in raster order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedDot {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
    pub color: [u8; 3],
}

/// Lays out the sampling grid and computes every non-suppressed dot in
/// raster order (top-to-bottom, left-to-right). Samples whose source index
/// would fall outside the buffer are skipped, not failed.
pub fn plan_dots(
    source: &FrameBuffer,
    dot_size: u32,
    mode: RenderMode,
    jitter: &mut PlacementJitter,
) -> Vec<PlacedDot> {
    if source.is_empty() || dot_size == 0 {
        return Vec::new();
    }

    let width = source.width() as usize;
    let data = source.data();
    let pitch = mode.pitch(dot_size);
    let cells_x = (source.width() as f32 / pitch).floor() as u32;
    let cells_y = (source.height() as f32 / pitch).floor() as u32;
    let half_pitch = pitch / 2.0;

    let mut dots = Vec::with_capacity((cells_x as usize) * (cells_y as usize));
    for grid_y in 0..cells_y {
        let sample_y = (grid_y as f32 * pitch) as usize;
        for grid_x in 0..cells_x {
            let sample_x = (grid_x as f32 * pitch) as usize;
            let index = (sample_y * width + sample_x) * BYTES_PER_PIXEL;
            if index + BYTES_PER_PIXEL > data.len() {
                continue;
            }
            let rgb = [data[index], data[index + 1], data[index + 2]];
            let Some(dot) = compute_dot(rgb, dot_size, mode) else {
                continue;
            };

            let mut center_x = grid_x as f32 * pitch + half_pitch;
            let mut center_y = grid_y as f32 * pitch + half_pitch;
            if mode == RenderMode::Enhanced {
                let (dx, dy) = jitter.offsets(pitch);
                center_x += dx;
                center_y += dy;
            }
            dots.push(PlacedDot {
                center_x,
                center_y,
                radius: dot.radius,
                color: dot.color,
            });
        }
    }
    dots
}

/// Renders one source frame into `target`: clears to solid white, then
/// composites every planned dot in raster order. Later dots may overlay
/// earlier ones at small pitch; no z-ordering is offered.
///
/// A zero-dimension source is a no-op, not an error. The target is mutated
/// in place and no buffer references are retained across calls.
pub fn render_frame(
    source: &FrameBuffer,
    dot_size: u32,
    mode: RenderMode,
    jitter: &mut PlacementJitter,
    target: &mut Pixmap,
) -> Result<(), DotvidError> {
    if source.is_empty() {
        return Ok(());
    }
    if dot_size == 0 {
        return Err(DotvidError::Render("dot size must be positive".to_owned()));
    }
    if target.width() != source.width() || target.height() != source.height() {
        return Err(DotvidError::Render(format!(
            "target surface {}x{} does not match source {}x{}",
            target.width(),
            target.height(),
            source.width(),
            source.height()
        )));
    }

    target.fill(Color::WHITE);

    for dot in plan_dots(source, dot_size, mode, jitter) {
        let mut builder = PathBuilder::new();
        builder.push_circle(dot.center_x, dot.center_y, dot.radius);
        let Some(path) = builder.finish() else {
            continue;
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(dot.color[0], dot.color[1], dot.color[2], 255);
        paint.anti_alias = true;
        target.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }
    Ok(())
}
