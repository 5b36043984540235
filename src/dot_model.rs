//! Pixel-to-dot model: maps one sampled pixel to a dot radius and fill color.
//!
//! Two modes exist on purpose. `Plain` is the deterministic live-preview
//! transform; `Enhanced` is the export transform with a harder contrast curve,
//! a saturation boost, and (at placement time) positional jitter. The two
//! produce visibly different output and both are kept selectable.

use crate::error::DotvidError;

pub const DEFAULT_DOT_SIZE: u32 = 12;
pub const MIN_DOT_SIZE: u32 = 1;
pub const MAX_DOT_SIZE: u32 = 20;

// Rec. 601 luma weights, matching the live path.
const LUMA_R_WEIGHT: f32 = 0.299;
const LUMA_G_WEIGHT: f32 = 0.587;
const LUMA_B_WEIGHT: f32 = 0.114;

const PLAIN_GAMMA: f32 = 1.2;
const PLAIN_COVERAGE: f32 = 0.85;
// Dots at or below this radius are suppressed in plain mode (near-white).
const PLAIN_SUPPRESS_RADIUS: f32 = 0.5;

const ENHANCED_CONTRAST: f32 = 1.3;
// Minimum dot diameter as a fraction of the dot size.
const ENHANCED_MIN_DOT_FRACTION: f32 = 0.15;
const ENHANCED_SATURATION_BOOST: f32 = 1.2;
// Enhanced mode packs dots slightly tighter than the nominal pitch.
const ENHANCED_SPACING_FACTOR: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Deterministic preview transform: gamma 1.2 luminance, untouched color.
    Plain,
    /// Export transform: contrast 1.3 curve, saturation boost, jittered
    /// placement.
    Enhanced,
}

impl RenderMode {
    /// Sampling grid pitch in pixels.
    pub fn pitch(self, dot_size: u32) -> f32 {
        match self {
            Self::Plain => dot_size as f32,
            Self::Enhanced => dot_size as f32 * ENHANCED_SPACING_FACTOR,
        }
    }
}

/// Ephemeral: exists only during a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dot {
    pub radius: f32,
    pub color: [u8; 3],
}

pub fn validate_dot_size(dot_size: u32) -> Result<(), DotvidError> {
    if dot_size < MIN_DOT_SIZE || dot_size > MAX_DOT_SIZE {
        return Err(DotvidError::InputValidation(format!(
            "dot size {dot_size} out of range [{MIN_DOT_SIZE}, {MAX_DOT_SIZE}]"
        )));
    }
    Ok(())
}

/// Weighted luminance in [0, 1] with the plain-mode gamma applied.
fn plain_luminance(r: u8, g: u8, b: u8) -> f32 {
    let weighted =
        LUMA_R_WEIGHT * f32::from(r) + LUMA_G_WEIGHT * f32::from(g) + LUMA_B_WEIGHT * f32::from(b);
    (weighted / 255.0).powf(PLAIN_GAMMA)
}

/// Channel-mean luminance in [0, 255] with the enhanced contrast curve.
fn enhanced_luminance(r: u8, g: u8, b: u8) -> f32 {
    let mean = (f32::from(r) + f32::from(g) + f32::from(b)) / 3.0;
    (mean / 255.0).powf(ENHANCED_CONTRAST) * 255.0
}

/// Scales each channel's deviation from the pixel mean by the boosted
/// saturation, clamped to [0, 255]. Gray pixels pass through unchanged.
fn boost_saturation(r: u8, g: u8, b: u8) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return [r, g, b];
    }
    let saturation = f32::from(max - min) / f32::from(max);
    let boosted = (saturation * ENHANCED_SATURATION_BOOST).min(1.0);
    let mean = (f32::from(r) + f32::from(g) + f32::from(b)) / 3.0;
    let scale = |c: u8| -> u8 {
        let value = f32::from(c) + (f32::from(c) - mean) * boosted;
        value.round().clamp(0.0, 255.0) as u8
    };
    [scale(r), scale(g), scale(b)]
}

/// Maps one sampled pixel to a dot, or `None` when the dot is suppressed.
/// Radius is monotonically non-increasing in luminance: darker pixels get
/// larger dots.
pub fn compute_dot(rgb: [u8; 3], dot_size: u32, mode: RenderMode) -> Option<Dot> {
    let [r, g, b] = rgb;
    match mode {
        RenderMode::Plain => {
            let luminance = plain_luminance(r, g, b);
            let radius = (dot_size as f32 / 2.0) * (1.0 - luminance * PLAIN_COVERAGE);
            if radius <= PLAIN_SUPPRESS_RADIUS {
                return None;
            }
            Some(Dot {
                radius,
                color: rgb,
            })
        }
        RenderMode::Enhanced => {
            let luminance = enhanced_luminance(r, g, b);
            let min_diameter = ENHANCED_MIN_DOT_FRACTION * dot_size as f32;
            let diameter = ((255.0 - luminance) / 255.0 * dot_size as f32).max(min_diameter);
            Some(Dot {
                radius: diameter / 2.0,
                color: boost_saturation(r, g, b),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_dot, validate_dot_size, RenderMode, MAX_DOT_SIZE, MIN_DOT_SIZE};

    #[test]
    fn dot_size_bounds_are_enforced() {
        assert!(validate_dot_size(MIN_DOT_SIZE).is_ok());
        assert!(validate_dot_size(MAX_DOT_SIZE).is_ok());
        assert!(validate_dot_size(0).is_err());
        assert!(validate_dot_size(MAX_DOT_SIZE + 1).is_err());
    }

    #[test]
    fn pure_black_plain_dot_is_undiminished() {
        let dot = compute_dot([0, 0, 0], 2, RenderMode::Plain).expect("black yields a dot");
        assert!((dot.radius - 1.0).abs() < 1e-6);
        assert_eq!(dot.color, [0, 0, 0]);
    }

    #[test]
    fn pure_white_plain_dot_is_suppressed() {
        // radius = 1 * (1 - 0.85) = 0.15, below the suppression threshold.
        assert!(compute_dot([255, 255, 255], 2, RenderMode::Plain).is_none());
    }

    #[test]
    fn enhanced_mode_never_suppresses() {
        let dot = compute_dot([255, 255, 255], 12, RenderMode::Enhanced).expect("floor applies");
        // Floor: 0.15 * 12 / 2.
        assert!((dot.radius - 0.9).abs() < 1e-6);
    }

    #[test]
    fn radius_is_non_increasing_in_luminance_plain() {
        assert_radius_monotone(RenderMode::Plain);
    }

    #[test]
    fn radius_is_non_increasing_in_luminance_enhanced() {
        assert_radius_monotone(RenderMode::Enhanced);
    }

    fn assert_radius_monotone(mode: RenderMode) {
        for dot_size in [MIN_DOT_SIZE, 2, 8, 12, MAX_DOT_SIZE] {
            let mut previous = f32::INFINITY;
            for value in 0..=255_u8 {
                let radius = compute_dot([value, value, value], dot_size, mode)
                    .map(|dot| dot.radius)
                    .unwrap_or(0.0);
                assert!(
                    radius <= previous + 1e-6,
                    "radius grew at gray {value} for size {dot_size}: {radius} > {previous}"
                );
                previous = radius;
            }
        }
    }

    #[test]
    fn saturation_boost_leaves_gray_untouched() {
        let dot = compute_dot([120, 120, 120], 12, RenderMode::Enhanced).expect("dot");
        assert_eq!(dot.color, [120, 120, 120]);
    }

    #[test]
    fn saturation_boost_widens_channel_spread() {
        let dot = compute_dot([200, 100, 50], 12, RenderMode::Enhanced).expect("dot");
        let [r, g, b] = dot.color;
        assert!(r > 200, "dominant channel should move up, got {r}");
        assert!(b < 50, "weak channel should move down, got {b}");
        let _ = g;
    }

    #[test]
    fn saturation_boost_clamps_to_channel_range() {
        let dot = compute_dot([255, 0, 0], 12, RenderMode::Enhanced).expect("dot");
        assert_eq!(dot.color, [255, 0, 0]);
    }
}
