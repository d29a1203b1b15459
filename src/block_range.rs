//! Block-range calculator (C9).
//!
//! Given a sample region mapped onto a screen rectangle, and the viewport
//! that rectangle is clipped against, computes the inclusive range of
//! mode-sized texture blocks that need to be drawn. Each texture carries a
//! border on every edge so adjacent tiles overlap by exactly that many
//! pixels and sampling across a boundary doesn't show a seam; HI mode uses a
//! wider border so its block boundaries line up with MED's (`WF_PEAK_TEXTURE_SIZE`
//! chosen 16x larger in HI so `samples_per_texture` comes out equal, matching
//! the original implementation's texture layout).

use crate::mode::Mode;

/// Datapoints per texture row before border trimming (`WF_PEAK_TEXTURE_SIZE`).
const TEXTURE_SIZE_DATAPOINTS: u64 = 256;

/// Border width in datapoints at each edge of a texture; HI uses 16x the
/// others so HI and MED blocks span the same number of frames.
fn border_datapoints(mode: Mode) -> u64 {
    match mode {
        Mode::Hi => 32,
        _ => 2,
    }
}

fn texture_size_datapoints(mode: Mode) -> u64 {
    match mode {
        Mode::Hi => TEXTURE_SIZE_DATAPOINTS * 16,
        _ => TEXTURE_SIZE_DATAPOINTS,
    }
}

/// Default hard cap on blocks a single draw call will walk (§4.7, ~512),
/// used when no configured limit is supplied.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 512;

/// Number of audio frames one texture covers at `mode`, after trimming the
/// border: `(WF_PEAK_TEXTURE_SIZE - 2*border) * decimation_ratio`.
pub fn samples_per_texture(mode: Mode) -> u64 {
    let visible = texture_size_datapoints(mode) - 2 * border_datapoints(mode);
    visible * mode.decimation_ratio()
}

/// A sample-domain region, in frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub start: i64,
    pub len: u64,
}

/// A pixel-domain rectangle or viewport, sharing one coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub width: f64,
}

/// Outcome of [`compute`]: either an inclusive block span or the sentinel
/// meaning the region lies entirely outside the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRange {
    NotVisible,
    Span { first: u64, last: u64 },
}

impl BlockRange {
    pub fn len(&self) -> u64 {
        match self {
            BlockRange::NotVisible => 0,
            BlockRange::Span { first, last } => last - first + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BlockRange::NotVisible)
    }
}

/// Compute the block span to draw for `region` placed over `rect`, clipped
/// against `viewport`, at `mode`, capped at `max_block_range` blocks (normally
/// [`crate::config::RuntimeConfig::max_block_range`]).
pub fn compute(region: Region, rect: Rect, viewport: Rect, mode: Mode, max_block_range: u64) -> BlockRange {
    if rect.width <= 0.0 || region.len == 0 {
        return BlockRange::NotVisible;
    }

    let rect_right = rect.left + rect.width;
    let viewport_right = viewport.left + viewport.width;
    let visible_left_px = rect.left.max(viewport.left);
    let visible_right_px = rect_right.min(viewport_right);
    if visible_left_px >= visible_right_px {
        return BlockRange::NotVisible;
    }

    let px_to_frame = |px: f64| -> f64 {
        region.start as f64 + (px - rect.left) / rect.width * region.len as f64
    };

    let frame_left = px_to_frame(visible_left_px).max(region.start as f64);
    let frame_right = px_to_frame(visible_right_px).min(region.start as f64 + region.len as f64);
    if frame_right <= frame_left {
        return BlockRange::NotVisible;
    }

    let spt = samples_per_texture(mode) as f64;
    let first = (frame_left / spt).floor().max(0.0) as u64;
    let last = ((frame_right / spt).ceil() as i64 - 1).max(first as i64) as u64;

    let capped_last = if last - first + 1 > max_block_range {
        first + max_block_range - 1
    } else {
        last
    };

    BlockRange::Span {
        first,
        last: capped_last,
    }
}
