//! Waveform actor (C10).
//!
//! One independent view of a waveform: its own region, rectangle, colour,
//! vertical zoom, z-offset, and animation state. Ownership runs one way —
//! the actor holds a strong reference to the waveform; the waveform holds
//! no reference back to its actors (§9 "replace with one-way ownership").

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::block_range::{self, BlockRange};
use crate::context::RenderContext;
use crate::mode::{self, Mode};
use crate::render;
use crate::runtime::Runtime;
use crate::texture_cache::TextureId;
use crate::transition::{Rect, Region, Transition};
use crate::waveform::Waveform;

/// Memoised result of the last render-info recomputation, skipped on a
/// redraw with no layout change (§3 "render info cache").
#[derive(Debug, Clone, Copy, PartialEq)]
struct RenderInfo {
    mode: Mode,
    block_range: BlockRange,
    region: Region,
    rect: Rect,
}

/// One block drawn (or not) this frame, for callers that want to inspect
/// the outcome (tests, diagnostics overlays).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockDraw {
    /// Drawn at the requested mode.
    Drawn { block_index: u64, texture: TextureId },
    /// Fell through to a coarser mode because the requested one wasn't ready.
    FellThrough {
        block_index: u64,
        drawn_at: Mode,
        texture: TextureId,
    },
    /// No mode had data ready; nothing was drawn for this block.
    Blank { block_index: u64 },
}

/// Outcome of one [`WaveformActor::draw`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawOutcome {
    pub mode: Mode,
    pub blocks: Vec<BlockDraw>,
}

impl DrawOutcome {
    pub fn any_fell_through(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, BlockDraw::FellThrough { .. }))
    }
}

/// One independent view of a [`Waveform`].
pub struct WaveformActor {
    waveform: Arc<Waveform>,
    region: Mutex<Region>,
    rect: Mutex<Rect>,
    colour: Mutex<[f32; 4]>,
    vzoom: AtomicU32,
    z: AtomicU32,
    opacity: AtomicU32,
    render_info: Mutex<Option<RenderInfo>>,
    region_transition: Mutex<Option<(Transition<Region>, Instant)>>,
}

impl WaveformActor {
    pub fn new(waveform: Arc<Waveform>) -> Self {
        let region = Region {
            start: 0,
            len: waveform.n_frames,
        };
        Self {
            waveform,
            region: Mutex::new(region),
            rect: Mutex::new(Rect {
                left: 0.0,
                top: 0.0,
                width: 0.0,
                height: 0.0,
            }),
            colour: Mutex::new([1.0, 1.0, 1.0, 1.0]),
            vzoom: AtomicU32::new(1.0f32.to_bits()),
            z: AtomicU32::new(0),
            opacity: AtomicU32::new(1.0f32.to_bits()),
            render_info: Mutex::new(None),
            region_transition: Mutex::new(None),
        }
    }

    pub fn waveform(&self) -> &Arc<Waveform> {
        &self.waveform
    }

    pub fn region(&self) -> Region {
        *self.region.lock().expect("actor region lock")
    }

    /// Set the sample region, invalidating memoised render info. If
    /// `animate` carries a duration, the change is animated rather than
    /// applied instantly, and the transition's preview samples are walked
    /// to prefetch blocks the pan/zoom is about to reveal (§4.9, §9
    /// "coroutine-style animation preview").
    pub fn set_region(&self, start: i64, len: u64, animate: Option<Duration>) {
        let new_region = Region { start, len };
        let previous = self.region();
        *self.region.lock().expect("actor region lock") = new_region;
        self.invalidate();

        if let Some(duration) = animate {
            let transition = Transition::new(previous, new_region, duration);
            *self.region_transition.lock().expect("actor transition lock") = Some((transition, Instant::now()));
        } else {
            *self.region_transition.lock().expect("actor transition lock") = None;
        }
    }

    pub fn set_rect(&self, left: f32, top: f32, width: f32, height: f32) {
        *self.rect.lock().expect("actor rect lock") = Rect { left, top, width, height };
        self.invalidate();
    }

    pub fn set_colour(&self, rgba: [f32; 4]) {
        *self.colour.lock().expect("actor colour lock") = rgba;
    }

    pub fn set_vzoom(&self, vzoom: f32) {
        self.vzoom.store(vzoom.to_bits(), Ordering::Relaxed);
        self.invalidate();
    }

    pub fn set_z(&self, z: f32) {
        self.z.store(z.to_bits(), Ordering::Relaxed);
        self.invalidate();
    }

    pub fn vzoom(&self) -> f32 {
        f32::from_bits(self.vzoom.load(Ordering::Relaxed))
    }

    pub fn z(&self) -> f32 {
        f32::from_bits(self.z.load(Ordering::Relaxed))
    }

    pub fn opacity(&self) -> f32 {
        f32::from_bits(self.opacity.load(Ordering::Relaxed))
    }

    pub fn fade_in(&self) {
        self.opacity.store(1.0f32.to_bits(), Ordering::Relaxed);
    }

    pub fn fade_out(&self) {
        self.opacity.store(0.0f32.to_bits(), Ordering::Relaxed);
    }

    /// Drop this view's memoised state and release its slice of runtime
    /// resources (exit condition, §6).
    pub fn clear(&self, runtime: &Runtime) {
        for mode in Mode::ALL {
            render::free(&self.waveform, mode, runtime);
        }
        *self.render_info.lock().expect("actor render_info lock") = None;
    }

    fn invalidate(&self) {
        *self.render_info.lock().expect("actor render_info lock") = None;
    }

    /// Render one frame: recompute render info if invalidated, ensure the
    /// mode's render data exists, draw every block in range with
    /// fall-through to a coarser mode when data isn't ready, and schedule
    /// prefetch jobs for blocks that fell through (§4.9).
    pub fn draw(&self, context: &dyn RenderContext, viewport: Rect, runtime: &Runtime) -> DrawOutcome {
        let target_mode = mode::select_mode(crate::context::pixels_per_sample(context));
        if !self.waveform.is_renderable() {
            return DrawOutcome { mode: target_mode, blocks: Vec::new() };
        }

        let region = self.region();
        let rect = *self.rect.lock().expect("actor rect lock");

        let block_range_rect = block_range::Rect { left: rect.left as f64, width: rect.width as f64 };
        let block_range_viewport = block_range::Rect {
            left: viewport.left as f64,
            width: viewport.width as f64,
        };
        let block_range_region = block_range::Region {
            start: region.start,
            len: region.len,
        };
        let range = block_range::compute(
            block_range_region,
            block_range_rect,
            block_range_viewport,
            target_mode,
            runtime.config.max_block_range as u64,
        );

        let needs_recompute = {
            let cached = self.render_info.lock().expect("actor render_info lock");
            !matches!(&*cached, Some(info) if info.mode == target_mode && info.region == region && info.rect == rect)
        };
        if needs_recompute {
            render::new(&self.waveform, target_mode);
            *self.render_info.lock().expect("actor render_info lock") = Some(RenderInfo {
                mode: target_mode,
                block_range: range,
                region,
                rect,
            });
        }

        render::pre_render(&self.waveform, target_mode);

        let mut blocks = Vec::new();
        if let BlockRange::Span { first, last } = range {
            for block_index in first..=last {
                blocks.push(self.draw_block(target_mode, block_index, runtime));
            }
        }

        DrawOutcome { mode: target_mode, blocks }
    }

    fn draw_block(&self, mode: Mode, block_index: u64, runtime: &Runtime) -> BlockDraw {
        if let Some(texture) = render::render_block(&self.waveform, mode, block_index, runtime) {
            return BlockDraw::Drawn { block_index, texture };
        }
        render::load_block(&self.waveform, mode, block_index, runtime);

        let mut fallback = mode.fall_through();
        while let Some(coarser) = fallback {
            if let Some(texture) = render::render_block(&self.waveform, coarser, block_index, runtime) {
                return BlockDraw::FellThrough { block_index, drawn_at: coarser, texture };
            }
            fallback = coarser.fall_through();
        }
        BlockDraw::Blank { block_index }
    }

    /// Walk the in-flight region transition's preview samples and request
    /// the peakfile/hi-res data each intermediate region's blocks will need,
    /// so a long pan or zoom doesn't stall mid-flight (§4.9 prefetch).
    pub fn prefetch_transition(&self, context: &dyn RenderContext, viewport: Rect, runtime: &Runtime, samples: usize) {
        let Some((transition, started_at)) = self.region_transition.lock().expect("actor transition lock").clone()
        else {
            return;
        };
        let rect = *self.rect.lock().expect("actor rect lock");
        let mode = mode::select_mode(crate::context::pixels_per_sample(context));
        let block_range_rect = block_range::Rect { left: rect.left as f64, width: rect.width as f64 };
        let block_range_viewport = block_range::Rect {
            left: viewport.left as f64,
            width: viewport.width as f64,
        };

        let _ = started_at;
        for region in transition.preview_samples(samples) {
            let block_range_region = block_range::Region {
                start: region.start,
                len: region.len,
            };
            if let BlockRange::Span { first, last } = block_range::compute(
                block_range_region,
                block_range_rect,
                block_range_viewport,
                mode,
                runtime.config.max_block_range as u64,
            ) {
                for block_index in first..=last {
                    render::load_block(&self.waveform, mode, block_index, runtime);
                }
            }
        }
    }
}
