use anyhow::{Result, anyhow, ensure};
use std::collections::VecDeque;

use crate::engine::{Buffer, EngineState};

// =============================================================================
// Game Features
// =============================================================================

pub const GAME_FEATURE_NAMES: [&str; 5] = ["target", "enemy", "health", "weapon", "ammo"];

/// Which game features the network is asked to detect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameFeatures(pub [bool; 5]);

impl GameFeatures {
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&f| f).count()
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|&f| f)
    }
}

/// Parse a comma-separated list of game features, e.g. `"enemy,health"`.
pub fn parse_game_features(s: &str) -> Result<GameFeatures> {
    let mut flags = [false; 5];
    for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let idx = GAME_FEATURE_NAMES
            .iter()
            .position(|&f| f == name)
            .ok_or_else(|| anyhow!("unknown game feature: {name}"))?;
        flags[idx] = true;
    }
    Ok(GameFeatures(flags))
}

// =============================================================================
// Buffer Processing
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ObservationConfig {
    pub height: usize,
    pub width: usize,
    pub gray: bool,
    pub use_screen_buffer: bool,
    pub use_depth_buffer: bool,
}

impl ObservationConfig {
    /// Number of feature maps in a processed observation.
    pub fn n_feature_maps(&self) -> usize {
        let mut n = 0;
        if self.use_screen_buffer {
            n += if self.gray { 1 } else { 3 };
        }
        if self.use_depth_buffer {
            n += 1;
        }
        n
    }
}

/// Resize / reformat the engine buffers into one `(n_fm, height, width)` observation.
pub fn process_buffers(state: &EngineState, config: &ObservationConfig) -> Result<Buffer> {
    ensure!(
        config.use_screen_buffer || config.use_depth_buffer,
        "no buffer enabled"
    );
    let (h, w) = (config.height, config.width);
    let mut planes: Vec<Buffer> = Vec::with_capacity(2);

    if config.use_screen_buffer {
        let screen = state
            .screen
            .as_ref()
            .ok_or_else(|| anyhow!("engine returned no screen buffer"))?;
        ensure!(
            screen.channels == 3 || screen.channels == 1,
            "unexpected screen buffer shape {:?}",
            screen.shape()
        );
        let screen = if config.gray && screen.channels == 3 {
            to_gray(screen)
        } else {
            ensure!(
                config.gray || screen.channels == 3,
                "color observations need a 3-channel screen buffer"
            );
            screen.clone()
        };
        planes.push(resize_area(&screen, h, w));
    }

    if config.use_depth_buffer {
        let depth = state
            .depth
            .as_ref()
            .ok_or_else(|| anyhow!("engine returned no depth buffer"))?;
        ensure!(
            depth.channels == 1,
            "unexpected depth buffer shape {:?}",
            depth.shape()
        );
        planes.push(resize_area(depth, h, w));
    }

    if planes.len() == 1 {
        return Ok(planes.remove(0));
    }
    let channels = planes.iter().map(|p| p.channels).sum();
    let mut data = Vec::with_capacity(channels * h * w);
    for p in &planes {
        data.extend_from_slice(&p.data);
    }
    Buffer::new(channels, h, w, data)
}

/// ITU-R 601 luma of a planar RGB buffer.
pub fn to_gray(rgb: &Buffer) -> Buffer {
    let (r, g, b) = (rgb.plane(0), rgb.plane(1), rgb.plane(2));
    let data = r
        .iter()
        .zip(g)
        .zip(b)
        .map(|((&r, &g), &b)| {
            (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        })
        .collect();
    Buffer {
        channels: 1,
        height: rgb.height,
        width: rgb.width,
        data,
    }
}

/// For every output cell, the source cells it overlaps and by how much.
fn area_weights(src: usize, dst: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|o| {
            let start = o as f64 * scale;
            let end = ((o + 1) as f64 * scale).min(src as f64);
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).clamp(first + 1, src);
            (first..last)
                .filter_map(|i| {
                    let overlap = end.min((i + 1) as f64) - start.max(i as f64);
                    (overlap > 1e-9).then(|| (i, (overlap / (end - start)) as f32))
                })
                .collect()
        })
        .collect()
}

/// Area-averaging resize of every plane to `height x width`.
pub fn resize_area(src: &Buffer, height: usize, width: usize) -> Buffer {
    if src.height == height && src.width == width {
        return src.clone();
    }
    let wy = area_weights(src.height, height);
    let wx = area_weights(src.width, width);
    let mut data = Vec::with_capacity(src.channels * height * width);
    for c in 0..src.channels {
        let plane = src.plane(c);
        for row in &wy {
            for col in &wx {
                let mut acc = 0.0f32;
                for &(y, fy) in row {
                    let line = &plane[y * src.width..(y + 1) * src.width];
                    for &(x, fx) in col {
                        acc += fy * fx * line[x] as f32;
                    }
                }
                data.push(acc.round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    Buffer {
        channels: src.channels,
        height,
        width,
        data,
    }
}

// =============================================================================
// State History
// =============================================================================

/// One observed step: processed screen, selected game variables and
/// (optionally) game features.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedState {
    pub screen: Buffer,
    pub variables: Vec<i64>,
    pub features: Option<Vec<f32>>,
}

/// The `hist_size` most recent observed states, oldest first.
#[derive(Debug, Clone)]
pub struct StateHistory {
    states: VecDeque<ObservedState>,
    hist_size: usize,
}

impl StateHistory {
    pub fn new(hist_size: usize) -> Result<Self> {
        ensure!(hist_size >= 1, "history size must be positive");
        Ok(Self {
            states: VecDeque::with_capacity(hist_size + 1),
            hist_size,
        })
    }

    /// Append `state`. The first state fills the whole window.
    pub fn push(&mut self, state: ObservedState) {
        if self.states.is_empty() {
            self.states
                .extend(std::iter::repeat_n(state, self.hist_size));
            return;
        }
        self.states.push_back(state);
        debug_assert_eq!(self.states.len(), self.hist_size + 1);
        self.states.pop_front();
    }

    pub fn hist_size(&self) -> usize {
        self.hist_size
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn latest(&self) -> Option<&ObservedState> {
        self.states.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservedState> {
        self.states.iter()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
