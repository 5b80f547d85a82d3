// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 轨迹存储 (Track store)
//!
//! Bounded per-track position history for one camera. The camera dimension is
//! handled by [`crate::pipeline::CameraRegistry`], which owns one store per
//! camera so every history has exactly one writer.

use std::collections::HashMap;

use crate::detection::Position;

/// 默认轨迹长度
pub const DEFAULT_MAX_TRACK_LENGTH: usize = 30;

#[derive(Clone, Debug, Default)]
struct TrackHistory {
    points: Vec<Position>,
    last_seen: u64,
}

#[derive(Clone, Debug)]
pub struct TrackStore {
    max_len: usize,
    tracks: HashMap<u32, TrackHistory>,
    /// Frames processed so far; drives stale-track eviction.
    clock: u64,
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACK_LENGTH)
    }
}

impl TrackStore {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            tracks: HashMap::new(),
            clock: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append a position, evicting the oldest one once the cap is hit.
    pub fn record(&mut self, track_id: u32, position: Position) {
        let track = self.tracks.entry(track_id).or_default();
        track.points.push(position);
        track.last_seen = self.clock;

        // 限制轨迹长度
        if track.points.len() > self.max_len {
            track.points.remove(0);
        }
    }

    /// Oldest first. Unknown ids yield an empty slice.
    pub fn history(&self, track_id: u32) -> &[Position] {
        self.tracks
            .get(&track_id)
            .map(|t| t.points.as_slice())
            .unwrap_or(&[])
    }

    /// Marks the start of a new frame for this camera.
    pub fn advance(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drops tracks not updated during the last `ttl_frames` frames and
    /// returns their ids.
    pub fn evict_stale(&mut self, ttl_frames: u64) -> Vec<u32> {
        let now = self.clock;
        let stale: Vec<u32> = self
            .tracks
            .iter()
            .filter(|(_, t)| now.saturating_sub(t.last_seen) > ttl_frames)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.tracks.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
