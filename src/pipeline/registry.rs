// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 摄像头状态表 (Camera registry)
//!
//! Built once at startup: camera → (tracks, zones, arrow buffer). The table is
//! then split between workers so that each camera's state has one owner.

use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::{DirectionEngine, TrackStore, Zone, ZoneIndex};
use crate::detection::Position;

/// Everything a worker keeps for one camera.
#[derive(Debug, Clone)]
pub struct CameraContext {
    pub camera: String,
    pub tracks: TrackStore,
    pub zones: Arc<[Zone]>,
    pub arrows: DirectionEngine,
}

impl CameraContext {
    pub fn new(camera: impl Into<String>, zones: Arc<[Zone]>, max_track_length: usize, arrow_scale: f32) -> Self {
        Self {
            camera: camera.into(),
            tracks: TrackStore::new(max_track_length),
            zones,
            arrows: DirectionEngine::new(max_track_length, arrow_scale),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    /// registration order, used for round-robin assignment
    order: Vec<String>,
    contexts: HashMap<String, CameraContext>,
}

impl CameraRegistry {
    /// Cameras without zones get an empty zone list.
    pub fn build<S: AsRef<str>>(cameras: &[S], zones: &ZoneIndex, max_track_length: usize, arrow_scale: f32) -> Self {
        let mut registry = Self::default();
        for camera in cameras {
            let camera = camera.as_ref();
            registry.insert(CameraContext::new(
                camera,
                zones.zones_for(camera),
                max_track_length,
                arrow_scale,
            ));
        }
        registry
    }

    /// Replaces any existing entry for the same camera.
    pub fn insert(&mut self, context: CameraContext) {
        if !self.contexts.contains_key(&context.camera) {
            self.order.push(context.camera.clone());
        }
        self.contexts.insert(context.camera.clone(), context);
    }

    pub fn record(&mut self, camera: &str, track_id: u32, position: Position) {
        if let Some(ctx) = self.contexts.get_mut(camera) {
            ctx.tracks.record(track_id, position);
        }
    }

    /// Empty for unknown cameras or tracks.
    pub fn history(&self, camera: &str, track_id: u32) -> &[Position] {
        self.contexts
            .get(camera)
            .map(|ctx| ctx.tracks.history(track_id))
            .unwrap_or(&[])
    }

    pub fn get(&self, camera: &str) -> Option<&CameraContext> {
        self.contexts.get(camera)
    }

    pub fn get_mut(&mut self, camera: &str) -> Option<&mut CameraContext> {
        self.contexts.get_mut(camera)
    }

    pub fn cameras(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Splits the table into `parts` registries. Camera `i` (registration
    /// order) goes to part `i % parts`.
    pub fn partition(mut self, parts: usize) -> Vec<CameraRegistry> {
        let parts = parts.max(1);
        let mut out: Vec<CameraRegistry> = (0..parts).map(|_| CameraRegistry::default()).collect();
        for (i, camera) in std::mem::take(&mut self.order).into_iter().enumerate() {
            if let Some(ctx) = self.contexts.remove(&camera) {
                out[i % parts].insert(ctx);
            }
        }
        out
    }
}
