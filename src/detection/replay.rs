// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果回放 (Replay tracker)
//!
//! Plays back detector/tracker output recorded as JSON, keyed by camera and
//! frame index:
//!
//! ```json
//! { "cam1": [ { "frame": 0, "detections": [
//!     { "bbox": [10, 20, 50, 80], "track_id": 1, "class_id": 2, "confidence": 0.9 } ] } ] }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

use super::tracker::{suppress_overlaps, DetectTrack};
use super::types::{DetectParams, Detection};
use crate::error::ConfigError;
use crate::pipeline::FrameEnvelope;

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    frame: u64,
    #[serde(default)]
    detections: Vec<Detection>,
}

type Recording = HashMap<String, HashMap<u64, Vec<Detection>>>;

/// Frames missing from the recording yield no detections. Clones share the
/// loaded recording, so one instance per worker is cheap.
#[derive(Clone, Debug, Default)]
pub struct ReplayTracker {
    recording: Arc<Recording>,
}

impl ReplayTracker {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: HashMap<String, Vec<RecordedFrame>> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let tracker = Self::from_frames(raw);
        info!(
            "✅ 检测回放已加载: {} 路摄像头, {} 帧 ({})",
            tracker.recording.len(),
            tracker.frame_count(),
            path.display()
        );
        Ok(tracker)
    }

    fn from_frames(raw: HashMap<String, Vec<RecordedFrame>>) -> Self {
        let recording = raw
            .into_iter()
            .map(|(camera, frames)| {
                let by_index = frames.into_iter().map(|f| (f.frame, f.detections)).collect();
                (camera, by_index)
            })
            .collect();
        Self {
            recording: Arc::new(recording),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.recording.values().map(HashMap::len).sum()
    }
}

impl DetectTrack for ReplayTracker {
    fn detect_and_track(&mut self, frame: &FrameEnvelope, params: &DetectParams) -> Result<Vec<Detection>> {
        let recorded = self
            .recording
            .get(&frame.camera)
            .and_then(|frames| frames.get(&frame.frame_index))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let candidates: Vec<Detection> = recorded
            .iter()
            .filter(|d| d.confidence >= params.conf && params.allows(d.class_id))
            .cloned()
            .collect();
        Ok(suppress_overlaps(candidates, params.iou))
    }

    fn name(&self) -> &str {
        "replay"
    }
}
