// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 分析线程 (Analysis worker)
//!
//! Owns the registry entries of its cameras and one detector instance.
//! Per frame: detect+track → record centres → direction verdicts → overlay.

use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::registry::CameraRegistry;
use super::relay::{select_pop, RelayConsumer};
use super::{AnalyzedFrame, FrameEnvelope, StopSignal};
use crate::analysis::{check_against_flow, movement_direction};
use crate::detection::{DetectParams, DetectTrack, ObjectCounts};
use crate::renderer::{OverlayRenderer, TrackOverlay};
use crate::violation::Violation;

/// 分析统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames: u64,
    pub violations: u64,
    pub detector_errors: u64,
    pub unknown_camera_frames: u64,
}

pub struct AnalysisWorker {
    id: usize,
    registry: CameraRegistry,
    detector: Box<dyn DetectTrack>,
    params: DetectParams,
    renderer: OverlayRenderer,
    track_ttl_frames: Option<u64>,
    stats: WorkerStats,
}

impl AnalysisWorker {
    pub fn new(
        id: usize,
        registry: CameraRegistry,
        detector: Box<dyn DetectTrack>,
        params: DetectParams,
        renderer: OverlayRenderer,
    ) -> Self {
        Self {
            id,
            registry,
            detector,
            params,
            renderer,
            track_ttl_frames: None,
            stats: WorkerStats::default(),
        }
    }

    /// Forget tracks not seen for `ttl` frames of their camera.
    pub fn with_track_ttl(mut self, ttl: Option<u64>) -> Self {
        self.track_ttl_frames = ttl;
        self
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Analyzes one frame. Never fails: frames of unknown cameras and frames
    /// the detector chokes on come back unannotated with no violations.
    pub fn analyze(&mut self, frame: FrameEnvelope) -> AnalyzedFrame {
        self.stats.frames += 1;

        let Some(ctx) = self.registry.get_mut(&frame.camera) else {
            warn!(worker = self.id, camera = %frame.camera, "⚠️ 未注册的摄像头, 原样转发");
            self.stats.unknown_camera_frames += 1;
            return passthrough(frame);
        };
        ctx.tracks.advance();

        let detections = match self.detector.detect_and_track(&frame, &self.params) {
            Ok(dets) => dets,
            Err(e) => {
                warn!(
                    camera = %frame.camera,
                    frame = frame.frame_index,
                    "⚠️ 检测失败 ({}): {:#}",
                    self.detector.name(),
                    e
                );
                self.stats.detector_errors += 1;
                return passthrough(frame);
            }
        };
        let detections: Vec<_> = detections
            .into_iter()
            .filter(|d| self.params.allows(d.class_id))
            .collect();
        let counts = ObjectCounts::from_detections(&detections);

        let mut overlays = Vec::with_capacity(detections.len());
        let mut violations = Vec::new();
        for det in detections {
            let track_id = det.track_id;
            ctx.tracks.record(track_id, det.bbox.center());
            let history = ctx.tracks.history(track_id);

            let (wrong_way, _zone) = check_against_flow(history, &ctx.zones);
            let (direction, _angle) = movement_direction(history);
            let arrow = ctx.arrows.direction_arrow(history, track_id);

            if wrong_way {
                debug!(camera = %frame.camera, track_id, "🚨 逆行");
                violations.push(Violation::wrong_way(&frame.camera, frame.timestamp, track_id));
            }
            overlays.push(TrackOverlay {
                trail: history.to_vec(),
                detection: det,
                arrow,
                direction,
                wrong_way,
            });
        }

        if let Some(ttl) = self.track_ttl_frames {
            for id in ctx.tracks.evict_stale(ttl) {
                ctx.arrows.forget(id);
            }
        }

        let mut image = frame.image;
        self.renderer.draw(&mut image, &ctx.zones, &overlays, counts);
        self.stats.violations += violations.len() as u64;

        AnalyzedFrame {
            camera: frame.camera,
            image,
            timestamp: frame.timestamp,
            frame_index: frame.frame_index,
            violations,
            counts,
        }
    }

    /// Pulls from this worker's relays until they are all closed or a stop is
    /// requested. The frame in hand is always finished and sent.
    pub fn run(
        mut self,
        mut relays: Vec<RelayConsumer<FrameEnvelope>>,
        results: Sender<AnalyzedFrame>,
        stop: StopSignal,
        pop_timeout: Duration,
    ) -> WorkerStats {
        info!(
            worker = self.id,
            "🔍 分析线程启动: 摄像头 {:?}, 检测器 {}",
            self.registry.cameras(),
            self.detector.name()
        );

        while !relays.is_empty() && !stop.is_stopped() {
            match select_pop(&relays, pop_timeout) {
                None => continue,
                Some((_, Ok(frame))) => {
                    let analyzed = self.analyze(frame);
                    if results.send(analyzed).is_err() {
                        warn!(worker = self.id, "⚠️ 输出线程已退出");
                        break;
                    }
                }
                Some((index, Err(_closed))) => {
                    relays.swap_remove(index);
                    debug!(worker = self.id, remaining = relays.len(), "输入队列已关闭");
                }
            }
        }

        info!(
            worker = self.id,
            "✅ 分析线程退出: {} 帧, {} 次逆行",
            self.stats.frames,
            self.stats.violations
        );
        self.stats
    }
}

fn passthrough(frame: FrameEnvelope) -> AnalyzedFrame {
    AnalyzedFrame {
        camera: frame.camera,
        image: frame.image,
        timestamp: frame.timestamp,
        frame_index: frame.frame_index,
        violations: Vec::new(),
        counts: ObjectCounts::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AllowedDirection, Zone, ZoneIndex};
    use crate::detection::{BBox, Detection, Position};
    use crate::pipeline::relay;
    use anyhow::anyhow;
    use image::RgbImage;

    /// One detection per frame, moving `step` px vertically per frame.
    struct Glide {
        start_y: f32,
        step: f32,
        class_id: u32,
        fail_on: Option<u64>,
    }

    impl DetectTrack for Glide {
        fn detect_and_track(&mut self, frame: &FrameEnvelope, _params: &DetectParams) -> anyhow::Result<Vec<Detection>> {
            if self.fail_on == Some(frame.frame_index) {
                return Err(anyhow!("model exploded"));
            }
            let y = self.start_y + self.step * frame.frame_index as f32;
            Ok(vec![Detection {
                bbox: BBox::new(40.0, y - 5.0, 60.0, y + 5.0),
                track_id: 1,
                class_id: self.class_id,
                confidence: 0.9,
            }])
        }

        fn name(&self) -> &str {
            "glide"
        }
    }

    fn frame(camera: &str, frame_index: u64) -> FrameEnvelope {
        FrameEnvelope {
            camera: camera.to_string(),
            image: RgbImage::new(100, 100),
            timestamp: frame_index as f64,
            frame_index,
        }
    }

    fn worker(detector: Glide) -> AnalysisWorker {
        let mut zones = ZoneIndex::default();
        zones.insert(
            "cam1",
            vec![Zone::new(
                vec![
                    Position::new(0.0, 0.0),
                    Position::new(100.0, 0.0),
                    Position::new(100.0, 100.0),
                    Position::new(0.0, 100.0),
                ],
                AllowedDirection::GoingDown,
            )],
        );
        let registry = CameraRegistry::build(&["cam1"], &zones, 30, 3.0);
        AnalysisWorker::new(0, registry, Box::new(detector), DetectParams::default(), OverlayRenderer::new())
    }

    #[test]
    fn test_upward_track_in_down_zone_is_flagged() {
        let mut w = worker(Glide {
            start_y: 80.0,
            step: -10.0,
            class_id: 2,
            fail_on: None,
        });

        let first = w.analyze(frame("cam1", 0));
        assert!(first.violations.is_empty());
        assert_eq!(first.counts.vehicles, 1);

        let second = w.analyze(frame("cam1", 1));
        assert_eq!(second.violations, vec![Violation::wrong_way("cam1", 1.0, 1)]);
        assert_eq!(w.registry().history("cam1", 1).len(), 2);
        assert_eq!(w.stats().violations, 1);
    }

    #[test]
    fn test_downward_track_is_compliant() {
        let mut w = worker(Glide {
            start_y: 20.0,
            step: 10.0,
            class_id: 0,
            fail_on: None,
        });
        for i in 0..5 {
            let out = w.analyze(frame("cam1", i));
            assert!(out.violations.is_empty());
            assert_eq!(out.counts.pedestrians, 1);
        }
    }

    #[test]
    fn test_filtered_class_is_ignored() {
        let mut w = worker(Glide {
            start_y: 80.0,
            step: -10.0,
            class_id: 15,
            fail_on: None,
        });
        for i in 0..3 {
            assert!(w.analyze(frame("cam1", i)).violations.is_empty());
        }
        assert!(w.registry().history("cam1", 1).is_empty());
    }

    #[test]
    fn test_detector_failure_and_unknown_camera_pass_through() {
        let mut w = worker(Glide {
            start_y: 80.0,
            step: -10.0,
            class_id: 2,
            fail_on: Some(1),
        });
        w.analyze(frame("cam1", 0));
        let failed = w.analyze(frame("cam1", 1));
        assert!(failed.violations.is_empty());
        assert_eq!(failed.counts, ObjectCounts::default());

        let stray = w.analyze(frame("cam9", 0));
        assert_eq!(stray.camera, "cam9");
        assert!(stray.image.pixels().all(|p| p.0 == [0, 0, 0]));

        let stats = w.stats();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.detector_errors, 1);
        assert_eq!(stats.unknown_camera_frames, 1);
    }

    #[test]
    fn test_run_drains_closed_relays() {
        let w = worker(Glide {
            start_y: 80.0,
            step: -10.0,
            class_id: 2,
            fail_on: None,
        });
        let (producer, consumer) = relay(10);
        for i in 0..4 {
            producer.push(frame("cam1", i));
        }
        drop(producer);

        let (tx, rx) = crossbeam_channel::bounded(10);
        let stats = w.run(vec![consumer], tx, StopSignal::new(), Duration::from_millis(20));
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.violations, 3);

        let indices: Vec<u64> = rx.try_iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
