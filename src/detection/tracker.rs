// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测+跟踪接口与公共工具
//! Detector/tracker collaborator interface and shared helpers

use anyhow::Result;

use super::types::{BBox, DetectParams, Detection};
use crate::pipeline::FrameEnvelope;

/// 检测+跟踪器 Trait
///
/// 每路摄像头需要独立的跟踪状态, 由分析线程持有 (不跨线程共享)
pub trait DetectTrack: Send {
    /// 对一帧执行检测+跟踪
    ///
    /// # 参数
    /// - `frame`: 当前帧 (含摄像头ID与帧序号)
    /// - `params`: 置信度 / IOU 阈值与类别白名单
    ///
    /// # 返回
    /// 当前帧所有带跟踪ID的检测结果
    fn detect_and_track(&mut self, frame: &FrameEnvelope, params: &DetectParams) -> Result<Vec<Detection>>;

    /// 名称 (用于日志)
    fn name(&self) -> &str;
}

impl<T: DetectTrack + ?Sized> DetectTrack for Box<T> {
    fn detect_and_track(&mut self, frame: &FrameEnvelope, params: &DetectParams) -> Result<Vec<Detection>> {
        (**self).detect_and_track(frame, params)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ========== 工具函数 ==========

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = bbox1.width() * bbox1.height();
    let area2 = bbox2.width() * bbox2.height();
    let union = area1 + area2 - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class NMS. Keeps the higher-confidence box of any pair whose
/// IOU exceeds `iou_threshold`; output order follows descending confidence.
pub fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && compute_iou(&k.bbox, &det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, class_id: u32, confidence: f32) -> Detection {
        Detection {
            bbox: BBox::new(x1, y1, x2, y2),
            track_id: 0,
            class_id,
            confidence,
        }
    }

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((compute_iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_overlaps_is_per_class() {
        let dets = vec![
            det(0.0, 0.0, 10.0, 10.0, 2, 0.6),
            det(1.0, 0.0, 11.0, 10.0, 2, 0.9),
            det(1.0, 0.0, 11.0, 10.0, 0, 0.5),
        ];
        let kept = suppress_overlaps(dets, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 0);
    }
}
