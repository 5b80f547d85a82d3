// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 检测+跟踪由外部模型提供, 这里只定义接口与数据结构
/// - DetectTrack:   检测+跟踪接口
/// - ReplayTracker: 回放录制的检测结果 (无需模型)
/// - types:         检测框 / 类别 / 阈值
pub mod replay;
pub mod tracker;
pub mod types;

pub use replay::ReplayTracker;
pub use tracker::{compute_iou, suppress_overlaps, DetectTrack};
pub use types::{
    class_id, class_name, BBox, DetectParams, Detection, ObjectCounts, Position, DEFAULT_CLASSES,
    PERSON_CLASS, VEHICLE_CLASSES,
};
