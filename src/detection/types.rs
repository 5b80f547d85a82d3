// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for the detector/tracker collaborator
use phf::phf_map;
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// COCO类别: person, bicycle, car, motorcycle, bus, truck
pub const DEFAULT_CLASSES: [u32; 6] = [0, 1, 2, 3, 5, 7];

pub const PERSON_CLASS: u32 = 0;

/// car, motorcycle, bus, truck
pub const VEHICLE_CLASSES: [u32; 4] = [2, 3, 5, 7];

/// 类别名称 → COCO类别ID
static CLASS_IDS: phf::Map<&'static str, u32> = phf_map! {
    "person" => 0,
    "bicycle" => 1,
    "car" => 2,
    "motorcycle" => 3,
    "bus" => 5,
    "truck" => 7,
};

/// Display name for a class id; unknown ids render as their number.
pub fn class_name(class_id: u32) -> String {
    CLASS_IDS
        .entries()
        .find(|(_, id)| **id == class_id)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| class_id.to_string())
}

/// Accepts either a known class name or a raw numeric id.
pub fn class_id(name: &str) -> Option<u32> {
    let key = name.trim().to_lowercase();
    CLASS_IDS
        .get(key.as_str())
        .copied()
        .or_else(|| key.parse().ok())
}

// ========== 数据结构 ==========

/// 帧内像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Position {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// 检测框 (xyxy), 序列化为 `[x1, y1, x2, y2]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Position {
        Position::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 单个检测结果: 框 + 持久跟踪ID + 类别
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub track_id: u32,
    pub class_id: u32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// 检测阈值与类别白名单
#[derive(Clone, Debug, PartialEq)]
pub struct DetectParams {
    pub conf: f32,
    pub iou: f32,
    pub classes: Vec<u32>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            conf: 0.3,
            iou: 0.5,
            classes: DEFAULT_CLASSES.to_vec(),
        }
    }
}

impl DetectParams {
    pub fn allows(&self, class_id: u32) -> bool {
        self.classes.contains(&class_id)
    }
}

/// 画面统计: 车辆数 / 行人数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectCounts {
    pub vehicles: usize,
    pub pedestrians: usize,
}

impl ObjectCounts {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut counts = Self::default();
        for det in detections {
            if det.class_id == PERSON_CLASS {
                counts.pedestrians += 1;
            } else if VEHICLE_CLASSES.contains(&det.class_id) {
                counts.vehicles += 1;
            }
        }
        counts
    }
}
