// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 轨迹分析 (Trajectory analysis)
///
/// - TrackStore: 每个目标的有界位置历史
/// - ZoneIndex:  每路摄像头的多边形区域 + 允许方向
/// - Direction:  运动方向 / 逆行判定 / 方向箭头
pub mod direction;
pub mod track_store;
pub mod zones;

pub use direction::{check_against_flow, movement_direction, Direction, DirectionArrow, DirectionEngine};
pub use track_store::{TrackStore, DEFAULT_MAX_TRACK_LENGTH};
pub use zones::{point_in_polygon, AllowedDirection, Zone, ZoneFile, ZoneIndex, ZoneSpec};
