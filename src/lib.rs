// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
#![allow(clippy::type_complexity)]

//! 多路摄像头逆行检测 (Multi-camera wrong-way detection)
//!
//! 三段式线程架构, 通过 crossbeam channel 通信:
//! 1. 采集线程 (每路摄像头一个): 拉流 + 断线重连 → 有界队列 (满则丢最旧帧)
//! 2. 分析线程 (线程池): 检测+跟踪 → 轨迹 → 区域方向判定 → 叠加绘制
//! 3. 输出线程: 写视频 + 汇总违规日志, 结束时一次性落盘
pub mod analysis; // 轨迹 / 区域 / 方向判定
pub mod config; // 运行参数
pub mod detection; // 检测器接口与数据结构
pub mod error;
pub mod input; // 视频输入与采集线程
pub mod pipeline; // 队列 / 分析线程 / 输出线程 / 调度
pub mod renderer; // 叠加绘制
pub mod violation;

pub use crate::analysis::{
    check_against_flow, movement_direction, point_in_polygon, AllowedDirection, Direction,
    DirectionArrow, DirectionEngine, TrackStore, Zone, ZoneIndex,
};
pub use crate::config::PipelineConfig;
pub use crate::detection::{BBox, DetectParams, DetectTrack, Detection, Position, ReplayTracker};
pub use crate::error::{ConfigError, SinkError, SourceError};
pub use crate::input::{ClockMode, FrameSource, ImageSequenceSource, StreamIngestor};
pub use crate::pipeline::{
    relay, AnalysisWorker, AnalyzedFrame, CameraRegistry, FrameEnvelope, Pipeline, RunReport,
    Sink, StopSignal, VideoWriter,
};
pub use crate::renderer::OverlayRenderer;
pub use crate::violation::{Violation, ViolationKind, ViolationLog};

/// Wall-clock seconds since the UNIX epoch, microsecond resolution.
pub fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
