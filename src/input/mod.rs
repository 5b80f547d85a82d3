// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// 每路摄像头一个采集线程
/// - FrameSource:    帧源接口 (连接 / 读帧 / 释放)
/// - ImageSequence:  图片序列源 (离线回放)
/// - FfmpegSource:   RTSP 流 / 视频文件解码 (`video` feature)
/// - StreamIngestor: 拉流 + 断线重连 + 帧率控制 → 有界队列
#[cfg(feature = "video")]
pub mod decoder;
pub mod ingestor;
pub mod source;

#[cfg(feature = "video")]
pub use decoder::FfmpegSource;
pub use ingestor::{ClockMode, IngestSettings, IngestState, IngestStats, StreamIngestor};
pub use source::{is_stream_uri, open_source, redact_uri, FrameSource, ImageSequenceSource};
