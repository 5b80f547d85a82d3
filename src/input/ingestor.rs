// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集线程 (Stream ingestor)
//!
//! ```text
//! Connecting ──ok──▶ Streaming ──read error──▶ Reconnecting
//!     ▲                  │                          │
//!     └──── retry ◀──────┼───── backoff, release ◀──┘
//!                        └── end of stream ──▶ exit
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::source::FrameSource;
use crate::error::SourceError;
use crate::pipeline::{FrameEnvelope, RelayProducer, StopSignal};

/// 帧时间戳来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// seconds since the UNIX epoch at capture
    #[default]
    Wall,
    /// `frame_index / fps`, for recorded inputs
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestSettings {
    pub fps: f64,
    pub backoff: Duration,
    pub clock: ClockMode,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            fps: 15.0,
            backoff: Duration::from_secs(2),
            clock: ClockMode::Wall,
        }
    }
}

impl IngestSettings {
    fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Connecting,
    Streaming,
    Reconnecting,
}

/// 采集统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames_read: u64,
    /// evicted from the relay before a worker took them
    pub dropped: u64,
    pub read_failures: u64,
    pub reconnects: u64,
}

pub struct StreamIngestor {
    camera: String,
    source: Box<dyn FrameSource>,
    producer: RelayProducer<FrameEnvelope>,
    settings: IngestSettings,
    stop: StopSignal,
    state: IngestState,
    frame_index: u64,
    stats: IngestStats,
}

impl StreamIngestor {
    pub fn new(
        camera: impl Into<String>,
        source: Box<dyn FrameSource>,
        producer: RelayProducer<FrameEnvelope>,
        settings: IngestSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            camera: camera.into(),
            source,
            producer,
            settings,
            stop,
            state: IngestState::Connecting,
            frame_index: 0,
            stats: IngestStats::default(),
        }
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// First connection. An error here means the camera never streams.
    pub fn start(&mut self) -> Result<(), SourceError> {
        self.source.connect()?;
        self.state = IngestState::Streaming;
        info!(
            camera = %self.camera,
            "🎬 已连接: {} (队列 {})",
            self.source.describe(),
            self.producer.capacity()
        );
        Ok(())
    }

    /// Releases a started source without running. Dropping `self` closes the relay.
    pub fn abandon(mut self) {
        if self.state != IngestState::Connecting {
            self.source.release();
        }
        info!(camera = %self.camera, "采集已取消");
    }

    /// Runs until the stop signal fires or the source ends. Dropping `self`
    /// at the end closes the relay.
    pub fn run(mut self) -> IngestStats {
        let interval = self.settings.frame_interval();

        while !self.stop.is_stopped() {
            match self.state {
                IngestState::Connecting => match self.source.connect() {
                    Ok(()) => {
                        info!(camera = %self.camera, "✅ 重连成功");
                        self.state = IngestState::Streaming;
                    }
                    Err(e) => {
                        warn!(camera = %self.camera, "⚠️ 重连失败: {}", e);
                        if self.stop.wait(self.settings.backoff) {
                            break;
                        }
                    }
                },
                IngestState::Streaming => {
                    let started = Instant::now();
                    match self.source.read() {
                        Ok(Some(image)) => {
                            self.hand_off(image);
                            let spent = started.elapsed();
                            if spent < interval && self.stop.wait(interval - spent) {
                                break;
                            }
                        }
                        Ok(None) => {
                            info!(camera = %self.camera, "视频流结束 ({} 帧)", self.stats.frames_read);
                            break;
                        }
                        Err(e) => {
                            warn!(camera = %self.camera, "⚠️ 读帧失败, {:?} 后重连: {}", self.settings.backoff, e);
                            self.stats.read_failures += 1;
                            self.state = IngestState::Reconnecting;
                        }
                    }
                }
                IngestState::Reconnecting => {
                    if self.stop.wait(self.settings.backoff) {
                        break;
                    }
                    self.source.release();
                    self.stats.reconnects += 1;
                    self.state = IngestState::Connecting;
                }
            }
        }

        self.source.release();
        info!(
            camera = %self.camera,
            "❌ 采集线程退出: 读取 {} 帧, 丢弃 {} 帧, 重连 {} 次",
            self.stats.frames_read,
            self.stats.dropped,
            self.stats.reconnects
        );
        self.stats
    }

    fn hand_off(&mut self, image: image::RgbImage) {
        let timestamp = match self.settings.clock {
            ClockMode::Wall => crate::unix_seconds(),
            ClockMode::Stream if self.settings.fps > 0.0 => self.frame_index as f64 / self.settings.fps,
            ClockMode::Stream => self.frame_index as f64,
        };
        let envelope = FrameEnvelope {
            camera: self.camera.clone(),
            image,
            timestamp,
            frame_index: self.frame_index,
        };
        self.frame_index += 1;
        self.stats.frames_read += 1;
        if self.producer.push(envelope).is_some() {
            self.stats.dropped += 1;
        }
    }
}
