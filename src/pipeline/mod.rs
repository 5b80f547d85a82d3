// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频处理流水线 (Video Processing Pipeline)
///
/// 三段式线程架构, 通过 crossbeam channel 通信:
/// - Ingestor: 每路摄像头一个采集线程 → 有界队列 (丢最旧帧)
/// - Worker:   分析线程池, 每路摄像头只归属一个分析线程
/// - Sink:     输出线程, 写视频 + 独占违规日志
///
/// `video` feature: FFmpeg 编码 mp4 (VideoFileWriter), 否则逐帧写 JPEG
#[cfg(feature = "video")]
pub mod encoder;
pub mod orchestrator;
pub mod registry;
pub mod relay;
pub mod sink;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;

use crate::detection::ObjectCounts;
use crate::violation::Violation;

#[cfg(feature = "video")]
pub use encoder::VideoFileWriter;
pub use orchestrator::{CameraInput, Pipeline, RunReport};
pub use registry::{CameraContext, CameraRegistry};
pub use relay::{relay, select_pop, RelayClosed, RelayConsumer, RelayProducer};
pub use sink::{FrameDirWriter, Sink, SinkReport, VideoWriter, WriterFactory};
pub use worker::{AnalysisWorker, WorkerStats};

// ========== 线程间消息类型定义 ==========

/// 采集帧 (采集线程 → 分析线程)
#[derive(Clone, Debug)]
pub struct FrameEnvelope {
    pub camera: String,
    pub image: RgbImage,
    /// capture time, seconds
    pub timestamp: f64,
    /// 帧序号 (每路摄像头从0开始)
    pub frame_index: u64,
}

/// 分析结果 (分析线程 → 输出线程)
#[derive(Clone, Debug)]
pub struct AnalyzedFrame {
    pub camera: String,
    pub image: RgbImage,
    pub timestamp: f64,
    pub frame_index: u64,
    pub violations: Vec<Violation>,
    pub counts: ObjectCounts,
}

// ========== 全局停止信号 ==========

/// Process-wide stop request. Cloning shares the same signal.
///
/// `wait` doubles as an interruptible sleep: the wake-up channel never
/// carries a message, it only disconnects when the signal fires.
#[derive(Clone, Debug)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    waker: Arc<Mutex<Option<Sender<()>>>>,
    sleeper: Receiver<()>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Mutex::new(Some(tx))),
            sleeper: rx,
        }
    }

    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut waker = self.waker.lock().unwrap_or_else(|e| e.into_inner());
        waker.take();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps up to `timeout`; returns `true` as soon as a stop is requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.sleeper.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_stopped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_stop_signal_wait_times_out() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(!stop.is_stopped());
    }

    #[test]
    fn test_stop_signal_wakes_sleepers() {
        let stop = StopSignal::new();
        let sleeper = stop.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = sleeper.wait(Duration::from_secs(30));
            (stopped, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();
        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
        assert!(stop.wait(Duration::from_secs(30)));
    }
}
