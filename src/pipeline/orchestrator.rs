// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 调度 (Orchestrator)
//!
//! ```text
//! ingest-cam1 ─┐ relay
//! ingest-cam2 ─┼──────▶ worker-0 ─┐
//! ingest-cam3 ─┘ relay  worker-1 ─┴─ bounded ─▶ sink ─▶ writers + violations.json
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{error, info, warn};

use super::registry::CameraRegistry;
use super::relay::{relay, RelayConsumer};
use super::sink::{Sink, SinkReport, WriterFactory};
use super::worker::{AnalysisWorker, WorkerStats};
use super::{FrameEnvelope, StopSignal};
use crate::analysis::ZoneIndex;
use crate::config::PipelineConfig;
use crate::detection::DetectTrack;
use crate::input::{FrameSource, IngestStats, StreamIngestor};
use crate::renderer::OverlayRenderer;
use crate::violation::Violation;

/// A named camera and its not-yet-connected source.
pub struct CameraInput {
    pub name: String,
    pub source: Box<dyn FrameSource>,
}

impl CameraInput {
    pub fn new(name: impl Into<String>, source: Box<dyn FrameSource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// 运行汇总
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub ingest: BTreeMap<String, IngestStats>,
    /// cameras whose source could not be opened at startup
    pub failed_cameras: Vec<String>,
    pub workers: Vec<WorkerStats>,
    pub sink: SinkReport,
}

impl RunReport {
    pub fn violations(&self) -> &[Violation] {
        &self.sink.violations
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.workers.iter().map(|w| w.frames).sum()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.ingest.values().map(|s| s.dropped).sum()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    zones: ZoneIndex,
    stop: StopSignal,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, zones: ZoneIndex) -> Self {
        Self {
            config,
            zones,
            stop: StopSignal::new(),
        }
    }

    /// Handle for requesting a shutdown from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs until every source has ended or a stop is requested, then waits
    /// for the violation log to be written.
    ///
    /// `detector_factory` is called once per worker with the worker index.
    /// `writer_factory = None` disables video output. Camera names must be
    /// unique.
    pub fn run<F>(
        &self,
        cameras: Vec<CameraInput>,
        mut detector_factory: F,
        writer_factory: Option<WriterFactory>,
        renderer: OverlayRenderer,
    ) -> Result<RunReport>
    where
        F: FnMut(usize) -> Result<Box<dyn DetectTrack>>,
    {
        let config = &self.config;
        let mut report = RunReport::default();

        let mut seen = HashSet::new();
        if let Some(name) = cameras.iter().map(|c| c.name.as_str()).find(|name| !seen.insert(*name)) {
            bail!("camera {:?} is listed more than once", name);
        }

        // ========== 1. 连接摄像头 ==========
        let mut ingestors = Vec::new();
        let mut consumers: Vec<RelayConsumer<FrameEnvelope>> = Vec::new();
        let mut live = Vec::new();
        for input in cameras {
            let (producer, consumer) = relay(config.queue_size);
            let mut ingestor = StreamIngestor::new(
                input.name.clone(),
                input.source,
                producer,
                config.ingest_settings(),
                self.stop.clone(),
            );
            match ingestor.start() {
                Ok(()) => {
                    live.push(input.name);
                    ingestors.push(ingestor);
                    consumers.push(consumer);
                }
                Err(e) => {
                    error!(camera = %input.name, "❌ 无法打开视频源, 跳过: {}", e);
                    report.failed_cameras.push(input.name);
                }
            }
        }
        if live.is_empty() {
            bail!("no camera could be opened ({} configured)", report.failed_cameras.len());
        }

        // ========== 2. 按摄像头划分分析线程 ==========
        // camera i and its relay both go to worker i % worker_count
        let worker_count = config.workers.clamp(1, live.len());
        let workers = match self.build_workers(&live, worker_count, &mut detector_factory, &renderer) {
            Ok(workers) => workers,
            Err(e) => {
                for ingestor in ingestors {
                    ingestor.abandon();
                }
                return Err(e);
            }
        };
        let mut worker_relays: Vec<Vec<RelayConsumer<FrameEnvelope>>> = (0..worker_count).map(|_| Vec::new()).collect();
        for (i, consumer) in consumers.into_iter().enumerate() {
            worker_relays[i % worker_count].push(consumer);
        }

        // ========== 3. 启动线程 ==========
        let (result_tx, result_rx) = crossbeam_channel::bounded(config.queue_size.max(1));

        let log_path: PathBuf = config.log_file.clone();
        let sink = Sink::new(writer_factory, log_path).with_recv_timeout(config.sink_timeout());
        let sink_handle = thread::Builder::new()
            .name("sink".into())
            .spawn(move || sink.run(result_rx))
            .context("spawning sink thread")?;

        let mut worker_handles = Vec::with_capacity(worker_count);
        for (id, (worker, relays)) in workers.into_iter().zip(worker_relays).enumerate() {
            let tx = result_tx.clone();
            let stop = self.stop.clone();
            let pop_timeout = config.pop_timeout();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker.run(relays, tx, stop, pop_timeout));
            match handle {
                Ok(h) => worker_handles.push(h),
                Err(e) => {
                    // earlier workers and the sink unwind via the stop signal
                    self.stop.trigger();
                    return Err(anyhow!(e).context(format!("spawning worker {}", id)));
                }
            }
        }
        // the sink finishes once every worker has dropped its clone
        drop(result_tx);

        let mut ingest_handles: Vec<(String, JoinHandle<IngestStats>)> = Vec::with_capacity(ingestors.len());
        for ingestor in ingestors {
            let camera = ingestor.camera().to_string();
            let handle = thread::Builder::new()
                .name(format!("ingest-{}", camera))
                .spawn(move || ingestor.run());
            match handle {
                Ok(h) => ingest_handles.push((camera, h)),
                Err(e) => {
                    // the ingestor was dropped with the closure, closing its relay
                    error!(camera = %camera, "❌ 无法启动采集线程: {}", e);
                    report.failed_cameras.push(camera);
                }
            }
        }
        info!(
            "🚀 流水线启动: {} 路摄像头, {} 个分析线程",
            ingest_handles.len(),
            worker_count
        );

        // ========== 4. 等待结束 ==========
        for (camera, handle) in ingest_handles {
            match handle.join() {
                Ok(stats) => {
                    report.ingest.insert(camera, stats);
                }
                Err(_) => error!(camera = %camera, "❌ 采集线程异常退出"),
            }
        }
        for (id, handle) in worker_handles.into_iter().enumerate() {
            match handle.join() {
                Ok(stats) => report.workers.push(stats),
                Err(_) => error!(worker = id, "❌ 分析线程异常退出"),
            }
        }
        report.sink = sink_handle
            .join()
            .map_err(|_| anyhow!("sink thread panicked"))?
            .context("writing violation log")?;

        if self.stop.is_stopped() {
            warn!("⏹️ 收到停止信号, 流水线已退出");
        }
        info!(
            "✅ 运行结束: 分析 {} 帧, 丢弃 {} 帧, 逆行 {} 次",
            report.frames_analyzed(),
            report.frames_dropped(),
            report.violations().len()
        );
        Ok(report)
    }

    fn build_workers<F>(
        &self,
        live: &[String],
        worker_count: usize,
        detector_factory: &mut F,
        renderer: &OverlayRenderer,
    ) -> Result<Vec<AnalysisWorker>>
    where
        F: FnMut(usize) -> Result<Box<dyn DetectTrack>>,
    {
        let config = &self.config;
        let params = config.detect_params()?;
        let registries = CameraRegistry::build(live, &self.zones, config.max_track_length, config.arrow_scale)
            .partition(worker_count);

        let mut workers = Vec::with_capacity(worker_count);
        for (id, registry) in registries.into_iter().enumerate() {
            let detector = detector_factory(id).with_context(|| format!("creating detector for worker {}", id))?;
            workers.push(
                AnalysisWorker::new(id, registry, detector, params.clone(), renderer.clone())
                    .with_track_ttl(config.track_ttl_frames),
            );
        }
        Ok(workers)
    }
}
