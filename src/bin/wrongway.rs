// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 多路摄像头逆行检测 - 采集 / 分析 / 输出 三段式线程架构
///
/// 主程序入口:
///   cargo run --release --bin wrongway -- --input-dir data/ --zones polygons.json --detections dets.json
///   cargo run --release --features video --bin wrongway -- --camera cam1=rtsp://ip/stream1 --detections dets.json
///
/// 运行中输入 `q` 回车即可停止, 违规日志在退出时写出
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wrongway_rs::detection::DetectTrack;
use wrongway_rs::input::open_source;
use wrongway_rs::pipeline::{CameraInput, WriterFactory};
use wrongway_rs::{ClockMode, OverlayRenderer, Pipeline, PipelineConfig, ReplayTracker, StopSignal, ZoneIndex};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 逆行检测程序
#[derive(Parser, Debug)]
#[command(author, version, about = "多路摄像头逆行检测 (wrong-way detection)", long_about = None)]
struct Args {
    /// 配置文件 (JSON, 不存在时写入默认配置)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 摄像头: 名称=视频源 (可重复). 视频源: 图片目录, loop:<目录>, rtsp://..., 视频文件
    #[arg(long = "camera", value_name = "NAME=URI", value_parser = parse_camera)]
    cameras: Vec<(String, String)>,

    /// 离线模式: 每个子目录作为一路摄像头的图片序列
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// 区域配置文件
    #[arg(short, long)]
    zones: Option<PathBuf>,

    /// 检测回放文件 (JSON)
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// 叠加视频输出目录
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 违规日志文件
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long)]
    fps: Option<f64>,

    /// 分析线程数
    #[arg(short, long)]
    workers: Option<usize>,

    /// 每路摄像头的队列长度
    #[arg(long)]
    queue_size: Option<usize>,

    /// 叠加文字字体 (TTF/OTF)
    #[arg(long)]
    font: Option<PathBuf>,

    /// 不写叠加视频
    #[arg(long)]
    no_video: bool,

    /// 时间戳来源
    #[arg(long, value_enum)]
    clock: Option<ClockMode>,
}

fn parse_camera(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, uri)) if !name.trim().is_empty() && !uri.trim().is_empty() => {
            Ok((name.trim().to_string(), uri.trim().to_string()))
        }
        _ => Err(format!("expected NAME=URI, got {:?}", s)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wrongway_rs=info,wrongway=info")))
        .with_thread_names(true)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    config.validate()?;
    config.log_summary();

    let zones = ZoneIndex::load(&config.zones_path).context("loading zones")?;
    for camera in zones.cameras().filter(|c| !config.cameras.contains_key(*c)) {
        warn!("⚠️ 区域配置中的摄像头 {} 未启用", camera);
    }

    let detections = config
        .detections_path
        .as_ref()
        .context("no detector configured: pass --detections <dump.json>")?;
    let replay = ReplayTracker::load(detections)?;

    let renderer = match &config.font_path {
        Some(path) => OverlayRenderer::load_font(path)?,
        None => {
            info!("📝 未配置字体, 叠加画面不含文字");
            OverlayRenderer::new()
        }
    };

    let mut cameras = Vec::with_capacity(config.cameras.len());
    for (name, uri) in &config.cameras {
        match open_source(uri) {
            Ok(source) => cameras.push(CameraInput::new(name.clone(), source)),
            Err(e) => error!(camera = %name, "❌ {}", e),
        }
    }

    let writer_factory = config.write_video.then(|| video_output(&config));

    let pipeline = Pipeline::new(config, zones);
    spawn_quit_listener(pipeline.stop_signal());

    let report = pipeline.run(
        cameras,
        |_| Ok(Box::new(replay.clone()) as Box<dyn DetectTrack>),
        writer_factory,
        renderer,
    )?;

    info!("📊 运行汇总:");
    for (camera, stats) in &report.ingest {
        info!(
            "  {}: 读取 {} 帧, 丢弃 {} 帧, 读帧失败 {} 次, 重连 {} 次",
            camera, stats.frames_read, stats.dropped, stats.read_failures, stats.reconnects
        );
    }
    for camera in &report.failed_cameras {
        info!("  {}: 未能打开", camera);
    }
    for camera in &report.sink.disabled_cameras {
        info!("  {}: 输出已停用", camera);
    }
    info!(
        "  逆行 {} 次, 日志: {:?}",
        report.violations().len(),
        report.sink.log_path
    );
    Ok(())
}

/// 叠加视频输出: mp4 (FFmpeg) 或 JPEG 帧目录
#[cfg(feature = "video")]
fn video_output(config: &PipelineConfig) -> WriterFactory {
    info!("🎞️ 叠加视频: {}/overlay_<摄像头>.mp4 @ {} fps", config.output_dir.display(), config.fps);
    wrongway_rs::pipeline::VideoFileWriter::factory(config.output_dir.clone(), config.fps)
}

#[cfg(not(feature = "video"))]
fn video_output(config: &PipelineConfig) -> WriterFactory {
    info!("🖼️ 叠加帧: {}/overlay_<摄像头>/ (mp4 输出需要 video feature)", config.output_dir.display());
    wrongway_rs::pipeline::FrameDirWriter::factory(config.output_dir.clone())
}

/// 配置文件 → 命令行覆盖
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_or_create(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.input_dir {
        let found = discover_sequences(dir)?;
        info!("🔍 离线模式: {} 路图片序列 ({})", found.len(), dir.display());
        config.cameras.extend(found);
        // 离线回放默认使用帧序号时间
        config.clock = ClockMode::Stream;
    }
    config.cameras.extend(args.cameras.iter().cloned());
    if config.cameras.is_empty() {
        bail!("no cameras configured: use --camera NAME=URI, --input-dir or a config file");
    }

    if let Some(v) = &args.zones {
        config.zones_path = v.clone();
    }
    if let Some(v) = &args.detections {
        config.detections_path = Some(v.clone());
    }
    if let Some(v) = &args.output_dir {
        config.output_dir = v.clone();
    }
    if let Some(v) = &args.log_file {
        config.log_file = v.clone();
    }
    if let Some(v) = args.fps {
        config.fps = v;
    }
    if let Some(v) = args.workers {
        config.workers = v;
    }
    if let Some(v) = args.queue_size {
        config.queue_size = v;
    }
    if let Some(v) = &args.font {
        config.font_path = Some(v.clone());
    }
    if args.no_video {
        config.write_video = false;
    }
    if let Some(v) = args.clock {
        config.clock = v;
    }
    Ok(config)
}

/// Subdirectories become cameras named after the directory. A directory that
/// holds images itself is a single camera.
fn discover_sequences(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {:?}", dir))? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found.push((name.to_string(), path.to_string_lossy().into_owned()));
            }
        }
    }
    if found.is_empty() {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cam0")
            .to_string();
        found.push((name, dir.to_string_lossy().into_owned()));
    }
    found.sort();
    Ok(found)
}

/// 标准输入 `q` → 停止
fn spawn_quit_listener(stop: StopSignal) {
    let spawned = thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    info!("⏹️ 收到退出指令, 正在停止...");
                    stop.trigger();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
    if let Err(e) = spawned {
        warn!("⚠️ 无法监听标准输入, 只能等待视频源结束: {}", e);
    }
}
