// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 运行参数 (Pipeline configuration)
///
/// JSON 文件 + 命令行覆盖, 缺省字段使用默认值
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::DEFAULT_MAX_TRACK_LENGTH;
use crate::detection::{class_id, class_name, DetectParams, DEFAULT_CLASSES};
use crate::error::ConfigError;
use crate::input::{ClockMode, IngestSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 摄像头名称 → 视频源
    pub cameras: BTreeMap<String, String>,
    /// 区域配置文件
    pub zones_path: PathBuf,
    /// 检测回放文件
    pub detections_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// 违规日志
    pub log_file: PathBuf,
    pub write_video: bool,
    /// 叠加文字字体 (TTF/OTF)
    pub font_path: Option<PathBuf>,

    // ========== 采集 ==========
    pub fps: f64,
    pub queue_size: usize,
    pub reconnect_backoff_secs: f64,
    pub clock: ClockMode,

    // ========== 分析 ==========
    pub workers: usize,
    pub max_track_length: usize,
    pub arrow_scale: f32,
    pub track_ttl_frames: Option<u64>,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    /// 类别名称或数字ID
    pub classes: Vec<String>,

    // ========== 线程 ==========
    pub pop_timeout_secs: f64,
    pub sink_timeout_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cameras: BTreeMap::new(),
            zones_path: PathBuf::from("polygons.json"),
            detections_path: None,
            output_dir: PathBuf::from("output_videos"),
            log_file: PathBuf::from("violations.json"),
            write_video: true,
            font_path: None,
            fps: 15.0,
            queue_size: 10,
            reconnect_backoff_secs: 2.0,
            clock: ClockMode::Wall,
            workers: 1,
            max_track_length: DEFAULT_MAX_TRACK_LENGTH,
            arrow_scale: 3.0,
            track_ttl_frames: None,
            conf_threshold: 0.3,
            iou_threshold: 0.5,
            classes: DEFAULT_CLASSES.iter().map(|&c| class_name(c)).collect(),
            pop_timeout_secs: 2.0,
            sink_timeout_secs: 5.0,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("✅ 配置已从 {:?} 加载", path);
        Ok(config)
    }

    /// Loads `path`, or writes the defaults there when it does not exist yet.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        info!("📝 配置文件不存在, 创建默认配置 {:?}", path);
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, json).map_err(io_err)?;
        info!("💾 配置已保存到 {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(self.fps.is_finite() && self.fps > 0.0) {
            return invalid("fps must be positive");
        }
        if self.queue_size == 0 {
            return invalid("queue_size must be at least 1");
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.max_track_length < 2 {
            return invalid("max_track_length must be at least 2");
        }
        if !(self.arrow_scale.is_finite() && self.arrow_scale > 0.0) {
            return invalid("arrow_scale must be positive");
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) || !(0.0..=1.0).contains(&self.iou_threshold) {
            return invalid("conf_threshold and iou_threshold must lie in [0, 1]");
        }
        if !(self.reconnect_backoff_secs.is_finite() && self.reconnect_backoff_secs >= 0.0) {
            return invalid("reconnect_backoff_secs must be non-negative");
        }
        // a zero poll timeout turns the idle worker and sink loops into busy loops
        for secs in [self.pop_timeout_secs, self.sink_timeout_secs] {
            if !(secs.is_finite() && secs > 0.0) {
                return invalid("pop_timeout_secs and sink_timeout_secs must be positive");
            }
        }
        self.class_ids()?;
        Ok(())
    }

    pub fn class_ids(&self) -> Result<Vec<u32>, ConfigError> {
        self.classes
            .iter()
            .map(|name| class_id(name).ok_or_else(|| ConfigError::UnknownClass(name.clone())))
            .collect()
    }

    pub fn detect_params(&self) -> Result<DetectParams, ConfigError> {
        Ok(DetectParams {
            conf: self.conf_threshold,
            iou: self.iou_threshold,
            classes: self.class_ids()?,
        })
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            fps: self.fps,
            backoff: secs(self.reconnect_backoff_secs),
            clock: self.clock,
        }
    }

    pub fn pop_timeout(&self) -> Duration {
        secs(self.pop_timeout_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        secs(self.sink_timeout_secs)
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前配置:");
        info!("  摄像头: {:?}", self.cameras.keys().collect::<Vec<_>>());
        info!("  帧率: {} fps, 队列: {}, 分析线程: {}", self.fps, self.queue_size, self.workers);
        info!(
            "  轨迹长度: {}, 箭头缩放: {}, 过期帧数: {:?}",
            self.max_track_length, self.arrow_scale, self.track_ttl_frames
        );
        info!(
            "  置信度: {:.2}, IOU: {:.2}, 类别: {:?}",
            self.conf_threshold, self.iou_threshold, self.classes
        );
        info!("  时钟: {:?}, 重连间隔: {}s", self.clock, self.reconnect_backoff_secs);
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
