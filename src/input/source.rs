// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧源接口 (Frame source interface)

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::error::{ConfigError, SourceError};

/// 支持的图片扩展名
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 视频文件扩展名 (FFmpeg 解码)
const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mkv", "mov", "m4v", "ts", "flv"];

/// 网络流协议
const STREAM_SCHEMES: [&str; 6] = ["rtsp://", "rtsps://", "rtmp://", "udp://", "http://", "https://"];

/// A camera or recording that yields RGB frames.
///
/// `read` returns `Ok(None)` once a finite source is exhausted; live sources
/// never do.
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    fn connect(&mut self) -> Result<(), SourceError>;

    fn read(&mut self) -> Result<Option<RgbImage>, SourceError>;

    fn release(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        (**self).connect()
    }

    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// 图片序列源: 按文件名排序读取目录中的图片
///
/// The read position survives `release`/`connect`, so after a reconnect the
/// sequence resumes past the frame that failed to decode.
pub struct ImageSequenceSource {
    dir: PathBuf,
    looping: bool,
    frames: Vec<PathBuf>,
    cursor: usize,
    connected: bool,
}

impl ImageSequenceSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            looping: false,
            frames: Vec::new(),
            cursor: 0,
            connected: false,
        }
    }

    /// Restart from the first frame instead of ending.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_image(path: &Path) -> bool {
    has_extension(path, &IMAGE_EXTENSIONS)
}

/// Network stream URIs (RTSP, RTMP, UDP, HTTP).
pub fn is_stream_uri(uri: &str) -> bool {
    let lower = uri.to_ascii_lowercase();
    STREAM_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// Hides the `user:password@` part of a stream URI for logging.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://").map(|i| i + 3) else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end..];
    let host_end = rest.find('/').unwrap_or(rest.len());
    match rest[..host_end].rfind('@') {
        Some(at) => format!("{}***{}", &uri[..scheme_end], &rest[at..]),
        None => uri.to_string(),
    }
}

impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.dir.display(), e)))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(SourceError::Unavailable(format!(
                "{}: no image files",
                self.dir.display()
            )));
        }

        debug!("🔍 {} 帧 ({})", frames.len(), self.dir.display());
        self.frames = frames;
        self.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.frames[self.cursor];
        self.cursor += 1;
        let img = image::open(path)
            .map_err(|e| SourceError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        Ok(Some(img.to_rgb8()))
    }

    fn release(&mut self) {
        self.connected = false;
    }
}

/// Opens a frame source from a camera URI.
///
/// Accepted forms:
/// - a directory of still frames, or `loop:<dir>` to replay one forever
/// - `rtsp://`, `rtmp://`, `udp://`, `http(s)://` streams
/// - video files (`.mp4`, `.avi`, `.mkv`, ...)
///
/// Streams and video files are decoded by FFmpeg and need the `video` feature.
pub fn open_source(uri: &str) -> Result<Box<dyn FrameSource>, ConfigError> {
    let (looping, path) = match uri.strip_prefix("loop:") {
        Some(rest) => (true, rest),
        None => (false, uri),
    };

    let dir = Path::new(path);
    if dir.is_dir() {
        return Ok(Box::new(ImageSequenceSource::new(dir).looping(looping)));
    }
    if !looping && (is_stream_uri(uri) || has_extension(dir, &VIDEO_EXTENSIONS)) {
        return open_video(uri);
    }
    Err(ConfigError::UnsupportedSource(redact_uri(uri)))
}

#[cfg(feature = "video")]
fn open_video(uri: &str) -> Result<Box<dyn FrameSource>, ConfigError> {
    Ok(Box::new(super::decoder::FfmpegSource::new(uri)))
}

#[cfg(not(feature = "video"))]
fn open_video(uri: &str) -> Result<Box<dyn FrameSource>, ConfigError> {
    Err(ConfigError::UnsupportedSource(format!(
        "{} (streams and video files need the `video` feature)",
        redact_uri(uri)
    )))
}
