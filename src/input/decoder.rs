// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! FFmpeg 拉流解码 (RTSP 流 / 视频文件 → RgbImage)
//!
//! Each connection runs one FFmpeg context on its own thread. A frame filter
//! at the end of the graph copies every decoded `rgb24` frame into a small
//! channel that [`FfmpegSource::read`] pulls from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::source::{is_stream_uri, redact_uri, FrameSource};
use crate::error::SourceError;

/// 解码缓冲帧数
const FRAME_BUFFER: usize = 4;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// RTSP/RTMP/HTTP streams and video files decoded through FFmpeg.
///
/// Live streams keep only the newest frames when the reader falls behind and
/// report a lost connection as a read failure. Files hand over every frame
/// and end with `Ok(None)`.
pub struct FfmpegSource {
    uri: String,
    live: bool,
    read_timeout: Duration,
    frames: Option<Receiver<RgbImage>>,
    open: Arc<AtomicBool>,
}

impl FfmpegSource {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            live: is_stream_uri(&uri),
            uri,
            read_timeout: READ_TIMEOUT,
            frames: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// How long `read` waits for the next frame before failing.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn is_live(&self) -> bool {
        self.live
    }
}

impl FrameSource for FfmpegSource {
    fn describe(&self) -> String {
        let kind = if self.live { "stream" } else { "video file" };
        format!("ffmpeg {} {}", kind, redact_uri(&self.uri))
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        self.release();

        let (tx, rx) = crossbeam_channel::bounded(FRAME_BUFFER);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let open = Arc::new(AtomicBool::new(true));
        let forward = RgbForward {
            evict: self.live.then(|| rx.clone()),
            tx: Some(tx),
            open: open.clone(),
            forwarded: 0,
        };

        let uri = self.uri.clone();
        thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || decode(&uri, forward, ready_tx))
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", redact_uri(&self.uri), e)))?;

        match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => {
                self.frames = Some(rx);
                self.open = open;
                Ok(())
            }
            Ok(Err(e)) => Err(SourceError::Unavailable(format!("{}: {}", redact_uri(&self.uri), e))),
            Err(_) => {
                open.store(false, Ordering::Relaxed);
                Err(SourceError::Unavailable(format!(
                    "{}: no answer within {:?}",
                    redact_uri(&self.uri),
                    CONNECT_TIMEOUT
                )))
            }
        }
    }

    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let frames = self.frames.as_ref().ok_or(SourceError::NotConnected)?;
        match frames.recv_timeout(self.read_timeout) {
            Ok(image) => Ok(Some(image)),
            Err(RecvTimeoutError::Timeout) => Err(SourceError::ReadFailed(format!(
                "no frame within {:?}",
                self.read_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) if self.live => {
                Err(SourceError::ReadFailed("stream closed by the decoder".into()))
            }
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn release(&mut self) {
        // the filter sees the flag on its next frame and stops the context
        self.open.store(false, Ordering::Relaxed);
        self.frames = None;
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// Runs one FFmpeg context to completion. The outcome of opening the input is
/// reported through `ready` before any frame is decoded.
fn decode(uri: &str, forward: RgbForward, ready: Sender<Result<(), String>>) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb", Box::new(forward));
    let out = create_null_output().add_frame_pipeline(pipe);

    let input = if uri.starts_with("rtsp") {
        Input::new(uri).set_input_opts(
            [
                ("rtsp_transport", "tcp"),
                ("buffer_size", "67108864"),
                ("rtsp_flags", "prefer_tcp"),
            ]
            .into(),
        )
    } else {
        Input::new(uri)
    };

    let started = FfmpegContext::builder()
        .input(input)
        .filter_desc("format=rgb24")
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))
        .and_then(|ctx| ctx.start().map_err(|e| format!("启动失败: {}", e)));

    match started {
        Ok(sch) => {
            let _ = ready.send(Ok(()));
            match sch.wait() {
                Ok(()) => debug!("解码结束: {}", redact_uri(uri)),
                Err(e) => debug!("解码中止: {}: {}", redact_uri(uri), e),
            }
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

/// 帧过滤器: 解码帧 → RgbImage → channel
struct RgbForward {
    tx: Option<Sender<RgbImage>>,
    /// receiver clone for live streams, used to drop the oldest frame
    evict: Option<Receiver<RgbImage>>,
    open: Arc<AtomicBool>,
    forwarded: u64,
}

impl RgbForward {
    fn forward(&mut self, image: RgbImage) -> Result<(), String> {
        let tx = self.tx.as_ref().ok_or("decoder already finished")?;
        match &self.evict {
            Some(evict) => {
                let mut image = image;
                loop {
                    match tx.try_send(image) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => {
                            image = back;
                            let _ = evict.try_recv();
                        }
                        Err(TrySendError::Disconnected(_)) => return Err("frame reader gone".into()),
                    }
                }
            }
            None => tx.send(image).map_err(|_| "frame reader gone".to_string())?,
        }
        self.forwarded += 1;
        Ok(())
    }
}

impl FrameFilter for RgbForward {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(&mut self, frame: Frame, _ctx: &FrameFilterContext) -> Result<Option<Frame>, String> {
        if !self.open.load(Ordering::Relaxed) {
            return Err("source released".into());
        }
        match rgb_image(&frame) {
            Some(image) => self.forward(image)?,
            None => warn!("⚠️ 跳过无法转换的帧"),
        }
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!("解码线程退出: {} 帧", self.forwarded);
        self.tx = None;
        self.evict = None;
    }
}

/// Copies a packed `rgb24` frame row by row, skipping the line padding.
fn rgb_image(frame: &Frame) -> Option<RgbImage> {
    // SAFETY: the graph ends in `format=rgb24`, so plane 0 holds `height`
    // rows of `width * 3` bytes spaced `linesize[0]` apart.
    unsafe {
        let av = frame.as_ptr();
        if av.is_null() {
            return None;
        }
        let (width, height) = ((*av).width, (*av).height);
        let stride = (*av).linesize[0];
        let data = (*av).data[0];
        if data.is_null() || width <= 0 || height <= 0 || stride < width * 3 {
            return None;
        }

        let row = width as usize * 3;
        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let line = data.add(y * stride as usize);
            pixels.extend_from_slice(std::slice::from_raw_parts(line, row));
        }
        RgbImage::from_raw(width as u32, height as u32, pixels)
    }
}
