// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 叠加视频编码 (FFmpeg): `<root>/overlay_<camera>.mp4`
//!
//! Frames are staged as JPEGs next to the output and encoded into one video
//! at the configured frame rate when the writer is released.

use std::fs;
use std::path::{Path, PathBuf};

use ez_ffmpeg::{FfmpegContext, Input};
use image::RgbImage;
use tracing::info;

use super::sink::{FrameDirWriter, VideoWriter, WriterFactory};
use crate::error::SinkError;

pub struct VideoFileWriter {
    frames: FrameDirWriter,
    staging: PathBuf,
    output: PathBuf,
    fps: f64,
    finished: bool,
}

impl VideoFileWriter {
    pub fn create<P: AsRef<Path>>(root: P, camera: &str, width: u32, height: u32, fps: f64) -> Result<Self, SinkError> {
        let root = root.as_ref();
        let staging = root.join(format!(".overlay_{}.frames", camera));
        // frames left by an interrupted run
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        Ok(Self {
            frames: FrameDirWriter::create_in(&staging, width, height)?,
            staging,
            output: root.join(format!("overlay_{}.mp4", camera)),
            fps,
            finished: false,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Factory writing every camera under `root` at `fps`.
    pub fn factory<P: Into<PathBuf>>(root: P, fps: f64) -> WriterFactory {
        let root = root.into();
        Box::new(move |camera: &str, width: u32, height: u32| {
            let writer = VideoFileWriter::create(&root, camera, width, height, fps)?;
            Ok(Box::new(writer) as Box<dyn VideoWriter>)
        })
    }
}

impl VideoWriter for VideoFileWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        self.frames.write(frame)
    }

    fn release(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.frames.release()?;

        let frames = self.frames.written();
        if frames > 0 {
            encode(&self.staging, &self.output, self.fps)?;
            info!("🎞️ {} 帧编码为 {} ({} fps)", frames, self.output.display(), self.fps);
        }
        fs::remove_dir_all(&self.staging)?;
        Ok(())
    }
}

/// `<staging>/%06d.jpg` → H.264/MPEG-4 in `output`, yuv420p.
fn encode(staging: &Path, output: &Path, fps: f64) -> Result<(), SinkError> {
    let pattern = staging.join("%06d.jpg").to_string_lossy().into_owned();
    let target = output.to_string_lossy().into_owned();
    let input = Input::new(pattern).set_input_opts([("framerate", fps.to_string())].into());

    FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(target.as_str())
        .build()
        .and_then(|ctx| ctx.start())
        .and_then(|sch| sch.wait())
        .map_err(|e| SinkError::Encode(format!("{}: {}", output.display(), e)))
}
