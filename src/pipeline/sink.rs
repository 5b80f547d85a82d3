// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输出线程 (Sink)
//!
//! Sole owner of the per-camera writers and of the violation log. Runs until
//! every worker has dropped its sender, then flushes the log once.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::AnalyzedFrame;
use crate::error::SinkError;
use crate::violation::{Violation, ViolationLog};

/// Per-camera video output.
pub trait VideoWriter: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

    fn release(&mut self) -> Result<(), SinkError>;
}

/// Creates the writer for `(camera, width, height)` on the camera's first frame.
pub type WriterFactory = Box<dyn FnMut(&str, u32, u32) -> anyhow::Result<Box<dyn VideoWriter>> + Send>;

/// 逐帧写 JPEG: `<root>/overlay_<camera>/000000.jpg, 000001.jpg, ...`
pub struct FrameDirWriter {
    dir: PathBuf,
    size: (u32, u32),
    next: u64,
}

impl FrameDirWriter {
    pub fn create<P: AsRef<Path>>(root: P, camera: &str, width: u32, height: u32) -> Result<Self, SinkError> {
        Self::create_in(root.as_ref().join(format!("overlay_{}", camera)), width, height)
    }

    /// Writes straight into `dir`.
    pub fn create_in<P: Into<PathBuf>>(dir: P, width: u32, height: u32) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            size: (width, height),
            next: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.next
    }

    /// Factory writing every camera under `root`.
    pub fn factory<P: Into<PathBuf>>(root: P) -> WriterFactory {
        let root = root.into();
        Box::new(move |camera: &str, width: u32, height: u32| {
            let writer = FrameDirWriter::create(&root, camera, width, height)?;
            Ok(Box::new(writer) as Box<dyn VideoWriter>)
        })
    }
}

impl VideoWriter for FrameDirWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        let got = frame.dimensions();
        if got != self.size {
            return Err(SinkError::FrameSize {
                expected: self.size,
                got,
            });
        }
        frame.save(self.dir.join(format!("{:06}.jpg", self.next)))?;
        self.next += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<(), SinkError> {
        debug!("{} 帧写入 {}", self.next, self.dir.display());
        Ok(())
    }
}

/// 输出统计
#[derive(Debug, Clone, Default)]
pub struct SinkReport {
    /// frames received per camera, in camera order
    pub frames: BTreeMap<String, u64>,
    pub frames_written: u64,
    /// cameras whose writer failed and was turned off
    pub disabled_cameras: Vec<String>,
    pub violations: Vec<Violation>,
    pub log_path: PathBuf,
}

enum WriterSlot {
    Active(Box<dyn VideoWriter>),
    Disabled,
}

pub struct Sink {
    factory: Option<WriterFactory>,
    writers: HashMap<String, WriterSlot>,
    log: ViolationLog,
    log_path: PathBuf,
    recv_timeout: Duration,
    report: SinkReport,
}

impl Sink {
    /// `factory = None` turns video output off; the log is still written.
    pub fn new<P: Into<PathBuf>>(factory: Option<WriterFactory>, log_path: P) -> Self {
        Self {
            factory,
            writers: HashMap::new(),
            log: ViolationLog::new(),
            log_path: log_path.into(),
            recv_timeout: Duration::from_secs(5),
            report: SinkReport::default(),
        }
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn consume(&mut self, frame: AnalyzedFrame) {
        *self.report.frames.entry(frame.camera.clone()).or_default() += 1;
        for v in &frame.violations {
            warn!(camera = %v.camera, track_id = v.track_id, "🚨 逆行: t={:.3}", v.timestamp);
        }
        self.log.extend(frame.violations);

        let Some(factory) = self.factory.as_mut() else {
            return;
        };

        if !self.writers.contains_key(&frame.camera) {
            let (w, h) = frame.image.dimensions();
            let slot = match factory(&frame.camera, w, h) {
                Ok(writer) => {
                    info!(camera = %frame.camera, "🎬 输出已创建 ({}x{})", w, h);
                    WriterSlot::Active(writer)
                }
                Err(e) => {
                    error!(camera = %frame.camera, "❌ 无法创建输出, 该摄像头不再写出: {:#}", e);
                    self.report.disabled_cameras.push(frame.camera.clone());
                    WriterSlot::Disabled
                }
            };
            self.writers.insert(frame.camera.clone(), slot);
        }

        let Some(WriterSlot::Active(writer)) = self.writers.get_mut(&frame.camera) else {
            return;
        };
        match writer.write(&frame.image) {
            Ok(()) => self.report.frames_written += 1,
            Err(e) => {
                error!(camera = %frame.camera, "❌ 写帧失败, 该摄像头不再写出: {}", e);
                if let Err(e) = writer.release() {
                    warn!(camera = %frame.camera, "⚠️ 释放输出失败: {}", e);
                }
                self.writers.insert(frame.camera.clone(), WriterSlot::Disabled);
                self.report.disabled_cameras.push(frame.camera);
            }
        }
    }

    /// Drains `results` until every sender is gone, releases the writers and
    /// writes the violation log.
    pub fn run(mut self, results: Receiver<AnalyzedFrame>) -> Result<SinkReport, SinkError> {
        loop {
            match results.recv_timeout(self.recv_timeout) {
                Ok(frame) => self.consume(frame),
                Err(RecvTimeoutError::Timeout) => debug!("输出线程空闲"),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.finish()
    }

    fn finish(mut self) -> Result<SinkReport, SinkError> {
        for (camera, slot) in self.writers.drain() {
            if let WriterSlot::Active(mut writer) = slot {
                if let Err(e) = writer.release() {
                    warn!(camera = %camera, "⚠️ 释放输出失败: {}", e);
                }
            }
        }

        let mut report = self.report;
        report.violations = self.log.flush(&self.log_path)?;
        report.log_path = self.log_path;
        info!(
            "✅ 违规日志已写入 {:?}: {} 条",
            report.log_path,
            report.violations.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ObjectCounts;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        frames: Vec<(String, u64)>,
        released: Vec<String>,
    }

    struct MemoryWriter {
        camera: String,
        fail_after: Option<usize>,
        written: usize,
        log: Arc<Mutex<Recorded>>,
    }

    impl VideoWriter for MemoryWriter {
        fn write(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
            if self.fail_after == Some(self.written) {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            self.written += 1;
            let marker = frame.get_pixel(0, 0).0[0] as u64;
            self.log.lock().unwrap().frames.push((self.camera.clone(), marker));
            Ok(())
        }

        fn release(&mut self) -> Result<(), SinkError> {
            self.log.lock().unwrap().released.push(self.camera.clone());
            Ok(())
        }
    }

    fn memory_factory(log: Arc<Mutex<Recorded>>, failing: &'static str) -> WriterFactory {
        Box::new(move |camera: &str, _: u32, _: u32| {
            Ok(Box::new(MemoryWriter {
                camera: camera.to_string(),
                fail_after: (camera == failing).then_some(1),
                written: 0,
                log: log.clone(),
            }) as Box<dyn VideoWriter>)
        })
    }

    fn analyzed(camera: &str, index: u8, violations: Vec<Violation>) -> AnalyzedFrame {
        AnalyzedFrame {
            camera: camera.to_string(),
            image: RgbImage::from_pixel(4, 4, image::Rgb([index, 0, 0])),
            timestamp: index as f64,
            frame_index: index as u64,
            violations,
            counts: ObjectCounts::default(),
        }
    }

    fn temp_log(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("wrongway-sink-{}-{}", tag, std::process::id()))
            .join("violations.json")
    }

    #[test]
    fn test_sink_orders_frames_and_flushes_once() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let path = temp_log("order");
        let sink = Sink::new(Some(memory_factory(recorded.clone(), "none")), &path)
            .with_recv_timeout(Duration::from_millis(10));

        let (tx, rx) = crossbeam_channel::bounded(16);
        tx.send(analyzed("cam1", 0, vec![])).unwrap();
        tx.send(analyzed("cam2", 0, vec![])).unwrap();
        tx.send(analyzed("cam1", 1, vec![Violation::wrong_way("cam1", 1.0, 4)])).unwrap();
        tx.send(analyzed("cam1", 2, vec![])).unwrap();
        drop(tx);

        let report = sink.run(rx).unwrap();
        assert_eq!(report.frames["cam1"], 3);
        assert_eq!(report.frames["cam2"], 1);
        assert_eq!(report.frames_written, 4);
        assert_eq!(report.violations, vec![Violation::wrong_way("cam1", 1.0, 4)]);

        let rec = recorded.lock().unwrap();
        let cam1: Vec<u64> = rec.frames.iter().filter(|(c, _)| c == "cam1").map(|(_, i)| *i).collect();
        assert_eq!(cam1, vec![0, 1, 2]);
        assert_eq!(rec.released.len(), 2);

        let on_disk: Vec<Violation> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, report.violations);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_writer_failure_disables_only_that_camera() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let path = temp_log("fail");
        let mut sink = Sink::new(Some(memory_factory(recorded.clone(), "cam2")), &path);

        for i in 0..3 {
            sink.consume(analyzed("cam1", i, vec![]));
            sink.consume(analyzed("cam2", i, vec![Violation::wrong_way("cam2", i as f64, 1)]));
        }
        let report = sink.finish().unwrap();

        assert_eq!(report.disabled_cameras, vec!["cam2".to_string()]);
        assert_eq!(report.frames_written, 4);
        // violations are still logged for the disabled camera
        assert_eq!(report.violations.len(), 3);
        let rec = recorded.lock().unwrap();
        assert_eq!(rec.frames.iter().filter(|(c, _)| c == "cam2").count(), 1);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_no_factory_still_writes_log() {
        let path = temp_log("novideo");
        let mut sink = Sink::new(None, &path);
        sink.consume(analyzed("cam1", 0, vec![Violation::wrong_way("cam1", 0.0, 2)]));
        let report = sink.finish().unwrap();
        assert_eq!(report.frames_written, 0);
        assert!(path.exists());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_frame_dir_writer() {
        let root = std::env::temp_dir().join(format!("wrongway-frames-{}", std::process::id()));
        let mut factory = FrameDirWriter::factory(&root);
        let mut writer = factory("cam1", 4, 4).unwrap();

        writer.write(&RgbImage::new(4, 4)).unwrap();
        writer.write(&RgbImage::new(4, 4)).unwrap();
        assert!(matches!(
            writer.write(&RgbImage::new(8, 4)),
            Err(SinkError::FrameSize { .. })
        ));
        writer.release().unwrap();

        let staged = FrameDirWriter::create_in(root.join("staged"), 4, 4).unwrap();
        assert_eq!(staged.written(), 0);

        assert!(root.join("overlay_cam1").join("000000.jpg").exists());
        assert!(root.join("overlay_cam1").join("000001.jpg").exists());
        let _ = fs::remove_dir_all(&root);
    }
}
