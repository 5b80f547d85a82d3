// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 违规记录与日志 (Violation records and the run's violation log)

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    WrongWay,
}

/// Serialized as `{camera, timestamp, error, track_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub camera: String,
    /// seconds
    pub timestamp: f64,
    pub error: ViolationKind,
    pub track_id: u32,
}

impl Violation {
    pub fn wrong_way(camera: &str, timestamp: f64, track_id: u32) -> Self {
        Self {
            camera: camera.to_string(),
            timestamp,
            error: ViolationKind::WrongWay,
            track_id,
        }
    }
}

/// Append-only log for one pipeline run. Owned by a single thread (the sink);
/// `flush` consumes it, so it is written at most once.
#[derive(Debug, Default)]
pub struct ViolationLog {
    records: Vec<Violation>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, violation: Violation) {
        self.records.push(violation);
    }

    pub fn extend<I: IntoIterator<Item = Violation>>(&mut self, violations: I) {
        self.records.extend(violations);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the log as a pretty JSON array and hands the records back.
    pub fn flush<P: AsRef<Path>>(self, path: P) -> Result<Vec<Violation>, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(path, json)?;
        Ok(self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_wire_format() {
        let v = Violation::wrong_way("cam1", 12.5, 7);
        let value = serde_json::to_value(&v).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "camera": "cam1",
                "timestamp": 12.5,
                "error": "wrong_way",
                "track_id": 7
            })
        );
    }

    #[test]
    fn test_flush_writes_json_array() {
        let dir = std::env::temp_dir().join(format!("wrongway-log-{}", std::process::id()));
        let path = dir.join("nested").join("violations.json");

        let mut log = ViolationLog::new();
        log.append(Violation::wrong_way("cam1", 1.0, 1));
        log.extend(vec![
            Violation::wrong_way("cam2", 2.0, 5),
            Violation::wrong_way("cam1", 3.0, 1),
        ]);
        assert_eq!(log.len(), 3);

        let written = log.flush(&path).unwrap();
        assert_eq!(written.len(), 3);

        let back: Vec<Violation> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, written);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
