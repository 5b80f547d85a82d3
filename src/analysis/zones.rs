// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 区域索引 (Zone index)
//!
//! Polygon zones per camera, each with the direction of travel it allows.
//! Loaded once at startup, then shared read-only between worker threads.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::Position;
use crate::error::ConfigError;

/// 区域允许的通行方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedDirection {
    GoingUp,
    GoingDown,
    Any,
}

impl AllowedDirection {
    /// Zone files use the short tokens `up`, `down` and `any`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "up" | "going_up" => Some(Self::GoingUp),
            "down" | "going_down" => Some(Self::GoingDown),
            "any" | "" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoingUp => "going_up",
            Self::GoingDown => "going_down",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub polygon: Vec<Position>,
    pub allowed: AllowedDirection,
}

impl Zone {
    pub fn new(polygon: Vec<Position>, allowed: AllowedDirection) -> Self {
        Self { polygon, allowed }
    }

    pub fn contains(&self, point: Position) -> bool {
        point_in_polygon(point, &self.polygon)
    }

    /// Vertex average, used to place the zone label.
    pub fn centroid(&self) -> Position {
        let n = self.polygon.len().max(1) as f32;
        let (sx, sy) = self
            .polygon
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Position::new(sx / n, sy / n)
    }
}

/// One zone entry as written in the zone file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub points: Vec<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

/// Zone file layout: camera id → zones.
pub type ZoneFile = HashMap<String, Vec<ZoneSpec>>;

#[derive(Debug, Clone, Default)]
pub struct ZoneIndex {
    zones: HashMap<String, Arc<[Zone]>>,
}

impl ZoneIndex {
    /// 从JSON文件加载区域配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ZoneFile = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::from_specs(file)?;
        info!(
            "✅ 区域配置已从 {:?} 加载: {} 路摄像头, {} 个区域",
            path,
            index.zones.len(),
            index.zone_count()
        );
        Ok(index)
    }

    pub fn from_specs(file: ZoneFile) -> Result<Self, ConfigError> {
        let mut zones = HashMap::with_capacity(file.len());
        for (camera, specs) in file {
            let mut parsed = Vec::with_capacity(specs.len());
            for (index, spec) in specs.into_iter().enumerate() {
                if spec.points.len() < 3 {
                    return Err(ConfigError::InvalidZone {
                        camera,
                        index,
                        reason: format!("polygon needs at least 3 points, got {}", spec.points.len()),
                    });
                }
                if spec.points.iter().flatten().any(|v| !v.is_finite()) {
                    return Err(ConfigError::InvalidZone {
                        camera,
                        index,
                        reason: "polygon has a non-finite coordinate".to_string(),
                    });
                }
                let token = spec.direction.unwrap_or_default();
                let allowed = match AllowedDirection::from_token(&token) {
                    Some(a) => a,
                    None => return Err(ConfigError::UnknownDirection { camera, token }),
                };
                let polygon = spec
                    .points
                    .iter()
                    .map(|[x, y]| Position::new(*x, *y))
                    .collect();
                parsed.push(Zone::new(polygon, allowed));
            }
            zones.insert(camera, Arc::from(parsed));
        }
        Ok(Self { zones })
    }

    pub fn insert(&mut self, camera: impl Into<String>, zones: Vec<Zone>) {
        self.zones.insert(camera.into(), Arc::from(zones));
    }

    /// Zones for a camera in file order; empty when none are configured.
    pub fn zones_for(&self, camera: &str) -> Arc<[Zone]> {
        self.zones
            .get(camera)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn cameras(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    pub fn zone_count(&self) -> usize {
        self.zones.values().map(|z| z.len()).sum()
    }
}

/// Ray casting with the half-open scanline rule. A point exactly on an edge
/// may land on either side.
pub fn point_in_polygon(point: Position, polygon: &[Position]) -> bool {
    let n = polygon.len();
    if n == 0 {
        return false;
    }
    let (x, y) = (point.x, point.y);
    let mut inside = false;
    let mut p1 = polygon[0];

    for i in 1..=n {
        let p2 = polygon[i % n];
        if y > p1.y.min(p2.y) && y <= p1.y.max(p2.y) && x <= p1.x.max(p2.x) {
            // the y bounds above exclude horizontal edges
            let crosses = if p1.x == p2.x {
                true
            } else {
                let x_inters = (y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
                x <= x_inters
            };
            if crosses {
                inside = !inside;
            }
        }
        p1 = p2;
    }
    inside
}
