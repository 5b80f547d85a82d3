// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 叠加绘制 (Overlay renderer)
///
/// 在分析线程中直接绘制到帧上:
/// - 区域多边形 + "Zone i: 方向" 标签
/// - 检测框 + "ID:x 类别"
/// - 轨迹线
/// - 方向箭头 (逆行红色, 正常绿色) + 方向文字
/// - 左上角车辆 / 行人计数
///
/// 文字需要字体文件; 未配置字体时只绘制几何图形
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::analysis::{Direction, DirectionArrow, Zone};
use crate::detection::{class_name, Detection, ObjectCounts, Position, PERSON_CLASS};

// ========== 颜色常量 (RGB) ==========

const ZONE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const PERSON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const VEHICLE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const TRAIL_COLOR: Rgb<u8> = Rgb([230, 230, 230]);
const WRONG_WAY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const COMPLIANT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const SUMMARY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// 箭头尖长度占箭头长度的比例
const TIP_RATIO: f32 = 0.3;

/// Per-track drawing input assembled by the worker.
#[derive(Debug, Clone)]
pub struct TrackOverlay {
    pub detection: Detection,
    pub trail: Vec<Position>,
    pub arrow: Option<DirectionArrow>,
    pub direction: Direction,
    pub wrong_way: bool,
}

#[derive(Clone, Default)]
pub struct OverlayRenderer {
    font: Option<FontArc>,
}

impl OverlayRenderer {
    /// Geometry only, no text.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// 加载 TTF/OTF 字体
    pub fn load_font<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("cannot read font {:?}", path))?;
        let font = FontArc::try_from_vec(bytes).with_context(|| format!("invalid font {:?}", path))?;
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draws zones first, then per-track boxes, trails and arrows, then the
    /// summary counts.
    pub fn draw(&self, image: &mut RgbImage, zones: &[Zone], tracks: &[TrackOverlay], counts: ObjectCounts) {
        for (i, zone) in zones.iter().enumerate() {
            self.draw_zone(image, i + 1, zone);
        }

        for track in tracks {
            self.draw_trail(image, &track.trail);
            self.draw_box(image, &track.detection);
            if let Some(arrow) = track.arrow {
                self.draw_arrow(image, track, arrow);
            }
        }

        self.text(image, &format!("Vehicles: {}", counts.vehicles), 20, 20, 32.0, SUMMARY_COLOR);
        self.text(image, &format!("Pedestrians: {}", counts.pedestrians), 20, 60, 32.0, SUMMARY_COLOR);
    }

    fn draw_zone(&self, image: &mut RgbImage, number: usize, zone: &Zone) {
        let points = &zone.polygon;
        for (i, a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            thick_line(image, *a, b, ZONE_COLOR);
        }

        let c = zone.centroid();
        let label = format!("Zone {}: {}", number, zone.allowed.as_str());
        self.text(image, &label, c.x as i32 - 50, c.y as i32, 16.0, ZONE_COLOR);
    }

    fn draw_trail(&self, image: &mut RgbImage, trail: &[Position]) {
        for pair in trail.windows(2) {
            thick_line(image, pair[0], pair[1], TRAIL_COLOR);
        }
    }

    fn draw_box(&self, image: &mut RgbImage, det: &Detection) {
        let color = if det.class_id == PERSON_CLASS {
            PERSON_COLOR
        } else {
            VEHICLE_COLOR
        };

        let (x1, y1) = (det.bbox.x1 as i32, det.bbox.y1 as i32);
        let (w, h) = (det.bbox.width().round(), det.bbox.height().round());
        // 线宽 2
        for offset in 0..2 {
            let (w, h) = (w as i32 - 2 * offset, h as i32 - 2 * offset);
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(image, Rect::at(x1 + offset, y1 + offset).of_size(w as u32, h as u32), color);
        }

        let label = format!("ID:{} {}", det.track_id, class_name(det.class_id));
        self.text(image, &label, x1, y1 - 24, 22.0, color);
    }

    fn draw_arrow(&self, image: &mut RgbImage, track: &TrackOverlay, arrow: DirectionArrow) {
        let color = if track.wrong_way {
            WRONG_WAY_COLOR
        } else {
            COMPLIANT_COLOR
        };
        let (start, end) = (arrow.start, arrow.end);
        thick_line(image, start, end, color);

        // 箭头尖: 两条与主轴成45°的短线
        let (dx, dy) = (start.x - end.x, start.y - end.y);
        let len = (dx * dx + dy * dy).sqrt();
        if len > f32::EPSILON {
            let tip = len * TIP_RATIO;
            let angle = dy.atan2(dx);
            for side in [-1.0f32, 1.0] {
                let a = angle + side * std::f32::consts::FRAC_PI_4;
                let wing = Position::new(end.x + tip * a.cos(), end.y + tip * a.sin());
                thick_line(image, end, wing, color);
            }
        }
        draw_filled_circle_mut(image, (start.x as i32, start.y as i32), 2, color);

        let mut info = format!("ID:{} {}", track.detection.track_id, track.direction.as_str());
        if track.wrong_way {
            info.push_str(" (WRONG WAY!)");
        }
        self.text(image, &info, start.x as i32, start.y as i32 - 30, 16.0, color);
    }

    fn text(&self, image: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y.max(0), PxScale::from(size), font, text);
        }
    }
}

/// 2px line: the segment plus a copy shifted by one pixel.
fn thick_line(image: &mut RgbImage, a: Position, b: Position, color: Rgb<u8>) {
    draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), color);
    let steep = (b.y - a.y).abs() > (b.x - a.x).abs();
    let (ox, oy) = if steep { (1.0, 0.0) } else { (0.0, 1.0) };
    draw_line_segment_mut(image, (a.x + ox, a.y + oy), (b.x + ox, b.y + oy), color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AllowedDirection;
    use crate::detection::BBox;

    fn square_zone() -> Zone {
        Zone::new(
            vec![
                Position::new(10.0, 10.0),
                Position::new(90.0, 10.0),
                Position::new(90.0, 90.0),
                Position::new(10.0, 90.0),
            ],
            AllowedDirection::GoingDown,
        )
    }

    fn overlay(class_id: u32, wrong_way: bool) -> TrackOverlay {
        TrackOverlay {
            detection: Detection {
                bbox: BBox::new(30.0, 30.0, 60.0, 70.0),
                track_id: 3,
                class_id,
                confidence: 0.9,
            },
            trail: vec![Position::new(45.0, 80.0), Position::new(45.0, 50.0)],
            arrow: Some(DirectionArrow {
                start: Position::new(45.0, 50.0),
                end: Position::new(45.0, 40.0),
            }),
            direction: Direction::GoingUp,
            wrong_way,
        }
    }

    #[test]
    fn test_draws_zone_and_box_without_font() {
        let renderer = OverlayRenderer::new();
        assert!(!renderer.has_font());

        let mut img = RgbImage::new(100, 100);
        renderer.draw(&mut img, &[square_zone()], &[overlay(2, false)], ObjectCounts::default());

        assert_eq!(*img.get_pixel(50, 10), ZONE_COLOR);
        assert_eq!(*img.get_pixel(10, 50), ZONE_COLOR);
        assert_eq!(*img.get_pixel(30, 35), VEHICLE_COLOR);
        // no text drawn without a font
        assert_eq!(*img.get_pixel(25, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_arrow_color_follows_verdict() {
        let renderer = OverlayRenderer::new();

        let mut img = RgbImage::new(100, 100);
        renderer.draw(&mut img, &[], &[overlay(0, true)], ObjectCounts::default());
        assert_eq!(*img.get_pixel(45, 44), WRONG_WAY_COLOR);

        let mut img = RgbImage::new(100, 100);
        renderer.draw(&mut img, &[], &[overlay(0, false)], ObjectCounts::default());
        assert_eq!(*img.get_pixel(45, 44), COMPLIANT_COLOR);
        assert_eq!(*img.get_pixel(30, 35), PERSON_COLOR);
    }

    #[test]
    fn test_degenerate_boxes_are_skipped() {
        let renderer = OverlayRenderer::new();
        let mut img = RgbImage::new(20, 20);
        let mut track = overlay(2, false);
        track.detection.bbox = BBox::new(5.0, 5.0, 5.0, 5.0);
        track.arrow = None;
        track.trail.clear();
        renderer.draw(&mut img, &[], &[track], ObjectCounts::default());
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
