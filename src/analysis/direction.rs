// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 方向判定 (Direction engine)
//!
//! Direction is inferred from the vertical displacement between the oldest
//! and newest retained sample only, so a capped history measures it over a
//! sliding window. The arrow shown on screen is frozen the first time a track
//! fills its history so it does not jitter while that window slides.

use std::collections::HashMap;

use super::zones::{AllowedDirection, Zone};
use crate::detection::Position;

/// 运动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    GoingUp,
    GoingDown,
    Stationary,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoingUp => "going_up",
            Self::GoingDown => "going_down",
            Self::Stationary => "stationary",
        }
    }
}

impl AllowedDirection {
    /// A stationary object is only compliant in an `any` zone.
    pub fn permits(&self, direction: Direction) -> bool {
        match self {
            Self::Any => true,
            Self::GoingUp => direction == Direction::GoingUp,
            Self::GoingDown => direction == Direction::GoingDown,
        }
    }
}

/// 方向箭头 (start = 当前位置)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionArrow {
    pub start: Position,
    pub end: Position,
}

/// Direction from the first and last samples, plus the displacement angle in
/// degrees. The angle is for display only.
pub fn movement_direction(history: &[Position]) -> (Direction, f32) {
    let (Some(first), Some(last)) = (history.first(), history.last()) else {
        return (Direction::Stationary, 0.0);
    };
    if history.len() < 2 {
        return (Direction::Stationary, 0.0);
    }

    let dx = last.x - first.x;
    let dy = last.y - first.y;
    let angle = dy.atan2(dx).to_degrees();

    let direction = if last.y > first.y {
        Direction::GoingDown
    } else if last.y < first.y {
        Direction::GoingUp
    } else {
        Direction::Stationary
    };
    (direction, angle)
}

/// Tests the current position against the camera's zones in order; the first
/// zone containing it decides. Objects outside every zone are never flagged.
pub fn check_against_flow<'z>(history: &[Position], zones: &'z [Zone]) -> (bool, Option<&'z Zone>) {
    let Some(current) = history.last() else {
        return (false, None);
    };
    if history.len() < 2 {
        return (false, None);
    }

    let (direction, _) = movement_direction(history);
    match zones.iter().find(|zone| zone.contains(*current)) {
        Some(zone) => (!zone.allowed.permits(direction), Some(zone)),
        None => (false, None),
    }
}

#[derive(Debug, Clone, Default)]
struct ArrowState {
    frozen: Option<DirectionArrow>,
    last_len: usize,
}

/// Per-camera arrow buffer.
#[derive(Debug, Clone)]
pub struct DirectionEngine {
    max_len: usize,
    arrow_scale: f32,
    arrows: HashMap<u32, ArrowState>,
}

impl DirectionEngine {
    pub fn new(max_len: usize, arrow_scale: f32) -> Self {
        Self {
            max_len: max_len.max(1),
            arrow_scale: if arrow_scale > 0.0 { arrow_scale } else { 1.0 },
            arrows: HashMap::new(),
        }
    }

    /// Arrow from the newest point along the oldest→newest vector, scaled
    /// down by `arrow_scale`.
    ///
    /// Below the cap the arrow is recomputed on every call and never cached.
    /// On the call where the history first reaches the cap the arrow is
    /// computed and frozen; from then on the frozen arrow is returned (or
    /// computed and frozen if none could be produced at that moment).
    pub fn direction_arrow(&mut self, history: &[Position], track_id: u32) -> Option<DirectionArrow> {
        let len = history.len();
        let state = self.arrows.entry(track_id).or_default();
        let prev_len = std::mem::replace(&mut state.last_len, len);

        if len < 2 {
            return None;
        }

        if len < self.max_len {
            return scaled_arrow(history, self.arrow_scale);
        }

        let first_reach = prev_len < self.max_len;
        if first_reach {
            let arrow = scaled_arrow(history, self.arrow_scale);
            if arrow.is_some() {
                state.frozen = arrow;
            }
            return arrow;
        }

        if state.frozen.is_none() {
            state.frozen = scaled_arrow(history, self.arrow_scale);
        }
        state.frozen
    }

    /// Clears the frozen arrow so the next call starts over.
    pub fn reset_arrow(&mut self, track_id: u32) {
        if let Some(state) = self.arrows.get_mut(&track_id) {
            state.frozen = None;
        }
    }

    /// Drops all arrow state for a track that left the store.
    pub fn forget(&mut self, track_id: u32) {
        self.arrows.remove(&track_id);
    }

    pub fn cached_arrow(&self, track_id: u32) -> Option<DirectionArrow> {
        self.arrows.get(&track_id).and_then(|s| s.frozen)
    }
}

fn scaled_arrow(history: &[Position], scale: f32) -> Option<DirectionArrow> {
    let (first, last) = (history.first()?, history.last()?);
    let dx = last.x - first.x;
    let dy = last.y - first.y;
    let length = (dx * dx + dy * dy).sqrt();
    if length <= 0.0 {
        return None;
    }

    // length / scale along the unit vector is just the vector divided by scale
    Some(DirectionArrow {
        start: *last,
        end: Position::new(last.x + dx / scale, last.y + dy / scale),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(from: (f32, f32), to: (f32, f32), steps: usize) -> Vec<Position> {
        (0..steps)
            .map(|i| {
                let t = i as f32 / (steps - 1) as f32;
                Position::new(from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t)
            })
            .collect()
    }

    fn cam1_zone(allowed: AllowedDirection) -> Vec<Zone> {
        vec![Zone::new(
            vec![
                Position::new(0.0, 0.0),
                Position::new(100.0, 0.0),
                Position::new(100.0, 100.0),
                Position::new(0.0, 100.0),
            ],
            allowed,
        )]
    }

    #[test]
    fn test_movement_direction_basic() {
        assert_eq!(movement_direction(&[]).0, Direction::Stationary);
        assert_eq!(
            movement_direction(&[Position::new(1.0, 1.0)]),
            (Direction::Stationary, 0.0)
        );

        let (dir, angle) = movement_direction(&line((50.0, 10.0), (50.0, 90.0), 10));
        assert_eq!(dir, Direction::GoingDown);
        assert!((angle - 90.0).abs() < 1e-4);

        let (dir, angle) = movement_direction(&line((50.0, 90.0), (50.0, 10.0), 10));
        assert_eq!(dir, Direction::GoingUp);
        assert!((angle + 90.0).abs() < 1e-4);

        let (dir, _) = movement_direction(&line((10.0, 40.0), (90.0, 40.0), 5));
        assert_eq!(dir, Direction::Stationary);
    }

    #[test]
    fn test_movement_direction_depends_on_endpoints_only() {
        let first = Position::new(10.0, 10.0);
        let last = Position::new(20.0, 50.0);
        let base = movement_direction(&[first, last]).0;

        let wiggly = [
            first,
            Position::new(300.0, 400.0),
            Position::new(-5.0, -80.0),
            Position::new(12.0, 10.0),
            last,
        ];
        assert_eq!(movement_direction(&wiggly).0, base);

        let mut permuted = wiggly;
        permuted[1..4].reverse();
        assert_eq!(movement_direction(&permuted).0, base);
    }

    #[test]
    fn test_check_against_flow_short_history() {
        let zones = cam1_zone(AllowedDirection::GoingUp);
        assert_eq!(check_against_flow(&[], &zones), (false, None));
        assert_eq!(
            check_against_flow(&[Position::new(50.0, 50.0)], &zones),
            (false, None)
        );
    }

    #[test]
    fn test_check_against_flow_outside_zones() {
        let zones = cam1_zone(AllowedDirection::GoingUp);
        // moving down through the zone but currently outside it
        let history = line((50.0, 10.0), (50.0, 150.0), 10);
        assert_eq!(check_against_flow(&history, &zones), (false, None));
        assert_eq!(check_against_flow(&history, &[]), (false, None));
    }

    #[test]
    fn test_downward_track_against_each_zone_kind() {
        let history = line((50.0, 10.0), (50.0, 90.0), 10);

        let up = cam1_zone(AllowedDirection::GoingUp);
        let (wrong, zone) = check_against_flow(&history, &up);
        assert!(wrong);
        assert_eq!(zone, Some(&up[0]));

        let down = cam1_zone(AllowedDirection::GoingDown);
        assert_eq!(check_against_flow(&history, &down), (false, Some(&down[0])));

        let any = cam1_zone(AllowedDirection::Any);
        assert_eq!(check_against_flow(&history, &any), (false, Some(&any[0])));
    }

    #[test]
    fn test_cam1_scenario() {
        let zones = cam1_zone(AllowedDirection::GoingDown);

        let entering = line((50.0, 10.0), (50.0, 90.0), 10);
        assert_eq!(check_against_flow(&entering, &zones), (false, Some(&zones[0])));

        let reverse = line((50.0, 90.0), (50.0, 10.0), 10);
        assert_eq!(check_against_flow(&reverse, &zones), (true, Some(&zones[0])));
    }

    #[test]
    fn test_stationary_object_in_directed_zone_is_flagged() {
        let zones = cam1_zone(AllowedDirection::GoingDown);
        let history = [Position::new(20.0, 50.0), Position::new(60.0, 50.0)];
        assert_eq!(check_against_flow(&history, &zones), (true, Some(&zones[0])));
    }

    #[test]
    fn test_first_matching_zone_wins() {
        let mut zones = cam1_zone(AllowedDirection::Any);
        zones.extend(cam1_zone(AllowedDirection::GoingUp));
        let history = line((50.0, 10.0), (50.0, 90.0), 4);
        assert_eq!(check_against_flow(&history, &zones), (false, Some(&zones[0])));
    }

    #[test]
    fn test_arrow_below_cap_is_fresh() {
        let mut engine = DirectionEngine::new(30, 3.0);
        assert_eq!(engine.direction_arrow(&[Position::new(0.0, 0.0)], 1), None);

        let history = [Position::new(0.0, 0.0), Position::new(30.0, 60.0)];
        let arrow = engine.direction_arrow(&history, 1).unwrap();
        assert_eq!(arrow.start, Position::new(30.0, 60.0));
        assert_eq!(arrow.end, Position::new(40.0, 80.0));
        assert_eq!(engine.cached_arrow(1), None);

        let history = [Position::new(0.0, 0.0), Position::new(-30.0, 0.0)];
        let arrow = engine.direction_arrow(&history, 1).unwrap();
        assert_eq!(arrow.end, Position::new(-40.0, 0.0));
    }

    #[test]
    fn test_arrow_zero_length() {
        let mut engine = DirectionEngine::new(30, 3.0);
        let history = [Position::new(5.0, 5.0), Position::new(9.0, 9.0), Position::new(5.0, 5.0)];
        assert_eq!(engine.direction_arrow(&history, 4), None);
    }

    #[test]
    fn test_arrow_freezes_when_cap_reached() {
        let cap = 5;
        let mut engine = DirectionEngine::new(cap, 2.0);
        let mut history: Vec<Position> = Vec::new();

        for i in 0..cap - 1 {
            history.push(Position::new(0.0, i as f32 * 10.0));
            engine.direction_arrow(&history, 9);
        }
        assert_eq!(engine.cached_arrow(9), None);

        history.push(Position::new(0.0, 40.0));
        let frozen = engine.direction_arrow(&history, 9).unwrap();
        assert_eq!(frozen.start, Position::new(0.0, 40.0));
        assert_eq!(frozen.end, Position::new(0.0, 60.0));
        assert_eq!(engine.cached_arrow(9), Some(frozen));

        // window keeps sliding, now sideways and upwards
        for i in 0..20 {
            history.remove(0);
            history.push(Position::new(i as f32 * 7.0, 40.0 - i as f32 * 3.0));
            assert_eq!(history.len(), cap);
            assert_eq!(engine.direction_arrow(&history, 9), Some(frozen));
        }
    }

    #[test]
    fn test_arrow_reset_refreezes() {
        let mut engine = DirectionEngine::new(3, 1.0);
        let a = [Position::new(0.0, 0.0), Position::new(0.0, 1.0), Position::new(0.0, 2.0)];
        let frozen = engine.direction_arrow(&a, 1).unwrap();

        let b = [Position::new(0.0, 1.0), Position::new(0.0, 2.0), Position::new(5.0, 2.0)];
        assert_eq!(engine.direction_arrow(&b, 1), Some(frozen));

        engine.reset_arrow(1);
        let fresh = engine.direction_arrow(&b, 1).unwrap();
        assert_ne!(fresh, frozen);
        assert_eq!(fresh.end, Position::new(10.0, 3.0));
        assert_eq!(engine.direction_arrow(&a, 1), Some(fresh));
    }

    #[test]
    fn test_arrow_zero_length_at_cap_then_moves() {
        let mut engine = DirectionEngine::new(3, 1.0);
        let still = [Position::new(1.0, 1.0); 3];
        assert_eq!(engine.direction_arrow(&still, 2), None);

        let moving = [Position::new(1.0, 1.0), Position::new(1.0, 1.0), Position::new(4.0, 5.0)];
        let arrow = engine.direction_arrow(&moving, 2).unwrap();
        assert_eq!(engine.cached_arrow(2), Some(arrow));
    }

    #[test]
    fn test_forget_drops_state() {
        let mut engine = DirectionEngine::new(2, 1.0);
        let a = [Position::new(0.0, 0.0), Position::new(0.0, 1.0)];
        engine.direction_arrow(&a, 1);
        assert!(engine.cached_arrow(1).is_some());
        engine.forget(1);
        assert_eq!(engine.cached_arrow(1), None);
    }
}
