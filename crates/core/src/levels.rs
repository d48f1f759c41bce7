//! Point-driven level curve.
//!
//! Reaching level `n + 1` from level `n` costs `floor(100 * (1 + n * 0.5))`
//! points, so the curve is strictly increasing: 150, 200, 250, ...

/// Level reached for a points total, plus the remaining distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: i32,
    pub points_to_next_level: i64,
}

/// Points needed to advance from `level` to `level + 1`.
pub fn next_level_cost(level: i32) -> i64 {
    (100.0 * (1.0 + f64::from(level) * 0.5)).floor() as i64
}

/// Compute the level and remaining points for a total.
///
/// Negative totals are treated as zero.
pub fn level_for_points(total_points: i64) -> LevelProgress {
    let mut level = 1;
    let mut remaining = total_points.max(0);
    loop {
        let cost = next_level_cost(level);
        if remaining < cost {
            return LevelProgress {
                level,
                points_to_next_level: cost - remaining,
            };
        }
        remaining -= cost;
        level += 1;
    }
}
