use std::time::Duration;

/// User nice levels are shifted by this value so that the whole range is negative or zero.
pub const NICE_LEVEL_SHIFT: f64 = 20.0;
/// Weight of the request's own nice level relative to the user's one.
pub const REQUEST_NICE_WEIGHT: f64 = 0.1;
/// Shorter waits are treated as this long.
pub const MIN_WAIT_MS: u128 = 100;

/// Everything the score of one waiting request depends on.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput {
    pub user_nice_level: i32,
    pub request_nice_level: i32,
    /// Quota of the user for the resource type.
    pub user_quota: u32,
    /// Number of resources of the type currently known.
    pub total_resources: usize,
    /// Number of resources of the type the user is currently working with.
    pub working: u32,
    pub waited: Duration,
}

/// Priority score of a waiting request; the lowest score wins.
///
/// The nice level is tapered towards zero as the user approaches their quota
/// and scaled by the wait time in tenths of a second, so that urgency of
/// requests accumulates the longer they wait.
pub fn compute_score(input: &ScoreInput) -> i64 {
    let mut normalized = f64::from(input.user_nice_level) - NICE_LEVEL_SHIFT;
    normalized += f64::from(input.request_nice_level) * REQUEST_NICE_WEIGHT;

    let user_max = (input.user_quota as usize).min(input.total_resources);
    if user_max == 0 {
        return 0;
    }
    let ratio = f64::from(input.working) / user_max as f64;
    normalized -= ratio * normalized;

    let wait_ms = input.waited.as_millis().max(MIN_WAIT_MS) as f64;
    ((wait_ms / 100.0) * normalized).floor() as i64
}
