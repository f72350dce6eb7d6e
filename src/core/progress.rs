use crate::core::model::JobCounts;

/// Percentage of finished (done + failed) jobs, rounded half up and clamped
/// to 0..=100. An unknown total (0) always yields 0.
pub fn progress_percent(counts: &JobCounts) -> u8 {
    if counts.total == 0 {
        return 0;
    }
    let finished = counts.finished() as u128;
    let total = counts.total as u128;
    // round(finished / total * 100) without going through floats
    let pct = (finished * 200 + total) / (total * 2);
    pct.min(100) as u8
}

/// A queue is complete once its total is known and nothing is pending or
/// running. Not derived from `progress_percent`: an underestimated total can
/// report 100% while jobs are still in flight.
pub fn is_complete(counts: &JobCounts) -> bool {
    counts.total > 0 && counts.in_flight() == 0
}
