/// Statuses after which a pipeline or job will not change on its own.
///
/// Anything else, including values GitLab may add later, counts as active
/// and keeps being polled.
pub const FINISHED_STATUSES: [&str; 5] = ["success", "failed", "canceled", "skipped", "manual"];

/// Returns true when `status` is terminal. Comparison ignores case.
pub fn is_finished(status: &str) -> bool {
    let status = status.to_lowercase();
    FINISHED_STATUSES.contains(&status.as_str())
}

pub fn is_active(status: &str) -> bool {
    !is_finished(status)
}
