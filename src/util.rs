use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds from epoch to `time`, as the wire format of token expiries.
///
/// Times before epoch clamp to zero.
///
/// # Examples
///
/// ```rust
/// use tunebridge::util::epoch_millis;
///
/// assert!(epoch_millis(std::time::SystemTime::now()) > 0);
/// ```
#[must_use]
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// The point in time `millis` milliseconds after epoch.
#[must_use]
pub fn from_epoch_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}
