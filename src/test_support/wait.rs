use std::time::{Duration, Instant};

use crate::platform::runtime::sleep;

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}
