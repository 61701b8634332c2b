use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error};

use crate::otp::OtpChallengeManager;

/// Periodically drop expired challenges from the store.
///
/// Expired challenges are already ignored on read; the sweep only keeps the
/// backing table small.
pub fn spawn_challenge_sweeper(
    challenges: Arc<OtpChallengeManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            match challenges.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired challenges purged"),
                Err(err) => error!("challenge sweep failed: {err:#}"),
            }
        }
    })
}
