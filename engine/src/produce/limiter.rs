use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::source::forward;

// strict token-bucket pacing: one token per tuple, refilled every 1/rps
// seconds, bucket capacity one
//
// the stage is left out of the pipeline entirely when no rate is
// configured.  the count passes through untouched.
pub async fn rate_limit(
    rps: f64,
    cancel: CancellationToken,
    mut tuples_in: mpsc::Receiver<Vec<String>>,
    mut counts_in: mpsc::Receiver<u64>,
    tuples_out: mpsc::Sender<Vec<String>>,
    counts_out: mpsc::Sender<u64>,
) -> Result<()> {
    let mut tick = time::interval(Duration::from_secs_f64(1.0 / rps));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tuples_done = false;
    let mut counts_done = false;

    while !(tuples_done && counts_done) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            count = counts_in.recv(), if !counts_done => {
                if let Some(count) = count {
                    let _ = counts_out.try_send(count);
                }
                counts_done = true;
            },
            tuple = tuples_in.recv(), if !tuples_done => match tuple {
                Some(tuple) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tick.tick() => {}
                    }

                    if !forward(&cancel, &tuples_out, tuple).await {
                        return Ok(());
                    }
                }
                None => tuples_done = true,
            },
        }
    }

    Ok(())
}
