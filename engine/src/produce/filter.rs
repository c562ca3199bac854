use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::forward;

// drop the first n tuples and lower the reported count to match
//
// the count travels on its own channel and may arrive before, between, or
// after tuples, so the stage keeps running until both inputs are done.
pub async fn skip(
    n: u64,
    cancel: CancellationToken,
    mut tuples_in: mpsc::Receiver<Vec<String>>,
    mut counts_in: mpsc::Receiver<u64>,
    tuples_out: mpsc::Sender<Vec<String>>,
    counts_out: mpsc::Sender<u64>,
) -> Result<()> {
    let mut skipped: u64 = 0;
    let mut tuples_done = false;
    let mut counts_done = false;

    while !(tuples_done && counts_done) {
        // the count is forwarded with priority so that a later producer
        // shutdown cannot swallow it
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            count = counts_in.recv(), if !counts_done => {
                if let Some(count) = count {
                    // the count channel has capacity for the single value
                    let _ = counts_out.try_send(count.saturating_sub(n));
                }
                counts_done = true;
            },
            tuple = tuples_in.recv(), if !tuples_done => match tuple {
                Some(tuple) => {
                    if skipped < n {
                        skipped += 1;
                    } else if !forward(&cancel, &tuples_out, tuple).await {
                        return Ok(());
                    }
                }
                None => tuples_done = true,
            },
        }
    }

    Ok(())
}

// pass at most m tuples, then stop the producer subtree
//
// once the cap is reached the producer token is cancelled so sources stop
// early; anything still buffered upstream is discarded when the stage
// returns.  the count becomes min(total, m).
pub async fn limit(
    m: u64,
    cancel: CancellationToken,
    producers: CancellationToken,
    mut tuples_in: mpsc::Receiver<Vec<String>>,
    mut counts_in: mpsc::Receiver<u64>,
    tuples_out: mpsc::Sender<Vec<String>>,
    counts_out: mpsc::Sender<u64>,
) -> Result<()> {
    let mut forwarded: u64 = 0;
    let mut tuples_done = false;
    let mut counts_done = false;

    if m == 0 {
        producers.cancel();
        tuples_done = true;
    }

    while !(tuples_done && counts_done) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            count = counts_in.recv(), if !counts_done => {
                if let Some(count) = count {
                    let _ = counts_out.try_send(count.min(m));
                }
                counts_done = true;
            },
            tuple = tuples_in.recv(), if !tuples_done => match tuple {
                Some(tuple) => {
                    if !forward(&cancel, &tuples_out, tuple).await {
                        return Ok(());
                    }

                    forwarded += 1;
                    if forwarded == m {
                        producers.cancel();
                        tuples_done = true;
                    }
                }
                None => tuples_done = true,
            },
        }
    }

    Ok(())
}
