use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, instrument};

use crate::extract::Extracter;
use crate::filter::ResponseFilters;
use crate::produce::{self, Multiplexer, limit, rate_limit, skip};
use crate::response::Response;
use crate::template::RequestTemplate;
use crate::worker::{WorkerOptions, run_worker};

pub const DEFAULT_WORKERS: usize = 5;

#[derive(Clone, Debug)]
pub struct RunnerOptions {
    pub workers: usize,

    // drop the first n tuples
    pub skip: u64,

    // stop producing after m tuples
    pub limit: Option<u64>,

    // requests per second; unset means full speed
    pub rate: Option<f64>,

    // capacity of the tuple channels between pipeline stages
    pub tuple_buffer: usize,

    pub worker: WorkerOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            workers: DEFAULT_WORKERS,
            skip: 0,
            limit: None,
            rate: None,
            tuple_buffer: produce::TUPLE_BUFFER,
            worker: WorkerOptions::default(),
        }
    }
}

// one enumeration run, assembled from its stages
//
// sources -> multiplexer -> skip -> limit -> rate limit -> workers ->
// filter mark -> extracter -> consumer, with the expected total riding a
// separate single-value channel.  each stage is a task that closes its
// output on every exit path; the consumer sees the response channel close
// once everything has drained.
pub struct Runner {
    pub multiplexer: Multiplexer,
    pub template: Arc<RequestTemplate>,
    pub client: Client,
    pub filters: ResponseFilters,
    pub extracter: Extracter,
    pub opts: RunnerOptions,
}

impl Runner {
    // drive the pipeline to completion
    //
    // per-request failures ride on the response records; only stage
    // failures (source i/o, broken subprocess) end up here, and the first
    // non-cancellation error cancels the whole run.
    #[instrument(level = Level::DEBUG, skip(self, cancel, responses, counts))]
    pub async fn run(
        self,
        cancel: CancellationToken,
        responses: mpsc::Sender<Response>,
        counts: mpsc::Sender<u64>,
    ) -> Result<()> {
        info!(
            workers = self.opts.workers,
            placeholders = self.multiplexer.len(),
            "starting enumeration"
        );

        // the limit filter stops this subtree without touching the workers,
        // which keep draining what was already produced
        let producer_cancel = cancel.child_token();

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let buffer = self.opts.tuple_buffer.max(1);

        let (tuple_tx, tuple_rx) = mpsc::channel(buffer);
        let (count_tx, count_rx) = mpsc::channel(1);

        {
            let mux = self.multiplexer;
            let cancel = producer_cancel.clone();
            tasks.spawn(async move { mux.run(&cancel, tuple_tx, count_tx).await });
        }

        let mut tuple_rx = tuple_rx;
        let mut count_rx = count_rx;

        if self.opts.skip > 0 {
            let (t_tx, t_rx) = mpsc::channel(buffer);
            let (c_tx, c_rx) = mpsc::channel(1);
            tasks.spawn(skip(
                self.opts.skip,
                producer_cancel.clone(),
                tuple_rx,
                count_rx,
                t_tx,
                c_tx,
            ));
            tuple_rx = t_rx;
            count_rx = c_rx;
        }

        if let Some(m) = self.opts.limit {
            let (t_tx, t_rx) = mpsc::channel(buffer);
            let (c_tx, c_rx) = mpsc::channel(1);
            tasks.spawn(limit(
                m,
                cancel.clone(),
                producer_cancel.clone(),
                tuple_rx,
                count_rx,
                t_tx,
                c_tx,
            ));
            tuple_rx = t_rx;
            count_rx = c_rx;
        }

        if let Some(rps) = self.opts.rate {
            let (t_tx, t_rx) = mpsc::channel(buffer);
            let (c_tx, c_rx) = mpsc::channel(1);
            tasks.spawn(rate_limit(
                rps,
                cancel.clone(),
                tuple_rx,
                count_rx,
                t_tx,
                c_tx,
            ));
            tuple_rx = t_rx;
            count_rx = c_rx;
        }

        // hand the adjusted total over to the consumer
        tasks.spawn(async move {
            if let Some(count) = count_rx.recv().await {
                debug!(count, "expected request count known");
                let _ = counts.send(count).await;
            }
            Ok(())
        });

        // the response channel is deliberately tiny so slow consumers
        // backpressure the workers
        let input = Arc::new(Mutex::new(tuple_rx));
        let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(1);

        let worker_opts = Arc::new(self.opts.worker.clone());
        for _ in 0..self.opts.workers.max(1) {
            tasks.spawn(run_worker(
                self.client.clone(),
                self.template.clone(),
                worker_opts.clone(),
                cancel.clone(),
                input.clone(),
                resp_tx.clone(),
            ));
        }
        drop(resp_tx);

        // filter mark stage: the verdict never drops a record
        let (marked_tx, mut marked_rx) = mpsc::channel::<Response>(1);
        let filters = self.filters;
        tasks.spawn(async move {
            while let Some(mut response) = resp_rx.recv().await {
                response.hidden = filters.hidden(&response);
                if marked_tx.send(response).await.is_err() {
                    break;
                }
            }
            Ok(())
        });

        // extraction stage feeds the consumer and drains until the workers
        // are gone, so in-flight records survive a cancellation
        let extracter = self.extracter;
        let extract_cancel = cancel.clone();
        tasks.spawn(async move {
            while let Some(mut response) = marked_rx.recv().await {
                extracter.extract(&extract_cancel, &mut response).await;
                if responses.send(response).await.is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut first_error: Option<anyhow::Error> = None;

        while let Some(res) = tasks.join_next().await {
            let err = match res {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(err) => anyhow::Error::new(err).context("pipeline task died"),
            };

            if first_error.is_none() {
                debug!(error = %err, "stage failed, cancelling run");
                cancel.cancel();
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
