use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::header::CONTENT_ENCODING;
use reqwest::{Client, Version};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::response::{RequestError, Response, TextStats};
use crate::template::RequestTemplate;

// default cap for the bounded body read
pub const DEFAULT_MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct WorkerOptions {
    // read at most this many body bytes; a longer body causes the
    // connection to be dropped instead of drained
    pub max_body_size: usize,

    // gunzip bodies carrying Content-Encoding: gzip
    pub decompress: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            decompress: false,
        }
    }
}

// one worker of the fixed-size pool
//
// workers share a single receiver behind a mutex, claim one tuple at a
// time, and emit completion-ordered response records.  round-trip failures
// ride on the record; only the channels ending can stop the pool.
pub(crate) async fn run_worker(
    client: Client,
    template: Arc<RequestTemplate>,
    opts: Arc<WorkerOptions>,
    cancel: CancellationToken,
    input: Arc<Mutex<mpsc::Receiver<Vec<String>>>>,
    output: mpsc::Sender<Response>,
) -> Result<()> {
    loop {
        let tuple = {
            let mut input = input.lock().await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                tuple = input.recv() => match tuple {
                    Some(tuple) => tuple,
                    None => return Ok(()),
                },
            }
        };

        let response = execute(&client, &template, &opts, &cancel, tuple).await;

        // prefer handing the record off, but never block on a stalled
        // consumer once the run is cancelled
        let sent = tokio::select! {
            biased;
            res = output.send(response) => res.is_ok(),
            _ = cancel.cancelled() => false,
        };

        if !sent {
            return Ok(());
        }
    }
}

// the full lifecycle of one request; always returns a record
async fn execute(
    client: &Client,
    template: &RequestTemplate,
    opts: &WorkerOptions,
    cancel: &CancellationToken,
    tuple: Vec<String>,
) -> Response {
    let mut response = Response::new(tuple);

    let request = match template.materialize(client, &response.item) {
        Ok(request) => request,
        Err(err) => {
            response.error = Some(err);
            return response;
        }
    };

    response.url = request.url().to_string();

    let start = Instant::now();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            response.duration = start.elapsed();
            response.error = Some(RequestError::Cancelled);
            return response;
        }
        result = client.execute(request) => result,
    };

    response.duration = start.elapsed();

    let http = match result {
        Ok(http) => http,
        Err(err) => {
            response.error = Some(RequestError::Transport(err.without_url().to_string()));
            return response;
        }
    };

    response.status = Some(http.status());
    response.raw_header = dump_head(&http);
    response.header = TextStats::of(&response.raw_header);

    let gzipped = http
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));

    response.headers = Some(http.headers().clone());

    // bounded read: stop at the cap and let dropping the stream tear down
    // the connection instead of draining the rest
    let mut body: Vec<u8> = Vec::new();
    let mut stream = http.bytes_stream();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                response.error = Some(RequestError::Cancelled);
                break;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(chunk)) => {
                let remaining = opts.max_body_size.saturating_sub(body.len());

                if chunk.len() >= remaining {
                    body.extend_from_slice(&chunk[..remaining]);
                    debug!(limit = opts.max_body_size, "body capped, closing connection");
                    break;
                }

                body.extend_from_slice(&chunk);
            }
            Some(Err(err)) => {
                response.error = Some(RequestError::Transport(err.without_url().to_string()));
                break;
            }
            None => break,
        }
    }

    drop(stream);

    if gzipped && opts.decompress {
        if let Some(decoded) = gunzip_limited(&body) {
            response.raw_body = decoded;
            response.body_decompressed = true;
        } else {
            response.raw_body = body;
        }
    } else {
        response.raw_body = body;
    }

    response.body = TextStats::of(&response.raw_body);
    response
}

// reconstruct the status line and headers the way they arrived, which is
// what the pattern and size filters run against
fn dump_head(http: &reqwest::Response) -> Vec<u8> {
    let status = http.status();
    let reason = status.canonical_reason().unwrap_or("");

    let mut head = format!(
        "{} {} {}\r\n",
        version_str(http.version()),
        status.as_u16(),
        reason
    )
    .into_bytes();

    for (name, value) in http.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(b"\r\n");
    head
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

// decode a gzip body that may have been cut off by the bounded read; a
// stream ending in unexpected eof yields whatever was decoded so far
fn gunzip_limited(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = GzDecoder::new(data);

    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Some(out),
        Err(_) => None,
    }
}
