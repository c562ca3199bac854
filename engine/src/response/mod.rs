use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use thiserror::Error;

// per-request error kinds
//
// these ride on the response record and never fail the run; the reporter
// aggregates invalid requests by their normalized text and renders cancelled
// requests as empty lines.
#[derive(Clone, Debug, Error)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Transport(String),

    #[error("cancelled")]
    Cancelled,
}

impl RequestError {
    pub fn invalid<E: std::fmt::Display>(err: E) -> Self {
        RequestError::InvalidRequest(err.to_string())
    }

    // collapse whitespace so that equivalent failures from different tuples
    // land in the same histogram bucket
    pub fn normalized(&self) -> String {
        self.to_string().split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

// byte/word/line counts over a chunk of the response, in the spirit of wc(1)
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TextStats {
    pub bytes: u64,
    pub words: u64,
    pub lines: u64,
}

impl TextStats {
    // words are maximal runs of non-whitespace; a trailing partial word only
    // counts when the data does not end on whitespace
    pub fn of(data: &[u8]) -> Self {
        let mut words = 0;
        let mut lines = 0;
        let mut in_word = false;

        for &b in data {
            if b == b'\n' {
                lines += 1;
            }

            if b.is_ascii_whitespace() {
                if in_word {
                    words += 1;
                }
                in_word = false;
            } else {
                in_word = true;
            }
        }

        if in_word {
            words += 1;
        }

        TextStats {
            bytes: data.len() as u64,
            words,
            lines,
        }
    }
}

// one annotated response flowing out of the worker pool
//
// the record is created as soon as a tuple is claimed, so a request that
// never made it onto the wire (invalid template expansion, cancellation)
// still produces exactly one record downstream.
#[derive(Clone, Debug, Default)]
pub struct Response {
    // values substituted into the template, in placeholder order
    pub item: Vec<String>,

    // effective url after substitution; empty when the request could not
    // even be built
    pub url: String,

    pub error: Option<RequestError>,
    pub duration: Duration,

    pub header: TextStats,
    pub body: TextStats,

    // status line plus headers as dumped from the wire, used by the
    // pattern filters
    pub raw_header: Vec<u8>,

    // bounded (and possibly decompressed) body
    pub raw_body: Vec<u8>,
    pub body_decompressed: bool,

    pub extract: Vec<String>,
    pub extract_error: Option<String>,

    // filter verdict; hidden responses still flow downstream
    pub hidden: bool,

    pub status: Option<StatusCode>,
    pub headers: Option<HeaderMap>,
}

impl Response {
    pub fn new(item: Vec<String>) -> Self {
        Response {
            item,
            ..Response::default()
        }
    }
}
