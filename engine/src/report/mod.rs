use std::collections::BTreeMap;

use chrono::{DateTime, Local};

use crate::response::{RequestError, Response};

// counters owned by the consumer of the response stream
//
// counts reflect arrival order, not tuple order.  cancelled requests are
// neither successes nor protocol errors; invalid requests are additionally
// aggregated by their normalized error text.
#[derive(Clone, Debug)]
pub struct RunStats {
    pub start: DateTime<Local>,

    // total expected requests, unknown until the count channel delivers
    pub total: Option<u64>,

    pub sent: u64,
    pub shown: u64,
    pub hidden: u64,
    pub errors: u64,
    pub cancelled: u64,

    pub status_codes: BTreeMap<u16, u64>,
    pub invalid_requests: BTreeMap<String, u64>,
}

impl RunStats {
    pub fn new() -> Self {
        RunStats {
            start: Local::now(),
            total: None,
            sent: 0,
            shown: 0,
            hidden: 0,
            errors: 0,
            cancelled: 0,
            status_codes: BTreeMap::new(),
            invalid_requests: BTreeMap::new(),
        }
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = Some(total);
    }

    pub fn update(&mut self, response: &Response) {
        self.sent += 1;

        match &response.error {
            Some(RequestError::Cancelled) => {
                self.cancelled += 1;
            }
            Some(err @ RequestError::InvalidRequest(_)) => {
                self.errors += 1;
                *self.invalid_requests.entry(err.normalized()).or_insert(0) += 1;
            }
            Some(RequestError::Transport(_)) => {
                self.errors += 1;
            }
            None => {
                if let Some(status) = response.status {
                    *self.status_codes.entry(status.as_u16()).or_insert(0) += 1;
                }

                if response.hidden {
                    self.hidden += 1;
                } else {
                    self.shown += 1;
                }
            }
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        RunStats::new()
    }
}
