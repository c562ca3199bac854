use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use engine::report::RunStats;
use engine::response::{RequestError, Response};

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").into_owned()
}

// prints the response stream and keeps the run counters
//
// every terminal line is duplicated into the logfile with escape
// sequences stripped.
pub struct Reporter {
    pub stats: RunStats,
    log: Option<File>,
}

impl Reporter {
    pub fn new(logfile: Option<PathBuf>) -> Result<Self> {
        let log = match logfile {
            Some(path) => Some(
                File::create(&path)
                    .with_context(|| format!("failed to create logfile {:?}", path))?,
            ),
            None => None,
        };

        Ok(Reporter {
            stats: RunStats::new(),
            log,
        })
    }

    fn emit(&mut self, line: &str) {
        println!("{line}");

        if let Some(log) = &mut self.log {
            let _ = writeln!(log, "{}", strip_ansi(line));
        }
    }

    pub fn response(&mut self, response: &Response) {
        self.stats.update(response);

        let item = response.item.join(",");

        match &response.error {
            // cancelled requests render as nothing
            Some(RequestError::Cancelled) => {}
            Some(err) => {
                self.emit(&format!("{item:>12}   error: {err}"));
            }
            None if response.hidden => {}
            None => {
                let status = response
                    .status
                    .map(|s| s.as_u16().to_string())
                    .unwrap_or_default();

                let mut line = format!(
                    "{item:>12}   {status}   header {}B {}w {}l   body {}B {}w {}l   {:>6}ms",
                    response.header.bytes,
                    response.header.words,
                    response.header.lines,
                    response.body.bytes,
                    response.body.words,
                    response.body.lines,
                    response.duration.as_millis(),
                );

                if !response.extract.is_empty() {
                    line.push_str("   ");
                    line.push_str(&response.extract.join(", "));
                }

                if let Some(err) = &response.extract_error {
                    line.push_str(&format!("   extract error: {err}"));
                }

                self.emit(&line);
            }
        }
    }

    pub fn total(&mut self, total: u64) {
        self.stats.set_total(total);
    }

    pub fn summary(&mut self) {
        let stats = self.stats.clone();

        self.emit("");
        self.emit(&format!(
            "processed {} of {} requests: {} shown, {} hidden, {} errors",
            stats.sent,
            stats
                .total
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string()),
            stats.shown,
            stats.hidden,
            stats.errors,
        ));

        if !stats.status_codes.is_empty() {
            let codes: Vec<String> = stats
                .status_codes
                .iter()
                .map(|(code, n)| format!("{code}: {n}"))
                .collect();
            self.emit(&format!("status codes: {}", codes.join(", ")));
        }

        for (error, n) in &stats.invalid_requests {
            self.emit(&format!("{n} invalid requests: {error}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_sequences_are_stripped() {
        assert_eq!(strip_ansi("\x1b[2Kplain \x1b[31mred\x1b[0m"), "plain red");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }
}
