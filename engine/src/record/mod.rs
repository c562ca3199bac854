use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::report::RunStats;
use crate::response::{Response, TextStats};

// the run document persisted next to the terminal output
//
// written atomically (temp file in the same directory, then rename) once
// per second while the run is going and a final time at the end.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunRecord {
    pub start: Option<DateTime<Local>>,
    pub end: Option<DateTime<Local>>,

    pub total_requests: u64,
    pub sent_requests: u64,
    pub hidden_responses: u64,
    pub shown_responses: u64,
    pub cancelled: bool,

    pub template: TemplateRecord,

    pub input_file: String,
    pub ranges: Vec<String>,
    pub range_format: String,
    pub extract: Vec<String>,
    pub extract_pipe: Vec<String>,

    pub responses: Vec<ResponseRecord>,
}

impl RunRecord {
    pub fn apply_stats(&mut self, stats: &RunStats) {
        self.start = Some(stats.start);
        self.total_requests = stats.total.unwrap_or(0);
        self.sent_requests = stats.sent;
        self.hidden_responses = stats.hidden;
        self.shown_responses = stats.shown;
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TemplateRecord {
    pub url: String,
    pub method: String,
    pub body: String,
    pub header: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponseRecord {
    pub item: String,
    pub error: String,
    pub duration_sec: f64,
    pub status_code: Option<u16>,
    pub status_text: String,
    pub header: TextStats,
    pub body: TextStats,
    pub extracted_data: Vec<String>,
}

impl From<&Response> for ResponseRecord {
    fn from(response: &Response) -> Self {
        ResponseRecord {
            item: response.item.join(","),
            error: response
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default(),
            duration_sec: response.duration.as_secs_f64(),
            status_code: response.status.map(|s| s.as_u16()),
            status_text: response
                .status
                .and_then(|s| s.canonical_reason())
                .unwrap_or("")
                .to_string(),
            header: response.header,
            body: response.body,
            extracted_data: response.extract.clone(),
        }
    }
}

pub struct Recorder {
    path: PathBuf,
    pub record: RunRecord,
}

impl Recorder {
    pub fn new<P: Into<PathBuf>>(path: P, record: RunRecord) -> Self {
        Recorder {
            path: path.into(),
            record,
        }
    }

    pub async fn write(&self) -> Result<()> {
        let data =
            serde_json::to_vec_pretty(&self.record).context("failed to encode run record")?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("record.json");
        let staging = dir.join(format!(".{name}.tmp"));

        tokio::fs::write(&staging, &data)
            .await
            .with_context(|| format!("failed to write {:?}", staging))?;

        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("failed to replace {:?}", self.path))?;

        Ok(())
    }
}
