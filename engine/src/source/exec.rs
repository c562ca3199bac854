use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::{CountSink, Source, forward};

// values from the stdout lines of a subprocess
//
// restarting re-runs the command, so the command is expected to produce the
// same output on every run.  stderr is discarded so a chatty command cannot
// corrupt the terminal.
#[derive(Clone, Debug)]
pub struct ExecSource {
    argv: Vec<String>,
}

impl ExecSource {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            bail!("exec source has no command");
        }

        Ok(ExecSource { argv })
    }
}

#[async_trait]
impl Source for ExecSource {
    async fn produce(
        &self,
        cancel: &CancellationToken,
        values: mpsc::Sender<String>,
        count: CountSink,
    ) -> Result<()> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run {:?}", self.argv[0]))?;

        let stdout = child.stdout.take().expect("stdout was requested");
        let mut lines = BufReader::new(stdout).lines();
        let mut emitted: u64 = 0;

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(());
                }
                line = lines.next_line() => {
                    line.with_context(|| format!("failed to read output of {:?}", self.argv[0]))?
                }
            };

            match line {
                Some(line) => {
                    if !forward(cancel, &values, line).await {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Ok(());
                    }
                    emitted += 1;
                }
                None => break,
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for {:?}", self.argv[0]))?;

        if !status.success() {
            bail!("{:?} exited with {}", self.argv[0], status);
        }

        count.send(emitted);
        Ok(())
    }
}
