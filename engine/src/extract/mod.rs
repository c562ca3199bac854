use std::process::Stdio;

use anyhow::{Context, Result, bail};
use regex::bytes::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::response::Response;

// pull interesting data out of non-hidden responses
//
// regexes collect capture groups (or whole matches) from the bounded,
// possibly decompressed body; commands receive that same body on stdin and
// contribute their stdout.  command failures are recorded on the response
// and never abort the run.
#[derive(Debug, Default)]
pub struct Extracter {
    pub patterns: Vec<Regex>,
    pub commands: Vec<Vec<String>>,
}

impl Extracter {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.commands.is_empty()
    }

    pub async fn extract(&self, cancel: &CancellationToken, response: &mut Response) {
        if response.hidden || response.error.is_some() {
            return;
        }

        for re in &self.patterns {
            if re.captures_len() > 1 {
                for caps in re.captures_iter(&response.raw_body) {
                    for group in caps.iter().skip(1).flatten() {
                        response
                            .extract
                            .push(String::from_utf8_lossy(group.as_bytes()).into_owned());
                    }
                }
            } else {
                for m in re.find_iter(&response.raw_body) {
                    response
                        .extract
                        .push(String::from_utf8_lossy(m.as_bytes()).into_owned());
                }
            }
        }

        for argv in &self.commands {
            match run_command(cancel, argv, &response.raw_body, &response.item).await {
                Ok(output) => response.extract.push(output),
                Err(err) => response.extract_error = Some(err.to_string()),
            }
        }
    }
}

// run one extraction command with the body on stdin
//
// the tuple values are exported as MONSOON_VALUE (first value) and
// MONSOON_VALUE1..N; stderr is discarded so commands cannot scribble over
// the terminal.
async fn run_command(
    cancel: &CancellationToken,
    argv: &[String],
    body: &[u8],
    item: &[String],
) -> Result<String> {
    let Some((program, args)) = argv.split_first() else {
        bail!("extraction command is empty");
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    if let Some(first) = item.first() {
        command.env("MONSOON_VALUE", first);
    }

    for (i, value) in item.iter().enumerate() {
        command.env(format!("MONSOON_VALUE{}", i + 1), value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to run {:?}", program))?;

    let mut stdin = child.stdin.take().expect("stdin was requested");
    let mut stdout = child.stdout.take().expect("stdout was requested");

    let body = body.to_vec();

    let run = async {
        // feed and read concurrently so a large body cannot deadlock
        // against a full stdout pipe
        let write = async {
            let _ = stdin.write_all(&body).await;
            drop(stdin);
        };

        let read = async {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).await?;
            Ok::<_, std::io::Error>(out)
        };

        let (_, out) = tokio::join!(write, read);
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((out?, status))
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = run => Some(result),
    };

    let Some(result) = result else {
        let _ = child.start_kill();
        let _ = child.wait().await;
        bail!("extraction command {:?} cancelled", program);
    };

    let (output, status) =
        result.with_context(|| format!("failed to run {:?}", program))?;

    if !status.success() {
        bail!("{:?} exited with {}", program, status);
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}
