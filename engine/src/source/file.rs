use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::{CountSink, Source, forward};

// emit the lines of a reader, terminators stripped, empty lines included
//
// the count is only known once the reader is exhausted, so it arrives after
// the values.  a cancelled run delivers no count.
async fn produce_lines<R: AsyncBufRead + Unpin>(
    reader: R,
    cancel: &CancellationToken,
    values: mpsc::Sender<String>,
    count: CountSink,
) -> Result<()> {
    let mut lines = reader.lines();
    let mut emitted: u64 = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("failed to read line")?,
        };

        match line {
            Some(line) => {
                if !forward(cancel, &values, line).await {
                    return Ok(());
                }
                emitted += 1;
            }
            None => break,
        }
    }

    count.send(emitted);
    Ok(())
}

// line-delimited values from a file; seekable, so freely restartable
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileSource { path: path.into() }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn produce(
        &self,
        cancel: &CancellationToken,
        values: mpsc::Sender<String>,
        count: CountSink,
    ) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("failed to open {:?}", self.path))?;

        produce_lines(BufReader::new(file), cancel, values, count).await
    }
}

// line-delimited values from stdin
//
// stdin cannot be rewound, so this source is single-shot and only valid in
// the first placeholder position
#[derive(Debug, Default)]
pub struct StdinSource {
    used: AtomicBool,
}

impl StdinSource {
    pub fn new() -> Self {
        StdinSource::default()
    }
}

#[async_trait]
impl Source for StdinSource {
    fn restartable(&self) -> bool {
        false
    }

    async fn produce(
        &self,
        cancel: &CancellationToken,
        values: mpsc::Sender<String>,
        count: CountSink,
    ) -> Result<()> {
        if self.used.swap(true, Ordering::SeqCst) {
            bail!("stdin can only be read once");
        }

        produce_lines(BufReader::new(tokio::io::stdin()), cancel, values, count).await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    async fn run(source: &dyn Source) -> Result<(Vec<String>, Option<u64>)> {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1024);
        let (ctx, mut crx) = mpsc::channel(1);

        source.produce(&cancel, tx, CountSink::new(ctx)).await?;

        let mut values = Vec::new();
        while let Some(v) = rx.recv().await {
            values.push(v);
        }

        Ok((values, crx.recv().await))
    }

    #[tokio::test]
    async fn lines_in_order_with_empty_lines() {
        let file = fixture("a\n\nb\r\nc\n");
        let source = FileSource::new(file.path());

        let (values, count) = run(&source).await.unwrap();
        assert_eq!(values, vec!["a", "", "b", "c"]);
        assert_eq!(count, Some(4));
    }

    #[tokio::test]
    async fn final_line_without_terminator() {
        let file = fixture("a\nb");
        let source = FileSource::new(file.path());

        let (values, count) = run(&source).await.unwrap();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(count, Some(2));
    }

    #[tokio::test]
    async fn file_source_is_restartable() {
        let file = fixture("x\n");
        let source = FileSource::new(file.path());
        assert!(source.restartable());

        let (first, _) = run(&source).await.unwrap();
        let (second, _) = run(&source).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let source = FileSource::new("/nonexistent/wordlist.txt");
        assert!(run(&source).await.is_err());
    }

    #[test]
    fn stdin_is_single_shot() {
        let source = StdinSource::new();
        assert!(!source.restartable());
        assert!(!source.used.swap(true, Ordering::SeqCst));
        assert!(source.used.load(Ordering::SeqCst));
    }
}
