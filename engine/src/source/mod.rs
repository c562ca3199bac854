use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod exec;
pub mod file;
pub mod range;

pub use exec::ExecSource;
pub use file::{FileSource, StdinSource};
pub use range::RangeSource;

// a producer of placeholder values
//
// each call to produce emits all values in order on the values channel and
// delivers exactly one count through the sink on a successful, uncancelled
// run.  the count may arrive before, during, or after the values.  the
// multiplexer restarts every source except the first one for each prefix
// tuple, so only position one may hold a non-restartable source.
#[async_trait]
pub trait Source: Send + Sync {
    fn restartable(&self) -> bool {
        true
    }

    async fn produce(
        &self,
        cancel: &CancellationToken,
        values: mpsc::Sender<String>,
        count: CountSink,
    ) -> Result<()>;
}

// single-shot, non-blocking count delivery
//
// the sink wraps a channel with capacity of at least one, so a send can
// never stall the value stream.  restarted sources get a disabled sink and
// their counts go nowhere.
pub struct CountSink(Option<mpsc::Sender<u64>>);

impl CountSink {
    pub fn new(tx: mpsc::Sender<u64>) -> Self {
        CountSink(Some(tx))
    }

    pub fn disabled() -> Self {
        CountSink(None)
    }

    pub fn send(mut self, count: u64) {
        if let Some(tx) = self.0.take() {
            let _ = tx.try_send(count);
        }
    }
}

impl From<Option<mpsc::Sender<u64>>> for CountSink {
    fn from(tx: Option<mpsc::Sender<u64>>) -> Self {
        CountSink(tx)
    }
}

// send one value downstream, treating cancellation and a closed receiver as
// a request to stop producing.  returns false when the caller should stop.
pub(crate) async fn forward<T: Send>(
    cancel: &CancellationToken,
    tx: &mpsc::Sender<T>,
    value: T,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = tx.send(value) => res.is_ok(),
    }
}

// a source holding exactly one fixed value
#[derive(Clone, Debug)]
pub struct ValueSource {
    value: String,
}

impl ValueSource {
    pub fn new<S: Into<String>>(value: S) -> Self {
        ValueSource {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Source for ValueSource {
    async fn produce(
        &self,
        cancel: &CancellationToken,
        values: mpsc::Sender<String>,
        count: CountSink,
    ) -> Result<()> {
        count.send(1);
        forward(cancel, &values, self.value.clone()).await;
        Ok(())
    }
}

// parse a placeholder specification of the form NAME:KIND:OPTIONS
//
// KIND is one of file, range, value, or exec.  the legacy surface
// (--range/--range-format/--file) is wired up by the caller as a single
// FUZZ placeholder with the appropriate kind.
pub fn parse_placeholder(spec: &str) -> Result<(String, Box<dyn Source>)> {
    let mut parts = spec.splitn(3, ':');

    let name = match parts.next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => bail!("placeholder specification {:?} has no name", spec),
    };

    let kind = parts
        .next()
        .ok_or_else(|| anyhow::Error::msg(format!("placeholder {:?} has no kind", name)))?;

    let options = parts.next().unwrap_or("");

    let source: Box<dyn Source> = match kind {
        "file" => {
            if options == "-" {
                Box::new(StdinSource::new())
            } else {
                Box::new(FileSource::new(options))
            }
        }
        "range" => Box::new(RangeSource::parse(options)?),
        "value" => Box::new(ValueSource::new(options)),
        "exec" => {
            let argv: Vec<String> = options.split_whitespace().map(String::from).collect();
            Box::new(ExecSource::new(argv)?)
        }
        other => bail!("placeholder {:?} has unknown kind {:?}", name, other),
    };

    Ok((name, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(source: &dyn Source) -> (Vec<String>, Option<u64>) {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let (ctx, mut crx) = mpsc::channel(1);

        source
            .produce(&cancel, tx, CountSink::new(ctx))
            .await
            .unwrap();

        let mut values = Vec::new();
        while let Some(v) = rx.recv().await {
            values.push(v);
        }

        (values, crx.recv().await)
    }

    #[tokio::test]
    async fn value_source() {
        let source = ValueSource::new("admin");
        let (values, count) = collect(&source).await;
        assert_eq!(values, vec!["admin".to_string()]);
        assert_eq!(count, Some(1));
    }

    #[tokio::test]
    async fn placeholder_spec_kinds() {
        let (name, source) = parse_placeholder("FUZZ:range:1-3").unwrap();
        assert_eq!(name, "FUZZ");
        let (values, count) = collect(source.as_ref()).await;
        assert_eq!(values, vec!["1", "2", "3"]);
        assert_eq!(count, Some(3));

        let (name, _) = parse_placeholder("FUZ2Z:value:x").unwrap();
        assert_eq!(name, "FUZ2Z");

        assert!(parse_placeholder("FUZZ").is_err());
        assert!(parse_placeholder(":range:1-2").is_err());
        assert!(parse_placeholder("FUZZ:wordlist:x").is_err());
    }
}
