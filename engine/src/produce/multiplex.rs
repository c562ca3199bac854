use anyhow::{Result, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::{CountSink, Source, forward};

// buffer between a running source and the product walk; only there to
// decouple the two, the real smoothing buffer sits in front of the workers
const SOURCE_BUFFER: usize = 64;

pub struct NamedSource {
    pub name: String,
    pub source: Box<dyn Source>,
}

impl NamedSource {
    pub fn new<S: Into<String>>(name: S, source: Box<dyn Source>) -> Self {
        NamedSource {
            name: name.into(),
            source,
        }
    }
}

// combine named sources into the lexicographic cartesian product
//
// the first source streams once; every deeper source is restarted for each
// prefix value, so the last source varies fastest.  per-source counts are
// collected from the first run of each source and multiplied into a single
// global count once all of them are known.
pub struct Multiplexer {
    sources: Vec<NamedSource>,
}

impl Multiplexer {
    pub fn new(sources: Vec<NamedSource>) -> Result<Self> {
        if sources.is_empty() {
            bail!("no placeholder sources configured");
        }

        for source in &sources[1..] {
            if !source.source.restartable() {
                bail!(
                    "source for {:?} cannot be restarted and is only valid as the first placeholder",
                    source.name
                );
            }
        }

        Ok(Multiplexer { sources })
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    // enumerate the product onto the tuple channel and deliver the global
    // count; both channels close when this returns, on every exit path
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        tuples: mpsc::Sender<Vec<String>>,
        counts: mpsc::Sender<u64>,
    ) -> Result<()> {
        let mut sinks = Vec::with_capacity(self.sources.len());
        let mut count_rxs = Vec::with_capacity(self.sources.len());

        for _ in &self.sources {
            let (tx, rx) = mpsc::channel(1);
            sinks.push(Some(tx));
            count_rxs.push(rx);
        }

        let enumerate = async {
            let mut prefix = Vec::with_capacity(self.sources.len());
            let mut sinks = sinks;
            self.walk(0, cancel, &mut prefix, &tuples, &mut sinks)
                .await
                .map(|_| ())
        };

        let collect = async {
            let mut total: u64 = 1;

            for rx in &mut count_rxs {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    c = rx.recv() => match c {
                        Some(c) => total = total.saturating_mul(c),
                        // a source went away without a count, which only
                        // happens when the run stopped early
                        None => return Ok(()),
                    },
                }
            }

            let _ = counts.send(total).await;
            Ok(())
        };

        tokio::try_join!(enumerate, collect)?;
        Ok(())
    }

    // returns false once the downstream is gone and enumeration should
    // stop; the producing source notices on its next send and winds down
    fn walk<'a>(
        &'a self,
        level: usize,
        cancel: &'a CancellationToken,
        prefix: &'a mut Vec<String>,
        tuples: &'a mpsc::Sender<Vec<String>>,
        sinks: &'a mut Vec<Option<mpsc::Sender<u64>>>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let (tx, rx) = mpsc::channel(SOURCE_BUFFER);

            // only the first run of a source reports its count
            let sink = CountSink::from(sinks[level].take());

            let produce = self.sources[level].source.produce(cancel, tx, sink);

            let consume = async {
                let mut rx = rx;

                while let Some(value) = rx.recv().await {
                    prefix.push(value);

                    let keep_going = if level + 1 == self.sources.len() {
                        forward(cancel, tuples, prefix.clone()).await
                    } else {
                        self.walk(level + 1, cancel, prefix, tuples, sinks).await?
                    };

                    prefix.pop();

                    if !keep_going {
                        return Ok(false);
                    }
                }

                Ok(true)
            };

            let (_, keep_going) = tokio::try_join!(produce, consume)?;
            Ok(keep_going)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RangeSource, StdinSource, ValueSource};

    fn named(name: &str, source: Box<dyn Source>) -> NamedSource {
        NamedSource::new(name, source)
    }

    async fn run(mux: &Multiplexer) -> (Vec<Vec<String>>, Option<u64>) {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(100_000);
        let (ctx, mut crx) = mpsc::channel(1);

        mux.run(&cancel, tx, ctx).await.unwrap();

        let mut tuples = Vec::new();
        while let Some(t) = rx.recv().await {
            tuples.push(t);
        }

        (tuples, crx.recv().await)
    }

    #[tokio::test]
    async fn product_is_lexicographic() {
        let mux = Multiplexer::new(vec![
            named("FUZZ", Box::new(RangeSource::parse("1-2").unwrap())),
            named("FUZ2Z", Box::new(RangeSource::parse("7-9").unwrap())),
        ])
        .unwrap();

        let (tuples, count) = run(&mux).await;

        assert_eq!(
            tuples,
            vec![
                vec!["1", "7"],
                vec!["1", "8"],
                vec!["1", "9"],
                vec!["2", "7"],
                vec!["2", "8"],
                vec!["2", "9"],
            ]
        );
        assert_eq!(count, Some(6));
    }

    #[tokio::test]
    async fn three_way_product_count() {
        let mux = Multiplexer::new(vec![
            named("A", Box::new(RangeSource::parse("1-3").unwrap())),
            named("B", Box::new(ValueSource::new("x"))),
            named("C", Box::new(RangeSource::parse("1-4").unwrap())),
        ])
        .unwrap();

        let (tuples, count) = run(&mux).await;

        assert_eq!(tuples.len(), 12);
        assert_eq!(count, Some(12));
        assert!(tuples.iter().all(|t| t.len() == 3));
        // last source varies fastest
        assert_eq!(tuples[0], vec!["1", "x", "1"]);
        assert_eq!(tuples[1], vec!["1", "x", "2"]);
        assert_eq!(tuples[4], vec!["2", "x", "1"]);
    }

    #[tokio::test]
    async fn cancellation_emits_no_count() {
        let mux = Multiplexer::new(vec![named(
            "FUZZ",
            Box::new(RangeSource::parse("1-1000000").unwrap()),
        )])
        .unwrap();

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let (ctx, mut crx) = mpsc::channel(1);

        cancel.cancel();
        mux.run(&cancel, tx, ctx).await.unwrap();

        // the count collector saw the cancellation before all counts arrived
        while rx.recv().await.is_some() {}
        assert_eq!(crx.recv().await, None);
    }

    #[test]
    fn non_restartable_only_first() {
        assert!(
            Multiplexer::new(vec![
                named("FUZZ", Box::new(StdinSource::new())),
                named("FUZ2Z", Box::new(ValueSource::new("x"))),
            ])
            .is_ok()
        );

        assert!(
            Multiplexer::new(vec![
                named("FUZZ", Box::new(ValueSource::new("x"))),
                named("FUZ2Z", Box::new(StdinSource::new())),
            ])
            .is_err()
        );

        assert!(Multiplexer::new(Vec::new()).is_err());
    }
}
