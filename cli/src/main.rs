use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error};

use engine::record::{Recorder, ResponseRecord, RunRecord, TemplateRecord};
use engine::{
    AddressFamily, Extracter, FileSource, HeaderDirective, Multiplexer, NamedSource, RangeSource,
    RequestTemplate, ResponseFilters, Runner, RunnerOptions, StdinSource, TransportOptions,
    ValueSource, WorkerOptions, build_client, parse_placeholder, parse_range_list,
};

mod reporter;

use reporter::Reporter;

/// fast, concurrent http enumeration
#[derive(Parser)]
#[command(name = "monsoon", version, about, long_about = None)]
struct Cli {
    /// target url; placeholder names are substituted per request
    #[arg()]
    url: String,

    /// integer range for the FUZZ placeholder (A-B, repeatable)
    #[arg(short, long)]
    range: Vec<String>,

    /// printf-style format applied to range values
    #[arg(long, default_value = "%d")]
    range_format: String,

    /// wordlist file for the FUZZ placeholder, - reads stdin
    #[arg(short, long)]
    file: Option<String>,

    /// fixed value for the FUZZ placeholder
    #[arg(long)]
    value: Option<String>,

    /// additional placeholder as NAME:KIND:OPTIONS with KIND one of
    /// file, range, value, exec
    #[arg(long)]
    replace: Vec<String>,

    /// http method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// request body
    #[arg(short = 'd', long, default_value = "")]
    data: String,

    /// header directive: "name: value" adds, a bare "name" removes
    #[arg(short = 'H', long = "header")]
    header: Vec<String>,

    /// read the base request from an http template file
    #[arg(long)]
    template_file: Option<PathBuf>,

    /// basic auth credentials as user:pass, overriding the url userinfo
    #[arg(long)]
    user: Option<String>,

    /// omit the content length and send the body chunked
    #[arg(long)]
    force_chunked: bool,

    /// number of parallel requests
    #[arg(short = 't', long, default_value_t = engine::run::DEFAULT_WORKERS)]
    threads: usize,

    /// maximum requests per second
    #[arg(long)]
    requests_per_second: Option<f64>,

    /// skip the first n requests
    #[arg(long, default_value_t = 0)]
    skip: u64,

    /// send at most n requests
    #[arg(long)]
    limit: Option<u64>,

    /// read at most this many response body bytes
    #[arg(long, default_value_t = engine::worker::DEFAULT_MAX_BODY_SIZE)]
    max_body_size: usize,

    /// decompress gzip-encoded response bodies
    #[arg(long)]
    decompress: bool,

    /// skip tls certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// pem file holding the client certificate and key, concatenated
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// allow http/2
    #[arg(long)]
    http2: bool,

    /// only connect over ipv4
    #[arg(short = '4', long)]
    ipv4: bool,

    /// only connect over ipv6
    #[arg(short = '6', long)]
    ipv6: bool,

    /// follow this many redirects, then return the last response
    #[arg(long, default_value_t = 0)]
    follow_redirect: usize,

    /// hide responses with these status codes (N, N-M, -M, N-)
    #[arg(long)]
    hide_status: Vec<String>,

    /// only show responses with these status codes
    #[arg(long)]
    show_status: Vec<String>,

    /// hide responses whose header size matches
    #[arg(long)]
    hide_header_size: Vec<String>,

    /// hide responses whose body size matches
    #[arg(long)]
    hide_body_size: Vec<String>,

    /// hide responses whose raw header or body matches this regex
    #[arg(long)]
    hide_pattern: Vec<String>,

    /// only show responses matching at least one of these regexes
    #[arg(long)]
    show_pattern: Vec<String>,

    /// extract data from the response body with this regex
    #[arg(long)]
    extract: Vec<String>,

    /// pipe the response body through this command and keep its stdout
    #[arg(long)]
    extract_pipe: Vec<String>,

    /// plain text copy of the output (defaults into MONSOON_LOG_DIR)
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// write a json record of the run to this file
    #[arg(long)]
    json_file: Option<PathBuf>,

    /// verbose internal logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn sources(&self) -> Result<Vec<NamedSource>> {
        let legacy = [
            !self.range.is_empty(),
            self.file.is_some(),
            self.value.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count();

        if legacy > 1 {
            bail!("--range, --file and --value are mutually exclusive");
        }

        let mut sources: Vec<NamedSource> = Vec::new();

        if !self.range.is_empty() {
            let spec = format!("{}:{}", self.range.join(","), self.range_format);
            sources.push(NamedSource::new(
                "FUZZ",
                Box::new(RangeSource::parse(&spec)?),
            ));
        } else if let Some(file) = &self.file {
            if file == "-" {
                sources.push(NamedSource::new("FUZZ", Box::new(StdinSource::new())));
            } else {
                sources.push(NamedSource::new("FUZZ", Box::new(FileSource::new(file))));
            }
        } else if let Some(value) = &self.value {
            sources.push(NamedSource::new("FUZZ", Box::new(ValueSource::new(value))));
        }

        for spec in &self.replace {
            let (name, source) = parse_placeholder(spec)?;

            if sources.iter().any(|s| s.name == name) {
                bail!("placeholder {:?} is configured twice", name);
            }

            sources.push(NamedSource::new(name, source));
        }

        if sources.is_empty() {
            bail!("no values configured; use --range, --file, --value or --replace");
        }

        Ok(sources)
    }

    fn template(&self, names: Vec<String>) -> Result<RequestTemplate> {
        let mut template = RequestTemplate::new(self.url.clone(), names);

        template.method = self.method.clone();
        template.body = self.data.clone();
        template.headers = self.header.iter().map(|h| HeaderDirective::parse(h)).collect();
        template.force_chunked = self.force_chunked;
        template.basic_auth = self.user.clone();

        if let Some(path) = &self.template_file {
            template.wire = Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read request template {:?}", path))?,
            );
        }

        Ok(template)
    }

    fn filters(&self) -> Result<ResponseFilters> {
        let ranges = |specs: &[String]| -> Result<Vec<engine::FilterRange>> {
            let mut out = Vec::new();
            for spec in specs {
                out.extend(parse_range_list(spec)?);
            }
            Ok(out)
        };

        let patterns = |specs: &[String]| -> Result<Vec<regex::bytes::Regex>> {
            specs
                .iter()
                .map(|p| {
                    regex::bytes::Regex::new(p)
                        .with_context(|| format!("invalid filter pattern {:?}", p))
                })
                .collect()
        };

        Ok(ResponseFilters {
            reject_status: ranges(&self.hide_status)?,
            accept_status: ranges(&self.show_status)?,
            hide_header_size: ranges(&self.hide_header_size)?,
            hide_body_size: ranges(&self.hide_body_size)?,
            hide_pattern: patterns(&self.hide_pattern)?,
            show_pattern: patterns(&self.show_pattern)?,
        })
    }

    fn extracter(&self) -> Result<Extracter> {
        let patterns = self
            .extract
            .iter()
            .map(|p| {
                regex::bytes::Regex::new(p)
                    .with_context(|| format!("invalid extract pattern {:?}", p))
            })
            .collect::<Result<Vec<_>>>()?;

        let commands = self
            .extract_pipe
            .iter()
            .map(|c| c.split_whitespace().map(String::from).collect())
            .collect();

        Ok(Extracter { patterns, commands })
    }

    fn rate(&self) -> Result<Option<f64>> {
        match self.requests_per_second {
            Some(rps) if !rps.is_finite() || rps <= 0.0 => {
                bail!("--requests-per-second must be a positive number");
            }
            rps => Ok(rps),
        }
    }

    fn transport(&self) -> Result<TransportOptions> {
        let address_family = match (self.ipv4, self.ipv6) {
            (true, true) => bail!("--ipv4 and --ipv6 are mutually exclusive"),
            (true, false) => AddressFamily::Ipv4,
            (false, true) => AddressFamily::Ipv6,
            (false, false) => AddressFamily::Any,
        };

        Ok(TransportOptions {
            insecure: self.insecure,
            client_cert: self.client_cert.clone(),
            http2: self.http2,
            follow_redirects: self.follow_redirect,
            pool_size: self.threads.max(1),
            address_family,
        })
    }

    fn logfile(&self) -> Option<PathBuf> {
        if self.logfile.is_some() {
            return self.logfile.clone();
        }

        match std::env::var("MONSOON_LOG_DIR") {
            Ok(dir) if !dir.is_empty() => {
                let name = format!("monsoon-{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"));
                Some(PathBuf::from(dir).join(name))
            }
            _ => None,
        }
    }

    fn record(&self) -> RunRecord {
        RunRecord {
            template: TemplateRecord {
                url: self.url.clone(),
                method: self.method.clone(),
                body: self.data.clone(),
                header: self.header.clone(),
            },
            input_file: self.file.clone().unwrap_or_default(),
            ranges: self.range.clone(),
            range_format: self.range_format.clone(),
            extract: self.extract.clone(),
            extract_pipe: self.extract_pipe.clone(),
            ..RunRecord::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    // everything that can fail here is a configuration error, before the
    // pipeline starts
    let sources = cli.sources()?;
    let multiplexer = Multiplexer::new(sources)?;

    let template = Arc::new(cli.template(multiplexer.names())?);
    let client = build_client(&cli.transport()?)?;
    let filters = cli.filters()?;
    let extracter = cli.extracter()?;
    let rate = cli.rate()?;

    let mut reporter = Reporter::new(cli.logfile())?;
    let mut recorder = cli
        .json_file
        .clone()
        .map(|path| Recorder::new(path, cli.record()));

    let runner = Runner {
        multiplexer,
        template,
        client,
        filters,
        extracter,
        opts: RunnerOptions {
            workers: cli.threads.max(1),
            skip: cli.skip,
            limit: cli.limit,
            rate,
            worker: WorkerOptions {
                max_body_size: cli.max_body_size,
                decompress: cli.decompress,
            },
            ..RunnerOptions::default()
        },
    };

    let cancel = CancellationToken::new();

    // first interrupt drains the run, the second one exits on the spot
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    }

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    let (count_tx, mut count_rx) = mpsc::channel(1);

    let run = tokio::spawn(runner.run(cancel.clone(), resp_tx, count_tx));

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut count_done = false;

    loop {
        tokio::select! {
            response = resp_rx.recv() => match response {
                Some(response) => {
                    reporter.response(&response);

                    if let Some(recorder) = &mut recorder {
                        recorder.record.responses.push(ResponseRecord::from(&response));
                    }
                }
                None => break,
            },
            count = count_rx.recv(), if !count_done => {
                if let Some(count) = count {
                    reporter.total(count);
                }
                count_done = true;
            },
            _ = tick.tick() => {
                if let Some(recorder) = &mut recorder {
                    recorder.record.apply_stats(&reporter.stats);
                    if let Err(err) = recorder.write().await {
                        error!(error = %err, "failed to write run record");
                    }
                }
            },
        }
    }

    // the count can still be in flight when the stream closes
    if let Ok(count) = count_rx.try_recv() {
        reporter.total(count);
    }

    let result = run.await.context("pipeline task panicked")?;

    reporter.summary();

    if let Some(recorder) = &mut recorder {
        recorder.record.apply_stats(&reporter.stats);
        recorder.record.end = Some(chrono::Local::now());
        recorder.record.cancelled = cancel.is_cancelled();
        recorder.write().await?;
    }

    // a graceful interrupt still counts as a successful run
    result
}
