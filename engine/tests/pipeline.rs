use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use engine::{
    Extracter, Multiplexer, NamedSource, RangeSource, RequestTemplate, Response, ResponseFilters,
    Runner, RunnerOptions, RunStats, TransportOptions, ValueSource, WorkerOptions, build_client,
    parse_range_list,
};

fn range_sources(spec: &str) -> Multiplexer {
    Multiplexer::new(vec![NamedSource::new(
        "FUZZ",
        Box::new(RangeSource::parse(spec).unwrap()),
    )])
    .unwrap()
}

async fn run_all(runner: Runner) -> (Vec<Response>, Option<u64>) {
    let cancel = CancellationToken::new();
    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    let (count_tx, mut count_rx) = mpsc::channel(1);

    let handle = tokio::spawn(runner.run(cancel, resp_tx, count_tx));

    let mut responses = Vec::new();
    while let Some(response) = resp_rx.recv().await {
        responses.push(response);
    }

    handle.await.unwrap().unwrap();
    (responses, count_rx.recv().await)
}

fn basic_runner(server: &MockServer, mux: Multiplexer) -> Runner {
    Runner {
        multiplexer: mux,
        template: Arc::new(RequestTemplate::new(
            format!("{}/FUZZ", server.uri()),
            vec!["FUZZ".to_string()],
        )),
        client: build_client(&TransportOptions::default()).unwrap(),
        filters: ResponseFilters::default(),
        extracter: Extracter::default(),
        opts: RunnerOptions::default(),
    }
}

// wordlist enumeration with a hidden 404: three marked responses, stats
// counting all of them
#[tokio::test]
async fn wordlist_with_hidden_not_found() {
    let server = MockServer::start().await;

    for (p, status) in [("/a", 200), ("/b", 404), ("/c", 200)] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(status).set_body_string("hello"))
            .mount(&server)
            .await;
    }

    let file = {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"a\nb\nc\n").unwrap();
        f
    };

    let mux = Multiplexer::new(vec![NamedSource::new(
        "FUZZ",
        Box::new(engine::FileSource::new(file.path())),
    )])
    .unwrap();

    let mut runner = basic_runner(&server, mux);
    runner.filters = ResponseFilters {
        reject_status: parse_range_list("404").unwrap(),
        ..ResponseFilters::default()
    };

    let (responses, count) = run_all(runner).await;

    assert_eq!(responses.len(), 3);
    assert_eq!(count, Some(3));

    let mut stats = RunStats::new();
    for response in &responses {
        assert!(response.error.is_none());
        stats.update(response);
    }

    assert_eq!(stats.status_codes.get(&200), Some(&2));
    assert_eq!(stats.status_codes.get(&404), Some(&1));
    assert_eq!(stats.shown, 2);
    assert_eq!(stats.hidden, 1);
}

// formatted range values land in a cookie header
#[tokio::test]
async fn formatted_range_in_cookie_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mux = Multiplexer::new(vec![NamedSource::new(
        "FUZZ",
        Box::new(RangeSource::parse("1-3:%04d").unwrap()),
    )])
    .unwrap();

    let mut runner = Runner {
        template: Arc::new(RequestTemplate::new(server.uri(), vec!["FUZZ".to_string()])),
        ..basic_runner(&server, mux)
    };
    Arc::get_mut(&mut runner.template)
        .unwrap()
        .headers
        .push(engine::HeaderDirective::parse("Cookie: sessionid=FUZZ"));

    let (responses, _) = run_all(runner).await;
    assert_eq!(responses.len(), 3);

    let mut cookies: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.headers.get("cookie").unwrap().to_str().unwrap().to_string())
        .collect();
    cookies.sort();

    assert_eq!(
        cookies,
        vec!["sessionid=0001", "sessionid=0002", "sessionid=0003"]
    );
}

// regex extraction collects the capture group
#[tokio::test]
async fn regex_extraction_from_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Set-Cookie: ABCD\n"))
        .mount(&server)
        .await;

    let mux = range_sources("1-1");
    let mut runner = basic_runner(&server, mux);
    runner.extracter = Extracter {
        patterns: vec![regex::bytes::Regex::new(r"(?i)Set-Cookie: (.*)").unwrap()],
        ..Extracter::default()
    };

    let (responses, _) = run_all(runner).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].extract, vec!["ABCD"]);
    assert_eq!(responses[0].extract_error, None);
}

// the bounded read stops at the cap
#[tokio::test]
async fn body_read_is_bounded() {
    let server = MockServer::start().await;

    let big = vec![b'x'; 10_000];
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(big))
        .mount(&server)
        .await;

    let mux = range_sources("1-1");
    let mut runner = basic_runner(&server, mux);
    runner.opts.worker = WorkerOptions {
        max_body_size: 1000,
        decompress: false,
    };

    let (responses, _) = run_all(runner).await;
    assert_eq!(responses[0].raw_body.len(), 1000);
    assert_eq!(responses[0].body.bytes, 1000);

    // a body below the cap comes through whole
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'y'; 500]))
        .mount(&server)
        .await;

    let mux = range_sources("1-1");
    let mut runner = basic_runner(&server, mux);
    runner.opts.worker = WorkerOptions {
        max_body_size: 1000,
        decompress: false,
    };

    let (responses, _) = run_all(runner).await;
    assert_eq!(responses[0].raw_body.len(), 500);
}

// gzip bodies are decoded when decompression is on
#[tokio::test]
async fn gzip_body_decompression() {
    let server = MockServer::start().await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"the hidden payload").unwrap();
    let compressed = encoder.finish().unwrap();

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(compressed)
                .insert_header("Content-Encoding", "gzip"),
        )
        .mount(&server)
        .await;

    let mux = range_sources("1-1");
    let mut runner = basic_runner(&server, mux);
    runner.opts.worker = WorkerOptions {
        max_body_size: 1024 * 1024,
        decompress: true,
    };

    let (responses, _) = run_all(runner).await;
    assert!(responses[0].body_decompressed);
    assert_eq!(responses[0].raw_body, b"the hidden payload");
}

// a wire template supplies method, path and host while the url argument
// only provides the dial target
#[tokio::test]
async fn wire_template_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/inner"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mux = range_sources("1-1");

    let mut template = RequestTemplate::new(server.uri(), vec!["FUZZ".to_string()]);
    template.wire = Some(b"GET /inner HTTP/2\r\nHost: inner.example:8443\r\n\r\n".to_vec());
    template
        .headers
        .push(engine::HeaderDirective::parse("host: outer:8888"));

    let runner = Runner {
        template: Arc::new(template),
        ..basic_runner(&server, mux)
    };

    let (responses, _) = run_all(runner).await;
    assert_eq!(responses[0].status.unwrap().as_u16(), 200);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/inner");
    assert_eq!(
        requests[0].headers.get("host").unwrap().to_str().unwrap(),
        "outer:8888"
    );
}

// redirects are not followed past the configured count; the last response
// is handed back instead
#[tokio::test]
async fn redirects_capped_not_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/2", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mux = Multiplexer::new(vec![NamedSource::new(
        "FUZZ",
        Box::new(ValueSource::new("1")),
    )])
    .unwrap();

    let runner = basic_runner(&server, mux);
    let (responses, _) = run_all(runner).await;
    assert_eq!(responses[0].status.unwrap().as_u16(), 302);

    let mux = Multiplexer::new(vec![NamedSource::new(
        "FUZZ",
        Box::new(ValueSource::new("1")),
    )])
    .unwrap();

    let mut runner = basic_runner(&server, mux);
    runner.client = build_client(&TransportOptions {
        follow_redirects: 1,
        ..TransportOptions::default()
    })
    .unwrap();

    let (responses, _) = run_all(runner).await;
    assert_eq!(responses[0].status.unwrap().as_u16(), 200);
}

// pacing: ten requests at twenty per second cannot finish instantly
#[tokio::test]
async fn rate_limited_run_is_paced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mux = range_sources("1-10");
    let mut runner = basic_runner(&server, mux);
    runner.opts.rate = Some(20.0);

    let start = Instant::now();
    let (responses, count) = run_all(runner).await;
    let elapsed = start.elapsed();

    assert_eq!(responses.len(), 10);
    assert_eq!(count, Some(10));
    assert!(
        elapsed >= Duration::from_millis(400),
        "ten requests at 20/s took only {:?}",
        elapsed
    );
}

// transport failures ride on the record and the run keeps going
#[tokio::test]
async fn connection_errors_are_per_request() {
    // nothing listens on this port
    let mux = range_sources("1-3");

    let runner = Runner {
        multiplexer: mux,
        template: Arc::new(RequestTemplate::new(
            "http://127.0.0.1:9/FUZZ",
            vec!["FUZZ".to_string()],
        )),
        client: build_client(&TransportOptions::default()).unwrap(),
        filters: ResponseFilters::default(),
        extracter: Extracter::default(),
        opts: RunnerOptions::default(),
    };

    let (responses, count) = run_all(runner).await;

    assert_eq!(responses.len(), 3);
    assert_eq!(count, Some(3));
    for response in &responses {
        assert!(matches!(
            response.error,
            Some(engine::RequestError::Transport(_))
        ));
    }
}
