use std::{
    convert::Infallible,
    fs,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use adshield::{
    config::{Config, FilterListSource},
    filter_list::{self, FetchError, ListOrigin},
    AdBlocker, ResourceType,
};
use hyper::{
    header,
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use portpicker::pick_unused_port;
use tempfile::tempdir;
use tokio::task::JoinHandle;

const LIST_BODY: &str = "! Title: test list\n||tracker.example^\n/ads/*$script\n";
const OTHER_BODY: &str = "||metrics.example^\n";
const CACHED_BODY: &str = "||cached.example^\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn downloads_list_and_writes_cache() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");
    let client = client();
    let source = FilterListSource::new("easylist", server.url("/list"));

    let content = filter_list::acquire_one(&client, &source, tmp.path(), Duration::from_secs(3600))
        .await
        .expect("download succeeds");

    assert_eq!(content.origin, ListOrigin::Download);
    assert_eq!(content.text, LIST_BODY);
    let cached = fs::read_to_string(tmp.path().join("easylist.txt")).expect("cache written");
    assert_eq!(cached, LIST_BODY);
    assert_eq!(server.hits(), 1);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_cache_skips_network() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("easylist.txt"), CACHED_BODY).expect("seed cache");

    let source = FilterListSource::new("easylist", server.url("/list"));
    let content = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::from_secs(3600))
        .await
        .expect("cache read succeeds");

    assert_eq!(content.origin, ListOrigin::Cache);
    assert_eq!(content.text, CACHED_BODY);
    assert_eq!(server.hits(), 0);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_cache_is_overwritten() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");
    let cache = tmp.path().join("easylist.txt");
    fs::write(&cache, CACHED_BODY).expect("seed cache");

    let source = FilterListSource::new("easylist", server.url("/list"));
    let content = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect("download succeeds");

    assert_eq!(content.origin, ListOrigin::Download);
    assert_eq!(fs::read_to_string(&cache).unwrap(), LIST_BODY);
    assert_eq!(server.hits(), 1);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_download_keeps_stale_cache() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");
    let cache = tmp.path().join("easylist.txt");
    fs::write(&cache, CACHED_BODY).expect("seed cache");

    let source = FilterListSource::new("easylist", server.url("/missing"));
    let content = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect("stale cache used");

    assert_eq!(content.origin, ListOrigin::StaleCache);
    assert_eq!(content.text, CACHED_BODY);
    assert_eq!(fs::read_to_string(&cache).unwrap(), CACHED_BODY);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_download_without_cache_is_an_error() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let source = FilterListSource::new("easylist", server.url("/missing"));
    let err = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect_err("404 is a failure");

    match err {
        FetchError::UnexpectedStatus { status, .. } => assert_eq!(status, StatusCode::NOT_FOUND),
        other => panic!("unexpected error {other}"),
    }
    assert!(!tmp.path().join("easylist.txt").exists());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follows_short_redirect_chains() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let source = FilterListSource::new("redirected", server.url("/redirect/3"));
    let content = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect("redirects followed");

    assert_eq!(content.text, LIST_BODY);
    assert_eq!(server.hits(), 4);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follows_exactly_the_configured_redirects() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let source = FilterListSource::new("five-hops", server.url("/redirect/5"));
    let content = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect("five redirects followed");
    assert_eq!(content.text, LIST_BODY);
    assert_eq!(server.hits(), 6);

    let source = FilterListSource::new("six-hops", server.url("/redirect/6"));
    let err = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect_err("sixth redirect refused");
    match err {
        FetchError::Http(err) => assert!(err.is_redirect(), "expected redirect error, got {err}"),
        other => panic!("unexpected error {other}"),
    }
    assert!(!tmp.path().join("six-hops.txt").exists());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redirect_loop_hits_the_limit() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let source = FilterListSource::new("looping", server.url("/loop"));
    let err = filter_list::acquire_one(&client(), &source, tmp.path(), Duration::ZERO)
        .await
        .expect_err("loop aborted");

    match err {
        FetchError::Http(err) => assert!(err.is_redirect(), "expected redirect error, got {err}"),
        other => panic!("unexpected error {other}"),
    }
    assert!(server.hits() <= 6, "followed {} hops", server.hits());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acquire_skips_failures_and_keeps_order() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let config = Config {
        cache_dir: tmp.path().join("lists"),
        lists: vec![
            FilterListSource::new("first", server.url("/list")),
            FilterListSource::new("broken", server.url("/missing")),
            FilterListSource::new("second", server.url("/other")),
        ],
        ..Config::default()
    };

    let contents = filter_list::acquire(&config).await;
    let names: Vec<_> = contents.iter().map(|content| content.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert!(tmp.path().join("lists/first.txt").exists());
    assert!(tmp.path().join("lists/second.txt").exists());
    assert!(!tmp.path().join("lists/broken.txt").exists());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_installs_rules_from_all_lists() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let config = Config {
        cache_dir: tmp.path().to_path_buf(),
        lists: vec![
            FilterListSource::new("ads", server.url("/list")),
            FilterListSource::new("privacy", server.url("/other")),
        ],
        ..Config::default()
    };

    let blocker = AdBlocker::new(config);
    let summary = blocker.refresh().await;

    assert_eq!(summary.lists, vec!["ads".to_string(), "privacy".to_string()]);
    assert_eq!(summary.domain_rules, 2);
    assert_eq!(summary.pattern_rules, 1);
    assert!(blocker.should_block("https://tracker.example/p.gif", &ResourceType::Image, ""));
    assert!(blocker.should_block("https://x.metrics.example/", &ResourceType::Image, ""));
    assert!(blocker.should_block("https://site.example/ads/a.js", &ResourceType::Script, ""));
    assert!(!blocker.should_block("https://site.example/ads/a.png", &ResourceType::Image, ""));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_loads_lists_in_background() {
    let server = start_mock_server().await;
    let tmp = tempdir().expect("tempdir");

    let config = Config {
        cache_dir: tmp.path().to_path_buf(),
        lists: vec![FilterListSource::new("ads", server.url("/list"))],
        ..Config::default()
    };

    let blocker = AdBlocker::new(config);
    blocker.start();

    let mut loaded = false;
    for _ in 0..100 {
        if blocker.state().domain_rules > 0 {
            loaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(loaded, "rules were not loaded by the refresh loop");
    assert!(blocker.is_domain_blocked("tracker.example"));

    blocker.stop();
    server.shutdown().await;
}

fn client() -> reqwest::Client {
    filter_list::build_client(&Config::default()).expect("client")
}

struct MockServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn start_mock_server() -> MockServer {
    let port = pick_unused_port().expect("port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_service = hits.clone();

    let make_service = make_service_fn(move |_conn| {
        let hits = hits_for_service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(route(addr, req.uri().path()))
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .expect("bind server")
        .serve(make_service);

    let handle = tokio::spawn(async move {
        if let Err(err) = server.await {
            eprintln!("mock server error: {err}");
        }
    });

    MockServer { addr, hits, handle }
}

fn route(addr: SocketAddr, path: &str) -> Response<Body> {
    match path {
        "/list" => text(LIST_BODY),
        "/other" => text(OTHER_BODY),
        "/loop" => redirect(addr, "/loop"),
        _ => match path.strip_prefix("/redirect/").and_then(|n| n.parse::<u32>().ok()) {
            Some(0) => text(LIST_BODY),
            Some(n) => redirect(addr, &format!("/redirect/{}", n - 1)),
            None => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::from("not found"))
                .unwrap(),
        },
    }
}

fn text(body: &'static str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .unwrap()
}

fn redirect(addr: SocketAddr, path: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, format!("http://{addr}{path}"))
        .body(Body::empty())
        .unwrap()
}
