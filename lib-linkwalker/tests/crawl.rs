//! End-to-end crawls against an in-memory site, injected through the
//! downloader capability. No sockets involved.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use url::Url;

use lib_linkwalker::crawler::parser_for;
use lib_linkwalker::{
    Capabilities, CanonicalUrl, CrawlConfig, CrawlMaster, DownloadError, Downloaded, Downloader,
    FetchMode, FetchStatus, Parser, SiteModel, SkipReason,
};

#[derive(Clone)]
struct StaticResponse {
    code: u16,
    content_type: String,
    body: String,
    location: Option<String>,
}

fn html(body: &str) -> StaticResponse {
    StaticResponse {
        code: 200,
        content_type: "text/html".to_owned(),
        body: body.to_owned(),
        location: None,
    }
}

fn redirect(code: u16, location: &str) -> StaticResponse {
    StaticResponse {
        code,
        content_type: String::new(),
        body: String::new(),
        location: Some(location.to_owned()),
    }
}

/// The whole "server": URL → response, plus a fetch counter per URL.
struct StaticSite {
    responses: HashMap<String, StaticResponse>,
    hits: Mutex<HashMap<String, usize>>,
}

impl StaticSite {
    fn new(entries: Vec<(&str, StaticResponse)>) -> Arc<StaticSite> {
        Arc::new(StaticSite {
            responses: entries
                .into_iter()
                .map(|(url, response)| (url.to_owned(), response))
                .collect(),
            hits: Mutex::new(HashMap::new()),
        })
    }

    fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Downloader for StaticSite {
    async fn download(&self, url: &Url, mode: FetchMode) -> Result<Downloaded, DownloadError> {
        *self
            .hits
            .lock()
            .unwrap()
            .entry(url.as_str().to_owned())
            .or_insert(0) += 1;

        // Let fetches overlap so the dedup actually races.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let response = match self.responses.get(url.as_str()) {
            Some(response) => response.clone(),
            None => return Ok(Downloaded::BadStatus { code: 404 }),
        };

        if let Some(location) = response.location {
            return Ok(Downloaded::Redirect {
                code: response.code,
                location,
            });
        }

        match mode {
            FetchMode::Head => Ok(Downloaded::Empty {
                code: response.code,
                content_type: Some(response.content_type),
                content_length: Some(response.body.len() as u64),
            }),
            FetchMode::Get => Ok(Downloaded::Body {
                code: response.code,
                content_type: Some(response.content_type),
                content: response.body.into_bytes(),
            }),
        }
    }
}

struct StaticCapabilities {
    site: Arc<StaticSite>,
}

impl Capabilities for StaticCapabilities {
    fn downloader(&self, _: &CrawlConfig, _: &BTreeSet<String>) -> Arc<dyn Downloader> {
        self.site.clone()
    }

    fn parser(&self, config: &CrawlConfig) -> Arc<dyn Parser> {
        parser_for(config.parser)
    }
}

fn run_crawl(
    site: &Arc<StaticSite>,
    start_urls: &[&str],
    options: &[(&str, &str)],
) -> SiteModel {
    let mut config = CrawlConfig::new(start_urls.iter().copied());
    for (key, value) in options {
        config.apply_option(key, value).unwrap();
    }

    CrawlMaster::with_capabilities(config, StaticCapabilities { site: site.clone() })
        .run()
        .unwrap()
}

fn canon(raw: &str) -> CanonicalUrl {
    CanonicalUrl::from_http(Url::parse(raw).unwrap())
}

#[test]
fn single_page_with_two_good_links() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/a">a</a><a href="/b">b</a>"#)),
        ("http://h/a", html("")),
        ("http://h/b", html("")),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[]);

    assert_eq!(model.len(), 3);
    assert_eq!(model.erroneous_count(), 0);
    for raw in ["http://h/", "http://h/a", "http://h/b"] {
        let page = model.page(&canon(raw)).unwrap();
        assert_eq!(page.status, FetchStatus::Ok(200), "{}", raw);
    }

    // Outgoing references keep document order.
    let start = model.page(&canon("http://h/")).unwrap();
    let targets: Vec<_> = start.outgoing.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(targets, vec!["http://h/a", "http://h/b"]);
    assert_eq!(model.page(&canon("http://h/a")).unwrap().depth, 1);
}

#[test]
fn missing_page_counts_as_broken() {
    let site = StaticSite::new(vec![(
        "http://h/",
        html(r#"<a href="/missing">gone</a>"#),
    )]);

    let model = run_crawl(&site, &["http://h/"], &[]);

    let missing = model.page(&canon("http://h/missing")).unwrap();
    assert_eq!(missing.status, FetchStatus::HttpError(404));
    assert!(missing.is_erroneous());
    assert_eq!(model.erroneous_count(), 1);
}

#[test]
fn depth_cap_stops_the_walk() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/1">next</a>"#)),
        ("http://h/1", html(r#"<a href="/2">next</a>"#)),
        ("http://h/2", html(r#"<a href="/3">next</a>"#)),
        ("http://h/3", html("")),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[("depth", "1")]);

    assert_eq!(model.page(&canon("http://h/")).unwrap().depth, 0);
    assert_eq!(model.page(&canon("http://h/1")).unwrap().depth, 1);

    let parked = model.page(&canon("http://h/2")).unwrap();
    assert_eq!(parked.depth, 2);
    assert!(matches!(
        parked.status,
        FetchStatus::Skipped(SkipReason::DepthExceeded)
    ));
    assert!(model.page(&canon("http://h/3")).is_none());

    assert_eq!(site.hits("http://h/2"), 0);
    assert_eq!(site.hits("http://h/3"), 0);
}

#[test]
fn shared_link_is_fetched_exactly_once_under_contention() {
    let hub_body: String = (1..=8)
        .map(|i| format!(r#"<a href="/p{}">p</a>"#, i))
        .collect();
    let mut entries = vec![("http://h/", html(&hub_body)), ("http://h/shared", html(""))];
    let leaves: Vec<String> = (1..=8).map(|i| format!("http://h/p{}", i)).collect();
    for leaf in &leaves {
        entries.push((leaf.as_str(), html(r#"<a href="/shared">shared</a>"#)));
    }
    let site = StaticSite::new(entries);

    let model = run_crawl(
        &site,
        &["http://h/"],
        &[("workers", "8"), ("mode", "thread")],
    );

    assert_eq!(site.hits("http://h/shared"), 1);
    let shared = model.page(&canon("http://h/shared")).unwrap();
    assert_eq!(shared.status, FetchStatus::Ok(200));
    assert_eq!(shared.incoming.len(), 8);
    assert_eq!(model.erroneous_count(), 0);
}

#[test]
fn outside_host_is_skipped_by_default() {
    let site = StaticSite::new(vec![
        (
            "http://a.example/",
            html(r#"<a href="http://b.example/x">out</a>"#),
        ),
        ("http://b.example/x", html(r#"<a href="/y">deeper</a>"#)),
    ]);

    let model = run_crawl(&site, &["http://a.example/"], &[]);

    let outside = model.page(&canon("http://b.example/x")).unwrap();
    assert!(matches!(
        outside.status,
        FetchStatus::Skipped(SkipReason::OutsideScope)
    ));
    assert_eq!(site.hits("http://b.example/x"), 0);
}

#[test]
fn outside_host_is_probed_once_with_test_outside() {
    let site = StaticSite::new(vec![
        (
            "http://a.example/",
            html(r#"<a href="http://b.example/x">out</a>"#),
        ),
        ("http://b.example/x", html(r#"<a href="/y">deeper</a>"#)),
    ]);

    let model = run_crawl(&site, &["http://a.example/"], &[("test-outside", "true")]);

    let outside = model.page(&canon("http://b.example/x")).unwrap();
    assert_eq!(outside.status, FetchStatus::Ok(200));
    assert_eq!(site.hits("http://b.example/x"), 1);

    // Fetch-only: reachable, but its own references are not followed.
    assert!(outside.outgoing.is_empty());
    assert!(model.page(&canon("http://b.example/y")).is_none());
}

#[test]
fn redirect_out_of_scope_is_a_policy_skip() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/leave">bye</a>"#)),
        ("http://h/leave", redirect(302, "http://other/")),
        ("http://other/", html("")),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[]);

    let leave = model.page(&canon("http://h/leave")).unwrap();
    assert!(matches!(
        leave.status,
        FetchStatus::Skipped(SkipReason::RedirectedOutOfScope)
    ));
    assert!(model.page(&canon("http://other/")).is_none());
    assert_eq!(model.erroneous_count(), 0);
}

#[test]
fn redirect_out_of_scope_is_followed_with_test_outside() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/leave">bye</a>"#)),
        ("http://h/leave", redirect(302, "http://other/")),
        ("http://other/", html("")),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[("test-outside", "true")]);

    let leave = model.page(&canon("http://h/leave")).unwrap();
    let target = canon("http://other/");
    assert!(
        matches!(&leave.status, FetchStatus::Redirected { target: t, code: 302 } if *t == target)
    );

    let other = model.page(&target).unwrap();
    assert_eq!(other.status, FetchStatus::Ok(200));
    assert_eq!(site.hits("http://other/"), 1);
}

#[test]
fn in_scope_redirect_records_both_pages() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/old">moved</a>"#)),
        ("http://h/old", redirect(301, "/new")),
        ("http://h/new", html("")),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[]);

    let old = model.page(&canon("http://h/old")).unwrap();
    let new = canon("http://h/new");
    assert!(matches!(&old.status, FetchStatus::Redirected { target, code: 301 } if *target == new));
    assert_eq!(
        old.response.as_ref().unwrap().final_url,
        new,
        "final url points at the redirect target"
    );

    let landed = model.page(&new).unwrap();
    assert_eq!(landed.status, FetchStatus::Ok(200));
    assert_eq!(landed.depth, old.depth);
}

#[test]
fn run_once_fetches_nothing_beyond_the_start_set() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/a">a</a>"#)),
        ("http://h/a", html("")),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[("run-once", "true")]);

    assert_eq!(model.page(&canon("http://h/")).unwrap().status, FetchStatus::Ok(200));

    let parked = model.page(&canon("http://h/a")).unwrap();
    assert!(matches!(
        parked.status,
        FetchStatus::Skipped(SkipReason::DepthExceeded)
    ));
    assert!(parked.response.is_none());
    assert_eq!(site.hits("http://h/a"), 0);
}

#[test]
fn green_mode_reaches_the_same_model() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<a href="/a">a</a><a href="/b">b</a>"#)),
        ("http://h/a", html(r#"<a href="/b">b</a>"#)),
        ("http://h/b", html("")),
    ]);

    let model = run_crawl(
        &site,
        &["http://h/"],
        &[("mode", "green"), ("workers", "4")],
    );

    assert_eq!(model.len(), 3);
    assert_eq!(model.erroneous_count(), 0);
    assert_eq!(site.hits("http://h/b"), 1);
    assert_eq!(
        model.page(&canon("http://h/b")).unwrap().incoming.len(),
        2,
        "both referencing pages contribute an edge"
    );
}

#[test]
fn image_references_are_head_probed() {
    let site = StaticSite::new(vec![
        ("http://h/", html(r#"<img src="/logo.png">"#)),
        (
            "http://h/logo.png",
            StaticResponse {
                code: 200,
                content_type: "image/png".to_owned(),
                body: "not really a png".to_owned(),
                location: None,
            },
        ),
    ]);

    let model = run_crawl(&site, &["http://h/"], &[]);

    let image = model.page(&canon("http://h/logo.png")).unwrap();
    assert_eq!(image.status, FetchStatus::Ok(200));
    assert!(!image.is_html);
    assert!(image.outgoing.is_empty());
}

/// A parser that always fails, to exercise the diagnostic path end to end.
struct FailingParser;

impl Parser for FailingParser {
    fn parse(
        &self,
        _: &[u8],
        _: Option<&str>,
        _: &BTreeSet<lib_linkwalker::RefKind>,
    ) -> lib_linkwalker::Parsed {
        lib_linkwalker::Parsed::Failed {
            diagnostic: "unbalanced soup".to_owned(),
        }
    }
}

struct FailingParserCapabilities {
    site: Arc<StaticSite>,
}

impl Capabilities for FailingParserCapabilities {
    fn downloader(&self, _: &CrawlConfig, _: &BTreeSet<String>) -> Arc<dyn Downloader> {
        self.site.clone()
    }

    fn parser(&self, _: &CrawlConfig) -> Arc<dyn Parser> {
        Arc::new(FailingParser)
    }
}

#[test]
fn parse_failure_keeps_the_http_outcome() {
    let site = StaticSite::new(vec![("http://h/", html(r#"<a href="/a">a</a>"#))]);

    let config = CrawlConfig::new(["http://h/"]);
    let model = CrawlMaster::with_capabilities(
        config,
        FailingParserCapabilities { site: site.clone() },
    )
    .run()
    .unwrap();

    let page = model.page(&canon("http://h/")).unwrap();
    assert_eq!(page.status, FetchStatus::Ok(200));
    assert_eq!(page.parse_diagnostic.as_deref(), Some("unbalanced soup"));
    assert!(page.outgoing.is_empty());
    assert_eq!(model.erroneous_count(), 0, "a parse failure is not a link error");
}
